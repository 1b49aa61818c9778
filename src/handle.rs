use super::{errors::TaskError, result::TaskResult};
use parking_lot::{Condvar, Mutex};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Общее состояние пары Task/TaskHandle: слот результата плюс сигнал готовности.
/// Ровно один производитель (задача), разрешение происходит ровно один раз.
struct HandleState<R> {
    slot: Mutex<Option<TaskResult<R>>>,
    done: Condvar,
    ready: AtomicBool,
}

impl<R> HandleState<R> {
    fn complete(&self, result: TaskResult<R>) {
        let mut slot = self.slot.lock();
        // единственный производитель; повторное разрешение недостижимо
        debug_assert!(slot.is_none(), "task handle resolved twice");
        if slot.is_none() {
            *slot = Some(result);
            self.ready.store(true, Ordering::Release);
            self.done.notify_all();
        }
    }
}

/// Приёмник, который задача разрешает при сбросе без выполнения
trait Completion: Send + Sync {
    fn abandon(&self);
}

impl<R: Send> Completion for HandleState<R> {
    fn abandon(&self) {
        self.complete(Err(TaskError::ResultLost));
    }
}

/// Стираем тип работы: единица исполнения с гарантией exactly-once.
/// Паника внутри замыкания перехватывается и уходит в парный handle.
pub struct Task {
    run: Option<Box<dyn FnOnce() -> bool + Send + 'static>>,
    state: Arc<dyn Completion>,
}

impl Task {
    /// Выполняет задачу. Возвращает `false`, если замыкание паниковало.
    pub fn run(mut self) -> bool {
        match self.run.take() {
            Some(f) => f(),
            None => false,
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // задача выброшена без выполнения: наблюдатель не должен зависнуть
        if self.run.is_some() {
            self.state.abandon();
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Task").finish()
    }
}

/// Handle результата задачи: неблокирующий опрос или блокирующее ожидание
pub struct TaskHandle<R> {
    state: Arc<HandleState<R>>,
}

impl<R: Send + 'static> TaskHandle<R> {
    /// Разрешён ли уже handle (wait-free)
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::Acquire)
    }

    /// Забирает результат, если задача уже завершилась
    pub fn try_take(&self) -> Option<TaskResult<R>> {
        if !self.is_ready() {
            return None;
        }
        self.state.slot.lock().take()
    }

    /// Блокирует вызывающего до разрешения и отдаёт результат
    pub fn wait(self) -> TaskResult<R> {
        let mut slot = self.state.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.state.done.wait(&mut slot);
        }
    }

    /// Ожидание с ограничением по времени; `false` — таймаут
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut slot = self.state.slot.lock();
        if slot.is_some() {
            return true;
        }
        self.state.done.wait_for(&mut slot, timeout);
        slot.is_some()
    }
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("TaskHandle")
            .field("ready", &self.state.ready.load(Ordering::Relaxed))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Связывает замыкание с handle его результата.
/// Возврат или паника замыкания разрешают handle ровно один раз.
pub fn task_pair<R, F>(f: F) -> (Task, TaskHandle<R>)
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let state = Arc::new(HandleState {
        slot: Mutex::new(None),
        done: Condvar::new(),
        ready: AtomicBool::new(false),
    });

    let producer = state.clone();
    let run = Box::new(move || -> bool {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                producer.complete(Ok(value));
                true
            }
            Err(payload) => {
                producer.complete(Err(TaskError::Panic(panic_message(payload.as_ref()))));
                false
            }
        }
    });

    let task = Task {
        run: Some(run),
        state: state.clone(),
    };

    (task, TaskHandle { state })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_resolves_value() {
        let (task, handle) = task_pair(|| 21 * 2);
        assert!(!handle.is_ready());
        assert!(task.run());
        assert!(handle.is_ready());
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn test_panic_is_captured() {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));

        let (task, handle) = task_pair(|| -> i32 { panic!("boom") });
        assert!(!task.run());
        assert_eq!(handle.wait(), Err(TaskError::Panic("boom".to_string())));

        panic::set_hook(prev);
    }

    #[test]
    fn test_dropped_task_resolves_lost() {
        let (task, handle) = task_pair(|| 1);
        drop(task);
        assert_eq!(handle.wait(), Err(TaskError::ResultLost));
    }

    #[test]
    fn test_blocking_wait_across_threads() {
        let (task, handle) = task_pair(|| "done");
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            task.run();
        });
        assert_eq!(handle.wait(), Ok("done"));
        t.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let (task, handle) = task_pair(|| 7);
        assert!(!handle.wait_timeout(Duration::from_millis(10)));
        task.run();
        assert!(handle.wait_timeout(Duration::from_millis(10)));
        assert_eq!(handle.try_take(), Some(Ok(7)));
    }
}

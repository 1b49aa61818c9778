use super::handle::Task;
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

/// Общая блокирующая FIFO-очередь пула (MPMC).
///
/// Один мьютекс плюс condvar; длина дублируется атомиком, чтобы планировщик
/// читал глубину, не трогая замок очереди.
pub struct GlobalQueue {
    inner: Mutex<VecDeque<Task>>,
    ready: Condvar,
    len: AtomicUsize,
}

impl GlobalQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// Кладёт задачу и будит одного ожидающего
    pub fn push(&self, task: Task) {
        let mut queue = self.inner.lock();
        queue.push_back(task);
        self.len.store(queue.len(), Ordering::Release);
        self.ready.notify_one();
    }

    /// Неблокирующее извлечение
    pub fn try_pop(&self) -> Option<Task> {
        let mut queue = self.inner.lock();
        let task = queue.pop_front();
        self.len.store(queue.len(), Ordering::Release);
        task
    }

    /// Блокирует до появления задачи
    pub fn wait_pop(&self) -> Task {
        let mut queue = self.inner.lock();
        loop {
            if let Some(task) = queue.pop_front() {
                self.len.store(queue.len(), Ordering::Release);
                return task;
            }
            self.ready.wait(&mut queue);
        }
    }

    /// Ограниченное по времени ожидание; используется простаивающими
    /// воркерами вместо долгого сна
    pub fn wait_pop_timeout(&self, timeout: Duration) -> Option<Task> {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            self.ready.wait_for(&mut queue, timeout);
        }
        let task = queue.pop_front();
        self.len.store(queue.len(), Ordering::Release);
        task
    }

    /// Глубина очереди без захвата замка
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Будит всех ожидающих; вызывается при остановке пула
    pub fn wake_all(&self) {
        let _queue = self.inner.lock();
        self.ready.notify_all();
    }
}

impl Default for GlobalQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Локальная очередь воркера с поддержкой кражи.
///
/// Владелец кладёт и забирает с одного конца (LIFO, локальность кэша),
/// вор забирает с противоположного (FIFO, самые старые задачи).
/// Один замок на очередь; операции никогда не трогают чужие замки.
pub struct LocalQueue {
    inner: Mutex<VecDeque<Task>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Вставка владельцем
    pub fn push(&self, task: Task) {
        self.inner.lock().push_front(task);
    }

    /// Извлечение владельцем, самая свежая задача первой
    pub fn try_pop(&self) -> Option<Task> {
        self.inner.lock().pop_front()
    }

    /// Кража с противоположного конца
    pub fn try_steal(&self) -> Option<Task> {
        self.inner.lock().pop_back()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

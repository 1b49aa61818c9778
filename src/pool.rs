use super::{
    errors::PoolError,
    handle::{task_pair, Task, TaskHandle},
    model::{PoolMetrics, TaskCounters},
    queue::{GlobalQueue, LocalQueue},
    worker::{self, CancelToken, Registry, WorkerContext, WorkerHandle, WorkerKind},
};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tracing::debug;

/// Период обхода списка истёкших воркеров
const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Конфигурация пула
#[derive(Debug, Clone)]
pub struct Config {
    /// Нижняя граница: столько воркеров пул держит всегда
    pub core_size: usize,
    /// Верхняя граница живых воркеров
    pub max_size: usize,
    /// Глубина глобальной очереди, после которой растём сверх core_size
    pub max_queue_depth: usize,
    /// Сколько секунд overflow-воркер живёт без задач
    pub keep_alive_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            core_size: (num_cpus / 2).max(1),
            max_size: num_cpus * 2,
            max_queue_depth: 20,
            keep_alive_seconds: 30,
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            core_size: num_cpus,
            max_size: num_cpus,
            max_queue_depth: num_cpus * 10,
            keep_alive_seconds: 30,
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            core_size: num_cpus,
            max_size: num_cpus * 4,
            max_queue_depth: 64,
            keep_alive_seconds: 30,
        }
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.core_size == 0 {
            return Err(PoolError::InvalidConfig(
                "core_size must be positive".into(),
            ));
        }
        if self.max_size < self.core_size {
            return Err(PoolError::InvalidConfig(format!(
                "max_size ({}) is less than core_size ({})",
                self.max_size, self.core_size
            )));
        }
        Ok(())
    }

    fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds)
    }
}

struct ReaperHandle {
    token: CancelToken,
    thread: thread::JoinHandle<()>,
}

/// Внутреннее состояние пула. Воркеры держат Arc только на очереди и
/// реестр, поэтому Inner умирает вместе с последним хэндлом пула.
struct Inner {
    config: Config,
    keep_alive: Duration,
    global: Arc<GlobalQueue>,
    registry: Arc<Mutex<Registry>>,
    counters: Arc<TaskCounters>,
    closed: AtomicBool,
    next_worker_id: AtomicUsize,
    reaper: Mutex<Option<ReaperHandle>>,
}

enum Decision {
    Enqueue,
    CallerRuns,
}

/// Эластичный пул потоков с work-stealing планировщиком
pub struct ThreadPool {
    inner: Arc<Inner>,
}

impl Clone for ThreadPool {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("ThreadPool")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ThreadPool {
    /// Пул с заданными границами и остальными параметрами по умолчанию
    pub fn new(core_size: usize, max_size: usize) -> Result<Self, PoolError> {
        Self::with_config(Config {
            core_size,
            max_size,
            ..Default::default()
        })
    }

    pub fn with_config(config: Config) -> Result<Self, PoolError> {
        config.validate()?;

        let keep_alive = config.keep_alive();
        let inner = Arc::new(Inner {
            config,
            keep_alive,
            global: Arc::new(GlobalQueue::new()),
            registry: Arc::new(Mutex::new(Registry::new())),
            counters: Arc::new(TaskCounters::default()),
            closed: AtomicBool::new(false),
            next_worker_id: AtomicUsize::new(0),
            reaper: Mutex::new(None),
        });

        let token = CancelToken::new();
        match spawn_reaper(inner.registry.clone(), token.clone()) {
            Ok(handle) => {
                *inner.reaper.lock() = Some(ReaperHandle {
                    token,
                    thread: handle,
                });
            }
            Err(err) => {
                // ни один поток не запущен, чистить нечего
                inner.closed.store(true, Ordering::Release);
                return Err(PoolError::SpawnFailed(err));
            }
        }

        Ok(Self { inner })
    }

    /// Принимает замыкание и возвращает handle его результата.
    ///
    /// Политика допуска, в порядке приоритета: добор core-воркеров,
    /// постановка в глобальную очередь, overflow-воркер, и при полном
    /// насыщении — выполнение прямо на потоке вызывающего (backpressure).
    /// Вызов изнутри воркера кладёт подзадачу в его локальную очередь.
    pub fn submit<R, F>(&self, f: F) -> Result<TaskHandle<R>, PoolError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        let (task, handle) = task_pair(f);
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);

        // быстрый путь для подзадач, порождённых внутри воркера
        let task = match worker::try_local_push(self.inner.pool_id(), task) {
            Ok(()) => return Ok(handle),
            Err(task) => task,
        };

        self.inner.admit(task)?;
        Ok(handle)
    }

    /// Живые воркеры (core + overflow)
    pub fn thread_count(&self) -> usize {
        self.inner.registry.lock().active_count()
    }

    /// Истёкшие воркеры, ещё не подобранные жнецом
    pub fn expired_count(&self) -> usize {
        self.inner.registry.lock().expired.len()
    }

    /// Глубина глобальной очереди
    pub fn queued(&self) -> usize {
        self.inner.global.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Немедленно освобождает ресурсы истёкших воркеров
    pub fn reap_now(&self) -> usize {
        reap(&self.inner.registry)
    }

    pub fn metrics(&self) -> PoolMetrics {
        let (core, overflow, expired, locals) = {
            let registry = self.inner.registry.lock();
            (
                registry.core.len(),
                registry.overflow.len(),
                registry.expired.len(),
                registry.active_locals(),
            )
        };
        PoolMetrics {
            core_workers: core,
            overflow_workers: overflow,
            expired_workers: expired,
            queued_tasks: self.inner.global.len(),
            // замок реестра уже отпущен, локальные замки берутся по одному
            local_queued_tasks: locals.iter().map(|queue| queue.len()).sum(),
            submitted_tasks: self.inner.counters.submitted.load(Ordering::Relaxed),
            completed_tasks: self.inner.counters.completed.load(Ordering::Relaxed),
            failed_tasks: self.inner.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Барьер живости: уступает процессор, пока глобальная и все локальные
    /// очереди не окажутся пустыми одновременно. Осмысленен только когда
    /// вызывающий сам прекратил отправку задач.
    pub fn wait_for_completion(&self) {
        self.inner.drain();
    }

    /// Останавливает пул: отменяет токены воркеров, присоединяет все
    /// потоки и жнеца. Повторные вызовы — no-op.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Inner {
    /// Стабильная идентичность пула для worker-local быстрого пути
    fn pool_id(&self) -> usize {
        Arc::as_ptr(&self.global) as usize
    }

    fn admit(&self, task: Task) -> Result<(), PoolError> {
        let decision = {
            let mut registry = self.registry.lock();
            // close() сначала выставляет closed, потом вычищает реестр под
            // этим же замком: увидели здесь !closed — наш воркер попадёт
            // под изъятие, увидели closed — не плодим осиротевших потоков
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::PoolClosed);
            }
            let core_count = registry.core_count();
            let active = registry.active_count();
            let depth = self.global.len();

            if core_count < self.config.core_size {
                self.spawn_worker_locked(&mut registry, WorkerKind::Core)?;
                Decision::Enqueue
            } else if depth < self.config.max_queue_depth {
                Decision::Enqueue
            } else if active < self.config.max_size {
                self.spawn_worker_locked(&mut registry, WorkerKind::Overflow)?;
                Decision::Enqueue
            } else {
                Decision::CallerRuns
            }
        };

        // замок реестра уже отпущен: ни push, ни выполнение задачи
        // не пересекаются с ним
        match decision {
            Decision::Enqueue => {
                self.global.push(task);
                // гонка с close(): решение принято до закрытия, а push
                // произошёл после того, как close() уже разобрал очередь.
                // Разбираем сами, наблюдатель получит ResultLost
                if self.closed.load(Ordering::Acquire) {
                    while let Some(task) = self.global.try_pop() {
                        drop(task);
                    }
                }
            }
            Decision::CallerRuns => {
                if task.run() {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    /// Запуск и регистрация воркера под уже взятым замком реестра:
    /// воркер не может ни истечь, ни быть закрытым до своей регистрации
    fn spawn_worker_locked(
        &self,
        registry: &mut Registry,
        kind: WorkerKind,
    ) -> Result<(), PoolError> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let local = Arc::new(LocalQueue::new());
        let token = CancelToken::new();

        let handle = worker::spawn(WorkerContext {
            id,
            kind,
            keep_alive: self.keep_alive,
            local: local.clone(),
            global: self.global.clone(),
            registry: self.registry.clone(),
            token: token.clone(),
            counters: self.counters.clone(),
        })?;

        registry.insert(WorkerHandle {
            id,
            kind,
            local,
            token,
            thread: Some(handle),
        });
        debug!(id, ?kind, "worker spawned");
        Ok(())
    }

    fn drain(&self) {
        loop {
            if self.global.is_empty() {
                let locals = self.registry.lock().active_locals();
                if locals.iter().all(|queue| queue.is_empty()) && self.global.is_empty() {
                    return;
                }
            }
            thread::yield_now();
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // отмена и изъятие всех записей — один захват замка реестра;
        // воркер в середине самоустранения либо уже в expired, либо
        // ещё в активном множестве, третьего не дано
        let mut handles: Vec<WorkerHandle> = {
            let mut registry = self.registry.lock();
            for handle in registry.core.values().chain(registry.overflow.values()) {
                handle.token.cancel();
            }
            let mut taken: Vec<WorkerHandle> =
                registry.core.drain().map(|(_, handle)| handle).collect();
            taken.extend(registry.overflow.drain().map(|(_, handle)| handle));
            taken.append(&mut registry.expired);
            taken
        };

        // разбудить припаркованных на глобальной очереди
        self.global.wake_all();

        // последний клон пула может умереть внутри задачи на воркере:
        // собственный поток присоединить нельзя, он довершит текущую
        // задачу и выйдет сам по уже отменённому токену
        let current = thread::current().id();
        for handle in &mut handles {
            if let Some(thread) = handle.thread.take() {
                if thread.thread().id() == current {
                    continue;
                }
                let _ = thread.join();
            }
        }

        // принятые, но так и не разобранные задачи: их наблюдатели
        // получают ResultLost вместо вечного ожидания на живом Arc
        while let Some(task) = self.global.try_pop() {
            drop(task);
        }

        if let Some(reaper) = self.reaper.lock().take() {
            reaper.token.cancel();
            let _ = reaper.thread.join();
        }
        debug!("pool closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // без явного close(): дождаться опустошения очередей и свернуться.
        // На потоке воркера барьер невозможен: этот воркер занят текущей
        // задачей и свою очередь разобрать не сможет
        if !self.closed.load(Ordering::Acquire) && !worker::on_pool_worker(self.pool_id()) {
            self.drain();
        }
        self.close();
    }
}

fn spawn_reaper(
    registry: Arc<Mutex<Registry>>,
    token: CancelToken,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("elastic-pool-reaper".into())
        .spawn(move || {
            while !token.is_cancelled() {
                reap(&registry);
                thread::sleep(REAP_INTERVAL);
            }
        })
}

/// Забирает истёкших воркеров из реестра и присоединяет их потоки.
/// Join происходит вне всяких замков и не задевает очереди задач.
fn reap(registry: &Mutex<Registry>) -> usize {
    let expired = std::mem::take(&mut registry.lock().expired);
    let count = expired.len();
    for mut handle in expired {
        if let Some(thread) = handle.thread.take() {
            let _ = thread.join();
        }
    }
    if count > 0 {
        debug!(count, "expired workers reaped");
    }
    count
}

/// Лениво создаваемый пул с настройками по умолчанию.
///
/// Явная замена процессного синглтона: ячейкой владеет композиционный
/// корень вызывающего. После shutdown() следующий get() создаёт свежий пул.
pub struct SharedPool {
    slot: Mutex<Option<ThreadPool>>,
}

impl SharedPool {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Пул из ячейки; создаёт его при первом обращении
    pub fn get(&self) -> Result<ThreadPool, PoolError> {
        let mut slot = self.slot.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let pool = ThreadPool::with_config(Config::default())?;
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Дожидается опустошения очередей и закрывает пул; ячейка пустеет
    pub fn shutdown(&self) {
        if let Some(pool) = self.slot.lock().take() {
            pool.wait_for_completion();
            pool.close();
        }
    }
}

impl Default for SharedPool {
    fn default() -> Self {
        Self::new()
    }
}

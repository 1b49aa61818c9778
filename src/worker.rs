//! Воркеры пула: цикл fetch-execute, простой, истечение по keep-alive.
//!
//! Порядок выбора работы: своя локальная очередь, затем глобальная, затем
//! кража у случайной жертвы. Все проверки отмены происходят только на
//! границах опроса; выполняющаяся задача никогда не прерывается.

use super::{
    handle::Task,
    model::TaskCounters,
    queue::{GlobalQueue, LocalQueue},
};
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use rand::Rng;
use std::{
    cell::RefCell,
    collections::HashMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

/// Максимальная пауза простаивающего воркера между опросами;
/// ограничивает сверху задержку подхвата украденной задачи
const PARK_INTERVAL: Duration = Duration::from_millis(1);

/// Кооперативный токен остановки, проверяется на границах опроса
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkerKind {
    /// Учитывается в core_size, сам не истекает
    Core,
    /// Сверх core_size, истекает после keep-alive простоя
    Overflow,
}

/// Запись реестра: всё, что пул знает о живом воркере
pub(crate) struct WorkerHandle {
    pub id: usize,
    pub kind: WorkerKind,
    pub local: Arc<LocalQueue>,
    pub token: CancelToken,
    pub thread: Option<thread::JoinHandle<()>>,
}

/// Реестр воркеров. Активные множества и список истёкших живут под одним
/// замком: переход активный → истёкший обязан быть единым атомарным шагом.
pub(crate) struct Registry {
    pub core: HashMap<usize, WorkerHandle>,
    pub overflow: HashMap<usize, WorkerHandle>,
    pub expired: Vec<WorkerHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            core: HashMap::new(),
            overflow: HashMap::new(),
            expired: Vec::new(),
        }
    }

    pub fn core_count(&self) -> usize {
        self.core.len()
    }

    pub fn active_count(&self) -> usize {
        self.core.len() + self.overflow.len()
    }

    pub fn insert(&mut self, handle: WorkerHandle) {
        match handle.kind {
            WorkerKind::Core => self.core.insert(handle.id, handle),
            WorkerKind::Overflow => self.overflow.insert(handle.id, handle),
        };
    }

    /// Локальные очереди всех активных воркеров
    pub fn active_locals(&self) -> Vec<Arc<LocalQueue>> {
        self.core
            .values()
            .chain(self.overflow.values())
            .map(|w| w.local.clone())
            .collect()
    }

    /// Очереди-жертвы для кражи, без собственной
    fn steal_targets(&self, thief: usize) -> Vec<Arc<LocalQueue>> {
        self.core
            .values()
            .chain(self.overflow.values())
            .filter(|w| w.id != thief)
            .map(|w| w.local.clone())
            .collect()
    }
}

/// Всё, что нужно потоку воркера; Arc только на отдельные структуры,
/// чтобы воркеры не держали сам пул живым
pub(crate) struct WorkerContext {
    pub id: usize,
    pub kind: WorkerKind,
    pub keep_alive: Duration,
    pub local: Arc<LocalQueue>,
    pub global: Arc<GlobalQueue>,
    pub registry: Arc<Mutex<Registry>>,
    pub token: CancelToken,
    pub counters: Arc<TaskCounters>,
}

thread_local! {
    // (идентичность пула, локальная очередь текущего воркера)
    static CURRENT: RefCell<Option<(usize, Arc<LocalQueue>)>> = RefCell::new(None);
}

/// Быстрый путь submit изнутри воркера: подзадача уходит сразу в его
/// локальную очередь. Возвращает задачу обратно, если вызывающий поток
/// не является воркером этого пула.
pub(crate) fn try_local_push(pool_id: usize, task: Task) -> Result<(), Task> {
    CURRENT.with(|cell| match &*cell.borrow() {
        Some((id, local)) if *id == pool_id => {
            local.push(task);
            Ok(())
        }
        _ => Err(task),
    })
}

/// Является ли текущий поток воркером данного пула
pub(crate) fn on_pool_worker(pool_id: usize) -> bool {
    CURRENT.with(|cell| matches!(&*cell.borrow(), Some((id, _)) if *id == pool_id))
}

pub(crate) fn spawn(ctx: WorkerContext) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("elastic-pool-worker-{}", ctx.id))
        .spawn(move || run(ctx))
}

fn run(ctx: WorkerContext) {
    let pool_id = Arc::as_ptr(&ctx.global) as usize;
    CURRENT.with(|cell| *cell.borrow_mut() = Some((pool_id, ctx.local.clone())));
    debug!(id = ctx.id, kind = ?ctx.kind, "worker started");

    let mut last_active = Instant::now();
    let backoff = Backoff::new();

    loop {
        if ctx.token.is_cancelled() {
            break;
        }

        if let Some(task) = fetch(&ctx) {
            execute(&ctx, task);
            last_active = Instant::now();
            backoff.reset();
            continue;
        }

        // все три источника пусты
        if ctx.kind == WorkerKind::Overflow && last_active.elapsed() >= ctx.keep_alive {
            retire(&ctx);
            CURRENT.with(|cell| *cell.borrow_mut() = None);
            debug!(id = ctx.id, "overflow worker expired");
            return;
        }

        if backoff.is_completed() {
            // спин исчерпан: короткая парковка на глобальной очереди
            if let Some(task) = ctx.global.wait_pop_timeout(PARK_INTERVAL) {
                execute(&ctx, task);
                last_active = Instant::now();
                backoff.reset();
            }
        } else {
            backoff.snooze();
        }
    }

    CURRENT.with(|cell| *cell.borrow_mut() = None);
    debug!(id = ctx.id, "worker stopped");
}

fn execute(ctx: &WorkerContext, task: Task) {
    if task.run() {
        ctx.counters.completed.fetch_add(1, Ordering::Relaxed);
    } else {
        // паника уже перехвачена в handle, воркер просто идёт дальше
        ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
    }
}

fn fetch(ctx: &WorkerContext) -> Option<Task> {
    if let Some(task) = ctx.local.try_pop() {
        return Some(task);
    }
    if let Some(task) = ctx.global.try_pop() {
        return Some(task);
    }
    steal(ctx)
}

fn steal(ctx: &WorkerContext) -> Option<Task> {
    // снимок Arc под замком реестра; чужие замки очередей берутся уже после
    let victims = ctx.registry.lock().steal_targets(ctx.id);
    if victims.is_empty() {
        return None;
    }

    let start = rand::thread_rng().gen_range(0..victims.len());
    for i in 0..victims.len() {
        if let Some(task) = victims[(start + i) % victims.len()].try_steal() {
            return Some(task);
        }
    }
    None
}

/// Самоустранение overflow-воркера: удаление из активного множества и
/// добавление в истёкшие — один шаг под замком реестра. Если запись уже
/// забрал close(), делать нечего.
fn retire(ctx: &WorkerContext) {
    let mut registry = ctx.registry.lock();
    if let Some(handle) = registry.overflow.remove(&ctx.id) {
        registry.expired.push(handle);
    }
}

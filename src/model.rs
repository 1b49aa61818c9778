use std::sync::atomic::AtomicUsize;

/// Счётчики задач; пишутся воркерами, читаются в metrics()
#[derive(Default)]
pub(crate) struct TaskCounters {
    pub submitted: AtomicUsize,
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

/// Снимок состояния пула
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub core_workers: usize,
    pub overflow_workers: usize,
    pub expired_workers: usize,
    pub queued_tasks: usize,
    pub local_queued_tasks: usize,
    pub submitted_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}

impl PoolMetrics {
    /// Живые потоки-воркеры
    pub fn worker_count(&self) -> usize {
        self.core_workers + self.overflow_workers
    }

    /// Принятые, но ещё не завершившиеся задачи
    pub fn pending(&self) -> usize {
        self.submitted_tasks
            .saturating_sub(self.completed_tasks + self.failed_tasks)
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.completed_tasks + self.failed_tasks;
        if finished == 0 {
            return 1.0;
        }
        self.completed_tasks as f64 / finished as f64
    }
}

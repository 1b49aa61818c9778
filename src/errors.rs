use thiserror::Error;

/// Ошибка выполнения задачи, доставляется наблюдателю через её handle
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panic(String),
    #[error("task was dropped before execution")]
    ResultLost,
}

/// Ошибки самого пула
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool config: {0}")]
    InvalidConfig(String),
    #[error("pool is closed")]
    PoolClosed,
    #[error("failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

//! Эластичный пул потоков с work-stealing планировщиком
//!
//! # Features
//! - Рост и сжатие между core_size и max_size, keep-alive для лишних потоков
//! - Локальные очереди воркеров с кражей задач для балансировки нагрузки
//! - Backpressure: при полном насыщении задача выполняется на потоке вызывающего
//! - Handle результата на каждую задачу, паники перехватываются
//! - Кооперативная остановка без прерывания выполняющихся задач

pub mod errors;
pub mod handle;
pub mod model;
pub mod pool;
pub mod queue;
pub mod result;
pub mod worker;

pub use errors::{PoolError, TaskError};
pub use handle::TaskHandle;
pub use model::PoolMetrics;
pub use pool::{Config, SharedPool, ThreadPool};
pub use result::TaskResult;

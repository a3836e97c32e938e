// GenAI job orchestration scheduler.
//
// The scheduling subsystem: quota-gated job admission, a durable
// priority queue, a heartbeat-tracked worker registry, and the
// dispatch loop that matches queued jobs to idle workers.

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod ids;
pub mod registry;
pub mod server;
pub mod store;
pub mod worker_client;

pub use config::Config;
pub use error::{AppError, AppResult};

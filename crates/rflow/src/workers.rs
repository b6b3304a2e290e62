//! 🧵 The one trait every background task in rflow signs up for.

use anyhow::Result;
use tokio::task::JoinHandle;

/// 🧵 A background worker, that does work. duh.
///
/// The sink's dispatcher is one. The deadline watchdog races one. Whoever calls
/// `start` owns the handle and decides how long to wait on it.
pub trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

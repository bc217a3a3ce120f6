//! Alert sinks.
//!
//! Every monitor and the supervisor report through an [`AlertSink`]. Sinks
//! are shared across worker threads and must not fail the caller: storage
//! errors are logged inside the sink and the alert is dropped.

pub mod log;
pub mod memory;

pub use log::AlertLog;
pub use memory::MemorySink;

use crate::alert::Alert;
use std::sync::Arc;

pub trait AlertSink: Send + Sync {
    fn record(&self, alert: Alert);
}

pub type SharedSink = Arc<dyn AlertSink>;


//! watchpost - host and network intrusion detection
//!
//! Three independent monitors report through a shared alert sink:
//! file integrity over a set of sensitive files, suspicious process names,
//! and packet rules on a live interface. The supervisor starts and stops
//! them as a unit.

pub mod alert;
pub mod config;
pub mod metrics;
pub mod monitors;
pub mod sink;
pub mod state;
pub mod supervisor;
pub mod util;

pub use alert::{Alert, AlertKind, AlertSource, Protocol};
pub use config::Config;
pub use sink::{AlertLog, AlertSink, MemorySink, SharedSink};
pub use state::AlertDeduplicator;
pub use supervisor::{MonitoringSupervisor, SupervisorState};

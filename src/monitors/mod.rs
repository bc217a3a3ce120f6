pub mod capture;
pub mod integrity;
pub mod lifecycle;
pub mod network;
pub mod packet;
pub mod process;
pub mod procfs;
pub mod watch;

pub use capture::{CaptureEvent, InterfaceInfo, PacketSource, PacketStream};
pub use integrity::{FileIntegrityMonitor, IntegrityState};
pub use lifecycle::MonitorState;
pub use network::{NetworkIntrusionMonitor, NetworkRuleSet, PacketInspector};
pub use packet::{Packet, Transport};
pub use process::{ProcessAnomalyMonitor, ProcessSweeper};
pub use procfs::{ProcFsTable, ProcessSighting, ProcessTable};
pub use watch::FsEvent;

//! Alert types delivered to the alert sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    HidsAlert,
    NidsAlert,
    SystemInfo,
    SystemWarning,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HidsAlert => "HIDS_ALERT",
            AlertKind::NidsAlert => "NIDS_ALERT",
            AlertKind::SystemInfo => "SYSTEM_INFO",
            AlertKind::SystemWarning => "SYSTEM_WARNING",
        }
    }

    /// Detections and warnings are logged at warn level, notices at info.
    pub fn is_elevated(&self) -> bool {
        !matches!(self, AlertKind::SystemInfo)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AlertSource {
    #[serde(rename = "File Monitor")]
    FileMonitor,
    #[serde(rename = "Process Monitor")]
    ProcessMonitor,
    #[serde(rename = "Network Monitor")]
    NetworkMonitor,
    #[serde(rename = "IDS Core")]
    Core,
}

impl fmt::Display for AlertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlertSource::FileMonitor => "File Monitor",
            AlertSource::ProcessMonitor => "Process Monitor",
            AlertSource::NetworkMonitor => "Network Monitor",
            AlertSource::Core => "IDS Core",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub message: String,
    pub source: AlertSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

impl Alert {
    pub fn new(kind: AlertKind, source: AlertSource, message: impl Into<String>) -> Self {
        Self {
            id: alert_id(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            source,
            protocol: None,
        }
    }

    pub fn hids(source: AlertSource, message: impl Into<String>) -> Self {
        Self::new(AlertKind::HidsAlert, source, message)
    }

    pub fn nids(protocol: Protocol, message: impl Into<String>) -> Self {
        Self::new(AlertKind::NidsAlert, AlertSource::NetworkMonitor, message).with_protocol(protocol)
    }

    pub fn system_info(message: impl Into<String>) -> Self {
        Self::new(AlertKind::SystemInfo, AlertSource::Core, message)
    }

    pub fn system_warning(source: AlertSource, message: impl Into<String>) -> Self {
        Self::new(AlertKind::SystemWarning, source, message)
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }
}

/// Unique alert ID from timestamp, counter, and random bytes.
fn alert_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut buf = [0u8; 4];
    let random_part = if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_ne_bytes(buf)
    } else {
        counter
            .wrapping_mul(0x517cc1b727220a95)
            .wrapping_add(std::process::id() as u64) as u32
    };

    format!(
        "alr-{:012x}-{:04x}-{:08x}",
        now.as_nanos() as u64 & 0xFFFF_FFFF_FFFF,
        counter & 0xFFFF,
        random_part
    )
}

//! Network intrusion monitor
//!
//! Captures packets on one interface and alerts on traffic to or from
//! suspicious ports, and optionally on ICMP echo traffic. Repeated alerts
//! for the same flow are collapsed by the [`AlertDeduplicator`].

use super::capture::{has_capture_privilege, CaptureEvent, InterfaceInfo, PacketSource};
use super::lifecycle::{MonitorState, StateCell, StopSignal, Worker};
use super::packet::{Packet, Transport};
use crate::alert::{Alert, Protocol};
use crate::config::{NetworkConfig, NidsConfig};
use crate::metrics::{ALERTS_SUPPRESSED, PACKETS_INSPECTED};
use crate::sink::SharedSink;
use crate::state::AlertDeduplicator;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;

/// Detection rules, fixed for the lifetime of a monitor instance.
#[derive(Debug, Clone, Default)]
pub struct NetworkRuleSet {
    pub suspicious_ports: HashSet<u16>,
    pub icmp_monitored: bool,
    pub whitelist_ips: HashSet<IpAddr>,
    pub interface: Option<String>,
}

impl NetworkRuleSet {
    pub fn from_config(nids: &NidsConfig, network: &NetworkConfig, interfaces: &[InterfaceInfo]) -> Self {
        let whitelist_ips = network
            .whitelist_ips
            .iter()
            .filter_map(|ip| match ip.parse::<IpAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(entry = %ip, "Ignoring invalid whitelist IP");
                    None
                }
            })
            .collect();

        Self {
            suspicious_ports: nids.suspicious_ports.iter().copied().collect(),
            icmp_monitored: nids.monitor_icmp_ping,
            whitelist_ips,
            interface: select_interface(network.preferred_interface(), interfaces),
        }
    }

    pub fn has_rules(&self) -> bool {
        !self.suspicious_ports.is_empty() || self.icmp_monitored
    }
}

/// Pick the capture interface: the preferred one if present, else the first
/// non-loopback interface, else whatever comes first.
pub fn select_interface(preferred: Option<&str>, interfaces: &[InterfaceInfo]) -> Option<String> {
    if let Some(name) = preferred {
        if interfaces.iter().any(|i| i.name == name) {
            return Some(name.to_string());
        }
        warn!(interface = name, "Configured interface not found, auto-selecting");
    }

    interfaces
        .iter()
        .find(|i| !i.is_loopback())
        .or_else(|| interfaces.first())
        .map(|i| i.name.clone())
}

/// Applies the rule set to single packets.
pub struct PacketInspector {
    rules: Arc<NetworkRuleSet>,
    dedup: Arc<AlertDeduplicator>,
    sink: SharedSink,
}

impl PacketInspector {
    pub fn new(rules: Arc<NetworkRuleSet>, dedup: Arc<AlertDeduplicator>, sink: SharedSink) -> Self {
        Self { rules, dedup, sink }
    }

    /// Dedup key and alert for a packet, before deduplication.
    pub fn classify(&self, packet: &Packet) -> Option<(String, Alert)> {
        if self.rules.whitelist_ips.contains(&packet.src) || self.rules.whitelist_ips.contains(&packet.dst) {
            return None;
        }

        if let (Some(proto), Some((sport, dport))) = (packet.protocol(), packet.ports()) {
            return self.classify_ports(proto, packet, sport, dport);
        }

        match packet.transport {
            Transport::Icmp { icmp_type } if self.rules.icmp_monitored => {
                let direction = match icmp_type {
                    ICMP_ECHO_REQUEST => "Echo Request",
                    ICMP_ECHO_REPLY => "Echo Reply",
                    _ => return None,
                };
                let key = format!("ICMP-{}-{}-{}", icmp_type, packet.src, packet.dst);
                let message = format!(
                    "ICMP ping detected ({}, Type: {}) from {} to {}",
                    direction, icmp_type, packet.src, packet.dst
                );
                Some((key, Alert::nids(Protocol::Icmp, message)))
            }
            _ => None,
        }
    }

    fn classify_ports(&self, proto: Protocol, packet: &Packet, sport: u16, dport: u16) -> Option<(String, Alert)> {
        let port = if self.rules.suspicious_ports.contains(&dport) {
            dport
        } else if self.rules.suspicious_ports.contains(&sport) {
            sport
        } else {
            return None;
        };

        let key = format!("{}-{}:{}-{}:{}", proto, packet.src, sport, packet.dst, dport);
        let message = format!(
            "{} connection on suspicious port ({}): {}:{} -> {}:{}",
            proto, port, packet.src, sport, packet.dst, dport
        );
        Some((key, Alert::nids(proto, message)))
    }

    /// Classify and, unless suppressed as a duplicate, record. Returns
    /// whether an alert was recorded.
    pub fn inspect(&self, packet: &Packet, now: Instant) -> bool {
        PACKETS_INSPECTED.inc();

        let Some((key, alert)) = self.classify(packet) else {
            return false;
        };
        if !self.dedup.should_emit(&key, now) {
            ALERTS_SUPPRESSED.inc();
            debug!(key = %key, "Duplicate network alert suppressed");
            return false;
        }
        self.sink.record(alert);
        true
    }
}

pub struct NetworkIntrusionMonitor {
    /// `None` when the monitor was disabled at construction.
    rules: Option<Arc<NetworkRuleSet>>,
    source: Arc<dyn PacketSource>,
    dedup: Arc<AlertDeduplicator>,
    sink: SharedSink,
    privilege_check: fn() -> bool,
    lifecycle: StateCell,
    worker: Option<Worker>,
}

impl NetworkIntrusionMonitor {
    pub fn new(
        nids: &NidsConfig,
        network: &NetworkConfig,
        interfaces: &[InterfaceInfo],
        source: Arc<dyn PacketSource>,
        sink: SharedSink,
    ) -> Self {
        let rules = NetworkRuleSet::from_config(nids, network, interfaces);

        let rules = if !rules.has_rules() {
            info!("No suspicious ports and ICMP monitoring off, network monitoring disabled");
            None
        } else if rules.interface.is_none() {
            warn!("No network interface available, network monitoring disabled");
            None
        } else {
            info!(
                interface = rules.interface.as_deref().unwrap_or_default(),
                ports = rules.suspicious_ports.len(),
                icmp = rules.icmp_monitored,
                whitelisted = rules.whitelist_ips.len(),
                "Network monitor configured"
            );
            Some(Arc::new(rules))
        };

        Self {
            rules,
            source,
            dedup: Arc::new(AlertDeduplicator::new()),
            sink,
            privilege_check: has_capture_privilege,
            lifecycle: StateCell::new(),
            worker: None,
        }
    }

    /// Replace the capture privilege check.
    pub fn with_privilege_check(mut self, check: fn() -> bool) -> Self {
        self.privilege_check = check;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.rules.is_some()
    }

    pub fn interface(&self) -> Option<&str> {
        self.rules.as_ref().and_then(|r| r.interface.as_deref())
    }

    pub fn state(&self) -> MonitorState {
        self.lifecycle.get()
    }

    pub fn start(&mut self) -> bool {
        let (Some(rules), Some(interface)) = (
            self.rules.clone(),
            self.interface().map(str::to_string),
        ) else {
            debug!("Network monitor disabled, not starting");
            return false;
        };
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return true;
        }
        if !(self.privilege_check)() {
            warn!("Packet capture requires root privileges, network monitoring not started");
            return false;
        }

        let inspector = PacketInspector::new(rules, Arc::clone(&self.dedup), Arc::clone(&self.sink));
        let source = Arc::clone(&self.source);
        let lifecycle = self.lifecycle.clone();

        self.lifecycle.set(MonitorState::Running);
        self.worker = Some(Worker::spawn_blocking("network-capture", move |stop| {
            capture_loop(source.as_ref(), &interface, &inspector, &stop);
            lifecycle.set(MonitorState::Stopped);
        }));

        info!(interface = self.interface().unwrap_or_default(), "Network monitor started");
        true
    }

    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.lifecycle.set(MonitorState::Stopping);
        worker.shutdown(STOP_TIMEOUT).await;
        self.lifecycle.set(MonitorState::Stopped);
        info!("Network monitor stopped");
    }
}

fn capture_loop(source: &dyn PacketSource, interface: &str, inspector: &PacketInspector, stop: &StopSignal) {
    let mut stream = match source.open(interface) {
        Ok(stream) => stream,
        Err(e) => {
            error!(interface, error = %e, "Failed to open packet capture");
            return;
        }
    };
    debug!(interface, "Capture opened");

    while !stop.is_stopped() {
        match stream.next_event() {
            Ok(CaptureEvent::Packet(packet)) => {
                inspector.inspect(&packet, Instant::now());
            }
            Ok(CaptureEvent::Idle) => {}
            Ok(CaptureEvent::Closed) => {
                info!(interface, "Capture source closed");
                break;
            }
            Err(e) => {
                error!(interface, error = %e, "Packet capture failed");
                break;
            }
        }
    }
}

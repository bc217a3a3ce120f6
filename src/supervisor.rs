//! Ordered start/stop of the three monitors.
//!
//! Monitors start file, process, network and stop in the reverse order.
//! A monitor that declines to start is reported and skipped; the others
//! keep running.

use crate::alert::{Alert, AlertSource};
use crate::config::Config;
use crate::metrics::ACTIVE_MONITORS;
use crate::monitors::capture::{default_source, list_interfaces};
use crate::monitors::{
    FileIntegrityMonitor, MonitorState, NetworkIntrusionMonitor, ProcFsTable, ProcessAnomalyMonitor,
};
use crate::sink::SharedSink;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Stopping,
    Stopped,
}

pub struct MonitoringSupervisor {
    file: FileIntegrityMonitor,
    process: ProcessAnomalyMonitor,
    network: NetworkIntrusionMonitor,
    sensitive_files: Vec<PathBuf>,
    sink: SharedSink,
    state: SupervisorState,
}

impl MonitoringSupervisor {
    /// Build the monitors against the live system.
    pub fn new(config: &Config, sink: SharedSink) -> Self {
        let interfaces = list_interfaces().unwrap_or_else(|e| {
            warn!(error = %e, "Could not enumerate network interfaces");
            Vec::new()
        });

        let file = FileIntegrityMonitor::new(Arc::clone(&sink));
        let process = ProcessAnomalyMonitor::new(&config.hids, Arc::new(ProcFsTable::new()), Arc::clone(&sink));
        let network = NetworkIntrusionMonitor::new(
            &config.nids,
            &config.network,
            &interfaces,
            default_source(),
            Arc::clone(&sink),
        );

        Self::from_monitors(file, process, network, config.hids.resolved_sensitive_files(), sink)
    }

    pub fn from_monitors(
        file: FileIntegrityMonitor,
        process: ProcessAnomalyMonitor,
        network: NetworkIntrusionMonitor,
        sensitive_files: Vec<PathBuf>,
        sink: SharedSink,
    ) -> Self {
        Self {
            file,
            process,
            network,
            sensitive_files,
            sink,
            state: SupervisorState::NotStarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn file(&self) -> &FileIntegrityMonitor {
        &self.file
    }

    pub fn process(&self) -> &ProcessAnomalyMonitor {
        &self.process
    }

    pub fn network(&self) -> &NetworkIntrusionMonitor {
        &self.network
    }

    pub fn monitor_states(&self) -> [(&'static str, MonitorState); 3] {
        [
            ("file", self.file.state()),
            ("process", self.process.state()),
            ("network", self.network.state()),
        ]
    }

    fn declined(&self, source: AlertSource, name: &str) {
        warn!(monitor = name, "Monitor did not start");
        self.sink.record(Alert::system_warning(
            source,
            format!("{} monitoring is not active", name),
        ));
    }

    /// Start every monitor. Returns how many are running.
    pub fn start_all(&mut self) -> usize {
        if self.state == SupervisorState::Running {
            return self.running_count();
        }

        self.sink.record(Alert::system_info("Intrusion detection started"));

        self.file.initialize(&self.sensitive_files);
        if !self.file.start() {
            self.declined(AlertSource::FileMonitor, "File integrity");
        }
        if !self.process.start() {
            self.declined(AlertSource::ProcessMonitor, "Process");
        }
        if !self.network.start() {
            self.declined(AlertSource::NetworkMonitor, "Network");
        }

        self.state = SupervisorState::Running;
        let running = self.running_count();
        ACTIVE_MONITORS.set(running as i64);
        info!(running, "Monitoring started");
        running
    }

    fn running_count(&self) -> usize {
        self.monitor_states()
            .iter()
            .filter(|(_, state)| *state == MonitorState::Running)
            .count()
    }

    /// Stop every monitor in reverse start order. Safe to call repeatedly
    /// and before `start_all`.
    pub async fn stop_all(&mut self) {
        if matches!(self.state, SupervisorState::Stopped | SupervisorState::Stopping) {
            return;
        }
        let was_running = self.state == SupervisorState::Running;
        self.state = SupervisorState::Stopping;

        self.network.stop().await;
        self.process.stop().await;
        self.file.stop().await;

        self.state = SupervisorState::Stopped;
        ACTIVE_MONITORS.set(0);
        if was_running {
            self.sink.record(Alert::system_info("Intrusion detection stopped"));
        }
        info!("Monitoring stopped");
    }
}

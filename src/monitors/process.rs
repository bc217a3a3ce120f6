//! Process anomaly monitor
//!
//! Polls the process table on a fixed interval and alerts once per pid for
//! processes whose name is on the suspicious list and not whitelisted.

use super::lifecycle::{MonitorState, StateCell, StopSignal, Worker};
use super::procfs::{ProcessSighting, ProcessTable};
use crate::alert::{Alert, AlertSource};
use crate::config::{HidsConfig, DEFAULT_PROCESS_CHECK_INTERVAL_SECS};
use crate::sink::SharedSink;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Added to the poll interval when waiting for the worker to exit.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Name matching plus the set of pids already reported.
#[derive(Debug, Clone)]
pub struct ProcessSweeper {
    suspicious: Arc<HashSet<String>>,
    whitelist: Arc<HashSet<String>>,
    alerted: HashSet<u32>,
}

fn lowercase_set(names: &[String]) -> HashSet<String> {
    names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect()
}

impl ProcessSweeper {
    pub fn new(suspicious: &[String], whitelist: &[String]) -> Self {
        Self {
            suspicious: Arc::new(lowercase_set(suspicious)),
            whitelist: Arc::new(lowercase_set(whitelist)),
            alerted: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.suspicious.is_empty()
    }

    pub fn is_suspicious(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.suspicious.contains(&name) && !self.whitelist.contains(&name)
    }

    /// Return processes to alert on in this snapshot, then forget pids that
    /// are no longer running so a reused pid can alert again.
    pub fn sweep(&mut self, snapshot: &[ProcessSighting]) -> Vec<ProcessSighting> {
        let mut fresh = Vec::new();
        for process in snapshot {
            if self.is_suspicious(&process.name) && self.alerted.insert(process.pid) {
                fresh.push(process.clone());
            }
        }

        let present: HashSet<u32> = snapshot.iter().map(|p| p.pid).collect();
        self.alerted.retain(|pid| present.contains(pid));

        fresh
    }

    pub fn alerted_count(&self) -> usize {
        self.alerted.len()
    }
}

pub fn process_alert(process: &ProcessSighting) -> Alert {
    Alert::hids(
        AlertSource::ProcessMonitor,
        format!(
            "Suspicious process: {} (PID:{}, User:{})",
            process.name, process.pid, process.owner
        ),
    )
}

/// Resolve the configured interval, substituting the default for non-positive values.
pub fn effective_interval(configured_secs: i64) -> Duration {
    if configured_secs > 0 {
        Duration::from_secs(configured_secs as u64)
    } else {
        warn!(
            configured = configured_secs,
            default = DEFAULT_PROCESS_CHECK_INTERVAL_SECS,
            "Invalid process check interval, using default"
        );
        Duration::from_secs(DEFAULT_PROCESS_CHECK_INTERVAL_SECS)
    }
}

pub struct ProcessAnomalyMonitor {
    table: Arc<dyn ProcessTable>,
    sink: SharedSink,
    sweeper: ProcessSweeper,
    interval: Duration,
    lifecycle: StateCell,
    worker: Option<Worker>,
}

impl ProcessAnomalyMonitor {
    pub fn new(config: &HidsConfig, table: Arc<dyn ProcessTable>, sink: SharedSink) -> Self {
        Self::with_interval(
            config,
            table,
            sink,
            effective_interval(config.process_check_interval_secs),
        )
    }

    /// Construct with an explicit poll interval, bypassing the whole-second config value.
    pub fn with_interval(
        config: &HidsConfig,
        table: Arc<dyn ProcessTable>,
        sink: SharedSink,
        interval: Duration,
    ) -> Self {
        Self {
            table,
            sink,
            sweeper: ProcessSweeper::new(&config.suspicious_processes, &config.whitelist_processes),
            interval,
            lifecycle: StateCell::new(),
            worker: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.lifecycle.get()
    }

    /// Start the polling loop. A no-op returning false when nothing is on the
    /// suspicious list.
    pub fn start(&mut self) -> bool {
        if !self.sweeper.is_enabled() {
            info!("No suspicious process names configured, process monitoring disabled");
            return false;
        }
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return true;
        }

        let table = Arc::clone(&self.table);
        let sink = Arc::clone(&self.sink);
        let sweeper = self.sweeper.clone();
        let interval = self.interval;
        let lifecycle = self.lifecycle.clone();

        self.lifecycle.set(MonitorState::Running);
        self.worker = Some(Worker::spawn("process-anomaly", move |stop| async move {
            poll_loop(table, sink, sweeper, interval, stop).await;
            lifecycle.set(MonitorState::Stopped);
        }));

        info!(interval_secs = self.interval.as_secs_f64(), "Process monitor started");
        true
    }

    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.lifecycle.set(MonitorState::Stopping);
        worker.shutdown(self.interval + STOP_GRACE).await;
        self.lifecycle.set(MonitorState::Stopped);
        info!("Process monitor stopped");
    }
}

/// One poll cycle. A failed enumeration skips the cycle.
pub fn run_cycle(table: &dyn ProcessTable, sweeper: &mut ProcessSweeper, sink: &SharedSink) {
    let snapshot = match table.snapshot() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Process enumeration failed, skipping cycle");
            return;
        }
    };

    for process in sweeper.sweep(&snapshot) {
        sink.record(process_alert(&process));
    }
    debug!(processes = snapshot.len(), alerted = sweeper.alerted_count(), "Process sweep complete");
}

async fn poll_loop(
    table: Arc<dyn ProcessTable>,
    sink: SharedSink,
    mut sweeper: ProcessSweeper,
    interval: Duration,
    mut stop: StopSignal,
) {
    while !stop.is_stopped() {
        run_cycle(table.as_ref(), &mut sweeper, &sink);

        tokio::select! {
            _ = stop.stopped() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn sighting(pid: u32, name: &str) -> ProcessSighting {
        ProcessSighting::new(pid, name, "root")
    }

    #[test]
    fn test_case_insensitive_match() {
        let sweeper = ProcessSweeper::new(&names(&["NetCat", "nc"]), &[]);
        assert!(sweeper.is_suspicious("netcat"));
        assert!(sweeper.is_suspicious("NC"));
        assert!(!sweeper.is_suspicious("bash"));
    }

    #[test]
    fn test_whitelist_overrides() {
        let mut sweeper = ProcessSweeper::new(&names(&["nc", "ncat"]), &names(&["NCAT"]));
        let fresh = sweeper.sweep(&[sighting(10, "ncat"), sighting(11, "nc")]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].pid, 11);
    }

    #[test]
    fn test_alert_once_per_pid() {
        let mut sweeper = ProcessSweeper::new(&names(&["nc"]), &[]);
        let snapshot = [sighting(100, "nc"), sighting(1, "init")];

        assert_eq!(sweeper.sweep(&snapshot).len(), 1);
        assert!(sweeper.sweep(&snapshot).is_empty());
        assert!(sweeper.sweep(&snapshot).is_empty());
        assert_eq!(sweeper.alerted_count(), 1);
    }

    #[test]
    fn test_pid_reuse_realerts() {
        let mut sweeper = ProcessSweeper::new(&names(&["nc"]), &[]);

        assert_eq!(sweeper.sweep(&[sighting(100, "nc")]).len(), 1);
        assert!(sweeper.sweep(&[sighting(1, "init")]).is_empty());
        assert_eq!(sweeper.alerted_count(), 0);
        assert_eq!(sweeper.sweep(&[sighting(100, "nc")]).len(), 1);
    }

    #[test]
    fn test_alert_message() {
        let alert = process_alert(&ProcessSighting::new(4242, "nmap", "mallory"));
        assert_eq!(alert.message, "Suspicious process: nmap (PID:4242, User:mallory)");
        assert_eq!(alert.source, AlertSource::ProcessMonitor);
    }

    #[test]
    fn test_effective_interval() {
        assert_eq!(effective_interval(5), Duration::from_secs(5));
        assert_eq!(effective_interval(0), Duration::from_secs(20));
        assert_eq!(effective_interval(-3), Duration::from_secs(20));
    }

    struct FailingTable;

    impl ProcessTable for FailingTable {
        fn snapshot(&self) -> anyhow::Result<Vec<ProcessSighting>> {
            anyhow::bail!("proc unavailable")
        }
    }

    #[test]
    fn test_failed_enumeration_skips_cycle() {
        let sink: SharedSink = Arc::new(MemorySink::new());
        let mut sweeper = ProcessSweeper::new(&names(&["nc"]), &[]);
        run_cycle(&FailingTable, &mut sweeper, &sink);
        assert_eq!(sweeper.alerted_count(), 0);
    }

    #[tokio::test]
    async fn test_start_noop_without_suspicious_names() {
        let config = HidsConfig {
            suspicious_processes: Vec::new(),
            ..HidsConfig::default()
        };
        let mut monitor = ProcessAnomalyMonitor::new(&config, Arc::new(FailingTable), Arc::new(MemorySink::new()));
        assert!(!monitor.start());
        assert_eq!(monitor.state(), MonitorState::Idle);
        monitor.stop().await;
        monitor.stop().await;
    }
}

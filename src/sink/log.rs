//! Durable JSON-lines alert log with size-based rotation.

use super::AlertSink;
use crate::alert::Alert;
use crate::metrics::ALERTS_TOTAL;
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

struct LogFile {
    file: File,
    written: u64,
}

pub struct AlertLog {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    inner: Mutex<LogFile>,
}

impl std::fmt::Debug for AlertLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertLog")
            .field("path", &self.path)
            .field("max_bytes", &self.max_bytes)
            .field("backup_count", &self.backup_count)
            .finish()
    }
}

fn open_append(path: &Path) -> Result<LogFile> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open alert log {}", path.display()))?;
    let written = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok(LogFile { file, written })
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

impl AlertLog {
    /// Open (or create) the log. A `max_bytes` of zero disables rotation.
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backup_count: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create alert log directory {}", parent.display()))?;
        }
        let inner = open_append(&path)?;
        debug!(path = %path.display(), size = inner.written, "Alert log opened");

        Ok(Self {
            path,
            max_bytes,
            backup_count,
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotate(&self, log: &mut LogFile) -> Result<()> {
        log.file.flush().ok();

        if self.backup_count == 0 {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)
                .with_context(|| format!("Failed to truncate alert log {}", self.path.display()))?;
            *log = LogFile { file, written: 0 };
            return Ok(());
        }

        for index in (1..self.backup_count).rev() {
            let from = backup_path(&self.path, index);
            if from.exists() {
                fs::rename(&from, backup_path(&self.path, index + 1))
                    .with_context(|| format!("Failed to rotate {}", from.display()))?;
            }
        }
        fs::rename(&self.path, backup_path(&self.path, 1))
            .with_context(|| format!("Failed to rotate {}", self.path.display()))?;

        *log = open_append(&self.path)?;
        Ok(())
    }

    fn append(&self, line: &str) -> Result<()> {
        let mut log = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let len = line.len() as u64 + 1;

        if self.max_bytes > 0 && log.written > 0 && log.written + len > self.max_bytes {
            self.rotate(&mut log)?;
        }

        writeln!(log.file, "{}", line)
            .with_context(|| format!("Failed to write alert log {}", self.path.display()))?;
        log.written += len;
        Ok(())
    }

    /// Most recent alerts in a log file, newest first. Malformed lines are skipped.
    pub fn recent(path: &Path, limit: usize) -> Result<Vec<Alert>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open alert log {}", path.display()))?;

        let mut alerts: Vec<Alert> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();

        let skip = alerts.len().saturating_sub(limit);
        alerts.drain(..skip);
        alerts.reverse();
        Ok(alerts)
    }
}

impl AlertSink for AlertLog {
    fn record(&self, alert: Alert) {
        if alert.kind.is_elevated() {
            warn!(kind = %alert.kind, source = %alert.source, "{}", alert.message);
        } else {
            info!(kind = %alert.kind, source = %alert.source, "{}", alert.message);
        }
        ALERTS_TOTAL.with_label_values(&[alert.kind.as_str()]).inc();

        let line = match serde_json::to_string(&alert) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to serialize alert");
                return;
            }
        };

        if let Err(e) = self.append(&line) {
            error!(error = %e, "Failed to persist alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertKind, AlertSource, Protocol};
    use tempfile::TempDir;

    #[test]
    fn test_record_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let log = AlertLog::open(&path, 0, 0).unwrap();

        log.record(Alert::system_info("Intrusion detection started"));
        log.record(Alert::nids(Protocol::Tcp, "TCP connection on suspicious port (4444)"));

        let recent = AlertLog::recent(&path, 50).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, AlertKind::NidsAlert);
        assert_eq!(recent[1].message, "Intrusion detection started");
    }

    #[test]
    fn test_recent_limit_and_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let log = AlertLog::open(&path, 0, 0).unwrap();

        for i in 0..5 {
            log.record(Alert::hids(AlertSource::FileMonitor, format!("alert {}", i)));
        }
        drop(log);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "not json").unwrap();

        let recent = AlertLog::recent(&path, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "alert 4");
        assert_eq!(recent[1].message, "alert 3");
    }

    #[test]
    fn test_rotation_keeps_backups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let log = AlertLog::open(&path, 300, 2).unwrap();

        for i in 0..20 {
            log.record(Alert::hids(AlertSource::ProcessMonitor, format!("Suspicious process {}", i)));
        }

        assert!(path.exists());
        assert!(backup_path(&path, 1).exists());
        assert!(backup_path(&path, 2).exists());
        assert!(!backup_path(&path, 3).exists());
        assert!(fs::metadata(&path).unwrap().len() <= 300);

        let newest = AlertLog::recent(&path, 1).unwrap();
        assert_eq!(newest[0].message, "Suspicious process 19");
    }

    #[test]
    fn test_rotation_without_backups_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let log = AlertLog::open(&path, 300, 0).unwrap();

        for i in 0..20 {
            log.record(Alert::system_info(format!("notice {}", i)));
        }
        assert!(!backup_path(&path, 1).exists());
        assert!(fs::metadata(&path).unwrap().len() <= 300);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/alerts.jsonl");
        let log = AlertLog::open(&path, 0, 0).unwrap();
        log.record(Alert::system_info("hello"));
        assert!(path.exists());
    }
}

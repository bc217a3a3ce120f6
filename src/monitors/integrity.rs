//! File integrity monitor
//!
//! Records a SHA-256 baseline for each configured sensitive file, then
//! watches the files' parent directories and reports:
//! - content changes of a baselined file
//! - deletion of a baselined file
//! - any new file appearing in a watched directory

use super::lifecycle::{MonitorState, StateCell, Worker};
use super::watch::{FsEvent, NotifyWatch};
use crate::alert::{Alert, AlertSource};
use crate::sink::SharedSink;
use crate::util::{normalize_path, sha256_file};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Baselines and watch sets, shared between the owner and the watch worker.
#[derive(Debug, Default)]
pub struct IntegrityState {
    digests: HashMap<PathBuf, String>,
    watched: HashSet<PathBuf>,
    watched_dirs: HashSet<PathBuf>,
}

impl IntegrityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline every readable regular file. Returns the number baselined.
    pub fn initialize(&mut self, paths: &[PathBuf]) -> usize {
        self.digests.clear();
        self.watched.clear();
        self.watched_dirs.clear();

        for raw in paths {
            let path = normalize_path(raw);
            if !path.is_file() {
                warn!(path = %path.display(), "Sensitive file missing or not a regular file, skipping");
                continue;
            }
            match sha256_file(&path) {
                Ok(digest) => {
                    debug!(path = %path.display(), digest = %digest, "Baseline recorded");
                    if let Some(dir) = path.parent() {
                        self.watched_dirs.insert(dir.to_path_buf());
                    }
                    self.watched.insert(path.clone());
                    self.digests.insert(path, digest);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read sensitive file, skipping");
                }
            }
        }

        self.watched.len()
    }

    pub fn digest(&self, path: &Path) -> Option<&str> {
        self.digests.get(&normalize_path(path)).map(String::as_str)
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.watched.contains(&normalize_path(path))
    }

    pub fn watched_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.watched_dirs.iter()
    }

    fn is_tracked(&self, path: &Path) -> bool {
        self.watched.contains(path) || self.digests.contains_key(path)
    }

    fn in_watched_dir(&self, path: &Path) -> bool {
        path.parent().is_some_and(|dir| self.watched_dirs.contains(dir))
    }

    /// Apply one filesystem event, returning the alert it warrants.
    pub fn handle_event(&mut self, event: FsEvent) -> Option<Alert> {
        match event {
            FsEvent::Modified(raw) => {
                let path = normalize_path(&raw);
                if !self.is_tracked(&path) || path.is_dir() {
                    return None;
                }
                let digest = match sha256_file(&path) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Digest failed after modify event");
                        return None;
                    }
                };

                match self.digests.insert(path.clone(), digest.clone()) {
                    Some(previous) if previous == digest => None,
                    Some(_) => Some(Alert::hids(
                        AlertSource::FileMonitor,
                        format!("Sensitive file modified: {}", path.display()),
                    )),
                    None => Some(Alert::hids(
                        AlertSource::FileMonitor,
                        format!(
                            "Sensitive file modified ({}), no prior baseline was available",
                            path.display()
                        ),
                    )),
                }
            }
            FsEvent::Deleted(raw) => {
                let path = normalize_path(&raw);
                if !self.is_tracked(&path) {
                    return None;
                }
                self.digests.remove(&path);
                self.watched.remove(&path);
                Some(Alert::hids(
                    AlertSource::FileMonitor,
                    format!("Sensitive file deleted: {}", path.display()),
                ))
            }
            FsEvent::Created(raw) => {
                let path = normalize_path(&raw);
                if !self.in_watched_dir(&path) || path.is_dir() {
                    return None;
                }
                match sha256_file(&path) {
                    Ok(digest) => {
                        self.digests.insert(path.clone(), digest);
                    }
                    Err(e) => debug!(path = %path.display(), error = %e, "Could not hash new file"),
                }
                Some(Alert::hids(
                    AlertSource::FileMonitor,
                    format!("New file in sensitive path: {}", path.display()),
                ))
            }
        }
    }
}

pub struct FileIntegrityMonitor {
    sink: SharedSink,
    state: Arc<Mutex<IntegrityState>>,
    lifecycle: StateCell,
    watch: Option<NotifyWatch>,
    worker: Option<Worker>,
}

impl FileIntegrityMonitor {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            sink,
            state: Arc::new(Mutex::new(IntegrityState::new())),
            lifecycle: StateCell::new(),
            watch: None,
            worker: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, IntegrityState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn initialize(&mut self, paths: &[PathBuf]) -> usize {
        let count = self.lock().initialize(paths);
        info!(files = count, configured = paths.len(), "File integrity baseline complete");
        count
    }

    pub fn state(&self) -> MonitorState {
        self.lifecycle.get()
    }

    pub fn baseline(&self, path: &Path) -> Option<String> {
        self.lock().digest(path).map(str::to_string)
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.lock().is_watched(path)
    }

    /// Process one event synchronously and record any resulting alert.
    pub fn handle_event(&self, event: FsEvent) {
        process_event(&self.state, &self.sink, event);
    }

    /// Subscribe to the parent directories of all baselined files and start
    /// the event worker. Returns whether watching began.
    pub fn start(&mut self) -> bool {
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return true;
        }

        let dirs: Vec<PathBuf> = self.lock().watched_dirs().cloned().collect();
        if dirs.is_empty() {
            warn!("No sensitive files could be baselined, file monitoring not started");
            return false;
        }

        let (mut watch, rx) = match NotifyWatch::new() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "File monitoring not started");
                return false;
            }
        };
        for dir in &dirs {
            if let Err(e) = watch.subscribe(dir) {
                warn!(error = %e, "Skipping directory");
            }
        }
        if watch.watched().is_empty() {
            warn!("No directories could be watched, file monitoring not started");
            return false;
        }

        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let lifecycle = self.lifecycle.clone();
        self.lifecycle.set(MonitorState::Running);
        self.worker = Some(Worker::spawn_blocking("file-integrity", move |stop| {
            run_event_loop(rx, &state, &sink, || stop.is_stopped());
            lifecycle.set(MonitorState::Stopped);
        }));
        self.watch = Some(watch);

        info!(directories = dirs.len(), "File integrity monitor started");
        true
    }

    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.lifecycle.set(MonitorState::Stopping);
        // Dropping the watcher closes the event channel and wakes the worker.
        self.watch = None;
        worker.shutdown(STOP_TIMEOUT).await;
        self.lifecycle.set(MonitorState::Stopped);
        info!("File integrity monitor stopped");
    }
}

fn process_event(state: &Mutex<IntegrityState>, sink: &SharedSink, event: FsEvent) {
    let alert = state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .handle_event(event);
    if let Some(alert) = alert {
        sink.record(alert);
    }
}

fn run_event_loop(
    mut rx: mpsc::Receiver<FsEvent>,
    state: &Mutex<IntegrityState>,
    sink: &SharedSink,
    stopped: impl Fn() -> bool,
) {
    while let Some(event) = rx.blocking_recv() {
        if stopped() {
            break;
        }
        process_event(state, sink, event);
    }
}

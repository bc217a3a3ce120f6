//! Process enumeration from /proc.

use crate::util::parse_status_field;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// One running process as seen in a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSighting {
    pub pid: u32,
    pub name: String,
    pub owner: String,
}

impl ProcessSighting {
    pub fn new(pid: u32, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            owner: owner.into(),
        }
    }
}

/// Point-in-time view of running processes.
///
/// Implementations omit processes they cannot read; an `Err` means the
/// whole enumeration failed.
pub trait ProcessTable: Send + Sync {
    fn snapshot(&self) -> Result<Vec<ProcessSighting>>;
}

pub struct ProcFsTable {
    root: PathBuf,
}

impl ProcFsTable {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_process(&self, dir: &Path, pid: u32, owners: &mut HashMap<u32, String>) -> Result<ProcessSighting> {
        let comm = fs::read_to_string(dir.join("comm"))
            .with_context(|| format!("Failed to read comm for pid {}", pid))?
            .trim()
            .to_string();
        let name = if comm.len() >= COMM_MAX_LEN {
            full_name(dir, &comm).unwrap_or(comm)
        } else {
            comm
        };
        let status = fs::read_to_string(dir.join("status"))
            .with_context(|| format!("Failed to read status for pid {}", pid))?;

        let owner = match parse_status_field(&status, "Uid:") {
            Some(uid) => owners.entry(uid).or_insert_with(|| username(uid)).clone(),
            None => "unknown".to_string(),
        };

        Ok(ProcessSighting { pid, name, owner })
    }
}

impl Default for ProcFsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for ProcFsTable {
    fn snapshot(&self) -> Result<Vec<ProcessSighting>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read {}", self.root.display()))?;

        let mut owners = HashMap::new();
        let mut sightings = Vec::new();

        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            match self.read_process(&entry.path(), pid, &mut owners) {
                Ok(sighting) => sightings.push(sighting),
                // Exited between readdir and read, or not ours to inspect
                Err(e) => trace!(pid, error = %e, "Skipping process"),
            }
        }

        Ok(sightings)
    }
}

/// The kernel truncates `comm` to this many bytes.
const COMM_MAX_LEN: usize = 15;

/// Recover an untruncated name from the basename of `argv[0]`, provided it
/// extends the truncated `comm`.
fn full_name(dir: &Path, comm: &str) -> Option<String> {
    let cmdline = fs::read(dir.join("cmdline")).ok()?;
    let argv0 = cmdline.split(|&b| b == 0).next()?;
    let argv0 = String::from_utf8_lossy(argv0);
    let base = argv0.rsplit('/').next()?;
    (base.len() > comm.len() && base.starts_with(comm)).then(|| base.to_string())
}

/// Resolve a uid to a user name, falling back to the numeric uid.
fn username(uid: u32) -> String {
    match nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid)) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

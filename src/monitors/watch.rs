//! Directory subscriptions backed by inotify (via `notify`).
//!
//! Raw notify events are flattened into [`FsEvent`]s and pushed onto a
//! tokio channel; the integrity worker drains that channel serially.

use anyhow::{Context, Result};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

const EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Created(p) | FsEvent::Modified(p) | FsEvent::Deleted(p) => p,
        }
    }
}

/// Map a notify event onto zero or more typed events.
pub fn translate(event: Event) -> Vec<FsEvent> {
    let paths = event.paths;
    match event.kind {
        EventKind::Create(_) => paths.into_iter().map(FsEvent::Created).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(FsEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(FsEvent::Created).collect()
        }
        // Both follows the From/To pair that was already delivered.
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths.into_iter().map(FsEvent::Modified).collect(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            paths.into_iter().map(FsEvent::Modified).collect()
        }
        EventKind::Remove(_) => paths.into_iter().map(FsEvent::Deleted).collect(),
        _ => Vec::new(),
    }
}

/// Live non-recursive subscriptions. Dropping it unsubscribes everything
/// and closes the event channel.
pub struct NotifyWatch {
    watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl NotifyWatch {
    pub fn new() -> Result<(Self, mpsc::Receiver<FsEvent>)> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for fs_event in translate(event) {
                        if tx.blocking_send(fs_event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => error!("Watch error: {}", e),
            },
            Config::default(),
        )
        .context("Failed to create filesystem watcher")?;

        Ok((Self { watcher, watched: Vec::new() }, rx))
    }

    pub fn subscribe(&mut self, dir: &Path) -> Result<()> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Could not watch {}", dir.display()))?;
        debug!(dir = %dir.display(), "Watching directory");
        self.watched.push(dir.to_path_buf());
        Ok(())
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    pub fn unsubscribe_all(&mut self) {
        for dir in self.watched.drain(..) {
            if let Err(e) = self.watcher.unwatch(&dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to remove watch");
            }
        }
    }
}

impl Drop for NotifyWatch {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_translate_basic_kinds() {
        assert_eq!(
            translate(event(EventKind::Create(CreateKind::File), &["/etc/new"])),
            vec![FsEvent::Created(PathBuf::from("/etc/new"))]
        );
        assert_eq!(
            translate(event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/etc/passwd"])),
            vec![FsEvent::Modified(PathBuf::from("/etc/passwd"))]
        );
        assert_eq!(
            translate(event(EventKind::Remove(RemoveKind::File), &["/etc/hosts"])),
            vec![FsEvent::Deleted(PathBuf::from("/etc/hosts"))]
        );
    }

    #[test]
    fn test_translate_close_write_is_modify() {
        let events = translate(event(
            EventKind::Access(AccessKind::Close(AccessMode::Write)),
            &["/etc/group"],
        ));
        assert_eq!(events, vec![FsEvent::Modified(PathBuf::from("/etc/group"))]);
    }

    #[test]
    fn test_translate_rename_yields_one_event_per_side() {
        let from = translate(event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/etc/passwd+"]));
        let to = translate(event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/etc/passwd"]));
        let both = translate(event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/etc/passwd+", "/etc/passwd"],
        ));

        assert_eq!(from, vec![FsEvent::Deleted(PathBuf::from("/etc/passwd+"))]);
        assert_eq!(to, vec![FsEvent::Created(PathBuf::from("/etc/passwd"))]);
        assert!(both.is_empty());
    }

    #[test]
    fn test_translate_ignores_reads_and_metadata() {
        assert!(translate(event(EventKind::Access(AccessKind::Read), &["/etc/passwd"])).is_empty());
        assert!(translate(event(
            EventKind::Modify(ModifyKind::Metadata(notify::event::MetadataKind::Permissions)),
            &["/etc/passwd"]
        ))
        .is_empty());
    }
}

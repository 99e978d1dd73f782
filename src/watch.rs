//! Change notifications for a single diagram source file.
//!
//! The parent directory is watched rather than the file itself so that
//! editors which save by renaming a temporary file over the original are
//! still noticed. Events for sibling files are dropped in the callback.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Watches one file and yields its path each time it is written or replaced.
pub struct SourceWatcher {
    path: PathBuf,
    // Kept alive to keep the OS watch registered.
    _watcher: RecommendedWatcher,
    changes: mpsc::UnboundedReceiver<PathBuf>,
}

impl std::fmt::Debug for SourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SourceWatcher {
    /// Starts watching `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` does not exist or the platform watcher
    /// cannot be registered.
    pub fn new(path: &Path) -> notify::Result<Self> {
        let canonical = path.canonicalize().map_err(notify::Error::io)?;
        let file_name = canonical
            .file_name()
            .map(OsString::from)
            .ok_or_else(notify::Error::path_not_found)?;
        let parent = canonical
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(notify::Error::path_not_found)?;

        let (tx, changes) = mpsc::unbounded_channel();
        let reported = canonical.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) if is_source_change(&event, &file_name) => {
                    trace!(kind = ?event.kind, "diagram source changed");
                    if tx.send(reported.clone()).is_err() {
                        trace!("source watcher receiver dropped");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "file watcher error"),
            }
        })?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;
        info!(path = %canonical.display(), "watching diagram source");

        Ok(Self {
            path: canonical,
            _watcher: watcher,
            changes,
        })
    }

    /// The canonical path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the next change. Returns `None` once the watcher has shut down.
    pub async fn changed(&mut self) -> Option<PathBuf> {
        let path = self.changes.recv().await?;
        // One save commonly produces several events; report it once.
        let mut coalesced = 0usize;
        while self.changes.try_recv().is_ok() {
            coalesced += 1;
        }
        if coalesced > 0 {
            debug!(coalesced, "coalesced queued change events");
        }
        Some(path)
    }
}

/// Whether `event` writes or replaces the file named `file_name`.
fn is_source_change(event: &Event, file_name: &OsStr) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name))
}

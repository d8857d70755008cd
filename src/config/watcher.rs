//! Binding file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches binding files and sends a notification when any of them changes.
///
/// Bursts of events (editors often write in several steps) collapse into a
/// single notification sent after the debounce delay.
pub struct BindingWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Vec<PathBuf>>,
    files: Vec<PathBuf>,
}

impl BindingWatcher {
    /// Start watching `files`. Must be called from within a Tokio runtime.
    pub fn new(files: Vec<PathBuf>) -> Result<Self> {
        let (tx, rx) = mpsc::channel(10);
        let pending = Arc::new(AtomicBool::new(false));

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    debug!("Binding file changed: {:?}", event.paths);

                    if pending.swap(true, Ordering::SeqCst) {
                        return;
                    }
                    let pending = pending.clone();
                    let tx = tx.clone();
                    runtime_handle.spawn(async move {
                        tokio::time::sleep(DEBOUNCE).await;
                        pending.store(false, Ordering::SeqCst);
                        if let Err(e) = tx.send(event.paths).await {
                            error!("Failed to send binding reload: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        let mut watched = Vec::new();
        for file in files {
            match watcher.watch(&file, RecursiveMode::NonRecursive) {
                Ok(()) => watched.push(file),
                Err(e) => warn!("Not watching {}: {}", file.display(), e),
            }
        }
        if watched.is_empty() {
            anyhow::bail!("No binding files to watch");
        }

        info!("Binding watcher started for {} file(s)", watched.len());
        Ok(Self {
            _watcher: watcher,
            rx,
            files: watched,
        })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Wait for the next change. Returns the paths reported by the first
    /// event of the burst, or None once the watcher is closed.
    pub async fn next_change(&mut self) -> Option<Vec<PathBuf>> {
        self.rx.recv().await
    }
}

/// Start a watcher, logging instead of failing.
pub fn try_watch(files: Vec<PathBuf>) -> Option<BindingWatcher> {
    match BindingWatcher::new(files).context("Failed to start binding watcher") {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("{:#}", e);
            None
        }
    }
}

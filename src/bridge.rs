//! Bridge façade
//!
//! Owns the OSC endpoint, the shared binding table and the ingest worker.
//! The worker is the only sender; the façade only mutates bindings.

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bindings::{BindingTable, LoadSummary};
use crate::dispatch::{Dispatcher, SharedBindings};
use crate::error::{BindingError, Result};
use crate::ingest::{IngestHandle, IngestLoop, LoopExit};
use crate::midi::{open_port, MidiSource, PortRequest};
use crate::osc::{OscEndpoint, UdpEndpoint};
use crate::paths;

pub struct Bridge {
    name: String,
    endpoint: Arc<dyn OscEndpoint>,
    bindings: SharedBindings,
    input_name: Option<String>,
    ingest: Mutex<Option<IngestHandle>>,
    alive: Arc<AtomicBool>,
    search_dirs: Vec<PathBuf>,
}

impl Bridge {
    /// Resolve `osc_url`, open the requested MIDI input and start ingesting.
    ///
    /// A malformed or non-UDP `osc_url` is an error. A host that does not
    /// resolve yet and an input that cannot be opened are only reported:
    /// the bridge is still created.
    pub fn new(name: &str, osc_url: &str, port: &PortRequest) -> Result<Self> {
        let endpoint = UdpEndpoint::resolve(osc_url)?;

        let source = match open_port(port) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("Could not open MIDI input ({} {}): {}", port.kind, port.device, e);
                None
            }
        };

        Self::with_endpoint(name, Arc::new(endpoint), source)
    }

    /// Build a bridge around an existing endpoint and (optional) MIDI source.
    pub fn with_endpoint(
        name: &str,
        endpoint: Arc<dyn OscEndpoint>,
        source: Option<Box<dyn MidiSource>>,
    ) -> Result<Self> {
        let bindings: SharedBindings = Arc::new(RwLock::new(BindingTable::new()));
        let alive = Arc::new(AtomicBool::new(false));

        let (input_name, ingest) = match source {
            Some(source) => {
                let input_name = source.name().to_string();
                let dispatcher = Dispatcher::new(bindings.clone(), endpoint.clone());
                let handle = IngestLoop::new(source, dispatcher)?
                    .with_alive(alive.clone())
                    .spawn()?;
                (Some(input_name), Some(handle))
            }
            None => (None, None),
        };

        info!(
            "Bridge '{}' started: {} -> {}",
            name,
            input_name.as_deref().unwrap_or("<no input>"),
            endpoint.url()
        );

        Ok(Self {
            name: name.to_string(),
            endpoint,
            bindings,
            input_name,
            ingest: Mutex::new(ingest),
            alive,
            search_dirs: paths::binding_search_dirs(),
        })
    }

    /// Replace the directories searched for relative binding paths.
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = dirs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn osc_url(&self) -> &str {
        self.endpoint.url()
    }

    pub fn input_name(&self) -> Option<&str> {
        self.input_name.as_deref()
    }

    pub fn has_input(&self) -> bool {
        self.input_name.is_some()
    }

    /// True while the ingest worker is running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Load a binding file, appending to the current bindings.
    ///
    /// The file is parsed completely before the table is touched, so the
    /// write lock is only held for the merge.
    pub fn load_bindings(&self, path: impl AsRef<Path>) -> Result<LoadSummary> {
        let path = path.as_ref();
        let resolved = paths::find_binding_file(path, &self.search_dirs)
            .ok_or_else(|| BindingError::NotFound(path.display().to_string()))?;

        let mut staged = BindingTable::new();
        let summary = staged.load_file(&resolved)?;
        self.bindings.write().merge(staged);

        info!(
            "Loaded {} bindings from {} ({} rejected)",
            summary.added,
            resolved.display(),
            summary.rejected
        );
        Ok(summary)
    }

    /// Replace all bindings with the contents of `files`, in order.
    ///
    /// The new table is built before the write lock is taken, so dispatch
    /// never sees a partially loaded table. Files that fail to load are
    /// reported and skipped.
    pub fn replace_bindings<P: AsRef<Path>>(&self, files: &[P]) -> LoadSummary {
        let mut staged = BindingTable::new();
        let mut total = LoadSummary::default();

        for file in files {
            let path = file.as_ref();
            let loaded = paths::find_binding_file(path, &self.search_dirs)
                .ok_or_else(|| BindingError::NotFound(path.display().to_string()))
                .and_then(|resolved| staged.load_file(&resolved));
            match loaded {
                Ok(summary) => {
                    total.added += summary.added;
                    total.rejected += summary.rejected;
                }
                Err(e) => warn!("Skipping bindings {}: {}", path.display(), e),
            }
        }

        *self.bindings.write() = staged;
        info!(
            "Replaced bindings from {} file(s): {} loaded, {} rejected",
            files.len(),
            total.added,
            total.rejected
        );
        total
    }

    pub fn clear_bindings(&self) {
        self.bindings.write().clear();
        debug!("Bindings cleared");
    }

    /// Write the current bindings to `path` in binding file format.
    pub fn save_bindings(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.bindings.read().write_to(BufWriter::new(file))?;
        info!("Saved bindings to {}", path.display());
        Ok(())
    }

    /// Read access to the current bindings
    pub fn bindings(&self) -> RwLockReadGuard<'_, BindingTable> {
        self.bindings.read()
    }

    /// Stop the ingest worker and wait for it to exit.
    ///
    /// Returns `None` if there was no worker or it was already stopped.
    pub fn stop(&self) -> Option<LoopExit> {
        let handle = self.ingest.lock().take()?;
        let exit = handle.stop();
        self.alive.store(false, Ordering::SeqCst);
        exit
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
        debug!("Bridge '{}' destroyed", self.name);
    }
}

#[cfg(test)]
mod tests;

//! Configuration for the bridge binary
//!
//! Loaded from YAML. Every field has a default so an empty (or missing)
//! file yields a bridge to `osc.udp://localhost:9951/` on the default
//! midir input.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::midi::{PortKind, PortRequest};
use crate::osc::OscUrl;

pub use watcher::BindingWatcher;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    /// Client name, also used for midir/virtual port registration
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_osc_url")]
    pub osc_url: String,
    #[serde(default)]
    pub midi: MidiConfig,
    /// Binding files, loaded in order
    #[serde(default)]
    pub bindings: Vec<String>,
    /// Reload bindings when a binding file changes
    #[serde(default)]
    pub watch_bindings: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// MIDI input selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(default)]
    pub kind: PortKind,
    /// Device path, FIFO path or port name substring
    #[serde(default)]
    pub device: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            osc_url: default_osc_url(),
            midi: MidiConfig::default(),
            bindings: Vec::new(),
            watch_bindings: false,
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("name cannot be empty");
        }

        OscUrl::parse(&self.osc_url)
            .with_context(|| format!("Invalid osc_url '{}'", self.osc_url))?;

        if matches!(self.midi.kind, PortKind::Alsa | PortKind::Fifo) && self.midi.device.is_empty() {
            anyhow::bail!("midi.device is required for {} input", self.midi.kind);
        }

        for (idx, file) in self.bindings.iter().enumerate() {
            if file.trim().is_empty() {
                anyhow::bail!("bindings[{}] is empty", idx);
            }
        }

        Ok(())
    }

    /// Port request for the configured input
    pub fn port_request(&self) -> PortRequest {
        PortRequest::new(self.midi.kind, self.midi.device.clone(), self.name.clone())
    }
}

fn default_name() -> String { "sooperlooper".to_string() }
fn default_osc_url() -> String { "osc.udp://localhost:9951/".to_string() }
fn default_log_level() -> String { "info".to_string() }

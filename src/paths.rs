//! File location helpers.
//!
//! Binding files given by bare name are looked up in the user's
//! `~/.sooperlooper/bindings` directory and then in the shared install
//! locations, so `default.slb` works without a full path.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-user data directory under the home directory
const USER_DIR: &str = ".sooperlooper";

/// Shared binding directories, searched after the user's own
const SHARED_BINDING_DIRS: &[&str] = &[
    "/usr/local/share/sooperlooper/bindings",
    "/usr/share/sooperlooper/bindings",
];

const CONFIG_FILE: &str = "midi_bridge.yaml";

/// Directories searched for relative binding paths, in order
pub fn binding_search_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = dirs::home_dir()
        .map(|home| home.join(USER_DIR).join("bindings"))
        .into_iter()
        .collect();
    dirs.extend(SHARED_BINDING_DIRS.iter().map(PathBuf::from));
    dirs
}

/// Resolve a binding file path.
///
/// The path as given wins if it exists. Relative paths then fall back to
/// each of `search_dirs` in order.
pub fn find_binding_file(path: &Path, search_dirs: &[PathBuf]) -> Option<PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }
    if path.is_absolute() {
        return None;
    }

    search_dirs
        .iter()
        .map(|dir| dir.join(path))
        .inspect(|candidate| debug!("Trying binding file {}", candidate.display()))
        .find(|candidate| candidate.exists())
}

/// Default config file: `./midi_bridge.yaml` if present, else the one in
/// the user directory (which may not exist).
pub fn default_config_path() -> PathBuf {
    let cwd = PathBuf::from(CONFIG_FILE);
    if cwd.exists() {
        return cwd;
    }
    dirs::home_dir()
        .map(|home| home.join(USER_DIR).join(CONFIG_FILE))
        .unwrap_or(cwd)
}

//! Path resolution for rigging
//!
//! # Environment Variables
//!
//! - `RIGGING_CONFIG` - Configuration file (default `rigging.toml`)
//! - `RIGGING_STATE` - State file override
//!
//! # Path Resolution Priority
//!
//! For state_file():
//! 1. `--state` flag
//! 2. `RIGGING_STATE` environment variable
//! 3. `.rigging/state.json` next to the configuration file

use std::path::{Path, PathBuf};

/// Environment variable for the state file override
pub const ENV_STATE: &str = "RIGGING_STATE";

/// Directory holding state and local provider data, relative to the config
pub const STATE_DIR: &str = ".rigging";

/// Resolve the state file path
pub fn state_file(config: &Path, flag: Option<&Path>) -> PathBuf {
    if let Some(path) = flag {
        return expand(&path.to_string_lossy());
    }

    if let Ok(path) = std::env::var(ENV_STATE) {
        let path = expand(&path);
        log::debug!("Using state file from {}: {}", ENV_STATE, path.display());
        return path;
    }

    config_dir(config).join(STATE_DIR).join("state.json")
}

/// Directory the local provider stores resources in
pub fn local_cloud_dir(state_file: &Path) -> PathBuf {
    state_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("local-cloud")
}

/// Directory containing the configuration file
pub fn config_dir(config: &Path) -> PathBuf {
    match config.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

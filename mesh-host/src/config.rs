//! Load host config from file and environment.

use std::path::{Path, PathBuf};

use mesh_core::MeshConfig;
use serde::Deserialize;
use tracing::{debug, warn};

/// Host configuration. File: ~/.config/meshpea/config.toml or /etc/meshpea/config.toml.
/// Env overrides: MESHPEA_PEER_ID, MESHPEA_HANDSHAKE_URI, MESHPEA_CHUNK_SIZE, MESHPEA_TICK_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Where the handshake configuration resource lives: an http(s) URL or a local path.
    #[serde(default)]
    pub handshake_uri: Option<String>,
    /// Interval between core ticks in milliseconds (default 1000).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub mesh: MeshConfig,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            handshake_uri: None,
            tick_interval_ms: default_tick_interval_ms(),
            mesh: MeshConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> HostConfig {
    let mut c = load_file(&config_paths()).unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

/// Parse one config file.
pub fn from_path(path: &Path) -> Result<HostConfig, HostConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| HostConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| HostConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `MESHPEA_*` overrides read through `lookup`. Unparseable values are ignored.
pub fn apply_env(c: &mut HostConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(s) = lookup("MESHPEA_PEER_ID") {
        c.mesh.peer_id = Some(s);
    }
    if let Some(s) = lookup("MESHPEA_HANDSHAKE_URI") {
        c.handshake_uri = Some(s);
    }
    if let Some(s) = lookup("MESHPEA_CHUNK_SIZE") {
        match s.parse::<u64>() {
            Ok(n) if n > 0 => c.mesh.chunk_size = n,
            _ => warn!(value = %s, "ignoring invalid MESHPEA_CHUNK_SIZE"),
        }
    }
    if let Some(s) = lookup("MESHPEA_TICK_MS") {
        match s.parse::<u64>() {
            Ok(n) if n > 0 => c.tick_interval_ms = n,
            _ => warn!(value = %s, "ignoring invalid MESHPEA_TICK_MS"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/meshpea/config.toml"));
    }
    out.push(PathBuf::from("/etc/meshpea/config.toml"));
    out
}

/// First existing file wins; a broken file is reported and defaults are used.
fn load_file(paths: &[PathBuf]) -> Option<HostConfig> {
    let path = paths.iter().find(|p| p.exists())?;
    match from_path(path) {
        Ok(c) => {
            debug!(path = %path.display(), "loaded host config");
            Some(c)
        }
        Err(e) => {
            warn!(error = %e, "ignoring host config");
            None
        }
    }
}

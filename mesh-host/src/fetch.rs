//! One-shot fetch of the handshake configuration resource.

use mesh_core::config::parse_handshake_config;
use mesh_core::error::ConfigError;
use mesh_core::HandshakeEntry;
use tracing::{info, warn};

/// Host's view of network reachability, consulted when a fetch fails so an
/// offline machine is reported distinctly from a broken server.
pub trait Connectivity {
    fn is_online(&self) -> bool;
}

/// Assumes the network is up; every transport failure is a plain network error.
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Fetch and parse the resource at `uri`: `http(s)://` over the network,
/// anything else (optionally `file://`) from the local filesystem.
pub async fn fetch_handshake_config(
    uri: &str,
    connectivity: &dyn Connectivity,
) -> Result<Vec<HandshakeEntry>, ConfigError> {
    let body = if uri.starts_with("http://") || uri.starts_with("https://") {
        fetch_http(uri, connectivity).await?
    } else {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Network(format!("{path}: {e}")))?
    };
    let entries = parse_handshake_config(&body)?;
    info!(uri, backends = entries.len(), "handshake configuration loaded");
    Ok(entries)
}

async fn fetch_http(uri: &str, connectivity: &dyn Connectivity) -> Result<String, ConfigError> {
    let transport_error = |e: reqwest::Error| {
        if connectivity.is_online() {
            warn!(uri, error = %e, "handshake configuration fetch failed");
            ConfigError::Network(e.to_string())
        } else {
            warn!(uri, "handshake configuration fetch failed while offline");
            ConfigError::NetworkOffline
        }
    };
    let resp = reqwest::get(uri).await.map_err(transport_error)?;
    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        return Err(ConfigError::RequestFailed(status.as_u16()));
    }
    resp.text().await.map_err(transport_error)
}

//! Tokio host glue for mesh-core: config loading, handshake configuration
//! fetch, logging, and the single-threaded driver loop.

pub mod config;
pub mod driver;
pub mod fetch;
pub mod logging;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use mesh_core::{BackendRegistry, MeshContext, MeshCore, MeshEvent, PeerLinkFactory, Store};
use tracing::warn;

pub use config::HostConfig;
pub use driver::{HostInput, MeshDriver};
pub use fetch::{fetch_handshake_config, AlwaysOnline, Connectivity};

/// Capabilities the embedding application supplies.
pub struct HostCapabilities {
    pub backends: BackendRegistry,
    pub links: Box<dyn PeerLinkFactory>,
    pub store: Box<dyn Store>,
}

/// Build a driver: load config (an explicit path must parse; otherwise the
/// usual search path and env overrides apply), start the core, and fetch the
/// handshake configuration once. A failed fetch is returned as an event, the
/// driver still starts.
pub async fn bootstrap(
    config_path: Option<&Path>,
    caps: HostCapabilities,
    connectivity: &dyn Connectivity,
) -> anyhow::Result<(MeshDriver, Vec<MeshEvent>)> {
    let cfg = match config_path {
        Some(path) => {
            let mut cfg = config::from_path(path)
                .with_context(|| format!("loading host config {}", path.display()))?;
            config::apply_env(&mut cfg, |key| std::env::var(key).ok());
            cfg
        }
        None => config::load(),
    };
    if cfg.tick_interval_ms == 0 {
        anyhow::bail!("tick_interval_ms must be positive");
    }
    let ctx = MeshContext::new(cfg.mesh.clone(), caps.backends, caps.links, caps.store);
    let mut driver = MeshDriver::new(MeshCore::new(ctx), Duration::from_millis(cfg.tick_interval_ms));

    let mut events = Vec::new();
    match cfg.handshake_uri.as_deref() {
        Some(uri) => match fetch_handshake_config(uri, connectivity).await {
            Ok(entries) => events.extend(driver.core_mut().add_handshake_configs(entries)),
            Err(e) => {
                warn!(uri, error = %e, "no handshake configuration");
                events.push(MeshEvent::Error(e.into()));
            }
        },
        None => warn!("no handshake_uri configured; waiting for configs from the host"),
    }
    Ok((driver, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::error::{ConfigError, MeshError};
    use mesh_core::handshake::HandshakeStatus;
    use mesh_core::mock::{MockBackend, MockLinkFactory};
    use mesh_core::MemoryStore;
    use std::io::Write;

    fn caps() -> (HostCapabilities, mesh_core::mock::BackendProbe) {
        let (backend, probe) = MockBackend::working();
        let (links, _) = MockLinkFactory::new();
        let mut backends = BackendRegistry::new();
        backends.register("A", Box::new(backend));
        (
            HostCapabilities {
                backends,
                links: Box::new(links),
                store: Box::new(MemoryStore::new()),
            },
            probe,
        )
    }

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
        path
    }

    #[tokio::test]
    async fn bootstrap_fetches_handshake_config() {
        let dir = tempfile::tempdir().unwrap();
        let handshake = write(dir.path(), "handshake.json", r#"[["A", {"max_connections": 3}]]"#);
        let cfg = write(
            dir.path(),
            "config.toml",
            &format!(
                "handshake_uri = \"{}\"\n[mesh]\npeer_id = \"6c1c9ad2-5b2f-4a59-9a5d-3f0f4b1b2a11\"\n",
                handshake.display()
            ),
        );
        let (caps, probe) = caps();
        let (driver, events) = bootstrap(Some(&cfg), caps, &AlwaysOnline).await.unwrap();
        assert!(matches!(
            events.as_slice(),
            [MeshEvent::HandshakeStatus(HandshakeStatus::Connecting)]
        ));
        assert_eq!(probe.params()[0].0.max_connections, Some(3));
        assert_eq!(
            driver.core().local_id().to_string(),
            "6c1c9ad2-5b2f-4a59-9a5d-3f0f4b1b2a11"
        );
    }

    #[tokio::test]
    async fn empty_handshake_resource_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let handshake = write(dir.path(), "handshake.json", "[]");
        let cfg = write(
            dir.path(),
            "config.toml",
            &format!("handshake_uri = \"{}\"\n", handshake.display()),
        );
        let (caps, probe) = caps();
        let (driver, events) = bootstrap(Some(&cfg), caps, &AlwaysOnline).await.unwrap();
        assert!(matches!(
            events.as_slice(),
            [MeshEvent::Error(MeshError::Config(ConfigError::Empty))]
        ));
        assert_eq!(probe.open_attempts(), 0);
        assert_eq!(driver.core().handshake_status(), HandshakeStatus::Disconnected);
    }

    #[tokio::test]
    async fn broken_explicit_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = write(dir.path(), "config.toml", "tick_interval_ms = [");
        let (caps, _) = caps();
        assert!(bootstrap(Some(&cfg), caps, &AlwaysOnline).await.is_err());
    }
}

//! Tracing subscriber setup for hosts embedding the mesh.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "mesh_core=info,mesh_host=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to info for
/// the mesh crates. A second call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

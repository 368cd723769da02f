//! Core configuration and the handshake configuration resource parser.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::handshake::{BackendParams, HandshakeEntry};

/// Tunables for one core instance. Usually embedded as the `[mesh]` table of the host config.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeshConfig {
    /// Fixed peer ID (UUID). Generated when absent.
    #[serde(default)]
    pub peer_id: Option<String>,
    /// Chunk size for new downloads (default 16 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Ticks before an unanswered chunk request is re-issued (default 30).
    #[serde(default = "default_chunk_timeout_ticks")]
    pub chunk_timeout_ticks: u64,
    /// Ticks before a peer link that never opened is abandoned (default 30).
    #[serde(default = "default_connect_timeout_ticks")]
    pub connect_timeout_ticks: u64,
    /// Failed whole-file hash checks before a transfer is abandoned (default 3).
    #[serde(default = "default_max_integrity_failures")]
    pub max_integrity_failures: u32,
    /// Label for data channels we open (default "shareit").
    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,
}

fn default_chunk_size() -> u64 {
    16 * 1024
}
fn default_chunk_timeout_ticks() -> u64 {
    30
}
fn default_connect_timeout_ticks() -> u64 {
    30
}
fn default_max_integrity_failures() -> u32 {
    crate::integrity::DEFAULT_MAX_INTEGRITY_FAILURES
}
fn default_data_channel_label() -> String {
    "shareit".to_string()
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            chunk_size: default_chunk_size(),
            chunk_timeout_ticks: default_chunk_timeout_ticks(),
            connect_timeout_ticks: default_connect_timeout_ticks(),
            max_integrity_failures: default_max_integrity_failures(),
            data_channel_label: default_data_channel_label(),
        }
    }
}

/// Parse the handshake configuration resource: a JSON array of
/// `[backend-type, {parameters}]` pairs, order preserved.
///
/// `max_connections` is lifted out of the parameter object; everything else is
/// passed to the backend untouched.
pub fn parse_handshake_config(json: &str) -> Result<Vec<HandshakeEntry>, ConfigError> {
    if json.trim().is_empty() {
        return Err(ConfigError::Empty);
    }
    let raw: Vec<(String, Value)> =
        serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
    if raw.is_empty() {
        return Err(ConfigError::Empty);
    }
    raw.into_iter()
        .map(|(backend, params)| {
            let Value::Object(mut settings) = params else {
                return Err(ConfigError::Malformed(format!(
                    "parameters for '{}' are not an object",
                    backend
                )));
            };
            let max_connections = match settings.remove("max_connections") {
                None | Some(Value::Null) => None,
                Some(v) => Some(
                    v.as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| {
                            ConfigError::Malformed(format!(
                                "max_connections for '{}' must be a non-negative integer",
                                backend
                            ))
                        })?,
                ),
            };
            Ok(HandshakeEntry {
                backend,
                params: BackendParams {
                    max_connections,
                    settings,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ordered_pairs() {
        let json = r#"[
            ["PubNub", {"channel": "mesh", "max_connections": 5}],
            ["SimpleSignaling", {"ws_uri": "wss://example.org"}]
        ]"#;
        let entries = parse_handshake_config(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].backend, "PubNub");
        assert_eq!(entries[0].params.max_connections, Some(5));
        assert_eq!(entries[0].params.settings["channel"], "mesh");
        assert!(!entries[0].params.settings.contains_key("max_connections"));
        assert_eq!(entries[1].backend, "SimpleSignaling");
        assert_eq!(entries[1].params.max_connections, None);
    }

    #[test]
    fn empty_list_is_reported() {
        for empty in ["[]", "", "  \n"] {
            assert!(matches!(
                parse_handshake_config(empty),
                Err(ConfigError::Empty)
            ));
        }
    }

    #[test]
    fn malformed_inputs_are_reported() {
        for bad in [
            "not json",
            r#"{"PubNub": {}}"#,
            r#"[["PubNub"]]"#,
            r#"[["PubNub", 3]]"#,
            r#"[["PubNub", {"max_connections": -1}]]"#,
            r#"[["PubNub", {"max_connections": "two"}]]"#,
        ] {
            assert!(
                matches!(parse_handshake_config(bad), Err(ConfigError::Malformed(_))),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn null_quota_is_unlimited() {
        let entries = parse_handshake_config(r#"[["A", {"max_connections": null}]]"#).unwrap();
        assert_eq!(entries[0].params.max_connections, None);
    }

    #[test]
    fn mesh_config_defaults() {
        let c = MeshConfig::default();
        assert_eq!(c.chunk_size, 16 * 1024);
        assert_eq!(c.data_channel_label, "shareit");
        assert!(c.peer_id.is_none());
    }
}

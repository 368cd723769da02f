//! Handshake manager: one signaling backend at a time, sequential failover.
//!
//! Configured entries are tried strictly in list order. A backend that fails
//! to open, errors, or closes (including a quota close) hands over to the next
//! entry. When the list runs out the manager goes back to `Disconnected`,
//! forgets the tried entries and rewinds its cursor, so a later `add_configs`
//! starts over with whatever is appended.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelId, ChannelKind, ChannelTable};
use crate::error::BackendError;
use crate::identity::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for HandshakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandshakeStatus::Disconnected => "disconnected",
            HandshakeStatus::Connecting => "connecting",
            HandshakeStatus::Connected => "connected",
        })
    }
}

/// Parameters for one backend entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendParams {
    /// Peer connections this channel may originate before it is closed. `None` is unlimited.
    pub max_connections: Option<u32>,
    /// Backend-specific settings, passed through verbatim.
    pub settings: Map<String, Value>,
}

impl BackendParams {
    pub fn with_quota(max_connections: u32) -> Self {
        Self {
            max_connections: Some(max_connections),
            settings: Map::new(),
        }
    }
}

/// One (backend-type, parameters) pair of the handshake configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeEntry {
    pub backend: String,
    pub params: BackendParams,
}

impl HandshakeEntry {
    pub fn new(backend: impl Into<String>, params: BackendParams) -> Self {
        Self {
            backend: backend.into(),
            params,
        }
    }
}

/// Constructor for a signaling backend's Channel. Receives the local peer ID so
/// the backend can identify us to the service.
pub trait Backend {
    fn open(
        &mut self,
        name: &str,
        params: &BackendParams,
        local: PeerId,
    ) -> Result<Box<dyn Channel>, BackendError>;
}

/// Backends by type name.
#[derive(Default)]
pub struct BackendRegistry {
    constructors: HashMap<String, Box<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, backend: Box<dyn Backend>) {
        self.constructors.insert(name.into(), backend);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }
}

/// What the manager reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeEvent {
    Status(HandshakeStatus),
    /// Active channel is open.
    Connected(ChannelId),
    /// One entry failed; failover continues.
    Failed(BackendError),
    /// Every entry failed; status is back to `Disconnected`.
    Exhausted,
}

pub struct HandshakeManager {
    local: PeerId,
    registry: BackendRegistry,
    configs: Vec<HandshakeEntry>,
    index: usize,
    status: HandshakeStatus,
    active: Option<ChannelId>,
}

impl HandshakeManager {
    pub fn new(local: PeerId, registry: BackendRegistry) -> Self {
        Self {
            local,
            registry,
            configs: Vec::new(),
            index: 0,
            status: HandshakeStatus::Disconnected,
            active: None,
        }
    }

    pub fn status(&self) -> HandshakeStatus {
        self.status
    }

    /// Channel of the backend currently in use (connecting or connected).
    pub fn active(&self) -> Option<ChannelId> {
        self.active
    }

    /// Cursor into the configured entries.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Entries not yet tried, the current one included.
    pub fn pending(&self) -> &[HandshakeEntry] {
        &self.configs[self.index.min(self.configs.len())..]
    }

    /// Append entries; start handshaking if idle.
    pub fn add_configs(
        &mut self,
        entries: Vec<HandshakeEntry>,
        channels: &mut ChannelTable,
    ) -> Vec<HandshakeEvent> {
        debug!(count = entries.len(), "adding handshake configs");
        self.configs.extend(entries);
        if self.status == HandshakeStatus::Disconnected {
            self.handshake(channels)
        } else {
            Vec::new()
        }
    }

    /// The host reported `Open` for `id`.
    pub fn on_open(&mut self, id: ChannelId) -> Vec<HandshakeEvent> {
        if self.active != Some(id) || self.status != HandshakeStatus::Connecting {
            return Vec::new();
        }
        self.status = HandshakeStatus::Connected;
        if let Some(entry) = self.configs.get(self.index) {
            info!(backend = %entry.backend, channel = %id, "handshake connected");
        }
        vec![
            HandshakeEvent::Status(HandshakeStatus::Connected),
            HandshakeEvent::Connected(id),
        ]
    }

    /// The active channel closed or errored (`reason` is set for errors and
    /// failures before open). Moves on to the next entry.
    pub fn on_closed(
        &mut self,
        id: ChannelId,
        reason: Option<String>,
        channels: &mut ChannelTable,
    ) -> Vec<HandshakeEvent> {
        if self.active != Some(id) {
            return Vec::new();
        }
        self.active = None;
        let mut events = Vec::new();
        let backend = self
            .configs
            .get(self.index)
            .map(|e| e.backend.clone())
            .unwrap_or_default();
        match reason {
            Some(reason) => {
                warn!(backend = %backend, channel = %id, %reason, "handshake channel failed");
                events.push(HandshakeEvent::Failed(BackendError::OpenFailed {
                    backend,
                    reason,
                }));
            }
            None => info!(backend = %backend, channel = %id, "handshake channel closed"),
        }
        self.index += 1;
        events.extend(self.handshake(channels));
        events
    }

    /// Drop every entry and the active channel; back to a fresh `Disconnected` manager.
    pub fn reset(&mut self, channels: &mut ChannelTable) -> Vec<HandshakeEvent> {
        if let Some(id) = self.active.take() {
            channels.close(id);
        }
        self.configs.clear();
        self.index = 0;
        if self.status == HandshakeStatus::Disconnected {
            return Vec::new();
        }
        self.status = HandshakeStatus::Disconnected;
        vec![HandshakeEvent::Status(HandshakeStatus::Disconnected)]
    }

    fn handshake(&mut self, channels: &mut ChannelTable) -> Vec<HandshakeEvent> {
        let mut events = Vec::new();
        while self.index < self.configs.len() {
            let entry = &self.configs[self.index];
            let Some(backend) = self.registry.constructors.get_mut(&entry.backend) else {
                warn!(backend = %entry.backend, "invalid handshake server type, skipping");
                events.push(HandshakeEvent::Failed(BackendError::UnknownBackend(
                    entry.backend.clone(),
                )));
                self.index += 1;
                continue;
            };
            self.status = HandshakeStatus::Connecting;
            events.push(HandshakeEvent::Status(HandshakeStatus::Connecting));
            debug!(backend = %entry.backend, index = self.index, "opening handshake backend");
            match backend.open(&entry.backend, &entry.params, self.local) {
                Ok(channel) => {
                    let id = channels.insert(
                        ChannelKind::Signaling {
                            backend: entry.backend.clone(),
                        },
                        channel,
                        entry.params.max_connections,
                    );
                    self.active = Some(id);
                    return events;
                }
                Err(e) => {
                    warn!(backend = %entry.backend, error = %e, "handshake backend failed to open");
                    events.push(HandshakeEvent::Failed(e));
                    self.index += 1;
                }
            }
        }

        // No more available configured handshake servers.
        info!(tried = self.configs.len(), "handshake servers exhausted");
        self.configs.clear();
        self.index = 0;
        if self.status != HandshakeStatus::Disconnected {
            self.status = HandshakeStatus::Disconnected;
            events.push(HandshakeEvent::Status(HandshakeStatus::Disconnected));
        }
        events.push(HandshakeEvent::Exhausted);
        events
    }
}

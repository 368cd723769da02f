//! Peer mesh reference implementation.
//! Host-driven: no I/O; host passes channel and link events and receives mesh events.

pub mod identity;
pub mod protocol;
pub mod wire;

pub use identity::{IdSource, PeerId, RandomIds, SeededIds};
pub use protocol::{FileId, Message, Signal, SignalBody, PROTOCOL_VERSION};
pub use wire::{decode_frame, decode_payload, encode_frame, FrameDecodeError, FrameEncodeError};
pub use crate::core::{MeshContext, MeshCore, MeshEvent};

pub mod bitmap;
pub mod channel;
pub mod chunk;
pub mod config;
pub mod core;
pub mod error;
pub mod handshake;
pub mod integrity;
pub mod mock;
pub mod peer;
pub mod presence;
pub mod routing;
pub mod store;

pub use channel::{Channel, ChannelEvent, ChannelId, ChannelKind};
pub use chunk::FileMeta;
pub use config::MeshConfig;
pub use error::MeshError;
pub use handshake::{Backend, BackendParams, BackendRegistry, HandshakeEntry, HandshakeStatus};
pub use peer::{ConnectTicket, LinkEvent, PeerLink, PeerLinkFactory};
pub use store::{MemoryStore, Store};

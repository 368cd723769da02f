//! Error taxonomy. None of these cross a Channel boundary synchronously; the
//! coordinator turns them into [`crate::MeshEvent`]s.

use crate::identity::PeerId;
use crate::protocol::FileId;
use crate::wire::{FrameDecodeError, FrameEncodeError};

/// Handshake configuration resource could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("handshake configuration is empty")]
    Empty,
    #[error("handshake configuration is malformed: {0}")]
    Malformed(String),
    #[error("handshake configuration request failed with status {0}")]
    RequestFailed(u16),
    #[error("network is offline")]
    NetworkOffline,
    #[error("network error: {0}")]
    Network(String),
}

/// A signaling backend failed to open or stay open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("unknown handshake backend type '{0}'")]
    UnknownBackend(String),
    #[error("backend '{backend}' failed: {reason}")]
    OpenFailed { backend: String, reason: String },
}

/// Peer-link negotiation failed. Reported to every waiter of the attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("peer link error: {0}")]
    Link(String),
    #[error("peer link to {0} closed")]
    Closed(PeerId),
    #[error("offer from {0} ignored")]
    Rejected(PeerId),
    #[error("no peer link awaiting an answer from {0}")]
    UnexpectedAnswer(PeerId),
    #[error("no open channel to deliver the offer")]
    NoChannel,
    #[error("connection to {0} timed out")]
    TimedOut(PeerId),
}

/// Failure reported by a Channel capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Failure reported by a PeerLink capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LinkError(pub String);

impl From<LinkError> for ConnectionError {
    fn from(e: LinkError) -> Self {
        ConnectionError::Link(e.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record {0} already exists")]
    Conflict(FileId),
    #[error("record {0} not found")]
    NotFound(FileId),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("unknown transfer {0}")]
    UnknownTransfer(FileId),
    #[error("chunk {index} out of range (transfer has {len} chunks)")]
    ChunkOutOfRange { index: u32, len: u32 },
    #[error("chunk {index} has {got} bytes, expected {expected}")]
    ChunkSizeMismatch {
        index: u32,
        got: usize,
        expected: usize,
    },
    #[error("chunk size must be non-zero")]
    InvalidChunkSize,
    #[error("integrity check failed for {0}")]
    IntegrityFailed(FileId),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Umbrella error surfaced through `MeshEvent::Error`.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("frame encode: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("frame decode: {0}")]
    Decode(#[from] FrameDecodeError),
}

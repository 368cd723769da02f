//! Mesh wire protocol: signaling and transfer message types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;
use crate::integrity;

/// Current protocol version. Bumped whenever `Message` changes shape.
pub const PROTOCOL_VERSION: u8 = 1;

/// File ID: SHA-256 of the complete file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId([u8; 32]);

impl FileId {
    pub fn from_content(content: &[u8]) -> Self {
        FileId(integrity::hash_content(content))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        FileId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Connection-setup payload carried by a [`Signal`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalBody {
    /// "I am reachable here."
    Presence,
    Offer { sdp: String },
    Answer { sdp: String },
}

/// Routed connection-setup message. `route` lists every hop already traversed,
/// origin first; relays append themselves before re-emitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub from: PeerId,
    /// `None` is a broadcast.
    pub to: Option<PeerId>,
    pub route: Vec<PeerId>,
    pub body: SignalBody,
}

impl Signal {
    pub fn presence(from: PeerId) -> Self {
        Self {
            from,
            to: None,
            route: vec![from],
            body: SignalBody::Presence,
        }
    }

    pub fn offer(from: PeerId, to: PeerId, sdp: String) -> Self {
        Self {
            from,
            to: Some(to),
            route: vec![from],
            body: SignalBody::Offer { sdp },
        }
    }

    pub fn answer(from: PeerId, to: PeerId, sdp: String) -> Self {
        Self {
            from,
            to: Some(to),
            route: vec![from],
            body: SignalBody::Answer { sdp },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            SignalBody::Presence => "presence",
            SignalBody::Offer { .. } => "offer",
            SignalBody::Answer { .. } => "answer",
        }
    }
}

/// All messages the core sends over a Channel. Encoding is bincode; framing is
/// length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Signal(Signal),
    /// Ask the source for one chunk of a file.
    TransferQuery { file_id: FileId, chunk: u32 },
    /// Chunk payload in reply to a query.
    TransferData {
        file_id: FileId,
        chunk: u32,
        payload: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdSource, SeededIds};

    #[test]
    fn file_id_is_content_hash() {
        let a = FileId::from_content(b"hello");
        let b = FileId::from_content(b"hello");
        let c = FileId::from_content(b"hellO");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string().len(), 16);
    }

    #[test]
    fn signals_start_route_at_origin() {
        let mut ids = SeededIds::new(1);
        let a = ids.next_id();
        let b = ids.next_id();
        let offer = Signal::offer(a, b, "sdp".into());
        assert_eq!(offer.route, vec![a]);
        assert_eq!(offer.to, Some(b));
        assert_eq!(offer.kind(), "offer");
        let presence = Signal::presence(a);
        assert_eq!(presence.to, None);
        assert_eq!(presence.kind(), "presence");
    }
}

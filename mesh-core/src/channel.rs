//! Channel capability and the table of channels the core currently owns.
//!
//! A Channel is any bidirectional message endpoint: a signaling backend
//! connection or a peer data channel once it has been promoted. The host
//! implements [`Channel`] for each transport and feeds its events back to the
//! core as [`ChannelEvent`]s tagged with the [`ChannelId`] the core assigned.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ChannelError;
use crate::identity::PeerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// What sits behind a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Handshake connection through a named signaling backend.
    Signaling { backend: String },
    /// Direct data channel to one peer.
    Peer(PeerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Capability implemented by every backend connection and every peer data channel.
/// Opening is implicit on construction; the host reports it with [`ChannelEvent::Open`].
pub trait Channel {
    /// Send one payload. `to` is the destination peer when the transport is shared
    /// (signaling services); peer data channels ignore it.
    fn send(&mut self, to: Option<PeerId>, payload: Vec<u8>) -> Result<(), ChannelError>;

    /// Close the underlying transport. The core never expects a `Close` event back
    /// for a channel it closed itself.
    fn close(&mut self);
}

/// Events the host reports for a channel, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message {
        from: Option<PeerId>,
        payload: Vec<u8>,
    },
    /// Native presence notification from a signaling service.
    Presence { from: PeerId },
    Error(String),
    Close,
}

pub struct ChannelEntry {
    pub kind: ChannelKind,
    pub state: ChannelState,
    /// Successful peer connections reached through this channel.
    pub connections: u32,
    /// Mesh quota; `None` is unlimited.
    pub max_connections: Option<u32>,
    channel: Box<dyn Channel>,
}

impl ChannelEntry {
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }
}

/// Every live channel, keyed by the ID handed out at registration.
#[derive(Default)]
pub struct ChannelTable {
    next_id: u64,
    entries: BTreeMap<ChannelId, ChannelEntry>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel in `Connecting` state.
    pub fn insert(
        &mut self,
        kind: ChannelKind,
        channel: Box<dyn Channel>,
        max_connections: Option<u32>,
    ) -> ChannelId {
        self.next_id += 1;
        let id = ChannelId(self.next_id);
        self.entries.insert(
            id,
            ChannelEntry {
                kind,
                state: ChannelState::Connecting,
                connections: 0,
                max_connections,
                channel,
            },
        );
        id
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut ChannelEntry> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Connecting -> Open. Returns false for unknown or already-open channels.
    pub fn mark_open(&mut self, id: ChannelId) -> bool {
        match self.entries.get_mut(&id) {
            Some(e) if e.state == ChannelState::Connecting => {
                e.state = ChannelState::Open;
                true
            }
            _ => false,
        }
    }

    /// Close locally: calls the capability's `close()` and drops the entry.
    /// Returns `None` if the channel was already gone, so callers act exactly once.
    pub fn close(&mut self, id: ChannelId) -> Option<ChannelEntry> {
        let mut entry = self.entries.remove(&id)?;
        entry.channel.close();
        entry.state = ChannelState::Closed;
        Some(entry)
    }

    /// Drop an entry whose transport already closed remotely.
    pub fn remove(&mut self, id: ChannelId) -> Option<ChannelEntry> {
        let mut entry = self.entries.remove(&id)?;
        entry.state = ChannelState::Closed;
        Some(entry)
    }

    pub fn send(
        &mut self,
        id: ChannelId,
        to: Option<PeerId>,
        payload: Vec<u8>,
    ) -> Result<(), ChannelError> {
        match self.entries.get_mut(&id) {
            Some(e) if e.is_open() => e.channel.send(to, payload),
            _ => Err(ChannelError::Closed),
        }
    }

    /// Send on every open channel except `except`. Returns how many accepted the payload.
    pub fn broadcast(
        &mut self,
        except: Option<ChannelId>,
        to: Option<PeerId>,
        payload: &[u8],
    ) -> usize {
        let mut sent = 0;
        for (id, entry) in self.entries.iter_mut() {
            if Some(*id) == except || !entry.is_open() {
                continue;
            }
            match entry.channel.send(to, payload.to_vec()) {
                Ok(()) => sent += 1,
                Err(e) => tracing::debug!(channel = %id, error = %e, "broadcast send failed"),
            }
        }
        sent
    }

    pub fn open_ids(&self) -> Vec<ChannelId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_open())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Open data channel to `peer`, if any.
    pub fn peer_channel(&self, peer: &PeerId) -> Option<ChannelId> {
        self.entries
            .iter()
            .find(|(_, e)| e.is_open() && e.kind == ChannelKind::Peer(*peer))
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdSource, SeededIds};
    use crate::mock::MockChannel;

    #[test]
    fn send_requires_open() {
        let mut table = ChannelTable::new();
        let (chan, probe) = MockChannel::new();
        let id = table.insert(ChannelKind::Signaling { backend: "A".into() }, Box::new(chan), None);
        assert_eq!(table.send(id, None, vec![1]), Err(ChannelError::Closed));
        assert!(table.mark_open(id));
        assert!(!table.mark_open(id));
        table.send(id, None, vec![1]).unwrap();
        assert_eq!(probe.sent().len(), 1);
    }

    #[test]
    fn close_is_terminal_and_once() {
        let mut table = ChannelTable::new();
        let (chan, probe) = MockChannel::new();
        let id = table.insert(ChannelKind::Signaling { backend: "A".into() }, Box::new(chan), Some(2));
        table.mark_open(id);
        let entry = table.close(id).unwrap();
        assert_eq!(entry.state, ChannelState::Closed);
        assert_eq!(entry.max_connections, Some(2));
        assert!(table.close(id).is_none());
        assert!(table.remove(id).is_none());
        assert_eq!(probe.close_count(), 1);
    }

    #[test]
    fn broadcast_skips_arrival_and_unopened() {
        let mut ids = SeededIds::new(5);
        let peer = ids.next_id();
        let mut table = ChannelTable::new();
        let (a, pa) = MockChannel::new();
        let (b, pb) = MockChannel::new();
        let (c, pc) = MockChannel::new();
        let ia = table.insert(ChannelKind::Signaling { backend: "A".into() }, Box::new(a), None);
        let ib = table.insert(ChannelKind::Peer(peer), Box::new(b), None);
        let _ic = table.insert(ChannelKind::Signaling { backend: "C".into() }, Box::new(c), None);
        table.mark_open(ia);
        table.mark_open(ib);
        assert_eq!(table.broadcast(Some(ia), None, b"x"), 1);
        assert!(pa.sent().is_empty());
        assert_eq!(pb.sent().len(), 1);
        assert!(pc.sent().is_empty());
        assert_eq!(table.peer_channel(&peer), Some(ib));
        assert_eq!(table.open_ids(), vec![ia, ib]);
    }
}

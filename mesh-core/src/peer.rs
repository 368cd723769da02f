//! Peer link manager: one PeerLink per remote peer, offer/answer exchange,
//! and promotion of opened data channels into routed Channels.
//!
//! Lifecycle of an entry:
//!
//! ```text
//! idle -> offering -> connecting -> open -> closed
//!            \-----------\-----------------> closed (error / timeout)
//! ```
//!
//! Concurrent `connect_to` calls for the same peer never create a second link;
//! they queue a [`ConnectWaiter`] on the existing entry and are resolved together.
//! Every waiter is resolved exactly once, with the data channel on success or a
//! [`ConnectionError`] when the entry closes first. Resolutions are buffered and
//! collected by the owner with [`PeerLinkManager::drain_resolved`].

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelId, ChannelKind, ChannelTable};
use crate::error::{ConnectionError, LinkError};
use crate::identity::PeerId;
use crate::protocol::{FileId, Message, Signal};
use crate::wire;

/// Capability backed by the connection-establishment transport.
pub trait PeerLink {
    fn create_offer(&mut self) -> Result<String, LinkError>;
    fn create_answer(&mut self, remote_sdp: &str) -> Result<String, LinkError>;
    fn set_local_description(&mut self, sdp: &str) -> Result<(), LinkError>;
    fn set_remote_description(&mut self, sdp: &str) -> Result<(), LinkError>;
    fn create_data_channel(&mut self, label: &str) -> Result<Box<dyn Channel>, LinkError>;
    fn close(&mut self);
}

/// Creates a fresh PeerLink for a remote peer.
pub trait PeerLinkFactory {
    fn create(&mut self, peer: PeerId) -> Result<Box<dyn PeerLink>, LinkError>;
}

/// Transport-level events the host reports for a peer (as opposed to events on
/// its data channel, which arrive as channel events).
pub enum LinkEvent {
    /// Inbound data channel (`ondatachannel`).
    DataChannel(Box<dyn Channel>),
    /// Negotiation or transport failure.
    Failed(String),
    /// Transport closed.
    Closed,
}

impl fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::DataChannel(_) => f.write_str("DataChannel(..)"),
            LinkEvent::Failed(r) => f.debug_tuple("Failed").field(r).finish(),
            LinkEvent::Closed => f.write_str("Closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    /// Offer sent, waiting for the answer.
    Offering,
    /// Descriptions exchanged, data channel requested.
    Connecting,
    Open,
    Closed,
}

/// Opaque handle returned to the host for a `connect_to` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectTicket(pub u64);

/// Who is waiting on a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectWaiter {
    /// Presence seen on `via`; success counts against that channel's quota.
    Presence { via: ChannelId },
    /// Explicit request from the host.
    Host(ConnectTicket),
    /// A download needs its source reachable.
    Transfer(FileId),
}

/// Outcome delivered to one waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub peer: PeerId,
    pub waiter: ConnectWaiter,
    pub result: Result<ChannelId, ConnectionError>,
}

struct PeerEntry {
    link: Box<dyn PeerLink>,
    state: LinkState,
    channel: Option<ChannelId>,
    waiters: Vec<ConnectWaiter>,
    started_tick: u64,
}

pub struct PeerLinkManager {
    local: PeerId,
    factory: Box<dyn PeerLinkFactory>,
    label: String,
    connect_timeout_ticks: u64,
    tick: u64,
    peers: HashMap<PeerId, PeerEntry>,
    resolved: Vec<Resolution>,
}

impl PeerLinkManager {
    pub fn new(
        local: PeerId,
        factory: Box<dyn PeerLinkFactory>,
        label: impl Into<String>,
        connect_timeout_ticks: u64,
    ) -> Self {
        Self {
            local,
            factory,
            label: label.into(),
            connect_timeout_ticks,
            tick: 0,
            peers: HashMap::new(),
            resolved: Vec::new(),
        }
    }

    pub fn state(&self, peer: &PeerId) -> Option<LinkState> {
        self.peers.get(peer).map(|e| e.state)
    }

    /// Open data channel for `peer`, if the link is open.
    pub fn channel_of(&self, peer: &PeerId) -> Option<ChannelId> {
        self.peers
            .get(peer)
            .filter(|e| e.state == LinkState::Open)
            .and_then(|e| e.channel)
    }

    /// Data channel registered for `peer`, open or not.
    pub fn data_channel(&self, peer: &PeerId) -> Option<ChannelId> {
        self.peers.get(peer).and_then(|e| e.channel)
    }

    pub fn link_count(&self) -> usize {
        self.peers.len()
    }

    /// Resolutions produced since the last call, in the order they happened.
    pub fn drain_resolved(&mut self) -> Vec<Resolution> {
        std::mem::take(&mut self.resolved)
    }

    /// Connect to `peer`, delivering the offer on `via` or flooding every open
    /// channel. Coalesces with an attempt already in flight.
    pub fn connect_to(
        &mut self,
        peer: PeerId,
        via: Option<ChannelId>,
        waiter: ConnectWaiter,
        channels: &mut ChannelTable,
    ) {
        if let Some(entry) = self.peers.get_mut(&peer) {
            if entry.state == LinkState::Open {
                if let Some(ch) = entry.channel {
                    self.resolved.push(Resolution {
                        peer,
                        waiter,
                        result: Ok(ch),
                    });
                    return;
                }
            }
            debug!(%peer, state = ?entry.state, "joining in-flight connection attempt");
            entry.waiters.push(waiter);
            return;
        }

        let mut link = match self.factory.create(peer) {
            Ok(link) => link,
            Err(e) => {
                warn!(%peer, error = %e, "failed to create peer link");
                self.resolved.push(Resolution {
                    peer,
                    waiter,
                    result: Err(e.into()),
                });
                return;
            }
        };
        let offer = link
            .create_offer()
            .and_then(|sdp| link.set_local_description(&sdp).map(|_| sdp));
        let sdp = match offer {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!(%peer, error = %e, "failed to create offer");
                link.close();
                self.resolved.push(Resolution {
                    peer,
                    waiter,
                    result: Err(e.into()),
                });
                return;
            }
        };

        let signal = Signal::offer(self.local, peer, sdp);
        let delivered = match send_signal(channels, signal, via.into_iter().collect()) {
            Ok(n) => n,
            Err(e) => {
                warn!(%peer, error = %e, "failed to encode offer");
                0
            }
        };
        if delivered == 0 {
            link.close();
            self.resolved.push(Resolution {
                peer,
                waiter,
                result: Err(ConnectionError::NoChannel),
            });
            return;
        }
        info!(%peer, delivered, "offer sent");
        self.peers.insert(
            peer,
            PeerEntry {
                link,
                state: LinkState::Offering,
                channel: None,
                waiters: vec![waiter],
                started_tick: self.tick,
            },
        );
    }

    /// Remote offer from `from`, which arrived on `arrival`. Answers on the most
    /// direct channel available.
    ///
    /// Offer glare (we are also offering to `from`) is settled by ID: the peer
    /// with the lower ID adopts the incoming offer on its existing entry, keeping
    /// its waiters; the other side ignores it and waits for its own answer.
    pub fn on_offer(
        &mut self,
        from: PeerId,
        sdp: &str,
        arrival: ChannelId,
        channels: &mut ChannelTable,
    ) -> Result<(), ConnectionError> {
        match self.peers.get(&from).map(|e| e.state) {
            Some(LinkState::Offering) if self.local < from => {
                debug!(peer = %from, "offer glare, adopting remote offer");
            }
            Some(LinkState::Offering) => {
                debug!(peer = %from, "offer glare, keeping our own offer");
                return Err(ConnectionError::Rejected(from));
            }
            Some(LinkState::Connecting) | Some(LinkState::Open) => {
                debug!(peer = %from, "offer for an established link ignored");
                return Err(ConnectionError::Rejected(from));
            }
            Some(LinkState::Idle) | Some(LinkState::Closed) => {}
            None => {
                let link = self.factory.create(from).map_err(|e| {
                    warn!(peer = %from, error = %e, "failed to create peer link");
                    ConnectionError::from(e)
                })?;
                self.peers.insert(
                    from,
                    PeerEntry {
                        link,
                        state: LinkState::Idle,
                        channel: None,
                        waiters: Vec::new(),
                        started_tick: self.tick,
                    },
                );
            }
        }

        let Some(entry) = self.peers.get_mut(&from) else {
            return Err(ConnectionError::Closed(from));
        };
        let answer = entry
            .link
            .set_remote_description(sdp)
            .and_then(|_| entry.link.create_answer(sdp))
            .and_then(|answer| entry.link.set_local_description(&answer).map(|_| answer));
        let answer = match answer {
            Ok(answer) => answer,
            Err(e) => {
                warn!(peer = %from, error = %e, "failed to answer offer");
                let err = ConnectionError::from(e);
                self.discard(from, err.clone(), channels);
                return Err(err);
            }
        };
        entry.state = LinkState::Connecting;
        entry.started_tick = self.tick;

        let mut targets: Vec<ChannelId> = channels.peer_channel(&from).into_iter().collect();
        targets.push(arrival);
        let signal = Signal::answer(self.local, from, answer);
        match send_signal(channels, signal, targets) {
            Ok(0) => {
                warn!(peer = %from, "no channel left to deliver answer");
                self.discard(from, ConnectionError::NoChannel, channels);
                Err(ConnectionError::NoChannel)
            }
            Ok(_) => {
                info!(peer = %from, "answer sent");
                Ok(())
            }
            Err(e) => {
                let err = ConnectionError::Link(e.to_string());
                self.discard(from, err.clone(), channels);
                Err(err)
            }
        }
    }

    /// Remote answer from `from`. Only valid while we are offering; a late or
    /// duplicate answer is reported and otherwise ignored.
    pub fn on_answer(
        &mut self,
        from: PeerId,
        sdp: &str,
        channels: &mut ChannelTable,
    ) -> Result<(), ConnectionError> {
        let label = self.label.clone();
        let Some(entry) = self
            .peers
            .get_mut(&from)
            .filter(|e| e.state == LinkState::Offering)
        else {
            debug!(peer = %from, "answer without a pending offer");
            return Err(ConnectionError::UnexpectedAnswer(from));
        };
        let channel = entry
            .link
            .set_remote_description(sdp)
            .and_then(|_| entry.link.create_data_channel(&label));
        match channel {
            Ok(channel) => {
                let id = channels.insert(ChannelKind::Peer(from), channel, None);
                entry.channel = Some(id);
                entry.state = LinkState::Connecting;
                debug!(peer = %from, channel = %id, "data channel requested");
                Ok(())
            }
            Err(e) => {
                warn!(peer = %from, error = %e, "failed to apply answer");
                let err = ConnectionError::from(e);
                self.discard(from, err.clone(), channels);
                Err(err)
            }
        }
    }

    /// Inbound data channel for `from`. Returns the ID it was registered under.
    pub fn on_data_channel(
        &mut self,
        from: PeerId,
        mut channel: Box<dyn Channel>,
        channels: &mut ChannelTable,
    ) -> Result<ChannelId, ConnectionError> {
        let Some(entry) = self.peers.get_mut(&from) else {
            warn!(peer = %from, "data channel for unknown peer link, closing");
            channel.close();
            return Err(ConnectionError::Closed(from));
        };
        if entry.channel.is_some() {
            debug!(peer = %from, "duplicate data channel, closing");
            channel.close();
            return Err(ConnectionError::Rejected(from));
        }
        let id = channels.insert(ChannelKind::Peer(from), channel, None);
        entry.channel = Some(id);
        entry.state = LinkState::Connecting;
        Ok(id)
    }

    /// The host reported `Open` for a data channel. Resolves every waiter.
    pub fn on_channel_open(&mut self, peer: PeerId, id: ChannelId) -> bool {
        let Some(entry) = self.peers.get_mut(&peer) else {
            return false;
        };
        if entry.channel != Some(id) || entry.state == LinkState::Open {
            return false;
        }
        entry.state = LinkState::Open;
        info!(%peer, channel = %id, "peer link open");
        for waiter in entry.waiters.drain(..) {
            self.resolved.push(Resolution {
                peer,
                waiter,
                result: Ok(id),
            });
        }
        true
    }

    /// Negotiation or transport failure reported by the host.
    pub fn on_link_failed(&mut self, peer: PeerId, reason: String, channels: &mut ChannelTable) {
        warn!(%peer, %reason, "peer link failed");
        self.discard(peer, ConnectionError::Link(reason), channels);
    }

    /// Transport or data channel closed remotely.
    pub fn on_closed(&mut self, peer: PeerId, channels: &mut ChannelTable) {
        if self.peers.contains_key(&peer) {
            info!(%peer, "peer link closed");
        }
        self.discard(peer, ConnectionError::Closed(peer), channels);
    }

    /// Close the link to `peer` locally.
    pub fn disconnect(&mut self, peer: PeerId, channels: &mut ChannelTable) {
        self.discard(peer, ConnectionError::Closed(peer), channels);
    }

    /// Discard every link. Pending waiters fail with `Closed`. Returns the
    /// peers that had an entry, in id order.
    pub fn reset(&mut self, channels: &mut ChannelTable) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.keys().copied().collect();
        peers.sort();
        for &peer in &peers {
            self.discard(peer, ConnectionError::Closed(peer), channels);
        }
        peers
    }

    /// Advance the tick counter and abandon links that never opened in time.
    pub fn tick(&mut self, channels: &mut ChannelTable) {
        self.tick = self.tick.saturating_add(1);
        let overdue: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, e)| {
                e.state != LinkState::Open
                    && self.tick.saturating_sub(e.started_tick) > self.connect_timeout_ticks
            })
            .map(|(p, _)| *p)
            .collect();
        for peer in overdue {
            warn!(%peer, "peer link timed out");
            self.discard(peer, ConnectionError::TimedOut(peer), channels);
        }
    }

    /// Remove the entry, close its transport and data channel, fail its waiters.
    fn discard(&mut self, peer: PeerId, error: ConnectionError, channels: &mut ChannelTable) {
        let Some(mut entry) = self.peers.remove(&peer) else {
            return;
        };
        entry.state = LinkState::Closed;
        entry.link.close();
        if let Some(id) = entry.channel {
            channels.close(id);
        }
        for waiter in entry.waiters.drain(..) {
            self.resolved.push(Resolution {
                peer,
                waiter,
                result: Err(error.clone()),
            });
        }
    }
}

/// Send `signal` on the first open channel of `preferred`, or flood every open
/// channel when none of them takes it. Returns how many channels accepted it.
pub(crate) fn send_signal(
    channels: &mut ChannelTable,
    signal: Signal,
    preferred: Vec<ChannelId>,
) -> Result<usize, wire::FrameEncodeError> {
    let to = signal.to;
    let frame = wire::encode_frame(&Message::Signal(signal))?;
    for id in preferred {
        if channels.send(id, to, frame.clone()).is_ok() {
            return Ok(1);
        }
    }
    Ok(channels.broadcast(None, to, &frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdSource, SeededIds};
    use crate::mock::{ChannelProbe, MockChannel, MockLinkFactory, LinkProbe};
    use crate::protocol::SignalBody;

    struct Fixture {
        local: PeerId,
        remote: PeerId,
        manager: PeerLinkManager,
        links: LinkProbe,
        channels: ChannelTable,
        signaling: ChannelId,
        signaling_probe: ChannelProbe,
    }

    /// `local` sorts below `remote` when `polite_local` is set.
    fn fixture(polite_local: bool) -> Fixture {
        let mut ids = SeededIds::new(42);
        let (a, b) = (ids.next_id(), ids.next_id());
        let (local, remote) = if (a < b) == polite_local { (a, b) } else { (b, a) };
        let (factory, links) = MockLinkFactory::new();
        let manager = PeerLinkManager::new(local, Box::new(factory), "shareit", 5);
        let mut channels = ChannelTable::new();
        let (chan, signaling_probe) = MockChannel::new();
        let signaling = channels.insert(
            ChannelKind::Signaling {
                backend: "A".into(),
            },
            Box::new(chan),
            None,
        );
        channels.mark_open(signaling);
        Fixture {
            local,
            remote,
            manager,
            links,
            channels,
            signaling,
            signaling_probe,
        }
    }

    fn host(n: u64) -> ConnectWaiter {
        ConnectWaiter::Host(ConnectTicket(n))
    }

    /// Drive the offering side through answer and data-channel open.
    fn complete(f: &mut Fixture) -> ChannelId {
        f.manager
            .on_answer(f.remote, "answer-sdp", &mut f.channels)
            .unwrap();
        assert!(f.channels.peer_channel(&f.remote).is_none());
        let id = f.manager.data_channel(&f.remote).unwrap();
        f.channels.mark_open(id);
        assert!(f.manager.on_channel_open(f.remote, id));
        id
    }

    #[test]
    fn offer_goes_to_given_channel() {
        let mut f = fixture(true);
        f.manager
            .connect_to(f.remote, Some(f.signaling), host(1), &mut f.channels);
        assert_eq!(f.manager.state(&f.remote), Some(LinkState::Offering));
        let sent = f.signaling_probe.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Some(f.remote));
        match &sent[0].1 {
            Message::Signal(s) => {
                assert_eq!(s.from, f.local);
                assert_eq!(s.to, Some(f.remote));
                assert!(matches!(s.body, SignalBody::Offer { .. }));
            }
            other => panic!("expected offer, got {other:?}"),
        }
        assert_eq!(
            f.links.local_descriptions(&f.remote),
            vec![format!("offer:{}", f.remote)]
        );
    }

    #[test]
    fn concurrent_connects_share_one_link_and_outcome() {
        let mut f = fixture(true);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        f.manager.connect_to(f.remote, None, host(2), &mut f.channels);
        assert_eq!(f.links.created(), vec![f.remote]);
        assert_eq!(f.manager.link_count(), 1);
        assert!(f.manager.drain_resolved().is_empty());

        let id = complete(&mut f);
        let resolved = f.manager.drain_resolved();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|r| r.result == Ok(id)));
        assert_eq!(resolved[0].waiter, host(1));
        assert_eq!(resolved[1].waiter, host(2));
    }

    #[test]
    fn concurrent_connects_share_failure() {
        let mut f = fixture(true);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        f.manager.connect_to(f.remote, None, host(2), &mut f.channels);
        f.manager
            .on_link_failed(f.remote, "ice failed".into(), &mut f.channels);
        let resolved = f.manager.drain_resolved();
        assert_eq!(resolved.len(), 2);
        for r in &resolved {
            assert_eq!(r.result, Err(ConnectionError::Link("ice failed".into())));
        }
        assert_eq!(f.manager.state(&f.remote), None);
        // Failure is delivered once; nothing left to resolve.
        f.manager.on_closed(f.remote, &mut f.channels);
        assert!(f.manager.drain_resolved().is_empty());
    }

    #[test]
    fn open_link_resolves_immediately() {
        let mut f = fixture(true);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        let id = complete(&mut f);
        f.manager.drain_resolved();
        f.manager.connect_to(f.remote, None, host(3), &mut f.channels);
        let resolved = f.manager.drain_resolved();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].result, Ok(id));
        assert_eq!(f.links.created().len(), 1);
    }

    #[test]
    fn reset_fails_pending_waiters_once_and_empties_the_table() {
        let mut f = fixture(true);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        let id = complete(&mut f);
        f.manager.drain_resolved();

        let other = SeededIds::new(7).next_id();
        f.manager.connect_to(other, None, host(2), &mut f.channels);
        f.manager.connect_to(other, None, host(3), &mut f.channels);
        assert_eq!(f.manager.link_count(), 2);

        let mut expected = vec![f.remote, other];
        expected.sort();
        assert_eq!(f.manager.reset(&mut f.channels), expected);
        assert_eq!(f.manager.link_count(), 0);
        assert!(!f.channels.contains(id));
        assert!(f.links.data_channels(&f.remote)[0].is_closed());
        let mut closed = f.links.closed();
        closed.sort();
        assert_eq!(closed, expected);

        let resolved = f.manager.drain_resolved();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].waiter, host(2));
        assert_eq!(resolved[1].waiter, host(3));
        assert!(resolved
            .iter()
            .all(|r| r.peer == other && r.result == Err(ConnectionError::Closed(other))));

        assert!(f.manager.reset(&mut f.channels).is_empty());
        assert!(f.manager.drain_resolved().is_empty());
        assert!(f.channels.contains(f.signaling));
    }

    #[test]
    fn close_removes_link_and_fresh_connect_starts_new_one() {
        let mut f = fixture(true);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        let id = complete(&mut f);
        f.channels.remove(id);
        f.manager.on_closed(f.remote, &mut f.channels);
        assert_eq!(f.manager.state(&f.remote), None);
        f.manager.connect_to(f.remote, None, host(2), &mut f.channels);
        assert_eq!(f.links.created(), vec![f.remote, f.remote]);
        assert_eq!(f.manager.state(&f.remote), Some(LinkState::Offering));
    }

    #[test]
    fn answer_without_offer_is_reported() {
        let mut f = fixture(true);
        let err = f
            .manager
            .on_answer(f.remote, "late", &mut f.channels)
            .unwrap_err();
        assert_eq!(err, ConnectionError::UnexpectedAnswer(f.remote));
        assert_eq!(f.manager.link_count(), 0);
    }

    #[test]
    fn duplicate_answer_is_reported_not_fatal() {
        let mut f = fixture(true);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        f.manager.on_answer(f.remote, "a", &mut f.channels).unwrap();
        assert_eq!(
            f.manager.on_answer(f.remote, "a", &mut f.channels),
            Err(ConnectionError::UnexpectedAnswer(f.remote))
        );
        assert_eq!(f.manager.state(&f.remote), Some(LinkState::Connecting));
    }

    #[test]
    fn inbound_offer_is_answered_on_arrival_channel() {
        let mut f = fixture(true);
        f.manager
            .on_offer(f.remote, "remote-offer", f.signaling, &mut f.channels)
            .unwrap();
        assert_eq!(f.manager.state(&f.remote), Some(LinkState::Connecting));
        assert_eq!(
            f.links.remote_descriptions(&f.remote),
            vec!["remote-offer".to_string()]
        );
        let sent = f.signaling_probe.messages();
        assert!(matches!(
            &sent[0].1,
            Message::Signal(Signal { body: SignalBody::Answer { .. }, to: Some(to), .. }) if *to == f.remote
        ));

        let (chan, _) = MockChannel::new();
        let id = f
            .manager
            .on_data_channel(f.remote, Box::new(chan), &mut f.channels)
            .unwrap();
        f.channels.mark_open(id);
        assert!(f.manager.on_channel_open(f.remote, id));
        assert_eq!(f.manager.channel_of(&f.remote), Some(id));
    }

    #[test]
    fn glare_polite_side_adopts_remote_offer() {
        let mut f = fixture(true);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        f.manager
            .on_offer(f.remote, "their-offer", f.signaling, &mut f.channels)
            .unwrap();
        assert_eq!(f.links.created().len(), 1);
        assert_eq!(f.manager.state(&f.remote), Some(LinkState::Connecting));
        let (chan, _) = MockChannel::new();
        let id = f
            .manager
            .on_data_channel(f.remote, Box::new(chan), &mut f.channels)
            .unwrap();
        f.channels.mark_open(id);
        f.manager.on_channel_open(f.remote, id);
        let resolved = f.manager.drain_resolved();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].result, Ok(id));
    }

    #[test]
    fn glare_impolite_side_ignores_remote_offer() {
        let mut f = fixture(false);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        assert_eq!(
            f.manager
                .on_offer(f.remote, "their-offer", f.signaling, &mut f.channels),
            Err(ConnectionError::Rejected(f.remote))
        );
        assert_eq!(f.manager.state(&f.remote), Some(LinkState::Offering));
    }

    #[test]
    fn no_open_channel_fails_connect() {
        let mut f = fixture(true);
        f.channels.close(f.signaling);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        let resolved = f.manager.drain_resolved();
        assert_eq!(resolved[0].result, Err(ConnectionError::NoChannel));
        assert_eq!(f.manager.link_count(), 0);
        assert_eq!(f.links.closed(), vec![f.remote]);
    }

    #[test]
    fn stalled_attempt_times_out_once() {
        let mut f = fixture(true);
        f.manager.connect_to(f.remote, None, host(1), &mut f.channels);
        for _ in 0..6 {
            f.manager.tick(&mut f.channels);
        }
        let resolved = f.manager.drain_resolved();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].result, Err(ConnectionError::TimedOut(f.remote)));
        f.manager.tick(&mut f.channels);
        assert!(f.manager.drain_resolved().is_empty());
    }

    #[test]
    fn factory_failure_reported_to_waiter() {
        let mut f = fixture(true);
        f.links.set_fail_create(true);
        f.manager.connect_to(f.remote, None, host(9), &mut f.channels);
        let resolved = f.manager.drain_resolved();
        assert!(matches!(resolved[0].result, Err(ConnectionError::Link(_))));
        assert_eq!(f.manager.link_count(), 0);
    }
}

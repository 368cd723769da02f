//! Host-driven API: MeshCore receives channel and link events from the host,
//! drives the components, and returns [`MeshEvent`]s.
//!
//! Every public method runs to completion without blocking; sends go straight
//! to the Channel capabilities the host registered. Nothing here spawns, sleeps
//! or locks: the host serializes calls on one logical thread.

use std::collections::HashMap;

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelEvent, ChannelId, ChannelKind, ChannelTable};
use crate::chunk::{FileMeta, TransferEngine, TransferEvent};
use crate::config::{self, MeshConfig};
use crate::error::{ConnectionError, MeshError, TransferError};
use crate::handshake::{
    BackendRegistry, HandshakeEntry, HandshakeEvent, HandshakeManager, HandshakeStatus,
};
use crate::identity::{self, IdSource, PeerId, RandomIds};
use crate::peer::{
    ConnectTicket, ConnectWaiter, LinkEvent, LinkState, PeerLinkFactory, PeerLinkManager,
    Resolution,
};
use crate::presence;
use crate::protocol::{FileId, Message, Signal, SignalBody};
use crate::routing::{self, RouteDecision};
use crate::store::Store;
use crate::wire;

/// Everything a core is built from: configuration and the host's capabilities.
pub struct MeshContext {
    pub config: MeshConfig,
    pub backends: BackendRegistry,
    pub links: Box<dyn PeerLinkFactory>,
    pub store: Box<dyn Store>,
    pub ids: Box<dyn IdSource>,
    /// Chunk selection RNG; seeded from the OS when absent.
    pub chunk_rng: Option<StdRng>,
}

impl MeshContext {
    pub fn new(
        config: MeshConfig,
        backends: BackendRegistry,
        links: Box<dyn PeerLinkFactory>,
        store: Box<dyn Store>,
    ) -> Self {
        Self {
            config,
            backends,
            links,
            store,
            ids: Box::new(RandomIds),
            chunk_rng: None,
        }
    }

    pub fn with_ids(mut self, ids: Box<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_chunk_rng(mut self, rng: StdRng) -> Self {
        self.chunk_rng = Some(rng);
        self
    }
}

/// What the core reports to the host.
#[derive(Debug)]
pub enum MeshEvent {
    HandshakeStatus(HandshakeStatus),
    /// A signaling channel is open and announced.
    HandshakeOpen(ChannelId),
    /// Every configured backend failed; add configs to try again.
    HandshakeExhausted,
    PeerConnected { peer: PeerId, channel: ChannelId },
    PeerDisconnected { peer: PeerId },
    /// Outcome of a host `connect_to`.
    ConnectResult {
        ticket: ConnectTicket,
        peer: PeerId,
        result: Result<ChannelId, ConnectionError>,
    },
    TransferBegin { file_id: FileId, resumed: bool },
    TransferComplete { file_id: FileId },
    TransferFailed { file_id: FileId, error: TransferError },
    /// Reported and handled; nothing for the host to undo.
    Error(MeshError),
}

/// Main coordinator. Host passes events; core returns events.
pub struct MeshCore {
    local: PeerId,
    config: MeshConfig,
    channels: ChannelTable,
    handshake: HandshakeManager,
    peers: PeerLinkManager,
    transfers: TransferEngine,
    next_ticket: u64,
    /// Chunk requests waiting for the source's link to open.
    parked: HashMap<FileId, u32>,
}

impl MeshCore {
    pub fn new(ctx: MeshContext) -> Self {
        let MeshContext {
            config,
            backends,
            links,
            store,
            mut ids,
            chunk_rng,
        } = ctx;
        let local = identity::resolve_local_id(config.peer_id.as_deref(), ids.as_mut());
        info!(peer = %local, "mesh core starting");
        let transfers = match chunk_rng {
            Some(rng) => TransferEngine::with_rng(store, &config, rng),
            None => TransferEngine::new(store, &config),
        };
        Self {
            local,
            handshake: HandshakeManager::new(local, backends),
            peers: PeerLinkManager::new(
                local,
                links,
                config.data_channel_label.clone(),
                config.connect_timeout_ticks,
            ),
            transfers,
            channels: ChannelTable::new(),
            next_ticket: 0,
            parked: HashMap::new(),
            config,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn handshake_status(&self) -> HandshakeStatus {
        self.handshake.status()
    }

    pub fn handshake(&self) -> &HandshakeManager {
        &self.handshake
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn link_state(&self, peer: &PeerId) -> Option<LinkState> {
        self.peers.state(peer)
    }

    pub fn peer_links(&self) -> &PeerLinkManager {
        &self.peers
    }

    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    /// Append handshake backends; starts handshaking when idle.
    pub fn add_handshake_configs(&mut self, entries: Vec<HandshakeEntry>) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        let events = self.handshake.add_configs(entries, &mut self.channels);
        self.apply_handshake(events, &mut out);
        self.settle(&mut out);
        out
    }

    /// Parse and append the handshake configuration resource. A bad resource is
    /// reported and leaves the current state alone.
    pub fn add_handshake_config_json(&mut self, json: &str) -> Vec<MeshEvent> {
        match config::parse_handshake_config(json) {
            Ok(entries) => self.add_handshake_configs(entries),
            Err(e) => {
                warn!(error = %e, "handshake configuration rejected");
                vec![MeshEvent::Error(e.into())]
            }
        }
    }

    /// Drop all handshake state so handshaking can start over with new configs.
    pub fn reset_handshake(&mut self) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        let events = self.handshake.reset(&mut self.channels);
        self.apply_handshake(events, &mut out);
        out
    }

    /// Register a channel the host opened itself (e.g. a pre-established peer
    /// transport). It is treated like a signaling channel without a quota.
    pub fn add_channel(&mut self, kind: ChannelKind, channel: Box<dyn Channel>) -> ChannelId {
        self.channels.insert(kind, channel, None)
    }

    /// Host-reported event for a channel the core owns.
    pub fn on_channel_event(&mut self, id: ChannelId, event: ChannelEvent) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        match event {
            ChannelEvent::Open => self.on_open(id, &mut out),
            ChannelEvent::Message { from, payload } => self.on_message(id, from, &payload, &mut out),
            ChannelEvent::Presence { from } => self.on_presence(from, id),
            ChannelEvent::Error(reason) => self.on_error(id, reason, &mut out),
            ChannelEvent::Close => self.on_close(id, &mut out),
        }
        self.settle(&mut out);
        out
    }

    /// Host-reported transport event for the link to `peer`.
    pub fn on_link_event(&mut self, peer: PeerId, event: LinkEvent) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        match event {
            LinkEvent::DataChannel(channel) => {
                if let Err(e) = self.peers.on_data_channel(peer, channel, &mut self.channels) {
                    out.push(MeshEvent::Error(e.into()));
                }
            }
            LinkEvent::Failed(reason) => {
                let known = self.peers.state(&peer).is_some();
                self.peers.on_link_failed(peer, reason, &mut self.channels);
                if known {
                    out.push(MeshEvent::PeerDisconnected { peer });
                }
            }
            LinkEvent::Closed => {
                if self.peers.state(&peer).is_some() {
                    self.peers.on_closed(peer, &mut self.channels);
                    out.push(MeshEvent::PeerDisconnected { peer });
                }
            }
        }
        self.settle(&mut out);
        out
    }

    /// Connect to `peer`, flooding the offer over every open channel. The outcome
    /// arrives as a [`MeshEvent::ConnectResult`] carrying the returned ticket.
    pub fn connect_to(&mut self, peer: PeerId) -> (ConnectTicket, Vec<MeshEvent>) {
        self.next_ticket += 1;
        let ticket = ConnectTicket(self.next_ticket);
        let mut out = Vec::new();
        if peer == self.local {
            out.push(MeshEvent::ConnectResult {
                ticket,
                peer,
                result: Err(ConnectionError::Rejected(peer)),
            });
            return (ticket, out);
        }
        self.peers
            .connect_to(peer, None, ConnectWaiter::Host(ticket), &mut self.channels);
        self.settle(&mut out);
        (ticket, out)
    }

    /// Close the link to `peer`.
    pub fn disconnect(&mut self, peer: PeerId) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        if self.peers.state(&peer).is_some() {
            self.peers.disconnect(peer, &mut self.channels);
            out.push(MeshEvent::PeerDisconnected { peer });
        }
        self.settle(&mut out);
        out
    }

    /// Close every peer link. Pending connects fail with `Closed`.
    pub fn reset_peers(&mut self) -> Vec<MeshEvent> {
        let mut out: Vec<MeshEvent> = self
            .peers
            .reset(&mut self.channels)
            .into_iter()
            .map(|peer| MeshEvent::PeerDisconnected { peer })
            .collect();
        self.settle(&mut out);
        out
    }

    /// Start downloading `meta` from its source peer.
    pub fn begin_transfer(&mut self, meta: FileMeta) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        let file_id = meta.file_id;
        match self.transfers.begin_transfer(meta) {
            Ok(events) => self.apply_transfer(events, &mut out),
            Err(error) => {
                warn!(file = %file_id, error = %error, "transfer could not start");
                out.push(MeshEvent::TransferFailed { file_id, error });
            }
        }
        self.settle(&mut out);
        out
    }

    /// Serve `content` to peers under its content hash.
    pub fn share_file(
        &mut self,
        name: impl Into<String>,
        content: Vec<u8>,
    ) -> Result<FileMeta, TransferError> {
        self.transfers
            .share_file(name, content, self.config.chunk_size, self.local)
    }

    /// Periodic tick: abandon stalled peer links and re-request stalled chunks.
    pub fn tick(&mut self) -> Vec<MeshEvent> {
        let mut out = Vec::new();
        self.peers.tick(&mut self.channels);
        let events = self.transfers.tick();
        self.apply_transfer(events, &mut out);
        self.settle(&mut out);
        out
    }

    fn on_open(&mut self, id: ChannelId, out: &mut Vec<MeshEvent>) {
        if !self.channels.mark_open(id) {
            debug!(channel = %id, "open for unknown or already open channel");
            return;
        }
        match self.channels.get(id).map(|e| e.kind.clone()) {
            Some(ChannelKind::Signaling { .. }) => {
                let events = self.handshake.on_open(id);
                self.apply_handshake(events, out);
            }
            Some(ChannelKind::Peer(peer)) => {
                if self.peers.on_channel_open(peer, id) {
                    out.push(MeshEvent::PeerConnected { peer, channel: id });
                }
            }
            None => return,
        }
        self.announce(id, out);
    }

    /// Presence goes out once per opened channel.
    fn announce(&mut self, id: ChannelId, out: &mut Vec<MeshEvent>) {
        match presence::presence_frame(self.local) {
            Ok(frame) => {
                if let Err(e) = self.channels.send(id, None, frame) {
                    warn!(channel = %id, error = %e, "presence announcement failed");
                    out.push(MeshEvent::Error(e.into()));
                }
            }
            Err(e) => out.push(MeshEvent::Error(e.into())),
        }
    }

    fn on_message(
        &mut self,
        id: ChannelId,
        from: Option<PeerId>,
        payload: &[u8],
        out: &mut Vec<MeshEvent>,
    ) {
        if from == Some(self.local) {
            return;
        }
        let msg = match wire::decode_payload(payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(channel = %id, error = %e, "undecodable payload dropped");
                out.push(MeshEvent::Error(e.into()));
                return;
            }
        };
        match msg {
            Message::Signal(signal) => self.on_signal(id, signal, out),
            Message::TransferQuery { file_id, chunk } => {
                match self.transfers.serve_chunk(file_id, chunk) {
                    Ok(Some(payload)) => {
                        let reply = Message::TransferData {
                            file_id,
                            chunk,
                            payload,
                        };
                        self.send_message(id, from, &reply, out);
                    }
                    Ok(None) => debug!(file = %file_id, chunk, "query for a chunk we do not hold"),
                    Err(e) => out.push(MeshEvent::Error(e.into())),
                }
            }
            Message::TransferData {
                file_id,
                chunk,
                payload,
            } => match self.transfers.on_chunk_received(file_id, chunk, &payload) {
                Ok(events) => self.apply_transfer(events, out),
                Err(e) => {
                    debug!(file = %file_id, chunk, error = %e, "chunk rejected");
                    out.push(MeshEvent::Error(e.into()));
                }
            },
        }
    }

    fn on_signal(&mut self, arrival: ChannelId, signal: Signal, out: &mut Vec<MeshEvent>) {
        match routing::decide(self.local, &signal) {
            RouteDecision::Drop(reason) => {
                debug!(channel = %arrival, from = %signal.from, kind = signal.kind(), reason, "signal dropped");
            }
            RouteDecision::Relay(relayed) => self.relay(arrival, relayed, out),
            RouteDecision::Deliver => match signal.body {
                SignalBody::Presence => self.on_presence(signal.from, arrival),
                SignalBody::Offer { sdp } => {
                    match self
                        .peers
                        .on_offer(signal.from, &sdp, arrival, &mut self.channels)
                    {
                        Ok(()) | Err(ConnectionError::Rejected(_)) => {}
                        Err(e) => out.push(MeshEvent::Error(e.into())),
                    }
                }
                SignalBody::Answer { sdp } => {
                    if let Err(e) = self.peers.on_answer(signal.from, &sdp, &mut self.channels) {
                        out.push(MeshEvent::Error(e.into()));
                    }
                }
            },
        }
    }

    fn relay(&mut self, arrival: ChannelId, signal: Signal, out: &mut Vec<MeshEvent>) {
        let Some(target) = signal.to else {
            return;
        };
        let targets = routing::relay_targets(&self.channels, target, arrival);
        if targets.is_empty() {
            debug!(peer = %target, "no channel to relay signal on");
            return;
        }
        let frame = match wire::encode_frame(&Message::Signal(signal)) {
            Ok(frame) => frame,
            Err(e) => {
                out.push(MeshEvent::Error(e.into()));
                return;
            }
        };
        for id in targets {
            if let Err(e) = self.channels.send(id, Some(target), frame.clone()) {
                debug!(channel = %id, error = %e, "relay send failed");
            }
        }
    }

    fn on_presence(&mut self, origin: PeerId, arrival: ChannelId) {
        if !presence::accept_presence(origin, self.local) {
            return;
        }
        debug!(peer = %origin, channel = %arrival, "presence");
        self.peers.connect_to(
            origin,
            Some(arrival),
            ConnectWaiter::Presence { via: arrival },
            &mut self.channels,
        );
    }

    /// Error closes the transport, then it is handled like a close.
    fn on_error(&mut self, id: ChannelId, reason: String, out: &mut Vec<MeshEvent>) {
        let Some(entry) = self.channels.close(id) else {
            return;
        };
        warn!(channel = %id, %reason, "channel error");
        match entry.kind {
            ChannelKind::Signaling { .. } => {
                let events = self.handshake.on_closed(id, Some(reason), &mut self.channels);
                self.apply_handshake(events, out);
            }
            ChannelKind::Peer(peer) => {
                self.peers.on_link_failed(peer, reason, &mut self.channels);
                out.push(MeshEvent::PeerDisconnected { peer });
            }
        }
    }

    fn on_close(&mut self, id: ChannelId, out: &mut Vec<MeshEvent>) {
        let Some(entry) = self.channels.remove(id) else {
            return;
        };
        match entry.kind {
            ChannelKind::Signaling { .. } => {
                let events = self.handshake.on_closed(id, None, &mut self.channels);
                self.apply_handshake(events, out);
            }
            ChannelKind::Peer(peer) => {
                self.peers.on_closed(peer, &mut self.channels);
                out.push(MeshEvent::PeerDisconnected { peer });
            }
        }
    }

    fn send_message(
        &mut self,
        id: ChannelId,
        to: Option<PeerId>,
        msg: &Message,
        out: &mut Vec<MeshEvent>,
    ) {
        let result = wire::encode_frame(msg)
            .map_err(MeshError::from)
            .and_then(|frame| self.channels.send(id, to, frame).map_err(MeshError::from));
        if let Err(e) = result {
            debug!(channel = %id, error = %e, "send failed");
            out.push(MeshEvent::Error(e));
        }
    }

    /// Send a chunk query to the source, connecting first when needed.
    fn request(&mut self, source: PeerId, file_id: FileId, chunk: u32, out: &mut Vec<MeshEvent>) {
        if source == self.local {
            debug!(file = %file_id, "transfer source is the local peer, nothing to request");
            return;
        }
        match self.peers.channel_of(&source) {
            Some(ch) => {
                self.send_message(ch, Some(source), &Message::TransferQuery { file_id, chunk }, out)
            }
            None => {
                debug!(file = %file_id, chunk, peer = %source, "connecting to transfer source");
                self.parked.insert(file_id, chunk);
                self.peers.connect_to(
                    source,
                    None,
                    ConnectWaiter::Transfer(file_id),
                    &mut self.channels,
                );
            }
        }
    }

    fn apply_handshake(&mut self, events: Vec<HandshakeEvent>, out: &mut Vec<MeshEvent>) {
        for event in events {
            out.push(match event {
                HandshakeEvent::Status(s) => MeshEvent::HandshakeStatus(s),
                HandshakeEvent::Connected(id) => MeshEvent::HandshakeOpen(id),
                HandshakeEvent::Failed(e) => MeshEvent::Error(e.into()),
                HandshakeEvent::Exhausted => MeshEvent::HandshakeExhausted,
            });
        }
    }

    fn apply_transfer(&mut self, events: Vec<TransferEvent>, out: &mut Vec<MeshEvent>) {
        for event in events {
            match event {
                TransferEvent::Begin { file_id, resumed } => {
                    out.push(MeshEvent::TransferBegin { file_id, resumed })
                }
                TransferEvent::Request {
                    source,
                    file_id,
                    chunk,
                } => self.request(source, file_id, chunk, out),
                TransferEvent::Complete { file_id } => {
                    self.parked.remove(&file_id);
                    out.push(MeshEvent::TransferComplete { file_id })
                }
                TransferEvent::Failed { file_id, error } => {
                    self.parked.remove(&file_id);
                    out.push(MeshEvent::TransferFailed { file_id, error })
                }
            }
        }
    }

    /// Deliver connection outcomes until none are left.
    fn settle(&mut self, out: &mut Vec<MeshEvent>) {
        loop {
            let resolved = self.peers.drain_resolved();
            if resolved.is_empty() {
                return;
            }
            for resolution in resolved {
                self.on_resolution(resolution, out);
            }
        }
    }

    fn on_resolution(&mut self, resolution: Resolution, out: &mut Vec<MeshEvent>) {
        let Resolution {
            peer,
            waiter,
            result,
        } = resolution;
        match waiter {
            ConnectWaiter::Host(ticket) => out.push(MeshEvent::ConnectResult {
                ticket,
                peer,
                result,
            }),
            ConnectWaiter::Presence { via } => match result {
                Ok(_) => self.count_connection(via, out),
                Err(e) => debug!(%peer, channel = %via, error = %e, "presence connect failed"),
            },
            ConnectWaiter::Transfer(file_id) => match result {
                Ok(ch) => {
                    if let Some(chunk) = self.parked.remove(&file_id) {
                        self.send_message(
                            ch,
                            Some(peer),
                            &Message::TransferQuery { file_id, chunk },
                            out,
                        );
                    }
                }
                // The chunk request times out and is retried by the next ticks.
                Err(e) => warn!(file = %file_id, %peer, error = %e, "transfer source unreachable"),
            },
        }
    }

    /// A presence-driven connect through `via` succeeded; release `via` once
    /// its quota is met.
    fn count_connection(&mut self, via: ChannelId, out: &mut Vec<MeshEvent>) {
        let Some(entry) = self.channels.get_mut(via) else {
            return;
        };
        if !presence::record_connect_result(entry, true) {
            return;
        }
        self.channels.close(via);
        let events = self.handshake.on_closed(via, None, &mut self.channels);
        self.apply_handshake(events, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::BackendParams;
    use crate::identity::SeededIds;
    use crate::mock::{BackendProbe, LinkProbe, MockBackend, MockLinkFactory};
    use crate::store::MemoryStore;
    use rand::SeedableRng;

    struct Harness {
        core: MeshCore,
        backend: BackendProbe,
        links: LinkProbe,
    }

    fn harness(seed: u64) -> Harness {
        let (backend, backend_probe) = MockBackend::working();
        let (links, link_probe) = MockLinkFactory::new();
        let mut registry = BackendRegistry::new();
        registry.register("A", Box::new(backend));
        let ctx = MeshContext::new(
            MeshConfig::default(),
            registry,
            Box::new(links),
            Box::new(MemoryStore::new()),
        )
        .with_ids(Box::new(SeededIds::new(seed)))
        .with_chunk_rng(StdRng::seed_from_u64(seed));
        Harness {
            core: MeshCore::new(ctx),
            backend: backend_probe,
            links: link_probe,
        }
    }

    fn open_signaling(h: &mut Harness, quota: Option<u32>) -> ChannelId {
        let params = match quota {
            Some(q) => BackendParams::with_quota(q),
            None => BackendParams::default(),
        };
        h.core
            .add_handshake_configs(vec![HandshakeEntry::new("A", params)]);
        let id = h.core.handshake().active().unwrap();
        let events = h.core.on_channel_event(id, ChannelEvent::Open);
        assert!(events
            .iter()
            .any(|e| matches!(e, MeshEvent::HandshakeOpen(open) if *open == id)));
        id
    }

    #[test]
    fn local_id_comes_from_id_source_or_config() {
        let h = harness(10);
        assert_eq!(h.core.local_id(), SeededIds::new(10).next_id());

        let fixed = SeededIds::new(77).next_id();
        let (links, _) = MockLinkFactory::new();
        let config = MeshConfig {
            peer_id: Some(fixed.to_string()),
            ..MeshConfig::default()
        };
        let core = MeshCore::new(MeshContext::new(
            config,
            BackendRegistry::new(),
            Box::new(links),
            Box::new(MemoryStore::new()),
        ));
        assert_eq!(core.local_id(), fixed);
    }

    #[test]
    fn presence_announced_once_on_open() {
        let mut h = harness(1);
        let id = open_signaling(&mut h, None);
        let sent = h.backend.last_channel().unwrap().messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].1,
            Message::Signal(Signal::presence(h.core.local_id()))
        );
        // A second Open report is ignored.
        h.core.on_channel_event(id, ChannelEvent::Open);
        assert_eq!(h.backend.last_channel().unwrap().messages().len(), 1);
    }

    #[test]
    fn own_presence_never_connects() {
        let mut h = harness(2);
        let id = open_signaling(&mut h, None);
        let local = h.core.local_id();
        h.core
            .on_channel_event(id, ChannelEvent::Presence { from: local });
        let frame = presence::presence_frame(local).unwrap();
        h.core.on_channel_event(
            id,
            ChannelEvent::Message {
                from: None,
                payload: frame,
            },
        );
        assert!(h.links.created().is_empty());
    }

    #[test]
    fn remote_presence_sends_offer_on_arrival_channel() {
        let mut h = harness(3);
        let id = open_signaling(&mut h, None);
        let remote = SeededIds::new(300).next_id();
        h.core
            .on_channel_event(id, ChannelEvent::Presence { from: remote });
        assert_eq!(h.links.created(), vec![remote]);
        assert_eq!(h.core.link_state(&remote), Some(LinkState::Offering));
        let sent = h.backend.last_channel().unwrap().messages();
        assert!(matches!(
            &sent.last().unwrap().1,
            Message::Signal(Signal { body: SignalBody::Offer { .. }, .. })
        ));
    }

    #[test]
    fn channel_error_closes_and_fails_over() {
        let mut h = harness(4);
        let id = open_signaling(&mut h, None);
        let events = h
            .core
            .on_channel_event(id, ChannelEvent::Error("socket reset".into()));
        assert_eq!(h.backend.last_channel().unwrap().close_count(), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, MeshEvent::HandshakeExhausted)));
        assert_eq!(h.core.handshake_status(), HandshakeStatus::Disconnected);
        // The host's trailing Close for the same channel is a no-op.
        assert!(h.core.on_channel_event(id, ChannelEvent::Close).is_empty());
    }

    #[test]
    fn malformed_config_is_reported_not_fatal() {
        let mut h = harness(5);
        let events = h.core.add_handshake_config_json("[]");
        assert!(matches!(
            events.as_slice(),
            [MeshEvent::Error(MeshError::Config(crate::error::ConfigError::Empty))]
        ));
        let events = h.core.add_handshake_config_json(r#"[["A", {}]]"#);
        assert!(events
            .iter()
            .any(|e| matches!(e, MeshEvent::HandshakeStatus(HandshakeStatus::Connecting))));
        assert_eq!(h.backend.open_attempts(), 1);
    }

    #[test]
    fn connect_to_self_is_rejected() {
        let mut h = harness(6);
        let local = h.core.local_id();
        let (ticket, events) = h.core.connect_to(local);
        assert!(matches!(
            events.as_slice(),
            [MeshEvent::ConnectResult { ticket: t, result: Err(ConnectionError::Rejected(_)), .. }] if *t == ticket
        ));
    }

    #[test]
    fn connect_without_channels_reports_no_channel() {
        let mut h = harness(7);
        let remote = SeededIds::new(700).next_id();
        let (ticket, events) = h.core.connect_to(remote);
        assert!(matches!(
            events.as_slice(),
            [MeshEvent::ConnectResult { ticket: t, result: Err(ConnectionError::NoChannel), .. }] if *t == ticket
        ));
    }

    #[test]
    fn garbage_payload_is_reported() {
        let mut h = harness(8);
        let id = open_signaling(&mut h, None);
        let events = h.core.on_channel_event(
            id,
            ChannelEvent::Message {
                from: None,
                payload: vec![1, 2],
            },
        );
        assert!(matches!(events.as_slice(), [MeshEvent::Error(MeshError::Decode(_))]));
    }

    #[test]
    fn reset_peers_fails_pending_connects_once() {
        let mut h = harness(9);
        let signaling = open_signaling(&mut h, None);
        let remote = SeededIds::new(900).next_id();
        let (first, events) = h.core.connect_to(remote);
        assert!(events.is_empty());
        let (second, _) = h.core.connect_to(remote);
        assert_eq!(h.links.created(), vec![remote]);

        let events = h.core.reset_peers();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], MeshEvent::PeerDisconnected { peer } if peer == remote));
        let tickets: Vec<ConnectTicket> = events[1..]
            .iter()
            .map(|e| match e {
                MeshEvent::ConnectResult {
                    ticket,
                    result: Err(ConnectionError::Closed(p)),
                    ..
                } if *p == remote => *ticket,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(tickets, vec![first, second]);
        assert_eq!(h.core.peer_links().link_count(), 0);
        assert_eq!(h.links.closed(), vec![remote]);

        assert!(h.core.reset_peers().is_empty());
        assert_eq!(h.core.handshake().active(), Some(signaling));
    }
}

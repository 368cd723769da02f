//! In-memory capability doubles for tests and simulation.
//!
//! Each mock hands back a probe sharing its state through `Rc<RefCell<..>>`,
//! so a test can inspect what the core did after moving the mock into it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::channel::Channel;
use crate::error::{BackendError, ChannelError, LinkError};
use crate::handshake::{Backend, BackendParams};
use crate::identity::PeerId;
use crate::peer::{PeerLink, PeerLinkFactory};
use crate::protocol::Message;
use crate::wire;

#[derive(Default)]
struct ChannelLog {
    sent: Vec<(Option<PeerId>, Vec<u8>)>,
    closes: u32,
    fail_sends: bool,
}

/// Channel that records what it was asked to send.
pub struct MockChannel {
    log: Rc<RefCell<ChannelLog>>,
}

impl MockChannel {
    pub fn new() -> (Self, ChannelProbe) {
        let log = Rc::new(RefCell::new(ChannelLog::default()));
        (Self { log: log.clone() }, ChannelProbe { log })
    }
}

impl Channel for MockChannel {
    fn send(&mut self, to: Option<PeerId>, payload: Vec<u8>) -> Result<(), ChannelError> {
        let mut log = self.log.borrow_mut();
        if log.closes > 0 {
            return Err(ChannelError::Closed);
        }
        if log.fail_sends {
            return Err(ChannelError::SendFailed("mock send failure".into()));
        }
        log.sent.push((to, payload));
        Ok(())
    }

    fn close(&mut self) {
        self.log.borrow_mut().closes += 1;
    }
}

/// Test-side view of a [`MockChannel`].
#[derive(Clone)]
pub struct ChannelProbe {
    log: Rc<RefCell<ChannelLog>>,
}

impl ChannelProbe {
    pub fn sent(&self) -> Vec<(Option<PeerId>, Vec<u8>)> {
        self.log.borrow().sent.clone()
    }

    /// Sent payloads decoded as frames; undecodable payloads are skipped.
    pub fn messages(&self) -> Vec<(Option<PeerId>, Message)> {
        self.log
            .borrow()
            .sent
            .iter()
            .filter_map(|(to, bytes)| wire::decode_payload(bytes).ok().map(|m| (*to, m)))
            .collect()
    }

    /// Drain sent payloads, e.g. to forward them to another core.
    pub fn take_sent(&self) -> Vec<(Option<PeerId>, Vec<u8>)> {
        std::mem::take(&mut self.log.borrow_mut().sent)
    }

    pub fn close_count(&self) -> u32 {
        self.log.borrow().closes
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.log.borrow_mut().fail_sends = fail;
    }
}

#[derive(Default)]
struct BackendLog {
    opened: Vec<ChannelProbe>,
    params: Vec<(BackendParams, PeerId)>,
}

/// Backend whose `open` either fails immediately or yields a [`MockChannel`].
pub struct MockBackend {
    fail: bool,
    log: Rc<RefCell<BackendLog>>,
}

impl MockBackend {
    pub fn working() -> (Self, BackendProbe) {
        Self::build(false)
    }

    pub fn failing() -> (Self, BackendProbe) {
        Self::build(true)
    }

    fn build(fail: bool) -> (Self, BackendProbe) {
        let log = Rc::new(RefCell::new(BackendLog::default()));
        (
            Self {
                fail,
                log: log.clone(),
            },
            BackendProbe { log },
        )
    }
}

impl Backend for MockBackend {
    fn open(
        &mut self,
        name: &str,
        params: &BackendParams,
        local: PeerId,
    ) -> Result<Box<dyn Channel>, BackendError> {
        let mut log = self.log.borrow_mut();
        log.params.push((params.clone(), local));
        if self.fail {
            return Err(BackendError::OpenFailed {
                backend: name.to_string(),
                reason: "mock backend refused".into(),
            });
        }
        let (chan, probe) = MockChannel::new();
        log.opened.push(probe);
        Ok(Box::new(chan))
    }
}

#[derive(Clone)]
pub struct BackendProbe {
    log: Rc<RefCell<BackendLog>>,
}

impl BackendProbe {
    /// Probes for every channel opened so far, oldest first.
    pub fn channels(&self) -> Vec<ChannelProbe> {
        self.log.borrow().opened.clone()
    }

    pub fn last_channel(&self) -> Option<ChannelProbe> {
        self.log.borrow().opened.last().cloned()
    }

    pub fn open_attempts(&self) -> usize {
        self.log.borrow().params.len()
    }

    pub fn params(&self) -> Vec<(BackendParams, PeerId)> {
        self.log.borrow().params.clone()
    }
}

#[derive(Default)]
struct LinkLog {
    created: Vec<PeerId>,
    local: HashMap<PeerId, Vec<String>>,
    remote: HashMap<PeerId, Vec<String>>,
    data_channels: HashMap<PeerId, Vec<ChannelProbe>>,
    closed: Vec<PeerId>,
    fail_create: bool,
    fail_offer: bool,
}

/// Factory producing [`MockLink`]s whose SDPs are `offer:<peer>` / `answer:<peer>`.
pub struct MockLinkFactory {
    log: Rc<RefCell<LinkLog>>,
}

impl MockLinkFactory {
    pub fn new() -> (Self, LinkProbe) {
        let log = Rc::new(RefCell::new(LinkLog::default()));
        (Self { log: log.clone() }, LinkProbe { log })
    }
}

impl PeerLinkFactory for MockLinkFactory {
    fn create(&mut self, peer: PeerId) -> Result<Box<dyn PeerLink>, LinkError> {
        let mut log = self.log.borrow_mut();
        if log.fail_create {
            return Err(LinkError("mock link creation refused".into()));
        }
        log.created.push(peer);
        Ok(Box::new(MockLink {
            peer,
            log: self.log.clone(),
        }))
    }
}

pub struct MockLink {
    peer: PeerId,
    log: Rc<RefCell<LinkLog>>,
}

impl PeerLink for MockLink {
    fn create_offer(&mut self) -> Result<String, LinkError> {
        if self.log.borrow().fail_offer {
            return Err(LinkError("mock offer refused".into()));
        }
        Ok(format!("offer:{}", self.peer))
    }

    fn create_answer(&mut self, remote_sdp: &str) -> Result<String, LinkError> {
        Ok(format!("answer:{}:{}", self.peer, remote_sdp))
    }

    fn set_local_description(&mut self, sdp: &str) -> Result<(), LinkError> {
        self.log
            .borrow_mut()
            .local
            .entry(self.peer)
            .or_default()
            .push(sdp.to_string());
        Ok(())
    }

    fn set_remote_description(&mut self, sdp: &str) -> Result<(), LinkError> {
        self.log
            .borrow_mut()
            .remote
            .entry(self.peer)
            .or_default()
            .push(sdp.to_string());
        Ok(())
    }

    fn create_data_channel(&mut self, _label: &str) -> Result<Box<dyn Channel>, LinkError> {
        let (chan, probe) = MockChannel::new();
        self.log
            .borrow_mut()
            .data_channels
            .entry(self.peer)
            .or_default()
            .push(probe);
        Ok(Box::new(chan))
    }

    fn close(&mut self) {
        self.log.borrow_mut().closed.push(self.peer);
    }
}

#[derive(Clone)]
pub struct LinkProbe {
    log: Rc<RefCell<LinkLog>>,
}

impl LinkProbe {
    /// Peers a link was created for, in creation order (duplicates included).
    pub fn created(&self) -> Vec<PeerId> {
        self.log.borrow().created.clone()
    }

    pub fn local_descriptions(&self, peer: &PeerId) -> Vec<String> {
        self.log.borrow().local.get(peer).cloned().unwrap_or_default()
    }

    pub fn remote_descriptions(&self, peer: &PeerId) -> Vec<String> {
        self.log.borrow().remote.get(peer).cloned().unwrap_or_default()
    }

    pub fn data_channels(&self, peer: &PeerId) -> Vec<ChannelProbe> {
        self.log
            .borrow()
            .data_channels
            .get(peer)
            .cloned()
            .unwrap_or_default()
    }

    pub fn closed(&self) -> Vec<PeerId> {
        self.log.borrow().closed.clone()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.log.borrow_mut().fail_create = fail;
    }

    pub fn set_fail_offer(&self, fail: bool) {
        self.log.borrow_mut().fail_offer = fail;
    }
}

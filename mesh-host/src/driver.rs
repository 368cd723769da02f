//! Single-threaded driver: owns the core, feeds it host inputs and periodic
//! ticks, and forwards what it reports.
//!
//! The core and its capabilities are not `Send`; run the driver on a
//! current-thread runtime (or a `LocalSet`).

use std::time::Duration;

use mesh_core::channel::{ChannelEvent, ChannelId};
use mesh_core::{FileMeta, HandshakeEntry, LinkEvent, MeshCore, MeshEvent, PeerId};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// What the host's transports and UI feed into the core.
pub enum HostInput {
    Channel(ChannelId, ChannelEvent),
    Link(PeerId, LinkEvent),
    AddConfigs(Vec<HandshakeEntry>),
    Connect(PeerId),
    Disconnect(PeerId),
    BeginTransfer(FileMeta),
}

pub struct MeshDriver {
    core: MeshCore,
    tick_interval: Duration,
}

impl MeshDriver {
    pub fn new(core: MeshCore, tick_interval: Duration) -> Self {
        Self {
            core,
            tick_interval,
        }
    }

    pub fn core(&self) -> &MeshCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut MeshCore {
        &mut self.core
    }

    /// Apply one input to the core.
    pub fn handle(&mut self, input: HostInput) -> Vec<MeshEvent> {
        match input {
            HostInput::Channel(id, event) => self.core.on_channel_event(id, event),
            HostInput::Link(peer, event) => self.core.on_link_event(peer, event),
            HostInput::AddConfigs(entries) => self.core.add_handshake_configs(entries),
            HostInput::Connect(peer) => {
                let (ticket, events) = self.core.connect_to(peer);
                debug!(%peer, ticket = ticket.0, "connect requested");
                events
            }
            HostInput::Disconnect(peer) => self.core.disconnect(peer),
            HostInput::BeginTransfer(meta) => self.core.begin_transfer(meta),
        }
    }

    /// Run until the input queue closes or the event receiver goes away.
    /// Returns the core so the host can inspect or persist it.
    pub async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<HostInput>,
        events: mpsc::UnboundedSender<MeshEvent>,
    ) -> MeshCore {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        info!(peer = %self.core.local_id(), tick_ms = self.tick_interval.as_millis() as u64, "mesh driver running");
        loop {
            let out = tokio::select! {
                input = inputs.recv() => match input {
                    Some(input) => self.handle(input),
                    None => break,
                },
                _ = ticker.tick() => self.core.tick(),
            };
            for event in out {
                if events.send(event).is_err() {
                    debug!("event receiver dropped, stopping driver");
                    return self.core;
                }
            }
        }
        info!("mesh driver stopped");
        self.core
    }
}

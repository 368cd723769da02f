//! Presence: announce the local peer on every channel that opens, react to
//! remote announcements, and shed load off handshake channels that reached
//! their connection quota.

use tracing::{debug, info};

use crate::channel::ChannelEntry;
use crate::identity::PeerId;
use crate::protocol::{Message, Signal};
use crate::wire::{self, FrameEncodeError};

/// Encoded presence announcement for `local`.
pub fn presence_frame(local: PeerId) -> Result<Vec<u8>, FrameEncodeError> {
    wire::encode_frame(&Message::Signal(presence_signal(local)))
}

pub fn presence_signal(local: PeerId) -> Signal {
    Signal::presence(local)
}

/// Whether a presence announcement from `origin` should trigger a connect.
/// Our own announcements echoed back by a service are dropped.
pub fn accept_presence(origin: PeerId, local: PeerId) -> bool {
    if origin == local {
        debug!(peer = %origin, "dropping own presence");
        return false;
    }
    true
}

/// Count a presence-driven connect attempt against the arrival channel.
/// Returns true when the channel just reached its quota and must be closed.
pub fn record_connect_result(entry: &mut ChannelEntry, ok: bool) -> bool {
    if !ok {
        return false;
    }
    entry.connections = entry.connections.saturating_add(1);
    match entry.max_connections {
        Some(max) if entry.connections == max => {
            info!(
                connections = entry.connections,
                max_connections = max,
                "connection quota reached, releasing handshake channel"
            );
            true
        }
        _ => false,
    }
}

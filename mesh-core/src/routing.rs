//! Routing relay for signals addressed to peers we have no direct link to.
//!
//! Every relay appends itself to the signal's route; a signal whose route
//! already holds the local peer has looped and is dropped.

use tracing::debug;

use crate::channel::{ChannelId, ChannelTable};
use crate::identity::PeerId;
use crate::protocol::Signal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Addressed to us, or a broadcast.
    Deliver,
    /// Addressed elsewhere; re-emit this copy (route already extended).
    Relay(Signal),
    Drop(&'static str),
}

pub fn decide(local: PeerId, signal: &Signal) -> RouteDecision {
    if signal.from == local {
        return RouteDecision::Drop("own signal");
    }
    if signal.route.contains(&local) {
        return RouteDecision::Drop("route loop");
    }
    match signal.to {
        None => RouteDecision::Deliver,
        Some(to) if to == local => RouteDecision::Deliver,
        Some(_) => {
            let mut relayed = signal.clone();
            relayed.route.push(local);
            RouteDecision::Relay(relayed)
        }
    }
}

/// Channels a relayed signal goes out on: the target's own data channel when
/// it is open, else every open channel except the one it arrived on.
pub fn relay_targets(
    channels: &ChannelTable,
    target: PeerId,
    arrival: ChannelId,
) -> Vec<ChannelId> {
    if let Some(direct) = channels.peer_channel(&target) {
        if direct != arrival {
            return vec![direct];
        }
    }
    let targets: Vec<ChannelId> = channels
        .open_ids()
        .into_iter()
        .filter(|id| *id != arrival)
        .collect();
    debug!(peer = %target, fanout = targets.len(), "flooding relayed signal");
    targets
}

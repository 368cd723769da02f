//! Peer identity: UUIDv4 peer IDs and the capability that hands them out.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Peer ID: opaque UUIDv4, one per process. Used in presence, routing and the peer map.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn from_uuid(uuid: Uuid) -> Self {
        PeerId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(PeerId)
    }
}

/// Source of fresh peer IDs. The host supplies one; tests use [`SeededIds`].
pub trait IdSource {
    fn next_id(&mut self) -> PeerId;
}

/// Random v4 IDs from the OS-seeded thread RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_id(&mut self) -> PeerId {
        PeerId(Uuid::new_v4())
    }
}

/// Deterministic v4 IDs from a seeded RNG.
pub struct SeededIds {
    rng: StdRng,
}

impl SeededIds {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl IdSource for SeededIds {
    fn next_id(&mut self) -> PeerId {
        let bytes: [u8; 16] = self.rng.gen();
        PeerId(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }
}

/// Resolve the local peer ID: a configured value wins, otherwise one is drawn from `ids`.
/// An unparsable configured value is reported and replaced by a fresh ID.
pub fn resolve_local_id(configured: Option<&str>, ids: &mut dyn IdSource) -> PeerId {
    match configured.map(PeerId::from_str) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "configured peer id is not a UUID, generating one");
            ids.next_id()
        }
        None => ids.next_id(),
    }
}

//! Session/owner identifiers.
//!
//! spec.md §4.7 identifies lock owners and §4.2 identifies timer/fd
//! registrants by small integers in the original design; we keep that
//! shape (an owner id of `0` means "unlocked") while giving it a named
//! type instead of a bare `u64`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a front-end session for locking and `unlock-all` cleanup.
///
/// `0` is reserved to mean "no owner" (`is-locked` returns it for an
/// unlocked database).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u64);

impl OwnerId {
    pub const UNLOCKED: OwnerId = OwnerId(0);

    pub fn is_unlocked(self) -> bool {
        self == Self::UNLOCKED
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a connected front-end session on the IPC transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Stable numeric projection used as an [`OwnerId`] for datastore
    /// locking; owner ids are a plain counter in spec.md, sessions are
    /// UUIDs at the transport layer, so the dispatcher hands each new
    /// session a counter value and keeps the UUID for transport logging.
    pub fn as_owner(self, counter: u64) -> OwnerId {
        OwnerId(counter)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

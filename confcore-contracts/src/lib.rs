//! Error taxonomy and identifier types shared across confcore crates.

pub mod error;
pub mod ids;

pub use error::{Category, ConfcoreError, NetconfDiagnostic, Result};
pub use ids::{OwnerId, SessionId};

/// Namespace every built-in RPC operation is registered under
/// (`confcore-server`'s handlers) and framed under (`confcore-config`'s
/// client envelope). Not a NETCONF base capability URN — this is
/// confcore's own IPC protocol, distinct from the NETCONF front-end.
pub const BASE_NAMESPACE: &str = "urn:confcore:base";

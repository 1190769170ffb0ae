//! The confcore core: hash index, event dispatcher, frame transport,
//! RPC dispatch, plugin registry, subtree filter and datastore engine
//! (C1-C7) that back the NETCONF/CLI management plane.

pub mod datastore;
pub mod dispatch;
pub mod event;
pub mod filter;
pub mod hash_index;
pub mod plugin;
pub mod transport;

pub use datastore::{Engine, Format, Op, OptionValue};
pub use dispatch::RpcDispatch;
pub use event::dispatcher::Dispatcher;
pub use hash_index::HashIndex;
pub use plugin::{PluginHandle, PluginRegistry};

//! C3: frame transport (spec.md §4.3) — the two wire framings
//! (internal IPC, NETCONF chunked) plus connection establishment for the
//! `AF_UNIX` and TCP endpoints those framings run over.

pub mod connect;
pub mod ipc_frame;
pub mod netconf_frame;

pub use connect::{bind_tcp_listener, bind_unix_listener, connect as connect_endpoint, Connection, Endpoint};
pub use ipc_frame::{recv as recv_ipc_frame, send as send_ipc_frame, IpcFrame, RecvOutcome};
pub use netconf_frame::{encode_message as encode_netconf_message, NetconfReader};

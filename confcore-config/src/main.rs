//! confcore management CLI: frames one request per invocation, sends it
//! over the IPC transport, and prints the reply.

mod cli;
mod request;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use confcore_core::datastore::persist;
use confcore_core::transport::{connect_endpoint, Endpoint, IpcFrame, RecvOutcome};

use cli::Cli;

/// Session id this client frames every request with. A one-shot CLI
/// process has no session to speak of; `1` is simply the IPC frame's
/// tag for matching its own reply, not a datastore lock owner (the
/// server's lock/unlock handlers derive the owner from its own
/// per-connection counter, not this field).
const REQUEST_SESSION_ID: u32 = 1;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "confcore_config=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let envelope = request::build_envelope(&cli.command)?;
    let body = persist::write_xml(&envelope, false).context("serializing request")?;

    let mut conn = connect_endpoint(&Endpoint::Unix(cli.socket.clone()))
        .with_context(|| format!("connecting to {}", cli.socket.display()))?;

    let request = IpcFrame::new(REQUEST_SESSION_ID, body);
    confcore_core::transport::send_ipc_frame(&mut conn, &request).context("sending request")?;

    match confcore_core::transport::recv_ipc_frame(&mut conn).context("reading reply")? {
        RecvOutcome::Frame(reply) => {
            if reply.body.contains("<rpc-error>") {
                eprintln!("{}", reply.body);
                std::process::exit(1);
            }
            println!("{}", reply.body);
            Ok(())
        }
        RecvOutcome::Eof => anyhow::bail!("server closed the connection without replying"),
    }
}

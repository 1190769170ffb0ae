//! Builds the `<rpc>` envelope sent over the IPC transport for each
//! subcommand, matching the operation elements `confcore-server`'s
//! built-in handlers are registered against.

use anyhow::{Context, Result};

use confcore_core::datastore::persist;
use confcore_model::Node;

use crate::cli::Command;

fn param(name: &str, value: &str) -> Node {
    Node::leaf(name, value)
}

fn envelope(operation: Node) -> Node {
    let mut rpc = Node::element("rpc");
    rpc.set_attribute("xmlns", confcore_contracts::BASE_NAMESPACE);
    rpc.children.push(operation);
    rpc
}

/// Parses `path`'s contents as the `<filter>` element to embed in a
/// `get`/`get-config` request, if a filter file was given at all.
fn read_filter(path: Option<&std::path::Path>) -> Result<Option<Node>> {
    let Some(path) = path else { return Ok(None) };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let filter = persist::read_xml(&raw).context("parsing filter file")?;
    if filter.name != "filter" {
        anyhow::bail!("{} must be rooted at <filter>, found <{}>", path.display(), filter.name);
    }
    Ok(Some(filter))
}

pub fn build_envelope(command: &Command) -> Result<Node> {
    let operation = match command {
        Command::Get { db, xpath, filter_file } => {
            let mut op = Node::element("get");
            op.children.push(param("db", db));
            op.children.push(param("xpath", xpath));
            if let Some(filter) = read_filter(filter_file.as_deref())? {
                op.children.push(filter);
            }
            op
        }
        Command::GetConfig { db, xpath, filter_file } => {
            let mut op = Node::element("get-config");
            op.children.push(param("db", db));
            op.children.push(param("xpath", xpath));
            if let Some(filter) = read_filter(filter_file.as_deref())? {
                op.children.push(filter);
            }
            op
        }
        Command::EditConfig { db, config_file, default_operation } => {
            let raw = std::fs::read_to_string(config_file)
                .with_context(|| format!("reading {}", config_file.display()))?;
            let config = persist::read_xml(&raw).context("parsing config file")?;
            if config.name != "config" {
                anyhow::bail!("{} must be rooted at <config>, found <{}>", config_file.display(), config.name);
            }

            let mut op = Node::element("edit-config");
            op.children.push(param("db", db));
            op.children.push(param("default-operation", default_operation));
            op.children.push(config);
            op
        }
        Command::Lock { db } => {
            let mut op = Node::element("lock");
            op.children.push(param("db", db));
            op
        }
        Command::Unlock { db } => {
            let mut op = Node::element("unlock");
            op.children.push(param("db", db));
            op
        }
        Command::CopyConfig { source, target } => {
            let mut op = Node::element("copy-config");
            op.children.push(param("source", source));
            op.children.push(param("target", target));
            op
        }
    };

    Ok(envelope(operation))
}

//! Command-line surface for the confcore management client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "confcore-config")]
#[command(about = "confcore management CLI: frames a request, sends it over the IPC socket, prints the reply")]
pub struct Cli {
    /// `AF_UNIX` socket the back-end is listening on.
    #[arg(long, env = "CONFCORE_SOCKET", default_value = "/var/run/confcore/confcore.sock")]
    pub socket: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Retrieves configuration and operational data from a datastore.
    Get {
        #[arg(long)]
        db: String,
        /// XPath expression selecting the subtree to return; `/` for the whole tree.
        #[arg(long, default_value = "/")]
        xpath: String,
        /// XML file holding an RFC 6241 §6 subtree filter to apply to the result.
        #[arg(long)]
        filter_file: Option<PathBuf>,
    },
    /// Retrieves configuration data only (operational nodes pruned) from a datastore.
    GetConfig {
        #[arg(long)]
        db: String,
        #[arg(long, default_value = "/")]
        xpath: String,
        #[arg(long)]
        filter_file: Option<PathBuf>,
    },
    /// Merges, replaces, or deletes configuration in a datastore.
    EditConfig {
        #[arg(long)]
        db: String,
        /// XML file holding the `<config>`-rooted tree to apply.
        #[arg(long)]
        config_file: PathBuf,
        /// `merge` (default), `replace`, or `none`.
        #[arg(long, default_value = "merge")]
        default_operation: String,
    },
    /// Locks a datastore for this client's exclusive use.
    Lock {
        #[arg(long)]
        db: String,
    },
    /// Releases a lock this client holds on a datastore.
    Unlock {
        #[arg(long)]
        db: String,
    },
    /// Copies one datastore's contents into another.
    CopyConfig {
        #[arg(long)]
        source: String,
        #[arg(long)]
        target: String,
    },
}

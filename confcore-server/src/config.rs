//! Process-level configuration for the confcore back-end.
//!
//! Loaded in increasing precedence: built-in defaults, an optional TOML
//! file, environment variables (via `dotenvy`, loaded before `clap`
//! parses), then CLI flags. Mirrors the option surface of the datastore
//! engine's `set-option` (`schema`, `dir`, `cache`, `format`, `pretty`)
//! plus the process-level options spec.md §6 implies (socket path,
//! socket group, plugin directory).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command-line surface. Every field is optional here: a value left
/// unset falls through to the TOML file, then the environment, then the
/// built-in default in [`ServerConfig::default`].
#[derive(Parser, Debug)]
#[command(name = "confcore-server")]
#[command(about = "confcore back-end: event loop, IPC/NETCONF front-ends, datastore engine")]
pub struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "CONFCORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the `<name>_db` per-database files.
    #[arg(long, env = "CONFCORE_DIR")]
    pub dir: Option<PathBuf>,

    /// Path to a confcore schema-bootstrap JSON document (see
    /// `confcore_model::MapSchema::load_json`). Omit to run with the
    /// empty `NullSchema` oracle.
    #[arg(long, env = "CONFCORE_SCHEMA")]
    pub schema: Option<PathBuf>,

    /// `AF_UNIX` socket path the IPC front-end listens on.
    #[arg(long, env = "CONFCORE_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Group name the IPC socket's permission-denied diagnostic refers
    /// to; purely informational, set to whatever group actually owns the
    /// socket in deployment.
    #[arg(long, env = "CONFCORE_SOCKET_GROUP")]
    pub socket_group: Option<String>,

    /// Directory the plugin registry discovers dynamic modules in.
    #[arg(long, env = "CONFCORE_PLUGIN_DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// On-disk format: `xml` or `json`.
    #[arg(long, env = "CONFCORE_FORMAT")]
    pub format: Option<String>,

    /// Pretty-print persisted trees.
    #[arg(long, env = "CONFCORE_PRETTY")]
    pub pretty: Option<bool>,

    /// `RUST_LOG`-style filter directive; falls back to `RUST_LOG` itself
    /// when unset.
    #[arg(long, env = "CONFCORE_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// TOML-file shape. Every field optional; absent fields leave the
/// built-in default (or a lower-precedence layer) in place.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    dir: Option<PathBuf>,
    schema: Option<PathBuf>,
    socket: Option<PathBuf>,
    socket_group: Option<String>,
    plugin_dir: Option<PathBuf>,
    format: Option<String>,
    pretty: Option<bool>,
    log_level: Option<String>,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub dir: PathBuf,
    pub schema: Option<PathBuf>,
    pub socket: PathBuf,
    pub socket_group: Option<String>,
    pub plugin_dir: Option<PathBuf>,
    pub format: String,
    pub pretty: bool,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./confcore-data"),
            schema: None,
            socket: PathBuf::from("/var/run/confcore/confcore.sock"),
            socket_group: None,
            plugin_dir: None,
            format: "xml".to_string(),
            pretty: true,
            log_level: "confcore_server=info,confcore_core=info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads and merges all four layers for `args`, which the caller has
    /// already parsed (so it can report `clap` usage errors before
    /// touching the filesystem).
    pub fn load(args: Args) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        let file_path = args.config.clone();
        if let Some(path) = file_path.as_deref() {
            config.merge_file(path)?;
        }

        config.merge_args(args);
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file: FileConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;

        if let Some(dir) = file.dir {
            self.dir = dir;
        }
        if file.schema.is_some() {
            self.schema = file.schema;
        }
        if let Some(socket) = file.socket {
            self.socket = socket;
        }
        if file.socket_group.is_some() {
            self.socket_group = file.socket_group;
        }
        if file.plugin_dir.is_some() {
            self.plugin_dir = file.plugin_dir;
        }
        if let Some(format) = file.format {
            self.format = format;
        }
        if let Some(pretty) = file.pretty {
            self.pretty = pretty;
        }
        if let Some(log_level) = file.log_level {
            self.log_level = log_level;
        }
        Ok(())
    }

    fn merge_args(&mut self, args: Args) {
        if let Some(dir) = args.dir {
            self.dir = dir;
        }
        if args.schema.is_some() {
            self.schema = args.schema;
        }
        if let Some(socket) = args.socket {
            self.socket = socket;
        }
        if args.socket_group.is_some() {
            self.socket_group = args.socket_group;
        }
        if args.plugin_dir.is_some() {
            self.plugin_dir = args.plugin_dir;
        }
        if let Some(format) = args.format {
            self.format = format;
        }
        if let Some(pretty) = args.pretty {
            self.pretty = pretty;
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with_config(path: PathBuf) -> Args {
        Args {
            config: Some(path),
            dir: None,
            schema: None,
            socket: None,
            socket_group: None,
            plugin_dir: None,
            format: None,
            pretty: None,
            log_level: None,
        }
    }

    #[test]
    fn file_layer_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("confcore.toml");
        std::fs::write(&config_path, "dir = \"/from/file\"\nformat = \"json\"\n").unwrap();

        let mut args = args_with_config(config_path);
        args.dir = Some(PathBuf::from("/from/cli"));

        let config = ServerConfig::load(args).unwrap();
        assert_eq!(config.dir, PathBuf::from("/from/cli"), "CLI must win over the file");
        assert_eq!(config.format, "json", "file layer must win over the built-in default");
        assert!(config.pretty, "default pretty carries through when neither layer sets it");
    }

    #[test]
    fn defaults_apply_with_no_file_or_cli_overrides() {
        let args = Args {
            config: None,
            dir: None,
            schema: None,
            socket: None,
            socket_group: None,
            plugin_dir: None,
            format: None,
            pretty: None,
            log_level: None,
        };
        let config = ServerConfig::load(args).unwrap();
        assert_eq!(config.format, "xml");
        assert_eq!(config.socket, PathBuf::from("/var/run/confcore/confcore.sock"));
    }
}

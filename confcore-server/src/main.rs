//! confcore back-end process entry point.
//!
//! Bootstraps configuration and logging, then wires the C7 datastore
//! engine, the C5 plugin registry, the C4 RPC dispatch table, and the
//! C3 IPC transport into the C2 event loop before handing control to
//! [`Dispatcher::run`].

mod config;
mod handlers;
mod ipc_session;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use confcore_core::event::{Dispatcher, SignalAction};
use confcore_core::transport::bind_unix_listener;
use confcore_core::{Engine, RpcDispatch};
use confcore_model::{DynSchemaOracle, MapSchema, NullSchema};

use config::{Args, ServerConfig};
use handlers::CurrentOwner;
use ipc_session::{CloseQueue, PendingRegistrations};

/// Filename pattern dynamic plugins are discovered under (spec.md
/// §4.5's `init`-symbol convention, mirrored here as a plain shared
/// object suffix rather than a platform-specific extension list).
const PLUGIN_FILE_PATTERN: &str = r"\.so$";
const PLUGIN_INIT_SYMBOL: &str = "confcore_plugin_init";

fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(args).context("loading configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(dir = %config.dir.display(), socket = %config.socket.display(), "confcore-server starting");

    let schema: DynSchemaOracle = match &config.schema {
        Some(path) => Arc::new(MapSchema::load_json(path).context("loading schema document")?),
        None => {
            tracing::warn!("no schema document configured; running with the empty NullSchema oracle");
            Arc::new(NullSchema)
        }
    };

    let mut engine = Engine::connect(&config.dir, schema.clone()).context("connecting datastore engine")?;
    let format = confcore_core::datastore::parse_format(&config.format)
        .ok_or_else(|| anyhow::anyhow!("unrecognised format: {}", config.format))?;
    engine.set_option("format", confcore_core::datastore::OptionValue::Format(format))?;
    engine.set_option("pretty", confcore_core::datastore::OptionValue::Pretty(config.pretty))?;
    let engine = Arc::new(engine);

    for db in ["running", "candidate", "startup"] {
        if !engine.exists(db) {
            engine.create(db).context("bootstrapping built-in database")?;
        }
    }

    let mut plugins = confcore_core::plugin::PluginRegistry::new();
    if let Some(plugin_dir) = &config.plugin_dir {
        let pattern = regex::Regex::new(PLUGIN_FILE_PATTERN).expect("static pattern");
        match confcore_core::plugin::discover(plugin_dir, &pattern) {
            Ok(paths) => {
                for path in paths {
                    // SAFETY: every discovered path matched the plugin
                    // directory convention this deployment controls.
                    match unsafe { plugins.load_dynamic(&path, PLUGIN_INIT_SYMBOL) } {
                        Ok(name) => tracing::info!(plugin = name, path = %path.display(), "plugin loaded"),
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to load plugin"),
                    }
                }
            }
            Err(e) => tracing::warn!(dir = %plugin_dir.display(), error = %e, "plugin discovery failed"),
        }
    }
    plugins.start_all().context("starting plugins")?;
    plugins.run_extension_hooks(schema.as_ref()).context("running plugin extension hooks")?;

    let current_owner = CurrentOwner::new();
    let mut dispatch = RpcDispatch::new();
    handlers::register_builtin_handlers(&mut dispatch, engine.clone(), current_owner.clone());
    let dispatch = Arc::new(Mutex::new(dispatch));

    let mut dispatcher = Dispatcher::new().context("creating event dispatcher")?;
    dispatcher.install_signal(signal_hook::consts::SIGINT, SignalAction::Exit)?;
    dispatcher.install_signal(signal_hook::consts::SIGTERM, SignalAction::Exit)?;
    dispatcher.install_signal(signal_hook::consts::SIGCHLD, SignalAction::Child)?;

    let listener = bind_unix_listener(&config.socket).context("binding IPC socket")?;
    tracing::info!(socket = %config.socket.display(), "listening for IPC connections");

    let pending = PendingRegistrations::new();
    let close_queue = CloseQueue::new();
    ipc_session::listen(&mut dispatcher, listener, dispatch, current_owner, pending.clone(), close_queue.clone())?;

    let exit_flags = dispatcher.exit_flags().expect("signal handling installed above");
    loop {
        if exit_flags.tick() == 1 {
            break;
        }
        dispatcher.run_iteration()?;
        pending.drain(&mut dispatcher)?;
        close_queue.drain(&mut dispatcher, &engine);
    }

    plugins.exit_all();
    tracing::info!("confcore-server shut down");
    Ok(())
}

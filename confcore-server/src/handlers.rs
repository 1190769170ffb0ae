//! Built-in RPC handlers wired into [`confcore_core::RpcDispatch`] against
//! the datastore engine (C4 routing to C7). One operation element per
//! handler: `get`, `get-config`, `edit-config`, `lock`, `unlock`,
//! `copy-config`, all registered under [`confcore_contracts::BASE_NAMESPACE`].
//!
//! The lock/unlock handlers need the calling session's owner id, which
//! lives at the transport layer (the IPC frame header's `session-id`),
//! not in the operation element itself. [`CurrentOwner`] is a one-slot
//! cell the IPC session loop sets immediately before each
//! `RpcDispatch::call`, safe because the event dispatcher is
//! single-threaded and cooperative (spec.md §5): no two calls are ever
//! in flight at once.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::instrument;

use confcore_contracts::{Category, ConfcoreError, OwnerId, Result};
use confcore_core::{datastore::persist, filter, Engine, Op, RpcDispatch};
use confcore_model::Node;

/// Shared one-slot cell carrying the requesting session's owner id for
/// the duration of a single `RpcDispatch::call`.
#[derive(Clone, Default)]
pub struct CurrentOwner(Arc<Mutex<OwnerId>>);

impl CurrentOwner {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(OwnerId::UNLOCKED)))
    }

    pub fn set(&self, owner: OwnerId) {
        *self.0.lock() = owner;
    }

    pub fn get(&self) -> OwnerId {
        *self.0.lock()
    }
}

fn child_text<'a>(op: &'a Node, name: &str) -> Option<&'a str> {
    op.children.iter().find(|c| c.name == name).and_then(|c| c.body.as_deref())
}

fn child_element<'a>(op: &'a Node, name: &str) -> Option<&'a Node> {
    op.children.iter().find(|c| c.name == name)
}

fn required_text<'a>(op: &'a Node, name: &str) -> Result<&'a str> {
    child_text(op, name).ok_or_else(|| ConfcoreError::new(Category::Proto, format!("missing <{name}>")))
}

/// Registers the built-in operations against `dispatch`. `engine` is
/// shared with every handler; `current_owner` is threaded through by the
/// IPC session loop.
pub fn register_builtin_handlers(dispatch: &mut RpcDispatch, engine: Arc<Engine>, current_owner: CurrentOwner) {
    register_get(dispatch, engine.clone(), false);
    register_get(dispatch, engine.clone(), true);
    register_edit_config(dispatch, engine.clone());
    register_lock(dispatch, engine.clone(), current_owner.clone(), true);
    register_lock(dispatch, engine.clone(), current_owner, false);
    register_copy_config(dispatch, engine);
}

fn register_get(dispatch: &mut RpcDispatch, engine: Arc<Engine>, config_only_operation: bool) {
    let (local_name, label): (&'static str, &'static str) =
        if config_only_operation { ("get-config", "builtin-get-config") } else { ("get", "builtin-get") };

    dispatch.register(
        confcore_contracts::BASE_NAMESPACE,
        local_name,
        label,
        Box::new(move |op, response| get_impl(&engine, op, response, config_only_operation)),
    );
}

#[instrument(skip(engine, response), fields(db))]
fn get_impl(engine: &Engine, op: &Node, response: &mut String, force_config_only: bool) -> Result<()> {
    let db = required_text(op, "db")?;
    tracing::Span::current().record("db", db);
    let xpath = child_text(op, "xpath").unwrap_or("/");
    let config_only = force_config_only || child_text(op, "config-only").map(|v| v == "true").unwrap_or(false);

    let mut tree = engine.get(db, xpath, config_only)?;
    if let Some(filter_tree) = child_element(op, "filter") {
        filter::apply(&mut tree, filter_tree);
    }

    let xml = persist::write_xml(&tree, false)?;
    response.push_str(&xml);
    tracing::debug!(db, xpath, config_only, "get served");
    Ok(())
}

fn register_edit_config(dispatch: &mut RpcDispatch, engine: Arc<Engine>) {
    dispatch.register(
        confcore_contracts::BASE_NAMESPACE,
        "edit-config",
        "builtin-edit-config",
        Box::new(move |op, response| edit_config_impl(&engine, op, response)),
    );
}

#[instrument(skip(engine, response), fields(db))]
fn edit_config_impl(engine: &Engine, op: &Node, response: &mut String) -> Result<()> {
    let db = required_text(op, "db")?;
    tracing::Span::current().record("db", db);
    let default_op = match child_text(op, "default-operation") {
        Some(raw) => Op::parse(raw)
            .ok_or_else(|| ConfcoreError::new(Category::Proto, format!("unrecognised default-operation: {raw}")))?,
        None => Op::Merge,
    };
    let tree = child_element(op, "config")
        .ok_or_else(|| ConfcoreError::new(Category::Proto, "edit-config requires a <config> element"))?;

    engine.put(db, default_op, tree)?;
    response.push_str("<ok/>");
    tracing::info!(db, "edit-config applied");
    Ok(())
}

fn register_lock(dispatch: &mut RpcDispatch, engine: Arc<Engine>, current_owner: CurrentOwner, is_lock: bool) {
    let (local_name, label): (&'static str, &'static str) =
        if is_lock { ("lock", "builtin-lock") } else { ("unlock", "builtin-unlock") };

    dispatch.register(
        confcore_contracts::BASE_NAMESPACE,
        local_name,
        label,
        Box::new(move |op, response| lock_impl(&engine, &current_owner, op, response, is_lock)),
    );
}

#[instrument(skip(engine, current_owner, response), fields(db))]
fn lock_impl(engine: &Engine, current_owner: &CurrentOwner, op: &Node, response: &mut String, is_lock: bool) -> Result<()> {
    let db = required_text(op, "db")?;
    tracing::Span::current().record("db", db);
    let owner = current_owner.get();

    if is_lock {
        engine.lock(db, owner)?;
        tracing::info!(db, owner = %owner, "database locked");
    } else {
        engine.unlock(db)?;
        tracing::info!(db, owner = %owner, "database unlocked");
    }
    response.push_str("<ok/>");
    Ok(())
}

fn register_copy_config(dispatch: &mut RpcDispatch, engine: Arc<Engine>) {
    dispatch.register(
        confcore_contracts::BASE_NAMESPACE,
        "copy-config",
        "builtin-copy-config",
        Box::new(move |op, response| copy_config_impl(&engine, op, response)),
    );
}

#[instrument(skip(engine, response))]
fn copy_config_impl(engine: &Engine, op: &Node, response: &mut String) -> Result<()> {
    let source = required_text(op, "source")?;
    let target = required_text(op, "target")?;
    engine.copy(source, target)?;
    response.push_str("<ok/>");
    tracing::info!(source, target, "copy-config applied");
    Ok(())
}

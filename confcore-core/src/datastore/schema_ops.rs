//! Schema-driven tree operations shared by `get`'s projection and
//! `put`'s post-processing: default application, canonical child
//! ordering, and operational-node pruning.

use confcore_model::{Node, SchemaOracle, StmtKind};

/// Inserts a leaf carrying the schema default for every child statement
/// declared (via [`SchemaOracle::child_order`]) but absent from `node`,
/// then recurses into every existing child. Called only on `get`'s
/// projected result, never on the authoritative cache.
pub fn apply_defaults(node: &mut Node, path: &mut Vec<String>, oracle: &dyn SchemaOracle) {
    let path_refs: Vec<&str> = path.iter().map(String::as_str).collect();
    if let Ok(order) = oracle.child_order(&path_refs) {
        for name in &order {
            if node.children.iter().any(|c| &c.name == name) {
                continue;
            }
            path.push(name.clone());
            let child_refs: Vec<&str> = path.iter().map(String::as_str).collect();
            if let Ok(schema) = oracle.resolve(&child_refs) {
                if matches!(schema.stmt, StmtKind::Leaf) {
                    if let Some(default) = schema.default.clone() {
                        let mut leaf = Node::leaf(name.clone(), default);
                        leaf.schema = Some(schema);
                        node.children.push(leaf);
                    }
                }
            }
            path.pop();
        }
    }
    for child in &mut node.children {
        path.push(child.name.clone());
        apply_defaults(child, path, oracle);
        path.pop();
    }
}

/// Reorders `node`'s children to the schema's canonical order, stable
/// for any child not named in `child_order` (sorted after all named
/// children, relative order preserved).
pub fn reorder_children(node: &mut Node, path: &mut Vec<String>, oracle: &dyn SchemaOracle) {
    let path_refs: Vec<&str> = path.iter().map(String::as_str).collect();
    if let Ok(order) = oracle.child_order(&path_refs) {
        node.children.sort_by_key(|c| order.iter().position(|n| n == &c.name).unwrap_or(order.len()));
    }
    for child in &mut node.children {
        path.push(child.name.clone());
        reorder_children(child, path, oracle);
        path.pop();
    }
}

/// Removes every descendant whose schema marks it non-configuration
/// (`config false`), for `get(db, xpath, config_only=true)`.
pub fn prune_operational(node: &mut Node) {
    node.children.retain(|c| c.schema.as_ref().map(|s| s.config).unwrap_or(true));
    for child in &mut node.children {
        prune_operational(child);
    }
}

/// `put` post-processing step 3: a non-presence container exists only
/// to frame its children, so once emptied by merge it must not persist.
/// Bottom-up so a container left empty by its own children's pruning is
/// caught in the same pass.
pub fn prune_empty_non_presence_containers(node: &mut Node) {
    for child in &mut node.children {
        prune_empty_non_presence_containers(child);
    }
    node.children.retain(|c| {
        let is_empty_framing_container = c
            .schema
            .as_ref()
            .map(|s| matches!(s.stmt, StmtKind::Container) && !s.presence)
            .unwrap_or(false)
            && c.children.is_empty();
        !is_empty_framing_container
    });
}

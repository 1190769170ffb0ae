//! `put`'s tree-merge algorithm (spec.md §4.7, RFC 6241 `edit-config`).

use confcore_contracts::{Category, ConfcoreError, Result};
use confcore_model::{Flags, Node, SchemaOracle, SchemaRef, StmtKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    #[default]
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
    None,
}

impl Op {
    pub fn parse(raw: &str) -> Option<Op> {
        match raw {
            "merge" => Some(Op::Merge),
            "replace" => Some(Op::Replace),
            "create" => Some(Op::Create),
            "delete" => Some(Op::Delete),
            "remove" => Some(Op::Remove),
            "none" => Some(Op::None),
            _ => None,
        }
    }
}

/// Merges `incoming` (whose root must already be known to be named
/// `config`) into `existing_root` under `default_op`.
pub fn merge_into(
    existing_root: &mut Node,
    incoming_root: &Node,
    default_op: Op,
    oracle: &dyn SchemaOracle,
) -> Result<()> {
    if incoming_root.children.is_empty() && matches!(default_op, Op::Replace | Op::Delete) {
        if matches!(default_op, Op::Delete) && existing_root.children.is_empty() {
            return Err(ConfcoreError::new(Category::Xml, "delete on an already-empty datastore"));
        }
        existing_root.children.clear();
        return Ok(());
    }
    let mut path = Vec::new();
    merge_children(existing_root, incoming_root, default_op, &mut path, oracle)
}

fn merge_children(
    existing: &mut Node,
    incoming: &Node,
    default_op: Op,
    path: &mut Vec<String>,
    oracle: &dyn SchemaOracle,
) -> Result<()> {
    struct Plan {
        op: Op,
        schema: SchemaRef,
    }

    // Pass 1: resolve schema + effective operation for every incoming
    // child under a shared borrow only — no mutation of `existing` yet.
    let mut plans = Vec::with_capacity(incoming.children.len());
    for child in &incoming.children {
        path.push(child.name.clone());
        let path_refs: Vec<&str> = path.iter().map(String::as_str).collect();
        let schema = oracle
            .resolve(&path_refs)
            .map_err(|e| ConfcoreError::new(Category::Yang, e.to_string()))?;
        path.pop();
        let op = child.attribute("operation").and_then(Op::parse).unwrap_or(default_op);
        plans.push(Plan { op, schema });
    }

    // Pass 2: apply mutations. Each plan re-locates its match by
    // identity rather than a pass-1 index, since incoming's own
    // siblings are identity-unique and so cannot shadow one another's
    // matches as earlier plans mutate `existing`.
    for (child, plan) in incoming.children.iter().zip(plans) {
        path.push(child.name.clone());
        match plan.schema.stmt {
            StmtKind::Leaf | StmtKind::LeafList => apply_leaf(existing, child, plan.op, &plan.schema)?,
            StmtKind::Container | StmtKind::List | StmtKind::Anyxml => {
                apply_subtree(existing, child, plan.op, &plan.schema, path, oracle)?
            }
        }
        path.pop();
    }
    Ok(())
}

fn identity<'a>(node: &'a Node, keys: &[String]) -> (&'a str, Vec<(&'a str, &'a str)>) {
    let tuple = keys
        .iter()
        .filter_map(|k| {
            node.children.iter().find(|c| &c.name == k).and_then(|c| c.body.as_deref()).map(|v| (k.as_str(), v))
        })
        .collect();
    (node.name.as_str(), tuple)
}

fn find_existing(parent: &Node, incoming_child: &Node, keys: &[String]) -> Option<usize> {
    let wanted = identity(incoming_child, keys);
    parent.children.iter().position(|c| identity(c, keys) == wanted)
}

fn apply_leaf(parent: &mut Node, incoming: &Node, op: Op, schema: &SchemaRef) -> Result<()> {
    let existing_idx = find_existing(parent, incoming, &schema.keys);
    match op {
        Op::Create => {
            if existing_idx.is_some() {
                return Err(ConfcoreError::new(Category::Xml, format!("create of existing leaf {}", incoming.name)));
            }
            let mut node = incoming.clone();
            node.schema = Some(schema.clone());
            node.flags = Flags::empty();
            node.attributes.retain(|a| a.name != "operation");
            parent.children.push(node);
        }
        Op::Merge | Op::Replace | Op::None => match existing_idx {
            Some(i) => {
                if op != Op::None {
                    if let Some(body) = &incoming.body {
                        parent.children[i].body = Some(body.clone());
                    }
                }
                if op == Op::None {
                    parent.children[i].flags.insert(Flags::NONE);
                } else {
                    parent.children[i].flags.remove(Flags::NONE);
                }
            }
            None => {
                let mut node = incoming.clone();
                node.schema = Some(schema.clone());
                node.attributes.retain(|a| a.name != "operation");
                node.flags = if op == Op::None { Flags::NONE } else { Flags::empty() };
                parent.children.push(node);
            }
        },
        Op::Delete => match existing_idx {
            Some(i) => {
                parent.children.remove(i);
            }
            None => return Err(ConfcoreError::new(Category::Xml, format!("delete of absent leaf {}", incoming.name))),
        },
        Op::Remove => {
            if let Some(i) = existing_idx {
                parent.children.remove(i);
            }
        }
    }
    Ok(())
}

fn apply_subtree(
    parent: &mut Node,
    incoming: &Node,
    op: Op,
    schema: &SchemaRef,
    path: &mut Vec<String>,
    oracle: &dyn SchemaOracle,
) -> Result<()> {
    let existing_idx = find_existing(parent, incoming, &schema.keys);
    match op {
        Op::Create => {
            if existing_idx.is_some() {
                return Err(ConfcoreError::new(Category::Xml, format!("create of existing node {}", incoming.name)));
            }
            insert_and_fill(parent, incoming, schema, path, oracle, Flags::empty())
        }
        Op::Replace => {
            if let Some(i) = existing_idx {
                parent.children.remove(i);
            }
            insert_and_fill(parent, incoming, schema, path, oracle, Flags::empty())
        }
        Op::Merge | Op::None => {
            let none_flag = if op == Op::None { Flags::NONE } else { Flags::empty() };
            if matches!(schema.stmt, StmtKind::Anyxml) {
                match existing_idx {
                    Some(i) => {
                        parent.children[i].body = incoming.body.clone();
                        parent.children[i].children = incoming.children.clone();
                    }
                    None => {
                        let mut node = incoming.clone();
                        node.schema = Some(schema.clone());
                        node.attributes.retain(|a| a.name != "operation");
                        parent.children.push(node);
                    }
                }
                return Ok(());
            }
            match existing_idx {
                Some(i) => merge_children(&mut parent.children[i], incoming, Op::Merge, path, oracle),
                None => insert_and_fill(parent, incoming, schema, path, oracle, none_flag),
            }
        }
        Op::Delete => match existing_idx {
            Some(i) => {
                parent.children.remove(i);
                Ok(())
            }
            None => Err(ConfcoreError::new(Category::Xml, format!("delete of absent node {}", incoming.name))),
        },
        Op::Remove => {
            if let Some(i) = existing_idx {
                parent.children.remove(i);
            }
            Ok(())
        }
    }
}

/// Creates a fresh `x0` shell for `incoming` and fills it: a one-shot
/// copy for `anyxml`, a recursive merge of every child otherwise.
fn insert_and_fill(
    parent: &mut Node,
    incoming: &Node,
    schema: &SchemaRef,
    path: &mut Vec<String>,
    oracle: &dyn SchemaOracle,
    extra_flags: Flags,
) -> Result<()> {
    let mut node = Node::element(incoming.name.clone());
    node.schema = Some(schema.clone());
    node.attributes = incoming.attributes.iter().filter(|a| a.name != "operation").cloned().collect();
    node.flags = extra_flags;

    if matches!(schema.stmt, StmtKind::Anyxml) {
        node.body = incoming.body.clone();
        node.children = incoming.children.clone();
        parent.children.push(node);
        return Ok(());
    }

    parent.children.push(node);
    let idx = parent.children.len() - 1;
    merge_children(&mut parent.children[idx], incoming, Op::Merge, path, oracle)
}

/// Post-processing step 1: drop any node still flagged `NONE` whose
/// entire subtree is also empty-and-`NONE` (bottom-up, so a parent only
/// qualifies once its own descendants have already been dropped).
pub fn prune_none_subtrees(node: &mut Node) {
    for child in &mut node.children {
        prune_none_subtrees(child);
    }
    node.children.retain(|c| !(c.flags.contains(Flags::NONE) && c.children.is_empty()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use confcore_model::{MapSchema, StmtKind};

    fn iface_schema() -> MapSchema {
        MapSchema::new()
            .with_node(&["interface"], SchemaRef::new(StmtKind::List).with_keys(vec!["name".into()]))
            .with_node(&["interface", "name"], SchemaRef::new(StmtKind::Leaf))
            .with_node(&["interface", "mtu"], SchemaRef::new(StmtKind::Leaf))
            .with_order(&["interface"], vec!["name".into(), "mtu".into()])
    }

    fn iface_entry(name: &str, mtu: &str) -> Node {
        let mut entry = Node::element("interface");
        entry.children.push(Node::leaf("name", name));
        entry.children.push(Node::leaf("mtu", mtu));
        entry
    }

    #[test]
    fn leaf_replace_via_merge() {
        let schema = iface_schema();
        let mut existing = Node::config_root();
        existing.children.push(iface_entry("e0", "1500"));

        let mut incoming = Node::config_root();
        incoming.children.push(iface_entry("e0", "9000"));

        merge_into(&mut existing, &incoming, Op::Merge, &schema).unwrap();

        let mtu = existing.children[0].children.iter().find(|c| c.name == "mtu").unwrap();
        assert_eq!(mtu.body.as_deref(), Some("9000"));
    }

    #[test]
    fn create_of_existing_leaf_is_an_error() {
        let schema = iface_schema();
        let mut existing = Node::config_root();
        existing.children.push(iface_entry("e0", "1500"));

        let mut mtu = Node::leaf("mtu", "9000");
        mtu.set_attribute("operation", "create");
        let mut entry = Node::element("interface");
        entry.children.push(Node::leaf("name", "e0"));
        entry.children.push(mtu);
        let mut incoming = Node::config_root();
        incoming.children.push(entry);

        assert!(merge_into(&mut existing, &incoming, Op::Merge, &schema).is_err());
    }

    #[test]
    fn delete_of_absent_node_is_an_error() {
        let schema = iface_schema();
        let mut existing = Node::config_root();

        let mut entry = Node::element("interface");
        entry.set_attribute("operation", "delete");
        entry.children.push(Node::leaf("name", "e0"));
        let mut incoming = Node::config_root();
        incoming.children.push(entry);

        assert!(merge_into(&mut existing, &incoming, Op::Merge, &schema).is_err());
    }

    #[test]
    fn top_level_replace_with_empty_input_clears_everything() {
        let schema = iface_schema();
        let mut existing = Node::config_root();
        existing.children.push(iface_entry("e0", "1500"));

        let incoming = Node::config_root();
        merge_into(&mut existing, &incoming, Op::Replace, &schema).unwrap();
        assert!(existing.children.is_empty());
    }

    #[test]
    fn delete_on_already_empty_tree_is_an_error() {
        let schema = iface_schema();
        let mut existing = Node::config_root();
        let incoming = Node::config_root();
        assert!(merge_into(&mut existing, &incoming, Op::Delete, &schema).is_err());
    }

    #[test]
    fn none_container_with_no_real_content_is_garbage_collected() {
        let schema = MapSchema::new()
            .with_node(&["settings"], SchemaRef::new(StmtKind::Container));
        let mut existing = Node::config_root();

        let mut settings = Node::element("settings");
        settings.set_attribute("operation", "none");
        let mut incoming = Node::config_root();
        incoming.children.push(settings);

        merge_into(&mut existing, &incoming, Op::Merge, &schema).unwrap();
        assert!(existing.children[0].flags.contains(Flags::NONE));

        prune_none_subtrees(&mut existing);
        assert!(existing.children.is_empty(), "empty NONE scaffolding container should be collected");
    }

    #[test]
    fn none_op_on_existing_leaf_leaves_its_value_untouched() {
        let schema = iface_schema();
        let mut existing = Node::config_root();
        existing.children.push(iface_entry("e0", "1500"));

        let mut mtu = Node::leaf("mtu", "9000");
        mtu.set_attribute("operation", "none");
        let mut entry = Node::element("interface");
        entry.children.push(Node::leaf("name", "e0"));
        entry.children.push(mtu);
        let mut incoming = Node::config_root();
        incoming.children.push(entry);

        merge_into(&mut existing, &incoming, Op::Merge, &schema).unwrap();
        let mtu_node = existing.children[0].children.iter().find(|c| c.name == "mtu").unwrap();
        assert_eq!(mtu_node.body.as_deref(), Some("1500"), "none must not update the existing value");
        assert!(mtu_node.flags.contains(Flags::NONE));
    }
}

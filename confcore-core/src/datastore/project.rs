//! `get`'s marked-tree projection (spec.md §4.7 steps 3-5): mark the
//! XPath node-set and its ancestor chain, then copy only what's marked
//! into a fresh tree, preserving list key leaves along the way.

use confcore_model::{Flags, Node};

/// Marks the node reached by `path` (a sequence of child indices from
/// `root`) with `MARK`, and every node on the way there with `CHANGE`.
pub fn mark_path(node: &mut Node, path: &[usize]) {
    match path.split_first() {
        None => node.flags.insert(Flags::MARK),
        Some((&index, rest)) => {
            node.flags.insert(Flags::CHANGE);
            mark_path(&mut node.children[index], rest);
        }
    }
}

/// Marks every top-level child with `MARK` directly — the `get(/)`
/// "select everything" case.
pub fn mark_everything(root: &mut Node) {
    for child in &mut root.children {
        child.flags.insert(Flags::MARK);
    }
}

/// Builds the projected result tree from a marked `root`, leaving
/// `root` untouched here (the caller resets its flags separately, per
/// spec.md §4.7 step 5).
pub fn project(root: &Node) -> Node {
    let mut result = Node::config_root();
    for child in &root.children {
        if child.flags.contains(Flags::MARK) || child.flags.contains(Flags::CHANGE) {
            result.children.push(project_node(child));
        }
    }
    result
}

fn project_node(node: &Node) -> Node {
    if node.flags.contains(Flags::MARK) {
        let mut copy = node.clone();
        copy.recursively_clear_flags(Flags::MARK | Flags::CHANGE | Flags::NONE);
        return copy;
    }

    let mut copy = node.clone();
    copy.children.clear();
    copy.flags = Flags::empty();

    let is_list_entry = node.is_list();
    for child in &node.children {
        let selected = child.flags.contains(Flags::MARK) || child.flags.contains(Flags::CHANGE);
        let is_key_leaf = is_list_entry
            && node.schema.as_ref().map(|s| s.keys.iter().any(|k| k == &child.name)).unwrap_or(false);
        if selected {
            copy.children.push(project_node(child));
        } else if is_key_leaf {
            let mut key_copy = child.clone();
            key_copy.recursively_clear_flags(Flags::MARK | Flags::CHANGE | Flags::NONE);
            copy.children.push(key_copy);
        }
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use confcore_model::{SchemaRef, StmtKind};

    fn list_entry(name_value: &str, mtu_value: &str) -> Node {
        let mut entry = Node::element("interface");
        entry.schema = Some(SchemaRef::new(StmtKind::List).with_keys(vec!["name".into()]));
        entry.children.push(Node::leaf("name", name_value));
        entry.children.push(Node::leaf("mtu", mtu_value));
        entry
    }

    #[test]
    fn marking_whole_tree_copies_everything() {
        let mut root = Node::config_root();
        root.children.push(Node::leaf("hostname", "r1"));
        mark_everything(&mut root);
        let projected = project(&root);
        assert_eq!(projected.children.len(), 1);
        assert_eq!(projected.children[0].body.as_deref(), Some("r1"));
    }

    #[test]
    fn list_key_survives_projection_of_unmatched_sibling_leaf() {
        let mut root = Node::config_root();
        root.children.push(list_entry("e0", "1500"));

        // mark /interface[0]/mtu (index 1 within the entry)
        mark_path(&mut root, &[0, 1]);
        let projected = project(&root);

        let entry = &projected.children[0];
        let names: Vec<_> = entry.children.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"name"), "key leaf must survive even though it wasn't matched");
        assert!(names.contains(&"mtu"));
    }

    #[test]
    fn unmarked_siblings_are_excluded() {
        let mut root = Node::config_root();
        root.children.push(Node::leaf("hostname", "r1"));
        root.children.push(Node::leaf("location", "dc1"));
        mark_path(&mut root, &[0]);
        let projected = project(&root);
        assert_eq!(projected.children.len(), 1);
        assert_eq!(projected.children[0].name, "hostname");
    }
}

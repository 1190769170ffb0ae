//! C6: RFC 6241 §6 subtree filtering.
//!
//! Filtering runs in place over a full tree returned by the datastore
//! engine's `get`: rather than rebuilding a filtered tree node-by-node,
//! this walks the existing tree and deletes whatever the filter doesn't
//! select, bottom-up, exactly the "in-place pruning" the RFC describes.
//!
//! Namespace qualification is approximated by local name only; the
//! engine's data and filter trees are both drawn from the same schema,
//! so cross-module name collisions inside one filter application are not
//! a case this core needs to defend against.

use confcore_model::Node;

/// Prunes `data`'s children against `filter`'s children in place. `data`
/// is normally the datastore's `config` root; `filter` is the `<filter>`
/// element's own root (its children are the top-level selection nodes).
/// A present but empty filter (no children at all) selects nothing, per
/// spec.md §4.6/§8 — distinct from the caller omitting `<filter>`
/// entirely, which is handled upstream by simply not calling `apply`.
pub fn apply(data: &mut Node, filter: &Node) {
    if filter.children.is_empty() {
        data.children.clear();
        return;
    }
    data.children.retain_mut(|child| keep(child, filter));
}

fn keep(data_child: &mut Node, filter_parent: &Node) -> bool {
    let candidates: Vec<&Node> =
        filter_parent.children.iter().filter(|f| f.name == data_child.name).collect();
    if candidates.is_empty() {
        return false;
    }

    let mut keep = false;
    for f in candidates {
        if node_matches(f, data_child) {
            keep = true;
        }
    }
    keep
}

/// Attribute match, content match, and containment recursion are
/// independent, combinable conditions on one filter node rather than
/// mutually exclusive categories — a filter element can carry an
/// attribute matcher together with a text body, or together with
/// selection/containment children, and every condition it carries must
/// hold. An element carrying none of the three is a bare `Selection`:
/// the whole matching subtree is kept unconditionally.
fn node_matches(filter_node: &Node, data_child: &mut Node) -> bool {
    let attrs: Vec<_> = non_namespace_attributes(filter_node).collect();
    let body = filter_node.body.as_deref().filter(|b| !b.trim().is_empty());
    let has_children = !filter_node.children.is_empty();

    if attrs.is_empty() && body.is_none() && !has_children {
        return true;
    }

    if !attrs.is_empty()
        && !attrs.iter().all(|f_attr| data_child.attribute(&f_attr.name) == Some(f_attr.value.as_str()))
    {
        return false;
    }

    if let Some(expected) = body {
        if data_child.body.as_deref().map(str::trim) != Some(expected.trim()) {
            return false;
        }
    }

    if has_children {
        data_child.children.retain_mut(|grandchild| keep(grandchild, filter_node));
        if data_child.children.is_empty() {
            return false;
        }
    }

    true
}

fn non_namespace_attributes(node: &Node) -> impl Iterator<Item = &confcore_model::Attribute> {
    node.attributes.iter().filter(|a| a.name != "xmlns" && !a.name.starts_with("xmlns:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(children: Vec<Node>) -> Node {
        let mut root = Node::config_root();
        root.children = children;
        root
    }

    #[test]
    fn empty_filter_selects_nothing() {
        let mut data = config_with(vec![Node::leaf("hostname", "r1")]);
        let filter = Node::element("filter");
        apply(&mut data, &filter);
        assert!(data.children.is_empty());
    }

    #[test]
    fn selection_node_keeps_whole_subtree() {
        let mut iface = Node::element("interfaces");
        iface.children.push(Node::leaf("mtu", "1500"));
        let mut data = config_with(vec![iface, Node::leaf("hostname", "r1")]);

        let mut filter = Node::element("filter");
        filter.children.push(Node::element("interfaces"));
        apply(&mut data, &filter);

        assert_eq!(data.children.len(), 1);
        assert_eq!(data.children[0].name, "interfaces");
        assert_eq!(data.children[0].children.len(), 1);
    }

    #[test]
    fn content_match_keeps_only_equal_leaf() {
        let mut data = config_with(vec![Node::leaf("hostname", "r1"), Node::leaf("location", "dc1")]);
        let mut filter = Node::element("filter");
        filter.children.push(Node::leaf("hostname", "r1"));
        apply(&mut data, &filter);

        assert_eq!(data.children.len(), 1);
        assert_eq!(data.children[0].name, "hostname");
    }

    #[test]
    fn content_mismatch_prunes_the_leaf() {
        let mut data = config_with(vec![Node::leaf("hostname", "r1")]);
        let mut filter = Node::element("filter");
        filter.children.push(Node::leaf("hostname", "not-r1"));
        apply(&mut data, &filter);
        assert!(data.children.is_empty());
    }

    #[test]
    fn containment_recurses_and_prunes_nonmatching_descendants() {
        let mut iface = Node::element("interface");
        iface.children.push(Node::leaf("name", "eth0"));
        iface.children.push(Node::leaf("mtu", "1500"));
        let mut interfaces = Node::element("interfaces");
        interfaces.children.push(iface);
        let mut data = config_with(vec![interfaces]);

        let mut name_filter = Node::element("name");
        name_filter.body = Some("eth0".into());
        let mut iface_filter = Node::element("interface");
        iface_filter.children.push(name_filter);
        let mut interfaces_filter = Node::element("interfaces");
        interfaces_filter.children.push(iface_filter);
        let mut filter = Node::element("filter");
        filter.children.push(interfaces_filter);

        apply(&mut data, &filter);

        let kept = &data.children[0].children[0];
        assert_eq!(kept.children.len(), 1);
        assert_eq!(kept.children[0].name, "name");
    }

    #[test]
    fn attribute_match_node_requires_equal_attribute_value() {
        let mut interface = Node::element("interface");
        interface.set_attribute("status", "up");
        let mut data = config_with(vec![interface]);

        let mut attr_filter = Node::element("interface");
        attr_filter.set_attribute("status", "down");
        let mut filter = Node::element("filter");
        filter.children.push(attr_filter);

        apply(&mut data, &filter);
        assert!(data.children.is_empty());
    }

    #[test]
    fn attribute_and_content_match_combine_on_one_filter_node() {
        let mut admin = Node::element("user");
        admin.set_attribute("status", "active");
        admin.body = Some("admin".into());
        let mut guest = Node::element("user");
        guest.set_attribute("status", "active");
        guest.body = Some("guest".into());
        let mut data = config_with(vec![admin, guest]);

        // <role status="active">admin</role>-shaped filter node: both the
        // attribute matcher and the content match must hold together.
        let mut role_filter = Node::element("user");
        role_filter.set_attribute("status", "active");
        role_filter.body = Some("admin".into());
        let mut filter = Node::element("filter");
        filter.children.push(role_filter);

        apply(&mut data, &filter);

        assert_eq!(data.children.len(), 1);
        assert_eq!(data.children[0].body.as_deref(), Some("admin"));
    }

    #[test]
    fn attribute_matches_but_content_mismatches_is_still_pruned() {
        let mut guest = Node::element("user");
        guest.set_attribute("status", "active");
        guest.body = Some("guest".into());
        let mut data = config_with(vec![guest]);

        let mut role_filter = Node::element("user");
        role_filter.set_attribute("status", "active");
        role_filter.body = Some("admin".into());
        let mut filter = Node::element("filter");
        filter.children.push(role_filter);

        apply(&mut data, &filter);
        assert!(data.children.is_empty(), "content mismatch must prune even when the attribute matched");
    }

    #[test]
    fn unselected_siblings_are_removed() {
        let mut data = config_with(vec![Node::leaf("hostname", "r1"), Node::leaf("location", "dc1")]);
        let mut filter = Node::element("filter");
        filter.children.push(Node::element("hostname"));
        apply(&mut data, &filter);
        assert_eq!(data.children.len(), 1);
        assert_eq!(data.children[0].name, "hostname");
    }
}

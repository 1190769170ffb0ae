//! C4: RPC dispatch (spec.md §4.4) — routes an incoming operation
//! element to every handler registered against its `(namespace,
//! local-name)` pair, in registration order, sharing one response
//! buffer across the whole run.

use confcore_contracts::{Category, ConfcoreError, Result};
use confcore_model::Node;

/// `+ Send` for the same reason the plugin registry's hook closures
/// carry it (see `plugin::abi`'s `StartFn`/`ExitFn`/etc.): confcore-server
/// shares one handler table across its fd-readable callbacks, which the
/// C2 dispatcher requires to be `Send`.
pub type RpcCallback = Box<dyn FnMut(&Node, &mut String) -> Result<()> + Send>;

struct HandlerEntry {
    namespace: String,
    local_name: String,
    label: &'static str,
    callback: RpcCallback,
}

/// The handler table. A flat, append-only `Vec` walked linearly on every
/// call, mirroring the teacher's router registration order rather than a
/// hashed lookup, since spec.md §4.4 requires *every* matching handler to
/// run, not just the first.
#[derive(Default)]
pub struct RpcDispatch {
    handlers: Vec<HandlerEntry>,
}

impl RpcDispatch {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register(
        &mut self,
        namespace: impl Into<String>,
        local_name: impl Into<String>,
        label: &'static str,
        callback: RpcCallback,
    ) {
        self.handlers.push(HandlerEntry {
            namespace: namespace.into(),
            local_name: local_name.into(),
            label,
            callback,
        });
    }

    pub fn unregister(&mut self, label: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.label != label);
        self.handlers.len() != before
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatches the single operation element found as `envelope`'s
    /// first child (the `<rpc>` wrapper's payload) to every handler whose
    /// `(namespace, local-name)` matches, invoked in registration order
    /// against one shared response buffer. Returns the response body and
    /// the number of handlers invoked.
    pub fn call(&mut self, envelope: &Node) -> Result<(String, usize)> {
        let operation = envelope
            .children
            .first()
            .ok_or_else(|| ConfcoreError::new(Category::Proto, "rpc envelope has no operation element"))?;

        let namespace = resolve_namespace(&[envelope], operation).ok_or_else(|| {
            ConfcoreError::new(
                Category::Proto,
                format!("no in-scope namespace declaration for <{}>", operation.name),
            )
        })?;

        let mut response = String::new();
        let mut invoked = 0;
        for entry in self.handlers.iter_mut() {
            if entry.namespace == namespace && entry.local_name == operation.name {
                (entry.callback)(operation, &mut response)?;
                invoked += 1;
            }
        }
        Ok((response, invoked))
    }
}

impl std::fmt::Debug for RpcDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcDispatch")
            .field("handlers", &self.handlers.iter().map(|h| h.label).collect::<Vec<_>>())
            .finish()
    }
}

/// Resolves the namespace in scope for `element`'s own prefix by walking
/// `ancestors` (outermost first) plus `element` itself, innermost wins,
/// looking for `xmlns` (no prefix) or `xmlns:PREFIX` attributes —
/// standard XML namespace scoping (RFC 6241's framing is plain XML).
fn resolve_namespace(ancestors: &[&Node], element: &Node) -> Option<String> {
    let wanted_attr: String = match &element.prefix {
        Some(prefix) => format!("xmlns:{prefix}"),
        None => "xmlns".to_string(),
    };

    let mut chain: Vec<&Node> = ancestors.to_vec();
    chain.push(element);
    for node in chain.into_iter().rev() {
        if let Some(value) = node.attribute(&wanted_attr) {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operation(name: &str, xmlns: &str) -> Node {
        let mut node = Node::element(name);
        node.set_attribute("xmlns", xmlns);
        node
    }

    fn envelope(operation: Node) -> Node {
        let mut rpc = Node::element("rpc");
        rpc.children.push(operation);
        rpc
    }

    #[test]
    fn invokes_every_matching_handler_in_registration_order() {
        let mut dispatch = RpcDispatch::new();
        let order = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        dispatch.register("urn:confcore:base", "get", "first", Box::new(move |_op, resp| {
            o1.lock().push("first");
            resp.push_str("<ok/>");
            Ok(())
        }));
        let o2 = order.clone();
        dispatch.register("urn:confcore:base", "get", "second", Box::new(move |_op, _resp| {
            o2.lock().push("second");
            Ok(())
        }));

        let request = envelope(operation("get", "urn:confcore:base"));
        let (response, invoked) = dispatch.call(&request).unwrap();

        assert_eq!(invoked, 2);
        assert_eq!(response, "<ok/>");
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn namespace_mismatch_yields_zero_invocations() {
        let mut dispatch = RpcDispatch::new();
        dispatch.register("urn:confcore:other", "get", "h", Box::new(|_op, _resp| Ok(())));

        let request = envelope(operation("get", "urn:confcore:base"));
        let (_response, invoked) = dispatch.call(&request).unwrap();
        assert_eq!(invoked, 0);
    }

    #[test]
    fn missing_namespace_declaration_is_an_error() {
        let mut dispatch = RpcDispatch::new();
        dispatch.register("urn:confcore:base", "get", "h", Box::new(|_op, _resp| Ok(())));
        let request = envelope(Node::element("get"));
        assert!(dispatch.call(&request).is_err());
    }

    #[test]
    fn unregister_removes_by_label_and_is_idempotent() {
        let mut dispatch = RpcDispatch::new();
        dispatch.register("ns", "get", "h", Box::new(|_op, _resp| Ok(())));
        assert!(dispatch.unregister("h"));
        assert!(!dispatch.unregister("h"));
        assert_eq!(dispatch.len(), 0);
    }
}

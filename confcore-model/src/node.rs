use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::schema::SchemaRef;

bitflags! {
    /// Transient marks used by [`get`](crate) projection and [`put`](crate) merge.
    ///
    /// `NONE` must never be observed on a tree handed back to a caller; it is
    /// removed (along with `MARK`/`CHANGE`) before the tree leaves the engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// Node was directly selected (by an XPath match or the input of a merge).
        const MARK  = 0b001;
        /// Node lies on the ancestor chain of a `MARK`ed node.
        const CHANGE = 0b010;
        /// Node was created by `put` purely to host descendants and carries no
        /// payload of its own; garbage-collected in post-processing.
        const NONE  = 0b100;
    }
}

/// What composition a [`Node`] participates in.
///
/// Most nodes in a configuration tree are `Element`. `Attribute` and `Body`
/// exist so a filter tree or anyxml subtree can carry a bare attribute
/// matcher or text node without forcing every consumer through the
/// `attributes`/`body` convenience fields on `Element`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Element,
    Attribute,
    Body,
}

/// A single `name="value"` attribute on an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// The universal tree container: a schema-aware XML-like node.
///
/// Invariants enforced by the engine rather than this type: a datastore
/// root is always named `config`; every node below the root carries a
/// resolved `schema` backpointer; list entries sharing a key tuple form a
/// contiguous run; no two siblings share an identity.
#[derive(Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip)]
    pub flags: Flags,
    #[serde(skip)]
    pub schema: Option<SchemaRef>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("attributes", &self.attributes)
            .field("body", &self.body)
            .field("children", &self.children)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Node {
    pub fn element(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Element,
            prefix: None,
            attributes: Vec::new(),
            children: Vec::new(),
            body: None,
            flags: Flags::empty(),
            schema: None,
        }
    }

    pub fn leaf(name: impl Into<String>, body: impl Into<String>) -> Self {
        let mut node = Self::element(name);
        node.body = Some(body.into());
        node
    }

    /// The synthetic root every datastore cache is rooted at.
    pub fn config_root() -> Self {
        Self::element("config")
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|a| a.name == name).map(|a| a.value.as_str())
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.name == name) {
            existing.value = value.into();
        } else {
            self.attributes.push(Attribute::new(name, value));
        }
    }

    pub fn remove_attribute(&mut self, name: &str) {
        self.attributes.retain(|a| a.name != name);
    }

    /// Key tuple of this node if it is bound to a `list` schema statement.
    pub fn key_values(&self) -> Vec<(&str, &str)> {
        let Some(schema) = &self.schema else { return Vec::new() };
        schema
            .keys
            .iter()
            .filter_map(|key_name| {
                self.children
                    .iter()
                    .find(|c| c.name == *key_name)
                    .and_then(|c| c.body.as_deref())
                    .map(|v| (key_name.as_str(), v))
            })
            .collect()
    }

    /// Sibling identity: name alone for containers/leaves, name + key tuple
    /// for list entries. Two siblings with the same identity violate the
    /// tree invariant in spec.md §3.
    pub fn identity(&self) -> NodeIdentity<'_> {
        NodeIdentity {
            name: &self.name,
            keys: self.key_values(),
        }
    }

    pub fn recursively_clear_flags(&mut self, flags: Flags) {
        self.flags.remove(flags);
        for child in &mut self.children {
            child.recursively_clear_flags(flags);
        }
    }

    pub fn mark_ancestors(path: &mut [&mut Node]) {
        for node in path.iter_mut() {
            node.flags.insert(Flags::CHANGE);
        }
    }

    pub fn is_leaf_list(&self) -> bool {
        matches!(self.schema.as_ref().map(|s| s.stmt), Some(StmtKind::LeafList))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.schema.as_ref().map(|s| s.stmt), Some(StmtKind::List))
    }
}

/// Sibling-uniqueness key: name plus (for list entries) the key-leaf tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity<'a> {
    pub name: &'a str,
    pub keys: Vec<(&'a str, &'a str)>,
}

pub use crate::schema::StmtKind;

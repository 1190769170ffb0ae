//! The schema oracle: an external collaborator providing node kind, key
//! metadata, defaults, type classification, config flag, and canonical
//! child ordering. Treated as opaque per spec.md §1 — this crate defines
//! only the contract, never a YANG parser.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The statement kind a schema node was declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StmtKind {
    Container,
    List,
    Leaf,
    LeafList,
    Anyxml,
}

/// YANG base type classification relevant to this core (full type system
/// lives in the external YANG parser; this is the subset the engine must
/// branch on).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeKind {
    Leafref { path: String },
    Other,
}

/// A resolved schema backpointer attached to a [`crate::Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub stmt: StmtKind,
    /// Ordered key-leaf names; non-empty only for `list`.
    #[serde(default)]
    pub keys: Vec<String>,
    /// `true` for `presence` containers; meaningless for other kinds.
    #[serde(default)]
    pub presence: bool,
    /// `true` when this node carries operational (non-configuration) data.
    #[serde(default = "default_config_true")]
    pub config: bool,
    #[serde(default)]
    pub type_kind: Option<TypeKind>,
    #[serde(default)]
    pub default: Option<String>,
}

fn default_config_true() -> bool {
    true
}

impl SchemaRef {
    pub fn new(stmt: StmtKind) -> Self {
        Self {
            stmt,
            keys: Vec::new(),
            presence: false,
            config: true,
            type_kind: None,
            default: None,
        }
    }

    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    pub fn presence(mut self, presence: bool) -> Self {
        self.presence = presence;
        self
    }

    pub fn config(mut self, config: bool) -> Self {
        self.config = config;
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no schema node found for path {0:?}")]
    NotFound(Vec<String>),
    #[error("schema oracle error: {0}")]
    Other(String),
}

/// The external YANG store. Implementations resolve a path of local names
/// (from a datastore root) to the schema statement governing that
/// location, and answer the small set of structural questions the engine
/// needs (keys, defaults, config flag, canonical ordering).
///
/// `path` is always relative to the datastore's `config` root and does
/// not include it, e.g. `["interfaces", "interface", "mtu"]`.
pub trait SchemaOracle: Send + Sync {
    fn resolve(&self, path: &[&str]) -> Result<SchemaRef, SchemaError>;

    /// Canonical order of a container/list entry's child statement names,
    /// as declared in the schema. Children not named here (e.g. unknown
    /// anyxml content) sort after all named children, stable on input
    /// order.
    fn child_order(&self, path: &[&str]) -> Result<Vec<String>, SchemaError>;

    /// All `(extension-statement, instance-statement)` pairs declared
    /// anywhere in the schema, for the plugin registry's extension hook.
    fn extension_statements(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

pub type DynSchemaOracle = Arc<dyn SchemaOracle>;

/// A schema oracle with no declared nodes, useful for tests and for
/// anyxml-only subtrees where no schema binding is expected.
#[derive(Debug, Default)]
pub struct NullSchema;

impl SchemaOracle for NullSchema {
    fn resolve(&self, path: &[&str]) -> Result<SchemaRef, SchemaError> {
        Err(SchemaError::NotFound(path.iter().map(|s| s.to_string()).collect()))
    }

    fn child_order(&self, _path: &[&str]) -> Result<Vec<String>, SchemaError> {
        Ok(Vec::new())
    }
}

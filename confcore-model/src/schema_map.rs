//! A small in-memory [`SchemaOracle`] implementation, useful for tests and
//! for embedding a statically-known schema without a full YANG parser.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::{SchemaError, SchemaOracle, SchemaRef};

/// Maps a dotted path (e.g. `"interfaces.interface.mtu"`) to its
/// [`SchemaRef`] and declared child order.
#[derive(Debug, Default)]
pub struct MapSchema {
    nodes: HashMap<String, SchemaRef>,
    order: HashMap<String, Vec<String>>,
}

fn key(path: &[&str]) -> String {
    path.join(".")
}

impl MapSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, path: &[&str], schema: SchemaRef) -> Self {
        self.nodes.insert(key(path), schema);
        self
    }

    pub fn with_order(mut self, path: &[&str], order: Vec<String>) -> Self {
        self.order.insert(key(path), order);
        self
    }

    /// Builds a `MapSchema` from its serialized form (spec.md's schema
    /// oracle is opaque to this crate; this is confcore's own bootstrap
    /// format, not a YANG parser).
    pub fn from_document(doc: SchemaDocument) -> Self {
        let mut schema = Self::new();
        for (path, node) in doc.nodes {
            schema.nodes.insert(path, node);
        }
        for (path, order) in doc.order {
            schema.order.insert(path, order);
        }
        schema
    }

    /// Reads and parses a schema document from a JSON file at `path`.
    pub fn load_json(path: &Path) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SchemaError::Other(format!("reading schema file {}: {e}", path.display())))?;
        let doc: SchemaDocument = serde_json::from_str(&text)
            .map_err(|e| SchemaError::Other(format!("parsing schema file {}: {e}", path.display())))?;
        Ok(Self::from_document(doc))
    }
}

/// Serializable form of a [`MapSchema`], dotted paths (e.g.
/// `"interfaces.interface.mtu"`) mapping to schema nodes and declared
/// child orders.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub nodes: HashMap<String, SchemaRef>,
    #[serde(default)]
    pub order: HashMap<String, Vec<String>>,
}

impl SchemaOracle for MapSchema {
    fn resolve(&self, path: &[&str]) -> Result<SchemaRef, SchemaError> {
        self.nodes
            .get(&key(path))
            .cloned()
            .ok_or_else(|| SchemaError::NotFound(path.iter().map(|s| s.to_string()).collect()))
    }

    fn child_order(&self, path: &[&str]) -> Result<Vec<String>, SchemaError> {
        Ok(self.order.get(&key(path)).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StmtKind;

    #[test]
    fn with_node_and_order_round_trip_through_the_oracle_trait() {
        let schema = MapSchema::new()
            .with_order(&[], vec!["hostname".into()])
            .with_node(&["hostname"], SchemaRef::new(StmtKind::Leaf));

        assert_eq!(schema.child_order(&[]).unwrap(), vec!["hostname".to_string()]);
        assert_eq!(schema.resolve(&["hostname"]).unwrap().stmt, StmtKind::Leaf);
    }

    #[test]
    fn load_json_parses_a_schema_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(
            &path,
            r#"{
                "nodes": {
                    "hostname": {"stmt": "leaf", "default": "unset"},
                    "interfaces.interface": {"stmt": "list", "keys": ["name"]}
                },
                "order": {
                    "": ["hostname", "interfaces"]
                }
            }"#,
        )
        .unwrap();

        let schema = MapSchema::load_json(&path).unwrap();
        let hostname = schema.resolve(&["hostname"]).unwrap();
        assert_eq!(hostname.stmt, StmtKind::Leaf);
        assert_eq!(hostname.default.as_deref(), Some("unset"));
        assert!(hostname.config, "config defaults to true when absent from the document");

        let iface = schema.resolve(&["interfaces", "interface"]).unwrap();
        assert_eq!(iface.keys, vec!["name".to_string()]);
        assert_eq!(schema.child_order(&[]).unwrap(), vec!["hostname".to_string(), "interfaces".to_string()]);
    }

    #[test]
    fn load_json_rejects_a_missing_file() {
        let missing = Path::new("/nonexistent/confcore-schema-test.json");
        assert!(MapSchema::load_json(missing).is_err());
    }
}

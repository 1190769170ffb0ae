//! Configuration-tree data model shared across confcore crates.
//!
//! This crate owns only the *data*: the tree node type and the schema
//! oracle contract. The algorithms that build, filter, merge, and persist
//! trees live in `confcore-core`.

pub mod node;
pub mod schema;
pub mod schema_map;

pub use node::{Attribute, Flags, Node, NodeIdentity, NodeKind};
pub use schema::{DynSchemaOracle, NullSchema, SchemaError, SchemaOracle, SchemaRef, StmtKind, TypeKind};
pub use schema_map::{MapSchema, SchemaDocument};

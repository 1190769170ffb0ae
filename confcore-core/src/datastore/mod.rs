//! C7: the datastore engine. Ties the XPath evaluator, marked-tree
//! projector, schema-driven operations, tree-merge and on-disk
//! (de)serialization together into `get`/`put`/`copy`/lock lifecycle.

pub mod merge;
pub mod persist;
pub mod project;
pub mod schema_ops;
pub mod xpath;

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use confcore_contracts::{Category, ConfcoreError, OwnerId, Result};
use confcore_model::{DynSchemaOracle, Flags, Node};
use parking_lot::Mutex;

pub use merge::Op;

/// The configured on-disk representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Json,
}

impl Format {
    fn parse(raw: &str) -> Option<Format> {
        match raw {
            "xml" => Some(Format::Xml),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

/// A value accepted by [`Engine::set_option`]. The key it must pair
/// with is checked at call time, not encoded in the variant, mirroring
/// spec.md's flat `{k, v}` option surface.
pub enum OptionValue {
    Schema(DynSchemaOracle),
    Dir(PathBuf),
    Cache(bool),
    Format(Format),
    Pretty(bool),
}

struct DbRecord {
    cache: Option<Node>,
    lock_owner: OwnerId,
}

impl Default for DbRecord {
    fn default() -> Self {
        Self { cache: None, lock_owner: OwnerId::UNLOCKED }
    }
}

/// Per-instance configuration and state for the C7 datastore engine.
/// One `Engine` owns every named database under a single `dir`.
pub struct Engine {
    schema: DynSchemaOracle,
    dir: PathBuf,
    cache_enabled: bool,
    format: Format,
    pretty: bool,
    records: Mutex<HashMap<String, DbRecord>>,
}

/// Name of the advisory pid file written under a datastore `dir`.
const LOCK_FILE_NAME: &str = ".confcore.lock";

/// Records this process's pid in `dir`'s advisory lock file, warning
/// (not failing) if a previous pid is still present and alive. An
/// `Engine` is not safe to share across OS processes pointed at the
/// same `dir`; this is a diagnostic tripwire for that mistake, not an
/// enforced exclusion mechanism.
fn claim_dir(dir: &Path) {
    let lock_path = dir.join(LOCK_FILE_NAME);
    if let Ok(existing) = fs::read_to_string(&lock_path) {
        if let Ok(pid) = existing.trim().parse::<i32>() {
            let still_alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
            if still_alive && pid != std::process::id() as i32 {
                tracing::warn!(
                    dir = %dir.display(),
                    other_pid = pid,
                    "datastore directory already claimed by a live process; Engine is not Sync across processes"
                );
            }
        }
    }
    if let Err(e) = fs::write(&lock_path, std::process::id().to_string()) {
        tracing::warn!(dir = %dir.display(), error = %e, "failed to write datastore lock file");
    }
}

impl Engine {
    /// `connect()`: default format xml, pretty on, cache on.
    pub fn connect(dir: impl Into<PathBuf>, schema: DynSchemaOracle) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(ConfcoreError::from)?;
        claim_dir(&dir);
        Ok(Self {
            schema,
            dir,
            cache_enabled: true,
            format: Format::Xml,
            pretty: true,
            records: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_option(&mut self, key: &str, value: OptionValue) -> Result<()> {
        match (key, value) {
            ("schema", OptionValue::Schema(schema)) => {
                self.schema = schema;
                Ok(())
            }
            ("dir", OptionValue::Dir(dir)) => {
                fs::create_dir_all(&dir).map_err(ConfcoreError::from)?;
                self.dir = dir;
                Ok(())
            }
            ("cache", OptionValue::Cache(enabled)) => {
                self.cache_enabled = enabled;
                Ok(())
            }
            ("format", OptionValue::Format(format)) => {
                self.format = format;
                Ok(())
            }
            ("pretty", OptionValue::Pretty(pretty)) => {
                self.pretty = pretty;
                Ok(())
            }
            (key, _) => Err(ConfcoreError::new(Category::Cfg, format!("unrecognised datastore option: {key}"))),
        }
    }

    fn path_for(&self, db: &str) -> PathBuf {
        self.dir.join(format!("{db}_db"))
    }

    fn serialize(&self, root: &Node) -> Result<String> {
        match self.format {
            Format::Xml => persist::write_xml(root, self.pretty),
            Format::Json => persist::write_json(root, self.pretty),
        }
    }

    fn deserialize(&self, raw: &str) -> Result<Node> {
        match self.format {
            Format::Xml => persist::read_xml(raw),
            Format::Json => persist::read_json(raw),
        }
    }

    /// First access to an uncached db: open read-only, parse against the
    /// configured format; an empty file fabricates a root `<config/>`.
    fn load(&self, db: &str) -> Result<Node> {
        let path = self.path_for(db);
        if !path.exists() {
            return Err(ConfcoreError::new(Category::Db, format!("database {db} does not exist")));
        }
        let raw = fs::read_to_string(&path).map_err(ConfcoreError::from)?;
        if raw.trim().is_empty() {
            return Ok(Node::config_root());
        }
        let root = self.deserialize(&raw)?;
        if root.name != "config" {
            return Err(ConfcoreError::new(
                Category::Xml,
                format!("top-level element must be named config, found {}", root.name),
            ));
        }
        Ok(root)
    }

    /// Borrows the resolved tree for `db`, loading and (if enabled)
    /// caching it on first access.
    fn with_tree<F, T>(&self, db: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Node) -> Result<T>,
    {
        let mut records = self.records.lock();
        let record = records.entry(db.to_string()).or_default();
        if record.cache.is_none() {
            record.cache = Some(self.load(db)?);
        }
        let tree = record.cache.as_mut().expect("just populated");
        let result = f(tree);
        if !self.cache_enabled {
            record.cache = None;
        }
        result
    }

    /// `get(db, xpath, config_only) → tree` (spec.md §4.7 steps 1-8).
    pub fn get(&self, db: &str, xpath_expr: &str, config_only: bool) -> Result<Node> {
        let xpath = xpath::parse(xpath_expr)?;
        self.with_tree(db, |tree| {
            if xpath.is_root() {
                project::mark_everything(tree);
            } else {
                for path in xpath::evaluate(tree, &xpath) {
                    project::mark_path(tree, &path);
                }
            }
            let mut projected = project::project(tree);
            tree.recursively_clear_flags(Flags::MARK | Flags::CHANGE | Flags::NONE);
            projected.recursively_clear_flags(Flags::MARK | Flags::CHANGE | Flags::NONE);

            if config_only {
                schema_ops::prune_operational(&mut projected);
            }
            schema_ops::apply_defaults(&mut projected, &mut Vec::new(), self.schema.as_ref());
            schema_ops::reorder_children(&mut projected, &mut Vec::new(), self.schema.as_ref());
            Ok(projected)
        })
    }

    /// `put(db, op, tree)` (spec.md §4.7 tree merge + post-processing).
    pub fn put(&self, db: &str, op: Op, incoming: &Node) -> Result<()> {
        if incoming.name != "config" {
            return Err(ConfcoreError::new(
                Category::Xml,
                format!("put input must be rooted at config, found {}", incoming.name),
            ));
        }

        self.with_tree(db, |tree| {
            merge::merge_into(tree, incoming, op, self.schema.as_ref())?;

            merge::prune_none_subtrees(tree);
            tree.recursively_clear_flags(Flags::NONE);
            schema_ops::prune_empty_non_presence_containers(tree);
            schema_ops::reorder_children(tree, &mut Vec::new(), self.schema.as_ref());

            let serialized = self.serialize(tree)?;
            fs::write(self.path_for(db), serialized).map_err(ConfcoreError::from)?;
            Ok(())
        })
    }

    /// `copy(src, dst)`: replace dst's cache and file with a deep clone
    /// of src.
    pub fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let cloned = self.with_tree(src, |tree| Ok(tree.clone()))?;
        let serialized = self.serialize(&cloned)?;
        fs::write(self.path_for(dst), serialized).map_err(ConfcoreError::from)?;

        let mut records = self.records.lock();
        let record = records.entry(dst.to_string()).or_default();
        record.cache = if self.cache_enabled { Some(cloned) } else { None };
        Ok(())
    }

    pub fn lock(&self, db: &str, owner: OwnerId) -> Result<()> {
        let mut records = self.records.lock();
        let record = records.entry(db.to_string()).or_default();
        if !record.lock_owner.is_unlocked() && record.lock_owner != owner {
            return Err(ConfcoreError::new(Category::Db, format!("{db} is locked by another owner")));
        }
        record.lock_owner = owner;
        Ok(())
    }

    pub fn unlock(&self, db: &str) -> Result<()> {
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(db) {
            record.lock_owner = OwnerId::UNLOCKED;
        }
        Ok(())
    }

    /// Releases every database whose owner matches `owner`, for
    /// session-termination cleanup.
    pub fn unlock_all(&self, owner: OwnerId) {
        let mut records = self.records.lock();
        for record in records.values_mut() {
            if record.lock_owner == owner {
                record.lock_owner = OwnerId::UNLOCKED;
            }
        }
    }

    pub fn is_locked(&self, db: &str) -> OwnerId {
        self.records.lock().get(db).map(|r| r.lock_owner).unwrap_or(OwnerId::UNLOCKED)
    }

    pub fn exists(&self, db: &str) -> bool {
        self.path_for(db).exists()
    }

    pub fn delete(&self, db: &str) -> Result<()> {
        let path = self.path_for(db);
        if path.exists() {
            fs::remove_file(&path).map_err(ConfcoreError::from)?;
        }
        self.records.lock().remove(db);
        Ok(())
    }

    /// Creates an empty database file, mode 0700, content an empty
    /// `config` root serialised in the configured format.
    pub fn create(&self, db: &str) -> Result<()> {
        let path = self.path_for(db);
        if path.exists() {
            return Err(ConfcoreError::new(Category::Db, format!("database {db} already exists")));
        }
        let root = Node::config_root();
        let serialized = self.serialize(&root)?;
        fs::write(&path, serialized).map_err(ConfcoreError::from)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).map_err(ConfcoreError::from)?;
        Ok(())
    }

    pub fn schema(&self) -> &DynSchemaOracle {
        &self.schema
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub fn parse_format(raw: &str) -> Option<Format> {
    Format::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use confcore_model::{MapSchema, SchemaRef, StmtKind};
    use std::sync::Arc;

    fn test_schema() -> DynSchemaOracle {
        Arc::new(
            MapSchema::new()
                .with_node(&["interface"], SchemaRef::new(StmtKind::List).with_keys(vec!["name".into()]))
                .with_node(&["interface", "name"], SchemaRef::new(StmtKind::Leaf))
                .with_node(&["interface", "mtu"], SchemaRef::new(StmtKind::Leaf))
                .with_node(&["interface", "enabled"], SchemaRef::new(StmtKind::Leaf).default_value("true"))
                .with_order(&["interface"], vec!["name".into(), "mtu".into(), "enabled".into()]),
        )
    }

    fn incoming_iface(name: &str, mtu: &str) -> Node {
        let mut root = Node::config_root();
        let mut entry = Node::element("interface");
        entry.children.push(Node::leaf("name", name));
        entry.children.push(Node::leaf("mtu", mtu));
        root.children.push(entry);
        root
    }

    #[test]
    fn create_exists_and_delete_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::connect(tmp.path(), test_schema()).unwrap();

        assert!(!engine.exists("running"));
        engine.create("running").unwrap();
        assert!(engine.exists("running"));
        assert!(engine.create("running").is_err(), "create of an existing database is an error");

        engine.delete("running").unwrap();
        assert!(!engine.exists("running"));
    }

    #[test]
    fn put_then_get_round_trips_through_the_file() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::connect(tmp.path(), test_schema()).unwrap();
        engine.create("running").unwrap();

        let incoming = incoming_iface("e0", "1500");
        engine.put("running", Op::Merge, &incoming).unwrap();

        let result = engine.get("running", "/", false).unwrap();
        let entry = &result.children[0];
        assert_eq!(entry.children.iter().find(|c| c.name == "mtu").unwrap().body.as_deref(), Some("1500"));
        assert_eq!(entry.children.iter().find(|c| c.name == "enabled").unwrap().body.as_deref(), Some("true"));

        let on_disk = fs::read_to_string(tmp.path().join("running_db")).unwrap();
        assert!(on_disk.contains("e0"));
    }

    #[test]
    fn xpath_filtered_get_preserves_list_key() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::connect(tmp.path(), test_schema()).unwrap();
        engine.create("running").unwrap();
        engine.put("running", Op::Merge, &incoming_iface("e0", "1500")).unwrap();

        let result = engine.get("running", "/interface[name=\"e0\"]/mtu", false).unwrap();
        let entry = &result.children[0];
        let names: Vec<_> = entry.children.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"name"));
        assert!(names.contains(&"mtu"));
    }

    #[test]
    fn create_conflict_is_rejected_and_leaves_tree_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::connect(tmp.path(), test_schema()).unwrap();
        engine.create("running").unwrap();
        engine.put("running", Op::Merge, &incoming_iface("e0", "1500")).unwrap();

        let mut mtu = Node::leaf("mtu", "9000");
        mtu.set_attribute("operation", "create");
        let mut entry = Node::element("interface");
        entry.children.push(Node::leaf("name", "e0"));
        entry.children.push(mtu);
        let mut incoming = Node::config_root();
        incoming.children.push(entry);

        assert!(engine.put("running", Op::Merge, &incoming).is_err());

        let result = engine.get("running", "/", false).unwrap();
        let mtu_leaf = result.children[0].children.iter().find(|c| c.name == "mtu").unwrap();
        assert_eq!(mtu_leaf.body.as_deref(), Some("1500"), "failed put must not leave a partial mutation");
    }

    #[test]
    fn lock_handoff_rejects_foreign_owner_until_released() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::connect(tmp.path(), test_schema()).unwrap();
        engine.create("running").unwrap();

        let alice = OwnerId(1);
        let bob = OwnerId(2);
        engine.lock("running", alice).unwrap();
        assert_eq!(engine.is_locked("running"), alice);
        assert!(engine.lock("running", bob).is_err());

        engine.unlock_all(alice);
        assert!(engine.is_locked("running").is_unlocked());
        engine.lock("running", bob).unwrap();
        assert_eq!(engine.is_locked("running"), bob);
    }

    #[test]
    fn copy_deep_clones_into_a_fresh_database() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Engine::connect(tmp.path(), test_schema()).unwrap();
        engine.create("running").unwrap();
        engine.create("candidate").unwrap();
        engine.put("running", Op::Merge, &incoming_iface("e0", "1500")).unwrap();

        engine.copy("running", "candidate").unwrap();
        let candidate = engine.get("candidate", "/", false).unwrap();
        assert_eq!(candidate.children[0].children[0].body.as_deref(), Some("e0"));
    }

    #[test]
    fn empty_file_loads_as_an_empty_config_root() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("running_db"), "").unwrap();
        let engine = Engine::connect(tmp.path(), test_schema()).unwrap();

        let result = engine.get("running", "/", false).unwrap();
        assert!(result.children.is_empty());
    }
}

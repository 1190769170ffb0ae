//! C5: the plugin registry (spec.md §4.5).
//!
//! Plugins come in two shapes behind one [`PluginHandle`] interface:
//! dynamically-loaded shared objects discovered on disk and opened with
//! `libloading`, and "pseudo-plugins" — host-native Rust closures
//! registered directly by `confcore-server`, used for built-in
//! behaviour that doesn't warrant its own `.so`.

pub mod abi;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use regex::Regex;

use confcore_contracts::{Category, ConfcoreError, Result};
use confcore_model::SchemaOracle;

use abi::{reclaim_buffer, to_cstring, PluginInitFn, PluginVTable, UpgradeOpCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOp {
    Add,
    Delete,
    Change,
}

impl From<UpgradeOp> for UpgradeOpCode {
    fn from(op: UpgradeOp) -> Self {
        match op {
            UpgradeOp::Add => UpgradeOpCode::Add,
            UpgradeOp::Delete => UpgradeOpCode::Delete,
            UpgradeOp::Change => UpgradeOpCode::Change,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeRequest<'a> {
    pub op: UpgradeOp,
    pub from_revision: &'a str,
    pub to_revision: &'a str,
    pub buffer: Option<&'a [u8]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Unchanged,
    Transformed(Vec<u8>),
}

type StartFn = Box<dyn FnMut() -> Result<()> + Send>;
type ExitFn = Box<dyn FnMut() + Send>;
type AuthFn = Box<dyn FnMut(&str, &str) -> Result<bool> + Send>;
type ExtensionFn = Box<dyn FnMut(&str, &str) -> Result<()> + Send>;
type UpgradeFn = Box<dyn FnMut(&UpgradeRequest) -> Result<UpgradeOutcome> + Send>;

/// Hook set for a pseudo-plugin: every field optional, same semantics as
/// the dynamic ABI but as ordinary Rust closures.
#[derive(Default)]
pub struct NativeHooks {
    pub start: Option<StartFn>,
    pub exit: Option<ExitFn>,
    pub auth: Option<AuthFn>,
    pub extension: Option<ExtensionFn>,
    pub upgrade: Option<UpgradeFn>,
}

enum Hooks {
    Native(NativeHooks),
    /// `_library` keeps the `dlopen`ed module mapped for as long as the
    /// handle lives; the vtable's function pointers are only valid while
    /// it stays alive.
    Dynamic { _library: Library, vtable: PluginVTable },
}

pub struct PluginHandle {
    pub name: String,
    hooks: Hooks,
    started: bool,
}

impl PluginHandle {
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        let result = match &mut self.hooks {
            Hooks::Native(hooks) => match hooks.start.as_mut() {
                Some(f) => f(),
                None => Ok(()),
            },
            Hooks::Dynamic { vtable, .. } => match vtable.start {
                Some(f) => {
                    let rc = f();
                    if rc == 0 {
                        Ok(())
                    } else {
                        Err(ConfcoreError::with_errno(
                            Category::Plugin,
                            rc,
                            format!("plugin {} start hook failed", self.name),
                        ))
                    }
                }
                None => Ok(()),
            },
        };
        if result.is_ok() {
            self.started = true;
        }
        result
    }

    pub fn stop(&mut self) {
        match &mut self.hooks {
            Hooks::Native(hooks) => {
                if let Some(f) = hooks.exit.as_mut() {
                    f();
                }
            }
            Hooks::Dynamic { vtable, .. } => {
                if let Some(f) = vtable.exit {
                    f();
                }
            }
        }
        self.started = false;
    }

    pub fn authenticate(&mut self, user: &str, pass: &str) -> Result<Option<bool>> {
        match &mut self.hooks {
            Hooks::Native(hooks) => match hooks.auth.as_mut() {
                Some(f) => f(user, pass).map(Some),
                None => Ok(None),
            },
            Hooks::Dynamic { vtable, .. } => match vtable.auth {
                Some(f) => {
                    let c_user = to_cstring(user);
                    let c_pass = to_cstring(pass);
                    let rc = f(c_user.as_ptr(), c_pass.as_ptr());
                    match rc {
                        1 => Ok(Some(true)),
                        0 => Ok(Some(false)),
                        _ => Err(ConfcoreError::with_errno(
                            Category::Plugin,
                            rc,
                            format!("plugin {} auth hook failed", self.name),
                        )),
                    }
                }
                None => Ok(None),
            },
        }
    }

    fn extension_hook(&mut self, ext_stmt: &str, inst_stmt: &str) -> Result<bool> {
        match &mut self.hooks {
            Hooks::Native(hooks) => match hooks.extension.as_mut() {
                Some(f) => f(ext_stmt, inst_stmt).map(|_| true),
                None => Ok(false),
            },
            Hooks::Dynamic { vtable, .. } => match vtable.extension {
                Some(f) => {
                    let c_ext = to_cstring(ext_stmt);
                    let c_inst = to_cstring(inst_stmt);
                    let rc = f(c_ext.as_ptr(), c_inst.as_ptr());
                    if rc == 0 {
                        Ok(true)
                    } else {
                        Err(ConfcoreError::with_errno(
                            Category::Plugin,
                            rc,
                            format!("plugin {} extension hook failed for {ext_stmt}", self.name),
                        ))
                    }
                }
                None => Ok(false),
            },
        }
    }

    pub fn upgrade(&mut self, req: &UpgradeRequest) -> Result<Option<UpgradeOutcome>> {
        match &mut self.hooks {
            Hooks::Native(hooks) => match hooks.upgrade.as_mut() {
                Some(f) => f(req).map(Some),
                None => Ok(None),
            },
            Hooks::Dynamic { vtable, .. } => match vtable.upgrade {
                Some(f) => {
                    let c_from = to_cstring(req.from_revision);
                    let c_to = to_cstring(req.to_revision);
                    let (buf_ptr, buf_len) = match req.buffer {
                        Some(b) => (b.as_ptr(), b.len()),
                        None => (std::ptr::null(), 0),
                    };
                    let mut out_ptr: *mut u8 = std::ptr::null_mut();
                    let mut out_len: usize = 0;
                    let rc = f(
                        req.op.into(),
                        c_from.as_ptr(),
                        c_to.as_ptr(),
                        buf_ptr,
                        buf_len,
                        &mut out_ptr,
                        &mut out_len,
                    );
                    if rc < 0 {
                        return Err(ConfcoreError::with_errno(
                            Category::Plugin,
                            rc,
                            format!("plugin {} upgrade hook failed", self.name),
                        ));
                    }
                    if out_len == 0 || out_ptr.is_null() {
                        Ok(Some(UpgradeOutcome::Unchanged))
                    } else {
                        let buf = unsafe { reclaim_buffer(out_ptr, out_len) };
                        Ok(Some(UpgradeOutcome::Transformed(buf)))
                    }
                }
                None => Ok(None),
            },
        }
    }
}

/// Directory discovery: every entry under `dir` whose filename matches
/// `pattern`, sorted lexicographically (spec.md §4.5's deterministic
/// load order).
pub fn discover(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ConfcoreError::new(Category::Plugin, format!("reading plugin dir {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| ConfcoreError::new(Category::Plugin, format!("reading dir entry: {e}")))?;
        let file_name = entry.file_name();
        if let Some(name) = file_name.to_str() {
            if pattern.is_match(name) {
                found.push(entry.path());
            }
        }
    }
    found.sort();
    Ok(found)
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginHandle>,
    /// Caches each loaded plugin's origin (`.so` path, or `"<native>"`
    /// for a pseudo-plugin) by name, per spec.md §4.1's "key loaded
    /// plugin metadata" use of the hash index.
    metadata: crate::hash_index::HashIndex,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { plugins: Vec::new(), metadata: crate::hash_index::HashIndex::new() }
    }

    /// The cached origin metadata for every plugin registered so far.
    pub fn metadata(&self) -> &crate::hash_index::HashIndex {
        &self.metadata
    }

    pub fn register_pseudo(&mut self, name: impl Into<String>, hooks: NativeHooks) {
        let name = name.into();
        let origin = b"<native>";
        self.metadata.insert(&name, Some(origin), origin.len()).expect("non-empty origin");
        self.plugins.push(PluginHandle { name, hooks: Hooks::Native(hooks), started: false });
    }

    /// Loads a dynamic plugin from `path`, calling `init_symbol` (a
    /// [`PluginInitFn`]) to obtain its vtable.
    ///
    /// # Safety
    /// `path` must point at a shared object exporting `init_symbol` with
    /// exactly the [`PluginInitFn`] signature; calling an incompatible
    /// symbol is undefined behaviour.
    pub unsafe fn load_dynamic(&mut self, path: &Path, init_symbol: &str) -> Result<&str> {
        let library = Library::new(path)
            .map_err(|e| ConfcoreError::new(Category::Plugin, format!("loading {}: {e}", path.display())))?;
        let init: Symbol<PluginInitFn> = library
            .get(init_symbol.as_bytes())
            .map_err(|e| ConfcoreError::new(Category::Plugin, format!("resolving {init_symbol} in {}: {e}", path.display())))?;
        let vtable = init();
        let name = path
            .file_stem()
            .and_then(OsStr::to_str)
            .unwrap_or("plugin")
            .to_string();
        let origin = path.display().to_string();
        self.metadata.insert(&name, Some(origin.as_bytes()), origin.len()).expect("non-empty origin");
        self.plugins.push(PluginHandle { name: name.clone(), hooks: Hooks::Dynamic { _library: library, vtable }, started: false });
        Ok(&self.plugins.last().expect("just pushed").name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginHandle> {
        self.plugins.iter_mut().find(|p| p.name == name)
    }

    /// Starts every plugin in registration order, stopping at (and
    /// reporting) the first failure without starting the rest.
    pub fn start_all(&mut self) -> Result<()> {
        for plugin in self.plugins.iter_mut() {
            plugin.start()?;
        }
        Ok(())
    }

    /// Stops every plugin in registration order, best-effort: a plugin
    /// that never started is stopped anyway, since `exit` hooks must be
    /// able to tear down partially-initialised state.
    pub fn exit_all(&mut self) {
        for plugin in self.plugins.iter_mut() {
            plugin.stop();
        }
    }

    /// Runs the auth chain: the first plugin with an `auth` hook that
    /// returns `Some(true)` wins. A hook returning `Some(false)` yields
    /// to the next plugin; any `Err` aborts the chain immediately.
    pub fn authenticate(&mut self, user: &str, pass: &str) -> Result<bool> {
        for plugin in self.plugins.iter_mut() {
            if let Some(authenticated) = plugin.authenticate(user, pass)? {
                if authenticated {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Runs the extension hook of every plugin that implements one, once
    /// per `(extension-statement, instance-statement)` pair the schema
    /// oracle declares.
    pub fn run_extension_hooks(&mut self, oracle: &dyn SchemaOracle) -> Result<()> {
        for (ext_stmt, inst_stmt) in oracle.extension_statements() {
            for plugin in self.plugins.iter_mut() {
                plugin.extension_hook(&ext_stmt, &inst_stmt)?;
            }
        }
        Ok(())
    }

    /// Runs `name`'s upgrade hook, if it has one.
    pub fn upgrade(&mut self, name: &str, req: &UpgradeRequest) -> Result<Option<UpgradeOutcome>> {
        match self.get_mut(name) {
            Some(plugin) => plugin.upgrade(req),
            None => Err(ConfcoreError::new(Category::Plugin, format!("no such plugin: {name}"))),
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.iter().map(|p| p.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

//! The C ABI a dynamically-loaded plugin exposes (spec.md §4.5).
//!
//! A plugin library exports one symbol — by convention
//! `confcore_plugin_init`, though the registry accepts any name — typed
//! as [`PluginInitFn`]. Calling it returns a [`PluginVTable`] of
//! optional, `repr(C)` function pointers; a `None` entry means the
//! plugin does not implement that hook.

use std::ffi::{c_char, CStr, CString};
use std::os::raw::c_int;

/// `op` argument to the upgrade hook.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOpCode {
    Add = 0,
    Delete = 1,
    Change = 2,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PluginVTable {
    /// Returns 0 on success, nonzero on failure.
    pub start: Option<extern "C" fn() -> c_int>,
    pub exit: Option<extern "C" fn()>,
    /// Returns 1 if authenticated, 0 if not, negative on hard failure.
    pub auth: Option<extern "C" fn(user: *const c_char, pass: *const c_char) -> c_int>,
    /// Returns 0 on success, nonzero on failure.
    pub extension: Option<extern "C" fn(ext_stmt: *const c_char, inst_stmt: *const c_char) -> c_int>,
    /// Returns negative on failure; 0 with `*out_len == 0` means
    /// unchanged (the "0-without-buffer" case); 0 with `*out_len > 0`
    /// and `*out` non-null means a transformed buffer was produced (the
    /// "0-with-buffer" case). The caller reclaims `*out` via
    /// [`reclaim_buffer`], assuming the plugin was built against the
    /// same allocator.
    pub upgrade: Option<
        extern "C" fn(
            op: UpgradeOpCode,
            from_revision: *const c_char,
            to_revision: *const c_char,
            buf_in: *const u8,
            buf_in_len: usize,
            out: *mut *mut u8,
            out_len: *mut usize,
        ) -> c_int,
    >,
}

pub type PluginInitFn = unsafe extern "C" fn() -> PluginVTable;

pub fn to_cstring(s: &str) -> CString {
    CString::new(s).unwrap_or_else(|_| CString::new("").unwrap())
}

/// Reclaims a buffer a plugin's upgrade hook allocated via `Box<[u8]>`
/// and leaked with `Box::into_raw`.
///
/// # Safety
/// `ptr` must have been produced by `Box::into_raw(Box<[u8]>)` (or
/// equivalent) of exactly `len` bytes by code built against the same
/// global allocator as this crate.
pub unsafe fn reclaim_buffer(ptr: *mut u8, len: usize) -> Vec<u8> {
    Vec::from_raw_parts(ptr, len, len)
}

/// # Safety
/// `ptr` must be either null or point at a valid, NUL-terminated C string.
pub unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

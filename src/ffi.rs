use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};

use crate::store::SqliteStore;

/// Opaque handle that owns the offline store.
/// Native shells hold this as an unsafe pointer and pass it back to Rust APIs.
pub struct CacheHandle {
    store: SqliteStore,
}

fn ptr_to_str<'a>(ptr: *const c_char) -> Result<&'a str, ()> {
    if ptr.is_null() {
        return Err(());
    }
    unsafe { CStr::from_ptr(ptr).to_str().map_err(|_| ()) }
}

fn to_cstring_ptr(s: &str) -> *mut c_char {
    CString::new(s).map(|cs| cs.into_raw()).unwrap_or(std::ptr::null_mut())
}

fn to_json_ptr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(s) => to_cstring_ptr(&s),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a C string returned by this library.
#[unsafe(no_mangle)]
pub extern "C" fn hidesync_string_free(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}

/// Open the offline store. Path can be a file path or ":memory:".
/// Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn hidesync_open(path: *const c_char) -> *mut CacheHandle {
    let path = match ptr_to_str(path) {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    match SqliteStore::open(path) {
        Ok(store) => Box::into_raw(Box::new(CacheHandle { store })),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Close a previously opened store.
#[unsafe(no_mangle)]
pub extern "C" fn hidesync_close(handle: *mut CacheHandle) {
    if handle.is_null() {
        return;
    }
    unsafe {
        let _ = Box::from_raw(handle);
    }
}

/// Ensure the schema exists. Returns 0 on success, 1 on error, 2 on a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn hidesync_init_schema(handle: *mut CacheHandle) -> c_int {
    match unsafe { handle.as_ref() } {
        Some(h) => match h.store.init_schema() {
            Ok(_) => 0,
            Err(_) => 1,
        },
        None => 2,
    }
}

/// Mirror entry for `id` as JSON. Returns "null" when absent, null on error.
#[unsafe(no_mangle)]
pub extern "C" fn hidesync_mirror_get_json(handle: *mut CacheHandle, id: *const c_char) -> *mut c_char {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return std::ptr::null_mut();
    };
    let id = match ptr_to_str(id) {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    match h.store.mirror_get(id) {
        Ok(entry) => to_json_ptr(&entry),
        Err(_) => std::ptr::null_mut(),
    }
}

/// All mirror entries as a JSON array. Returns null on error.
#[unsafe(no_mangle)]
pub extern "C" fn hidesync_mirror_all_json(handle: *mut CacheHandle) -> *mut c_char {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return std::ptr::null_mut();
    };
    match h.store.mirror_get_all() {
        Ok(entries) => to_json_ptr(&entries),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Pending operations in replay order as a JSON array. Returns null on error.
#[unsafe(no_mangle)]
pub extern "C" fn hidesync_pending_ops_json(handle: *mut CacheHandle) -> *mut c_char {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return std::ptr::null_mut();
    };
    match h.store.queue_get_all() {
        Ok(ops) => to_json_ptr(&ops),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Number of queued operations, or -1 on error.
#[unsafe(no_mangle)]
pub extern "C" fn hidesync_pending_count(handle: *mut CacheHandle) -> i64 {
    let Some(h) = (unsafe { handle.as_ref() }) else {
        return -1;
    };
    match h.store.queue_len() {
        Ok(n) => n as i64,
        Err(_) => -1,
    }
}

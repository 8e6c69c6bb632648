//! C ABI shared with the provider library.
//!
//! # Entry points
//!
//! ```text
//! livepatch_create_reloader() -> *mut Reloader                         required
//! livepatch_patch_number(*mut Reloader) -> u64                         required
//! livepatch_reload_symbols(*mut Reloader, *const ReloadContext,
//!                          *mut ReloadResult) -> bool                  required
//! livepatch_attach_log(*const LogSink)                                 optional
//! livepatch_detach_log()                                               optional
//! livepatch_self_test() -> bool                                        optional
//! ```
//!
//! Strings cross the boundary as pointer + length, never NUL-terminated.

use std::ffi::c_void;
use std::path::Path;

use livepatch_core::RawRemapping;

pub const CREATE_RELOADER: &str = "livepatch_create_reloader";
pub const PATCH_NUMBER: &str = "livepatch_patch_number";
pub const RELOAD_SYMBOLS: &str = "livepatch_reload_symbols";
pub const ATTACH_LOG: &str = "livepatch_attach_log";
pub const DETACH_LOG: &str = "livepatch_detach_log";
pub const SELF_TEST: &str = "livepatch_self_test";

/// Every entry point with whether the host refuses to start without it.
pub const SYMBOLS: [(&str, bool); 6] = [
    (CREATE_RELOADER, true),
    (PATCH_NUMBER, true),
    (RELOAD_SYMBOLS, true),
    (ATTACH_LOG, false),
    (DETACH_LOG, false),
    (SELF_TEST, false),
];

pub type CreateReloaderFn = unsafe extern "C" fn() -> *mut c_void;
pub type PatchNumberFn = unsafe extern "C" fn(reloader: *mut c_void) -> u64;
pub type ReloadSymbolsFn = unsafe extern "C" fn(
    reloader: *mut c_void,
    context: *const RawReloadContext,
    result: *mut RawReloadResult,
) -> bool;
pub type AttachLogFn = unsafe extern "C" fn(sink: *const RawLogSink);
pub type DetachLogFn = unsafe extern "C" fn();
pub type SelfTestFn = unsafe extern "C" fn() -> bool;

/// Borrowed UTF-8 (or raw path) bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl RawStr {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    #[cfg(unix)]
    pub fn from_path(path: &Path) -> Self {
        use std::os::unix::ffi::OsStrExt;
        Self::from_bytes(path.as_os_str().as_bytes())
    }

    /// # Safety
    /// `ptr` must be valid for `len` bytes for the returned lifetime.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.ptr.is_null() || self.len == 0 {
            return &[];
        }
        // SAFETY: caller guarantees validity.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct RawReloadContext {
    pub definitions: RawStr,
    pub executable: RawStr,
    pub reloadee_handle: *mut c_void,
    pub remappings: *mut RawRemapping,
    pub remappings_capacity: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct RawReloadResult {
    pub remappings_written: u64,
}

/// Host logging hookup handed to `livepatch_attach_log`.
#[repr(C)]
#[derive(Debug)]
pub struct RawLogSink {
    pub write: extern "C" fn(level: u32, message: RawStr),
}

/// Levels understood by [`RawLogSink::write`].
pub mod level {
    pub const ERROR: u32 = 0;
    pub const WARN: u32 = 1;
    pub const INFO: u32 = 2;
    pub const DEBUG: u32 = 3;
    pub const TRACE: u32 = 4;
}

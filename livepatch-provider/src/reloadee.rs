use std::ffi::c_void;

use libloading::os::unix::Library;

use livepatch_core::ReloadeeHandle;

/// `dlopen(NULL)` handle for the running program, released on drop.
#[derive(Debug)]
pub struct Reloadee {
    raw: *mut c_void,
}

impl Reloadee {
    pub fn current() -> Self {
        Self {
            raw: Library::this().into_raw(),
        }
    }

    pub fn handle(&self) -> ReloadeeHandle {
        ReloadeeHandle(self.raw)
    }
}

impl Drop for Reloadee {
    fn drop(&mut self) {
        // SAFETY: `raw` came from `Library::into_raw` and is released once.
        drop(unsafe { Library::from_raw(self.raw) });
    }
}

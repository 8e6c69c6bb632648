//! C entry points exported to reloaded code.
//!
//! The host binary must export its dynamic symbols (`-C link-arg=-rdynamic`)
//! for a freshly loaded image to resolve these at load time.

use std::ffi::c_void;

use crate::sync::sync_global;

/// C ABI form of [`sync_global`]. Errors are logged; C callers get no result.
///
/// `to_me` is a C truth value: any nonzero byte means the destination lives
/// in the running image.
///
/// # Safety
/// Same contract as [`sync_global`].
#[no_mangle]
pub unsafe extern "C" fn livepatch_sync_global(
    dest: *mut c_void,
    src: *const c_void,
    size: u64,
    to_me: u8,
) {
    let to_me = to_me != 0;
    let Ok(size) = usize::try_from(size) else {
        tracing::error!(size, "global sync size exceeds the address space; skipped");
        return;
    };
    // SAFETY: forwarded to the caller.
    if let Err(err) = unsafe { sync_global(dest.cast(), src.cast(), size, to_me) } {
        tracing::error!(error = %err, "global sync completed with a protection error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_sync_copies_value() {
        let src: u32 = 42;
        let mut dest: u32 = 0;
        unsafe {
            livepatch_sync_global(
                (&mut dest as *mut u32).cast(),
                (&src as *const u32).cast(),
                4,
                0,
            )
        };
        assert_eq!(dest, 42);
    }

    #[test]
    fn any_nonzero_to_me_unlocks_the_destination() {
        let map = memmap2::MmapMut::map_anon(crate::page_size()).expect("map");
        let frozen = map.make_read_only().expect("read only");
        let src: u32 = 0xFEED;

        unsafe {
            livepatch_sync_global(
                frozen.as_ptr() as *mut c_void,
                (&src as *const u32).cast(),
                4,
                2,
            )
        };

        assert_eq!(u32::from_ne_bytes(frozen[..4].try_into().expect("4 bytes")), 0xFEED);
    }
}

//! Global state synchronizer.
//!
//! Newly loaded code calls this at its own initialization to pull the
//! current value of a global out of the running program (`to_me = true`,
//! destination in the fresh image, whose data may be mapped read-only) or
//! to push a value back (`to_me = false`, caller owns writability).
//!
//! Ordering is protect-then-copy, and the copy happens even when the
//! protection change fails; the failure is still returned.

use std::ptr;

use crate::error::SyncError;
use crate::page::{PageProtector, PageSpan, Protection, SystemPages};

/// Copy `size` bytes from `src` to `dest`, first making `dest` writable when
/// `to_me` is set.
///
/// # Safety
/// `src` must be readable and `dest` must be mapped for `size` bytes. If the
/// protection change fails and `dest` is not already writable, the copy
/// faults.
pub unsafe fn sync_global(
    dest: *mut u8,
    src: *const u8,
    size: usize,
    to_me: bool,
) -> Result<(), SyncError> {
    // SAFETY: forwarded to the caller.
    unsafe { sync_global_with(&SystemPages::new(), dest, src, size, to_me) }
}

/// [`sync_global`] with an explicit protector.
///
/// # Safety
/// Same as [`sync_global`].
pub unsafe fn sync_global_with(
    protector: &dyn PageProtector,
    dest: *mut u8,
    src: *const u8,
    size: usize,
    to_me: bool,
) -> Result<(), SyncError> {
    let mut outcome = Ok(());

    if to_me && size > 0 {
        let span = PageSpan::covering(dest as usize, size, protector.page_size());
        // SAFETY: caller guarantees dest is mapped.
        if let Err(source) = unsafe { protector.protect(span, Protection::ReadWrite) } {
            tracing::warn!(
                dest = format_args!("{:p}", dest),
                page = format_args!("{:#x}", span.start),
                error = %source,
                "mprotect failed before global sync; copying anyway"
            );
            outcome = Err(SyncError {
                dest: dest as usize,
                page: span.start,
                size,
                source,
            });
        }
    }

    // SAFETY: caller guarantees both ranges are valid for `size` bytes.
    unsafe { ptr::copy(src, dest, size) };
    outcome
}

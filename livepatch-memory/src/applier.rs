//! The patch applier: turns a remapping table into in-place writes on the
//! running image.
//!
//! # Per entry
//!
//! ```text
//! Func: pages of [old_addr, old_addr + 16)  -> R|W|X, write 16 stub bytes,
//!       flush the instruction cache over those 16 bytes
//! Mem:  pages of [new_addr, new_addr + size) -> R|W|X, copy size bytes old -> new
//! ```
//!
//! Both kinds keep EXEC: a destination page may share its frame with code.
//!
//! Entries are applied in table order. The first protection failure stops
//! the walk; entries already written stay written. There is no rollback.
//!
//! Guarded addresses (the applier's own entry, plus whatever the host adds)
//! are never rewritten, wherever they appear in the table.

use std::ptr;
use std::sync::atomic::{fence, Ordering};

use livepatch_core::{RemapKind, Remapping, RemappingTable, FUNC_PATCH_LEN};

use crate::error::ApplyError;
use crate::page::{PageProtector, PageSpan, Protection, SystemPages};
use crate::quiesce::Quiesced;

/// Outcome of one successful application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub skipped: usize,
}

pub struct PatchApplier {
    protector: Box<dyn PageProtector>,
    guarded: Vec<usize>,
}

impl Default for PatchApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PatchApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchApplier")
            .field("page_size", &self.protector.page_size())
            .field("guarded", &self.guarded)
            .finish()
    }
}

impl PatchApplier {
    /// Applier backed by `mprotect`.
    pub fn new() -> Self {
        Self::with_protector(Box::new(SystemPages::new()))
    }

    pub fn with_protector(protector: Box<dyn PageProtector>) -> Self {
        Self {
            protector,
            guarded: vec![Self::entry_address()],
        }
    }

    /// Address of [`PatchApplier::apply`], which is always guarded.
    pub fn entry_address() -> usize {
        PatchApplier::apply as usize
    }

    /// Never rewrite the function at `addr`.
    pub fn guard(&mut self, addr: usize) {
        if !self.guarded.contains(&addr) {
            self.guarded.push(addr);
        }
    }

    pub fn guarded(&self) -> &[usize] {
        &self.guarded
    }

    #[inline]
    pub fn is_guarded(&self, addr: usize) -> bool {
        self.guarded.contains(&addr)
    }

    /// Apply every entry of `table` to the running image.
    ///
    /// The whole table is validated first; a malformed table is rejected
    /// before any write.
    ///
    /// # Safety
    /// Every `old_addr` of a Func entry must be the entry of a function at
    /// least 16 bytes long, and every Mem entry must name `size` readable
    /// bytes at `old_addr` and `size` bytes of storage at `new_addr`.
    pub unsafe fn apply(
        &self,
        table: &RemappingTable<'_>,
        _quiesced: &Quiesced,
    ) -> Result<ApplyReport, ApplyError> {
        table.validate()?;

        let mut report = ApplyReport::default();
        for (index, entry) in table.iter().enumerate() {
            let remapping = entry?;

            if self.is_guarded(remapping.old_addr) {
                tracing::debug!(
                    index,
                    addr = format_args!("{:#x}", remapping.old_addr),
                    "skipping guarded remapping"
                );
                report.skipped += 1;
                continue;
            }

            tracing::trace!(
                index,
                kind = remapping.kind.name(),
                old = format_args!("{:#x}", remapping.old_addr),
                new = format_args!("{:#x}", remapping.new_addr),
                "remapping"
            );

            // SAFETY: caller guarantees the table describes valid targets.
            unsafe { self.apply_one(index, &remapping)? };
            report.applied += 1;
        }

        fence(Ordering::SeqCst);
        Ok(report)
    }

    unsafe fn apply_one(&self, index: usize, remapping: &Remapping) -> Result<(), ApplyError> {
        let page_size = self.protector.page_size();
        match remapping.kind {
            RemapKind::Func { bytes } => {
                let span = PageSpan::covering(remapping.old_addr, FUNC_PATCH_LEN, page_size);
                // Other code on the same pages may be running, so keep EXEC.
                unsafe { self.protect(index, remapping.old_addr, span, Protection::ReadWriteExec)? };
                // SAFETY: the span is now writable and the caller guarantees
                // 16 bytes of function entry at old_addr.
                unsafe {
                    ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        remapping.old_addr as *mut u8,
                        FUNC_PATCH_LEN,
                    );
                }
                self.protector.flush_instructions(remapping.old_addr, FUNC_PATCH_LEN);
            }
            RemapKind::Mem { size } => {
                if size == 0 {
                    return Ok(());
                }
                let span = PageSpan::covering(remapping.new_addr, size, page_size);
                unsafe { self.protect(index, remapping.new_addr, span, Protection::ReadWriteExec)? };
                // SAFETY: destination pages are writable; the caller guarantees
                // both ranges are valid for `size` bytes.
                unsafe {
                    ptr::copy(
                        remapping.old_addr as *const u8,
                        remapping.new_addr as *mut u8,
                        size,
                    );
                }
            }
        }
        Ok(())
    }

    unsafe fn protect(
        &self,
        index: usize,
        addr: usize,
        span: PageSpan,
        protection: Protection,
    ) -> Result<(), ApplyError> {
        // SAFETY: forwarded from `apply`.
        unsafe { self.protector.protect(span, protection) }.map_err(|source| {
            tracing::error!(
                index,
                addr = format_args!("{:#x}", addr),
                page = format_args!("{:#x}", span.start),
                error = %source,
                "page protection change failed; abandoning the rest of the table"
            );
            ApplyError::Protection {
                index,
                addr,
                page: span.start,
                len: span.len,
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use livepatch_core::RawRemapping;

    use super::*;

    /// Records protection requests and fails the ones at listed call numbers.
    struct Recording {
        calls: Rc<RefCell<Vec<(PageSpan, Protection)>>>,
        flushes: Rc<RefCell<Vec<(usize, usize)>>>,
        fail_on: Vec<usize>,
    }

    impl PageProtector for Recording {
        fn page_size(&self) -> usize {
            4096
        }

        unsafe fn protect(&self, span: PageSpan, protection: Protection) -> io::Result<()> {
            let mut calls = self.calls.borrow_mut();
            let n = calls.len();
            calls.push((span, protection));
            if self.fail_on.contains(&n) {
                return Err(io::Error::from_raw_os_error(libc::EACCES));
            }
            Ok(())
        }

        fn flush_instructions(&self, addr: usize, len: usize) {
            self.flushes.borrow_mut().push((addr, len));
        }
    }

    type Flushes = Rc<RefCell<Vec<(usize, usize)>>>;

    fn recording_with_flushes(
        fail_on: Vec<usize>,
    ) -> (PatchApplier, Rc<RefCell<Vec<(PageSpan, Protection)>>>, Flushes) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let flushes = Rc::new(RefCell::new(Vec::new()));
        let applier = PatchApplier::with_protector(Box::new(Recording {
            calls: calls.clone(),
            flushes: flushes.clone(),
            fail_on,
        }));
        (applier, calls, flushes)
    }

    fn recording(fail_on: Vec<usize>) -> (PatchApplier, Rc<RefCell<Vec<(PageSpan, Protection)>>>) {
        let (applier, calls, _) = recording_with_flushes(fail_on);
        (applier, calls)
    }

    #[test]
    fn empty_table_touches_nothing() {
        let (applier, calls) = recording(vec![]);
        let quiesced = unsafe { Quiesced::assume() };
        let report = unsafe { applier.apply(&RemappingTable::empty(), &quiesced) }.expect("apply");
        assert_eq!(report, ApplyReport::default());
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn mem_entry_keeps_exec_over_destination() {
        let (applier, calls) = recording(vec![]);
        let src = [7u8; 32];
        let mut dst = [0u8; 32];
        let storage = [RawRemapping::encode(&Remapping::mem(
            src.as_ptr() as usize,
            dst.as_mut_ptr() as usize,
            src.len(),
        ))];
        let table = RemappingTable::new(&storage, 1).expect("table");
        let quiesced = unsafe { Quiesced::assume() };

        let report = unsafe { applier.apply(&table, &quiesced) }.expect("apply");

        assert_eq!(report.applied, 1);
        assert_eq!(dst, src);
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, Protection::ReadWriteExec, "shared code must stay runnable");
        assert_eq!(
            calls[0].0,
            PageSpan::covering(dst.as_ptr() as usize, 32, 4096)
        );
    }

    #[test]
    fn func_entry_flushes_exactly_the_written_bytes() {
        let (applier, _, flushes) = recording_with_flushes(vec![]);
        let mut entry = [0u8; 32];
        let mut sink = [0u8; 8];
        let entry_addr = entry.as_mut_ptr() as usize;
        let storage = [
            RawRemapping::encode(&Remapping::func(entry_addr, 0, [0x90; FUNC_PATCH_LEN])),
            RawRemapping::encode(&Remapping::mem(
                entry.as_ptr() as usize,
                sink.as_mut_ptr() as usize,
                sink.len(),
            )),
        ];
        let table = RemappingTable::new(&storage, 2).expect("table");
        let quiesced = unsafe { Quiesced::assume() };

        unsafe { applier.apply(&table, &quiesced) }.expect("apply");

        assert_eq!(*flushes.borrow(), vec![(entry_addr, FUNC_PATCH_LEN)]);
        assert_eq!(&entry[..FUNC_PATCH_LEN], &[0x90; FUNC_PATCH_LEN]);
    }

    #[test]
    fn zero_sized_mem_entry_is_a_no_op() {
        let (applier, calls) = recording(vec![]);
        let storage = [RawRemapping::encode(&Remapping::mem(0x1000, 0x2000, 0))];
        let table = RemappingTable::new(&storage, 1).expect("table");
        let quiesced = unsafe { Quiesced::assume() };
        let report = unsafe { applier.apply(&table, &quiesced) }.expect("apply");
        assert_eq!(report.applied, 1);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn guarded_address_is_skipped_at_any_position() {
        let (mut applier, calls) = recording(vec![]);
        let src = [1u8; 8];
        let guarded = src.as_ptr() as usize;
        applier.guard(guarded);

        for position in 0..3 {
            let mut dst = [0u8; 8];
            let mut storage = vec![RawRemapping::encode(&Remapping::mem(0x10, 0x20, 0)); 3];
            storage[position] = RawRemapping::encode(&Remapping::mem(
                guarded,
                dst.as_mut_ptr() as usize,
                dst.len(),
            ));
            let table = RemappingTable::new(&storage, 3).expect("table");
            let quiesced = unsafe { Quiesced::assume() };
            let report = unsafe { applier.apply(&table, &quiesced) }.expect("apply");
            assert_eq!(report.skipped, 1, "position {position}");
            assert_eq!(report.applied, 2, "position {position}");
            assert_eq!(dst, [0u8; 8], "position {position}");
        }
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn protection_failure_abandons_the_remainder() {
        let (applier, calls) = recording(vec![1]);
        let src = [9u8; 4];
        let mut first = [0u8; 4];
        let mut second = [0u8; 4];
        let mut third = [0u8; 4];
        let storage = [
            RawRemapping::encode(&Remapping::mem(src.as_ptr() as usize, first.as_mut_ptr() as usize, 4)),
            RawRemapping::encode(&Remapping::mem(src.as_ptr() as usize, second.as_mut_ptr() as usize, 4)),
            RawRemapping::encode(&Remapping::mem(src.as_ptr() as usize, third.as_mut_ptr() as usize, 4)),
        ];
        let table = RemappingTable::new(&storage, 3).expect("table");
        let quiesced = unsafe { Quiesced::assume() };

        let err = unsafe { applier.apply(&table, &quiesced) }.unwrap_err();

        assert!(matches!(err, ApplyError::Protection { index: 1, .. }), "got: {err}");
        assert_eq!(first, src, "entries before the failure stay applied");
        assert_eq!(second, [0u8; 4]);
        assert_eq!(third, [0u8; 4]);
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn malformed_table_is_rejected_before_any_write() {
        let (applier, calls) = recording(vec![]);
        let src = [3u8; 4];
        let mut dst = [0u8; 4];
        let mut bad = RawRemapping::ZEROED;
        bad.kind = 42;
        bad.old_addr = 0x1000;
        let storage = [
            RawRemapping::encode(&Remapping::mem(src.as_ptr() as usize, dst.as_mut_ptr() as usize, 4)),
            bad,
        ];
        let table = RemappingTable::new(&storage, 2).expect("table");
        let quiesced = unsafe { Quiesced::assume() };

        let err = unsafe { applier.apply(&table, &quiesced) }.unwrap_err();

        assert!(matches!(err, ApplyError::Table(_)), "got: {err}");
        assert_eq!(dst, [0u8; 4]);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn applier_guards_itself_by_default() {
        let applier = PatchApplier::new();
        assert!(applier.is_guarded(PatchApplier::entry_address()));
    }
}

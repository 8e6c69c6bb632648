//! Page geometry and protection changes.
//!
//! Every mutation of the live image goes through a [`PageProtector`], so the
//! applier and the synchronizer can be exercised against a recording double
//! in tests while [`SystemPages`] issues the real `mprotect` calls.

use std::io;

/// Access rights requested for a span of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadWrite,
    ReadWriteExec,
}

impl Protection {
    fn to_prot(self) -> libc::c_int {
        match self {
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Protection::ReadWriteExec => libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        }
    }
}

/// A page-aligned address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    pub start: usize,
    pub len: usize,
}

impl PageSpan {
    /// The pages covering `[addr, addr + len)`. A zero-length range covers
    /// no pages.
    pub fn covering(addr: usize, len: usize, page_size: usize) -> Self {
        debug_assert!(page_size.is_power_of_two());
        if len == 0 {
            return Self {
                start: page_align(addr, page_size),
                len: 0,
            };
        }
        let start = page_align(addr, page_size);
        let last = page_align(addr.saturating_add(len - 1), page_size);
        Self {
            start,
            len: last - start + page_size,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn pages(&self, page_size: usize) -> usize {
        self.len / page_size
    }
}

/// Round `addr` down to the start of its page.
#[inline]
pub fn page_align(addr: usize, page_size: usize) -> usize {
    addr & !(page_size - 1)
}

/// The system page size.
pub fn page_size() -> usize {
    // SAFETY: sysconf is safe to call with _SC_PAGESIZE
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Changes access rights on pages of the current process.
pub trait PageProtector {
    fn page_size(&self) -> usize;

    /// Apply `protection` to every page in `span`.
    ///
    /// # Safety
    /// Changing protection on pages the process is executing from or reading
    /// can crash it; callers must know what lives in `span`.
    unsafe fn protect(&self, span: PageSpan, protection: Protection) -> io::Result<()>;

    /// Make instructions just written at `[addr, addr + len)` visible to
    /// instruction fetch on every core.
    fn flush_instructions(&self, addr: usize, len: usize) {
        flush_instruction_cache(addr, len);
    }
}

/// Synchronize the instruction cache with stores to `[addr, addr + len)`.
///
/// x86 keeps instruction fetch coherent with data stores, so this is a no-op
/// there. AArch64 cleans the data cache to the point of unification and
/// invalidates the instruction cache line by line.
#[inline]
pub fn flush_instruction_cache(addr: usize, len: usize) {
    if len == 0 {
        return;
    }
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    let _ = addr;

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: cache maintenance by VA does not fault on mapped memory,
        // and the range was just written through.
        unsafe { aarch64_sync_range(addr, len) }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
    {
        extern "C" {
            fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
        }
        // SAFETY: compiler runtime builtin; the range is valid for writes.
        unsafe { __clear_cache(addr as *mut libc::c_char, (addr + len) as *mut libc::c_char) };
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn aarch64_sync_range(addr: usize, len: usize) {
    use std::arch::asm;

    let ctr: u64;
    unsafe { asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags)) };
    // CTR_EL0 line sizes are log2 of 4-byte words.
    let dline = 4usize << ((ctr >> 16) & 0xF);
    let iline = 4usize << (ctr & 0xF);
    let end = addr + len;

    let mut line = addr & !(dline - 1);
    while line < end {
        unsafe { asm!("dc cvau, {}", in(reg) line, options(nostack, preserves_flags)) };
        line += dline;
    }
    unsafe { asm!("dsb ish", options(nostack, preserves_flags)) };

    let mut line = addr & !(iline - 1);
    while line < end {
        unsafe { asm!("ic ivau, {}", in(reg) line, options(nostack, preserves_flags)) };
        line += iline;
    }
    unsafe { asm!("dsb ish", "isb", options(nostack, preserves_flags)) };
}

/// `mprotect`-backed protector.
#[derive(Debug, Clone, Copy)]
pub struct SystemPages {
    page_size: usize,
}

impl Default for SystemPages {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPages {
    pub fn new() -> Self {
        Self {
            page_size: page_size(),
        }
    }
}

impl PageProtector for SystemPages {
    fn page_size(&self) -> usize {
        self.page_size
    }

    unsafe fn protect(&self, span: PageSpan, protection: Protection) -> io::Result<()> {
        if span.is_empty() {
            return Ok(());
        }
        // SAFETY: caller guarantees the span may have its protection changed
        let result = unsafe {
            libc::mprotect(
                span.start as *mut libc::c_void,
                span.len,
                protection.to_prot(),
            )
        };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

//! Domain types for the remapping protocol.
//!
//! Two representations live side by side: the typed [`Remapping`] used by the
//! host, and the `#[repr(C)]` [`RawRemapping`] record the provider writes into
//! shared storage. Raw records are only ever turned into typed ones through
//! [`RawRemapping::decode`], which checks the kind tag before touching the
//! payload.

use std::ffi::c_void;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::TableError;

/// Bytes of replacement code carried by a `Func` remapping.
pub const FUNC_PATCH_LEN: usize = 16;

/// Default number of records the shared table can hold.
pub const DEFAULT_TABLE_CAPACITY: usize = 1028;

/// Wire tag for [`RemapKind::Func`].
pub const RAW_KIND_FUNC: u32 = 0;

/// Wire tag for [`RemapKind::Mem`].
pub const RAW_KIND_MEM: u32 = 1;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Build identifier handed to the build tool for one reload cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PatchNumber(pub u64);

impl fmt::Display for PatchNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for PatchNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Opaque handle identifying the reloadee's loaded image (a `dlopen(NULL)`
/// handle on unix). Never dereferenced by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadeeHandle(pub *mut c_void);

impl ReloadeeHandle {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }
}

// ---------------------------------------------------------------------------
// Typed remapping
// ---------------------------------------------------------------------------

/// What a remapping does, with the payload that kind needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapKind {
    /// Overwrite the entry of the function at `old_addr` with a trampoline.
    Func { bytes: [u8; FUNC_PATCH_LEN] },
    /// Copy `size` bytes of global state from `old_addr` into `new_addr`.
    Mem { size: usize },
}

impl RemapKind {
    pub fn name(&self) -> &'static str {
        match self {
            RemapKind::Func { .. } => "func",
            RemapKind::Mem { .. } => "mem",
        }
    }
}

/// One instruction to the patch applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remapping {
    /// Address in the running image being superseded.
    pub old_addr: usize,
    /// Address of the replacement; only read for `Mem`.
    pub new_addr: usize,
    pub kind: RemapKind,
}

impl Remapping {
    pub fn func(old_addr: usize, new_addr: usize, bytes: [u8; FUNC_PATCH_LEN]) -> Self {
        Self {
            old_addr,
            new_addr,
            kind: RemapKind::Func { bytes },
        }
    }

    pub fn mem(old_addr: usize, new_addr: usize, size: usize) -> Self {
        Self {
            old_addr,
            new_addr,
            kind: RemapKind::Mem { size },
        }
    }

    /// The address range this remapping writes to, as `(start, len)`.
    pub fn write_range(&self) -> (usize, usize) {
        match self.kind {
            RemapKind::Func { .. } => (self.old_addr, FUNC_PATCH_LEN),
            RemapKind::Mem { size } => (self.new_addr, size),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMem {
    pub size: u64,
}

/// Payload overlay. Which field is meaningful is decided by
/// [`RawRemapping::kind`]; both fields are plain bytes, so either read is
/// defined, only the interpretation differs.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawPayload {
    pub func: [u8; FUNC_PATCH_LEN],
    pub mem: RawMem,
}

/// One record as the provider writes it into the shared table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawRemapping {
    pub kind: u32,
    pub old_addr: usize,
    pub new_addr: usize,
    pub payload: RawPayload,
}

impl RawRemapping {
    /// All-zero record, used to initialise fresh storage.
    pub const ZEROED: RawRemapping = RawRemapping {
        kind: RAW_KIND_FUNC,
        old_addr: 0,
        new_addr: 0,
        payload: RawPayload {
            func: [0; FUNC_PATCH_LEN],
        },
    };

    /// Encode a typed remapping into its wire form.
    pub fn encode(remapping: &Remapping) -> Self {
        let (kind, payload) = match remapping.kind {
            RemapKind::Func { bytes } => (RAW_KIND_FUNC, RawPayload { func: bytes }),
            RemapKind::Mem { size } => (
                RAW_KIND_MEM,
                RawPayload {
                    mem: RawMem { size: size as u64 },
                },
            ),
        };
        Self {
            kind,
            old_addr: remapping.old_addr,
            new_addr: remapping.new_addr,
            payload,
        }
    }

    /// Decode the record at `index`, validating the tag and addresses.
    pub fn decode(&self, index: usize) -> Result<Remapping, TableError> {
        if self.old_addr == 0 {
            return Err(TableError::NullAddress {
                index,
                field: "old",
            });
        }
        match self.kind {
            RAW_KIND_FUNC => {
                // SAFETY: the tag says the func view is the live one, and every
                // bit pattern is a valid `[u8; 16]`.
                let bytes = unsafe { self.payload.func };
                Ok(Remapping::func(self.old_addr, self.new_addr, bytes))
            }
            RAW_KIND_MEM => {
                if self.new_addr == 0 {
                    return Err(TableError::NullAddress {
                        index,
                        field: "new",
                    });
                }
                // SAFETY: the tag says the mem view is the live one, and every
                // bit pattern is a valid `u64`.
                let raw_size = unsafe { self.payload.mem.size };
                let size = usize::try_from(raw_size).map_err(|_| TableError::SizeOverflow {
                    index,
                    size: raw_size,
                })?;
                if self.new_addr.checked_add(size).is_none()
                    || self.old_addr.checked_add(size).is_none()
                {
                    return Err(TableError::SizeOverflow {
                        index,
                        size: raw_size,
                    });
                }
                Ok(Remapping::mem(self.old_addr, self.new_addr, size))
            }
            tag => Err(TableError::UnknownKind { index, tag }),
        }
    }
}

impl fmt::Debug for RawRemapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RawRemapping");
        s.field("kind", &self.kind)
            .field("old_addr", &format_args!("{:#x}", self.old_addr))
            .field("new_addr", &format_args!("{:#x}", self.new_addr));
        // SAFETY: both payload views are plain bytes; the tag only picks the
        // rendering.
        match self.kind {
            RAW_KIND_MEM => s.field("size", &unsafe { self.payload.mem.size }),
            _ => s.field("bytes", &unsafe { self.payload.func }),
        };
        s.finish()
    }
}

// ---------------------------------------------------------------------------
// Reload request / result
// ---------------------------------------------------------------------------

/// Everything the provider needs to compute one cycle's remappings.
///
/// `storage` is owned by the orchestrator for the duration of the cycle; the
/// provider writes records from index 0 and must not keep the slice past the
/// call that fills it.
#[derive(Debug)]
pub struct ReloadContext<'a> {
    pub definitions: &'a Path,
    pub executable: &'a Path,
    pub reloadee: ReloadeeHandle,
    pub storage: &'a mut [RawRemapping],
}

/// Output of one successful provider computation. Stale once the next cycle
/// starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReloadResult {
    pub remappings_written: usize,
}

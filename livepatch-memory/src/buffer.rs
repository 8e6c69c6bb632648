//! Shared backing storage for the remapping table.
//!
//! The table lives in an anonymous, process-local mapping: the provider
//! writes records into it during the compute phase and the applier reads them
//! back during apply. The mapping is read-write only; nothing in it is ever
//! executed.

use std::io;
use std::mem::size_of;

use memmap2::MmapMut;

use livepatch_core::RawRemapping;

use crate::error::BufferError;

/// Page-aligned storage for `capacity` raw remapping records.
#[derive(Debug)]
pub struct RemappingBuffer {
    map: MmapMut,
    capacity: usize,
}

impl RemappingBuffer {
    /// Map zeroed storage for `capacity` records.
    pub fn map(capacity: usize) -> Result<Self, BufferError> {
        let bytes = capacity
            .checked_mul(size_of::<RawRemapping>())
            .filter(|b| *b > 0)
            .ok_or_else(|| BufferError {
                capacity,
                bytes: 0,
                source: io::Error::new(io::ErrorKind::InvalidInput, "invalid table capacity"),
            })?;

        let map = MmapMut::map_anon(bytes).map_err(|source| BufferError {
            capacity,
            bytes,
            source,
        })?;

        Ok(Self { map, capacity })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.map.len()
    }

    pub fn records(&self) -> &[RawRemapping] {
        // SAFETY: the mapping is page-aligned, at least `capacity` records
        // long, and every bit pattern is a valid `RawRemapping`.
        unsafe {
            std::slice::from_raw_parts(self.map.as_ptr() as *const RawRemapping, self.capacity)
        }
    }

    pub fn records_mut(&mut self) -> &mut [RawRemapping] {
        // SAFETY: as in `records`, and `&mut self` makes the borrow unique.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.map.as_mut_ptr() as *mut RawRemapping,
                self.capacity,
            )
        }
    }

    /// Zero every record before the buffer is handed out again.
    pub fn clear(&mut self) {
        self.records_mut().fill(RawRemapping::ZEROED);
    }
}

/// Source of table storage for each reload cycle.
pub trait BufferAllocator {
    fn allocate(&mut self, capacity: usize) -> Result<RemappingBuffer, BufferError>;
}

/// Maps a fresh anonymous region per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousMapper;

impl BufferAllocator for AnonymousMapper {
    fn allocate(&mut self, capacity: usize) -> Result<RemappingBuffer, BufferError> {
        RemappingBuffer::map(capacity)
    }
}

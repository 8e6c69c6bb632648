//! Bounded, validated view over a provider-filled remapping table.

use crate::error::TableError;
use crate::types::{RawRemapping, Remapping};

/// The first `remappings_written` records of the shared storage.
///
/// Construction fails if the provider claims more records than the storage
/// holds, so nothing past the written prefix is ever read.
#[derive(Debug, Clone, Copy)]
pub struct RemappingTable<'a> {
    records: &'a [RawRemapping],
}

impl<'a> RemappingTable<'a> {
    pub fn new(storage: &'a [RawRemapping], written: usize) -> Result<Self, TableError> {
        if written > storage.len() {
            return Err(TableError::CountExceedsCapacity {
                written,
                capacity: storage.len(),
            });
        }
        Ok(Self {
            records: &storage[..written],
        })
    }

    /// An empty table.
    pub fn empty() -> Self {
        Self { records: &[] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decode entries lazily, in table order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Remapping, TableError>> + 'a {
        self.records
            .iter()
            .enumerate()
            .map(|(index, raw)| raw.decode(index))
    }

    /// Decode every entry without allocating, failing on the first bad one.
    pub fn validate(&self) -> Result<(), TableError> {
        self.iter().try_for_each(|entry| entry.map(|_| ()))
    }

    pub fn get(&self, index: usize) -> Option<Result<Remapping, TableError>> {
        self.records.get(index).map(|raw| raw.decode(index))
    }
}

//! Error types for livepatch-memory.

use thiserror::Error;

use livepatch_core::TableError;

/// Failures while applying a remapping table.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The table failed validation; nothing was applied.
    #[error("malformed remapping table: {0}")]
    Table(#[from] TableError),

    /// Changing page protection failed. Entries before `index` stay applied.
    #[error("failed to mprotect {page:#x} (+{len:#x}) for remapping {index} at {addr:#x}: {source}")]
    Protection {
        index: usize,
        addr: usize,
        page: usize,
        len: usize,
        #[source]
        source: std::io::Error,
    },
}

/// The single-thread precondition for patching does not hold.
#[derive(Debug, Error)]
pub enum QuiesceError {
    #[error("{count} threads are running; patching requires every other thread to be stopped")]
    OtherThreads { count: usize },

    #[error("failed to count process threads: {0}")]
    Inspect(#[source] std::io::Error),

    #[error("thread counting is not supported on this platform; use the `assume` quiescence policy")]
    Unsupported,
}

/// Protection change failed during a global sync. The copy was still
/// attempted.
#[derive(Debug, Error)]
#[error("failed to mprotect {page:#x} before syncing {size} bytes into {dest:#x}: {source}")]
pub struct SyncError {
    pub dest: usize,
    pub page: usize,
    pub size: usize,
    #[source]
    pub source: std::io::Error,
}

/// The shared remapping buffer could not be mapped.
#[derive(Debug, Error)]
#[error("failed to map {bytes} bytes for {capacity} remappings: {source}")]
pub struct BufferError {
    pub capacity: usize,
    pub bytes: usize,
    #[source]
    pub source: std::io::Error,
}

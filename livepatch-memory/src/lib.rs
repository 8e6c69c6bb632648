//! # livepatch-memory
//!
//! Everything that touches the live image: page protection, the shared
//! remapping buffer, the patch applier, the global synchronizer, and the
//! quiescence precondition.
//!
//! Call [`PatchApplier::apply`] with a [`RemappingTable`] and a
//! [`Quiesced`] token to rewrite function entries and migrate globals; call
//! [`sync_global`] from reloaded code to resynchronize a global.
//!
//! [`RemappingTable`]: livepatch_core::RemappingTable

pub mod applier;
pub mod buffer;
pub mod error;
pub mod ffi;
pub mod page;
pub mod quiesce;
pub mod sync;

pub use applier::{ApplyReport, PatchApplier};
pub use buffer::{AnonymousMapper, BufferAllocator, RemappingBuffer};
pub use error::{ApplyError, BufferError, QuiesceError, SyncError};
pub use page::{
    flush_instruction_cache, page_size, PageProtector, PageSpan, Protection, SystemPages,
};
pub use quiesce::Quiesced;
pub use sync::{sync_global, sync_global_with};

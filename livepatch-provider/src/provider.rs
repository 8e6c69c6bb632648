//! The capability the orchestrator needs from a remapping provider.

use livepatch_core::{PatchNumber, ReloadContext, ReloadResult};

use crate::error::ProviderError;

/// Computes the remappings between the running image and a fresh build.
///
/// Implementations own their cross-cycle state; the orchestrator only ever
/// calls through this trait.
pub trait Provider {
    /// The next build identifier. Must increase across calls.
    fn patch_number(&mut self) -> PatchNumber;

    /// Write up to `context.storage.len()` records from index 0 and report
    /// how many were written. On error the storage contents are undefined.
    fn reload_symbols(&mut self, context: ReloadContext<'_>)
        -> Result<ReloadResult, ProviderError>;
}

use std::path::PathBuf;

use thiserror::Error;

use livepatch_core::{PatchNumber, TableError};
use livepatch_memory::{ApplyError, BufferError, QuiesceError};
use livepatch_provider::ProviderError;

/// Error surface for the reload loop, triggers, and build step.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("waiting for reload trigger failed: {0}")]
    TriggerWait(#[source] std::io::Error),

    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to spawn build tool {tool}: {source}")]
    BuildSpawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to poll build for patch {patch}: {source}")]
    BuildWait {
        patch: PatchNumber,
        #[source]
        source: std::io::Error,
    },

    #[error("build for patch {patch} failed ({status})")]
    BuildFailed { patch: PatchNumber, status: String },

    #[error("remapping buffer allocation failed: {0}")]
    BufferAllocation(#[from] BufferError),

    #[error("provider could not compute remappings: {0}")]
    ProviderCompute(#[source] ProviderError),

    #[error("provider wrote a malformed table: {0}")]
    Table(#[from] TableError),

    #[error("patch application stopped: {0}")]
    Apply(#[from] ApplyError),

    #[error("image is not quiescent: {0}")]
    Quiesce(#[from] QuiesceError),

    #[error("failed to load provider: {0}")]
    ProviderLoad(#[source] ProviderError),

    #[error("cannot locate the running executable: {0}")]
    RunningImage(#[source] std::io::Error),

    #[error(
        "configured reloadee {expected} is not the running program {running}; \
         the reload loop must run inside the program it patches"
    )]
    ForeignImage { expected: PathBuf, running: PathBuf },
}

impl ReloadError {
    /// Errors that end the reload loop instead of aborting one cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReloadError::TriggerWait(_)
                | ReloadError::Watch(_)
                | ReloadError::ProviderLoad(_)
                | ReloadError::RunningImage(_)
                | ReloadError::ForeignImage { .. }
        )
    }

    /// Short stable label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ReloadError::TriggerWait(_) => "trigger_wait",
            ReloadError::Watch(_) => "watch",
            ReloadError::BuildSpawn { .. }
            | ReloadError::BuildWait { .. }
            | ReloadError::BuildFailed { .. } => "build",
            ReloadError::BufferAllocation(_) => "buffer_allocation",
            ReloadError::ProviderCompute(_) => "provider_compute",
            ReloadError::Table(_) => "table",
            ReloadError::Apply(ApplyError::Protection { .. }) => "protection",
            ReloadError::Apply(ApplyError::Table(_)) => "table",
            ReloadError::Quiesce(_) => "quiesce",
            ReloadError::ProviderLoad(_) => "provider_load",
            ReloadError::RunningImage(_) => "running_image",
            ReloadError::ForeignImage { .. } => "foreign_image",
        }
    }
}

//! Error types for livepatch-provider.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from reaching the provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider library could not be opened.
    #[error("failed to load provider library {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// A required entry point is missing from the provider.
    #[error("provider is missing required symbol `{symbol}`: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },

    /// `livepatch_create_reloader` returned null.
    #[error("provider returned a null reloader handle")]
    NullReloader,

    /// `livepatch_reload_symbols` reported failure; the table is undefined.
    #[error("provider failed to compute remappings for patch {patch}")]
    ComputeFailed { patch: u64 },

    /// The provider reported a count that does not fit the host.
    #[error("provider reported {written} remappings, which overflows the host address width")]
    CountOverflow { written: u64 },
}

//! livepatch core library — remapping data model, wire format, configuration.
//!
//! Public API surface:
//! - [`types`] — remappings, patch numbers, reload context/result
//! - [`table`] — bounded view over the provider-filled remapping storage
//! - [`config`] — `livepatch.yaml` loading and path resolution
//! - [`error`] — [`ConfigError`], [`TableError`]

pub mod config;
pub mod error;
pub mod table;
pub mod types;

pub use config::{
    ArtifactsConfig, BuildConfig, Config, ProviderConfig, QuiescencePolicy, TableConfig,
    TriggerConfig,
};
pub use error::{ConfigError, TableError};
pub use table::RemappingTable;
pub use types::{
    PatchNumber, RawRemapping, ReloadContext, ReloadResult, ReloadeeHandle, RemapKind, Remapping,
    DEFAULT_TABLE_CAPACITY, FUNC_PATCH_LEN,
};

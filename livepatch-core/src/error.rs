//! Error types for livepatch-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating `livepatch.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure reading the config file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error — includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (used by `livepatch config`).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// None of the lookup locations contained a config file.
    #[error("no livepatch config found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    /// A field holds a value the reload loop cannot work with.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised while decoding the provider-written remapping table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// The provider reported more entries than the storage can hold.
    #[error("provider reported {written} remappings but the table holds {capacity}")]
    CountExceedsCapacity { written: usize, capacity: usize },

    /// A record carries a kind tag that is neither Func nor Mem.
    #[error("remapping {index} has unknown kind tag {tag}")]
    UnknownKind { index: usize, tag: u32 },

    /// A record names a null address it would read from or write to.
    #[error("remapping {index} has a null {field} address")]
    NullAddress { index: usize, field: &'static str },

    /// A Mem record's size does not fit the host's address width.
    #[error("remapping {index} has size {size} which overflows the address space")]
    SizeOverflow { index: usize, size: u64 },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

//! `livepatch.yaml` configuration.
//!
//! # Lookup order
//!
//! ```text
//! --config <path>                 (explicit, must exist)
//! ./livepatch.yaml                (current directory)
//! ~/.livepatch/config.yaml        (per-user fallback)
//! ```
//!
//! # API pattern
//!
//! [`discover_at`] takes the working directory and home explicitly so tests
//! can root it in a `TempDir`; [`discover`] derives both from the process.
//!
//! Every relative path in the file is resolved against `project_root`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::DEFAULT_TABLE_CAPACITY;

pub const CONFIG_FILE: &str = "livepatch.yaml";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Working directory of the build tool; base for relative paths.
    pub project_root: PathBuf,
    pub build: BuildConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub quiescence: QuiescencePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Build tool executable.
    pub tool: PathBuf,
    /// Arguments placed before the patch number.
    #[serde(default = "default_build_args")]
    pub args: Vec<String>,
    /// Delay between subprocess status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Abort the cycle when the build exits unsuccessfully.
    #[serde(default = "default_true")]
    pub require_success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactsConfig {
    /// Symbol/definition artifact the provider diffs against.
    #[serde(default = "default_definitions")]
    pub definitions: PathBuf,
    /// Expected path of the reloadee executable. The provider is always
    /// handed the running image; when set, the loop refuses to start inside
    /// any other program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            definitions: default_definitions(),
            executable: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Shared library exposing the provider entry points.
    pub library: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Keep one mapping across cycles instead of mapping per cycle.
    #[serde(default)]
    pub reuse_buffer: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_TABLE_CAPACITY,
            reuse_buffer: false,
        }
    }
}

/// What wakes the reload loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerConfig {
    /// One line on standard input per cycle.
    #[default]
    Stdin,
    /// A change under `path` (relative to the project root).
    Watch {
        path: PathBuf,
        #[serde(default = "default_debounce_ms")]
        debounce_ms: u64,
    },
    /// A fixed period.
    Interval { period_ms: u64 },
}

/// How the applier's single-thread precondition is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuiescencePolicy {
    /// Verify the process runs exactly one thread before every apply.
    #[default]
    Check,
    /// The host pauses its other threads itself.
    Assume,
}

fn default_definitions() -> PathBuf {
    PathBuf::from("build/debug/hreload.odef")
}

fn default_build_args() -> Vec<String> {
    vec!["patch".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_capacity() -> usize {
    DEFAULT_TABLE_CAPACITY
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Resolution helpers
// ---------------------------------------------------------------------------

impl Config {
    /// Resolve `path` against `project_root` unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    pub fn build_tool(&self) -> PathBuf {
        self.resolve(&self.build.tool)
    }

    pub fn definitions_path(&self) -> PathBuf {
        self.resolve(&self.artifacts.definitions)
    }

    pub fn executable_path(&self) -> Option<PathBuf> {
        self.artifacts.executable.as_deref().map(|p| self.resolve(p))
    }

    pub fn provider_library(&self) -> PathBuf {
        self.resolve(&self.provider.library)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.build.poll_interval_ms)
    }

    /// Check the values serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_root.as_os_str().is_empty() {
            return Err(invalid("project_root", "must not be empty"));
        }
        if self.build.tool.as_os_str().is_empty() {
            return Err(invalid("build.tool", "must not be empty"));
        }
        if self.provider.library.as_os_str().is_empty() {
            return Err(invalid("provider.library", "must not be empty"));
        }
        if self.table.capacity == 0 {
            return Err(invalid("table.capacity", "must be at least 1"));
        }
        if let TriggerConfig::Interval { period_ms: 0 } = self.trigger {
            return Err(invalid("trigger.period_ms", "must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a config document. `origin` is only used in errors.
    pub fn from_yaml(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and validate the config at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_yaml(&contents, path)
}

/// `~/.livepatch/config.yaml` — pure, no I/O.
pub fn user_config_path_at(home: &Path) -> PathBuf {
    home.join(".livepatch").join("config.yaml")
}

/// Locate and load the config, using explicit directories.
///
/// Returns the config together with the path it was read from.
pub fn discover_at(
    explicit: Option<&Path>,
    cwd: &Path,
    home: Option<&Path>,
) -> Result<(Config, PathBuf), ConfigError> {
    if let Some(path) = explicit {
        return Ok((load(path)?, path.to_path_buf()));
    }

    let mut searched = vec![cwd.join(CONFIG_FILE)];
    if let Some(home) = home {
        searched.push(user_config_path_at(home));
    }

    for candidate in &searched {
        if candidate.is_file() {
            return Ok((load(candidate)?, candidate.clone()));
        }
    }

    Err(ConfigError::NotFound { searched })
}

/// `discover_at` convenience wrapper rooted in the process environment.
pub fn discover(explicit: Option<&Path>) -> Result<(Config, PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    let home = dirs::home_dir();
    discover_at(explicit, &cwd, home.as_deref())
}

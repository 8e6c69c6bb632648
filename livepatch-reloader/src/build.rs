//! The build step: run the project's build tool for one patch number.

use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use livepatch_core::{Config, PatchNumber};

use crate::error::ReloadError;

#[derive(Debug, Clone, Copy)]
pub struct BuildOutcome {
    pub patch: PatchNumber,
    pub status: ExitStatus,
    pub elapsed: Duration,
}

/// Produces the artifacts for a patch number.
pub trait Builder {
    fn build(&mut self, patch: PatchNumber) -> Result<BuildOutcome, ReloadError>;
}

/// Spawns `tool args... <patch>` in the project root and polls it to
/// completion. Standard streams are inherited.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    pub tool: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub poll_interval: Duration,
    pub require_success: bool,
}

impl CommandBuilder {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tool: config.build_tool(),
            args: config.build.args.clone(),
            working_dir: config.project_root.clone(),
            poll_interval: config.poll_interval(),
            require_success: config.build.require_success,
        }
    }
}

impl Builder for CommandBuilder {
    fn build(&mut self, patch: PatchNumber) -> Result<BuildOutcome, ReloadError> {
        let started = Instant::now();
        tracing::info!(patch = patch.0, tool = %self.tool.display(), "building patch");

        let mut child = Command::new(&self.tool)
            .args(&self.args)
            .arg(patch.to_string())
            .current_dir(&self.working_dir)
            .spawn()
            .map_err(|source| ReloadError::BuildSpawn {
                tool: self.tool.clone(),
                source,
            })?;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(self.poll_interval),
                Err(source) => return Err(ReloadError::BuildWait { patch, source }),
            }
        };
        let elapsed = started.elapsed();

        if !status.success() {
            if self.require_success {
                return Err(ReloadError::BuildFailed {
                    patch,
                    status: status.to_string(),
                });
            }
            tracing::warn!(patch = patch.0, %status, "build failed; continuing with existing artifacts");
        } else {
            tracing::debug!(patch = patch.0, elapsed_ms = elapsed.as_millis() as u64, "build finished");
        }

        Ok(BuildOutcome {
            patch,
            status,
            elapsed,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(dir: &TempDir, script: &str, require_success: bool) -> CommandBuilder {
        // `sh -c script N` binds the appended patch number to $0.
        CommandBuilder {
            tool: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(1),
            require_success,
        }
    }

    #[test]
    fn patch_number_is_the_last_argument_and_cwd_is_the_project_root() {
        let dir = TempDir::new().expect("tempdir");
        let mut builder = sh(&dir, "echo \"$0\" > built.txt", true);

        let outcome = builder.build(PatchNumber(7)).expect("build");

        assert!(outcome.status.success());
        assert_eq!(outcome.patch, PatchNumber(7));
        let written = std::fs::read_to_string(dir.path().join("built.txt")).expect("read");
        assert_eq!(written.trim(), "7");
    }

    #[test]
    fn failed_build_aborts_when_success_is_required() {
        let dir = TempDir::new().expect("tempdir");
        let err = sh(&dir, "exit 3", true).build(PatchNumber(2)).unwrap_err();
        assert!(
            matches!(err, ReloadError::BuildFailed { patch: PatchNumber(2), .. }),
            "got: {err}"
        );
        assert!(err.to_string().contains('3'), "got: {err}");
    }

    #[test]
    fn failed_build_is_tolerated_when_success_is_not_required() {
        let dir = TempDir::new().expect("tempdir");
        let outcome = sh(&dir, "exit 3", false).build(PatchNumber(2)).expect("build");
        assert_eq!(outcome.status.code(), Some(3));
    }

    #[test]
    fn missing_tool_is_a_spawn_error() {
        let dir = TempDir::new().expect("tempdir");
        let mut builder = sh(&dir, "true", true);
        builder.tool = dir.path().join("no-such-tool");
        let err = builder.build(PatchNumber(1)).unwrap_err();
        assert!(matches!(err, ReloadError::BuildSpawn { .. }), "got: {err}");
    }
}

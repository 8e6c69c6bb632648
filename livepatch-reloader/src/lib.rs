//! # livepatch-reloader
//!
//! The reload orchestrator. Each cycle waits for a trigger, builds the next
//! patch, asks the provider for a remapping table, and applies it to the
//! running image.
//!
//! The loop rewrites the process it runs in, so the reloadee embeds it.
//! Link the host with `-rdynamic` so reloaded code can resolve
//! `livepatch_sync_global`:
//!
//! ```no_run
//! use livepatch_reloader::{init_tracing, ReloadLoop, ShutdownFlag};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_tracing(false);
//!     let (config, _origin) = livepatch_core::config::discover(None)?;
//!     let shutdown = ShutdownFlag::new();
//!     ReloadLoop::from_config(&config, shutdown)?.run()?;
//!     Ok(())
//! }
//! ```

pub mod build;
mod error;
mod logging;
pub mod report;
mod runtime;
pub mod trigger;

pub use build::{BuildOutcome, Builder, CommandBuilder};
pub use error::ReloadError;
pub use logging::init_tracing;
pub use report::CycleReport;
pub use runtime::{CycleHook, LoopSettings, ReloadLoop};
pub use trigger::{
    IntervalTrigger, LineTrigger, ShutdownFlag, StdinTrigger, Trigger, TriggerEvent, WatchFilter,
    WatchTrigger,
};

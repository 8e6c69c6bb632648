//! The reload loop: `WaitTrigger -> Build -> Compute -> Apply`, repeated
//! until the trigger reports shutdown.
//!
//! A failed cycle is logged and abandoned; the loop then waits for the next
//! trigger. Only trigger failures end the loop with an error.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;

use livepatch_core::{
    Config, PatchNumber, QuiescencePolicy, ReloadContext, ReloadeeHandle, RemappingTable,
};
use livepatch_memory::{
    AnonymousMapper, ApplyReport, BufferAllocator, PatchApplier, Quiesced, RemappingBuffer,
};
use livepatch_provider::{DylibProvider, Provider, Reloadee};

use crate::build::{Builder, CommandBuilder};
use crate::error::ReloadError;
use crate::report::CycleReport;
use crate::trigger::{self, ShutdownFlag, Trigger, TriggerEvent};

pub type CycleHook = Box<dyn FnMut(&CycleReport)>;

/// The parts of the config the loop consults on every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub definitions: PathBuf,
    /// Image the provider computes addresses for. Always the program the
    /// loop runs in, since that is where the applier writes.
    pub executable: PathBuf,
    pub capacity: usize,
    pub reuse_buffer: bool,
    pub quiescence: QuiescencePolicy,
}

impl LoopSettings {
    /// Settings for a loop running inside the current process.
    pub fn from_config(config: &Config) -> Result<Self, ReloadError> {
        let running = std::env::current_exe().map_err(ReloadError::RunningImage)?;
        Self::from_config_at(config, &running)
    }

    /// Like [`LoopSettings::from_config`], with the running image given
    /// explicitly. Fails when the config names a different reloadee.
    pub fn from_config_at(config: &Config, running: &Path) -> Result<Self, ReloadError> {
        if let Some(expected) = config.executable_path() {
            if !same_file(&expected, running) {
                return Err(ReloadError::ForeignImage {
                    expected,
                    running: running.to_path_buf(),
                });
            }
        }
        Ok(Self {
            definitions: config.definitions_path(),
            executable: running.to_path_buf(),
            capacity: config.table.capacity,
            reuse_buffer: config.table.reuse_buffer,
            quiescence: config.quiescence,
        })
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

pub struct ReloadLoop {
    settings: LoopSettings,
    trigger: Box<dyn Trigger>,
    builder: Box<dyn Builder>,
    provider: Box<dyn Provider>,
    allocator: Box<dyn BufferAllocator>,
    applier: PatchApplier,
    reloadee: Option<Reloadee>,
    cached: Option<RemappingBuffer>,
    on_cycle: Option<CycleHook>,
}

impl std::fmt::Debug for ReloadLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadLoop")
            .field("settings", &self.settings)
            .field("applier", &self.applier)
            .field("reloadee", &self.reloadee)
            .finish_non_exhaustive()
    }
}

impl ReloadLoop {
    pub fn new(
        settings: LoopSettings,
        trigger: Box<dyn Trigger>,
        builder: Box<dyn Builder>,
        provider: Box<dyn Provider>,
    ) -> Self {
        Self {
            settings,
            trigger,
            builder,
            provider,
            allocator: Box::new(AnonymousMapper),
            applier: Self::guarded(PatchApplier::new()),
            reloadee: None,
            cached: None,
            on_cycle: None,
        }
    }

    /// Wire the loop from a config: provider library, trigger, build tool.
    /// A provider that cannot be loaded is fatal here, before any cycle.
    ///
    /// The loop patches the process it runs in, so this is meant to be
    /// called by the reloadee itself (linked with `-rdynamic` so reloaded
    /// code can reach `livepatch_sync_global`).
    pub fn from_config(config: &Config, shutdown: ShutdownFlag) -> Result<Self, ReloadError> {
        let settings = LoopSettings::from_config(config)?;
        let mut provider =
            DylibProvider::open(&config.provider_library()).map_err(ReloadError::ProviderLoad)?;
        if !provider.attach_log() {
            tracing::debug!("provider does not accept a log sink");
        }
        let trigger = trigger::from_config(config, shutdown)?;

        tracing::info!(image = %settings.executable.display(), "reload loop bound to the running image");

        Ok(Self::new(
            settings,
            trigger,
            Box::new(CommandBuilder::from_config(config)),
            Box::new(provider),
        )
        .with_reloadee(Reloadee::current()))
    }

    fn guarded(mut applier: PatchApplier) -> PatchApplier {
        applier.guard(ReloadLoop::run_cycle as usize);
        applier.guard(ReloadLoop::run as usize);
        applier
    }

    pub fn with_allocator(mut self, allocator: Box<dyn BufferAllocator>) -> Self {
        self.allocator = allocator;
        self.cached = None;
        self
    }

    pub fn with_applier(mut self, applier: PatchApplier) -> Self {
        self.applier = Self::guarded(applier);
        self
    }

    pub fn with_reloadee(mut self, reloadee: Reloadee) -> Self {
        self.reloadee = Some(reloadee);
        self
    }

    /// Called after every completed cycle, e.g. to re-enter reloaded code.
    pub fn on_cycle(mut self, hook: impl FnMut(&CycleReport) + 'static) -> Self {
        self.on_cycle = Some(Box::new(hook));
        self
    }

    /// Register further addresses the applier must never rewrite.
    pub fn applier_mut(&mut self) -> &mut PatchApplier {
        &mut self.applier
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Run cycles until shutdown. Returns `Ok` on a clean shutdown and the
    /// error of the first fatal failure otherwise.
    pub fn run(&mut self) -> Result<(), ReloadError> {
        loop {
            match self.run_cycle() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!("shutdown requested; reload loop stopped");
                    return Ok(());
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::error!(kind = err.kind(), error = %err, "reload cycle aborted");
                }
            }
        }
    }

    /// Wait for one trigger and run the cycle it starts. `Ok(None)` means
    /// the trigger asked for shutdown.
    pub fn run_cycle(&mut self) -> Result<Option<CycleReport>, ReloadError> {
        if self.trigger.wait()? == TriggerEvent::Shutdown {
            return Ok(None);
        }

        let started = Instant::now();
        let patch = self.provider.patch_number();
        let span = tracing::info_span!("cycle", patch = patch.0);
        let _entered = span.enter();

        let build = self.builder.build(patch)?;

        let mut buffer = self.take_buffer()?;
        let outcome = self.compute_and_apply(patch, &mut buffer);
        self.restore_buffer(buffer);
        let (written, applied) = outcome?;

        let report = CycleReport {
            patch,
            remappings_written: written,
            applied: applied.applied,
            skipped: applied.skipped,
            build_ms: build.elapsed.as_millis() as u64,
            duration_ms: started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
        };
        tracing::info!(
            patch = patch.0,
            written = report.remappings_written,
            applied = report.applied,
            skipped = report.skipped,
            build_ms = report.build_ms,
            duration_ms = report.duration_ms,
            "reload cycle complete",
        );
        if let Some(hook) = self.on_cycle.as_mut() {
            hook(&report);
        }
        Ok(Some(report))
    }

    fn compute_and_apply(
        &mut self,
        patch: PatchNumber,
        buffer: &mut RemappingBuffer,
    ) -> Result<(usize, ApplyReport), ReloadError> {
        let reloadee = self
            .reloadee
            .as_ref()
            .map(Reloadee::handle)
            .unwrap_or_else(ReloadeeHandle::null);

        let context = ReloadContext {
            definitions: &self.settings.definitions,
            executable: &self.settings.executable,
            reloadee,
            storage: buffer.records_mut(),
        };
        let result = self
            .provider
            .reload_symbols(context)
            .map_err(ReloadError::ProviderCompute)?;
        let written = result.remappings_written;
        tracing::debug!(patch = patch.0, written, "provider computed remappings");

        let table = RemappingTable::new(buffer.records(), written)?;
        let quiesced = self.quiesce()?;
        // SAFETY: the provider computed the table against this image and its
        // fresh build; `quiesced` proves nothing else is running it.
        let applied = unsafe { self.applier.apply(&table, &quiesced)? };
        Ok((written, applied))
    }

    fn quiesce(&self) -> Result<Quiesced, ReloadError> {
        Ok(match self.settings.quiescence {
            QuiescencePolicy::Check => Quiesced::check_allowing(self.trigger.helper_threads())?,
            // SAFETY: the host opted in to pausing its own threads.
            QuiescencePolicy::Assume => unsafe { Quiesced::assume() },
        })
    }

    fn take_buffer(&mut self) -> Result<RemappingBuffer, ReloadError> {
        if let Some(mut buffer) = self.cached.take() {
            if buffer.capacity() == self.settings.capacity {
                buffer.clear();
                return Ok(buffer);
            }
        }
        Ok(self.allocator.allocate(self.settings.capacity)?)
    }

    fn restore_buffer(&mut self, buffer: RemappingBuffer) {
        if self.settings.reuse_buffer {
            self.cached = Some(buffer);
        }
    }
}

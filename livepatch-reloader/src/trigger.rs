//! What wakes the reload loop.
//!
//! Every trigger blocks in [`Trigger::wait`] until the next cycle should run
//! or until shutdown. A [`ShutdownFlag`] shared with the host is polled by the
//! triggers that can block indefinitely, so the loop always has a way out.

use std::io::{self, BufRead, StdinLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use livepatch_core::{Config, TriggerConfig};

use crate::error::ReloadError;

/// How often blocking triggers re-check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Fire,
    Shutdown,
}

pub trait Trigger {
    fn wait(&mut self) -> Result<TriggerEvent, ReloadError>;

    /// Threads this trigger keeps running in the background. They never
    /// execute patched code and are tolerated by the quiescence check.
    fn helper_threads(&self) -> usize {
        0
    }
}

/// Cooperative stop request shared between the host and the loop.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Line trigger
// ---------------------------------------------------------------------------

/// One line read per cycle; end of input means shutdown.
pub struct LineTrigger<R> {
    reader: R,
    line: String,
    shutdown: ShutdownFlag,
}

pub type StdinTrigger = LineTrigger<StdinLock<'static>>;

impl<R: BufRead> LineTrigger<R> {
    pub fn new(reader: R, shutdown: ShutdownFlag) -> Self {
        Self {
            reader,
            line: String::new(),
            shutdown,
        }
    }
}

impl StdinTrigger {
    pub fn stdin(shutdown: ShutdownFlag) -> Self {
        Self::new(io::stdin().lock(), shutdown)
    }
}

impl<R: BufRead> Trigger for LineTrigger<R> {
    fn wait(&mut self) -> Result<TriggerEvent, ReloadError> {
        if self.shutdown.is_requested() {
            return Ok(TriggerEvent::Shutdown);
        }
        self.line.clear();
        let read = self
            .reader
            .read_line(&mut self.line)
            .map_err(ReloadError::TriggerWait)?;
        if read == 0 || self.shutdown.is_requested() {
            return Ok(TriggerEvent::Shutdown);
        }
        Ok(TriggerEvent::Fire)
    }
}

// ---------------------------------------------------------------------------
// Watch trigger
// ---------------------------------------------------------------------------

/// Collapses a burst of change events into a single cycle.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_fired: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: None,
        }
    }

    pub fn should_fire(&mut self, now: Instant) -> bool {
        match self.last_fired {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last_fired = Some(now);
                true
            }
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Paths whose changes never start a cycle. The build writes its outputs
/// under the watched tree, and those writes must not trigger the next build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchFilter {
    ignored: Vec<PathBuf>,
}

impl WatchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore `path` and everything below it.
    pub fn ignore(mut self, path: &Path) -> Self {
        self.ignored.push(canonical_prefix(path));
        self
    }

    /// Ignore what the build writes: an artifact's directory when it sits
    /// strictly inside `root`, otherwise just the artifact itself.
    pub fn ignore_artifact(self, root: &Path, artifact: &Path) -> Self {
        let root = canonical_prefix(root);
        let artifact = canonical_prefix(artifact);
        match artifact.parent() {
            Some(dir) if dir != root && dir.starts_with(&root) => {
                let dir = dir.to_path_buf();
                self.ignore(&dir)
            }
            _ => self.ignore(&artifact),
        }
    }

    pub fn ignored(&self) -> &[PathBuf] {
        &self.ignored
    }

    /// A relevant change touching at least one path outside the ignore list.
    pub fn accepts(&self, event: &Event) -> bool {
        if !is_relevant_event_kind(&event.kind) {
            return false;
        }
        event.paths.is_empty() || event.paths.iter().any(|path| !self.is_ignored(path))
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored.iter().any(|prefix| path.starts_with(prefix))
    }
}

/// Canonical form of `path`, resolving the longest existing ancestor so
/// artifact directories that the first build has yet to create still match.
fn canonical_prefix(path: &Path) -> PathBuf {
    for ancestor in path.ancestors() {
        if let Ok(base) = std::fs::canonicalize(ancestor) {
            return match path.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => base.join(rest),
                _ => base,
            };
        }
    }
    path.to_path_buf()
}

/// Fires when something under a directory changes.
pub struct WatchTrigger {
    // Kept alive for its event thread; dropping it stops the events.
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    debouncer: Debouncer,
    filter: WatchFilter,
    root: PathBuf,
    shutdown: ShutdownFlag,
}

impl std::fmt::Debug for WatchTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchTrigger")
            .field("root", &self.root)
            .field("debouncer", &self.debouncer)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl WatchTrigger {
    pub fn new(root: &Path, debounce: Duration, shutdown: ShutdownFlag) -> Result<Self, ReloadError> {
        Self::filtered(root, debounce, WatchFilter::new(), shutdown)
    }

    pub fn filtered(
        root: &Path,
        debounce: Duration,
        filter: WatchFilter,
        shutdown: ShutdownFlag,
    ) -> Result<Self, ReloadError> {
        let root = canonical_prefix(root);
        let root = root.as_path();
        let (event_tx, events) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(
            root = %root.display(),
            debounce_ms = debounce.as_millis() as u64,
            ignored = filter.ignored().len(),
            "watching for changes"
        );

        Ok(Self {
            _watcher: watcher,
            events,
            debouncer: Debouncer::new(debounce),
            filter,
            root: root.to_path_buf(),
            shutdown,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Trigger for WatchTrigger {
    fn wait(&mut self) -> Result<TriggerEvent, ReloadError> {
        loop {
            if self.shutdown.is_requested() {
                return Ok(TriggerEvent::Shutdown);
            }
            let event = match self.events.recv_timeout(SHUTDOWN_POLL) {
                Ok(Ok(event)) => event,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "watcher event error");
                    continue;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ReloadError::TriggerWait(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "file watcher stopped delivering events",
                    )));
                }
            };
            if !self.filter.accepts(&event) {
                continue;
            }
            if !self.debouncer.should_fire(Instant::now()) {
                continue;
            }
            if let Some(path) = event.paths.first() {
                tracing::debug!(path = %path.display(), "change detected");
            }
            return Ok(TriggerEvent::Fire);
        }
    }

    fn helper_threads(&self) -> usize {
        // inotify and kqueue backends each run one event loop thread.
        1
    }
}

// ---------------------------------------------------------------------------
// Interval trigger
// ---------------------------------------------------------------------------

/// Fires once per period.
#[derive(Debug)]
pub struct IntervalTrigger {
    period: Duration,
    shutdown: ShutdownFlag,
}

impl IntervalTrigger {
    pub fn new(period: Duration, shutdown: ShutdownFlag) -> Self {
        Self { period, shutdown }
    }
}

impl Trigger for IntervalTrigger {
    fn wait(&mut self) -> Result<TriggerEvent, ReloadError> {
        let deadline = Instant::now() + self.period;
        loop {
            if self.shutdown.is_requested() {
                return Ok(TriggerEvent::Shutdown);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(TriggerEvent::Fire);
            }
            thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}

/// Build the trigger the config asks for.
pub fn from_config(config: &Config, shutdown: ShutdownFlag) -> Result<Box<dyn Trigger>, ReloadError> {
    Ok(match &config.trigger {
        TriggerConfig::Stdin => Box::new(StdinTrigger::stdin(shutdown)),
        TriggerConfig::Watch { path, debounce_ms } => {
            let root = config.resolve(path);
            Box::new(WatchTrigger::filtered(
                &root,
                Duration::from_millis(*debounce_ms),
                artifact_filter(config, &root),
                shutdown,
            )?)
        }
        TriggerConfig::Interval { period_ms } => Box::new(IntervalTrigger::new(
            Duration::from_millis(*period_ms),
            shutdown,
        )),
    })
}

/// Ignore list covering every file the build produces.
pub fn artifact_filter(config: &Config, root: &Path) -> WatchFilter {
    let mut artifacts = vec![config.definitions_path(), config.provider_library()];
    artifacts.extend(config.executable_path());
    artifacts
        .iter()
        .fold(WatchFilter::new(), |filter, artifact| filter.ignore_artifact(root, artifact))
}

//! Routing rule: sources, destinations, hooks and the lifecycle tying them
//! together
//!
//! A [`Path`] is configured in the cold path (`parse`, `check`) and, when
//! started, hands a shared [`PathCore`] to the worker. The core holds the
//! state touched per record: the composite record, trigger bitsets, the
//! record pool and the destination queues.

use crate::core::bitset::{AtomicSourceSet, SourceMask, MAX_SOURCES};
use crate::core::mapping::{sample_length, MappingEntry, MappingError};
use crate::core::record::{Record, DEFAULT_SAMPLE_LENGTH};
use crate::hooks::{HookError, HookList, HookRegistry};
use crate::hot_path::path_destination::PathDestination;
use crate::hot_path::path_source::PathSource;
use crate::hot_path::path_worker::{JobId, PathJob, PathWorker, WorkerError};
use crate::infrastructure::config::{PathConfig, DEFAULT_QUEUELEN};
use crate::infrastructure::fd::TimerFd;
use crate::infrastructure::metrics::{PathMetrics, PathMetricsSnapshot};
use crate::infrastructure::pool::{BufferPool, Smp};
use crate::nodes::{same_node, Node, NodeDirectory, NodeError};
use crossbeam::epoch::{self, Atomic, Owned};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn, Level};
use uuid::Uuid;

/// Records reserved beyond the destination queues: the composite record,
/// batches in flight and replaced composites awaiting reclamation
pub const POOL_HEADROOM: usize = 128;

#[derive(Error, Debug)]
pub enum PathError {
    #[error("invalid path state transition {from:?} -> {to:?}")]
    InvalidTransition { from: PathState, to: PathState },

    #[error("invalid mode '{0}', expected 'any' or 'all'")]
    InvalidMode(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("mask entry '{0}' is not a source of this path")]
    UnknownMaskEntry(String),

    #[error("path has {count} sources, at most {max} are supported")]
    TooManySources { count: usize, max: usize },

    #[error("node '{node}' cannot be used as a {role}")]
    Capability { node: String, role: &'static str },

    #[error("node '{0}' has no poll descriptor; it can only be the single source of a path with rate > 0")]
    NotPollable(String),

    #[error("path needs at least one input and one output")]
    Empty,

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("reversing a path requires exactly one source and one destination")]
    NotReversible,

    #[error("record pool exhausted")]
    PoolExhausted,

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("path I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathState {
    Destroyed,
    Initialized,
    Parsed,
    Checked,
    Started,
    Stopping,
    Stopped,
}

/// Trigger mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    /// Any masked source fires the path
    #[default]
    Any,
    /// Every masked source must contribute before the path fires
    All,
}

impl FromStr for PathMode {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(PathMode::Any),
            "all" => Ok(PathMode::All),
            _ => Err(PathError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for PathMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathMode::Any => write!(f, "any"),
            PathMode::All => write!(f, "all"),
        }
    }
}

/// Per-record state of a started path, shared with the worker
pub struct PathCore {
    name: String,
    pub(crate) mode: PathMode,
    pub(crate) mask: SourceMask,
    /// Sources that contributed since the last firing
    pub(crate) received: AtomicSourceSet,
    /// Last fully merged composite record; never null
    previous: Atomic<Smp>,
    pool: BufferPool,
    hooks: Arc<Mutex<HookList>>,
    destinations: Vec<Arc<PathDestination>>,
    metrics: Arc<PathMetrics>,
    /// Fired by a source since the last rate tick
    fired: AtomicBool,
}

impl PathCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        mode: PathMode,
        mask: SourceMask,
        samplelen: usize,
        pool_size: usize,
        hooks: Arc<Mutex<HookList>>,
        destinations: Vec<Arc<PathDestination>>,
        metrics: Arc<PathMetrics>,
    ) -> Result<Self, PathError> {
        let pool = BufferPool::new(pool_size, samplelen);

        let mut initial = pool.alloc().ok_or(PathError::PoolExhausted)?;
        if let Some(r) = initial.get_mut() {
            r.set_len(samplelen);
        }

        Ok(Self {
            name: name.to_string(),
            mode,
            mask,
            received: AtomicSourceSet::new(),
            previous: Atomic::new(initial),
            pool,
            hooks,
            destinations,
            metrics,
            fired: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &PathMetrics {
        &self.metrics
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn destinations(&self) -> &[Arc<PathDestination>] {
        &self.destinations
    }

    /// Reference to the current composite record
    pub fn previous(&self) -> Option<Smp> {
        let guard = epoch::pin();
        let current = self.previous.load(Ordering::Acquire, &guard);
        // SAFETY: a replaced composite is only destroyed after every guard
        // pinned before its replacement is gone.
        unsafe { current.as_ref() }.cloned()
    }

    /// Publish a new composite record derived from the current one
    ///
    /// The candidate is a copy of the current composite with the sequence
    /// incremented and `update` applied. It replaces the current composite
    /// only if nobody else did in the meantime; otherwise the whole step is
    /// retried. Returns `None` if the pool is exhausted.
    pub fn publish<F>(&self, update: F) -> Option<Smp>
    where
        F: Fn(&mut Record),
    {
        let guard = epoch::pin();
        loop {
            let current = self.previous.load(Ordering::Acquire, &guard);
            // SAFETY: see `previous`; the pointer is never null.
            let prev = unsafe { current.as_ref() }?;

            let mut candidate = self.pool.clone_record(prev)?;
            let record = candidate.get_mut()?;
            record.sequence = record.sequence.wrapping_add(1);
            update(record);

            match self.previous.compare_exchange(
                current,
                Owned::new(candidate.clone()),
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    // SAFETY: `current` is unlinked; only pinned readers can still see it.
                    unsafe { guard.defer_destroy(current) };
                    guard.flush();
                    return Some(candidate);
                }
                Err(_) => self.metrics.record_cas_retry(),
            }
        }
    }

    /// Show a raw batch from source `index` to the read hooks
    pub(crate) fn inspect(&self, index: usize, batch: &[Smp]) {
        if !batch.is_empty() {
            self.hooks.lock().read(batch, &self.name, index);
        }
    }

    pub(crate) fn mark_fired(&self) {
        self.fired.store(true, Ordering::Release);
    }

    /// Run the hooks over `smps` and hand what they accept to every destination
    pub(crate) fn fire(&self, mut smps: Vec<Smp>) {
        let outcome = self.hooks.lock().process(&mut smps, &self.name);
        self.metrics.record_fired();
        if outcome.dropped > 0 {
            self.metrics.record_hook_drops(outcome.dropped as u64);
        }
        if smps.is_empty() {
            return;
        }

        for dest in &self.destinations {
            dest.enqueue(&smps);
        }
        trace!(target: "path", path = %self.name, records = smps.len(), "fanned out");
    }

    /// Send the current composite again unless a source fired since the last call
    ///
    /// Returns `true` if it was sent.
    pub fn resend(&self) -> bool {
        if self.fired.swap(false, Ordering::AcqRel) {
            return false;
        }
        match self.publish(|_| {}) {
            Some(smp) => {
                self.fire(vec![smp]);
                true
            }
            None => {
                warn!(target: "path", path = %self.name, "pool underrun on resend");
                self.metrics.record_pool_underrun(1);
                false
            }
        }
    }
}

impl Drop for PathCore {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent access to `previous`.
        unsafe {
            let current = self.previous.load(Ordering::Relaxed, epoch::unprotected());
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}

impl fmt::Debug for PathCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathCore")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("mask", &self.mask)
            .field("received", &self.received)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Rate timer of a started path
///
/// Either re-sends the composite when no source fired, or, for a path whose
/// single source has no descriptor, polls that source.
pub struct PathTimer {
    timer: TimerFd,
    core: Arc<PathCore>,
    source: Option<Arc<PathSource>>,
}

impl PathTimer {
    pub fn new(rate: f64, core: Arc<PathCore>, source: Option<Arc<PathSource>>) -> io::Result<Self> {
        Ok(Self {
            timer: TimerFd::periodic(Duration::from_secs_f64(1.0 / rate))?,
            core,
            source,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.timer.as_raw_fd()
    }

    pub fn core(&self) -> &Arc<PathCore> {
        &self.core
    }

    pub fn tick(&self) -> Result<(), WorkerError> {
        if self.timer.expirations()? == 0 {
            return Ok(());
        }
        match &self.source {
            Some(source) => {
                source.poll(&self.core)?;
            }
            None => {
                if self.core.resend() {
                    debug!(target: "path", path = self.core.name(), "resent composite");
                }
            }
        }
        Ok(())
    }
}

/// Serializable view of a path
#[derive(Debug, Clone, Serialize)]
pub struct PathInfo {
    pub name: String,
    pub uuid: Uuid,
    pub state: PathState,
    pub mode: PathMode,
    pub enabled: bool,
    pub queuelen: usize,
    pub rate: f64,
    pub samplelen: usize,
    pub sources: Vec<String>,
    pub destinations: Vec<String>,
    pub hooks: Vec<&'static str>,
    pub metrics: PathMetricsSnapshot,
}

pub struct Path {
    uuid: Uuid,
    state: PathState,
    name: String,
    mode: PathMode,
    queuelen: usize,
    rate: f64,
    enabled: bool,
    samplelen: usize,
    sources: Vec<Arc<PathSource>>,
    destinations: Vec<Arc<dyn Node>>,
    hooks: Arc<Mutex<HookList>>,
    config: Option<PathConfig>,
    metrics: Arc<PathMetrics>,
    core: Option<Arc<PathCore>>,
    worker: Option<Arc<PathWorker>>,
    jobs: Vec<JobId>,
}

impl Path {
    /// New path in the `Initialized` state with default settings
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            state: PathState::Initialized,
            name: String::new(),
            mode: PathMode::Any,
            queuelen: DEFAULT_QUEUELEN,
            rate: 0.0,
            enabled: true,
            samplelen: DEFAULT_SAMPLE_LENGTH,
            sources: Vec::new(),
            destinations: Vec::new(),
            hooks: Arc::default(),
            config: None,
            metrics: Arc::new(PathMetrics::new()),
            core: None,
            worker: None,
            jobs: Vec::new(),
        }
    }

    /// Build a checked path from configuration
    pub fn from_config(cfg: &PathConfig, nodes: &NodeDirectory, registry: &HookRegistry) -> Result<Self, PathError> {
        let mut path = Self::new();
        path.parse(cfg, nodes, registry)?;
        path.check()?;
        Ok(path)
    }

    fn require(&self, allowed: &[PathState], to: PathState) -> Result<(), PathError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PathError::InvalidTransition { from: self.state, to })
        }
    }

    /// Re-initialize a destroyed path
    pub fn init(&mut self) -> Result<(), PathError> {
        self.require(&[PathState::Destroyed], PathState::Initialized)?;
        let uuid = self.uuid;
        *self = Self::new();
        self.uuid = uuid;
        Ok(())
    }

    /// Bind nodes, mappings and hooks from configuration
    pub fn parse(&mut self, cfg: &PathConfig, nodes: &NodeDirectory, registry: &HookRegistry) -> Result<(), PathError> {
        self.require(&[PathState::Initialized], PathState::Parsed)?;

        let mode = cfg.mode.parse::<PathMode>()?;
        if cfg.inputs.is_empty() || cfg.outputs.is_empty() {
            return Err(PathError::Empty);
        }

        // Mappings are laid out back to back; entries of the same node share a source
        let lookup = |name: &str| nodes.get(name).map(|n| n.sample_len());
        let mut groups: Vec<(Arc<dyn Node>, Vec<MappingEntry>)> = Vec::new();
        let mut offset = 0;
        for spec in &cfg.inputs {
            let entry = MappingEntry::parse(spec, lookup)?.at(offset);
            offset = entry.end();

            let node = nodes
                .get(&entry.node)
                .ok_or_else(|| PathError::UnknownNode(entry.node.clone()))?;
            match groups.iter_mut().find(|(n, _)| same_node(n, node)) {
                Some((_, entries)) => entries.push(entry),
                None => groups.push((Arc::clone(node), vec![entry])),
            }
        }
        if groups.len() > MAX_SOURCES {
            return Err(PathError::TooManySources {
                count: groups.len(),
                max: MAX_SOURCES,
            });
        }

        let masked: Vec<bool> = match &cfg.mask {
            None => vec![true; groups.len()],
            Some(names) => {
                let mut masked = vec![false; groups.len()];
                for name in names {
                    let index = groups
                        .iter()
                        .position(|(n, _)| n.name() == name)
                        .ok_or_else(|| PathError::UnknownMaskEntry(name.clone()))?;
                    masked[index] = true;
                }
                masked
            }
        };

        let mut destinations: Vec<Arc<dyn Node>> = Vec::new();
        for name in &cfg.outputs {
            let node = nodes.get(name).ok_or_else(|| PathError::UnknownNode(name.clone()))?;
            if !destinations.iter().any(|d| same_node(d, node)) {
                destinations.push(Arc::clone(node));
            }
        }

        let mut hooks = HookList::new();
        for hook in &cfg.hooks {
            hooks.push(registry.create(hook)?);
        }
        if cfg.builtin {
            for entry in registry.builtins()? {
                if !cfg.hooks.iter().any(|h| h.kind == entry.hook.name()) {
                    hooks.push(entry);
                }
            }
        }

        let samplelen = sample_length(groups.iter().flat_map(|(_, e)| e.iter()));
        self.samplelen = if samplelen == 0 { DEFAULT_SAMPLE_LENGTH } else { samplelen };

        self.sources = groups
            .into_iter()
            .zip(masked)
            .enumerate()
            .map(|(index, ((node, entries), masked))| Arc::new(PathSource::new(node, index, masked, entries)))
            .collect();
        self.destinations = destinations;
        self.hooks = Arc::new(Mutex::new(hooks));
        self.mode = mode;
        self.queuelen = cfg.queuelen;
        self.rate = cfg.rate;
        self.enabled = cfg.enabled;
        self.config = Some(cfg.clone());
        self.name = format_name(&self.sources, &self.destinations);

        self.state = PathState::Parsed;
        debug!(target: "path", path = %self.name, sources = self.sources.len(), samplelen = self.samplelen, "parsed path");
        Ok(())
    }

    /// Validate node capabilities and settings
    pub fn check(&mut self) -> Result<(), PathError> {
        self.require(&[PathState::Parsed], PathState::Checked)?;

        for source in &self.sources {
            let node = source.node();
            if !node.capabilities().read {
                return Err(PathError::Capability {
                    node: node.name().to_string(),
                    role: "source",
                });
            }
            if node.poll_fd().is_none() && (self.sources.len() != 1 || self.rate <= 0.0) {
                return Err(PathError::NotPollable(node.name().to_string()));
            }
        }
        for node in &self.destinations {
            if !node.capabilities().write {
                return Err(PathError::Capability {
                    node: node.name().to_string(),
                    role: "destination",
                });
            }
        }

        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(PathError::Invalid(format!("rate must be >= 0, got {}", self.rate)));
        }
        if self.queuelen == 0 {
            return Err(PathError::Invalid("queuelen must be > 0".to_string()));
        }
        let adjusted = self.queuelen.max(2).next_power_of_two();
        if adjusted != self.queuelen {
            warn!(target: "path", path = %self.name, queuelen = self.queuelen, adjusted, "queue length should be a power of 2 and at least 2");
            self.queuelen = adjusted;
        }

        self.state = PathState::Checked;
        Ok(())
    }

    /// Allocate runtime state and register with the worker
    pub fn start(&mut self, worker: &Arc<PathWorker>) -> Result<(), PathError> {
        self.require(&[PathState::Checked, PathState::Stopped], PathState::Started)?;

        let mut mask = SourceMask::EMPTY;
        for source in self.sources.iter().filter(|s| s.is_masked()) {
            mask.set(source.index());
        }

        let destinations = self
            .destinations
            .iter()
            .map(|node| {
                PathDestination::new(Arc::clone(node), self.queuelen, &self.name, Arc::clone(&self.metrics)).map(Arc::new)
            })
            .collect::<io::Result<Vec<_>>>()?;

        let pool_size = self.destinations.len().max(1) * self.queuelen + POOL_HEADROOM;
        let core = Arc::new(PathCore::new(
            &self.name,
            self.mode,
            mask,
            self.samplelen,
            pool_size,
            Arc::clone(&self.hooks),
            destinations,
            Arc::clone(&self.metrics),
        )?);

        {
            let mut hooks = self.hooks.lock();
            hooks.sort();
            hooks.start()?;
        }

        match self.register(worker, &core) {
            Ok(jobs) => self.jobs = jobs,
            Err(e) => {
                if let Err(stop_err) = self.hooks.lock().stop() {
                    warn!(target: "path", path = %self.name, error = %stop_err, "hook stop failed");
                }
                return Err(e);
            }
        }

        crate::log_path!(
            Level::INFO,
            path = %self.name,
            mode = %self.mode,
            hooks = self.hooks.lock().len(),
            destinations = self.destinations.len(),
            "starting path"
        );

        self.core = Some(core);
        self.worker = Some(Arc::clone(worker));
        self.state = PathState::Started;
        Ok(())
    }

    fn register(&self, worker: &PathWorker, core: &Arc<PathCore>) -> Result<Vec<JobId>, PathError> {
        let mut jobs = Vec::new();
        let result = (|| -> Result<(), PathError> {
            let mut unpolled = None;
            for source in &self.sources {
                if source.node().poll_fd().is_some() {
                    jobs.push(worker.add(PathJob::Source {
                        source: Arc::clone(source),
                        path: Arc::clone(core),
                    })?);
                } else {
                    unpolled = Some(Arc::clone(source));
                }
            }
            for dest in core.destinations() {
                jobs.push(worker.add(PathJob::Destination(Arc::clone(dest)))?);
            }
            if self.rate > 0.0 {
                let timer = PathTimer::new(self.rate, Arc::clone(core), unpolled)?;
                jobs.push(worker.add(PathJob::Timer(Arc::new(timer)))?);
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(jobs),
            Err(e) => {
                for id in jobs {
                    let _ = worker.remove(id);
                }
                Err(e)
            }
        }
    }

    /// Deregister from the worker and stop the hooks
    pub fn stop(&mut self) -> Result<(), PathError> {
        self.require(&[PathState::Started], PathState::Stopping)?;
        self.state = PathState::Stopping;
        info!(target: "path", path = %self.name, "stopping path");

        if let Some(worker) = self.worker.take() {
            for id in self.jobs.drain(..) {
                if let Err(e) = worker.remove(id) {
                    warn!(target: "path", path = %self.name, error = %e, "failed to deregister job");
                }
            }
        }

        let result = self.hooks.lock().stop();
        self.state = PathState::Stopped;
        result.map_err(PathError::from)
    }

    /// Release everything the path owns
    pub fn destroy(&mut self) -> Result<(), PathError> {
        self.require(
            &[
                PathState::Initialized,
                PathState::Parsed,
                PathState::Checked,
                PathState::Stopped,
            ],
            PathState::Destroyed,
        )?;

        self.sources.clear();
        self.destinations.clear();
        self.hooks = Arc::default();
        self.config = None;
        self.core = None;
        self.name.clear();
        self.state = PathState::Destroyed;
        Ok(())
    }

    /// Mirror path reading from the single destination and writing to the
    /// single source, with fresh instances of the same hooks
    pub fn reverse(&self, registry: &HookRegistry) -> Result<Path, PathError> {
        let cfg = self.config.as_ref().ok_or(PathError::NotReversible)?;
        if self.sources.len() != 1 || self.destinations.len() != 1 {
            return Err(PathError::NotReversible);
        }
        let source = self.sources[0].node();
        let destination = &self.destinations[0];

        let mut reversed = cfg.clone();
        reversed.inputs = vec![destination.name().to_string()];
        reversed.outputs = vec![source.name().to_string()];
        reversed.mask = None;
        reversed.reverse = false;

        let mut nodes = NodeDirectory::new();
        nodes.insert(Arc::clone(source));
        nodes.insert(Arc::clone(destination));

        let mut path = Path::new();
        path.parse(&reversed, &nodes, registry)?;
        Ok(path)
    }

    /// Periodic hook tick
    pub fn periodic(&self) {
        if self.state == PathState::Started {
            self.hooks.lock().periodic();
        }
    }

    pub fn uses_node(&self, node: &Arc<dyn Node>) -> bool {
        self.sources.iter().any(|s| same_node(s.node(), node))
            || self.destinations.iter().any(|d| same_node(d, node))
    }

    /// Display name: `[ in... ] => [ out... ]`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn state(&self) -> PathState {
        self.state
    }

    pub fn mode(&self) -> PathMode {
        self.mode
    }

    pub fn queuelen(&self) -> usize {
        self.queuelen
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn samplelen(&self) -> usize {
        self.samplelen
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the configuration asks for a mirrored path
    pub fn wants_reverse(&self) -> bool {
        self.config.as_ref().is_some_and(|c| c.reverse)
    }

    pub fn sources(&self) -> &[Arc<PathSource>] {
        &self.sources
    }

    /// Output nodes
    pub fn destination_nodes(&self) -> &[Arc<dyn Node>] {
        &self.destinations
    }

    /// Destination queues of the started (or last started) path
    pub fn destinations(&self) -> &[Arc<PathDestination>] {
        self.core.as_ref().map(|c| c.destinations()).unwrap_or(&[])
    }

    pub fn core(&self) -> Option<&Arc<PathCore>> {
        self.core.as_ref()
    }

    pub fn metrics(&self) -> &Arc<PathMetrics> {
        &self.metrics
    }

    pub fn hook_names(&self) -> Vec<&'static str> {
        self.hooks.lock().names()
    }

    pub fn info(&self) -> PathInfo {
        PathInfo {
            name: self.name.clone(),
            uuid: self.uuid,
            state: self.state,
            mode: self.mode,
            enabled: self.enabled,
            queuelen: self.queuelen,
            rate: self.rate,
            samplelen: self.samplelen,
            sources: self.sources.iter().map(|s| s.node().name().to_string()).collect(),
            destinations: self.destinations.iter().map(|d| d.name().to_string()).collect(),
            hooks: self.hook_names(),
            metrics: self.metrics.snapshot(),
        }
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Path {
    fn drop(&mut self) {
        if self.state == PathState::Started {
            if let Err(e) = self.stop() {
                warn!(target: "path", path = %self.name, error = %e, "failed to stop path on drop");
            }
        }
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .finish()
    }
}

fn format_name(sources: &[Arc<PathSource>], destinations: &[Arc<dyn Node>]) -> String {
    let mut name = String::from("[");
    for source in sources {
        name.push(' ');
        name.push_str(source.node().name());
    }
    name.push_str(" ] => [");
    for node in destinations {
        name.push(' ');
        name.push_str(node.name());
    }
    name.push_str(" ]");
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::HookConfig;
    use crate::nodes::{Capabilities, LoopbackNode, SignalNode};

    /// Readable node without a descriptor
    struct Polled;

    impl Node for Polled {
        fn name(&self) -> &str {
            "polled"
        }

        fn kind(&self) -> &'static str {
            "test"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::READ_ONLY
        }

        fn sample_len(&self) -> usize {
            2
        }

        fn read(&self, _smps: &mut [Smp]) -> Result<usize, NodeError> {
            Ok(0)
        }
    }

    fn nodes() -> NodeDirectory {
        let mut dir = NodeDirectory::new();
        for (name, values) in [("a", 2), ("b", 2), ("c", 4)] {
            dir.insert(Arc::new(LoopbackNode::new(name, values, 16, 1).unwrap()));
        }
        let sig = crate::nodes::signal::Waveform {
            kind: crate::nodes::signal::SignalKind::Constant,
            frequency: 1.0,
            amplitude: 1.0,
            offset: 0.0,
        };
        dir.insert(Arc::new(SignalNode::new("sig", sig, 1, 10.0, 1).unwrap()));
        dir.insert(Arc::new(Polled));
        dir
    }

    fn parsed(cfg: &PathConfig) -> Result<Path, PathError> {
        let mut path = Path::new();
        path.parse(cfg, &nodes(), &HookRegistry::builtin())?;
        Ok(path)
    }

    #[test]
    fn test_parse_merges_sources_and_layout() {
        let cfg = PathConfig::new(["a.data[1]", "b", "a.hdr.sequence"], ["c"]);
        let path = parsed(&cfg).unwrap();

        assert_eq!(path.state(), PathState::Parsed);
        assert_eq!(path.sources().len(), 2);
        assert_eq!(path.sources()[0].mappings().len(), 2);
        assert_eq!(path.sources()[0].mappings()[1].offset, 3);
        assert_eq!(path.samplelen(), 4);
        assert_eq!(path.name(), "[ a b ] => [ c ]");
        assert_eq!(path.mode(), PathMode::Any);
        assert!(path.sources().iter().all(|s| s.is_masked()));
    }

    #[test]
    fn test_parse_mask_and_errors() {
        let mut cfg = PathConfig::new(["a", "b"], ["c"]);
        cfg.mask = Some(vec!["b".into()]);
        let path = parsed(&cfg).unwrap();
        assert!(!path.sources()[0].is_masked());
        assert!(path.sources()[1].is_masked());

        cfg.mask = Some(vec!["c".into()]);
        assert!(matches!(parsed(&cfg), Err(PathError::UnknownMaskEntry(_))));

        let mut cfg = PathConfig::new(["a"], ["c"]);
        cfg.mode = "some".into();
        assert!(matches!(parsed(&cfg), Err(PathError::InvalidMode(_))));

        let cfg = PathConfig::new(["zz"], ["c"]);
        assert!(matches!(parsed(&cfg), Err(PathError::Mapping(_))));

        // `a` has two values
        let cfg = PathConfig::new(["a.data[0-999999999]"], ["c"]);
        assert!(matches!(parsed(&cfg), Err(PathError::Mapping(_))));

        let cfg = PathConfig::new(["a"], ["zz"]);
        assert!(matches!(parsed(&cfg), Err(PathError::UnknownNode(_))));

        let cfg = PathConfig::new(Vec::<String>::new(), ["c"]);
        assert!(matches!(parsed(&cfg), Err(PathError::Empty)));
    }

    #[test]
    fn test_builtin_hooks_attached_once() {
        let mut cfg = PathConfig::new(["a"], ["c"]);
        cfg.hooks.push(HookConfig::new("drop"));
        let path = parsed(&cfg).unwrap();
        let mut names = path.hook_names();
        names.sort_unstable();
        assert_eq!(names, vec!["drop", "fix_ts", "restart"]);

        cfg.builtin = false;
        assert_eq!(parsed(&cfg).unwrap().hook_names(), vec!["drop"]);
    }

    #[test]
    fn test_check_capabilities() {
        let cfg = PathConfig::new(["a"], ["sig"]);
        let mut path = parsed(&cfg).unwrap();
        assert!(matches!(
            path.check(),
            Err(PathError::Capability { role: "destination", .. })
        ));
    }

    #[test]
    fn test_check_unpollable_source_needs_rate() {
        let cfg = PathConfig::new(["polled"], ["c"]);
        let mut path = parsed(&cfg).unwrap();
        assert!(matches!(path.check(), Err(PathError::NotPollable(_))));

        let mut cfg = PathConfig::new(["polled"], ["c"]);
        cfg.rate = 5.0;
        let mut path = parsed(&cfg).unwrap();
        path.check().unwrap();

        let mut cfg = PathConfig::new(["polled", "a"], ["c"]);
        cfg.rate = 5.0;
        let mut path = parsed(&cfg).unwrap();
        assert!(matches!(path.check(), Err(PathError::NotPollable(_))));
    }

    #[test]
    fn test_check_rounds_queuelen_up() {
        let mut cfg = PathConfig::new(["a"], ["c"]);
        cfg.queuelen = 3;
        let mut path = parsed(&cfg).unwrap();
        path.check().unwrap();
        assert_eq!(path.queuelen(), 4);
        assert_eq!(path.state(), PathState::Checked);
    }

    #[test]
    fn test_check_raises_single_slot_queue() {
        let mut cfg = PathConfig::new(["a"], ["c"]);
        cfg.queuelen = 1;
        let mut path = parsed(&cfg).unwrap();
        path.check().unwrap();
        assert_eq!(path.queuelen(), 2);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let worker = PathWorker::new().unwrap();
        let mut path = Path::new();

        assert!(matches!(
            path.start(&worker),
            Err(PathError::InvalidTransition { from: PathState::Initialized, .. })
        ));
        assert!(path.check().is_err());

        path.parse(&PathConfig::new(["a"], ["c"]), &nodes(), &HookRegistry::builtin())
            .unwrap();
        assert!(path.stop().is_err());
        path.check().unwrap();

        path.start(&worker).unwrap();
        assert_eq!(path.state(), PathState::Started);
        assert_eq!(worker.job_count(), 2);
        assert!(path.destroy().is_err());
        assert!(path.core().unwrap().previous().is_some());

        path.stop().unwrap();
        assert_eq!(path.state(), PathState::Stopped);
        assert_eq!(worker.job_count(), 0);

        // Restartable
        path.start(&worker).unwrap();
        path.stop().unwrap();

        path.destroy().unwrap();
        assert_eq!(path.state(), PathState::Destroyed);
        assert!(path.sources().is_empty());
        path.init().unwrap();
        assert_eq!(path.state(), PathState::Initialized);
    }

    #[test]
    fn test_rate_registers_timer() {
        let worker = PathWorker::new().unwrap();
        let mut cfg = PathConfig::new(["a"], ["b", "c"]);
        cfg.rate = 100.0;
        let mut path = Path::from_config(&cfg, &nodes(), &HookRegistry::builtin()).unwrap();
        path.start(&worker).unwrap();
        // Source, two destinations, timer
        assert_eq!(worker.job_count(), 4);
        path.stop().unwrap();
    }

    #[test]
    fn test_reverse() {
        let registry = HookRegistry::builtin();
        let mut cfg = PathConfig::new(["a"], ["c"]);
        let mut skip = HookConfig::new("skip_first");
        skip.params.insert("samples".into(), toml::Value::Integer(2));
        cfg.hooks.push(skip);
        cfg.reverse = true;

        let path = parsed(&cfg).unwrap();
        assert!(path.wants_reverse());
        let reversed = path.reverse(&registry).unwrap();
        assert_eq!(reversed.name(), "[ c ] => [ a ]");
        assert_eq!(reversed.state(), PathState::Parsed);
        assert_eq!(reversed.hook_names().len(), path.hook_names().len());
        assert!(!reversed.wants_reverse());
        assert_ne!(reversed.uuid(), path.uuid());

        let two = parsed(&PathConfig::new(["a", "b"], ["c"])).unwrap();
        assert!(matches!(two.reverse(&registry), Err(PathError::NotReversible)));
    }

    #[test]
    fn test_uses_node() {
        let dir = nodes();
        let mut path = Path::new();
        path.parse(&PathConfig::new(["a"], ["c"]), &dir, &HookRegistry::builtin())
            .unwrap();
        assert!(path.uses_node(dir.get("a").unwrap()));
        assert!(path.uses_node(dir.get("c").unwrap()));
        assert!(!path.uses_node(dir.get("b").unwrap()));
    }

    #[test]
    fn test_resend_only_when_idle() {
        let metrics = Arc::new(PathMetrics::new());
        let core = PathCore::new("p", PathMode::Any, SourceMask::EMPTY, 2, 16, Arc::default(), Vec::new(), metrics)
            .unwrap();

        assert!(core.resend());
        assert_eq!(core.previous().unwrap().sequence, 1);

        core.mark_fired();
        assert!(!core.resend());
        assert!(core.resend());
        assert_eq!(core.metrics().fired(), 2);
    }
}

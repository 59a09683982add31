//! Hook pipeline
//!
//! Hooks are transformation stages attached to a path. A path keeps its hooks
//! in a [`HookList`] sorted by ascending priority (stable, so equal priorities
//! run in the order they were added) and drives every record batch through
//! them left to right.
//!
//! A stage's [`Hook::process`] gets the current batch and returns how many
//! records it accepts. It must move the accepted records to the front of the
//! slice, keeping their relative order. Records past that count never reach a
//! later stage: the driver releases them.

pub mod convert;
pub mod drop;
pub mod fix_ts;
pub mod restart;
pub mod skip_first;

pub use convert::ConvertHook;
pub use drop::DropHook;
pub use fix_ts::FixTsHook;
pub use restart::RestartHook;
pub use skip_first::SkipFirstHook;

use crate::infrastructure::config::HookConfig;
use crate::infrastructure::pool::Smp;
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use thiserror::Error;
use tracing::{warn, Level};

#[derive(Error, Debug)]
pub enum HookError {
    #[error("unknown hook type '{0}'")]
    UnknownType(String),

    #[error("invalid parameter for hook '{hook}': {reason}")]
    Param { hook: String, reason: String },

    #[error("hook '{hook}' failed to {op}: {reason}")]
    Lifecycle {
        hook: String,
        op: &'static str,
        reason: String,
    },
}

impl HookError {
    pub fn param(hook: &str, reason: impl fmt::Display) -> Self {
        HookError::Param {
            hook: hook.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// When and where a hook is invoked
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HookFlags(u8);

impl HookFlags {
    pub const NONE: HookFlags = HookFlags(0);
    /// Receives its configuration table
    pub const PARSE: HookFlags = HookFlags(1 << 0);
    /// Called on path start, stop and restart
    pub const LIFECYCLE: HookFlags = HookFlags(1 << 1);
    /// Called for every record batch
    pub const PROCESS: HookFlags = HookFlags(1 << 2);
    /// Called on the periodic tick
    pub const PERIODIC: HookFlags = HookFlags(1 << 3);
    /// Attachable to paths
    pub const PATH: HookFlags = HookFlags(1 << 4);
    /// Attachable to nodes
    pub const NODE: HookFlags = HookFlags(1 << 5);
    /// Attached to every path unless disabled
    pub const BUILTIN: HookFlags = HookFlags(1 << 6);
    /// Sees every raw batch read from a source, before merging
    pub const READ: HookFlags = HookFlags(1 << 7);

    #[inline]
    pub fn contains(self, other: HookFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for HookFlags {
    type Output = HookFlags;

    fn bitor(self, rhs: HookFlags) -> HookFlags {
        HookFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for HookFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 8] = ["parse", "lifecycle", "process", "periodic", "path", "node", "builtin", "read"];
        let set: Vec<_> = NAMES
            .iter()
            .enumerate()
            .filter(|(i, _)| self.0 & (1 << i) != 0)
            .map(|(_, n)| *n)
            .collect();
        write!(f, "HookFlags({})", set.join("|"))
    }
}

/// Per-batch state shared by the stages of one pipeline run
#[derive(Debug)]
pub struct HookContext<'a> {
    /// Display name of the owning path
    pub path: &'a str,
    /// Index of the source a raw batch came from; `None` for composite records
    pub source: Option<usize>,
    restart: bool,
}

impl<'a> HookContext<'a> {
    pub fn new(path: &'a str) -> Self {
        Self {
            path,
            source: None,
            restart: false,
        }
    }

    pub fn for_source(path: &'a str, source: usize) -> Self {
        Self {
            path,
            source: Some(source),
            restart: false,
        }
    }

    /// Ask the driver to restart every hook of the path after this stage
    pub fn request_restart(&mut self) {
        self.restart = true;
    }

    fn take_restart(&mut self) -> bool {
        std::mem::take(&mut self.restart)
    }
}

/// A pipeline stage
///
/// Every callback has a no-op default; a hook overrides what its flags say
/// it takes part in.
pub trait Hook: Send {
    /// Registered type name
    fn name(&self) -> &'static str;

    /// Default priority, lower runs first
    fn priority(&self) -> i32;

    fn flags(&self) -> HookFlags;

    fn parse(&mut self, _params: &toml::Table) -> Result<(), HookError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    /// Reset instance state; defaults to a fresh start
    fn restart(&mut self) -> Result<(), HookError> {
        self.start()
    }

    /// Inspect a raw batch from one source
    fn read(&mut self, _smps: &[Smp], _ctx: &mut HookContext<'_>) {}

    /// Partition `smps` so the first `n` records are kept, and return `n`
    fn process(&mut self, smps: &mut [Smp], _ctx: &mut HookContext<'_>) -> usize {
        smps.len()
    }

    fn periodic(&mut self) {}
}

/// Move records matching `keep` to the front, preserving their order
///
/// Returns how many were kept. Order of the rejected tail is unspecified.
pub fn partition_keep<F>(smps: &mut [Smp], mut keep: F) -> usize
where
    F: FnMut(&mut Smp) -> bool,
{
    let mut kept = 0;
    for i in 0..smps.len() {
        if keep(&mut smps[i]) {
            smps.swap(kept, i);
            kept += 1;
        }
    }
    kept
}

/// Constructor for a hook type
pub type HookFactory = fn() -> Box<dyn Hook>;

/// A configured hook instance on a path
pub struct HookEntry {
    pub hook: Box<dyn Hook>,
    pub priority: i32,
}

impl fmt::Debug for HookEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEntry")
            .field("name", &self.hook.name())
            .field("priority", &self.priority)
            .field("flags", &self.hook.flags())
            .finish()
    }
}

/// Explicit table of hook types
#[derive(Clone)]
pub struct HookRegistry {
    factories: HashMap<&'static str, HookFactory>,
}

impl HookRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(FixTsHook::TYPE, || Box::new(FixTsHook::default()));
        registry.register(RestartHook::TYPE, || Box::new(RestartHook::default()));
        registry.register(DropHook::TYPE, || Box::new(DropHook::default()));
        registry.register(SkipFirstHook::TYPE, || Box::new(SkipFirstHook::default()));
        registry.register(ConvertHook::TYPE, || Box::new(ConvertHook::default()));
        registry
    }

    pub fn register(&mut self, kind: &'static str, factory: HookFactory) {
        self.factories.insert(kind, factory);
    }

    /// Instantiate and configure one hook
    pub fn create(&self, cfg: &HookConfig) -> Result<HookEntry, HookError> {
        let factory = self
            .factories
            .get(cfg.kind.as_str())
            .ok_or_else(|| HookError::UnknownType(cfg.kind.clone()))?;

        let mut hook = factory();
        if hook.flags().contains(HookFlags::PARSE) {
            hook.parse(&cfg.params)?;
        }
        let priority = cfg.priority.unwrap_or_else(|| hook.priority());

        Ok(HookEntry { hook, priority })
    }

    /// Fresh instances of every path hook flagged built-in
    pub fn builtins(&self) -> Result<Vec<HookEntry>, HookError> {
        let mut kinds: Vec<_> = self
            .factories
            .iter()
            .filter(|(_, factory)| {
                let flags = factory().flags();
                flags.contains(HookFlags::BUILTIN) && flags.contains(HookFlags::PATH)
            })
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort_unstable();

        kinds
            .into_iter()
            .map(|kind| self.create(&HookConfig::new(kind)))
            .collect()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub accepted: usize,
    pub dropped: usize,
}

/// Priority-ordered hooks of one path
#[derive(Debug, Default)]
pub struct HookList {
    entries: Vec<HookEntry>,
}

impl HookList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: HookEntry) {
        self.entries.push(entry);
    }

    /// Order by priority; equal priorities keep insertion order
    pub fn sort(&mut self) {
        self.entries.sort_by_key(|e| e.priority);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hook type names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.hook.name()).collect()
    }

    pub fn start(&mut self) -> Result<(), HookError> {
        self.for_each_lifecycle(|hook| hook.start())
    }

    pub fn stop(&mut self) -> Result<(), HookError> {
        self.for_each_lifecycle(|hook| hook.stop())
    }

    pub fn restart(&mut self) -> Result<(), HookError> {
        self.for_each_lifecycle(|hook| hook.restart())
    }

    pub fn periodic(&mut self) {
        for entry in &mut self.entries {
            if entry.hook.flags().contains(HookFlags::PERIODIC) {
                entry.hook.periodic();
            }
        }
    }

    fn for_each_lifecycle<F>(&mut self, mut op: F) -> Result<(), HookError>
    where
        F: FnMut(&mut dyn Hook) -> Result<(), HookError>,
    {
        for entry in &mut self.entries {
            if entry.hook.flags().contains(HookFlags::LIFECYCLE) {
                op(entry.hook.as_mut())?;
            }
        }
        Ok(())
    }

    /// Show a raw source batch to every read stage
    pub fn read(&mut self, smps: &[Smp], path: &str, source: usize) {
        if smps.is_empty() {
            return;
        }
        let mut ctx = HookContext::for_source(path, source);

        for i in 0..self.entries.len() {
            let entry = &mut self.entries[i];
            if !entry.hook.flags().contains(HookFlags::READ) {
                continue;
            }
            entry.hook.read(smps, &mut ctx);
            self.handle_restart(&mut ctx, path);
        }
    }

    fn handle_restart(&mut self, ctx: &mut HookContext<'_>, path: &str) {
        if ctx.take_restart() {
            crate::log_hook!(Level::DEBUG, path, "restarting hooks");
            if let Err(e) = self.restart() {
                warn!(target: "hook", path, error = %e, "hook restart failed");
            }
        }
    }

    /// Run `smps` through every processing stage
    ///
    /// On return `smps` holds only the accepted records; rejected records
    /// have been released.
    pub fn process(&mut self, smps: &mut Vec<Smp>, path: &str) -> PipelineOutcome {
        let initial = smps.len();
        let mut ctx = HookContext::new(path);

        for i in 0..self.entries.len() {
            if smps.is_empty() {
                break;
            }
            let entry = &mut self.entries[i];
            if !entry.hook.flags().contains(HookFlags::PROCESS) {
                continue;
            }

            let cnt = smps.len();
            let accepted = entry.hook.process(smps, &mut ctx).min(cnt);
            if accepted < cnt {
                crate::log_hook!(Level::DEBUG, path, hook = entry.hook.name(), dropped = cnt - accepted, "hook rejected records");
            }
            smps.truncate(accepted);
            self.handle_restart(&mut ctx, path);
        }

        PipelineOutcome {
            accepted: smps.len(),
            dropped: initial - smps.len(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::infrastructure::pool::BufferPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Records with the given sequence numbers
    pub(crate) fn batch(pool: &BufferPool, seqs: &[u64]) -> Vec<Smp> {
        seqs.iter()
            .map(|&seq| {
                let mut smp = pool.alloc().unwrap();
                smp.get_mut().unwrap().sequence = seq;
                smp
            })
            .collect()
    }

    pub(crate) fn seqs(smps: &[Smp]) -> Vec<u64> {
        smps.iter().map(|s| s.sequence).collect()
    }

    /// Keeps even sequence numbers and counts how many records it saw
    struct EvenOnly {
        seen: Arc<AtomicUsize>,
        priority: i32,
    }

    impl Hook for EvenOnly {
        fn name(&self) -> &'static str {
            "even_only"
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn flags(&self) -> HookFlags {
            HookFlags::PATH | HookFlags::PROCESS
        }

        fn process(&mut self, smps: &mut [Smp], _ctx: &mut HookContext<'_>) -> usize {
            self.seen.fetch_add(smps.len(), Ordering::Relaxed);
            partition_keep(smps, |s| s.sequence % 2 == 0)
        }
    }

    fn entry(hook: impl Hook + 'static, priority: i32) -> HookEntry {
        HookEntry {
            hook: Box::new(hook),
            priority,
        }
    }

    #[test]
    fn test_partition_keeps_relative_order() {
        let pool = BufferPool::new(8, 1);
        let mut smps = batch(&pool, &[1, 2, 3, 4, 6, 7]);
        let kept = partition_keep(&mut smps, |s| s.sequence % 2 == 0);
        assert_eq!(kept, 3);
        assert_eq!(seqs(&smps[..kept]), vec![2, 4, 6]);
    }

    #[test]
    fn test_rejected_records_never_reach_later_stages() {
        let pool = BufferPool::new(8, 1);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut list = HookList::new();
        list.push(entry(EvenOnly { seen: Arc::clone(&second), priority: 2 }, 2));
        list.push(entry(EvenOnly { seen: Arc::clone(&first), priority: 1 }, 1));
        list.sort();

        let mut smps = batch(&pool, &[1, 2, 3, 4, 5]);
        let outcome = list.process(&mut smps, "p");

        assert_eq!(first.load(Ordering::Relaxed), 5);
        assert_eq!(second.load(Ordering::Relaxed), 2);
        assert_eq!(outcome, PipelineOutcome { accepted: 2, dropped: 3 });
        assert_eq!(seqs(&smps), vec![2, 4]);
        // Rejected records went back to the pool
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_empty_batch_skips_stages() {
        let pool = BufferPool::new(2, 1);
        let seen = Arc::new(AtomicUsize::new(0));
        let mut list = HookList::new();
        list.push(entry(EvenOnly { seen: Arc::clone(&seen), priority: 0 }, 0));
        list.push(entry(EvenOnly { seen: Arc::clone(&seen), priority: 0 }, 0));

        let mut smps = batch(&pool, &[1]);
        let outcome = list.process(&mut smps, "p");
        assert_eq!(outcome.accepted, 0);
        // Second stage never ran with an empty batch
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sort_is_stable() {
        let registry = HookRegistry::builtin();
        let mut list = HookList::new();
        for kind in ["convert", "skip_first", "drop", "fix_ts"] {
            let mut cfg = HookConfig::new(kind);
            match kind {
                "convert" => {
                    cfg.params.insert("mode".into(), toml::Value::String("fixed".into()));
                }
                "skip_first" => {
                    cfg.params.insert("samples".into(), toml::Value::Integer(1));
                }
                _ => {}
            }
            list.push(registry.create(&cfg).unwrap());
        }
        list.sort();
        assert_eq!(list.names(), vec!["fix_ts", "drop", "convert", "skip_first"]);
    }

    #[test]
    fn test_registry_builtins_and_priority_override() {
        let registry = HookRegistry::builtin();
        let builtins = registry.builtins().unwrap();
        let mut names: Vec<_> = builtins.iter().map(|e| e.hook.name()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["drop", "fix_ts", "restart"]);

        let mut cfg = HookConfig::new("drop");
        cfg.priority = Some(42);
        assert_eq!(registry.create(&cfg).unwrap().priority, 42);

        assert!(matches!(
            registry.create(&HookConfig::new("nope")),
            Err(HookError::UnknownType(_))
        ));
    }

    #[test]
    fn test_flags() {
        let flags = HookFlags::PATH | HookFlags::PROCESS;
        assert!(flags.contains(HookFlags::PATH));
        assert!(!flags.contains(HookFlags::BUILTIN));
        assert!(flags.contains(HookFlags::NONE));
        assert_eq!(format!("{:?}", flags), "HookFlags(process|path)");
    }
}

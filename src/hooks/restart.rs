//! Detect a restarted source and reset the pipeline
//!
//! Runs on raw source batches: composite records carry the path's own
//! sequence, which never falls back.

use super::{Hook, HookContext, HookError, HookFlags};
use crate::infrastructure::pool::Smp;
use std::collections::HashMap;
use tracing::warn;

/// Requests a restart of all hooks when a source's sequence number falls back to 0
#[derive(Debug, Default)]
pub struct RestartHook {
    /// Last sequence seen per source index
    last: HashMap<usize, u64>,
}

impl RestartHook {
    pub const TYPE: &'static str = "restart";
}

impl Hook for RestartHook {
    fn name(&self) -> &'static str {
        Self::TYPE
    }

    fn priority(&self) -> i32 {
        1
    }

    fn flags(&self) -> HookFlags {
        HookFlags::BUILTIN | HookFlags::PATH | HookFlags::READ | HookFlags::LIFECYCLE
    }

    fn start(&mut self) -> Result<(), HookError> {
        self.last.clear();
        Ok(())
    }

    fn read(&mut self, smps: &[Smp], ctx: &mut HookContext<'_>) {
        let source = ctx.source.unwrap_or(0);
        for smp in smps {
            if let Some(&last) = self.last.get(&source) {
                if smp.sequence == 0 && last > 0 {
                    warn!(target: "hook", path = ctx.path, source, last, "simulation restarted");
                    ctx.request_restart();
                }
            }
            self.last.insert(source, smp.sequence);
        }
    }
}

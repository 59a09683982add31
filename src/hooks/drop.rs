//! Drop reordered and duplicated records

use super::{partition_keep, Hook, HookContext, HookError, HookFlags};
use crate::infrastructure::pool::Smp;
use tracing::debug;

/// Keeps only records whose sequence is strictly greater than the last kept one
#[derive(Debug, Default)]
pub struct DropHook {
    last: Option<u64>,
}

impl DropHook {
    pub const TYPE: &'static str = "drop";
}

impl Hook for DropHook {
    fn name(&self) -> &'static str {
        Self::TYPE
    }

    fn priority(&self) -> i32 {
        3
    }

    fn flags(&self) -> HookFlags {
        HookFlags::BUILTIN | HookFlags::PATH | HookFlags::PROCESS | HookFlags::LIFECYCLE
    }

    fn start(&mut self) -> Result<(), HookError> {
        self.last = None;
        Ok(())
    }

    fn process(&mut self, smps: &mut [Smp], ctx: &mut HookContext<'_>) -> usize {
        let last = &mut self.last;
        let kept = partition_keep(smps, |smp| {
            if last.map_or(true, |l| smp.sequence > l) {
                *last = Some(smp.sequence);
                true
            } else {
                false
            }
        });

        if kept < smps.len() {
            debug!(target: "hook", path = ctx.path, dropped = smps.len() - kept, "dropped stale records");
        }
        kept
    }
}

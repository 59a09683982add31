//! Discard the start of a stream

use super::{partition_keep, Hook, HookContext, HookError, HookFlags};
use crate::core::record::Timestamp;
use crate::infrastructure::config::{param_f64, param_usize};
use crate::infrastructure::pool::Smp;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Skip {
    /// Skip a fixed number of records
    Samples { total: usize, remaining: usize },
    /// Skip records whose origin time is within `window` of the first one
    Seconds { window: Timestamp, until: Option<Timestamp> },
}

/// Skips the first `samples` records, or the first `seconds` of origin time,
/// after every start or restart
#[derive(Debug)]
pub struct SkipFirstHook {
    skip: Skip,
}

impl SkipFirstHook {
    pub const TYPE: &'static str = "skip_first";
}

impl Default for SkipFirstHook {
    fn default() -> Self {
        Self {
            skip: Skip::Samples {
                total: 0,
                remaining: 0,
            },
        }
    }
}

impl Hook for SkipFirstHook {
    fn name(&self) -> &'static str {
        Self::TYPE
    }

    fn priority(&self) -> i32 {
        99
    }

    fn flags(&self) -> HookFlags {
        HookFlags::PATH | HookFlags::PARSE | HookFlags::PROCESS | HookFlags::LIFECYCLE
    }

    fn parse(&mut self, params: &toml::Table) -> Result<(), HookError> {
        self.skip = match (params.contains_key("samples"), params.contains_key("seconds")) {
            (true, false) => {
                let total = param_usize(params, "samples", 0).map_err(|e| HookError::param(Self::TYPE, e))?;
                Skip::Samples {
                    total,
                    remaining: total,
                }
            }
            (false, true) => {
                let seconds = param_f64(params, "seconds", 0.0).map_err(|e| HookError::param(Self::TYPE, e))?;
                if seconds.is_nan() || seconds < 0.0 {
                    return Err(HookError::param(Self::TYPE, "'seconds' must not be negative"));
                }
                Skip::Seconds {
                    window: (seconds * 1e9) as Timestamp,
                    until: None,
                }
            }
            _ => {
                return Err(HookError::param(
                    Self::TYPE,
                    "exactly one of 'samples' or 'seconds' is required",
                ))
            }
        };
        Ok(())
    }

    fn start(&mut self) -> Result<(), HookError> {
        match &mut self.skip {
            Skip::Samples { total, remaining } => *remaining = *total,
            Skip::Seconds { until, .. } => *until = None,
        }
        Ok(())
    }

    fn process(&mut self, smps: &mut [Smp], _ctx: &mut HookContext<'_>) -> usize {
        match &mut self.skip {
            Skip::Samples { remaining, .. } => partition_keep(smps, |_| {
                if *remaining > 0 {
                    *remaining -= 1;
                    false
                } else {
                    true
                }
            }),
            Skip::Seconds { window, until } => partition_keep(smps, |smp| {
                let end = *until.get_or_insert(smp.ts.origin.saturating_add(*window));
                smp.ts.origin >= end
            }),
        }
    }
}

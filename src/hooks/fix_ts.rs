//! Fill in missing timestamps

use super::{Hook, HookContext, HookFlags};
use crate::core::record::now;
use crate::infrastructure::pool::Smp;

/// Sets unset origin/received timestamps to the current time
#[derive(Debug, Default)]
pub struct FixTsHook;

impl FixTsHook {
    pub const TYPE: &'static str = "fix_ts";
}

impl Hook for FixTsHook {
    fn name(&self) -> &'static str {
        Self::TYPE
    }

    fn priority(&self) -> i32 {
        0
    }

    fn flags(&self) -> HookFlags {
        HookFlags::BUILTIN | HookFlags::PATH | HookFlags::PROCESS
    }

    fn process(&mut self, smps: &mut [Smp], _ctx: &mut HookContext<'_>) -> usize {
        let stamp = now();
        for smp in smps.iter_mut() {
            if smp.ts.origin != 0 && smp.ts.received != 0 {
                continue;
            }
            // Left untouched if the pool cannot provide a private copy
            if let Some(r) = smp.make_mut() {
                if r.ts.received == 0 {
                    r.ts.received = stamp;
                }
                if r.ts.origin == 0 {
                    r.ts.origin = r.ts.received;
                }
            }
        }
        smps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pool::BufferPool;

    #[test]
    fn test_fills_missing_timestamps_only() {
        let pool = BufferPool::new(4, 1);
        let mut a = pool.alloc().unwrap();
        {
            let r = a.get_mut().unwrap();
            r.ts.origin = 5;
            r.ts.received = 6;
        }
        let b = pool.alloc().unwrap();
        let mut smps = vec![a, b];

        let n = FixTsHook.process(&mut smps, &mut HookContext::new("p"));
        assert_eq!(n, 2);
        assert_eq!((smps[0].ts.origin, smps[0].ts.received), (5, 6));
        assert_ne!(smps[1].ts.received, 0);
        assert_eq!(smps[1].ts.origin, smps[1].ts.received);
    }

    #[test]
    fn test_shared_record_is_copied() {
        let pool = BufferPool::new(4, 1);
        let shared = pool.alloc().unwrap();
        let mut smps = vec![shared.clone()];

        FixTsHook.process(&mut smps, &mut HookContext::new("p"));
        assert_eq!(shared.ts.received, 0);
        assert_ne!(smps[0].ts.received, 0);
        assert!(!Smp::ptr_eq(&shared, &smps[0]));
    }
}

//! Convert value formats between float and fixed point

use super::{partition_keep, Hook, HookContext, HookError, HookFlags};
use crate::core::record::Value;
use crate::infrastructure::config::{param_f64, param_str};
use crate::infrastructure::pool::Smp;
use tracing::warn;

/// Default fixed-point scale
pub const DEFAULT_SCALE: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertMode {
    /// Float to scaled integer
    Fixed,
    /// Scaled integer to float
    Float,
}

/// Converts every value of a record to one format
///
/// `fixed` stores `round(v * scale)` as an integer, `float` divides integers
/// by `scale`. Values already in the target format are left alone.
#[derive(Debug)]
pub struct ConvertHook {
    mode: ConvertMode,
    scale: f64,
}

impl ConvertHook {
    pub const TYPE: &'static str = "convert";

    pub fn new(mode: ConvertMode, scale: f64) -> Self {
        Self { mode, scale }
    }

    fn convert(&self, v: Value) -> Value {
        match (self.mode, v) {
            (ConvertMode::Fixed, Value::Float(f)) => Value::Integer((f * self.scale).round() as i64),
            (ConvertMode::Float, Value::Integer(i)) => Value::Float(i as f64 / self.scale),
            (_, v) => v,
        }
    }
}

impl Default for ConvertHook {
    fn default() -> Self {
        Self::new(ConvertMode::Fixed, DEFAULT_SCALE)
    }
}

impl Hook for ConvertHook {
    fn name(&self) -> &'static str {
        Self::TYPE
    }

    fn priority(&self) -> i32 {
        99
    }

    fn flags(&self) -> HookFlags {
        HookFlags::PATH | HookFlags::PARSE | HookFlags::PROCESS
    }

    fn parse(&mut self, params: &toml::Table) -> Result<(), HookError> {
        let param = |e| HookError::param(Self::TYPE, e);

        self.mode = match param_str(params, "mode").map_err(param)? {
            Some("fixed") => ConvertMode::Fixed,
            Some("float") => ConvertMode::Float,
            Some(other) => return Err(HookError::param(Self::TYPE, format!("unknown mode '{}'", other))),
            None => return Err(HookError::param(Self::TYPE, "missing 'mode'")),
        };
        self.scale = param_f64(params, "scale", DEFAULT_SCALE).map_err(param)?;
        if self.scale == 0.0 || self.scale.is_nan() {
            return Err(HookError::param(Self::TYPE, "'scale' must be non-zero"));
        }
        Ok(())
    }

    fn process(&mut self, smps: &mut [Smp], ctx: &mut HookContext<'_>) -> usize {
        partition_keep(smps, |smp| {
            // Records shared with the composite state are copied before writing
            let Some(r) = smp.make_mut() else {
                warn!(target: "hook", path = ctx.path, "record pool exhausted, dropping record");
                return false;
            };
            for v in r.data_mut() {
                *v = self.convert(*v);
            }
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pool::BufferPool;

    fn record(pool: &BufferPool, values: &[Value]) -> Smp {
        let mut smp = pool.alloc().unwrap();
        smp.get_mut().unwrap().assign(values);
        smp
    }

    #[test]
    fn test_fixed_and_float() {
        let pool = BufferPool::new(4, 2);
        let mut ctx = HookContext::new("p");

        let mut fixed = ConvertHook::default();
        let mut smps = vec![record(&pool, &[Value::Float(1.2345), Value::Integer(7)])];
        assert_eq!(fixed.process(&mut smps, &mut ctx), 1);
        assert_eq!(smps[0].data(), &[Value::Integer(1235), Value::Integer(7)]);

        let mut float = ConvertHook::new(ConvertMode::Float, DEFAULT_SCALE);
        float.process(&mut smps, &mut ctx);
        assert_eq!(smps[0].data(), &[Value::Float(1.235), Value::Float(0.007)]);
    }

    #[test]
    fn test_exhausted_pool_drops_shared_records() {
        let pool = BufferPool::new(1, 1);
        let shared = record(&pool, &[Value::Float(1.0)]);
        let mut smps = vec![shared.clone()];

        let kept = ConvertHook::default().process(&mut smps, &mut HookContext::new("p"));
        assert_eq!(kept, 0);
        // The shared original is untouched
        assert_eq!(shared.data(), &[Value::Float(1.0)]);
    }

    #[test]
    fn test_parse() {
        let mut hook = ConvertHook::default();
        hook.parse(&toml::from_str("mode = \"float\"\nscale = 10").unwrap()).unwrap();
        assert_eq!(hook.mode, ConvertMode::Float);
        assert_eq!(hook.scale, 10.0);

        assert!(hook.parse(&toml::Table::new()).is_err());
        assert!(hook.parse(&toml::from_str("mode = \"hex\"").unwrap()).is_err());
        assert!(hook.parse(&toml::from_str("mode = \"fixed\"\nscale = 0").unwrap()).is_err());
    }
}

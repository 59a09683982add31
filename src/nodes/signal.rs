//! Timer-driven signal generator node
//!
//! Produces one record per timer tick. Sample `n` is taken at time `n / rate`
//! so the generated waveform does not depend on scheduling jitter.

use super::{Capabilities, Node, NodeError};
use crate::core::record::{now, Value};
use crate::infrastructure::config::{param_f64, param_str, param_usize, ConfigError, NodeConfig};
use crate::infrastructure::fd::TimerFd;
use crate::infrastructure::pool::Smp;
use std::f64::consts::PI;
use std::os::fd::{AsRawFd, RawFd};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Sine,
    Square,
    Ramp,
    Counter,
    Constant,
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sine" => Ok(SignalKind::Sine),
            "square" => Ok(SignalKind::Square),
            "ramp" => Ok(SignalKind::Ramp),
            "counter" => Ok(SignalKind::Counter),
            "constant" => Ok(SignalKind::Constant),
            other => Err(format!("unknown signal '{}'", other)),
        }
    }
}

/// Waveform parameters
#[derive(Debug, Clone, Copy)]
pub struct Waveform {
    pub kind: SignalKind,
    pub frequency: f64,
    pub amplitude: f64,
    pub offset: f64,
}

impl Waveform {
    /// Value of sample `seq` at time `t` seconds
    pub fn value(&self, t: f64, seq: u64) -> f64 {
        let phase = 2.0 * PI * self.frequency * t;
        let v = match self.kind {
            SignalKind::Sine => phase.sin(),
            SignalKind::Square => {
                if phase.sin() >= 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            SignalKind::Ramp => (self.frequency * t).fract(),
            SignalKind::Counter => seq as f64,
            SignalKind::Constant => 0.0,
        };
        self.offset + self.amplitude * v
    }
}

pub struct SignalNode {
    name: String,
    waveform: Waveform,
    values: usize,
    vectorize: usize,
    rate: f64,
    timer: TimerFd,
    sequence: AtomicU64,
}

impl SignalNode {
    pub const TYPE: &'static str = "signal";

    pub fn new(name: &str, waveform: Waveform, values: usize, rate: f64, vectorize: usize) -> Result<Self, NodeError> {
        if rate.is_nan() || rate <= 0.0 {
            return Err(NodeError::Config {
                node: name.to_string(),
                reason: "rate must be > 0".to_string(),
            });
        }
        let timer = TimerFd::periodic(Duration::from_secs_f64(1.0 / rate)).map_err(|source| {
            NodeError::Io {
                node: name.to_string(),
                source,
            }
        })?;

        Ok(Self {
            name: name.to_string(),
            waveform,
            values,
            vectorize: vectorize.max(1),
            rate,
            timer,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn from_config(name: &str, cfg: &NodeConfig) -> Result<Arc<dyn Node>, NodeError> {
        let invalid = |e: ConfigError| NodeError::Config {
            node: name.to_string(),
            reason: e.to_string(),
        };
        let p = &cfg.params;

        let kind = param_str(p, "signal")
            .map_err(invalid)?
            .unwrap_or("sine")
            .parse::<SignalKind>()
            .map_err(|reason| NodeError::Config {
                node: name.to_string(),
                reason,
            })?;
        let waveform = Waveform {
            kind,
            frequency: param_f64(p, "frequency", 1.0).map_err(invalid)?,
            amplitude: param_f64(p, "amplitude", 1.0).map_err(invalid)?,
            offset: param_f64(p, "offset", 0.0).map_err(invalid)?,
        };
        let values = param_usize(p, "values", 1).map_err(invalid)?;
        let rate = param_f64(p, "rate", 10.0).map_err(invalid)?;

        Ok(Arc::new(Self::new(name, waveform, values, rate, cfg.vectorize)?))
    }

    fn generate(&self, smp: &mut Smp) -> bool {
        let Some(r) = smp.get_mut() else {
            return false;
        };
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let t = seq as f64 / self.rate;

        r.sequence = seq;
        r.ts.origin = now();
        r.ts.received = r.ts.origin;
        r.set_len(self.values);
        for v in r.data_mut() {
            *v = Value::Float(self.waveform.value(t, seq));
        }
        true
    }
}

impl Node for SignalNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        Self::TYPE
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_ONLY
    }

    fn vectorize(&self) -> usize {
        self.vectorize
    }

    fn sample_len(&self) -> usize {
        self.values
    }

    fn poll_fd(&self) -> Option<RawFd> {
        Some(self.timer.as_raw_fd())
    }

    fn read(&self, smps: &mut [Smp]) -> Result<usize, NodeError> {
        let ticks = self.timer.expirations().map_err(|source| NodeError::Io {
            node: self.name.clone(),
            source,
        })?;
        if ticks > smps.len() as u64 {
            debug!(target: "node", node = %self.name, missed = ticks - smps.len() as u64, "signal generator missed steps");
        }

        let want = (ticks as usize).min(smps.len());
        let mut filled = 0;
        for smp in &mut smps[..want] {
            if !self.generate(smp) {
                break;
            }
            filled += 1;
        }
        Ok(filled)
    }
}

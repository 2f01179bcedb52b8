//! Float/fixed payload conversion.

use crate::hook::{Batch, EventMask, Hook, HookContext, HookEvent};
use crate::sample::{Value, ValueKind};

/// Conversion direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertMode {
    /// Scale floats up and store them as integers.
    ToFixed,
    /// Divide integers by the scale and store them as floats.
    ToFloat,
}

/// Converts sample values between float and fixed-point representation.
///
/// Only values whose format bit matches the source representation are
/// touched; the bit is flipped along with the cell, so a mixed-format
/// sample converts exactly its float (or integer) columns and a second
/// pass finds nothing left to do. Shared samples are left alone: the
/// payload of a co-owned sample must not change under its other holders.
#[derive(Debug)]
pub struct Convert {
    mode: ConvertMode,
    scale: f64,
}

impl Convert {
    /// Converter with the given direction and scale factor.
    pub fn new(mode: ConvertMode, scale: f64) -> Self {
        Self { mode, scale }
    }
}

impl Hook for Convert {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn mask(&self) -> EventMask {
        EventMask::READ
    }

    fn process(&mut self, _event: HookEvent, batch: &mut Batch, _ctx: &mut HookContext) {
        for smp in batch.iter_mut() {
            if smp.ref_count() != 1 {
                tracing::debug!(sequence = smp.sequence(), "skipping shared sample");
                continue;
            }

            for idx in 0..smp.len() {
                match (self.mode, smp.value_kind(idx)) {
                    (ConvertMode::ToFixed, Some(ValueKind::Float)) => {
                        let fixed = (f64::from(smp.values()[idx].as_f32()) * self.scale) as i32;
                        if let Some(vals) = smp.values_mut() {
                            vals[idx] = Value::integer(fixed);
                        }
                        smp.set_value_kind(idx, ValueKind::Integer);
                    }
                    (ConvertMode::ToFloat, Some(ValueKind::Integer)) => {
                        let float = (f64::from(smp.values()[idx].as_i32()) / self.scale) as f32;
                        if let Some(vals) = smp.values_mut() {
                            vals[idx] = Value::float(float);
                        }
                        smp.set_value_kind(idx, ValueKind::Float);
                    }
                    _ => {}
                }
            }
        }
    }
}

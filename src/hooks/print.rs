//! Per-sample debug logging.

use crate::hook::{Batch, EventMask, Hook, HookContext, HookEvent};
use crate::sample::{Sample, ValueKind};
use std::fmt::Write as _;

/// Logs every sample it sees at debug level.
///
/// Defaults to the read side; [`Print::on`] selects other events when a
/// pipeline needs eyes elsewhere.
#[derive(Debug)]
pub struct Print {
    mask: EventMask,
}

impl Print {
    /// Print read batches.
    pub fn new() -> Self {
        Self {
            mask: EventMask::READ,
        }
    }

    /// Print batches of the given events instead.
    pub fn on(mask: EventMask) -> Self {
        Self { mask }
    }

    fn render_values(smp: &Sample) -> String {
        let mut out = String::from("[");
        for (idx, value) in smp.values().iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            match smp.value_kind(idx) {
                Some(ValueKind::Integer) => {
                    let _ = write!(out, "{}", value.as_i32());
                }
                _ => {
                    let _ = write!(out, "{}", value.as_f32());
                }
            }
        }
        out.push(']');
        out
    }
}

impl Default for Print {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for Print {
    fn name(&self) -> &'static str {
        "print"
    }

    fn mask(&self) -> EventMask {
        self.mask
    }

    fn process(&mut self, event: HookEvent, batch: &mut Batch, _ctx: &mut HookContext) {
        for smp in batch.iter() {
            tracing::debug!(
                ?event,
                sequence = smp.sequence(),
                source = smp.source().map(|id| id.as_u32()),
                origin = %smp.ts().origin,
                received = %smp.ts().received,
                values = %Self::render_values(smp),
                "sample"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryType;
    use crate::pool::Pool;
    use crate::sample::Value;

    #[test]
    fn test_renders_mixed_values() {
        let pool = Pool::new(4, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let mut smp = Sample::alloc(&pool).unwrap();
        {
            let vals = smp.values_mut().unwrap();
            vals[0] = Value::float(1.5);
            vals[1] = Value::integer(-3);
        }
        smp.set_len(2);
        smp.set_value_kind(1, ValueKind::Integer);

        assert_eq!(Print::render_values(&smp), "[1.5, -3]");
    }

    #[test]
    fn test_passes_batch_through() {
        let pool = Pool::new(4, Sample::bytes_required(4), MemoryType::Heap).unwrap();
        let mut hook = Print::new();

        let mut batch = vec![Sample::alloc(&pool).unwrap()];
        hook.process(HookEvent::Read, &mut batch, &mut Default::default());
        assert_eq!(batch.len(), 1);
    }
}

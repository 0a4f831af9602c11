use serde::{Deserialize, Serialize};

/// Static exchange constraints for one instrument.
///
/// Quantities sent to the exchange must land on a multiple of `lot_step` and
/// never below `min_qty`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRules {
    pub lot_step: f64,
    pub min_qty: f64,
}

impl InstrumentRules {
    pub fn new(lot_step: f64, min_qty: f64) -> Self {
        Self { lot_step, min_qty }
    }

    /// Round a quantity down to the instrument's lot step.
    ///
    /// A result below the instrument minimum is replaced by exactly the
    /// minimum. Idempotent: rounding an already-rounded quantity returns the
    /// same quantity.
    pub fn round_lot_size(&self, qty: f64) -> f64 {
        if self.lot_step <= 0.0 {
            return qty.max(self.min_qty);
        }
        // Small epsilon guards against 0.3 / 0.1 = 2.9999... style fp noise.
        let floored = ((qty / self.lot_step) + 1e-9).floor() * self.lot_step;
        if floored < self.min_qty {
            self.min_qty
        } else {
            floored
        }
    }
}

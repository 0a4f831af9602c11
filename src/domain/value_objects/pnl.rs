use crate::domain::errors::ValidationError;

/// Profit-and-loss value object, expressed as a percentage of entry value.
///
/// Unlike Price, a PnL percentage can be negative to represent losses. The
/// leverage multiplier is already applied by the time a value lands here.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PnlPercent(f64);

impl PnlPercent {
    /// Create a new PnL percentage.
    ///
    /// # Errors
    /// Returns `ValidationError::MustBeFinite` if the value is NaN or infinite.
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        Ok(PnlPercent(value))
    }

    /// Get the raw value.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Check if this represents a profit (positive value).
    pub fn is_profit(&self) -> bool {
        self.0 > 0.0
    }

    /// Check if this represents a loss (negative value).
    pub fn is_loss(&self) -> bool {
        self.0 < 0.0
    }

    /// Zero PnL (breakeven).
    pub fn zero() -> Self {
        PnlPercent(0.0)
    }
}

impl std::fmt::Display for PnlPercent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 >= 0.0 {
            write!(f, "+{:.2}%", self.0)
        } else {
            write!(f, "-{:.2}%", self.0.abs())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pnl_profit() {
        let pnl = PnlPercent::new(12.5).unwrap();
        assert_eq!(pnl.value(), 12.5);
        assert!(pnl.is_profit());
        assert!(!pnl.is_loss());
    }

    #[test]
    fn test_pnl_loss() {
        let pnl = PnlPercent::new(-4.0).unwrap();
        assert!(pnl.is_loss());
        assert!(!pnl.is_profit());
    }

    #[test]
    fn test_pnl_zero() {
        let pnl = PnlPercent::zero();
        assert!(!pnl.is_profit());
        assert!(!pnl.is_loss());
    }

    #[test]
    fn test_pnl_invalid() {
        assert!(PnlPercent::new(f64::NAN).is_err());
        assert!(PnlPercent::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_pnl_display() {
        assert_eq!(format!("{}", PnlPercent::new(12.345).unwrap()), "+12.35%");
        assert_eq!(format!("{}", PnlPercent::new(-7.8).unwrap()), "-7.80%");
    }
}

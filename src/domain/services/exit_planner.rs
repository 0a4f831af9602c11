//! ExitPlanner - partial-exit schedules
//!
//! Two interchangeable planning modes, selected by data availability: a
//! fixed take-profit ladder with a configured percentage distribution, or
//! PnL-percentage thresholds projected onto target prices. An empty plan is
//! "no plan" to every caller, never an error.

use crate::domain::entities::deal::{Deal, Direction};
use crate::domain::services::strategy::StrategyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Tp,
    Pnl,
    Trailing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitStep {
    pub price: f64,
    pub percent: u32,
}

/// Ordered partial-exit schedule. Steps keep the insertion order of the
/// source rules; percentages are expected to sum to at most 100 but the
/// schedule is not required to be exhaustive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitPlan {
    pub kind: PlanKind,
    pub steps: Vec<ExitStep>,
}

impl ExitPlan {
    pub fn prices(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.price).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExitPlanner;

impl ExitPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Plan from the deal's take-profit ladder.
    ///
    /// Requires a distribution configured for exactly this take-profit
    /// count; yields no plan otherwise so the caller can fall back to PnL
    /// mode.
    pub fn plan_from_take_profits(
        &self,
        deal: &Deal,
        config: &StrategyConfig,
    ) -> Option<ExitPlan> {
        let take_profits = deal.take_profits();
        if take_profits.is_empty() {
            return None;
        }
        let distribution = config
            .tp_distributions
            .iter()
            .find(|(count, split)| *count == take_profits.len() && split.len() == take_profits.len())
            .map(|(_, split)| split)?;
        let steps: Vec<ExitStep> = take_profits
            .iter()
            .zip(distribution.iter())
            .map(|(price, percent)| ExitStep {
                price: *price,
                percent: *percent,
            })
            .collect();
        Some(ExitPlan {
            kind: PlanKind::Tp,
            steps,
        })
    }

    /// Plan from the configured PnL levels, projecting each level onto a
    /// target price per direction. Non-positive targets are discarded;
    /// yields no plan when every level is discarded.
    pub fn plan_from_pnl_levels(&self, deal: &Deal, config: &StrategyConfig) -> Option<ExitPlan> {
        let entry = deal.entry_price.filter(|e| *e > 0.0)?;
        let steps: Vec<ExitStep> = config
            .pnl_exit_levels
            .iter()
            .filter_map(|(level, percent)| {
                let price = match deal.direction {
                    Direction::Long => entry * (1.0 + level / 100.0),
                    Direction::Short => entry * (1.0 - level / 100.0),
                };
                if price > 0.0 {
                    Some(ExitStep {
                        price,
                        percent: *percent,
                    })
                } else {
                    None
                }
            })
            .collect();
        if steps.is_empty() {
            None
        } else {
            Some(ExitPlan {
                kind: PlanKind::Pnl,
                steps,
            })
        }
    }
}

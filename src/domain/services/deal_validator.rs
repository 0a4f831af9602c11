//! DealValidator - pre-submission sanity checks
//!
//! Read-only checks on a deal before it goes to the exchange. Warnings flag
//! what looks unusual, errors flag what is outright wrong for the deal's
//! direction. The only remote access is a single market-price lookup when
//! the entry is missing; the resolved value is returned in the report and
//! only persisted if the caller opts in.

use crate::domain::entities::deal::{Deal, Direction};
use crate::domain::errors::EngineError;
use crate::domain::repositories::exchange_transport::ExchangeTransport;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub entry_price_substituted: bool,
    pub resolved_entry: Option<f64>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct DealValidator {
    transport: Arc<dyn ExchangeTransport>,
    limiter: Arc<RateLimiter>,
    warning_distance_percent: f64,
}

impl DealValidator {
    pub fn new(
        transport: Arc<dyn ExchangeTransport>,
        limiter: Arc<RateLimiter>,
        warning_distance_percent: f64,
    ) -> Self {
        Self {
            transport,
            limiter,
            warning_distance_percent,
        }
    }

    pub async fn validate(&self, deal: &Deal) -> Result<ValidationReport, EngineError> {
        let mut report = ValidationReport::default();

        let entry = match deal.entry_price.filter(|p| *p > 0.0) {
            Some(price) => price,
            None => {
                self.limiter.acquire().await;
                let price = self.transport.get_last_price(&deal.symbol).await?;
                report.entry_price_substituted = true;
                report
                    .warnings
                    .push(format!("no entry price given, market price {} assumed", price));
                price
            }
        };
        report.resolved_entry = Some(entry);

        match deal.stop_loss.filter(|p| *p > 0.0) {
            None => report.warnings.push("no stop-loss set".to_string()),
            Some(sl) => {
                let wrong_side = match deal.direction {
                    Direction::Long => sl >= entry,
                    Direction::Short => sl <= entry,
                };
                if wrong_side {
                    report.errors.push(format!(
                        "stop-loss {} is on the wrong side of entry {} for {}",
                        sl, entry, deal.direction
                    ));
                } else if distance_percent(entry, sl) > self.warning_distance_percent {
                    report.warnings.push(format!(
                        "stop-loss {} is {:.1}% away from entry",
                        sl,
                        distance_percent(entry, sl)
                    ));
                }
            }
        }

        let take_profits = deal.take_profits();
        if take_profits.is_empty() {
            report.warnings.push("no take-profits set".to_string());
        }
        for tp in &take_profits {
            let wrong_side_of_entry = match deal.direction {
                Direction::Long => *tp <= entry,
                Direction::Short => *tp >= entry,
            };
            if wrong_side_of_entry {
                report.errors.push(format!(
                    "take-profit {} is on the wrong side of entry {} for {}",
                    tp, entry, deal.direction
                ));
                continue;
            }
            if let Some(sl) = deal.stop_loss.filter(|p| *p > 0.0) {
                let wrong_side_of_stop = match deal.direction {
                    Direction::Long => *tp <= sl,
                    Direction::Short => *tp >= sl,
                };
                if wrong_side_of_stop {
                    report.errors.push(format!(
                        "take-profit {} is on the wrong side of stop-loss {} for {}",
                        tp, sl, deal.direction
                    ));
                    continue;
                }
            }
            if distance_percent(entry, *tp) > self.warning_distance_percent {
                report.warnings.push(format!(
                    "take-profit {} is {:.1}% away from entry",
                    tp,
                    distance_percent(entry, *tp)
                ));
            }
        }

        Ok(report)
    }
}

fn distance_percent(entry: f64, price: f64) -> f64 {
    ((entry - price).abs() / entry) * 100.0
}

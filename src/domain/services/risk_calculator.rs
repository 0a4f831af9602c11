//! DealCalculator - risk-bounded order sizing
//!
//! Resolves entry and stop-loss prices, sizes the position so the worst-case
//! loss stays inside the configured budget, picks a leverage from the
//! candidate ladder and checks the required margin against the available
//! balance.

use crate::domain::entities::deal::{Deal, Direction};
use crate::domain::entities::instrument::InstrumentRules;
use crate::domain::errors::EngineError;
use crate::domain::repositories::exchange_transport::ExchangeTransport;
use crate::domain::services::strategy::StrategyConfig;
use crate::rate_limit::RateLimiter;
use std::sync::Arc;

/// Used when no ladder candidate yields a positive required capital.
const FALLBACK_LEVERAGE: u32 = 3;

pub struct DealCalculator {
    transport: Arc<dyn ExchangeTransport>,
    limiter: Arc<RateLimiter>,
}

impl DealCalculator {
    pub fn new(transport: Arc<dyn ExchangeTransport>, limiter: Arc<RateLimiter>) -> Self {
        Self { transport, limiter }
    }

    /// Size the deal and fill in entry, stop-loss, size, leverage and
    /// required capital. Returns a human-readable summary.
    ///
    /// # Errors
    /// `EntryEqualsStopLoss` when the two prices coincide (the size would be
    /// unbounded), `InsufficientFunds` when the required margin exceeds the
    /// available balance, `Transport` when a remote lookup fails.
    pub async fn prepare(
        &self,
        deal: &mut Deal,
        config: &StrategyConfig,
    ) -> Result<String, EngineError> {
        self.limiter.acquire().await;
        let balance = self.transport.get_balance().await?;
        self.limiter.acquire().await;
        let rules = self.transport.get_instrument_rules(&deal.symbol).await?;

        let entry = match deal.entry_price.filter(|p| *p > 0.0) {
            Some(price) => price,
            None => {
                self.limiter.acquire().await;
                self.transport.get_last_price(&deal.symbol).await?
            }
        };
        let stop_loss = match deal.stop_loss.filter(|p| *p > 0.0) {
            Some(price) => price,
            None => derive_stop_loss(entry, deal.direction, config.stop_loss_percent),
        };

        let distance = (entry - stop_loss).abs();
        if distance == 0.0 {
            return Err(EngineError::EntryEqualsStopLoss);
        }

        let raw_size = config.max_loss / distance;
        let size = rules.round_lot_size(raw_size);
        let leverage = pick_leverage(&config.leverage_ladder, size, entry);
        let required_capital = size * entry / leverage as f64;

        if required_capital > balance {
            return Err(EngineError::InsufficientFunds {
                required: required_capital,
                available: balance,
            });
        }

        deal.entry_price = Some(entry);
        deal.stop_loss = Some(stop_loss);
        deal.size = size;
        deal.leverage = leverage;
        deal.required_capital = required_capital;

        Ok(format!(
            "{} {} {}: entry {:.4}, stop {:.4}, size {}, leverage {}x, margin {:.2} of {:.2} available",
            deal.direction,
            deal.entry_type,
            deal.symbol,
            entry,
            stop_loss,
            size,
            leverage,
            required_capital,
            balance
        ))
    }

    /// Quantity to close for an exit of `percent` of the current position
    /// size. Returns zero (not an error) when the rounded quantity would be
    /// unfilled.
    pub fn exit_quantity(
        &self,
        current_size: f64,
        percent: u32,
        rules: &InstrumentRules,
    ) -> f64 {
        let raw = current_size * percent as f64 / 100.0;
        if raw <= 0.0 || rules.lot_step <= 0.0 {
            return 0.0;
        }
        let floored = ((raw / rules.lot_step) + 1e-9).floor() * rules.lot_step;
        if floored <= 0.0 {
            return 0.0;
        }
        if floored < rules.min_qty {
            rules.min_qty
        } else {
            floored
        }
    }
}

/// Stop-loss derived from entry when the signal carries none:
/// `entry * (1 - pct/100)` for longs, `entry * (1 + pct/100)` for shorts.
pub fn derive_stop_loss(entry: f64, direction: Direction, percent: f64) -> f64 {
    match direction {
        Direction::Long => entry * (1.0 - percent / 100.0),
        Direction::Short => entry * (1.0 + percent / 100.0),
    }
}

fn pick_leverage(ladder: &[u32], size: f64, entry: f64) -> u32 {
    ladder
        .iter()
        .copied()
        .filter(|lv| *lv > 0)
        .find(|lv| size * entry / *lv as f64 > 0.0)
        .unwrap_or(FALLBACK_LEVERAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::deal::EntryType;
    use crate::domain::entities::snapshot::{OrderInfo, PositionSnapshot};
    use crate::domain::errors::TransportError;
    use crate::domain::repositories::exchange_transport::{
        OpenOrderFilter, OrderRequest, PlaceOrderResult, TransportResult,
    };
    use crate::rate_limit::RateLimiterConfig;
    use async_trait::async_trait;

    struct MockTransport {
        balance: f64,
        last_price: f64,
        rules: InstrumentRules,
    }

    impl MockTransport {
        fn new(balance: f64) -> Self {
            Self {
                balance,
                last_price: 100.0,
                rules: InstrumentRules::new(0.001, 0.001),
            }
        }
    }

    #[async_trait]
    impl ExchangeTransport for MockTransport {
        async fn get_last_price(&self, _symbol: &str) -> TransportResult<f64> {
            Ok(self.last_price)
        }
        async fn get_instrument_rules(&self, _symbol: &str) -> TransportResult<InstrumentRules> {
            Ok(self.rules)
        }
        async fn get_balance(&self) -> TransportResult<f64> {
            Ok(self.balance)
        }
        async fn place_order(
            &self,
            _request: &OrderRequest,
        ) -> TransportResult<PlaceOrderResult> {
            Err(TransportError::OrderPlacementFailed("not wired".to_string()))
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> TransportResult<bool> {
            Ok(true)
        }
        async fn set_stop_loss(&self, _deal: &Deal) -> TransportResult<PlaceOrderResult> {
            Err(TransportError::OrderPlacementFailed("not wired".to_string()))
        }
        async fn cancel_order(&self, _order_id: &str, _symbol: &str) -> TransportResult<()> {
            Ok(())
        }
        async fn get_position_list(&self) -> TransportResult<Vec<PositionSnapshot>> {
            Ok(vec![])
        }
        async fn get_open_orders(
            &self,
            _filter: &OpenOrderFilter,
        ) -> TransportResult<Vec<OrderInfo>> {
            Ok(vec![])
        }
    }

    fn calculator(balance: f64) -> DealCalculator {
        DealCalculator::new(
            Arc::new(MockTransport::new(balance)),
            Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        )
    }

    fn config() -> StrategyConfig {
        StrategyConfig {
            stop_loss_percent: 3.0,
            max_loss: 10.0,
            leverage_ladder: vec![20, 10, 5],
            warning_distance_percent: 20.0,
            tp_distributions: vec![(3, vec![50, 25, 25])],
            pnl_exit_levels: vec![(10.0, 25)],
        }
    }

    fn long_deal() -> Deal {
        Deal::new(
            "d1",
            1,
            "BTCUSDT",
            Direction::Long,
            EntryType::Market,
            "default",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_prepare_sizes_against_loss_budget() {
        // entry=100, stop=99, budget=10 -> raw size 10
        let calc = calculator(1000.0);
        let mut deal = long_deal();
        deal.entry_price = Some(100.0);
        deal.stop_loss = Some(99.0);

        let summary = calc.prepare(&mut deal, &config()).await.unwrap();
        assert!((deal.size - 10.0).abs() < 1e-9);
        assert!(deal.size >= 0.001);
        assert_eq!(deal.leverage, 20);
        let expected_capital = deal.size * 100.0 / 20.0;
        assert!((deal.required_capital - expected_capital).abs() < 1e-9);
        assert!(deal.required_capital <= 1000.0);
        assert!(summary.contains("BTCUSDT"));
        assert!(summary.contains("20x"));
    }

    #[tokio::test]
    async fn test_prepare_fetches_missing_entry_price() {
        let calc = calculator(1000.0);
        let mut deal = long_deal();
        let _ = calc.prepare(&mut deal, &config()).await.unwrap();
        assert_eq!(deal.entry_price, Some(100.0));
        // Derived stop: 100 * (1 - 3/100)
        assert!((deal.stop_loss.unwrap() - 97.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prepare_derives_short_stop_above_entry() {
        let calc = calculator(1000.0);
        let mut deal = long_deal();
        deal.direction = Direction::Short;
        let _ = calc.prepare(&mut deal, &config()).await.unwrap();
        assert!((deal.stop_loss.unwrap() - 103.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prepare_rejects_entry_equal_to_stop() {
        let calc = calculator(1000.0);
        let mut deal = long_deal();
        deal.entry_price = Some(100.0);
        deal.stop_loss = Some(100.0);
        let err = calc.prepare(&mut deal, &config()).await.unwrap_err();
        assert!(matches!(err, EngineError::EntryEqualsStopLoss));
        // The deal is not partially mutated by a failed preparation.
        assert_eq!(deal.size, 0.0);
    }

    #[tokio::test]
    async fn test_prepare_rejects_insufficient_balance() {
        let calc = calculator(10.0);
        let mut deal = long_deal();
        deal.entry_price = Some(100.0);
        deal.stop_loss = Some(99.0);
        let err = calc.prepare(&mut deal, &config()).await.unwrap_err();
        match err {
            EngineError::InsufficientFunds { required, available } => {
                assert!(required > available);
                assert_eq!(available, 10.0);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prepare_clamps_tiny_size_to_minimum() {
        let calc = calculator(1000.0);
        let mut deal = long_deal();
        deal.entry_price = Some(100.0);
        deal.stop_loss = Some(50.0);
        let mut cfg = config();
        cfg.max_loss = 0.00001; // raw size far below the minimum
        let _ = calc.prepare(&mut deal, &cfg).await.unwrap();
        assert_eq!(deal.size, 0.001);
    }

    #[test]
    fn test_pick_leverage_fallback_on_empty_ladder() {
        assert_eq!(pick_leverage(&[], 1.0, 100.0), FALLBACK_LEVERAGE);
    }

    #[test]
    fn test_pick_leverage_first_candidate_wins() {
        assert_eq!(pick_leverage(&[20, 10, 5], 1.0, 100.0), 20);
    }

    #[test]
    fn test_exit_quantity_rounds_down() {
        let calc = calculator(0.0);
        let rules = InstrumentRules::new(0.001, 0.001);
        let qty = calc.exit_quantity(1.0, 25, &rules);
        assert!((qty - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_exit_quantity_zero_when_unfilled() {
        let calc = calculator(0.0);
        let rules = InstrumentRules::new(0.001, 0.001);
        assert_eq!(calc.exit_quantity(0.0, 50, &rules), 0.0);
        assert_eq!(calc.exit_quantity(0.0004, 25, &rules), 0.0);
    }

    #[test]
    fn test_exit_quantity_clamps_to_minimum() {
        let calc = calculator(0.0);
        let rules = InstrumentRules::new(0.001, 0.01);
        let qty = calc.exit_quantity(0.02, 25, &rules);
        assert_eq!(qty, 0.01);
    }

    #[test]
    fn test_derive_stop_loss_sides() {
        assert!((derive_stop_loss(100.0, Direction::Long, 5.0) - 95.0).abs() < 1e-9);
        assert!((derive_stop_loss(100.0, Direction::Short, 5.0) - 105.0).abs() < 1e-9);
    }
}

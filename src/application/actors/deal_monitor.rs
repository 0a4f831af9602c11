//! Deal Monitor Actor
//!
//! Fans every price-update stream into one single-threaded handler so deal
//! reactions stay ordered per symbol. Reconciliation and command flows talk
//! to the store directly; this actor is the only consumer of the streaming
//! tick callbacks.

use crate::domain::services::strategy::{StrategyContext, StrategyRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Channel capacity for deal monitor messages
const DEAL_MONITOR_CHANNEL_CAPACITY: usize = 256;

/// Messages that can be sent to the deal monitor
#[derive(Debug)]
pub enum DealMonitorMessage {
    /// A price tick for one symbol
    PriceUpdate { symbol: String, price: f64 },

    /// Rebuild every strategy's risk parameters from a fresh balance
    RefreshRisk { balance: f64 },

    /// Shutdown the actor
    Shutdown,
}

pub struct DealMonitor {
    ctx: StrategyContext,
    strategies: Arc<StrategyRegistry>,
}

impl DealMonitor {
    pub fn new(ctx: StrategyContext, strategies: Arc<StrategyRegistry>) -> Self {
        Self { ctx, strategies }
    }

    /// Spawn the monitor and return its message sender.
    pub fn spawn(
        ctx: StrategyContext,
        strategies: Arc<StrategyRegistry>,
    ) -> mpsc::Sender<DealMonitorMessage> {
        let (tx, rx) = mpsc::channel(DEAL_MONITOR_CHANNEL_CAPACITY);
        let monitor = Self::new(ctx, strategies);
        tokio::spawn(async move {
            monitor.run(rx).await;
        });
        info!("DealMonitor spawned");
        tx
    }

    /// Main actor loop
    async fn run(self, mut rx: mpsc::Receiver<DealMonitorMessage>) {
        info!("DealMonitor started");

        while let Some(msg) = rx.recv().await {
            match msg {
                DealMonitorMessage::PriceUpdate { symbol, price } => {
                    self.handle_tick(&symbol, price).await;
                }

                DealMonitorMessage::RefreshRisk { balance } => {
                    debug!(balance, "DealMonitor refreshing risk parameters");
                    self.strategies.refresh_all(balance);
                }

                DealMonitorMessage::Shutdown => {
                    info!("DealMonitor received shutdown signal");
                    break;
                }
            }
        }

        info!("DealMonitor stopped");
    }

    /// Dispatch one tick to every deal tracked for the symbol, each through
    /// its own strategy. An unknown strategy name falls back to the default,
    /// logged inside the registry.
    async fn handle_tick(&self, symbol: &str, price: f64) {
        for deal in self.ctx.store.by_symbol(symbol) {
            let strategy = self.strategies.resolve_or_default(&deal.strategy_name);
            match strategy.on_price_update(&deal.id, price, &self.ctx).await {
                Ok(actions) => {
                    if !actions.is_empty() {
                        debug!(deal_id = %deal.id, ?actions, "tick reactions applied");
                    }
                }
                Err(e) => {
                    error!(deal_id = %deal.id, symbol, "tick reaction failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingConfig;
    use crate::domain::entities::deal::{Deal, DealState, Direction, EntryType};
    use crate::domain::entities::instrument::InstrumentRules;
    use crate::domain::entities::snapshot::{OrderInfo, PositionSnapshot};
    use crate::domain::repositories::exchange_transport::{
        ExchangeTransport, OpenOrderFilter, OrderRequest, PlaceOrderResult, TransportResult,
    };
    use crate::domain::services::deal_store::ActiveDealStore;
    use crate::rate_limit::{RateLimiter, RateLimiterConfig};
    use async_trait::async_trait;
    use std::time::Duration;

    struct QuietTransport;

    #[async_trait]
    impl ExchangeTransport for QuietTransport {
        async fn get_last_price(&self, _symbol: &str) -> TransportResult<f64> {
            Ok(100.0)
        }
        async fn get_instrument_rules(&self, _symbol: &str) -> TransportResult<InstrumentRules> {
            Ok(InstrumentRules::new(0.001, 0.001))
        }
        async fn get_balance(&self) -> TransportResult<f64> {
            Ok(1000.0)
        }
        async fn place_order(
            &self,
            _request: &OrderRequest,
        ) -> TransportResult<PlaceOrderResult> {
            Ok(PlaceOrderResult {
                order_id: "o".to_string(),
                success: true,
                message: "ok".to_string(),
            })
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> TransportResult<bool> {
            Ok(true)
        }
        async fn set_stop_loss(&self, _deal: &Deal) -> TransportResult<PlaceOrderResult> {
            Ok(PlaceOrderResult {
                order_id: "sl".to_string(),
                success: true,
                message: "ok".to_string(),
            })
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

    fn context() -> (Arc<ActiveDealStore>, StrategyContext) {
        let store = Arc::new(ActiveDealStore::new());
        let ctx = StrategyContext {
            store: store.clone(),
            transport: Arc::new(QuietTransport),
            limiter: Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        };
        (store, ctx)
    }

    #[tokio::test]
    async fn test_price_update_activates_pending_deal() {
        let (store, ctx) = context();
        let mut deal = Deal::new(
            "d1",
            1,
            "BTCUSDT",
            Direction::Long,
            EntryType::Limit,
            "default",
        )
        .unwrap();
        deal.entry_price = Some(100.0);
        store.add(deal).unwrap();

        let strategies = Arc::new(StrategyRegistry::new(
            Arc::new(TradingConfig::default()),
            1000.0,
        ));
        let tx = DealMonitor::spawn(ctx, strategies);
        tx.send(DealMonitorMessage::PriceUpdate {
            symbol: "BTCUSDT".to_string(),
            price: 99.0,
        })
        .await
        .unwrap();

        // Give the actor a moment to process the tick.
        for _ in 0..50 {
            if store.get("d1").unwrap().state == DealState::Active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.get("d1").unwrap().state, DealState::Active);

        tx.send(DealMonitorMessage::Shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_risk_rebuilds_configs() {
        let (_store, ctx) = context();
        let strategies = Arc::new(StrategyRegistry::new(
            Arc::new(TradingConfig::default()),
            1000.0,
        ));
        let tx = DealMonitor::spawn(ctx, strategies.clone());
        tx.send(DealMonitorMessage::RefreshRisk { balance: 5000.0 })
            .await
            .unwrap();

        for _ in 0..50 {
            let max_loss = strategies.resolve("default").unwrap().config().max_loss;
            if (max_loss - 100.0).abs() < 1e-9 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(
            (strategies.resolve("default").unwrap().config().max_loss - 100.0).abs() < 1e-9
        );

        tx.send(DealMonitorMessage::Shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_for_unknown_symbol_is_ignored() {
        let (store, ctx) = context();
        let strategies = Arc::new(StrategyRegistry::new(
            Arc::new(TradingConfig::default()),
            1000.0,
        ));
        let tx = DealMonitor::spawn(ctx, strategies);
        tx.send(DealMonitorMessage::PriceUpdate {
            symbol: "DOGEUSDT".to_string(),
            price: 0.1,
        })
        .await
        .unwrap();
        tx.send(DealMonitorMessage::Shutdown).await.unwrap();
        assert!(store.is_empty());
    }
}

//! Strategy - per-deal behavior bundle
//!
//! A strategy bundles the risk configuration, exit planning and the reaction
//! to price ticks for the deals that carry its name. One canonical trait,
//! two implementations selected by name: `default` reacts to PnL thresholds
//! and trails the stop to breakeven, `free` plans exits but leaves the
//! position alone otherwise.

use crate::config::TradingConfig;
use crate::domain::entities::deal::{Deal, DealState, Direction};
use crate::domain::entities::snapshot::OrderSide;
use crate::domain::errors::EngineError;
use crate::domain::repositories::exchange_transport::{ExchangeTransport, OrderRequest};
use crate::domain::services::deal_store::ActiveDealStore;
use crate::domain::services::exit_planner::{ExitPlan, ExitPlanner};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub const DEFAULT_STRATEGY: &str = "default";
pub const FREE_STRATEGY: &str = "free";

/// Immutable-per-instance risk parameters.
///
/// Rebuilt wholesale from the base configuration whenever balance-derived
/// values refresh; never mutated in place, so concurrent readers always see
/// one coherent snapshot.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub stop_loss_percent: f64,
    pub max_loss: f64,
    pub leverage_ladder: Vec<u32>,
    pub warning_distance_percent: f64,
    pub tp_distributions: Vec<(usize, Vec<u32>)>,
    pub pnl_exit_levels: Vec<(f64, u32)>,
}

impl StrategyConfig {
    /// Derive the per-deal loss budget from the available balance.
    pub fn from_balance(base: &TradingConfig, balance: f64) -> Self {
        StrategyConfig {
            stop_loss_percent: base.default_stop_loss_percent,
            max_loss: balance * base.risk_per_trade_percent / 100.0,
            leverage_ladder: base.leverage_ladder.clone(),
            warning_distance_percent: base.warning_distance_percent,
            tp_distributions: base.tp_distributions.clone(),
            pnl_exit_levels: base.pnl_exit_levels.clone(),
        }
    }
}

/// Collaborators a strategy reaction needs. The strategy reads deals from
/// the store and writes them back through `update`; it must not retain any
/// deal reference past the call.
pub struct StrategyContext {
    pub store: Arc<ActiveDealStore>,
    pub transport: Arc<dyn ExchangeTransport>,
    pub limiter: Arc<RateLimiter>,
}

/// What a price-tick reaction did, for reporting and notification.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyAction {
    Activated,
    ForcedClose { reason: String },
    ThresholdTriggered { level: f64 },
    ExitRecorded { price: f64, amount: f64 },
    StopMovedToBreakeven { price: f64 },
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Current risk parameters. The returned snapshot stays coherent even
    /// while a refresh replaces the underlying config.
    fn config(&self) -> Arc<StrategyConfig>;

    /// Rebuild the config from the latest available balance.
    fn refresh_config(&self, balance: f64);

    /// Produce a partial-exit schedule for the deal, or None when neither
    /// planning mode applies.
    fn plan_exits(&self, deal: &Deal) -> Option<ExitPlan>;

    /// React to a price tick for one deal. Mutations go through the store;
    /// returns the actions taken.
    async fn on_price_update(
        &self,
        deal_id: &str,
        price: f64,
        ctx: &StrategyContext,
    ) -> Result<Vec<StrategyAction>, EngineError>;
}

/// TP-ladder-first planning shared by both variants: fall back to PnL
/// levels when no distribution matches the take-profit count.
fn plan_tp_then_pnl(planner: &ExitPlanner, deal: &Deal, config: &StrategyConfig) -> Option<ExitPlan> {
    planner
        .plan_from_take_profits(deal, config)
        .or_else(|| planner.plan_from_pnl_levels(deal, config))
}

pub struct DefaultStrategy {
    base: Arc<TradingConfig>,
    config: RwLock<Arc<StrategyConfig>>,
    planner: ExitPlanner,
}

impl DefaultStrategy {
    pub fn new(base: Arc<TradingConfig>, initial_balance: f64) -> Self {
        let config = Arc::new(StrategyConfig::from_balance(&base, initial_balance));
        Self {
            base,
            config: RwLock::new(config),
            planner: ExitPlanner::new(),
        }
    }

    /// Handle a tick for a deal still waiting on its limit entry.
    async fn react_pending_entry(
        &self,
        deal: &Deal,
        price: f64,
        ctx: &StrategyContext,
    ) -> Result<Vec<StrategyAction>, EngineError> {
        // A tick beyond the first take-profit means the entry activation was
        // missed: close remotely before the move runs away.
        if deal.first_take_profit_crossed(price) {
            let side = OrderSide::closes(deal.direction);
            let request = OrderRequest::market_close(deal.symbol.clone(), side, deal.size)
                .map_err(|e| EngineError::Validation(e.to_string()))?;
            ctx.limiter.acquire().await;
            let result = ctx.transport.place_order(&request).await?;
            warn!(
                deal_id = %deal.id,
                symbol = %deal.symbol,
                order_id = %result.order_id,
                "take-profit crossed while entry still pending, forced remote close"
            );
            return Ok(vec![StrategyAction::ForcedClose {
                reason: format!(
                    "price {} crossed first take-profit while entry was still pending",
                    price
                ),
            }]);
        }
        if deal.entry_crossed(price) {
            ctx.store.update(&deal.id, |d| d.activate())?;
            info!(deal_id = %deal.id, price, "limit entry crossed, deal active");
            return Ok(vec![StrategyAction::Activated]);
        }
        Ok(vec![])
    }

    /// Handle a tick for an active deal: PnL thresholds, exit recording and
    /// the breakeven trail.
    async fn react_active(
        &self,
        deal: &Deal,
        price: f64,
        ctx: &StrategyContext,
    ) -> Result<Vec<StrategyAction>, EngineError> {
        let mut actions = Vec::new();

        if deal.stop_loss_crossed(price) {
            // SL fired remotely; thresholds re-arm for whatever remains.
            ctx.store.update(&deal.id, |d| d.clear_triggered_levels())?;
            return Ok(actions);
        }

        let Some(pnl) = deal.pnl_percent(price) else {
            return Ok(actions);
        };
        let config = self.config();

        for (level, _exit_percent) in &config.pnl_exit_levels {
            if pnl.value() < *level || deal.threshold_triggered(*level) {
                continue;
            }
            let newly_marked = ctx.store.update(&deal.id, |d| d.mark_threshold(*level))?;
            if !newly_marked {
                continue;
            }
            debug!(deal_id = %deal.id, level, pnl = %pnl, "PnL threshold crossed");
            actions.push(StrategyAction::ThresholdTriggered { level: *level });

            // Refresh the remote snapshot and record the executed-size delta
            // as an exit event.
            ctx.limiter.acquire().await;
            let positions = ctx.transport.get_position_list().await?;
            let remote = positions
                .iter()
                .find(|p| p.symbol == deal.symbol && p.side == deal.direction);
            if let Some(snapshot) = remote {
                let previous_size = deal.size;
                ctx.store
                    .update(&deal.id, |d| d.apply_snapshot(snapshot))?;
                let delta = previous_size - snapshot.size;
                if delta > 0.0 {
                    if let Some(exit_price) = crossed_take_profit(deal, price) {
                        let recorded = ctx
                            .store
                            .update(&deal.id, |d| d.record_exit(exit_price, delta))?;
                        match recorded {
                            Ok(()) => {
                                actions.push(StrategyAction::ExitRecorded {
                                    price: exit_price,
                                    amount: delta,
                                });
                            }
                            Err(e) => warn!(deal_id = %deal.id, "exit not recorded: {}", e),
                        }
                    }
                }
            }

            // Move the stop to breakeven while it still sits on the losing
            // side; a stop already at or beyond entry is never worsened.
            let current = ctx
                .store
                .get(&deal.id)
                .ok_or_else(|| EngineError::Store(format!("deal {} vanished mid-update", deal.id)))?;
            if current.active && current.stop_loss_below_breakeven() {
                if let Some(entry) = current.entry_price {
                    ctx.store
                        .update(&deal.id, |d| d.stop_loss = Some(entry))?;
                    let updated = ctx.store.get(&deal.id).ok_or_else(|| {
                        EngineError::Store(format!("deal {} vanished mid-update", deal.id))
                    })?;
                    ctx.limiter.acquire().await;
                    match ctx.transport.set_stop_loss(&updated).await {
                        Ok(result) if result.success => {
                            info!(deal_id = %deal.id, entry, "stop-loss moved to breakeven");
                        }
                        Ok(result) => {
                            warn!(deal_id = %deal.id, "exchange refused breakeven stop: {}", result.message);
                        }
                        Err(e) => {
                            warn!(deal_id = %deal.id, "breakeven stop not pushed: {}", e);
                        }
                    }
                    actions.push(StrategyAction::StopMovedToBreakeven { price: entry });
                }
            }
        }

        Ok(actions)
    }
}

#[async_trait]
impl Strategy for DefaultStrategy {
    fn name(&self) -> &str {
        DEFAULT_STRATEGY
    }

    fn config(&self) -> Arc<StrategyConfig> {
        self.config.read().expect("strategy config poisoned").clone()
    }

    fn refresh_config(&self, balance: f64) {
        let rebuilt = Arc::new(StrategyConfig::from_balance(&self.base, balance));
        *self.config.write().expect("strategy config poisoned") = rebuilt;
        debug!(strategy = DEFAULT_STRATEGY, balance, "strategy config refreshed");
    }

    fn plan_exits(&self, deal: &Deal) -> Option<ExitPlan> {
        plan_tp_then_pnl(&self.planner, deal, &self.config())
    }

    async fn on_price_update(
        &self,
        deal_id: &str,
        price: f64,
        ctx: &StrategyContext,
    ) -> Result<Vec<StrategyAction>, EngineError> {
        let Some(deal) = ctx.store.get(deal_id) else {
            return Ok(vec![]);
        };
        if !deal.active {
            return Ok(vec![]);
        }
        match deal.state {
            DealState::PendingEntry => self.react_pending_entry(&deal, price, ctx).await,
            DealState::Active | DealState::PartiallyExited => {
                self.react_active(&deal, price, ctx).await
            }
            DealState::Closed => Ok(vec![]),
        }
    }
}

/// Hands-off variant: exits are planned, nothing is touched on ticks beyond
/// limit-entry activation.
pub struct FreeStrategy {
    base: Arc<TradingConfig>,
    config: RwLock<Arc<StrategyConfig>>,
    planner: ExitPlanner,
}

impl FreeStrategy {
    pub fn new(base: Arc<TradingConfig>, initial_balance: f64) -> Self {
        let config = Arc::new(StrategyConfig::from_balance(&base, initial_balance));
        Self {
            base,
            config: RwLock::new(config),
            planner: ExitPlanner::new(),
        }
    }
}

#[async_trait]
impl Strategy for FreeStrategy {
    fn name(&self) -> &str {
        FREE_STRATEGY
    }

    fn config(&self) -> Arc<StrategyConfig> {
        self.config.read().expect("strategy config poisoned").clone()
    }

    fn refresh_config(&self, balance: f64) {
        let rebuilt = Arc::new(StrategyConfig::from_balance(&self.base, balance));
        *self.config.write().expect("strategy config poisoned") = rebuilt;
        debug!(strategy = FREE_STRATEGY, balance, "strategy config refreshed");
    }

    fn plan_exits(&self, deal: &Deal) -> Option<ExitPlan> {
        plan_tp_then_pnl(&self.planner, deal, &self.config())
    }

    async fn on_price_update(
        &self,
        deal_id: &str,
        price: f64,
        ctx: &StrategyContext,
    ) -> Result<Vec<StrategyAction>, EngineError> {
        let Some(deal) = ctx.store.get(deal_id) else {
            return Ok(vec![]);
        };
        if deal.active && deal.state == DealState::PendingEntry && deal.entry_crossed(price) {
            ctx.store.update(deal_id, |d| d.activate())?;
            return Ok(vec![StrategyAction::Activated]);
        }
        Ok(vec![])
    }
}

/// The highest take-profit the price has actually crossed, used to anchor a
/// recorded exit to a published level.
fn crossed_take_profit(deal: &Deal, price: f64) -> Option<f64> {
    let take_profits = deal.take_profits();
    match deal.direction {
        Direction::Long => take_profits
            .into_iter()
            .filter(|tp| price >= *tp)
            .fold(None, |best, tp| match best {
                Some(b) if b >= tp => Some(b),
                _ => Some(tp),
            }),
        Direction::Short => take_profits
            .into_iter()
            .filter(|tp| price <= *tp)
            .fold(None, |best, tp| match best {
                Some(b) if b <= tp => Some(b),
                _ => Some(tp),
            }),
    }
}

/// Closed set of strategies, selected by name.
pub struct StrategyRegistry {
    default: Arc<DefaultStrategy>,
    free: Arc<FreeStrategy>,
}

impl StrategyRegistry {
    pub fn new(base: Arc<TradingConfig>, initial_balance: f64) -> Self {
        Self {
            default: Arc::new(DefaultStrategy::new(base.clone(), initial_balance)),
            free: Arc::new(FreeStrategy::new(base, initial_balance)),
        }
    }

    /// Result-returning lookup; unknown names are the caller's problem.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Strategy>, EngineError> {
        match name {
            DEFAULT_STRATEGY => Ok(self.default.clone()),
            FREE_STRATEGY => Ok(self.free.clone()),
            other => Err(EngineError::UnknownStrategy(other.to_string())),
        }
    }

    /// Explicit fallback policy for call sites that must keep going: an
    /// unknown name resolves to the default strategy, logged.
    pub fn resolve_or_default(&self, name: &str) -> Arc<dyn Strategy> {
        match self.resolve(name) {
            Ok(strategy) => strategy,
            Err(_) => {
                warn!(strategy = name, "unknown strategy, falling back to default");
                self.default.clone()
            }
        }
    }

    /// Rebuild every strategy's config from the latest balance.
    pub fn refresh_all(&self, balance: f64) {
        self.default.refresh_config(balance);
        self.free.refresh_config(balance);
    }

    pub fn known_names(&self) -> Vec<&'static str> {
        vec![DEFAULT_STRATEGY, FREE_STRATEGY]
    }
}

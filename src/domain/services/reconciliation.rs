//! ReconciliationEngine - converging local deals to exchange truth
//!
//! A single-pass sweep refreshes every tracked deal from its remote
//! position, rebinds stray reduce-only orders to their TP/SL roles, removes
//! deals whose position is gone, and queues any untracked remote exposure as
//! pending work. Pending work is then drained one item at a time by the
//! recovery wizard, which needs the caller to supply a strategy name per
//! item.
//!
//! A single item's failure is caught and reported inline; only the
//! top-level position/order fetch aborts a whole sweep.

use crate::domain::entities::deal::{Deal, DealState, Direction, OrderBinding, OrderRole};
use crate::domain::entities::snapshot::{OrderInfo, OrderSide, PositionSnapshot};
use crate::domain::errors::EngineError;
use crate::domain::repositories::exchange_transport::{ExchangeTransport, OpenOrderFilter};
use crate::domain::services::deal_store::ActiveDealStore;
use crate::domain::services::risk_calculator::derive_stop_loss;
use crate::domain::services::strategy::StrategyRegistry;
use crate::rate_limit::RateLimiter;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of the sweep for one local deal.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Snapshot refreshed, every stray order bound.
    Updated,
    /// Snapshot refreshed, some orders could not be bound.
    PartiallyUpdated(Vec<String>),
    /// Limit entry not filled yet; the backing order is still open.
    StillPending,
    /// No matching remote position; the deal was removed as closed.
    Closed,
    /// The deal could not be processed; the sweep carried on.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DealSync {
    pub deal_id: String,
    pub symbol: String,
    pub outcome: SyncOutcome,
}

/// Untracked remote exposure waiting for the recovery wizard.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingItem {
    Position(PositionSnapshot),
    LimitOrder(OrderInfo),
}

impl PendingItem {
    pub fn symbol(&self) -> &str {
        match self {
            PendingItem::Position(p) => &p.symbol,
            PendingItem::LimitOrder(o) => &o.symbol,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PendingItem::Position(p) => format!(
                "untracked {} position on {}: size {} @ {}",
                p.side, p.symbol, p.size, p.avg_price
            ),
            PendingItem::LimitOrder(o) => format!(
                "untracked limit order {} on {}: {} {} @ {}",
                o.order_id,
                o.symbol,
                o.side,
                o.qty,
                o.price.unwrap_or(0.0)
            ),
        }
    }
}

/// Outcome of one full sweep.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub timestamp: DateTime<Utc>,
    pub deals: Vec<DealSync>,
    pub pending: Vec<PendingItem>,
}

impl SyncReport {
    pub fn closed_count(&self) -> usize {
        self.deals
            .iter()
            .filter(|d| d.outcome == SyncOutcome::Closed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.deals
            .iter()
            .filter(|d| matches!(d.outcome, SyncOutcome::Failed(_)))
            .count()
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sync of {} deals: {} closed, {} failed, {} pending item(s)",
            self.deals.len(),
            self.closed_count(),
            self.failed_count(),
            self.pending.len()
        )
    }
}

/// Per-item result of the recovery wizard.
#[derive(Debug, Clone)]
pub struct RecoveryItemReport {
    pub deal_id: Option<String>,
    pub symbol: String,
    pub success: bool,
    pub messages: Vec<String>,
}

/// Wizard transition: either the next item wants input, or the queue is
/// drained.
#[derive(Debug, Clone)]
pub enum RecoveryStep {
    Advanced { report: RecoveryItemReport },
    Finished { report: RecoveryItemReport },
}

/// Explicit wizard state: the pending queue plus a cursor. Plain process
/// memory; a restart re-derives it from a fresh sweep.
#[derive(Debug)]
pub struct RecoverySession {
    pending: Vec<PendingItem>,
    cursor: usize,
}

impl RecoverySession {
    pub fn current(&self) -> Option<&PendingItem> {
        self.pending.get(self.cursor)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len().saturating_sub(self.cursor)
    }
}

pub struct ReconciliationEngine {
    store: Arc<ActiveDealStore>,
    transport: Arc<dyn ExchangeTransport>,
    limiter: Arc<RateLimiter>,
    strategies: Arc<StrategyRegistry>,
    settle_coin: String,
    recovering: AtomicBool,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<ActiveDealStore>,
        transport: Arc<dyn ExchangeTransport>,
        limiter: Arc<RateLimiter>,
        strategies: Arc<StrategyRegistry>,
        settle_coin: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            limiter,
            strategies,
            settle_coin: settle_coin.into(),
            recovering: AtomicBool::new(false),
        }
    }

    /// Single-pass sync of the whole store against remote state.
    ///
    /// Refuses to run while a recovery session is open; the wizard and the
    /// sweep must not race each other over the same store.
    pub async fn sync_deals(&self) -> Result<SyncReport, EngineError> {
        if self.recovering.load(Ordering::SeqCst) {
            return Err(EngineError::RecoveryInProgress);
        }

        self.limiter.acquire().await;
        let positions = self.transport.get_position_list().await?;
        self.limiter.acquire().await;
        let orders = self
            .transport
            .get_open_orders(&OpenOrderFilter::SettleCoin(self.settle_coin.clone()))
            .await?;

        let mut deals = Vec::new();
        let mut matched: HashSet<usize> = HashSet::new();

        for deal in self.store.all() {
            let remote = positions
                .iter()
                .enumerate()
                .find(|(_, p)| p.symbol == deal.symbol && p.side == deal.direction);
            let outcome = match remote {
                Some((index, snapshot)) => {
                    matched.insert(index);
                    match self.refresh_deal(&deal, snapshot, &orders) {
                        Ok(issues) if issues.is_empty() => SyncOutcome::Updated,
                        Ok(issues) => SyncOutcome::PartiallyUpdated(issues),
                        Err(e) => {
                            error!(deal_id = %deal.id, "deal refresh failed: {}", e);
                            SyncOutcome::Failed(e.to_string())
                        }
                    }
                }
                None => {
                    // A deal still waiting on its limit entry has no position
                    // to match; it survives as long as the entry order does.
                    let entry_still_open = deal.state == DealState::PendingEntry
                        && deal
                            .order_bindings
                            .iter()
                            .any(|b| orders.iter().any(|o| o.order_id == b.order_id));
                    if entry_still_open {
                        SyncOutcome::StillPending
                    } else {
                        match self.store.remove(&deal.id) {
                            Ok(removed) => {
                                info!(deal_id = %removed.id, symbol = %removed.symbol, "position closed on exchange, deal removed");
                                SyncOutcome::Closed
                            }
                            Err(e) => SyncOutcome::Failed(e.to_string()),
                        }
                    }
                }
            };
            deals.push(DealSync {
                deal_id: deal.id.clone(),
                symbol: deal.symbol.clone(),
                outcome,
            });
        }

        // Whatever remote state nothing local accounts for becomes pending
        // recovery work.
        let backed: HashSet<String> = self
            .store
            .all()
            .iter()
            .flat_map(|d| d.order_bindings.iter().map(|b| b.order_id.clone()))
            .collect();
        let mut pending: Vec<PendingItem> = positions
            .iter()
            .enumerate()
            .filter(|(index, _)| !matched.contains(index))
            .map(|(_, p)| PendingItem::Position(p.clone()))
            .collect();
        pending.extend(
            orders
                .iter()
                .filter(|o| !o.reduce_only && !backed.contains(&o.order_id))
                .map(|o| PendingItem::LimitOrder(o.clone())),
        );

        let report = SyncReport {
            timestamp: Utc::now(),
            deals,
            pending,
        };
        info!("{}", report);
        Ok(report)
    }

    /// Refresh one deal from its remote snapshot and bind stray reduce-only
    /// orders. Returns the list of orders that could not be bound.
    fn refresh_deal(
        &self,
        deal: &Deal,
        snapshot: &PositionSnapshot,
        orders: &[OrderInfo],
    ) -> Result<Vec<String>, EngineError> {
        self.store.update(&deal.id, |d| d.apply_snapshot(snapshot))?;
        let entry = snapshot.avg_price;
        let mut issues = Vec::new();

        for order in orders
            .iter()
            .filter(|o| o.symbol == deal.symbol && o.reduce_only && !deal.has_binding(&o.order_id))
        {
            match infer_role(order, deal.direction, entry) {
                Some((role, price)) => {
                    self.store.update(&deal.id, |d| {
                        d.bind_order(OrderBinding::new(order.order_id.clone(), role, price))
                    })?;
                }
                None => {
                    issues.push(format!(
                        "order {} on {} could not be bound to a role",
                        order.order_id, order.symbol
                    ));
                }
            }
        }
        Ok(issues)
    }

    /// Open a recovery session over the pending items of a sweep. Returns
    /// None when there is nothing to recover.
    pub fn begin_recovery(
        &self,
        pending: Vec<PendingItem>,
    ) -> Result<Option<RecoverySession>, EngineError> {
        if pending.is_empty() {
            return Ok(None);
        }
        if self.recovering.swap(true, Ordering::SeqCst) {
            return Err(EngineError::RecoveryInProgress);
        }
        info!(
            items = pending.len(),
            first = %pending[0].describe(),
            "recovery session opened"
        );
        Ok(Some(RecoverySession { pending, cursor: 0 }))
    }

    /// Drop a recovery session without draining it.
    pub fn abort_recovery(&self, session: RecoverySession) {
        info!(remaining = session.remaining(), "recovery session aborted");
        self.recovering.store(false, Ordering::SeqCst);
    }

    /// Feed the wizard a strategy name for the current pending item.
    ///
    /// An unknown strategy name is returned as an error and the cursor does
    /// not advance, so the caller can retry the same item. Every other
    /// failure is reported inline in the item report and the wizard moves
    /// on.
    pub async fn supply_strategy(
        &self,
        session: &mut RecoverySession,
        owner: i64,
        strategy_name: &str,
    ) -> Result<RecoveryStep, EngineError> {
        let item = match session.current() {
            Some(item) => item.clone(),
            None => {
                self.recovering.store(false, Ordering::SeqCst);
                return Err(EngineError::Validation(
                    "recovery session is already exhausted".to_string(),
                ));
            }
        };
        let strategy = self.strategies.resolve(strategy_name)?;

        let mut messages = Vec::new();
        let mut success = true;
        let symbol = item.symbol().to_string();

        let deal_id = match self.restore_deal(&item, owner, strategy.name()).await {
            Ok((deal, mut restore_messages)) => {
                messages.append(&mut restore_messages);
                let id = deal.id.clone();
                match self.store.add(deal) {
                    Ok(()) => {
                        info!(deal_id = %id, symbol = %symbol, strategy = strategy_name, "deal restored from remote state");
                        Some(id)
                    }
                    Err(e) => {
                        success = false;
                        messages.push(e.to_string());
                        None
                    }
                }
            }
            Err(e) => {
                success = false;
                messages.push(e.to_string());
                None
            }
        };

        let report = RecoveryItemReport {
            deal_id,
            symbol,
            success,
            messages,
        };

        session.cursor += 1;
        if session.current().is_none() {
            self.recovering.store(false, Ordering::SeqCst);
            info!("recovery session finished");
            Ok(RecoveryStep::Finished { report })
        } else {
            Ok(RecoveryStep::Advanced { report })
        }
    }

    /// Build a deal from a pending item, restore its order bindings and fill
    /// a missing TP list and stop-loss. Partial failures land in the
    /// returned messages, not in the error channel.
    async fn restore_deal(
        &self,
        item: &PendingItem,
        owner: i64,
        strategy_name: &str,
    ) -> Result<(Deal, Vec<String>), EngineError> {
        let strategy = self.strategies.resolve(strategy_name)?;
        let mut messages = Vec::new();
        let mut deal = match item {
            PendingItem::Position(snapshot) => Deal::from_position(snapshot, owner, strategy_name)?,
            PendingItem::LimitOrder(order) => Deal::from_limit_order(order, owner, strategy_name)?,
        };

        // Rebind whatever reduce-only orders already exist for the symbol.
        if let Some(entry) = deal.entry_price {
            self.limiter.acquire().await;
            match self
                .transport
                .get_open_orders(&OpenOrderFilter::Symbol(deal.symbol.clone()))
                .await
            {
                Ok(orders) => {
                    let bindable: Vec<_> = orders
                        .iter()
                        .filter(|o| o.reduce_only && !deal.has_binding(&o.order_id))
                        .collect();
                    for order in bindable {
                        match infer_role(order, deal.direction, entry) {
                            Some((role, price)) => {
                                deal.bind_order(OrderBinding::new(
                                    order.order_id.clone(),
                                    role,
                                    price,
                                ));
                            }
                            None => messages.push(format!(
                                "order {} could not be bound to a role",
                                order.order_id
                            )),
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol = %deal.symbol, "open orders not fetched during recovery: {}", e);
                    messages.push(format!("order bindings not restored: {}", e));
                }
            }
        }

        // A take-profit bound from a live order is authoritative; otherwise
        // fall back to the strategy's plan.
        if deal.take_profits().is_empty() {
            let bound_tps: Vec<f64> = deal
                .order_bindings
                .iter()
                .filter(|b| b.role == OrderRole::TakeProfit)
                .map(|b| b.price)
                .collect();
            if !bound_tps.is_empty() {
                deal.set_take_profits(bound_tps);
            } else if let Some(plan) = strategy.plan_exits(&deal) {
                deal.set_take_profits(plan.prices());
            } else {
                messages.push("no take-profit plan could be derived".to_string());
            }
        }

        if deal.stop_loss.is_none() {
            match deal.entry_price {
                Some(entry) => {
                    let derived = derive_stop_loss(
                        entry,
                        deal.direction,
                        strategy.config().stop_loss_percent,
                    );
                    if derived > 0.0 {
                        deal.stop_loss = Some(derived);
                    } else {
                        messages.push(format!(
                            "derived stop-loss {} is not positive, left unset",
                            derived
                        ));
                    }
                }
                None => messages.push("no entry price, stop-loss left unset".to_string()),
            }
        }

        Ok((deal, messages))
    }
}

/// Infer the local role of an unbound reduce-only order.
///
/// A conditional order triggering below entry protects a long (and above
/// entry a short), so it binds as stop-loss; anything else on the closing
/// side binds as take-profit.
fn infer_role(order: &OrderInfo, direction: Direction, entry: f64) -> Option<(OrderRole, f64)> {
    if !order.reduce_only || order.side != OrderSide::closes(direction) {
        return None;
    }
    if let Some(trigger) = order.trigger_price {
        let role = match direction {
            Direction::Long if trigger < entry => OrderRole::StopLoss,
            Direction::Short if trigger > entry => OrderRole::StopLoss,
            _ => OrderRole::TakeProfit,
        };
        return Some((role, trigger));
    }
    order.price.map(|price| (OrderRole::TakeProfit, price))
}

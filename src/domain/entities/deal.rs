use crate::domain::entities::snapshot::{OrderInfo, OrderSide, PositionSnapshot};
use crate::domain::errors::EngineError;
use crate::domain::value_objects::pnl::PnlPercent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Relative tolerance for matching quoted prices against list entries.
const PRICE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Market,
    Limit,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryType::Market => write!(f, "MARKET"),
            EntryType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Lifecycle state of a deal, driven by strategy reactions and
/// reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealState {
    PendingEntry,
    Active,
    PartiallyExited,
    Closed,
}

/// Local role assigned to a remote order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRole {
    Entry,
    TakeProfit,
    StopLoss,
    Limit,
    TrailingStop,
}

impl std::fmt::Display for OrderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderRole::Entry => write!(f, "ENTRY"),
            OrderRole::TakeProfit => write!(f, "TP"),
            OrderRole::StopLoss => write!(f, "SL"),
            OrderRole::Limit => write!(f, "LIMIT"),
            OrderRole::TrailingStop => write!(f, "TRAILING_STOP"),
        }
    }
}

/// Association between a remote order id and its local role.
///
/// Never mutated; only added or cleared together with the deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBinding {
    pub order_id: String,
    pub role: OrderRole,
    pub price: f64,
}

impl OrderBinding {
    pub fn new(order_id: impl Into<String>, role: OrderRole, price: f64) -> Self {
        Self {
            order_id: order_id.into(),
            role,
            price,
        }
    }
}

/// A partial exit that actually executed on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutedExit {
    pub price: f64,
    pub amount: f64,
}

/// A tracked position or intent against the exchange.
///
/// The store exclusively owns the canonical instance per id; strategies and
/// planners operate on borrowed references or cloned snapshots and must not
/// retain them past the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub owner: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    take_profits: Vec<f64>,
    pub size: f64,
    pub leverage: u32,
    pub required_capital: f64,
    pub strategy_name: String,
    pub active: bool,
    pub state: DealState,
    pub executed_exits: Vec<ExecutedExit>,
    pub order_bindings: Vec<OrderBinding>,
    pub last_snapshot: Option<PositionSnapshot>,
    triggered_levels: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

impl Deal {
    pub fn new(
        id: impl Into<String>,
        owner: i64,
        symbol: impl Into<String>,
        direction: Direction,
        entry_type: EntryType,
        strategy_name: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(EngineError::InvalidSymbol(symbol));
        }
        let state = match entry_type {
            EntryType::Market => DealState::Active,
            EntryType::Limit => DealState::PendingEntry,
        };
        Ok(Deal {
            id: id.into(),
            owner,
            symbol: symbol.to_uppercase(),
            direction,
            entry_type,
            entry_price: None,
            stop_loss: None,
            take_profits: Vec::new(),
            size: 0.0,
            leverage: 0,
            required_capital: 0.0,
            strategy_name: strategy_name.into(),
            active: true,
            state,
            executed_exits: Vec::new(),
            order_bindings: Vec::new(),
            last_snapshot: None,
            triggered_levels: Vec::new(),
            created_at: Utc::now(),
        })
    }

    /// Build a deal mirroring an already-open remote position.
    pub fn from_position(
        snapshot: &PositionSnapshot,
        owner: i64,
        strategy_name: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let mut deal = Deal::new(
            generate_deal_id(&snapshot.symbol),
            owner,
            snapshot.symbol.clone(),
            snapshot.side,
            EntryType::Market,
            strategy_name,
        )?;
        deal.entry_price = Some(snapshot.avg_price);
        deal.stop_loss = snapshot.stop_loss.filter(|sl| *sl > 0.0);
        deal.size = snapshot.size;
        deal.leverage = snapshot.leverage;
        deal.last_snapshot = Some(snapshot.clone());
        Ok(deal)
    }

    /// Build a deal mirroring a remote limit order that has not filled yet.
    pub fn from_limit_order(
        order: &OrderInfo,
        owner: i64,
        strategy_name: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let direction = match order.side {
            OrderSide::Buy => Direction::Long,
            OrderSide::Sell => Direction::Short,
        };
        let mut deal = Deal::new(
            generate_deal_id(&order.symbol),
            owner,
            order.symbol.clone(),
            direction,
            EntryType::Limit,
            strategy_name,
        )?;
        deal.entry_price = order.price.filter(|p| *p > 0.0);
        deal.size = order.qty;
        if let Some(price) = order.price {
            deal.order_bindings
                .push(OrderBinding::new(order.order_id.clone(), OrderRole::Limit, price));
        }
        Ok(deal)
    }

    /// Take-profit prices, copy-on-read.
    pub fn take_profits(&self) -> Vec<f64> {
        self.take_profits.clone()
    }

    pub fn set_take_profits(&mut self, take_profits: Vec<f64>) {
        self.take_profits = take_profits;
    }

    /// Record an executed partial exit.
    ///
    /// The price must reference one of the published take-profit levels.
    /// When the executed-exit count reaches the take-profit count the deal
    /// flips inactive; this is the only path that deactivates a deal from
    /// inside the entity.
    pub fn record_exit(&mut self, price: f64, amount: f64) -> Result<(), EngineError> {
        if !self
            .take_profits
            .iter()
            .any(|tp| approx_eq(*tp, price))
        {
            return Err(EngineError::Validation(format!(
                "exit price {} is not one of the take-profits of deal {}",
                price, self.id
            )));
        }
        self.executed_exits.push(ExecutedExit { price, amount });
        if !self.take_profits.is_empty() && self.executed_exits.len() >= self.take_profits.len() {
            self.active = false;
            self.state = DealState::Closed;
        } else {
            self.state = DealState::PartiallyExited;
        }
        Ok(())
    }

    /// PendingEntry -> Active, once the entry price is crossed in the deal's
    /// favor.
    pub fn activate(&mut self) {
        if self.state == DealState::PendingEntry {
            self.state = DealState::Active;
        }
    }

    pub fn bind_order(&mut self, binding: OrderBinding) {
        self.order_bindings.push(binding);
    }

    pub fn clear_bindings(&mut self) {
        self.order_bindings.clear();
    }

    pub fn has_binding(&self, order_id: &str) -> bool {
        self.order_bindings.iter().any(|b| b.order_id == order_id)
    }

    pub fn binding_for_role(&self, role: OrderRole) -> Option<&OrderBinding> {
        self.order_bindings.iter().find(|b| b.role == role)
    }

    /// Refresh local fields from a remote position snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &PositionSnapshot) {
        if snapshot.avg_price > 0.0 {
            self.entry_price = Some(snapshot.avg_price);
        }
        self.size = snapshot.size;
        if snapshot.leverage > 0 {
            self.leverage = snapshot.leverage;
        }
        if let Some(sl) = snapshot.stop_loss.filter(|sl| *sl > 0.0) {
            self.stop_loss = Some(sl);
        }
        self.last_snapshot = Some(snapshot.clone());
    }

    /// Leverage-adjusted PnL percentage at `price`, or None before the entry
    /// price is known.
    pub fn pnl_percent(&self, price: f64) -> Option<PnlPercent> {
        let entry = self.entry_price.filter(|e| *e > 0.0)?;
        let raw = match self.direction {
            Direction::Long => (price - entry) / entry,
            Direction::Short => (entry - price) / entry,
        };
        let leverage = if self.leverage > 0 { self.leverage } else { 1 };
        PnlPercent::new(raw * 100.0 * leverage as f64).ok()
    }

    /// Whether `price` has crossed the limit entry in the deal's favor.
    pub fn entry_crossed(&self, price: f64) -> bool {
        match self.entry_price {
            Some(entry) => match self.direction {
                Direction::Long => price <= entry,
                Direction::Short => price >= entry,
            },
            None => false,
        }
    }

    /// Whether `price` has reached the first take-profit level.
    pub fn first_take_profit_crossed(&self, price: f64) -> bool {
        match self.take_profits.first() {
            Some(tp) => match self.direction {
                Direction::Long => price >= *tp,
                Direction::Short => price <= *tp,
            },
            None => false,
        }
    }

    /// Whether `price` has reached the stop-loss.
    pub fn stop_loss_crossed(&self, price: f64) -> bool {
        match self.stop_loss {
            Some(sl) => match self.direction {
                Direction::Long => price <= sl,
                Direction::Short => price >= sl,
            },
            None => false,
        }
    }

    /// Whether the current stop-loss still sits on the losing side of entry.
    pub fn stop_loss_below_breakeven(&self) -> bool {
        match (self.entry_price, self.stop_loss) {
            (Some(entry), Some(sl)) => match self.direction {
                Direction::Long => sl < entry,
                Direction::Short => sl > entry,
            },
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Mark a PnL threshold as fired. Returns false when the threshold was
    /// already recorded, so each level triggers at most once.
    pub fn mark_threshold(&mut self, level: f64) -> bool {
        if self.triggered_levels.iter().any(|l| approx_eq(*l, level)) {
            return false;
        }
        self.triggered_levels.push(level);
        true
    }

    pub fn threshold_triggered(&self, level: f64) -> bool {
        self.triggered_levels.iter().any(|l| approx_eq(*l, level))
    }

    /// Reset fired thresholds, called when the deal's SL or a TP fires.
    pub fn clear_triggered_levels(&mut self) {
        self.triggered_levels.clear();
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= PRICE_EPSILON * a.abs().max(b.abs()).max(1.0)
}

fn generate_deal_id(symbol: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("deal_{}_{}", symbol.to_uppercase(), timestamp)
}

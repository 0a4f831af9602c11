use crate::domain::entities::deal::Direction;
use serde::{Deserialize, Serialize};

/// Read-only mirror of a remote open position.
///
/// Never owned locally beyond the deal it updates; exchange truth wins over
/// anything stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: Direction,
    pub size: f64,
    pub avg_price: f64,
    pub leverage: u32,
    pub stop_loss: Option<f64>,
    pub unrealized_pnl: f64,
    pub status: String,
}

/// Read-only mirror of a remote open order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: f64,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub reduce_only: bool,
    pub order_type: String,
}

impl OrderInfo {
    /// A conditional order carries a trigger price instead of (or besides) a
    /// limit price.
    pub fn is_conditional(&self) -> bool {
        self.trigger_price.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The side that reduces a position opened in `direction`.
    pub fn closes(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

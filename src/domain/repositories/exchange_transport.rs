//! Exchange Transport Trait
//!
//! This module defines the `ExchangeTransport` trait, the single seam
//! between the deal engine and the signed HTTP/WebSocket layer that talks to
//! the exchange. Keeping it a trait decouples the engine from any concrete
//! exchange and makes every service mockable in tests.

use crate::domain::entities::deal::Deal;
use crate::domain::entities::instrument::InstrumentRules;
use crate::domain::entities::snapshot::{OrderInfo, OrderSide, PositionSnapshot};
use crate::domain::errors::{TransportError, ValidationError};
use crate::domain::value_objects::{price::Price, quantity::Quantity};
use async_trait::async_trait;

/// Common result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Outbound order request.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Quantity,
    pub price: Option<Price>,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Market order; `price` is left unset.
    pub fn market(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: f64,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            symbol: symbol.into(),
            side,
            qty: Quantity::new(qty)?,
            price: None,
            reduce_only: false,
        })
    }

    /// Limit order at `price`.
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: f64,
        price: f64,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            symbol: symbol.into(),
            side,
            qty: Quantity::new(qty)?,
            price: Some(Price::new(price)?),
            reduce_only: false,
        })
    }

    /// Market order that can only reduce an open position.
    pub fn market_close(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: f64,
    ) -> Result<Self, ValidationError> {
        let mut req = Self::market(symbol, side, qty)?;
        req.reduce_only = true;
        Ok(req)
    }
}

/// Exchange response to an order placement.
#[derive(Debug, Clone)]
pub struct PlaceOrderResult {
    pub order_id: String,
    pub success: bool,
    pub message: String,
}

/// Filter for the open-orders query: one symbol, or everything settled in a
/// given coin.
#[derive(Debug, Clone)]
pub enum OpenOrderFilter {
    Symbol(String),
    SettleCoin(String),
}

/// Transport seam to the exchange. All calls are expected to pass through
/// the outbound rate limiter before reaching the wire.
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    /// Last traded price for a symbol.
    async fn get_last_price(&self, symbol: &str) -> TransportResult<f64>;

    /// Lot step and minimum quantity for a symbol.
    async fn get_instrument_rules(&self, symbol: &str) -> TransportResult<InstrumentRules>;

    /// Available balance in the quote currency.
    async fn get_balance(&self) -> TransportResult<f64>;

    /// Place an order.
    async fn place_order(&self, request: &OrderRequest) -> TransportResult<PlaceOrderResult>;

    /// Set leverage for a symbol. Returns false when the exchange refused.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> TransportResult<bool>;

    /// Push the deal's current stop-loss to the exchange.
    async fn set_stop_loss(&self, deal: &Deal) -> TransportResult<PlaceOrderResult>;

    /// Cancel an order.
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> TransportResult<()>;

    /// All open positions.
    async fn get_position_list(&self) -> TransportResult<Vec<PositionSnapshot>>;

    /// Open orders matching the filter.
    async fn get_open_orders(&self, filter: &OpenOrderFilter) -> TransportResult<Vec<OrderInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_order_has_no_price() {
        let req = OrderRequest::market("BTCUSDT", OrderSide::Buy, 0.5).unwrap();
        assert!(req.price.is_none());
        assert!(!req.reduce_only);
    }

    #[test]
    fn test_limit_order_carries_price() {
        let req = OrderRequest::limit("BTCUSDT", OrderSide::Sell, 0.5, 65000.0).unwrap();
        assert_eq!(req.price.unwrap().value(), 65000.0);
    }

    #[test]
    fn test_market_close_is_reduce_only() {
        let req = OrderRequest::market_close("BTCUSDT", OrderSide::Sell, 0.5).unwrap();
        assert!(req.reduce_only);
    }

    #[test]
    fn test_order_request_rejects_negative_qty() {
        assert!(OrderRequest::market("BTCUSDT", OrderSide::Buy, -1.0).is_err());
    }

    #[test]
    fn test_order_request_rejects_negative_price() {
        assert!(OrderRequest::limit("BTCUSDT", OrderSide::Buy, 1.0, -5.0).is_err());
    }
}

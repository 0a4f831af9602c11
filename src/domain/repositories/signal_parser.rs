//! Signal Parser Trait
//!
//! The natural-language parsing layer is an opaque, possibly-failing black
//! box as far as the engine is concerned: free text goes in, a structured
//! `DealRequest` comes out (or an error does).

use crate::domain::entities::deal::{Deal, Direction, EntryType};
use crate::domain::errors::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Structured trading signal extracted from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealRequest {
    pub symbol: String,
    pub direction: Direction,
    pub entry_type: EntryType,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profits: Vec<f64>,
}

impl DealRequest {
    /// Build a tracked deal from this request.
    pub fn into_deal(
        self,
        owner: i64,
        strategy_name: impl Into<String>,
    ) -> Result<Deal, EngineError> {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let mut deal = Deal::new(
            format!("deal_{}_{}", self.symbol.to_uppercase(), timestamp),
            owner,
            self.symbol,
            self.direction,
            self.entry_type,
            strategy_name,
        )?;
        deal.entry_price = self.entry_price.filter(|p| *p > 0.0);
        deal.stop_loss = self.stop_loss.filter(|p| *p > 0.0);
        deal.set_take_profits(self.take_profits);
        Ok(deal)
    }
}

#[async_trait]
pub trait SignalParser: Send + Sync {
    async fn parse_signal(&self, text: &str) -> Result<DealRequest, EngineError>;
}

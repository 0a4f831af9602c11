//! DEALTRACK Deal Tracking Library
//!
//! This library provides the core components for tracking margin-trading
//! deals: the concurrent deal registry, risk-bounded order sizing, partial
//! exit planning, and the reconciliation workflow that keeps local state
//! aligned with the exchange after restarts or missed events.

pub mod application;
pub mod config;
pub mod domain;
pub mod rate_limit;

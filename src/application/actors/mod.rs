pub mod deal_monitor;

pub use deal_monitor::*;

pub mod deal;
pub mod instrument;
pub mod snapshot;

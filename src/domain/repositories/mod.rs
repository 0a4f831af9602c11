pub mod exchange_transport;
pub mod notifier;
pub mod signal_parser;

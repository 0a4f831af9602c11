//! Notification Sink Trait
//!
//! Fire-and-forget messages back to the owning chat. Delivery failures are
//! logged by the implementation and never propagated as engine errors.

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, owner: i64, text: &str);
}

/// Notifier that only writes to the log. Useful as a default wiring and in
/// tests.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, owner: i64, text: &str) {
        tracing::info!(owner, "{}", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_does_not_panic() {
        LogNotifier.notify(7, "deal update").await;
    }
}

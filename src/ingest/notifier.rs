use async_trait::async_trait;

use crate::app::Result;
use crate::domain::Event;

/// Sink for events produced by ingestion.
#[async_trait]
pub trait Notifier {
    async fn notify(&self, event: Event) -> Result<()>;
}

/// Drops every event. Used by one-shot runs with no live connections.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, event: Event) -> Result<()> {
        tracing::debug!(kind = event.kind(), "No live subscribers; event dropped");
        Ok(())
    }
}

use std::time::Duration;

use async_trait::async_trait;

use crate::message::WireMessage;

/// An ephemeral, uniquely-addressable channel receiving the responses
/// correlated with one request.
///
/// A reply destination is exclusively owned by a single in-flight request.
/// Implementations must also release the underlying subscription on drop so
/// the destination cannot leak on abnormal exit paths.
#[async_trait]
pub trait ReplyDestination
where
    Self: Send + Sync + 'static,
{
    /// The unique address responders publish to.
    fn address(&self) -> &str;

    /// Waits up to `wait` for the next inbound message. Returns `None` when
    /// the wait elapses or the destination is closed.
    async fn next_message(&mut self, wait: Duration) -> Option<WireMessage>;

    /// Releases the underlying subscription. Idempotent; errors during
    /// release are suppressed so cleanup cannot mask an original failure.
    async fn release(&mut self);
}

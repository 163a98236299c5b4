use std::error::Error as StdError;

use async_trait::async_trait;

use crate::response::BatchEntry;

/// Marker trait for errors raised by batch handlers.
pub trait BatchHandlerError: StdError + Send + Sync + 'static {}

/// Consumer-supplied callback invoked once per classified batch entry.
///
/// Handlers are cloned into the delivery task, so implementations should be
/// cheap to clone (typically an `Arc` around shared state).
#[async_trait]
pub trait BatchHandler: Clone + Send + Sync + 'static {
    /// The error type returned by the handler.
    type Error: BatchHandlerError;

    /// Processes one batch entry.
    ///
    /// Returning an error from a record entry aborts the in-flight request;
    /// errors on terminal entries are logged and otherwise ignored.
    async fn handle(&self, entry: BatchEntry) -> Result<(), Self::Error>;
}

use skiff_transport::TransportError;
use thiserror::Error;

/// Errors that can occur in the NATS transport.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to publish a request.
    #[error("failed to publish request: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// Failed to look up the target stream's configuration.
    #[error("failed to look up stream configuration: {0}")]
    StreamInfo(String),

    /// Failed to subscribe to a reply inbox.
    #[error("failed to subscribe to reply inbox: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),
}

impl TransportError for Error {}

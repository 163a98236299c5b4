use std::error::Error as StdError;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::reply::ReplyDestination;

/// Marker trait for transport errors.
pub trait TransportError: Debug + StdError + Send + Sync + 'static {}

/// A point-to-point request transport.
#[async_trait]
pub trait Transport
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the transport.
    type Error: TransportError;

    /// The reply destination type allocated per request.
    type Reply: ReplyDestination;

    /// Allocates a unique reply destination and begins listening on it.
    async fn allocate_reply_destination(&self) -> Result<Self::Reply, Self::Error>;

    /// Publishes a request payload to `endpoint` with `reply_to` attached as
    /// the response address.
    async fn publish(
        &self,
        endpoint: String,
        reply_to: String,
        payload: Bytes,
    ) -> Result<(), Self::Error>;

    /// Reports whether the named store accepts direct read requests.
    async fn direct_reads_enabled(&self, store_name: &str) -> Result<bool, Self::Error>;

    /// The transport's connection-level request timeout, used when a caller
    /// does not override the per-request timeout.
    fn request_timeout(&self) -> Duration;
}

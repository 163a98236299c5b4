use std::error::Error as StdError;

use skiff_transport::TransportError;
use thiserror::Error;

use crate::response;

/// Errors raised by the direct batch client.
#[derive(Debug, Error)]
pub enum Error<T>
where
    T: TransportError,
{
    /// The target store does not accept direct read requests.
    #[error("direct reads are disabled for store: {0}")]
    DirectReadDisabled(String),

    /// A handler rejected a record entry.
    #[error("handler error: {0}")]
    Handler(Box<dyn StdError + Send + Sync>),

    /// An inbound response could not be classified.
    #[error("malformed response: {0}")]
    Malformed(#[from] response::Error),

    /// The store reported an error status.
    #[error("store error {code}: {description}")]
    Remote {
        /// The reported status code.
        code: u16,
        /// The reported status description.
        description: String,
    },

    /// No response arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(T),
}

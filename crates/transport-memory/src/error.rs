use skiff_transport::TransportError;
use thiserror::Error;

/// Errors that can occur in the in-memory transport.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The named store does not exist.
    #[error("unknown store: {0}")]
    UnknownStore(String),
}

impl TransportError for Error {}

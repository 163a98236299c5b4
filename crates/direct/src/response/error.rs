use thiserror::Error;

/// Errors raised while classifying an inbound response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A data message was missing a required header.
    #[error("data message missing required header: {0}")]
    MissingHeader(&'static str),

    /// A header value could not be parsed.
    #[error("invalid value for header {name}: {value}")]
    InvalidHeader {
        /// The header name.
        name: &'static str,
        /// The offending value.
        value: String,
    },
}

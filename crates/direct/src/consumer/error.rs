use thiserror::Error;

use crate::spec;

/// Errors raised by the continuous direct consumer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The consumer is already running.
    #[error("consumer already running")]
    AlreadyRunning,

    /// Both a start sequence and a start time were given.
    #[error("start sequence and start time are mutually exclusive")]
    ConflictingStartPoints,

    /// The backoff schedule was empty.
    #[error("backoff schedule must have at least one delay")]
    EmptyBackoff,

    /// The subject or batch limit cannot form a valid batch request.
    #[error(transparent)]
    Spec(#[from] spec::Error),
}

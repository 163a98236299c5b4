use thiserror::Error;

/// Errors raised while constructing or decoding a batch request spec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The batch limit was zero.
    #[error("batch limit must be greater than zero")]
    InvalidBatchLimit,

    /// The minimum sequence was zero; stored sequences start at 1.
    #[error("min sequence must be at least 1")]
    InvalidMinSequence,

    /// The subject was empty or contained a wildcard.
    #[error("subject must be non-empty and wildcard-free")]
    InvalidSubject,

    /// Both a minimum sequence and a start time were given.
    #[error("min sequence and start time are mutually exclusive")]
    ConflictingStartPoints,

    /// Both an up-to sequence and an up-to time were given.
    #[error("up-to sequence and up-to time are mutually exclusive")]
    ConflictingUpToBounds,

    /// The filter subject list was missing or empty.
    #[error("at least one filter subject is required")]
    NoFilterSubjects,

    /// Both a single subject and a filter subject list were given.
    #[error("subject and multi_last are mutually exclusive")]
    ConflictingModes,

    /// A start point was given for a multi-subject request.
    #[error("start points apply only to single-subject requests")]
    StartPointNotAllowed,

    /// An up-to bound was given for a single-subject request.
    #[error("up-to bounds apply only to multi-subject requests")]
    UpToBoundNotAllowed,

    /// The encoded request could not be parsed.
    #[error("failed to decode batch request: {0}")]
    Decode(String),
}

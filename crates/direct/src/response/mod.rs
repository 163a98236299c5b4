mod error;

pub use error::Error;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use skiff_transport::WireMessage;
use skiff_transport::wire::{
    HEADER_LAST_SEQUENCE, HEADER_NUM_PENDING, HEADER_SEQUENCE, HEADER_SUBJECT, HEADER_TIME_STAMP,
    STATUS_END_OF_BATCH, STATUS_NOT_FOUND,
};

/// One stored record returned by a batch request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRecord {
    /// The record's store-wide sequence number.
    pub sequence: u64,

    /// The subject the record was stored under.
    pub subject: String,

    /// When the record was stored.
    pub timestamp: DateTime<Utc>,

    /// The record payload.
    pub payload: Bytes,

    /// Last stored sequence for this batch, present only on the first
    /// record of a batch.
    pub last_sequence: Option<u64>,

    /// Matching records remaining after this batch, present only on the
    /// first record of a batch.
    pub num_pending: Option<u64>,
}

/// How a batch request ended. Exactly one termination is observed per
/// request, always as the final delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The store sent every record matching the request. The only
    /// successful terminal condition.
    EndOfBatch,

    /// No records matched the request. Informative, not a failure.
    NotFound,

    /// The store reported an error status. Fatal for this request.
    Error {
        /// The reported status code.
        code: u16,
        /// The reported status description.
        description: String,
    },

    /// No response arrived within the request timeout. Synthesized by the
    /// engine, never reported by the store.
    Timeout,
}

impl Termination {
    /// Whether the request completed cleanly via end-of-batch.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::EndOfBatch)
    }

    /// Whether the termination is fatal (remote error or timeout) rather
    /// than informative.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Timeout)
    }
}

/// One classified delivery from a batch request: a stored record, or the
/// request's terminal condition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchEntry {
    /// A stored record.
    Record(StoredRecord),

    /// The request's terminal condition.
    Terminal(Termination),
}

/// Classifies one inbound transport message as exactly one batch entry.
///
/// Payload-less status messages map to terminations; anything else is parsed
/// as a data record from its headers.
///
/// # Errors
///
/// Returns an error if a data message is missing a required header or a
/// header value cannot be parsed.
pub fn classify(message: &WireMessage) -> Result<BatchEntry, Error> {
    if let Some(code) = message.status {
        let termination = match code {
            STATUS_END_OF_BATCH => Termination::EndOfBatch,
            STATUS_NOT_FOUND => Termination::NotFound,
            _ => Termination::Error {
                code,
                description: message.description.clone().unwrap_or_default(),
            },
        };
        return Ok(BatchEntry::Terminal(termination));
    }

    let sequence = parse_header(message, HEADER_SEQUENCE)?;
    let subject = message
        .headers
        .get(HEADER_SUBJECT)
        .ok_or(Error::MissingHeader(HEADER_SUBJECT))?
        .to_string();
    let timestamp = parse_timestamp(message)?;
    let last_sequence = parse_optional_header(message, HEADER_LAST_SEQUENCE)?;
    let num_pending = parse_optional_header(message, HEADER_NUM_PENDING)?;

    Ok(BatchEntry::Record(StoredRecord {
        sequence,
        subject,
        timestamp,
        payload: message.payload.clone(),
        last_sequence,
        num_pending,
    }))
}

fn parse_header(message: &WireMessage, name: &'static str) -> Result<u64, Error> {
    let value = message
        .headers
        .get(name)
        .ok_or(Error::MissingHeader(name))?;
    value.parse().map_err(|_| Error::InvalidHeader {
        name,
        value: value.to_string(),
    })
}

fn parse_optional_header(message: &WireMessage, name: &'static str) -> Result<Option<u64>, Error> {
    message
        .headers
        .get(name)
        .map(|value| {
            value.parse().map_err(|_| Error::InvalidHeader {
                name,
                value: value.to_string(),
            })
        })
        .transpose()
}

fn parse_timestamp(message: &WireMessage) -> Result<DateTime<Utc>, Error> {
    let value = message
        .headers
        .get(HEADER_TIME_STAMP)
        .ok_or(Error::MissingHeader(HEADER_TIME_STAMP))?;
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| Error::InvalidHeader {
            name: HEADER_TIME_STAMP,
            value: value.to_string(),
        })
}

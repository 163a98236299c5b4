mod error;

pub use error::Error;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable, validated description of one batch-get request.
///
/// A spec is either single-subject (a bounded batch of consecutive records
/// for one subject) or multi-subject (the last record per subject for a list
/// of filter subjects). The mode is fixed at construction; specs are built
/// through [`SingleBatchBuilder`], [`MultiLastBuilder`], or the named
/// constructors, all of which validate before returning.
///
/// The serialized form is a compact map of optional fields matching the
/// store's documented request schema; absent fields are omitted entirely.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchRequestSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_bytes: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_seq: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    multi_last: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    up_to_seq: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    up_to_time: Option<DateTime<Utc>>,
}

impl BatchRequestSpec {
    /// Starts a single-subject spec builder.
    pub fn builder<S: Into<String>>(subject: S) -> SingleBatchBuilder {
        SingleBatchBuilder {
            subject: subject.into(),
            batch: None,
            max_bytes: None,
            min_seq: None,
            start_time: None,
        }
    }

    /// Starts a multi-subject last-per-subject spec builder.
    pub fn multi_builder<I, S>(subjects: I) -> MultiLastBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MultiLastBuilder {
            subjects: subjects.into_iter().map(Into::into).collect(),
            batch: None,
            up_to_seq: None,
            up_to_time: None,
        }
    }

    /// A batch of up to `limit` records for `subject`, from the start of the
    /// store.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject or limit is invalid.
    pub fn batch<S: Into<String>>(subject: S, limit: u64) -> Result<Self, Error> {
        Self::builder(subject).batch_limit(limit).build()
    }

    /// A batch of up to `limit` records for `subject`, starting at
    /// `min_sequence`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject, limit, or sequence is invalid.
    pub fn batch_from_sequence<S: Into<String>>(
        subject: S,
        limit: u64,
        min_sequence: u64,
    ) -> Result<Self, Error> {
        Self::builder(subject)
            .batch_limit(limit)
            .min_sequence(min_sequence)
            .build()
    }

    /// A batch of up to `limit` records for `subject`, starting at the first
    /// record stored at or after `start_time`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject or limit is invalid.
    pub fn batch_from_time<S: Into<String>>(
        subject: S,
        limit: u64,
        start_time: DateTime<Utc>,
    ) -> Result<Self, Error> {
        Self::builder(subject)
            .batch_limit(limit)
            .start_time(start_time)
            .build()
    }

    /// A batch of up to `limit` records for `subject`, additionally capped at
    /// `max_bytes` of payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject or limit is invalid.
    pub fn batch_bytes<S: Into<String>>(
        subject: S,
        limit: u64,
        max_bytes: u64,
    ) -> Result<Self, Error> {
        Self::builder(subject)
            .batch_limit(limit)
            .max_bytes(max_bytes)
            .build()
    }

    /// Byte-capped batch starting at `min_sequence`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject, limit, or sequence is invalid.
    pub fn batch_bytes_from_sequence<S: Into<String>>(
        subject: S,
        limit: u64,
        max_bytes: u64,
        min_sequence: u64,
    ) -> Result<Self, Error> {
        Self::builder(subject)
            .batch_limit(limit)
            .max_bytes(max_bytes)
            .min_sequence(min_sequence)
            .build()
    }

    /// Byte-capped batch starting at `start_time`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject or limit is invalid.
    pub fn batch_bytes_from_time<S: Into<String>>(
        subject: S,
        limit: u64,
        max_bytes: u64,
        start_time: DateTime<Utc>,
    ) -> Result<Self, Error> {
        Self::builder(subject)
            .batch_limit(limit)
            .max_bytes(max_bytes)
            .start_time(start_time)
            .build()
    }

    /// The last record per subject for the given filter subjects, which may
    /// include wildcards.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter subject list is empty.
    pub fn last_for_subjects<I, S>(subjects: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::multi_builder(subjects).build()
    }

    /// Last record per subject, considering only records at or below
    /// `up_to_sequence`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter subject list is empty.
    pub fn last_for_subjects_up_to_sequence<I, S>(
        subjects: I,
        up_to_sequence: u64,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::multi_builder(subjects)
            .up_to_sequence(up_to_sequence)
            .build()
    }

    /// Last record per subject, considering only records stored at or before
    /// `up_to_time`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter subject list is empty.
    pub fn last_for_subjects_up_to_time<I, S>(
        subjects: I,
        up_to_time: DateTime<Utc>,
    ) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::multi_builder(subjects).up_to_time(up_to_time).build()
    }

    /// The batch limit, if set.
    #[must_use]
    pub const fn batch_limit(&self) -> Option<u64> {
        self.batch
    }

    /// The payload byte cap, if set.
    #[must_use]
    pub const fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }

    /// The minimum sequence, if set.
    #[must_use]
    pub const fn min_sequence(&self) -> Option<u64> {
        self.min_seq
    }

    /// The start time, if set.
    #[must_use]
    pub const fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// The single subject, for single-subject specs.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// The filter subjects, for multi-subject specs.
    #[must_use]
    pub fn filter_subjects(&self) -> Option<&[String]> {
        self.multi_last.as_deref()
    }

    /// The up-to sequence bound, if set.
    #[must_use]
    pub const fn up_to_sequence(&self) -> Option<u64> {
        self.up_to_seq
    }

    /// The up-to time bound, if set.
    #[must_use]
    pub const fn up_to_time(&self) -> Option<DateTime<Utc>> {
        self.up_to_time
    }

    /// Whether this is a multi-subject last-per-subject spec.
    #[must_use]
    pub const fn is_multi_last(&self) -> bool {
        self.multi_last.is_some()
    }

    /// Serializes the spec to its wire form. Pure and deterministic: the same
    /// spec always encodes to the same bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).expect("spec serialization is infallible"))
    }

    /// Parses and revalidates a wire-form spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding or the decoded
    /// spec violates a construction invariant.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let spec: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.subject.is_some() && self.multi_last.is_some() {
            return Err(Error::ConflictingModes);
        }

        if let Some(filters) = &self.multi_last {
            if filters.is_empty() || filters.iter().any(String::is_empty) {
                return Err(Error::NoFilterSubjects);
            }
            if self.min_seq.is_some() || self.start_time.is_some() || self.max_bytes.is_some() {
                return Err(Error::StartPointNotAllowed);
            }
            if matches!(self.batch, Some(0)) {
                return Err(Error::InvalidBatchLimit);
            }
            if self.up_to_seq.is_some() && self.up_to_time.is_some() {
                return Err(Error::ConflictingUpToBounds);
            }
            return Ok(());
        }

        let Some(subject) = &self.subject else {
            return Err(Error::InvalidSubject);
        };
        if subject.is_empty() || subject.contains('*') || subject.contains('>') {
            return Err(Error::InvalidSubject);
        }
        match self.batch {
            None | Some(0) => return Err(Error::InvalidBatchLimit),
            Some(_) => {}
        }
        if self.min_seq.is_some() && self.start_time.is_some() {
            return Err(Error::ConflictingStartPoints);
        }
        if matches!(self.min_seq, Some(0)) {
            return Err(Error::InvalidMinSequence);
        }
        if self.up_to_seq.is_some() || self.up_to_time.is_some() {
            return Err(Error::UpToBoundNotAllowed);
        }
        Ok(())
    }
}

/// Builder for single-subject batch specs.
#[derive(Clone, Debug)]
pub struct SingleBatchBuilder {
    subject: String,
    batch: Option<u64>,
    max_bytes: Option<u64>,
    min_seq: Option<u64>,
    start_time: Option<DateTime<Utc>>,
}

impl SingleBatchBuilder {
    /// Sets the maximum number of records to return. Required.
    #[must_use]
    pub fn batch_limit(mut self, limit: u64) -> Self {
        self.batch = Some(limit);
        self
    }

    /// Caps the total payload bytes returned.
    #[must_use]
    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Starts the batch at the given sequence. Mutually exclusive with
    /// [`Self::start_time`].
    #[must_use]
    pub fn min_sequence(mut self, min_sequence: u64) -> Self {
        self.min_seq = Some(min_sequence);
        self
    }

    /// Starts the batch at the first record stored at or after the given
    /// time. Mutually exclusive with [`Self::min_sequence`].
    #[must_use]
    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Validates and builds the spec.
    ///
    /// # Errors
    ///
    /// Returns an error if any construction invariant is violated.
    pub fn build(self) -> Result<BatchRequestSpec, Error> {
        let spec = BatchRequestSpec {
            batch: self.batch,
            max_bytes: self.max_bytes,
            min_seq: self.min_seq,
            start_time: self.start_time,
            subject: Some(self.subject),
            multi_last: None,
            up_to_seq: None,
            up_to_time: None,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Builder for multi-subject last-per-subject specs.
#[derive(Clone, Debug)]
pub struct MultiLastBuilder {
    subjects: Vec<String>,
    batch: Option<u64>,
    up_to_seq: Option<u64>,
    up_to_time: Option<DateTime<Utc>>,
}

impl MultiLastBuilder {
    /// Caps the number of subjects returned.
    #[must_use]
    pub fn batch_limit(mut self, limit: u64) -> Self {
        self.batch = Some(limit);
        self
    }

    /// Considers only records at or below the given sequence. Mutually
    /// exclusive with [`Self::up_to_time`].
    #[must_use]
    pub fn up_to_sequence(mut self, up_to_sequence: u64) -> Self {
        self.up_to_seq = Some(up_to_sequence);
        self
    }

    /// Considers only records stored at or before the given time. Mutually
    /// exclusive with [`Self::up_to_sequence`].
    #[must_use]
    pub fn up_to_time(mut self, up_to_time: DateTime<Utc>) -> Self {
        self.up_to_time = Some(up_to_time);
        self
    }

    /// Validates and builds the spec.
    ///
    /// # Errors
    ///
    /// Returns an error if any construction invariant is violated.
    pub fn build(self) -> Result<BatchRequestSpec, Error> {
        let spec = BatchRequestSpec {
            batch: self.batch,
            max_bytes: None,
            min_seq: None,
            start_time: None,
            subject: None,
            multi_last: Some(self.subjects),
            up_to_seq: self.up_to_seq,
            up_to_time: self.up_to_time,
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn some_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_batch_requires_positive_limit() {
        assert_eq!(
            BatchRequestSpec::batch("orders.eu", 0),
            Err(Error::InvalidBatchLimit)
        );
        assert!(BatchRequestSpec::batch("orders.eu", 1).is_ok());
    }

    #[test]
    fn test_batch_rejects_wildcard_subject() {
        assert_eq!(
            BatchRequestSpec::batch("orders.*", 10),
            Err(Error::InvalidSubject)
        );
        assert_eq!(BatchRequestSpec::batch("", 10), Err(Error::InvalidSubject));
    }

    #[test]
    fn test_conflicting_start_points_rejected_before_any_network_call() {
        let result = BatchRequestSpec::builder("orders.eu")
            .batch_limit(10)
            .min_sequence(5)
            .start_time(some_time())
            .build();
        assert_eq!(result, Err(Error::ConflictingStartPoints));
    }

    #[test]
    fn test_zero_min_sequence_rejected() {
        let result = BatchRequestSpec::builder("orders.eu")
            .batch_limit(10)
            .min_sequence(0)
            .build();
        assert_eq!(result, Err(Error::InvalidMinSequence));
    }

    #[test]
    fn test_multi_requires_subjects() {
        assert_eq!(
            BatchRequestSpec::last_for_subjects(Vec::<String>::new()),
            Err(Error::NoFilterSubjects)
        );
        assert!(BatchRequestSpec::last_for_subjects(["orders.*"]).is_ok());
    }

    #[test]
    fn test_conflicting_up_to_bounds_rejected() {
        let result = BatchRequestSpec::multi_builder(["orders.*"])
            .up_to_sequence(100)
            .up_to_time(some_time())
            .build();
        assert_eq!(result, Err(Error::ConflictingUpToBounds));
    }

    #[test]
    fn test_encode_omits_absent_fields() {
        let spec = BatchRequestSpec::batch_from_sequence("orders.eu", 10, 5).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&spec.encode()).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object["batch"], 10);
        assert_eq!(object["min_seq"], 5);
        assert_eq!(object["subject"], "orders.eu");
        assert!(!object.contains_key("max_bytes"));
        assert!(!object.contains_key("start_time"));
        assert!(!object.contains_key("multi_last"));
        assert!(!object.contains_key("up_to_seq"));
        assert!(!object.contains_key("up_to_time"));
    }

    #[test]
    fn test_encode_is_deterministic() {
        let spec = BatchRequestSpec::batch_bytes_from_time("orders.eu", 3, 4096, some_time()).unwrap();
        assert_eq!(spec.encode(), spec.encode());
    }

    #[test]
    fn test_round_trip_all_single_variants() {
        let specs = [
            BatchRequestSpec::batch("orders.eu", 10).unwrap(),
            BatchRequestSpec::batch_from_sequence("orders.eu", 10, 7).unwrap(),
            BatchRequestSpec::batch_from_time("orders.eu", 10, some_time()).unwrap(),
            BatchRequestSpec::batch_bytes("orders.eu", 10, 1024).unwrap(),
            BatchRequestSpec::batch_bytes_from_sequence("orders.eu", 10, 1024, 7).unwrap(),
            BatchRequestSpec::batch_bytes_from_time("orders.eu", 10, 1024, some_time()).unwrap(),
        ];
        for spec in specs {
            assert_eq!(BatchRequestSpec::decode(&spec.encode()).unwrap(), spec);
        }
    }

    #[test]
    fn test_round_trip_all_multi_variants() {
        let specs = [
            BatchRequestSpec::last_for_subjects(["orders.*", "refunds.>"]).unwrap(),
            BatchRequestSpec::last_for_subjects_up_to_sequence(["orders.*"], 99).unwrap(),
            BatchRequestSpec::last_for_subjects_up_to_time(["orders.*"], some_time()).unwrap(),
            BatchRequestSpec::multi_builder(["orders.*"])
                .batch_limit(5)
                .up_to_sequence(99)
                .build()
                .unwrap(),
        ];
        for spec in specs {
            assert_eq!(BatchRequestSpec::decode(&spec.encode()).unwrap(), spec);
        }
    }

    #[test]
    fn test_decode_revalidates() {
        // Well-formed JSON, but violates the start-point exclusivity invariant.
        let raw = br#"{"subject":"orders.eu","batch":1,"min_seq":2,"start_time":"2024-05-01T12:00:00Z"}"#;
        assert_eq!(
            BatchRequestSpec::decode(raw),
            Err(Error::ConflictingStartPoints)
        );

        assert!(matches!(
            BatchRequestSpec::decode(b"not json"),
            Err(Error::Decode(_))
        ));
    }
}

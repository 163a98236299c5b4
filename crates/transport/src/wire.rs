//! Header names, status codes, and endpoint layout of the skiff store's
//! direct-get schema. Field presence, not naming, is the contract clients
//! must preserve; the names here match the store's documented schema.

/// Header carrying the record's stream sequence number.
pub const HEADER_SEQUENCE: &str = "Skiff-Sequence";

/// Header carrying the record's original subject.
pub const HEADER_SUBJECT: &str = "Skiff-Subject";

/// Header carrying the record's RFC 3339 timestamp.
pub const HEADER_TIME_STAMP: &str = "Skiff-Time-Stamp";

/// Header carrying the last stored sequence for the record's subject.
/// Present only on the first record of a batch.
pub const HEADER_LAST_SEQUENCE: &str = "Skiff-Last-Sequence";

/// Header carrying the count of matching records remaining after this batch.
/// Present only on the first record of a batch.
pub const HEADER_NUM_PENDING: &str = "Skiff-Num-Pending";

/// Status code signalling that every record matching the request has been
/// sent. The only successful terminal condition of a batch.
pub const STATUS_END_OF_BATCH: u16 = 204;

/// Status code signalling that no records matched the request.
pub const STATUS_NOT_FOUND: u16 = 404;

/// Status code the store reports for malformed requests.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Subject prefix of the store's direct-get endpoints.
pub const DIRECT_GET_PREFIX: &str = "$SKIFF.API.DIRECT.GET";

/// Returns the direct-get endpoint for the given store.
#[must_use]
pub fn direct_get_endpoint(store_name: &str) -> String {
    format!("{DIRECT_GET_PREFIX}.{store_name}")
}

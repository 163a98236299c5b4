//! Direct batch-retrieval client for the skiff log store.
//!
//! One outbound request fans into a self-terminating stream of correlated
//! responses. [`client::DirectBatchClient`] drives that protocol over an
//! abstract transport and exposes three consumption styles built on a single
//! internal loop; [`consumer::ContinuousDirectConsumer`] repeatedly issues
//! such requests to emulate ordered, backoff-aware tailing of a subject.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The protocol engine and its presentation adapters.
pub mod client;

/// Ordered, backoff-aware tailing of a single subject.
pub mod consumer;

/// Handlers receive classified batch entries.
pub mod handler;

/// Classification of inbound responses.
pub mod response;

/// Validated, serializable batch request descriptions.
pub mod spec;

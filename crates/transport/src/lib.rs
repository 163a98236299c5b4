//! Abstract interface for the point-to-point transport used by skiff clients.
//!
//! A transport knows how to allocate an ephemeral, uniquely-addressable reply
//! destination, publish a request with that destination attached, and deliver
//! inbound messages to it within a caller-supplied timeout. Concrete
//! implementations (in-memory, NATS) live in separate crates.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Wire-level message envelope and headers.
pub mod message;

/// Reply destinations receive correlated responses for one request.
pub mod reply;

/// Transports publish requests and allocate reply destinations.
pub mod transport;

/// Wire vocabulary of the skiff store's direct-get schema.
pub mod wire;

pub use message::{Headers, WireMessage};
pub use reply::ReplyDestination;
pub use transport::{Transport, TransportError};

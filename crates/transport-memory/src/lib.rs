//! In-memory implementation of the skiff transport, with an embedded log
//! store that answers direct-get requests. Intended for tests and local
//! development; the store is a double, not a storage engine.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod store;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use skiff_transport::wire::{DIRECT_GET_PREFIX, STATUS_BAD_REQUEST};
use skiff_transport::{ReplyDestination, Transport, WireMessage};
use store::{DirectGetRequest, StoreState, StoredEntry};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

type InboxMap = HashMap<String, mpsc::UnboundedSender<WireMessage>>;

/// Options for the in-memory transport.
#[derive(Clone, Debug)]
pub struct MemoryTransportOptions {
    /// Connection-level request timeout.
    pub request_timeout: Duration,
}

impl Default for MemoryTransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// An in-memory transport backed by an in-process log store.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    inboxes: Arc<Mutex<InboxMap>>,
    stores: Arc<Mutex<HashMap<String, StoreState>>>,
    request_timeout: Duration,
}

impl MemoryTransport {
    /// Creates a new in-memory transport with no stores.
    #[must_use]
    pub fn new(options: MemoryTransportOptions) -> Self {
        Self {
            inboxes: Arc::new(Mutex::new(HashMap::new())),
            stores: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: options.request_timeout,
        }
    }

    /// Creates a store with direct reads enabled. Replaces any existing
    /// store of the same name.
    pub async fn create_store(&self, name: &str) {
        self.stores
            .lock()
            .await
            .insert(name.to_string(), StoreState::new());
    }

    /// Enables or disables direct reads for a store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStore`] if the store does not exist.
    pub async fn set_allow_direct(&self, name: &str, enabled: bool) -> Result<(), Error> {
        let mut stores = self.stores.lock().await;
        let state = stores
            .get_mut(name)
            .ok_or_else(|| Error::UnknownStore(name.to_string()))?;
        state.allow_direct = enabled;
        Ok(())
    }

    /// Makes a store silently drop incoming direct-get requests, so callers
    /// can exercise their timeout paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStore`] if the store does not exist.
    pub async fn set_drop_requests(&self, name: &str, enabled: bool) -> Result<(), Error> {
        let mut stores = self.stores.lock().await;
        let state = stores
            .get_mut(name)
            .ok_or_else(|| Error::UnknownStore(name.to_string()))?;
        state.drop_requests = enabled;
        Ok(())
    }

    /// Appends a record to a store and returns its 1-based sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStore`] if the store does not exist.
    pub async fn append(&self, name: &str, subject: &str, payload: Bytes) -> Result<u64, Error> {
        let mut stores = self.stores.lock().await;
        let state = stores
            .get_mut(name)
            .ok_or_else(|| Error::UnknownStore(name.to_string()))?;
        let sequence = state.records.last().map_or(1, |entry| entry.sequence + 1);
        state.records.push(StoredEntry {
            sequence,
            subject: subject.to_string(),
            timestamp: Utc::now(),
            payload,
        });
        Ok(sequence)
    }

    /// Returns the last stored sequence of a store, or zero when empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStore`] if the store does not exist.
    pub async fn last_sequence(&self, name: &str) -> Result<u64, Error> {
        let stores = self.stores.lock().await;
        let state = stores
            .get(name)
            .ok_or_else(|| Error::UnknownStore(name.to_string()))?;
        Ok(state.records.last().map_or(0, |entry| entry.sequence))
    }

    /// Number of reply destinations currently registered. Useful for
    /// asserting that requests release their destinations.
    pub async fn open_reply_destinations(&self) -> usize {
        self.inboxes.lock().await.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;

    type Reply = MemoryReplyDestination;

    async fn allocate_reply_destination(&self) -> Result<Self::Reply, Self::Error> {
        let address = format!("_INBOX.{}", Uuid::new_v4());
        let (sender, receiver) = mpsc::unbounded_channel();

        self.inboxes.lock().await.insert(address.clone(), sender);

        Ok(MemoryReplyDestination {
            address,
            receiver,
            inboxes: self.inboxes.clone(),
        })
    }

    async fn publish(
        &self,
        endpoint: String,
        reply_to: String,
        payload: Bytes,
    ) -> Result<(), Self::Error> {
        let prefix = format!("{DIRECT_GET_PREFIX}.");
        let Some(store_name) = endpoint.strip_prefix(prefix.as_str()) else {
            // Nothing listens outside the direct-get endpoints.
            return Ok(());
        };

        let responses = {
            let stores = self.stores.lock().await;
            let Some(state) = stores.get(store_name) else {
                return Ok(());
            };
            if state.drop_requests {
                debug!(store = store_name, "dropping direct-get request");
                return Ok(());
            }
            match serde_json::from_slice::<DirectGetRequest>(&payload) {
                Ok(request) => store::serve(&reply_to, state, &request),
                Err(e) => vec![WireMessage::status(&reply_to, STATUS_BAD_REQUEST, e.to_string())],
            }
        };

        let mut inboxes = self.inboxes.lock().await;
        if let Some(sender) = inboxes.get(&reply_to) {
            let mut closed = false;
            for message in responses {
                if sender.send(message).is_err() {
                    closed = true;
                    break;
                }
            }
            if closed {
                inboxes.remove(&reply_to);
            }
        }
        Ok(())
    }

    async fn direct_reads_enabled(&self, store_name: &str) -> Result<bool, Self::Error> {
        let stores = self.stores.lock().await;
        Ok(stores.get(store_name).is_some_and(|state| state.allow_direct))
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// A reply destination backed by an unbounded in-process channel.
#[derive(Debug)]
pub struct MemoryReplyDestination {
    address: String,
    receiver: mpsc::UnboundedReceiver<WireMessage>,
    inboxes: Arc<Mutex<InboxMap>>,
}

#[async_trait]
impl ReplyDestination for MemoryReplyDestination {
    fn address(&self) -> &str {
        &self.address
    }

    async fn next_message(&mut self, wait: Duration) -> Option<WireMessage> {
        timeout(wait, self.receiver.recv()).await.ok().flatten()
    }

    async fn release(&mut self) {
        self.inboxes.lock().await.remove(&self.address);
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use skiff_transport::wire::{STATUS_END_OF_BATCH, STATUS_NOT_FOUND, direct_get_endpoint};

    async fn transport_with_store(name: &str) -> MemoryTransport {
        let transport = MemoryTransport::new(MemoryTransportOptions::default());
        transport.create_store(name).await;
        transport
    }

    #[tokio::test]
    async fn test_append_assigns_monotonic_sequences() {
        let transport = transport_with_store("orders").await;

        let first = transport
            .append("orders", "orders.eu", Bytes::from("a"))
            .await
            .unwrap();
        let second = transport
            .append("orders", "orders.us", Bytes::from("b"))
            .await
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(transport.last_sequence("orders").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_to_unknown_store_fails() {
        let transport = MemoryTransport::new(MemoryTransportOptions::default());
        let result = transport.append("missing", "s", Bytes::new()).await;
        assert!(matches!(result, Err(Error::UnknownStore(_))));
    }

    #[tokio::test]
    async fn test_direct_reads_flag() {
        let transport = transport_with_store("orders").await;
        assert!(transport.direct_reads_enabled("orders").await.unwrap());

        transport.set_allow_direct("orders", false).await.unwrap();
        assert!(!transport.direct_reads_enabled("orders").await.unwrap());

        assert!(!transport.direct_reads_enabled("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_request_round_trip() {
        let transport = transport_with_store("orders").await;
        transport
            .append("orders", "orders.eu", Bytes::from("a"))
            .await
            .unwrap();
        transport
            .append("orders", "orders.eu", Bytes::from("b"))
            .await
            .unwrap();

        let mut reply = transport.allocate_reply_destination().await.unwrap();
        transport
            .publish(
                direct_get_endpoint("orders"),
                reply.address().to_string(),
                Bytes::from(r#"{"subject":"orders.eu","batch":10}"#),
            )
            .await
            .unwrap();

        let wait = Duration::from_millis(100);
        let first = reply.next_message(wait).await.unwrap();
        assert_eq!(first.payload, Bytes::from("a"));
        let second = reply.next_message(wait).await.unwrap();
        assert_eq!(second.payload, Bytes::from("b"));
        let terminal = reply.next_message(wait).await.unwrap();
        assert_eq!(terminal.status, Some(STATUS_END_OF_BATCH));

        reply.release().await;
        assert_eq!(transport.open_reply_destinations().await, 0);
    }

    #[tokio::test]
    async fn test_empty_subject_answers_not_found() {
        let transport = transport_with_store("orders").await;

        let mut reply = transport.allocate_reply_destination().await.unwrap();
        transport
            .publish(
                direct_get_endpoint("orders"),
                reply.address().to_string(),
                Bytes::from(r#"{"subject":"orders.eu","batch":1}"#),
            )
            .await
            .unwrap();

        let terminal = reply.next_message(Duration::from_millis(100)).await.unwrap();
        assert_eq!(terminal.status, Some(STATUS_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_dropped_requests_produce_no_reply() {
        let transport = transport_with_store("orders").await;
        transport.set_drop_requests("orders", true).await.unwrap();

        let mut reply = transport.allocate_reply_destination().await.unwrap();
        transport
            .publish(
                direct_get_endpoint("orders"),
                reply.address().to_string(),
                Bytes::from(r#"{"subject":"orders.eu","batch":1}"#),
            )
            .await
            .unwrap();

        assert!(reply.next_message(Duration::from_millis(50)).await.is_none());
    }
}

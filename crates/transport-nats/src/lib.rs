//! NATS implementation of the skiff transport. Requests are published with a
//! reply inbox; responses arrive on a core NATS subscription, and direct-read
//! availability is probed through the JetStream stream configuration.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::fmt;
use std::time::Duration;

use async_nats::Client as AsyncNatsClient;
use async_nats::jetstream::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use skiff_transport::{Headers, ReplyDestination, Transport, WireMessage};
use tokio::time::timeout;
use tracing::debug;

/// Options for the NATS transport.
#[derive(Clone, Debug)]
pub struct NatsTransportOptions {
    /// The NATS client to use.
    pub client: AsyncNatsClient,

    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// A transport backed by a NATS connection.
#[derive(Clone, Debug)]
pub struct NatsTransport {
    client: AsyncNatsClient,
    jetstream_context: Context,
    request_timeout: Duration,
}

impl NatsTransport {
    /// Creates a new NATS transport.
    #[must_use]
    pub fn new(options: NatsTransportOptions) -> Self {
        let jetstream_context = async_nats::jetstream::new(options.client.clone());

        Self {
            client: options.client,
            jetstream_context,
            request_timeout: options.request_timeout,
        }
    }
}

#[async_trait]
impl Transport for NatsTransport {
    type Error = Error;

    type Reply = NatsReplyDestination;

    async fn allocate_reply_destination(&self) -> Result<Self::Reply, Self::Error> {
        let address = self.client.new_inbox();
        let subscriber = self.client.subscribe(address.clone()).await?;

        Ok(NatsReplyDestination {
            address,
            subscriber: Some(subscriber),
        })
    }

    async fn publish(
        &self,
        endpoint: String,
        reply_to: String,
        payload: Bytes,
    ) -> Result<(), Self::Error> {
        self.client
            .publish_with_reply(endpoint, reply_to, payload)
            .await?;

        Ok(())
    }

    async fn direct_reads_enabled(&self, store_name: &str) -> Result<bool, Self::Error> {
        let stream = self
            .jetstream_context
            .get_stream(store_name)
            .await
            .map_err(|e| Error::StreamInfo(e.to_string()))?;

        Ok(stream.cached_info().config.allow_direct)
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

/// A reply destination backed by a core NATS inbox subscription.
pub struct NatsReplyDestination {
    address: String,
    subscriber: Option<async_nats::Subscriber>,
}

impl fmt::Debug for NatsReplyDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsReplyDestination")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReplyDestination for NatsReplyDestination {
    fn address(&self) -> &str {
        &self.address
    }

    async fn next_message(&mut self, wait: Duration) -> Option<WireMessage> {
        let subscriber = self.subscriber.as_mut()?;

        match timeout(wait, subscriber.next()).await {
            Ok(Some(message)) => Some(wire_message(message)),
            Ok(None) | Err(_) => None,
        }
    }

    async fn release(&mut self) {
        if let Some(mut subscriber) = self.subscriber.take() {
            if let Err(e) = subscriber.unsubscribe().await {
                debug!("failed to unsubscribe from reply inbox: {e}");
            }
        }
    }
}

fn wire_message(message: async_nats::Message) -> WireMessage {
    let headers = message.headers.as_ref().map_or_else(Headers::new, |map| {
        map.iter()
            .filter_map(|(name, values)| {
                values
                    .first()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect()
    });

    WireMessage {
        subject: message.subject.to_string(),
        payload: message.payload,
        headers,
        status: message.status.map(|code| code.as_u16()),
        description: message.description,
    }
}

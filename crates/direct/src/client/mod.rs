mod error;

pub use error::Error;

use std::ops::ControlFlow;
use std::time::Duration;

use skiff_transport::wire::direct_get_endpoint;
use skiff_transport::{ReplyDestination, Transport};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::handler::BatchHandler;
use crate::response::{self, BatchEntry, StoredRecord, Termination};
use crate::spec::BatchRequestSpec;

/// Options for the direct batch client.
#[derive(Clone, Debug, Default)]
pub struct DirectBatchClientOptions {
    /// Per-request timeout. Defaults to the transport's request timeout.
    pub request_timeout: Option<Duration>,
}

/// A client that retrieves batches of stored records directly from a log
/// store over a [`Transport`].
///
/// Every consumption style is built on the same protocol exchange: one
/// published request correlated to a freshly allocated reply destination,
/// answered by zero or more data messages and exactly one terminal
/// condition.
#[derive(Clone, Debug)]
pub struct DirectBatchClient<X>
where
    X: Transport,
{
    endpoint: String,
    request_timeout: Duration,
    store_name: String,
    transport: X,
}

enum Drive {
    Terminated(Termination),
    Aborted,
}

impl<X> DirectBatchClient<X>
where
    X: Transport,
{
    /// Creates a new client for the named store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be probed or does not accept
    /// direct read requests.
    pub async fn new(
        transport: X,
        store_name: String,
        options: DirectBatchClientOptions,
    ) -> Result<Self, Error<X::Error>> {
        if !transport
            .direct_reads_enabled(&store_name)
            .await
            .map_err(Error::Transport)?
        {
            return Err(Error::DirectReadDisabled(store_name));
        }

        let request_timeout = options
            .request_timeout
            .unwrap_or_else(|| transport.request_timeout());

        Ok(Self {
            endpoint: direct_get_endpoint(&store_name),
            request_timeout,
            store_name,
            transport,
        })
    }

    /// The name of the store this client reads from.
    #[must_use]
    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// The per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Issues one batch request and collects every returned record.
    ///
    /// A not-found termination yields an empty collection; records arrive
    /// in ascending sequence order for single-subject requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails, a response is malformed,
    /// the store reports an error status, or the request times out.
    pub async fn fetch(
        &self,
        spec: &BatchRequestSpec,
    ) -> Result<Vec<StoredRecord>, Error<X::Error>> {
        let mut reply = self.open(spec).await?;

        let mut records = Vec::new();
        let result = Self::drive(&mut reply, self.request_timeout, |entry| {
            if let BatchEntry::Record(record) = entry {
                records.push(record);
            }
            ControlFlow::Continue(())
        })
        .await;

        reply.release().await;

        match result? {
            Drive::Terminated(Termination::EndOfBatch | Termination::NotFound)
            | Drive::Aborted => Ok(records),
            Drive::Terminated(Termination::Error { code, description }) => {
                Err(Error::Remote { code, description })
            }
            Drive::Terminated(Termination::Timeout) => Err(Error::Timeout),
        }
    }

    /// Issues one batch request and streams classified entries through a
    /// queue.
    ///
    /// The queue yields every record followed by exactly one terminal entry,
    /// then closes. Dropping the receiver aborts the in-flight request and
    /// releases its reply destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the reply destination cannot be allocated or the
    /// request cannot be published.
    pub async fn queue(
        &self,
        spec: &BatchRequestSpec,
    ) -> Result<mpsc::UnboundedReceiver<BatchEntry>, Error<X::Error>> {
        let mut reply = self.open(spec).await?;
        let wait = self.request_timeout;

        let (sender, receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let result = Self::drive(&mut reply, wait, |entry| {
                if sender.send(entry).is_err() {
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            })
            .await;

            reply.release().await;

            if let Err(err) = result {
                debug!("batch response stream failed: {err}");
                let _ = sender.send(BatchEntry::Terminal(Termination::Error {
                    code: 0,
                    description: err.to_string(),
                }));
            }
        });

        Ok(receiver)
    }

    /// Issues one batch request and delivers every entry, terminal included,
    /// to the handler. Returns `true` when the request ended with a clean
    /// end-of-batch, `false` when no records matched.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails, a response is malformed, the
    /// handler rejects a record, the store reports an error status, or the
    /// request times out.
    pub async fn request_with_handler<H>(
        &self,
        spec: &BatchRequestSpec,
        handler: &H,
    ) -> Result<bool, Error<X::Error>>
    where
        H: BatchHandler,
    {
        self.request_with_handler_opts(spec, handler, true).await
    }

    /// As [`Self::request_with_handler`], with control over whether the
    /// terminal entry is delivered to the handler.
    ///
    /// Handler errors on the terminal entry are logged and suppressed; the
    /// request's outcome was already decided by then.
    ///
    /// # Errors
    ///
    /// As [`Self::request_with_handler`].
    pub async fn request_with_handler_opts<H>(
        &self,
        spec: &BatchRequestSpec,
        handler: &H,
        deliver_terminal: bool,
    ) -> Result<bool, Error<X::Error>>
    where
        H: BatchHandler,
    {
        let mut entries = self.queue(spec).await?;

        while let Some(entry) = entries.recv().await {
            match entry {
                BatchEntry::Terminal(termination) => {
                    if deliver_terminal {
                        let delivery = handler
                            .handle(BatchEntry::Terminal(termination.clone()))
                            .await;
                        if let Err(err) = delivery {
                            warn!("handler failed on terminal entry: {err}");
                        }
                    }

                    return match termination {
                        Termination::EndOfBatch => Ok(true),
                        Termination::NotFound => Ok(false),
                        Termination::Error { code, description } => {
                            Err(Error::Remote { code, description })
                        }
                        Termination::Timeout => Err(Error::Timeout),
                    };
                }
                BatchEntry::Record(record) => {
                    handler
                        .handle(BatchEntry::Record(record))
                        .await
                        .map_err(|err| Error::Handler(Box::new(err)))?;
                }
            }
        }

        Err(Error::Remote {
            code: 0,
            description: "response stream closed without a terminal condition".to_string(),
        })
    }

    /// Allocates a reply destination and publishes the request against it.
    async fn open(&self, spec: &BatchRequestSpec) -> Result<X::Reply, Error<X::Error>> {
        let mut reply = self
            .transport
            .allocate_reply_destination()
            .await
            .map_err(Error::Transport)?;

        let publish = self
            .transport
            .publish(
                self.endpoint.clone(),
                reply.address().to_string(),
                spec.encode(),
            )
            .await;

        if let Err(err) = publish {
            reply.release().await;
            return Err(Error::Transport(err));
        }

        Ok(reply)
    }

    /// Runs the response loop for one opened request: classifies each
    /// inbound message and delivers it, synthesizing a timeout termination
    /// when the wait elapses. The terminal entry is delivered before the
    /// loop returns.
    async fn drive<F>(
        reply: &mut X::Reply,
        wait: Duration,
        mut deliver: F,
    ) -> Result<Drive, Error<X::Error>>
    where
        F: FnMut(BatchEntry) -> ControlFlow<()>,
    {
        loop {
            let Some(message) = reply.next_message(wait).await else {
                let _ = deliver(BatchEntry::Terminal(Termination::Timeout));
                return Ok(Drive::Terminated(Termination::Timeout));
            };

            match response::classify(&message)? {
                BatchEntry::Terminal(termination) => {
                    let _ = deliver(BatchEntry::Terminal(termination.clone()));
                    return Ok(Drive::Terminated(termination));
                }
                entry => {
                    if deliver(entry).is_break() {
                        return Ok(Drive::Aborted);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use skiff_transport_memory::{MemoryTransport, MemoryTransportOptions};
    use thiserror::Error as ThisError;

    #[derive(Debug, ThisError)]
    #[error("record rejected")]
    struct RecordingHandlerError;

    impl crate::handler::BatchHandlerError for RecordingHandlerError {}

    #[derive(Clone)]
    struct RecordingHandler {
        entries: Arc<Mutex<Vec<BatchEntry>>>,
        fail_on_records: bool,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                entries: Arc::new(Mutex::new(Vec::new())),
                fail_on_records: false,
            }
        }

        fn failing() -> Self {
            Self {
                entries: Arc::new(Mutex::new(Vec::new())),
                fail_on_records: true,
            }
        }

        fn entries(&self) -> Vec<BatchEntry> {
            self.entries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchHandler for RecordingHandler {
        type Error = RecordingHandlerError;

        async fn handle(&self, entry: BatchEntry) -> Result<(), Self::Error> {
            if self.fail_on_records && matches!(entry, BatchEntry::Record(_)) {
                return Err(RecordingHandlerError);
            }
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    async fn seeded_transport(store: &str, subject: &str, count: u64) -> MemoryTransport {
        let transport = MemoryTransport::new(MemoryTransportOptions::default());
        transport.create_store(store).await;
        for i in 1..=count {
            transport
                .append(store, subject, Bytes::from(format!("payload-{i}")))
                .await
                .unwrap();
        }
        transport
    }

    async fn client(transport: &MemoryTransport, store: &str) -> DirectBatchClient<MemoryTransport> {
        DirectBatchClient::new(
            transport.clone(),
            store.to_string(),
            DirectBatchClientOptions::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_records_in_sequence_order() {
        let transport = seeded_transport("orders", "orders.eu", 5).await;
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::batch("orders.eu", 3).unwrap();
        let records = client.fetch(&spec).await.unwrap();

        assert_eq!(
            records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(records[0].payload, Bytes::from("payload-1"));
        assert_eq!(transport.open_reply_destinations().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_resumes_from_min_sequence() {
        let transport = seeded_transport("orders", "orders.eu", 5).await;
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::batch_from_sequence("orders.eu", 3, 4).unwrap();
        let records = client.fetch(&spec).await.unwrap();

        assert_eq!(
            records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![4, 5]
        );
    }

    #[tokio::test]
    async fn test_fetch_short_batch_completes_cleanly() {
        let transport = seeded_transport("orders", "orders.eu", 2).await;
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::batch("orders.eu", 100).unwrap();
        let records = client.fetch(&spec).await.unwrap();

        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_no_matches_is_empty_not_an_error() {
        let transport = seeded_transport("orders", "orders.eu", 3).await;
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::batch("orders.us", 10).unwrap();
        let records = client.fetch(&spec).await.unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_first_record_carries_pending_hint() {
        let transport = seeded_transport("orders", "orders.eu", 5).await;
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::batch("orders.eu", 2).unwrap();
        let records = client.fetch(&spec).await.unwrap();

        assert_eq!(records[0].num_pending, Some(3));
        assert_eq!(records[0].last_sequence, Some(5));
        assert_eq!(records[1].num_pending, None);
    }

    #[tokio::test]
    async fn test_fetch_times_out_when_store_is_silent() {
        let transport = MemoryTransport::new(MemoryTransportOptions {
            request_timeout: Duration::from_millis(100),
        });
        transport.create_store("orders").await;
        transport.set_drop_requests("orders", true).await.unwrap();
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::batch("orders.eu", 1).unwrap();
        let result = client.fetch(&spec).await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(transport.open_reply_destinations().await, 0);
    }

    #[tokio::test]
    async fn test_new_rejects_store_without_direct_reads() {
        let transport = MemoryTransport::new(MemoryTransportOptions::default());
        transport.create_store("orders").await;
        transport.set_allow_direct("orders", false).await.unwrap();

        let result = DirectBatchClient::new(
            transport,
            "orders".to_string(),
            DirectBatchClientOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(Error::DirectReadDisabled(name)) if name == "orders"));
    }

    #[tokio::test]
    async fn test_queue_yields_records_then_exactly_one_terminal() {
        let transport = seeded_transport("orders", "orders.eu", 3).await;
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::batch("orders.eu", 10).unwrap();
        let mut entries = client.queue(&spec).await.unwrap();

        let mut collected = Vec::new();
        while let Some(entry) = entries.recv().await {
            collected.push(entry);
        }

        assert_eq!(collected.len(), 4);
        assert!(
            collected[..3]
                .iter()
                .all(|entry| matches!(entry, BatchEntry::Record(_)))
        );
        assert_eq!(
            collected[3],
            BatchEntry::Terminal(Termination::EndOfBatch)
        );
    }

    #[tokio::test]
    async fn test_request_with_handler_delivers_terminal() {
        let transport = seeded_transport("orders", "orders.eu", 2).await;
        let client = client(&transport, "orders").await;
        let handler = RecordingHandler::new();

        let spec = BatchRequestSpec::batch("orders.eu", 10).unwrap();
        let clean = client.request_with_handler(&spec, &handler).await.unwrap();

        assert!(clean);
        let entries = handler.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[2],
            BatchEntry::Terminal(Termination::EndOfBatch)
        );
    }

    #[tokio::test]
    async fn test_request_with_handler_reports_not_found_as_unclean() {
        let transport = seeded_transport("orders", "orders.eu", 2).await;
        let client = client(&transport, "orders").await;
        let handler = RecordingHandler::new();

        let spec = BatchRequestSpec::batch("orders.us", 10).unwrap();
        let clean = client.request_with_handler(&spec, &handler).await.unwrap();

        assert!(!clean);
        assert_eq!(
            handler.entries(),
            vec![BatchEntry::Terminal(Termination::NotFound)]
        );
    }

    #[tokio::test]
    async fn test_request_with_handler_opts_can_skip_terminal() {
        let transport = seeded_transport("orders", "orders.eu", 2).await;
        let client = client(&transport, "orders").await;
        let handler = RecordingHandler::new();

        let spec = BatchRequestSpec::batch("orders.eu", 10).unwrap();
        let clean = client
            .request_with_handler_opts(&spec, &handler, false)
            .await
            .unwrap();

        assert!(clean);
        assert_eq!(handler.entries().len(), 2);
        assert!(
            handler
                .entries()
                .iter()
                .all(|entry| matches!(entry, BatchEntry::Record(_)))
        );
    }

    #[tokio::test]
    async fn test_handler_failure_aborts_and_releases() {
        let transport = seeded_transport("orders", "orders.eu", 5).await;
        let client = client(&transport, "orders").await;
        let handler = RecordingHandler::failing();

        let spec = BatchRequestSpec::batch("orders.eu", 10).unwrap();
        let result = client.request_with_handler(&spec, &handler).await;

        assert!(matches!(result, Err(Error::Handler(_))));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.open_reply_destinations().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_multi_last_returns_latest_per_subject() {
        let transport = MemoryTransport::new(MemoryTransportOptions::default());
        transport.create_store("orders").await;
        for (subject, payload) in [
            ("orders.eu", "eu-1"),
            ("orders.us", "us-1"),
            ("orders.eu", "eu-2"),
        ] {
            transport
                .append("orders", subject, Bytes::from(payload))
                .await
                .unwrap();
        }
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::last_for_subjects(["orders.>"]).unwrap();
        let records = client.fetch(&spec).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].subject, "orders.eu");
        assert_eq!(records[0].payload, Bytes::from("eu-2"));
        assert_eq!(records[1].subject, "orders.us");
    }

    #[tokio::test]
    async fn test_fetch_byte_capped_batch_always_sends_first_record() {
        let transport = seeded_transport("orders", "orders.eu", 3).await;
        let client = client(&transport, "orders").await;

        let spec = BatchRequestSpec::batch_bytes("orders.eu", 100, 1).unwrap();
        let records = client.fetch(&spec).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 1);
    }
}

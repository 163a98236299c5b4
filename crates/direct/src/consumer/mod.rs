mod error;

pub use error::Error;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use skiff_transport::Transport;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::client::DirectBatchClient;
use crate::handler::BatchHandler;
use crate::response::BatchEntry;
use crate::spec::BatchRequestSpec;

/// The default backoff schedule applied while a subject is idle.
fn default_backoff() -> Vec<Duration> {
    vec![
        Duration::from_millis(100),
        Duration::from_millis(500),
        Duration::from_secs(1),
        Duration::from_secs(5),
    ]
}

/// Options for the continuous direct consumer.
#[derive(Clone, Debug)]
pub struct ContinuousConsumerOptions {
    /// Delay schedule applied after consecutive empty or failed cycles; the
    /// last entry is repeated once the schedule is exhausted. Must not be
    /// empty.
    pub backoff: Vec<Duration>,

    /// Maximum records requested per cycle.
    pub batch_limit: u64,

    /// Resume tailing from this sequence. Mutually exclusive with
    /// `start_time`; without either, tailing starts at the first record.
    pub start_sequence: Option<u64>,

    /// Resume tailing from the first record stored at or after this time.
    /// The anchor applies until the first record is delivered, after which
    /// the consumer tracks sequences.
    pub start_time: Option<DateTime<Utc>>,

    /// The literal subject to tail.
    pub subject: String,
}

impl ContinuousConsumerOptions {
    /// Options for tailing `subject` from its first record, with the default
    /// batch limit and backoff schedule.
    pub fn new<S: Into<String>>(subject: S) -> Self {
        Self {
            backoff: default_backoff(),
            batch_limit: 100,
            start_sequence: None,
            start_time: None,
            subject: subject.into(),
        }
    }
}

/// Delivery position, shared across restarts of the poll loop.
#[derive(Debug)]
struct Cursor {
    consecutive_misses: u32,
    current_delay: Duration,
    last_delivered: Option<u64>,
    next_sequence: u64,
    pending_start_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Lifecycle {
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

enum CycleOutcome {
    Progress(usize),
    Idle,
    Rejected,
    Fatal,
}

/// Emulates an ordered, at-least-once tailing subscription to a single
/// subject by repeatedly issuing direct batch requests.
///
/// Each cycle requests the next batch after the last delivered record.
/// Records are delivered to the handler in ascending sequence order; a
/// handler failure aborts the cycle and the record is requested again on the
/// next one. Fatal terminations (remote errors, timeouts) are surfaced to
/// the handler as terminal entries. Empty and failed cycles back off along
/// the configured schedule; any delivery, or a pending-data hint on the
/// first record of a batch, resets the schedule.
pub struct ContinuousDirectConsumer<X, H>
where
    X: Transport,
    H: BatchHandler,
{
    client: DirectBatchClient<X>,
    cursor: Arc<Mutex<Cursor>>,
    handler: H,
    lifecycle: Arc<Mutex<Lifecycle>>,
    options: ContinuousConsumerOptions,
}

impl<X, H> Clone for ContinuousDirectConsumer<X, H>
where
    X: Transport,
    H: BatchHandler,
{
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            cursor: self.cursor.clone(),
            handler: self.handler.clone(),
            lifecycle: self.lifecycle.clone(),
            options: self.options.clone(),
        }
    }
}

impl<X, H> ContinuousDirectConsumer<X, H>
where
    X: Transport,
    H: BatchHandler,
{
    /// Creates a new consumer over an existing client.
    ///
    /// # Errors
    ///
    /// Returns an error if the backoff schedule is empty, both start points
    /// are given, or the subject and batch limit cannot form a valid batch
    /// request.
    pub fn new(
        client: DirectBatchClient<X>,
        handler: H,
        options: ContinuousConsumerOptions,
    ) -> Result<Self, Error> {
        if options.backoff.is_empty() {
            return Err(Error::EmptyBackoff);
        }

        if options.start_sequence.is_some() && options.start_time.is_some() {
            return Err(Error::ConflictingStartPoints);
        }

        let next_sequence = options.start_sequence.unwrap_or(1);

        // Surface subject and limit problems at construction, not mid-tail.
        BatchRequestSpec::batch_from_sequence(&options.subject, options.batch_limit, next_sequence)?;

        let cursor = Cursor {
            consecutive_misses: 0,
            current_delay: Duration::ZERO,
            last_delivered: None,
            next_sequence,
            pending_start_time: options.start_time,
        };

        Ok(Self {
            client,
            cursor: Arc::new(Mutex::new(cursor)),
            handler,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                shutdown_token: CancellationToken::new(),
                task_tracker: TaskTracker::new(),
            })),
            options,
        })
    }

    /// The subject this consumer tails.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.options.subject
    }

    /// The sequence of the last record the handler accepted, if any.
    pub async fn last_delivered_sequence(&self) -> Option<u64> {
        self.cursor.lock().await.last_delivered
    }

    /// The delay chosen after the most recent poll cycle. Zero while the
    /// consumer is making progress.
    pub async fn current_delay(&self) -> Duration {
        self.cursor.lock().await.current_delay
    }

    /// Whether the poll loop is currently not running.
    pub async fn is_stopped(&self) -> bool {
        let lifecycle = self.lifecycle.lock().await;
        !lifecycle.task_tracker.is_closed() || lifecycle.task_tracker.is_empty()
    }

    /// Starts the poll loop. A stopped consumer may be started again and
    /// resumes from its cursor.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer is already running.
    pub async fn start(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock().await;

        if lifecycle.task_tracker.is_closed() && !lifecycle.task_tracker.is_empty() {
            return Err(Error::AlreadyRunning);
        }

        lifecycle.shutdown_token = CancellationToken::new();
        lifecycle.task_tracker = TaskTracker::new();

        lifecycle.task_tracker.spawn(Self::poll_loop(
            self.client.clone(),
            self.handler.clone(),
            self.options.clone(),
            self.cursor.clone(),
            lifecycle.shutdown_token.clone(),
        ));

        lifecycle.task_tracker.close();

        Ok(())
    }

    /// Stops the poll loop and waits for it to exit. The stop is
    /// cooperative: an in-flight cycle finishes its current wait before the
    /// loop observes it, so shutdown can take up to one request timeout to
    /// return. Returns immediately if the consumer was never started.
    pub async fn shutdown(&self) {
        debug!("shutting down continuous direct consumer");

        let tracker = {
            let lifecycle = self.lifecycle.lock().await;
            lifecycle.shutdown_token.cancel();
            if !lifecycle.task_tracker.is_closed() {
                return;
            }
            lifecycle.task_tracker.clone()
        };

        tracker.wait().await;
    }

    /// Waits for the poll loop to exit. Returns immediately if the consumer
    /// was never started.
    pub async fn wait(&self) {
        let tracker = {
            let lifecycle = self.lifecycle.lock().await;
            if !lifecycle.task_tracker.is_closed() {
                return;
            }
            lifecycle.task_tracker.clone()
        };

        tracker.wait().await;
    }

    async fn poll_loop(
        client: DirectBatchClient<X>,
        handler: H,
        options: ContinuousConsumerOptions,
        cursor: Arc<Mutex<Cursor>>,
        shutdown_token: CancellationToken,
    ) {
        loop {
            if shutdown_token.is_cancelled() {
                debug!("shutdown token cancelled, exiting consumer poll loop");
                break;
            }

            let spec = {
                let cursor = cursor.lock().await;
                match cursor.pending_start_time {
                    Some(start) => BatchRequestSpec::batch_from_time(
                        &options.subject,
                        options.batch_limit,
                        start,
                    ),
                    None => BatchRequestSpec::batch_from_sequence(
                        &options.subject,
                        options.batch_limit,
                        cursor.next_sequence,
                    ),
                }
            };

            let spec = match spec {
                Ok(spec) => spec,
                Err(err) => {
                    error!("cannot build batch request, exiting consumer poll loop: {err}");
                    break;
                }
            };

            let outcome = Self::poll_once(&client, &handler, &cursor, &spec).await;

            let delay = {
                let mut cursor = cursor.lock().await;
                match outcome {
                    CycleOutcome::Progress(delivered) => {
                        debug!("delivered {delivered} records");
                        cursor.consecutive_misses = 0;
                        cursor.current_delay = Duration::ZERO;
                    }
                    CycleOutcome::Idle | CycleOutcome::Rejected => {
                        cursor.consecutive_misses = cursor.consecutive_misses.saturating_add(1);
                        cursor.current_delay =
                            backoff_delay(&options.backoff, cursor.consecutive_misses);
                    }
                    CycleOutcome::Fatal => {
                        cursor.consecutive_misses = cursor.consecutive_misses.saturating_add(1);
                        cursor.current_delay = backoff_delay(&options.backoff, u32::MAX);
                    }
                }
                cursor.current_delay
            };

            if delay > Duration::ZERO {
                tokio::select! {
                    biased;
                    () = shutdown_token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Runs one request cycle, advancing the cursor after each record the
    /// handler accepts.
    async fn poll_once(
        client: &DirectBatchClient<X>,
        handler: &H,
        cursor: &Mutex<Cursor>,
        spec: &BatchRequestSpec,
    ) -> CycleOutcome {
        let mut entries = match client.queue(spec).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!("batch request failed: {err}");
                return CycleOutcome::Fatal;
            }
        };

        let mut delivered = 0;
        while let Some(entry) = entries.recv().await {
            match entry {
                BatchEntry::Record(record) => {
                    // Pending-data hints on the first record prove the
                    // subject is live, so the backoff schedule starts over
                    // even if the handler rejects the record below.
                    if record.num_pending.is_some() || record.last_sequence.is_some() {
                        cursor.lock().await.consecutive_misses = 0;
                    }

                    let sequence = record.sequence;
                    if let Err(err) = handler.handle(BatchEntry::Record(record)).await {
                        error!("handler rejected record {sequence}, will re-request: {err}");
                        return CycleOutcome::Rejected;
                    }

                    let mut cursor = cursor.lock().await;
                    cursor.pending_start_time = None;
                    cursor.last_delivered = Some(sequence);
                    cursor.next_sequence = sequence + 1;
                    drop(cursor);

                    delivered += 1;
                }
                BatchEntry::Terminal(termination) => {
                    if termination.is_fatal() {
                        warn!("batch request terminated abnormally: {termination:?}");
                        let delivery = handler.handle(BatchEntry::Terminal(termination)).await;
                        if let Err(err) = delivery {
                            warn!("handler failed on terminal entry: {err}");
                        }
                        return CycleOutcome::Fatal;
                    }
                    break;
                }
            }
        }

        if delivered == 0 {
            CycleOutcome::Idle
        } else {
            CycleOutcome::Progress(delivered)
        }
    }
}

/// The delay after `consecutive_misses` empty cycles, clamped to the end of
/// the schedule.
fn backoff_delay(backoff: &[Duration], consecutive_misses: u32) -> Duration {
    if backoff.is_empty() {
        return Duration::ZERO;
    }

    let index = usize::try_from(consecutive_misses.saturating_sub(1))
        .unwrap_or(usize::MAX)
        .min(backoff.len() - 1);

    backoff[index]
}

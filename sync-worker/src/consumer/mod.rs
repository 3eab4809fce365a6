//! Polling consumer
//!
//! Repeatedly long-polls the queue, hands each message to a [`MessageHandler`]
//! and deletes it once handled. Runs until the shutdown token is cancelled.

pub mod backoff;
pub mod handler;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use queue_broker::{Broker, BrokerError, QueueLocator, ReceiveRequest, ReceivedMessage};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub use self::backoff::{Backoff, BackoffConfig};
pub use self::handler::{HandlerError, LoggingHandler, MessageHandler};

/// Consecutive failed cycles after which the consumer reports itself unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 5;

/// Transport failure of a poll cycle; retried with backoff
#[derive(Error, Debug)]
pub enum PollError {
    /// The receive call failed
    #[error("Failed to receive messages")]
    Receive(#[source] BrokerError),

    /// Deleting a handled message failed; it will be redelivered
    #[error("Failed to delete message {message_id}")]
    Delete {
        /// Message whose delete failed
        message_id: String,
        /// Underlying broker failure
        #[source]
        source: BrokerError,
    },
}

impl PollError {
    /// Checks if the underlying broker error is an upstream (5xx) error
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        match self {
            Self::Receive(source) | Self::Delete { source, .. } => source.is_upstream_error(),
        }
    }
}

/// Configuration of the polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Parameters of every receive call
    pub receive: ReceiveRequest,
    /// Fixed delay between successful cycles
    pub interval: Duration,
    /// Delay bounds after failed cycles
    pub backoff: BackoffConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            receive: ReceiveRequest::default(),
            interval: Duration::from_millis(1_000),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Outcome of one successful poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages returned by the receive call
    pub received: usize,
    /// Messages handled and deleted
    pub deleted: usize,
    /// Messages the handler refused, left for redelivery
    pub handler_failures: usize,
    /// Messages left unprocessed because shutdown was requested mid-batch
    pub released: usize,
}

/// Counters shared between the consumer and the health endpoint
#[derive(Debug, Default)]
pub struct ConsumerStatus {
    messages_deleted: AtomicU64,
    handler_failures: AtomicU64,
    consecutive_failures: AtomicU32,
}

impl ConsumerStatus {
    fn record_deleted(&self) {
        self.messages_deleted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages deleted since startup
    #[must_use]
    pub fn messages_deleted(&self) -> u64 {
        self.messages_deleted.load(Ordering::Relaxed)
    }

    /// Handler failures since startup
    #[must_use]
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Failed cycles since the last successful one
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() < UNHEALTHY_AFTER_FAILURES
    }
}

pub struct PollingConsumer {
    broker: Arc<dyn Broker>,
    handler: Arc<dyn MessageHandler>,
    queue: QueueLocator,
    config: PollConfig,
    status: Arc<ConsumerStatus>,
    shutdown: CancellationToken,
}

impl PollingConsumer {
    /// Creates a new `PollingConsumer` for the queue behind `queue`
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        handler: Arc<dyn MessageHandler>,
        queue: QueueLocator,
        config: PollConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broker,
            handler,
            queue,
            config,
            status: Arc::new(ConsumerStatus::default()),
            shutdown,
        }
    }

    /// Returns a handle to the consumer's counters
    #[must_use]
    pub fn status(&self) -> Arc<ConsumerStatus> {
        Arc::clone(&self.status)
    }

    /// Polls the queue until the shutdown token is cancelled
    pub async fn run(self) {
        info!(queue = %self.queue, "Starting PollingConsumer");
        let mut backoff = Backoff::new(self.config.backoff);

        while !self.shutdown.is_cancelled() {
            let delay = match self.poll_once().await {
                Ok(Some(report)) => {
                    debug!(?report, "Poll cycle complete");
                    backoff.reset();
                    self.status.record_success();
                    self.config.interval
                }
                // Cancelled while waiting on the long poll
                Ok(None) => break,
                Err(e) => {
                    self.status.record_failure();
                    counter!("sync_poll_failures").increment(1);

                    let delay = backoff.next_delay();
                    let consecutive_failures = self.status.consecutive_failures();
                    if e.is_upstream_error() {
                        warn!(error = ?e, consecutive_failures, ?delay, "Poll cycle failed upstream, backing off");
                    } else {
                        error!(error = ?e, consecutive_failures, ?delay, "Poll cycle failed, backing off");
                    }
                    delay
                }
            };

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = sleep(delay) => {}
            }
        }

        info!("PollingConsumer shutdown complete");
    }

    /// Runs a single receive / handle / delete cycle
    ///
    /// Returns `Ok(None)` if shutdown was requested while waiting for messages.
    /// Once a batch has arrived, shutdown only stops the consumer from starting
    /// on further messages; the one in flight is finished and deleted.
    ///
    /// A failed delete does not stop the batch: the remaining messages are still
    /// handled, and the first delete failure is returned once the batch is done.
    ///
    /// # Errors
    ///
    /// Returns `PollError` if the receive call or a delete call fails
    pub async fn poll_once(&self) -> Result<Option<CycleReport>, PollError> {
        let messages = tokio::select! {
            result = self.broker.receive_messages(&self.queue, &self.config.receive) => {
                result.map_err(PollError::Receive)?
            }
            () = self.shutdown.cancelled() => return Ok(None),
        };

        let mut report = CycleReport {
            received: messages.len(),
            ..CycleReport::default()
        };
        counter!("sync_messages_received").increment(messages.len() as u64);

        let mut failed_delete: Option<PollError> = None;

        for (position, message) in messages.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                report.released = messages.len() - position;
                info!(
                    released = report.released,
                    "Shutdown requested, leaving remaining messages for redelivery"
                );
                break;
            }

            match self.process_and_delete(message).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => report.handler_failures += 1,
                Err(e) if failed_delete.is_none() => failed_delete = Some(e),
                Err(e) => warn!(error = ?e, "Another delete failed in this batch"),
            }
        }

        match failed_delete {
            Some(e) => Err(e),
            None => Ok(Some(report)),
        }
    }

    /// Returns `false` if the handler failed and the message was left on the queue
    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    async fn process_and_delete(&self, message: &ReceivedMessage) -> Result<bool, PollError> {
        if let Err(e) = self.handler.handle(message).await {
            warn!(error = %e, "Handler failed, leaving message for redelivery");
            counter!("sync_handler_failures").increment(1);
            self.status.record_handler_failure();
            return Ok(false);
        }

        self.broker
            .delete_message(&self.queue, &message.receipt)
            .await
            .map_err(|source| PollError::Delete {
                message_id: message.message_id.clone(),
                source,
            })?;
        counter!("sync_messages_deleted").increment(1);
        self.status.record_deleted();

        Ok(true)
    }
}

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use queue_broker::{Broker, InMemoryBroker, QueueAttributes, ReceivedMessage, TopicIdentifier};
use sync_worker::consumer::{HandlerError, MessageHandler, PollConfig, PollingConsumer};
use sync_worker::setup::{self, Pipeline};
use tokio_util::sync::CancellationToken;

pub const QUEUE_NAME: &str = "sync-organization-sqs";

fn setup_test_env() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

/// In-memory broker with one topic and the attributes the worker uses
pub struct TestContext {
    pub broker: Arc<InMemoryBroker>,
    pub topic: TopicIdentifier,
    pub attributes: QueueAttributes,
}

impl TestContext {
    pub fn new() -> Self {
        setup_test_env();

        let broker = Arc::new(InMemoryBroker::new());
        let topic = broker.create_topic("T");

        Self {
            broker,
            topic,
            attributes: QueueAttributes {
                retention: Duration::from_secs(86_400),
                wait_time: Duration::from_secs(20),
            },
        }
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    /// Runs the setup pipeline for [`QUEUE_NAME`] against the context's topic
    pub async fn provision(&self) -> Pipeline {
        setup::provision(self.broker(), QUEUE_NAME, &self.attributes, &self.topic)
            .await
            .expect("setup pipeline should succeed")
    }

    pub fn consumer(
        &self,
        pipeline: &Pipeline,
        handler: Arc<RecordingHandler>,
        shutdown: CancellationToken,
    ) -> PollingConsumer {
        PollingConsumer::new(
            self.broker(),
            handler,
            pipeline.queue.locator().clone(),
            PollConfig::default(),
            shutdown,
        )
    }

    pub fn publish(&self, body: &str) {
        let accepted = self.broker.publish(&self.topic, body).unwrap();
        assert_eq!(accepted, 1, "the sync queue should accept the delivery");
    }
}

/// Handler recording every attempt, optionally failing or requesting shutdown
#[derive(Default)]
pub struct RecordingHandler {
    attempts: Mutex<Vec<ReceivedMessage>>,
    failures_remaining: AtomicUsize,
    successes: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the first `count` messages it sees
    #[must_use]
    pub fn failing_first(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Cancels `token` once `count` messages were handled successfully
    #[must_use]
    pub fn cancelling_after(mut self, count: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((count, token));
        self
    }

    pub fn attempts(&self) -> Vec<ReceivedMessage> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .map(|message| message.body)
            .collect()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError> {
        self.attempts.lock().unwrap().push(message.clone());

        let fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(HandlerError::Rejected("test failure".to_string()));
        }

        let handled = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((count, token)) = &self.cancel_after {
            if handled == *count {
                token.cancel();
            }
        }

        Ok(())
    }
}

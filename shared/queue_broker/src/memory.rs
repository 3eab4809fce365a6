//! In-memory broker for tests and local development
//!
//! Simulates the parts of SQS and SNS this workspace relies on:
//! - idempotent queue creation keyed by name and attributes
//! - policy-checked deliveries from topics to subscribed queues
//! - visibility timeouts with redelivery under a fresh receipt token
//! - single-use receipt tokens and message retention
//! - long polling that wakes up on new deliveries
//!
//! Time is measured with `tokio::time::Instant`, so tests running on a paused
//! clock can drive visibility timeouts and retention deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use strum::Display;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::client::Broker;
use crate::error::{BrokerError, BrokerResult};
use crate::policy::PolicyDocument;
use crate::types::{
    QueueAttributes, QueueIdentifier, QueueLocator, ReceiptToken, ReceiveRequest, ReceivedMessage,
    SubscriptionId, TopicIdentifier, MAX_WAIT_TIME,
};

/// Region used when building identifiers
const REGION: &str = "us-east-1";
/// Account used when building locators and identifiers
const ACCOUNT_ID: &str = "000000000000";
/// Visibility timeout applied when neither the queue nor the request sets one
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Broker operations, used for call accounting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    /// [`Broker::create_queue`]
    CreateQueue,
    /// [`Broker::queue_identifier`]
    QueueIdentifier,
    /// [`Broker::set_queue_policy`]
    SetQueuePolicy,
    /// [`Broker::subscribe`]
    Subscribe,
    /// [`Broker::receive_messages`]
    ReceiveMessages,
    /// [`Broker::delete_message`]
    DeleteMessage,
}

struct StoredMessage {
    message_id: String,
    body: String,
    source: Option<TopicIdentifier>,
    expires_at: Instant,
    visible_at: Instant,
    receipt: Option<ReceiptToken>,
}

struct SimulatedQueue {
    name: String,
    identifier: QueueIdentifier,
    attributes: QueueAttributes,
    policy: Option<PolicyDocument>,
    messages: VecDeque<StoredMessage>,
}

impl SimulatedQueue {
    fn purge_expired(&mut self, now: Instant) {
        self.messages.retain(|message| message.expires_at > now);
    }

    fn take_visible(
        &mut self,
        now: Instant,
        limit: usize,
        visibility_timeout: Duration,
    ) -> Vec<ReceivedMessage> {
        self.purge_expired(now);

        self.messages
            .iter_mut()
            .filter(|message| message.visible_at <= now)
            .take(limit)
            .map(|message| {
                // A new delivery invalidates the receipt of any earlier one
                let receipt = ReceiptToken::new(Uuid::new_v4().to_string());
                message.receipt = Some(receipt.clone());
                message.visible_at = now + visibility_timeout;

                ReceivedMessage {
                    message_id: message.message_id.clone(),
                    body: message.body.clone(),
                    receipt,
                    source: message.source.clone(),
                }
            })
            .collect()
    }

    fn next_visible_at(&self) -> Option<Instant> {
        self.messages.iter().map(|message| message.visible_at).min()
    }
}

struct Subscription {
    id: SubscriptionId,
    topic: TopicIdentifier,
    endpoint: QueueIdentifier,
}

#[derive(Default)]
struct State {
    queues: HashMap<QueueLocator, SimulatedQueue>,
    topics: Vec<TopicIdentifier>,
    subscriptions: Vec<Subscription>,
    call_log: Vec<Operation>,
    injected_failures: HashMap<Operation, usize>,
    rejected_deliveries: usize,
}

impl State {
    fn queue_mut(&mut self, locator: &QueueLocator) -> BrokerResult<&mut SimulatedQueue> {
        self.queues
            .get_mut(locator)
            .ok_or_else(|| BrokerError::QueueNotFound(locator.to_string()))
    }

    fn queue_by_identifier_mut(
        &mut self,
        identifier: &QueueIdentifier,
    ) -> BrokerResult<&mut SimulatedQueue> {
        self.queues
            .values_mut()
            .find(|queue| &queue.identifier == identifier)
            .ok_or_else(|| BrokerError::QueueNotFound(identifier.to_string()))
    }
}

/// Simulated SQS/SNS broker held entirely in memory
pub struct InMemoryBroker {
    state: Mutex<State>,
    delivered: Notify,
    visibility_timeout: Duration,
}

impl InMemoryBroker {
    /// Creates an empty broker with the default visibility timeout
    #[must_use]
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Creates an empty broker whose queues hide received messages for `timeout`
    #[must_use]
    pub fn with_visibility_timeout(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            delivered: Notify::new(),
            visibility_timeout: timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a call and returns an injected failure if one is pending
    fn record(&self, operation: Operation) -> BrokerResult<()> {
        let mut state = self.state();
        state.call_log.push(operation);

        if let Some(remaining) = state.injected_failures.get_mut(&operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrokerError::Unavailable(format!(
                    "injected {operation} failure"
                )));
            }
        }

        Ok(())
    }

    /// Makes the next `count` calls of `operation` fail with [`BrokerError::Unavailable`]
    pub fn fail_next(&self, operation: Operation, count: usize) {
        self.state().injected_failures.insert(operation, count);
    }

    /// Number of times `operation` has been called, failed calls included
    #[must_use]
    pub fn calls(&self, operation: Operation) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|logged| **logged == operation)
            .count()
    }

    /// Every call made so far, in order
    #[must_use]
    pub fn call_log(&self) -> Vec<Operation> {
        self.state().call_log.clone()
    }

    /// Number of queues that exist
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.state().queues.len()
    }

    /// Policy currently attached to the queue behind `locator`
    #[must_use]
    pub fn queue_policy(&self, locator: &QueueLocator) -> Option<PolicyDocument> {
        self.state()
            .queues
            .get(locator)
            .and_then(|queue| queue.policy.clone())
    }

    /// Topic and endpoint of every registered subscription
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(TopicIdentifier, QueueIdentifier)> {
        self.state()
            .subscriptions
            .iter()
            .map(|subscription| (subscription.topic.clone(), subscription.endpoint.clone()))
            .collect()
    }

    /// Number of deliveries refused by a queue policy
    #[must_use]
    pub fn rejected_deliveries(&self) -> usize {
        self.state().rejected_deliveries
    }

    /// Messages held by the queue behind `locator`, visible or in flight
    #[must_use]
    pub fn stored_messages(&self, locator: &QueueLocator) -> usize {
        let now = Instant::now();
        let mut state = self.state();
        state.queues.get_mut(locator).map_or(0, |queue| {
            queue.purge_expired(now);
            queue.messages.len()
        })
    }

    /// Creates a topic named `name`, returning its identifier
    pub fn create_topic(&self, name: &str) -> TopicIdentifier {
        let topic = TopicIdentifier::new(format!("arn:aws:sns:{REGION}:{ACCOUNT_ID}:{name}"));
        let mut state = self.state();
        if !state.topics.contains(&topic) {
            state.topics.push(topic.clone());
        }
        topic
    }

    /// Publishes `body` to `topic`, fanning it out to every subscribed queue
    ///
    /// Returns the number of queues that accepted the delivery. Deliveries a
    /// queue policy refuses are dropped and counted in [`Self::rejected_deliveries`].
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::TopicNotFound` if the topic does not exist
    pub fn publish(&self, topic: &TopicIdentifier, body: &str) -> BrokerResult<usize> {
        let endpoints: Vec<QueueIdentifier> = {
            let state = self.state();
            if !state.topics.contains(topic) {
                return Err(BrokerError::TopicNotFound(topic.to_string()));
            }
            state
                .subscriptions
                .iter()
                .filter(|subscription| &subscription.topic == topic)
                .map(|subscription| subscription.endpoint.clone())
                .collect()
        };

        let mut accepted = 0;
        for endpoint in &endpoints {
            match self.deliver(topic, endpoint, body) {
                Ok(_) => accepted += 1,
                Err(BrokerError::AccessDenied(reason)) => {
                    tracing::debug!(%topic, %endpoint, %reason, "Delivery refused by policy");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(accepted)
    }

    /// Attempts a delivery from `source` into the queue identified by `queue`
    ///
    /// Returns the new message id.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::AccessDenied` if the queue has no policy or its policy
    /// does not permit `source`, `BrokerError::QueueNotFound` for unknown queues
    pub fn deliver(
        &self,
        source: &TopicIdentifier,
        queue: &QueueIdentifier,
        body: &str,
    ) -> BrokerResult<String> {
        let now = Instant::now();
        let mut state = self.state();

        let permitted = state
            .queue_by_identifier_mut(queue)?
            .policy
            .as_ref()
            .is_some_and(|policy| policy.permits_delivery(queue, source));
        if !permitted {
            state.rejected_deliveries += 1;
            return Err(BrokerError::AccessDenied(format!(
                "{source} may not deliver to {queue}"
            )));
        }

        let target = state.queue_by_identifier_mut(queue)?;
        let message_id = Uuid::new_v4().to_string();
        target.messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: body.to_string(),
            source: Some(source.clone()),
            expires_at: now + target.attributes.retention,
            visible_at: now,
            receipt: None,
        });
        drop(state);

        self.delivered.notify_waiters();
        Ok(message_id)
    }

    /// Sends `body` straight to the queue behind `locator`, as the queue owner
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::QueueNotFound` for unknown queues
    pub fn send_message(&self, locator: &QueueLocator, body: &str) -> BrokerResult<String> {
        let now = Instant::now();
        let mut state = self.state();
        let queue = state.queue_mut(locator)?;

        let message_id = Uuid::new_v4().to_string();
        queue.messages.push_back(StoredMessage {
            message_id: message_id.clone(),
            body: body.to_string(),
            source: None,
            expires_at: now + queue.attributes.retention,
            visible_at: now,
            receipt: None,
        });
        drop(state);

        self.delivered.notify_waiters();
        Ok(message_id)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> BrokerResult<QueueLocator> {
        self.record(Operation::CreateQueue)?;
        let mut state = self.state();

        let existing = state.queues.iter().find(|(_, queue)| queue.name == name);
        if let Some((locator, existing)) = existing {
            if existing.attributes != *attributes {
                return Err(BrokerError::QueueAlreadyExists(name.to_string()));
            }
            return Ok(locator.clone());
        }

        let locator = QueueLocator::new(format!("http://localhost:4566/{ACCOUNT_ID}/{name}"));
        let identifier = QueueIdentifier::new(format!("arn:aws:sqs:{REGION}:{ACCOUNT_ID}:{name}"));
        state.queues.insert(
            locator.clone(),
            SimulatedQueue {
                name: name.to_string(),
                identifier,
                attributes: *attributes,
                policy: None,
                messages: VecDeque::new(),
            },
        );

        Ok(locator)
    }

    async fn queue_identifier(&self, locator: &QueueLocator) -> BrokerResult<QueueIdentifier> {
        self.record(Operation::QueueIdentifier)?;
        let mut state = self.state();
        Ok(state.queue_mut(locator)?.identifier.clone())
    }

    async fn set_queue_policy(
        &self,
        locator: &QueueLocator,
        policy: &PolicyDocument,
    ) -> BrokerResult<()> {
        self.record(Operation::SetQueuePolicy)?;
        let mut state = self.state();
        state.queue_mut(locator)?.policy = Some(policy.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &TopicIdentifier,
        endpoint: &QueueIdentifier,
    ) -> BrokerResult<SubscriptionId> {
        self.record(Operation::Subscribe)?;
        let mut state = self.state();

        if !state.topics.contains(topic) {
            return Err(BrokerError::TopicNotFound(topic.to_string()));
        }

        // Subscribing an already subscribed endpoint returns the existing subscription
        if let Some(existing) = state
            .subscriptions
            .iter()
            .find(|subscription| subscription.topic == *topic && subscription.endpoint == *endpoint)
        {
            return Ok(existing.id.clone());
        }

        let id = SubscriptionId::new(format!("{topic}:{}", Uuid::new_v4()));
        state.subscriptions.push(Subscription {
            id: id.clone(),
            topic: topic.clone(),
            endpoint: endpoint.clone(),
        });

        Ok(id)
    }

    async fn receive_messages(
        &self,
        locator: &QueueLocator,
        request: &ReceiveRequest,
    ) -> BrokerResult<Vec<ReceivedMessage>> {
        self.record(Operation::ReceiveMessages)?;

        let deadline = Instant::now() + request.wait_time.min(MAX_WAIT_TIME);
        let limit = usize::try_from(request.batch_size()).unwrap_or(1);
        let visibility_timeout = request.visibility_timeout.unwrap_or(self.visibility_timeout);

        loop {
            let notified = self.delivered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let now = Instant::now();
                let mut state = self.state();
                let queue = state.queue_mut(locator)?;

                let batch = queue.take_visible(now, limit, visibility_timeout);
                if !batch.is_empty() || now >= deadline {
                    return Ok(batch);
                }

                queue
                    .next_visible_at()
                    .map_or(deadline, |visible_at| visible_at.min(deadline))
            };

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        locator: &QueueLocator,
        receipt: &ReceiptToken,
    ) -> BrokerResult<()> {
        self.record(Operation::DeleteMessage)?;

        let now = Instant::now();
        let mut state = self.state();
        let queue = state.queue_mut(locator)?;
        queue.purge_expired(now);

        let position = queue
            .messages
            .iter()
            .position(|message| message.receipt.as_ref() == Some(receipt))
            .ok_or_else(|| BrokerError::InvalidReceipt(receipt.to_string()))?;
        queue.messages.remove(position);

        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

use async_trait::async_trait;

use crate::error::BrokerResult;
use crate::policy::PolicyDocument;
use crate::types::{
    QueueAttributes, QueueIdentifier, QueueLocator, ReceiptToken, ReceiveRequest, ReceivedMessage,
    SubscriptionId, TopicIdentifier,
};

/// Primitives a managed broker offers for provisioning and consuming a queue
///
/// Implementations are constructed once and shared behind an `Arc` for the
/// lifetime of the process.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Creates the queue, or returns the existing locator when a queue with the
    /// same name and attributes already exists
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> BrokerResult<QueueLocator>;

    /// Resolves the resource identifier of the queue behind `locator`
    async fn queue_identifier(&self, locator: &QueueLocator) -> BrokerResult<QueueIdentifier>;

    /// Replaces the access policy of the queue behind `locator`
    async fn set_queue_policy(
        &self,
        locator: &QueueLocator,
        policy: &PolicyDocument,
    ) -> BrokerResult<()>;

    /// Registers the queue as a delivery endpoint of `topic`
    async fn subscribe(
        &self,
        topic: &TopicIdentifier,
        endpoint: &QueueIdentifier,
    ) -> BrokerResult<SubscriptionId>;

    /// Requests a batch of pending deliveries, blocking up to the request's wait time
    async fn receive_messages(
        &self,
        locator: &QueueLocator,
        request: &ReceiveRequest,
    ) -> BrokerResult<Vec<ReceivedMessage>>;

    /// Removes the delivery identified by `receipt` from the queue
    async fn delete_message(&self, locator: &QueueLocator, receipt: &ReceiptToken)
        -> BrokerResult<()>;
}

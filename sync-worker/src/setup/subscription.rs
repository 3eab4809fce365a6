use std::sync::Arc;

use queue_broker::{Broker, SubscriptionId, TopicIdentifier};
use tracing::{info, instrument};

use super::policy_binder::BoundQueue;
use crate::types::SetupError;

/// Registers queues as delivery endpoints of topics
pub struct SubscriptionRegistrar {
    broker: Arc<dyn Broker>,
}

impl SubscriptionRegistrar {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Subscribes the bound queue to `topic` using the queue protocol
    ///
    /// # Errors
    ///
    /// Returns `SetupError::TopicMismatch` if the queue policy admits a different
    /// topic, and `SetupError::Subscription` if the broker call fails
    #[instrument(skip(self, queue), fields(queue = %queue.queue().name))]
    pub async fn subscribe(
        &self,
        topic: &TopicIdentifier,
        queue: &BoundQueue,
    ) -> Result<SubscriptionId, SetupError> {
        if queue.source() != topic {
            return Err(SetupError::TopicMismatch {
                queue: queue.queue().name.clone(),
                bound: queue.source().clone(),
                requested: topic.clone(),
            });
        }

        let subscription = self
            .broker
            .subscribe(topic, &queue.queue().identifier)
            .await
            .map_err(|source| SetupError::Subscription {
                queue: queue.queue().name.clone(),
                topic: topic.clone(),
                source,
            })?;

        info!(%subscription, "✅ Queue subscribed to topic");

        Ok(subscription)
    }
}

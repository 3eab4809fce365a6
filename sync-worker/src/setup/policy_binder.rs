use std::sync::Arc;

use queue_broker::{Broker, PolicyDocument, QueueLocator, TopicIdentifier};
use tracing::{info, instrument};

use super::provisioner::ProvisionedQueue;
use crate::types::SetupError;

/// A provisioned queue whose policy admits deliveries from one topic
///
/// Only [`PolicyBinder`] produces this type, so holding one proves the policy
/// is in place before anything is subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQueue {
    queue: ProvisionedQueue,
    source: TopicIdentifier,
}

impl BoundQueue {
    /// The provisioned queue behind the binding
    #[must_use]
    pub const fn queue(&self) -> &ProvisionedQueue {
        &self.queue
    }

    /// Locator the consumer polls
    #[must_use]
    pub const fn locator(&self) -> &QueueLocator {
        &self.queue.locator
    }

    /// Topic the queue policy admits
    #[must_use]
    pub const fn source(&self) -> &TopicIdentifier {
        &self.source
    }
}

/// Attaches delivery policies to queues
pub struct PolicyBinder {
    broker: Arc<dyn Broker>,
}

impl PolicyBinder {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Replaces the queue's policy with one that only lets `source` deliver to it
    ///
    /// # Errors
    ///
    /// Returns `SetupError::PolicyBinding` if the broker rejects the attribute update
    #[instrument(skip(self, queue), fields(queue = %queue.name))]
    pub async fn attach_delivery_policy(
        &self,
        queue: ProvisionedQueue,
        source: &TopicIdentifier,
    ) -> Result<BoundQueue, SetupError> {
        let policy = PolicyDocument::allow_delivery_from(&queue.identifier, source);

        if let Err(e) = self.broker.set_queue_policy(&queue.locator, &policy).await {
            return Err(SetupError::PolicyBinding {
                queue: queue.name,
                topic: source.clone(),
                source: e,
            });
        }

        info!(%source, "✅ Delivery policy attached");

        Ok(BoundQueue {
            queue,
            source: source.clone(),
        })
    }
}

//! Setup pipeline run once at startup, before polling
//!
//! Provisioner, policy binder and subscription registrar run strictly in that
//! order. Any failure aborts the pipeline.

pub mod policy_binder;
pub mod provisioner;
pub mod subscription;

use std::sync::Arc;

use queue_broker::{Broker, QueueAttributes, SubscriptionId, TopicIdentifier};

pub use self::policy_binder::{BoundQueue, PolicyBinder};
pub use self::provisioner::{ProvisionedQueue, QueueProvisioner};
pub use self::subscription::SubscriptionRegistrar;
use crate::types::SetupError;

/// A queue ready to receive messages from its topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Queue whose policy admits the topic
    pub queue: BoundQueue,
    /// Subscription delivering the topic's messages to the queue
    pub subscription: SubscriptionId,
}

/// Provisions the queue, binds its delivery policy to `topic` and subscribes it
///
/// # Errors
///
/// Returns the `SetupError` of the first step that fails
pub async fn provision(
    broker: Arc<dyn Broker>,
    queue_name: &str,
    attributes: &QueueAttributes,
    topic: &TopicIdentifier,
) -> Result<Pipeline, SetupError> {
    let queue = QueueProvisioner::new(Arc::clone(&broker))
        .ensure_queue(queue_name, attributes)
        .await?;

    let queue = PolicyBinder::new(Arc::clone(&broker))
        .attach_delivery_policy(queue, topic)
        .await?;

    let subscription = SubscriptionRegistrar::new(broker)
        .subscribe(topic, &queue)
        .await?;

    Ok(Pipeline {
        queue,
        subscription,
    })
}

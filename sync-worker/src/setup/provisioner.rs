use std::sync::Arc;

use queue_broker::{Broker, BrokerError, QueueAttributes, QueueIdentifier, QueueLocator};
use tracing::{info, instrument};

use crate::types::SetupError;

/// A queue that exists, with both of its handles resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedQueue {
    /// Queue name
    pub name: String,
    /// Locator used to receive from and delete on the queue
    pub locator: QueueLocator,
    /// Identifier used for policy and subscription binding
    pub identifier: QueueIdentifier,
}

/// Ensures the worker's queue exists
pub struct QueueProvisioner {
    broker: Arc<dyn Broker>,
}

impl QueueProvisioner {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Creates the queue if absent and resolves its locator and identifier
    ///
    /// Calling this again with the same name and attributes returns the same
    /// queue without creating a new one.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::Provisioning` if creation or the identifier lookup fails
    #[instrument(skip(self, attributes))]
    pub async fn ensure_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<ProvisionedQueue, SetupError> {
        let provisioning_failed = |source: BrokerError| SetupError::Provisioning {
            queue: name.to_string(),
            source,
        };

        let locator = self
            .broker
            .create_queue(name, attributes)
            .await
            .map_err(provisioning_failed)?;

        // Creation only returns the locator, the identifier needs a second lookup
        let identifier = self
            .broker
            .queue_identifier(&locator)
            .await
            .map_err(provisioning_failed)?;

        info!(%locator, %identifier, "✅ Queue provisioned");

        Ok(ProvisionedQueue {
            name: name.to_string(),
            locator,
            identifier,
        })
    }
}

//! Error types for configuration and the setup pipeline

use queue_broker::{BrokerError, TopicIdentifier};
use thiserror::Error;

/// Error reading the worker configuration from the environment
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    /// A variable is set but cannot be used
    #[error("{name} environment variable is invalid: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// What is wrong with the value
        reason: String,
    },
}

/// Error raised by one of the setup steps that run before polling starts
///
/// Every variant is fatal: the worker must not poll a queue whose pipeline is
/// incomplete.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Creating the queue or resolving its identifier failed
    #[error("queue provisioning failed for `{queue}`")]
    Provisioning {
        /// Queue name
        queue: String,
        /// Underlying broker failure
        #[source]
        source: BrokerError,
    },

    /// Attaching the delivery policy to the queue failed
    #[error("policy binding failed for queue `{queue}` and topic `{topic}`")]
    PolicyBinding {
        /// Queue name
        queue: String,
        /// Topic the policy admits
        topic: TopicIdentifier,
        /// Underlying broker failure
        #[source]
        source: BrokerError,
    },

    /// Registering the queue as a topic endpoint failed
    #[error("subscription of queue `{queue}` to topic `{topic}` failed")]
    Subscription {
        /// Queue name
        queue: String,
        /// Topic being subscribed to
        topic: TopicIdentifier,
        /// Underlying broker failure
        #[source]
        source: BrokerError,
    },

    /// The queue's policy admits a different topic than the one being subscribed
    #[error("queue `{queue}` only accepts deliveries from `{bound}`, refusing to subscribe it to `{requested}`")]
    TopicMismatch {
        /// Queue name
        queue: String,
        /// Topic the policy admits
        bound: TopicIdentifier,
        /// Topic the subscription was requested for
        requested: TopicIdentifier,
    },
}

impl SetupError {
    /// Name of the setup step that failed
    #[must_use]
    pub const fn step(&self) -> &'static str {
        match self {
            Self::Provisioning { .. } => "queue provisioning",
            Self::PolicyBinding { .. } => "policy binding",
            Self::Subscription { .. } | Self::TopicMismatch { .. } => "subscription",
        }
    }
}

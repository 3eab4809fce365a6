use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound the broker accepts for a single receive batch
pub const MAX_BATCH_SIZE: i32 = 10;

/// Upper bound the broker accepts for a long-poll wait
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw value
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the raw value
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Addressable endpoint used to send to and receive from a queue (the queue URL)
    QueueLocator
);

string_id!(
    /// Resource handle used for policy and subscription binding (the queue ARN)
    QueueIdentifier
);

string_id!(
    /// Resource handle of a publish/subscribe topic (the topic ARN)
    TopicIdentifier
);

string_id!(
    /// Resource handle of a topic to queue subscription
    SubscriptionId
);

string_id!(
    /// Single-use handle proving possession of one specific delivery
    ReceiptToken
);

/// Attributes a queue is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAttributes {
    /// How long an unconsumed message is kept before it expires
    pub retention: Duration,
    /// Default long-poll wait applied to receives on this queue
    pub wait_time: Duration,
}

impl QueueAttributes {
    /// Retention period in whole seconds, as the broker expects it
    #[must_use]
    pub const fn retention_seconds(&self) -> u64 {
        self.retention.as_secs()
    }

    /// Long-poll wait in whole seconds, as the broker expects it
    #[must_use]
    pub const fn wait_time_seconds(&self) -> u64 {
        self.wait_time.as_secs()
    }
}

/// Parameters of a single batched receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// Maximum number of messages to return, between 1 and [`MAX_BATCH_SIZE`]
    pub max_messages: i32,
    /// How long the call may block waiting for at least one message
    pub wait_time: Duration,
    /// Overrides the queue's visibility timeout for the returned deliveries
    pub visibility_timeout: Option<Duration>,
}

impl ReceiveRequest {
    /// Batch size clamped to what the broker accepts
    #[must_use]
    pub fn batch_size(&self) -> i32 {
        self.max_messages.clamp(1, MAX_BATCH_SIZE)
    }

    /// Wait time in whole seconds, clamped to what the broker accepts
    #[must_use]
    pub fn wait_time_seconds(&self) -> i32 {
        let secs = self.wait_time.min(MAX_WAIT_TIME).as_secs();
        i32::try_from(secs).unwrap_or(i32::MAX)
    }

    /// Visibility timeout in whole seconds, if overridden
    #[must_use]
    pub fn visibility_timeout_seconds(&self) -> Option<i32> {
        self.visibility_timeout
            .map(|timeout| i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX))
    }
}

impl Default for ReceiveRequest {
    fn default() -> Self {
        Self {
            max_messages: MAX_BATCH_SIZE,
            wait_time: MAX_WAIT_TIME,
            visibility_timeout: None,
        }
    }
}

/// One delivery of a message, as handed out by a receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Broker-assigned message id, stable across redeliveries
    pub message_id: String,
    /// Opaque payload
    pub body: String,
    /// Token required to delete this delivery
    pub receipt: ReceiptToken,
    /// Topic the message was published to, when it arrived through a subscription
    pub source: Option<TopicIdentifier>,
}

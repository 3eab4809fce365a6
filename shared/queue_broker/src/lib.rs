//! Message broker access for the organization sync worker
//!
//! This crate provides the broker capability interface the worker is written
//! against, its AWS SQS/SNS implementation, and the queue access policy model.

#![deny(missing_docs)]

/// Broker capability interface
pub mod client;
/// Error types for broker operations
pub mod error;
/// Simulated in-memory broker
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
/// Queue access policy documents
pub mod policy;
/// AWS SQS and SNS implementation
pub mod sqs_sns;
/// Common types for broker operations
pub mod types;

pub use client::Broker;
pub use error::{BrokerError, BrokerResult};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{InMemoryBroker, Operation};
pub use policy::PolicyDocument;
pub use sqs_sns::AwsBroker;
pub use types::{
    QueueAttributes, QueueIdentifier, QueueLocator, ReceiptToken, ReceiveRequest, ReceivedMessage,
    SubscriptionId, TopicIdentifier,
};

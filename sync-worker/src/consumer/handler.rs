use async_trait::async_trait;
use queue_broker::ReceivedMessage;
use thiserror::Error;
use tracing::info;

/// Message-level failure; the message is left on the queue for redelivery
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler looked at the message and refused it
    #[error("message rejected: {0}")]
    Rejected(String),

    /// Anything else that went wrong while handling the message
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Processes the body of one received message
///
/// Deliveries are at-least-once: a message can be handed out again after a
/// failed delete, after its visibility timeout, or to another worker instance
/// consuming the same queue. Implementations must be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message; `Ok` lets the consumer delete it
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError>;
}

/// Logs each message body and accepts it
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &ReceivedMessage) -> Result<(), HandlerError> {
        info!(
            message_id = %message.message_id,
            source = ?message.source.as_ref().map(ToString::to_string),
            body = %message.body,
            "Message received"
        );
        Ok(())
    }
}

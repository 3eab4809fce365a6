use aws_sdk_sns::operation::subscribe::SubscribeError;
use aws_sdk_sqs::error::SdkError;
use aws_sdk_sqs::operation::create_queue::CreateQueueError;
use aws_sdk_sqs::operation::delete_message::DeleteMessageError;
use aws_sdk_sqs::operation::get_queue_attributes::GetQueueAttributesError;
use aws_sdk_sqs::operation::receive_message::ReceiveMessageError;
use aws_sdk_sqs::operation::set_queue_attributes::SetQueueAttributesError;
use thiserror::Error;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Error types for broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Error creating a queue in SQS
    #[error("Failed to create queue in SQS")]
    CreateQueue(#[from] SdkError<CreateQueueError>),

    /// Error reading queue attributes from SQS
    #[error("Failed to get queue attributes from SQS")]
    GetQueueAttributes(#[from] SdkError<GetQueueAttributesError>),

    /// Error writing queue attributes to SQS
    #[error("Failed to set queue attributes in SQS")]
    SetQueueAttributes(#[from] SdkError<SetQueueAttributesError>),

    /// Error subscribing a queue to an SNS topic
    #[error("Failed to subscribe queue to SNS topic")]
    Subscribe(#[from] SdkError<SubscribeError>),

    /// Error receiving messages from SQS
    #[error("Failed to receive messages from SQS")]
    ReceiveMessage(#[from] SdkError<ReceiveMessageError>),

    /// Error deleting message from SQS
    #[error("Failed to delete message from SQS")]
    DeleteMessage(#[from] SdkError<DeleteMessageError>),

    /// A successful response did not carry a field the caller depends on
    #[error("Broker response is missing {0}")]
    MissingField(&'static str),

    /// The queue exists with attributes that differ from the requested ones
    #[error("Queue {0} already exists with different attributes")]
    QueueAlreadyExists(String),

    /// No queue behind the given locator
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// No topic behind the given identifier
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// The queue's access policy does not allow the attempted delivery
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The receipt token is unknown, expired or already used
    #[error("Receipt token is invalid or expired: {0}")]
    InvalidReceipt(String),

    /// The broker could not be reached or is temporarily failing
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Error serializing a policy document to JSON
    #[error("Failed to serialize policy document: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BrokerError {
    /// Checks if this error represents an upstream (5xx) error
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        match self {
            Self::CreateQueue(sdk_err) => Self::check_sdk_error_status(sdk_err),
            Self::GetQueueAttributes(sdk_err) => Self::check_sdk_error_status(sdk_err),
            Self::SetQueueAttributes(sdk_err) => Self::check_sdk_error_status(sdk_err),
            Self::Subscribe(sdk_err) => Self::check_sdk_error_status(sdk_err),
            Self::ReceiveMessage(sdk_err) => Self::check_sdk_error_status(sdk_err),
            Self::DeleteMessage(sdk_err) => Self::check_sdk_error_status(sdk_err),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }

    fn check_sdk_error_status<E>(sdk_err: &SdkError<E>) -> bool {
        if let SdkError::ServiceError(err) = sdk_err {
            let raw = err.raw();
            let status = raw.status();
            return status.as_u16() >= 500;
        }
        false
    }
}

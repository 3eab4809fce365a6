//! SQS queue with SNS topic subscriptions
//!
//! This module implements [`Broker`] on top of AWS SQS and SNS.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::types::{Message, QueueAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use serde::Deserialize;

use crate::client::Broker;
use crate::error::{BrokerError, BrokerResult};
use crate::policy::PolicyDocument;
use crate::types::{
    QueueAttributes, QueueIdentifier, QueueLocator, ReceiptToken, ReceiveRequest, ReceivedMessage,
    SubscriptionId, TopicIdentifier,
};

/// Subscription protocol for queue endpoints
const SQS_PROTOCOL: &str = "sqs";

/// Broker backed by AWS SQS and SNS
pub struct AwsBroker {
    sqs_client: Arc<SqsClient>,
    sns_client: Arc<SnsClient>,
}

impl AwsBroker {
    /// Creates a new AWS broker
    ///
    /// # Arguments
    ///
    /// * `sqs_client` - Pre-configured SQS client
    /// * `sns_client` - Pre-configured SNS client
    #[must_use]
    pub const fn new(sqs_client: Arc<SqsClient>, sns_client: Arc<SnsClient>) -> Self {
        Self {
            sqs_client,
            sns_client,
        }
    }

    /// Creates both clients from one shared SDK configuration
    #[must_use]
    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(
            Arc::new(SqsClient::new(config)),
            Arc::new(SnsClient::new(config)),
        )
    }

    fn parse_message(message: &Message) -> Option<ReceivedMessage> {
        let Some(message_id) = message.message_id() else {
            tracing::error!("Received message without a message id, skipping");
            return None;
        };
        let Some(receipt_handle) = message.receipt_handle() else {
            tracing::error!(
                message_id,
                "Received message without a receipt handle, skipping"
            );
            return None;
        };
        let Some(raw_body) = message.body() else {
            tracing::error!(message_id, "Received message without a body, skipping");
            return None;
        };

        let (body, source) = match NotificationEnvelope::parse(raw_body) {
            Some(envelope) => (envelope.message, Some(TopicIdentifier::new(envelope.topic_arn))),
            None => (raw_body.to_string(), None),
        };

        Some(ReceivedMessage {
            message_id: message_id.to_string(),
            body,
            receipt: ReceiptToken::new(receipt_handle),
            source,
        })
    }
}

/// Wrapper SNS puts around a message when delivering it to a queue
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NotificationEnvelope {
    #[serde(rename = "Type")]
    kind: String,
    topic_arn: String,
    message: String,
}

impl NotificationEnvelope {
    /// Returns the envelope if `body` is an SNS notification, `None` for raw bodies
    fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<Self>(body)
            .ok()
            .filter(|envelope| envelope.kind == "Notification")
    }
}

#[async_trait]
impl Broker for AwsBroker {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> BrokerResult<QueueLocator> {
        let result = self
            .sqs_client
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::MessageRetentionPeriod,
                attributes.retention_seconds().to_string(),
            )
            .attributes(
                QueueAttributeName::ReceiveMessageWaitTimeSeconds,
                attributes.wait_time_seconds().to_string(),
            )
            .send()
            .await?;

        result
            .queue_url()
            .map(QueueLocator::from)
            .ok_or(BrokerError::MissingField("QueueUrl"))
    }

    async fn queue_identifier(&self, locator: &QueueLocator) -> BrokerResult<QueueIdentifier> {
        let result = self
            .sqs_client
            .get_queue_attributes()
            .queue_url(locator.as_str())
            .attribute_names(QueueAttributeName::QueueArn)
            .send()
            .await?;

        result
            .attributes()
            .and_then(|attributes| attributes.get(&QueueAttributeName::QueueArn))
            .map(|arn| QueueIdentifier::new(arn.as_str()))
            .ok_or(BrokerError::MissingField("QueueArn"))
    }

    async fn set_queue_policy(
        &self,
        locator: &QueueLocator,
        policy: &PolicyDocument,
    ) -> BrokerResult<()> {
        self.sqs_client
            .set_queue_attributes()
            .queue_url(locator.as_str())
            .attributes(QueueAttributeName::Policy, policy.to_json()?)
            .send()
            .await?;

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &TopicIdentifier,
        endpoint: &QueueIdentifier,
    ) -> BrokerResult<SubscriptionId> {
        let result = self
            .sns_client
            .subscribe()
            .topic_arn(topic.as_str())
            .protocol(SQS_PROTOCOL)
            .endpoint(endpoint.as_str())
            .return_subscription_arn(true)
            .send()
            .await?;

        result
            .subscription_arn()
            .map(SubscriptionId::from)
            .ok_or(BrokerError::MissingField("SubscriptionArn"))
    }

    async fn receive_messages(
        &self,
        locator: &QueueLocator,
        request: &ReceiveRequest,
    ) -> BrokerResult<Vec<ReceivedMessage>> {
        let result = self
            .sqs_client
            .receive_message()
            .queue_url(locator.as_str())
            .max_number_of_messages(request.batch_size())
            .wait_time_seconds(request.wait_time_seconds())
            .set_visibility_timeout(request.visibility_timeout_seconds())
            .send()
            .await?;

        Ok(result
            .messages()
            .iter()
            .filter_map(Self::parse_message)
            .collect())
    }

    async fn delete_message(
        &self,
        locator: &QueueLocator,
        receipt: &ReceiptToken,
    ) -> BrokerResult<()> {
        self.sqs_client
            .delete_message()
            .queue_url(locator.as_str())
            .receipt_handle(receipt.as_str())
            .send()
            .await?;

        Ok(())
    }
}

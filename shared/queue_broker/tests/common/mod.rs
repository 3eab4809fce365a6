//! LocalStack test setup utilities

#![allow(dead_code)]

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use queue_broker::{AwsBroker, TopicIdentifier};
use uuid::Uuid;

/// Test context that provides SQS/SNS clients, a unique queue name and a topic
pub struct BrokerTestContext {
    pub sqs_client: Arc<SqsClient>,
    pub sns_client: Arc<SnsClient>,
    pub broker: AwsBroker,
    pub queue_name: String,
    pub topic: TopicIdentifier,
}

impl BrokerTestContext {
    /// Creates a new test context with a unique queue name and a fresh topic
    pub async fn new(test_name: &str) -> Self {
        let queue_name = format!("{}-{}", test_name, Uuid::new_v4());

        // Setup LocalStack client with hardcoded credentials for CI
        let credentials = Credentials::from_keys(
            "test", // AWS_ACCESS_KEY_ID
            "test", // AWS_SECRET_ACCESS_KEY
            None,   // no session token
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url("http://localhost:4566")
            .region(aws_config::Region::new("us-east-1"))
            .credentials_provider(credentials)
            .load()
            .await;

        let sqs_client = Arc::new(SqsClient::new(&config));
        let sns_client = Arc::new(SnsClient::new(&config));

        let topic = sns_client
            .create_topic()
            .name(format!("{test_name}-{}", Uuid::new_v4()))
            .send()
            .await
            .expect("Failed to create test topic")
            .topic_arn()
            .expect("Topic ARN not returned")
            .to_string();

        Self {
            broker: AwsBroker::new(sqs_client.clone(), sns_client.clone()),
            sqs_client,
            sns_client,
            queue_name,
            topic: TopicIdentifier::new(topic),
        }
    }
}

impl Drop for BrokerTestContext {
    fn drop(&mut self) {
        // Clean up the queue and topic
        let sqs_client = self.sqs_client.clone();
        let sns_client = self.sns_client.clone();
        let queue_name = self.queue_name.clone();
        let topic = self.topic.to_string();

        let handle = tokio::runtime::Handle::try_current();
        if let Ok(handle) = handle {
            handle.spawn(async move {
                let lookup = sqs_client.get_queue_url().queue_name(&queue_name);
                if let Ok(output) = lookup.send().await {
                    if let Some(queue_url) = output.queue_url() {
                        let _ = sqs_client.delete_queue().queue_url(queue_url).send().await;
                    }
                }
                let _ = sns_client.delete_topic().topic_arn(topic).send().await;
            });
        }
    }
}

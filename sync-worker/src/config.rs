//! Worker configuration read from environment variables

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use queue_broker::types::{MAX_BATCH_SIZE, MAX_WAIT_TIME};
use queue_broker::{QueueAttributes, ReceiveRequest, TopicIdentifier};

use crate::consumer::{BackoffConfig, PollConfig};
use crate::types::{ConfigError, Environment};

/// Queue the worker provisions when `QUEUE_NAME` is not set
pub const DEFAULT_QUEUE_NAME: &str = "sync-organization-sqs";

/// Topic used against `LocalStack` when `SNS_TOPIC_ARN` is not set
const DEVELOPMENT_TOPIC_ARN: &str = "arn:aws:sns:us-east-1:000000000000:organization-events";

/// Name reported by the static credentials provider
const CREDENTIALS_PROVIDER_NAME: &str = "environment";

/// Connection settings for AWS
#[derive(Debug, Clone)]
pub struct AwsSettings {
    /// Region identifier
    pub region: String,
    /// Static access credentials
    pub credentials: Credentials,
    /// Endpoint override, e.g. `LocalStack`
    pub endpoint_url: Option<String>,
}

/// Complete worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub aws: AwsSettings,
    /// Topic whose messages the queue receives
    pub topic: TopicIdentifier,
    pub queue_name: String,
    pub queue_attributes: QueueAttributes,
    pub poll: PollConfig,
    /// Port of the health check server
    pub health_port: u16,
}

impl WorkerConfig {
    /// Reads the configuration for `env` from environment variables
    ///
    /// Region, credentials and topic are required in production and staging.
    /// Development falls back to `LocalStack` values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for absent required variables and
    /// `ConfigError::Invalid` for values that do not parse or are out of range
    pub fn from_environment(env: &Environment) -> Result<Self, ConfigError> {
        let development = !env.is_deployed();

        let region = required(env, "AWS_REGION", "us-east-1")?;
        let access_key_id = required(env, "AWS_ACCESS_KEY_ID", "test")?;
        let secret_access_key = required(env, "AWS_SECRET_ACCESS_KEY", "test")?;
        let session_token = var("AWS_SESSION_TOKEN");
        let topic = required(env, "SNS_TOPIC_ARN", DEVELOPMENT_TOPIC_ARN)?;

        let endpoint_url = var("AWS_ENDPOINT_URL").or_else(|| {
            env.override_aws_endpoint_url()
                .filter(|_| development)
                .map(ToString::to_string)
        });

        let retention_seconds: u64 = parsed("QUEUE_RETENTION_SECONDS", 86_400)?;
        // Bounds accepted by SQS for MessageRetentionPeriod
        if !(60..=1_209_600).contains(&retention_seconds) {
            return Err(invalid(
                "QUEUE_RETENTION_SECONDS",
                "must be between 60 and 1209600",
            ));
        }

        let wait_time_seconds: u64 = parsed("QUEUE_WAIT_TIME_SECONDS", 20)?;
        if wait_time_seconds > MAX_WAIT_TIME.as_secs() {
            return Err(invalid("QUEUE_WAIT_TIME_SECONDS", "must be at most 20"));
        }

        let max_messages: i32 = parsed("POLL_MAX_MESSAGES", MAX_BATCH_SIZE)?;
        if !(1..=MAX_BATCH_SIZE).contains(&max_messages) {
            return Err(invalid("POLL_MAX_MESSAGES", "must be between 1 and 10"));
        }

        let visibility_timeout = var("POLL_VISIBILITY_TIMEOUT_SECONDS")
            .map(|value| parse_value::<u64>("POLL_VISIBILITY_TIMEOUT_SECONDS", &value))
            .transpose()?
            .map(Duration::from_secs);

        let backoff = BackoffConfig {
            initial: Duration::from_millis(parsed("POLL_BACKOFF_INITIAL_MS", 100)?),
            max: Duration::from_millis(parsed("POLL_BACKOFF_MAX_MS", 30_000)?),
        };
        if backoff.initial.is_zero() || backoff.initial > backoff.max {
            return Err(invalid(
                "POLL_BACKOFF_INITIAL_MS",
                "must be positive and not above POLL_BACKOFF_MAX_MS",
            ));
        }

        let wait_time = Duration::from_secs(wait_time_seconds);

        Ok(Self {
            aws: AwsSettings {
                region,
                credentials: Credentials::new(
                    access_key_id,
                    secret_access_key,
                    session_token,
                    None,
                    CREDENTIALS_PROVIDER_NAME,
                ),
                endpoint_url,
            },
            topic: TopicIdentifier::new(topic),
            queue_name: var("QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string()),
            queue_attributes: QueueAttributes {
                retention: Duration::from_secs(retention_seconds),
                wait_time,
            },
            poll: PollConfig {
                receive: ReceiveRequest {
                    max_messages,
                    wait_time,
                    visibility_timeout,
                },
                interval: Duration::from_millis(parsed("POLL_INTERVAL_MS", 1_000)?),
                backoff,
            },
            health_port: parsed("PORT", 8001)?,
        })
    }

    /// AWS configuration with retry and timeout settings
    pub async fn sdk_config(&self) -> aws_config::SdkConfig {
        let retry_config = RetryConfig::standard()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(50));

        // Must stay above the long-poll wait
        let timeout_config = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(30))
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.aws.region.clone()))
            .credentials_provider(self.aws.credentials.clone())
            .retry_config(retry_config)
            .timeout_config(timeout_config);

        if let Some(endpoint_url) = &self.aws.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        loader.load().await
    }
}

/// Reads a variable, treating empty values as unset
fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads a variable that must be set outside development
fn required(
    env: &Environment,
    name: &'static str,
    development_default: &str,
) -> Result<String, ConfigError> {
    match var(name) {
        Some(value) => Ok(value),
        None if !env.is_deployed() => Ok(development_default.to_string()),
        None => Err(ConfigError::Missing(name)),
    }
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    var(name).map_or(Ok(default), |value| parse_value(name, &value))
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: format!("`{value}`: {e}"),
    })
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

//! Queue access policy documents
//!
//! The queue only accepts deliveries that a policy statement allows. The
//! document built here grants `SQS:SendMessage` to any principal, constrained by
//! an `ArnEquals` condition on the delivering resource, so the broker (not the
//! caller's identity) enforces which topic may deliver.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{QueueIdentifier, TopicIdentifier};

/// Policy language version understood by the broker
pub const POLICY_VERSION: &str = "2012-10-17";

/// Action a topic needs to deliver into a queue
pub const SEND_MESSAGE_ACTION: &str = "SQS:SendMessage";

/// Condition key carrying the delivering resource's identifier
pub const SOURCE_ARN_KEY: &str = "aws:SourceArn";

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Grants the statement's actions
    Allow,
    /// Denies the statement's actions
    Deny,
}

/// Condition block of a policy statement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Identifier equality checks, keyed by condition key
    #[serde(rename = "ArnEquals", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arn_equals: BTreeMap<String, String>,
}

/// A single statement of a policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    /// Allow or deny
    pub effect: Effect,
    /// Principal the statement applies to, `*` for anyone
    pub principal: String,
    /// Actions covered by the statement
    pub action: Vec<String>,
    /// Resource the statement is scoped to
    pub resource: String,
    /// Additional constraints on the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Statement {
    fn covers_action(&self, action: &str) -> bool {
        self.action
            .iter()
            .any(|candidate| candidate == "*" || candidate.eq_ignore_ascii_case(action))
    }

    fn matches_source(&self, source: &str) -> bool {
        self.condition.as_ref().is_none_or(|condition| {
            condition
                .arn_equals
                .iter()
                .all(|(key, expected)| key != SOURCE_ARN_KEY || expected == source)
        })
    }
}

/// Access policy attached to a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    /// Policy language version
    pub version: String,
    /// Statements evaluated for every request
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Builds a document that lets only `source` deliver messages into `queue`
    #[must_use]
    pub fn allow_delivery_from(queue: &QueueIdentifier, source: &TopicIdentifier) -> Self {
        let mut arn_equals = BTreeMap::new();
        arn_equals.insert(SOURCE_ARN_KEY.to_string(), source.to_string());

        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                effect: Effect::Allow,
                principal: "*".to_string(),
                action: vec![SEND_MESSAGE_ACTION.to_string()],
                resource: queue.to_string(),
                condition: Some(Condition { arn_equals }),
            }],
        }
    }

    /// Serializes the document into the JSON the broker stores
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a document previously produced by [`Self::to_json`] or by the broker
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the input is not a policy document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Whether a delivery from `source` into `queue` is permitted
    ///
    /// Any matching deny statement wins, otherwise at least one allow statement
    /// must match.
    #[must_use]
    pub fn permits_delivery(&self, queue: &QueueIdentifier, source: &TopicIdentifier) -> bool {
        let applicable = |statement: &&Statement| {
            statement.principal == "*"
                && statement.covers_action(SEND_MESSAGE_ACTION)
                && statement.resource == queue.as_str()
                && statement.matches_source(source.as_str())
        };

        let denied = self
            .statement
            .iter()
            .filter(applicable)
            .any(|statement| statement.effect == Effect::Deny);

        !denied
            && self
                .statement
                .iter()
                .filter(applicable)
                .any(|statement| statement.effect == Effect::Allow)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const QUEUE: &str = "arn:aws:sqs:us-east-1:000000000000:sync-organization-sqs";
    const TOPIC: &str = "arn:aws:sns:us-east-1:000000000000:organization-events";

    #[test]
    fn test_document_wire_format() {
        let document = PolicyDocument::allow_delivery_from(
            &QueueIdentifier::from(QUEUE),
            &TopicIdentifier::from(TOPIC),
        );

        let value: serde_json::Value =
            serde_json::from_str(&document.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": ["SQS:SendMessage"],
                    "Resource": QUEUE,
                    "Condition": { "ArnEquals": { "aws:SourceArn": TOPIC } }
                }]
            })
        );
    }

    #[test]
    fn test_permits_only_matching_source() {
        let queue = QueueIdentifier::from(QUEUE);
        let document = PolicyDocument::allow_delivery_from(&queue, &TopicIdentifier::from(TOPIC));

        assert!(document.permits_delivery(&queue, &TopicIdentifier::from(TOPIC)));
        assert!(!document.permits_delivery(
            &queue,
            &TopicIdentifier::from("arn:aws:sns:us-east-1:000000000000:other-topic")
        ));
    }

    #[test]
    fn test_scoped_to_queue_resource() {
        let document = PolicyDocument::allow_delivery_from(
            &QueueIdentifier::from(QUEUE),
            &TopicIdentifier::from(TOPIC),
        );

        assert!(!document.permits_delivery(
            &QueueIdentifier::from("arn:aws:sqs:us-east-1:000000000000:another-queue"),
            &TopicIdentifier::from(TOPIC)
        ));
    }

    #[test]
    fn test_deny_statement_wins() {
        let queue = QueueIdentifier::from(QUEUE);
        let topic = TopicIdentifier::from(TOPIC);
        let mut document = PolicyDocument::allow_delivery_from(&queue, &topic);
        document.statement.push(Statement {
            effect: Effect::Deny,
            principal: "*".to_string(),
            action: vec!["*".to_string()],
            resource: QUEUE.to_string(),
            condition: None,
        });

        assert!(!document.permits_delivery(&queue, &topic));
    }

    #[test]
    fn test_parses_broker_stored_json() {
        let stored = format!(
            r#"{{"Version":"2012-10-17","Statement":[{{"Effect":"Allow","Principal":"*","Action":["sqs:sendmessage"],"Resource":"{QUEUE}","Condition":{{"ArnEquals":{{"aws:SourceArn":"{TOPIC}"}}}}}}]}}"#
        );

        let document = PolicyDocument::from_json(&stored).unwrap();

        let queue = QueueIdentifier::from(QUEUE);
        assert!(document.permits_delivery(&queue, &TopicIdentifier::from(TOPIC)));
    }
}

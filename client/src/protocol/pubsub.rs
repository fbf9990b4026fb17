use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::protocol::auth::TokenProvider;
use crate::protocol::error::SdmClientError;
use crate::protocol::traits::DeviceTraits;

pub const PUBSUB_BASE_URL: &str = "https://pubsub.googleapis.com";

/// How long a negatively acknowledged message stays out of the pull stream.
pub const DEFAULT_NACK_DEADLINE: Duration = Duration::from_secs(10);

/// Decoded body of a device event published by the cloud.
#[derive(Debug, Clone, Deserialize)]
pub struct PushUpdate {
    #[serde(rename = "timestamp", alias = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "eventId", alias = "EventId", default)]
    pub event_id: Option<String>,
    #[serde(rename = "resourceUpdate", alias = "ResourceUpdate", default)]
    pub resource_update: ResourceUpdate,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourceUpdate {
    #[serde(alias = "Name")]
    pub name: Option<String>,
    #[serde(alias = "Traits")]
    pub traits: DeviceTraits,
}

impl PushUpdate {
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// One message pulled from the subscription, waiting to be (n)acked.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub ack_id: String,
    pub message_id: String,
    pub publish_time: Option<DateTime<Utc>>,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait SubscriptionTrait: Send + Sync {
    /// Waits for the next batch of messages. An `Err` is a transport failure.
    async fn receive(&self) -> Result<Vec<PushMessage>, SdmClientError>;
    async fn ack(&self, ack_id: &str) -> Result<(), SdmClientError>;
    /// Hands the message back for redelivery (or dead-lettering).
    async fn nack(&self, ack_id: &str) -> Result<(), SdmClientError>;
}

/// Accepts either a full `projects/<p>/subscriptions/<s>` path or a bare id.
pub fn subscription_path(project_id: &str, subscription: &str) -> String {
    if subscription.starts_with("projects/") {
        subscription.to_string()
    } else {
        format!("projects/{project_id}/subscriptions/{subscription}")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PubsubMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    publish_time: Option<DateTime<Utc>>,
}

/// Pull subscription over the Pub/Sub REST API.
#[derive(Clone)]
pub struct PubSubSubscription {
    http: reqwest::Client,
    base_url: String,
    subscription: String,
    max_messages: u32,
    nack_deadline: Duration,
    tokens: Arc<dyn TokenProvider>,
}

impl PubSubSubscription {
    pub fn new(
        subscription: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, SdmClientError> {
        // pull is a long poll, keep the timeout above the server-side wait
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url: PUBSUB_BASE_URL.to_string(),
            subscription: subscription.into(),
            max_messages: 10,
            nack_deadline: DEFAULT_NACK_DEADLINE,
            tokens,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// A zero deadline redelivers immediately.
    pub fn with_nack_deadline(mut self, nack_deadline: Duration) -> Self {
        self.nack_deadline = nack_deadline;
        self
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    async fn call(&self, action: &str, body: Value) -> Result<String, SdmClientError> {
        let url = format!(
            "{}/v1/{}:{action}",
            self.base_url.trim_end_matches('/'),
            self.subscription
        );
        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SdmClientError::Status { status, body });
        }
        Ok(body)
    }
}

#[async_trait]
impl SubscriptionTrait for PubSubSubscription {
    async fn receive(&self) -> Result<Vec<PushMessage>, SdmClientError> {
        let body = self
            .call("pull", json!({ "maxMessages": self.max_messages }))
            .await?;
        let pulled: PullResponse = if body.trim().is_empty() {
            PullResponse {
                received_messages: vec![],
            }
        } else {
            serde_json::from_str(&body)?
        };
        debug!("Pulled {} messages", pulled.received_messages.len());
        Ok(pulled
            .received_messages
            .into_iter()
            .map(|received| {
                let data = match STANDARD.decode(received.message.data.as_bytes()) {
                    Ok(data) => data,
                    Err(e) => {
                        // left as-is, it will fail to decode downstream and get nacked
                        warn!(
                            message_id = %received.message.message_id,
                            "Message data is not valid base64: {e}"
                        );
                        received.message.data.into_bytes()
                    }
                };
                PushMessage {
                    ack_id: received.ack_id,
                    message_id: received.message.message_id,
                    publish_time: received.message.publish_time,
                    data,
                }
            })
            .collect())
    }

    async fn ack(&self, ack_id: &str) -> Result<(), SdmClientError> {
        self.call("acknowledge", json!({ "ackIds": [ack_id] }))
            .await
            .map(|_| ())
    }

    async fn nack(&self, ack_id: &str) -> Result<(), SdmClientError> {
        self.call(
            "modifyAckDeadline",
            json!({
                "ackIds": [ack_id],
                "ackDeadlineSeconds": self.nack_deadline.as_secs()
            }),
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::auth::StaticTokenProvider;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUBSCRIPTION: &str = "projects/gcp-project/subscriptions/nest-events";

    fn subscription(server: &MockServer) -> PubSubSubscription {
        PubSubSubscription::new(SUBSCRIPTION, Arc::new(StaticTokenProvider::new("token")))
            .unwrap()
            .with_base_url(server.uri())
    }

    #[test]
    fn decode_push_update() {
        let json = br#"{
            "eventId": "0120ecc7-3b57-4eb4-9941-91609f189fb4",
            "timestamp": "2019-01-01T00:00:01Z",
            "resourceUpdate": {
                "name": "enterprises/project-id/devices/device-id",
                "traits": {
                    "sdm.devices.traits.ThermostatHvac": { "status": "COOLING" }
                }
            },
            "userId": "AVPHwEuBfnPOnTqzVFT4IONX2Qqhu9EJ4ubO-bNnQ-yi"
        }"#;
        let update = PushUpdate::decode(json).unwrap();
        assert_eq!(
            update.timestamp,
            "2019-01-01T00:00:01Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            update.resource_update.name.as_deref(),
            Some("enterprises/project-id/devices/device-id")
        );
        assert_eq!(update.resource_update.traits.hvac_status(), Some("COOLING"));
    }

    #[test]
    fn decode_capitalized_push_update() {
        let json = br#"{
            "Timestamp": "2021-03-04T10:00:00.123Z",
            "ResourceUpdate": {
                "Traits": {
                    "sdm.devices.traits.Temperature": { "ambientTemperatureCelsius": 19.5 }
                }
            }
        }"#;
        let update = PushUpdate::decode(json).unwrap();
        assert_eq!(update.resource_update.traits.ambient_celsius(), Some(19.5));
        assert!(update.resource_update.name.is_none());
    }

    #[test]
    fn decode_rejects_garbage_and_missing_timestamp() {
        assert!(PushUpdate::decode(b"not json").is_err());
        assert!(PushUpdate::decode(br#"{"resourceUpdate": {}}"#).is_err());
    }

    #[test]
    fn subscription_path_accepts_short_ids() {
        assert_eq!(
            subscription_path("gcp", "events"),
            "projects/gcp/subscriptions/events"
        );
        assert_eq!(subscription_path("gcp", SUBSCRIPTION), SUBSCRIPTION);
    }

    #[tokio::test]
    async fn receive_decodes_base64_payloads() {
        let server = MockServer::start().await;
        let payload = r#"{"timestamp":"2024-05-01T08:00:00Z"}"#;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{SUBSCRIPTION}:pull")))
            .and(body_json(json!({ "maxMessages": 10 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "receivedMessages": [{
                    "ackId": "ack-1",
                    "message": {
                        "data": STANDARD.encode(payload),
                        "messageId": "42",
                        "publishTime": "2024-05-01T08:00:01Z"
                    }
                }]
            })))
            .mount(&server)
            .await;

        let messages = subscription(&server).receive().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].ack_id, "ack-1");
        assert_eq!(messages[0].message_id, "42");
        assert_eq!(messages[0].data, payload.as_bytes());
    }

    #[tokio::test]
    async fn empty_pull_yields_no_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{SUBSCRIPTION}:pull")))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        assert!(subscription(&server).receive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ack_and_nack_use_their_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{SUBSCRIPTION}:acknowledge")))
            .and(body_json(json!({ "ackIds": ["ack-1"] })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{SUBSCRIPTION}:modifyAckDeadline")))
            .and(body_json(json!({ "ackIds": ["ack-2"], "ackDeadlineSeconds": 10 })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let subscription = subscription(&server);
        subscription.ack("ack-1").await.unwrap();
        subscription.nack("ack-2").await.unwrap();
    }

    #[tokio::test]
    async fn nack_deadline_is_configurable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{SUBSCRIPTION}:modifyAckDeadline")))
            .and(body_json(json!({ "ackIds": ["ack-3"], "ackDeadlineSeconds": 0 })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        subscription(&server)
            .with_nack_deadline(Duration::ZERO)
            .nack("ack-3")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pull_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{SUBSCRIPTION}:pull")))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = subscription(&server).receive().await.unwrap_err();
        assert!(err.is_transient());
    }
}

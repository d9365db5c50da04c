//! Pub/Sub event sink implementation
//!
//! Publishes each record's JSON bytes to a preconfigured topic and waits for
//! the message id before returning. The production client talks to the
//! Pub/Sub REST API (or its emulator) over `reqwest`.

use super::EventSink;
use crate::core::config::BusParams;
use crate::core::errors::{RelayError, RelayResult};
use crate::events::record::ChangeRecord;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const SINK_NAME: &str = "pubsub";

/// Fully qualified topic name, `projects/<project>/topics/<topic>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPath {
    project: String,
    topic: String,
}

impl TopicPath {
    pub fn new(project: &str, topic: &str) -> Self {
        Self {
            project: project.to_string(),
            topic: topic.to_string(),
        }
    }
}

impl fmt::Display for TopicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/topics/{}", self.project, self.topic)
    }
}

/// Client able to publish raw bytes to a topic
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// Publish one message and return the server-assigned message id
    async fn publish(&self, topic: &TopicPath, data: Vec<u8>) -> RelayResult<String>;
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Serialize)]
struct PubsubMessage {
    data: String,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}

/// Pub/Sub REST publisher
pub struct PubSubRestClient {
    http_client: Client,
    endpoint: String,
    access_token: Option<String>,
}

impl PubSubRestClient {
    pub fn new(params: &BusParams) -> RelayResult<Self> {
        let http_client = Client::builder()
            .timeout(params.publish_timeout)
            .build()
            .map_err(|e| RelayError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint: params.endpoint.trim_end_matches('/').to_string(),
            access_token: params.access_token.clone(),
        })
    }

    fn publish_url(&self, topic: &TopicPath) -> String {
        format!("{}/v1/{}:publish", self.endpoint, topic)
    }

    fn request_body(data: &[u8]) -> PublishRequest {
        PublishRequest {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(data),
            }],
        }
    }
}

#[async_trait]
impl PublishClient for PubSubRestClient {
    async fn publish(&self, topic: &TopicPath, data: Vec<u8>) -> RelayResult<String> {
        let mut request = self
            .http_client
            .post(self.publish_url(topic))
            .json(&Self::request_body(&data));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::publish(format!("Publish request failed: {}", e), SINK_NAME))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::publish(
                format!("Publish to {} returned {}: {}", topic, status, body.trim()),
                SINK_NAME,
            ));
        }

        let acknowledgment: PublishResponse = response.json().await.map_err(|e| {
            RelayError::publish(format!("Unreadable publish response: {}", e), SINK_NAME)
        })?;

        acknowledgment
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::publish("Publish response carried no message id", SINK_NAME))
    }
}

/// Event sink publishing records to a Pub/Sub topic
pub struct PubSubSink {
    client: Arc<dyn PublishClient>,
    topic: TopicPath,
}

impl PubSubSink {
    pub fn new(client: Arc<dyn PublishClient>, topic: TopicPath) -> Self {
        Self { client, topic }
    }
}

#[async_trait]
impl EventSink for PubSubSink {
    fn sink_type(&self) -> &'static str {
        SINK_NAME
    }

    async fn send_event(&self, record: &ChangeRecord) -> RelayResult<()> {
        let data = record.to_json_bytes()?;
        debug!("Publishing {} bytes to {}", data.len(), self.topic);

        let message_id = self.client.publish(&self.topic, data).await?;
        info!(
            "Published message {}: {} on {}",
            message_id,
            record.operation(),
            record.table()
        );
        Ok(())
    }
}

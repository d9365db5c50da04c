//! Process-wide runtime context
//!
//! Built once at startup from a validated [`RelayConfig`] and passed
//! explicitly to the components that need it. Immutable afterwards.

use super::config::{RelayConfig, SinkSettings};
use super::{RelayError, RelayResult};
use crate::events::sink::EventSink;
use crate::events::sink::console::ConsoleSink;
use crate::events::sink::pubsub::{PubSubRestClient, PubSubSink, PublishClient, TopicPath};
use std::sync::Arc;
use tracing::info;

/// Topic and publish client shared by the production sink
#[derive(Clone)]
struct BusHandle {
    topic: TopicPath,
    client: Arc<dyn PublishClient>,
}

pub struct RuntimeContext {
    config: RelayConfig,
    bus: Option<BusHandle>,
}

impl RuntimeContext {
    /// Build the context, creating the production publish client when required
    pub fn build(config: RelayConfig) -> RelayResult<Self> {
        let bus = match &config.sink {
            SinkSettings::Console => None,
            SinkSettings::PubSub(params) => {
                let topic = TopicPath::new(&params.project_id, &params.topic_id);
                let client = PubSubRestClient::new(params)?;
                info!("Pub/Sub client initialized for {}", topic);
                Some(BusHandle {
                    topic,
                    client: Arc::new(client),
                })
            }
        };

        Ok(Self { config, bus })
    }

    /// Build a production context around an already constructed publish client
    #[cfg(test)]
    pub fn with_publish_client(
        config: RelayConfig,
        client: Arc<dyn PublishClient>,
    ) -> RelayResult<Self> {
        let topic = match &config.sink {
            SinkSettings::PubSub(params) => TopicPath::new(&params.project_id, &params.topic_id),
            SinkSettings::Console => {
                return Err(RelayError::config(
                    "A publish client can only be attached to a production configuration",
                ));
            }
        };

        Ok(Self {
            config,
            bus: Some(BusHandle { topic, client }),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Topic records are published to, if any
    pub fn topic(&self) -> Option<&TopicPath> {
        self.bus.as_ref().map(|bus| &bus.topic)
    }

    /// Create the sink used for the lifetime of the process
    pub fn create_sink(&self) -> Box<dyn EventSink> {
        match &self.bus {
            None => Box::new(ConsoleSink::stdout()),
            Some(bus) => Box::new(PubSubSink::new(bus.client.clone(), bus.topic.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Environment;
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl PublishClient for NeverCalled {
        async fn publish(&self, _topic: &TopicPath, _data: Vec<u8>) -> RelayResult<String> {
            unreachable!("publish is not exercised here")
        }
    }

    fn production_config() -> RelayConfig {
        RelayConfig::from_lookup(Environment::Production, |key| {
            match key {
                "MYSQL_HOST" => Some("db"),
                "MYSQL_USER" => Some("cdc"),
                "MYSQL_PASSWORD" => Some("pw"),
                "MYSQL_DATABASE" => Some("shop"),
                "GCP_PROJECT_ID" => Some("acme"),
                "PUBSUB_TOPIC_ID" => Some("orders-cdc"),
                _ => None,
            }
            .map(str::to_string)
        })
        .unwrap()
    }

    #[test]
    fn test_development_context_uses_console() {
        let config = RelayConfig::from_lookup(Environment::Development, |_| None).unwrap();
        let context = RuntimeContext::build(config).unwrap();

        assert!(context.topic().is_none());
        assert_eq!(context.create_sink().sink_type(), "console");
    }

    #[test]
    fn test_production_context_uses_pubsub() {
        let context =
            RuntimeContext::with_publish_client(production_config(), Arc::new(NeverCalled))
                .unwrap();

        assert_eq!(
            context.topic().map(|t| t.to_string()).as_deref(),
            Some("projects/acme/topics/orders-cdc")
        );
        assert_eq!(context.create_sink().sink_type(), "pubsub");
    }

    #[test]
    fn test_build_creates_rest_client_in_production() {
        let context = RuntimeContext::build(production_config()).unwrap();
        assert!(context.topic().is_some());
    }

    #[test]
    fn test_publish_client_rejected_for_development() {
        let config = RelayConfig::from_lookup(Environment::Development, |_| None).unwrap();
        let result = RuntimeContext::with_publish_client(config, Arc::new(NeverCalled));
        assert!(matches!(result, Err(RelayError::Configuration { .. })));
    }
}

//! Configuration management for the binlog relay
//!
//! This module resolves the environment selector and loads every setting
//! from environment variables once at startup. The result is an enumerated,
//! validated configuration; nothing downstream does string-keyed lookups.

use super::{RelayError, RelayResult};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default replica identity presented to the source server
pub const DEFAULT_SERVER_ID: u32 = 100;

/// Default location of the persisted cursor file
pub const DEFAULT_POSITION_FILE: &str = "binlog_position.json";

/// Fixed delay between a stream failure and the next connection attempt
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

const DEFAULT_TOPIC_ID: &str = "mysql-changes";
const DEFAULT_PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com";
const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 30;

/// Deployment environment, selecting connection parameters and sink
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Resolve the selector: explicit flag first, then `ENVIRONMENT`, then development
    pub fn resolve(flag: Option<&str>) -> RelayResult<Self> {
        match flag {
            Some(value) => value.parse(),
            None => match env::var("ENVIRONMENT") {
                Ok(value) => value.parse(),
                Err(_) => Ok(Environment::Development),
            },
        }
    }
}

impl FromStr for Environment {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(RelayError::config(format!(
                "Unknown environment '{}': must be one of 'dev' or 'prod'",
                other
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "dev"),
            Environment::Production => write!(f, "prod"),
        }
    }
}

/// Connection parameters for the source database
#[derive(Clone, PartialEq)]
pub struct DatabaseParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for DatabaseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Message bus settings used in production
#[derive(Clone, PartialEq)]
pub struct BusParams {
    pub project_id: String,
    pub topic_id: String,
    pub endpoint: String,
    pub access_token: Option<String>,
    pub publish_timeout: Duration,
}

impl fmt::Debug for BusParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusParams")
            .field("project_id", &self.project_id)
            .field("topic_id", &self.topic_id)
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}

/// Sink selected for the lifetime of the process
#[derive(Clone, Debug, PartialEq)]
pub enum SinkSettings {
    Console,
    PubSub(BusParams),
}

impl fmt::Display for SinkSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkSettings::Console => write!(f, "console"),
            SinkSettings::PubSub(_) => write!(f, "pubsub"),
        }
    }
}

/// Validated relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub environment: Environment,
    pub database: DatabaseParams,
    pub server_id: u32,
    pub position_file: PathBuf,
    pub reconnect_delay: Duration,
    pub sink: SinkSettings,
}

impl RelayConfig {
    /// Load configuration for `environment` from process environment variables
    ///
    /// # Environment Variables
    ///
    /// Database (development defaults in parentheses, required in production):
    /// - `MYSQL_HOST` (`localhost`), `MYSQL_USER` (`testuser`),
    ///   `MYSQL_PASSWORD` (`testpass`), `MYSQL_DATABASE` (`testdb`)
    /// - `MYSQL_PORT`: defaults to 3306
    ///
    /// Replication:
    /// - `BINLOG_SERVER_ID`: replica server id (default: 100)
    /// - `POSITION_FILE`: cursor file (default: `binlog_position.json`)
    ///
    /// Production bus:
    /// - `GCP_PROJECT_ID` (required), `PUBSUB_TOPIC_ID` (default: `mysql-changes`)
    /// - `PUBSUB_ACCESS_TOKEN`, `PUBSUB_EMULATOR_HOST`, `PUBSUB_PUBLISH_TIMEOUT_SECS`
    pub fn from_env(environment: Environment) -> RelayResult<Self> {
        Self::from_lookup(environment, |key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(environment: Environment, lookup: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database = match environment {
            Environment::Development => DatabaseParams {
                host: var("MYSQL_HOST").unwrap_or_else(|| "localhost".to_string()),
                port: parse_or("MYSQL_PORT", var("MYSQL_PORT"), 3306)?,
                user: var("MYSQL_USER").unwrap_or_else(|| "testuser".to_string()),
                password: var("MYSQL_PASSWORD").unwrap_or_else(|| "testpass".to_string()),
                database: var("MYSQL_DATABASE").unwrap_or_else(|| "testdb".to_string()),
            },
            Environment::Production => DatabaseParams {
                host: required("MYSQL_HOST", var("MYSQL_HOST"))?,
                port: parse_or("MYSQL_PORT", var("MYSQL_PORT"), 3306)?,
                user: required("MYSQL_USER", var("MYSQL_USER"))?,
                password: required("MYSQL_PASSWORD", var("MYSQL_PASSWORD"))?,
                database: required("MYSQL_DATABASE", var("MYSQL_DATABASE"))?,
            },
        };

        let server_id = parse_or("BINLOG_SERVER_ID", var("BINLOG_SERVER_ID"), DEFAULT_SERVER_ID)?;
        if server_id == 0 {
            return Err(RelayError::config(
                "BINLOG_SERVER_ID must be non-zero; 0 is reserved for the source server",
            ));
        }

        let position_file = var("POSITION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_POSITION_FILE));

        let sink = match environment {
            Environment::Development => SinkSettings::Console,
            Environment::Production => {
                let project_id = required("GCP_PROJECT_ID", var("GCP_PROJECT_ID"))?;
                let topic_id =
                    var("PUBSUB_TOPIC_ID").unwrap_or_else(|| DEFAULT_TOPIC_ID.to_string());
                validate_resource_id("GCP_PROJECT_ID", &project_id)?;
                validate_resource_id("PUBSUB_TOPIC_ID", &topic_id)?;

                // The emulator speaks plain HTTP and ignores credentials
                let (endpoint, access_token) = match var("PUBSUB_EMULATOR_HOST") {
                    Some(host) => (format!("http://{}", host.trim_end_matches('/')), None),
                    None => (DEFAULT_PUBSUB_ENDPOINT.to_string(), var("PUBSUB_ACCESS_TOKEN")),
                };

                let timeout_secs = parse_or(
                    "PUBSUB_PUBLISH_TIMEOUT_SECS",
                    var("PUBSUB_PUBLISH_TIMEOUT_SECS"),
                    DEFAULT_PUBLISH_TIMEOUT_SECS,
                )?;

                SinkSettings::PubSub(BusParams {
                    project_id,
                    topic_id,
                    endpoint,
                    access_token,
                    publish_timeout: Duration::from_secs(timeout_secs),
                })
            }
        };

        Ok(Self {
            environment,
            database,
            server_id,
            position_file,
            reconnect_delay: RECONNECT_DELAY,
            sink,
        })
    }
}

fn required(key: &str, value: Option<String>) -> RelayResult<String> {
    value.ok_or_else(|| {
        RelayError::config(format!("Missing required {} environment variable", key))
    })
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> RelayResult<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::config(format!("{} has an invalid value: '{}'", key, raw))),
        None => Ok(default),
    }
}

fn validate_resource_id(key: &str, value: &str) -> RelayResult<()> {
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(RelayError::config(format!(
            "{} must not contain '/' or whitespace",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn production_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("MYSQL_HOST", "db.internal"),
            ("MYSQL_USER", "cdc"),
            ("MYSQL_PASSWORD", "secret"),
            ("MYSQL_DATABASE", "shop"),
            ("GCP_PROJECT_ID", "acme-prod"),
        ]
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );

        let err = "staging".parse::<Environment>().unwrap_err();
        assert!(matches!(err, RelayError::Configuration { .. }));
    }

    #[test]
    fn test_environment_flag_wins() {
        assert_eq!(
            Environment::resolve(Some("prod")).unwrap(),
            Environment::Production
        );
        assert!(Environment::resolve(Some("qa")).is_err());
    }

    #[test]
    fn test_development_defaults() {
        let config = RelayConfig::from_lookup(Environment::Development, lookup_from(&[])).unwrap();

        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.user, "testuser");
        assert_eq!(config.database.database, "testdb");
        assert_eq!(config.server_id, 100);
        assert_eq!(config.position_file, PathBuf::from("binlog_position.json"));
        assert_eq!(config.reconnect_delay, Duration::from_secs(10));
        assert_eq!(config.sink, SinkSettings::Console);
    }

    #[test]
    fn test_development_overrides() {
        let config = RelayConfig::from_lookup(
            Environment::Development,
            lookup_from(&[
                ("MYSQL_HOST", "127.0.0.1"),
                ("MYSQL_PORT", "3307"),
                ("BINLOG_SERVER_ID", "4242"),
                ("POSITION_FILE", "/var/lib/relay/pos.json"),
            ]),
        )
        .unwrap();

        assert_eq!(config.database.host, "127.0.0.1");
        assert_eq!(config.database.port, 3307);
        assert_eq!(config.server_id, 4242);
        assert_eq!(config.position_file, PathBuf::from("/var/lib/relay/pos.json"));
    }

    #[test]
    fn test_production_requires_database_settings() {
        let result = RelayConfig::from_lookup(
            Environment::Production,
            lookup_from(&[("GCP_PROJECT_ID", "acme-prod")]),
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("MYSQL_HOST"));
    }

    #[test]
    fn test_production_requires_project() {
        let vars: Vec<_> = production_vars()
            .into_iter()
            .filter(|(k, _)| *k != "GCP_PROJECT_ID")
            .collect();
        let err = RelayConfig::from_lookup(Environment::Production, lookup_from(&vars)).unwrap_err();
        assert!(err.to_string().contains("GCP_PROJECT_ID"));
    }

    #[test]
    fn test_production_bus_settings() {
        let config =
            RelayConfig::from_lookup(Environment::Production, lookup_from(&production_vars()))
                .unwrap();

        match config.sink {
            SinkSettings::PubSub(bus) => {
                assert_eq!(bus.project_id, "acme-prod");
                assert_eq!(bus.topic_id, "mysql-changes");
                assert_eq!(bus.endpoint, "https://pubsub.googleapis.com");
                assert_eq!(bus.publish_timeout, Duration::from_secs(30));
            }
            other => panic!("expected pubsub sink, got {:?}", other),
        }
    }

    #[test]
    fn test_emulator_host_switches_endpoint() {
        let mut vars = production_vars();
        vars.push(("PUBSUB_EMULATOR_HOST", "localhost:8085"));
        vars.push(("PUBSUB_ACCESS_TOKEN", "ignored"));

        let config = RelayConfig::from_lookup(Environment::Production, lookup_from(&vars)).unwrap();
        let SinkSettings::PubSub(bus) = config.sink else {
            panic!("expected pubsub sink");
        };
        assert_eq!(bus.endpoint, "http://localhost:8085");
        assert!(bus.access_token.is_none());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = RelayConfig::from_lookup(
            Environment::Development,
            lookup_from(&[("MYSQL_PORT", "not-a-port")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("MYSQL_PORT"));

        let err = RelayConfig::from_lookup(
            Environment::Development,
            lookup_from(&[("BINLOG_SERVER_ID", "0")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("BINLOG_SERVER_ID"));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let config =
            RelayConfig::from_lookup(Environment::Production, lookup_from(&production_vars()))
                .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}

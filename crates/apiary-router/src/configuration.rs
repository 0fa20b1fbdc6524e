//! Logic for loading configuration in to an object model

use displaydoc::Display;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use typed_builder::TypedBuilder;
use url::Url;

/// Configuration error.
#[derive(Debug, Error, Display)]
pub enum ConfigurationError {
    /// environment variable {name} is required in the {env_id} environment
    MissingSecret { name: &'static str, env_id: String },
    /// could not parse {name}: {reason}
    InvalidValue { name: &'static str, reason: String },
}

/// The configuration for the gateway.
///
/// `ENV_ID` selects between the dev and prod bundles; individual options can
/// be overridden through their environment variables.
#[derive(Clone, Debug, Deserialize, Serialize, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Base URL of the schema registry service.
    pub schema_registry_url: Url,

    /// Base URL of the identity service validating API and share tokens.
    pub user_cycle_url: Url,

    /// Shared secret used to verify session JWTs.
    pub private_key: String,

    /// Interval between registry polls, in milliseconds. 0 disables polling.
    #[serde(default = "default_poll_interval_ms")]
    #[builder(default = default_poll_interval_ms())]
    pub poll_interval_ms: u64,

    /// The socket address and port to listen on.
    /// Defaults to 0.0.0.0:6100
    #[serde(default = "default_listen")]
    #[builder(default = default_listen())]
    pub listen: SocketAddr,

    /// Optional error-tracking DSN, consumed by an external reporter.
    #[serde(default)]
    #[builder(default)]
    pub sentry_dsn: Option<String>,

    /// Optional query-log broker address (host:port), consumed by an
    /// external event sink.
    #[serde(default)]
    #[builder(default)]
    pub kafka_broker_url: Option<String>,

    /// Optional per-subgraph request timeout, in milliseconds.
    #[serde(default)]
    #[builder(default)]
    pub subgraph_timeout_ms: Option<u64>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from_str("0.0.0.0:6100").expect("valid constant listen address; qed")
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

impl Configuration {
    /// Build the configuration for the environment selected by `ENV_ID`,
    /// applying per-option environment overrides.
    pub fn from_env() -> Result<Configuration, ConfigurationError> {
        let env_id = std::env::var("ENV_ID").unwrap_or_else(|_| "dev".to_string());
        let prod = env_id == "prod";

        let schema_registry_url = url_option(
            "SCHEMA_REGISTRY_URL",
            if prod {
                "http://graphql-schema-registry:6001"
            } else {
                "http://localhost:6001"
            },
        )?;
        let user_cycle_url = url_option(
            "USER_CYCLE_URL",
            if prod {
                "http://user-cycle:4000"
            } else {
                "http://localhost:4000"
            },
        )?;
        let private_key = match std::env::var("PRIVATE_KEY") {
            Ok(key) => key,
            Err(_) if prod => {
                return Err(ConfigurationError::MissingSecret {
                    name: "PRIVATE_KEY",
                    env_id,
                })
            }
            Err(_) => "secret".to_string(),
        };

        Ok(Configuration::builder()
            .schema_registry_url(schema_registry_url)
            .user_cycle_url(user_cycle_url)
            .private_key(private_key)
            .poll_interval_ms(number_option("POLL_INTERVAL_MS", default_poll_interval_ms())?)
            .listen(parsed_option("LISTEN_ADDR", default_listen())?)
            .sentry_dsn(std::env::var("SENTRY_DSN").ok())
            .kafka_broker_url(std::env::var("KAFKA_BROKER_URL").ok())
            .subgraph_timeout_ms(
                match std::env::var("SUBGRAPH_TIMEOUT_MS") {
                    Ok(value) => Some(parse_value("SUBGRAPH_TIMEOUT_MS", &value)?),
                    Err(_) => None,
                },
            )
            .build())
    }

    /// The registry poll interval; zero when polling is disabled.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The per-subgraph request timeout, if one is configured.
    pub fn subgraph_timeout(&self) -> Option<Duration> {
        self.subgraph_timeout_ms.map(Duration::from_millis)
    }
}

fn url_option(name: &'static str, default: &str) -> Result<Url, ConfigurationError> {
    let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
    Url::parse(&value).map_err(|err| ConfigurationError::InvalidValue {
        name,
        reason: err.to_string(),
    })
}

fn number_option(name: &'static str, default: u64) -> Result<u64, ConfigurationError> {
    match std::env::var(name) {
        Ok(value) => parse_value(name, &value),
        Err(_) => Ok(default),
    }
}

fn parsed_option<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => parse_value(name, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err: T::Err| ConfigurationError::InvalidValue {
            name,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let configuration = Configuration::builder()
            .schema_registry_url(Url::parse("http://localhost:6001").unwrap())
            .user_cycle_url(Url::parse("http://localhost:4000").unwrap())
            .private_key("secret".to_string())
            .build();
        assert_eq!(configuration.listen.port(), 6100);
        assert_eq!(configuration.poll_interval(), Duration::from_secs(10));
        assert_eq!(configuration.subgraph_timeout(), None);
        assert_eq!(configuration.sentry_dsn, None);
    }

    #[test]
    fn test_deserialization() {
        let configuration: Configuration = serde_json::from_value(serde_json::json!({
            "schema_registry_url": "http://registry:6001",
            "user_cycle_url": "http://identity:4000",
            "private_key": "k",
            "poll_interval_ms": 0,
            "listen": "0.0.0.0:6100",
            "kafka_broker_url": "broker:9092",
        }))
        .unwrap();
        assert!(configuration.poll_interval().is_zero());
        assert_eq!(configuration.kafka_broker_url.as_deref(), Some("broker:9092"));
    }
}

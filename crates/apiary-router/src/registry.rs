//! Client for the schema registry: fetches the latest subgraph descriptors
//! and normalizes them for composition.

use apollo_compiler::ast;
use async_trait::async_trait;
use derivative::Derivative;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use url::Url;

/// A subgraph descriptor as consumed by the composer: name, routable URL,
/// registry version, and the subgraph SDL. Descriptors with unparseable SDL
/// never leave the registry client.
#[derive(Clone, Debug, PartialEq)]
pub struct SubgraphDescriptor {
    pub name: String,
    /// `http://`-normalized routing URL; `None` when the registry entry had
    /// no url (the manager filters these out before composition).
    pub url: Option<String>,
    pub version: String,
    pub type_defs: String,
}

/// A source of subgraph descriptors. Returns the descriptor list plus a flag
/// set when the snapshot is degraded because the registry could not be
/// reached or decoded; it never fails outright.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SchemaFetcher: Send + Sync + 'static {
    async fn fetch(&self) -> (Vec<SubgraphDescriptor>, bool);
}

#[derive(Deserialize)]
struct RegistryEnvelope {
    #[serde(default)]
    data: Vec<RegistryEntry>,
}

#[derive(Deserialize)]
struct RegistryEntry {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    type_defs: Option<String>,
}

/// HTTP client for the schema registry's `GET /schema/latest` endpoint.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SchemaRegistryClient {
    endpoint: Url,
    #[derivative(Debug = "ignore")]
    http_client: reqwest::Client,
}

impl SchemaRegistryClient {
    pub fn new(registry_url: Url) -> Self {
        let endpoint = registry_url
            .join("schema/latest")
            .unwrap_or(registry_url);
        Self {
            endpoint,
            http_client: reqwest::Client::new(),
        }
    }

    async fn fetch_latest(&self) -> Result<Vec<RegistryEntry>, String> {
        let response = self
            .http_client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("registry responded with HTTP {}", status));
        }
        let envelope = response
            .json::<RegistryEnvelope>()
            .await
            .map_err(|err| err.to_string())?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl SchemaFetcher for SchemaRegistryClient {
    async fn fetch(&self) -> (Vec<SubgraphDescriptor>, bool) {
        let entries = match self.fetch_latest().await {
            Ok(entries) => entries,
            Err(reason) => {
                tracing::error!(%reason, "could not fetch the latest registry snapshot");
                return (Vec::new(), true);
            }
        };

        let descriptors = entries
            .into_iter()
            .filter_map(|entry| {
                let type_defs = entry.type_defs.unwrap_or_default();
                if type_defs.trim().is_empty() {
                    tracing::warn!(
                        service = entry.name.as_str(),
                        "registry entry has no type_defs, dropping"
                    );
                    return None;
                }
                if let Err(invalid) = ast::Document::parse(type_defs.as_str(), entry.name.as_str())
                {
                    tracing::warn!(
                        service = entry.name.as_str(),
                        errors = invalid.errors.to_string().as_str(),
                        "registry entry has unparseable type_defs, dropping"
                    );
                    return None;
                }
                let url = match entry.url {
                    Some(url) => Some(normalize_service_url(&url)),
                    None => {
                        tracing::warn!(
                            service = entry.name.as_str(),
                            "registry entry has no url, it will not be routable"
                        );
                        None
                    }
                };
                Some(SubgraphDescriptor {
                    name: entry.name,
                    url,
                    version: entry.version.unwrap_or_default(),
                    type_defs,
                })
            })
            .collect();
        (descriptors, false)
    }
}

/// The registry advertises service addresses without a scheme; the
/// dispatcher needs `http://<url>` form.
fn normalize_service_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;
    use test_log::test;

    #[test(tokio::test)]
    async fn test_fetch_latest_decodes_and_normalizes() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/schema/latest");
            then.status(200).json_body(json!({
                "data": [
                    {
                        "name": "swarm-api",
                        "url": "swarm-api:8100",
                        "version": "v3",
                        "type_defs": "type Query { apiaries: [String] }",
                        "type_defs_original": "type Query { apiaries: [String] }",
                    },
                    {
                        "name": "broken",
                        "url": "broken:1",
                        "version": "v1",
                        "type_defs": "type Query {",
                    },
                    {
                        "name": "no-url",
                        "version": "v1",
                        "type_defs": "type Query { weather: String }",
                    },
                    {
                        "name": "empty",
                        "url": "empty:1",
                        "version": "v1",
                        "type_defs": "",
                    },
                ]
            }));
        });

        let client = SchemaRegistryClient::new(Url::parse(&server.base_url()).unwrap());
        let (descriptors, saw_error) = client.fetch().await;
        mock.assert();

        assert!(!saw_error);
        assert_eq!(
            descriptors,
            vec![
                SubgraphDescriptor {
                    name: "swarm-api".to_string(),
                    url: Some("http://swarm-api:8100".to_string()),
                    version: "v3".to_string(),
                    type_defs: "type Query { apiaries: [String] }".to_string(),
                },
                SubgraphDescriptor {
                    name: "no-url".to_string(),
                    url: None,
                    version: "v1".to_string(),
                    type_defs: "type Query { weather: String }".to_string(),
                },
            ]
        );
    }

    #[test(tokio::test)]
    async fn test_registry_failure_is_an_empty_snapshot() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/schema/latest");
            then.status(500);
        });

        let client = SchemaRegistryClient::new(Url::parse(&server.base_url()).unwrap());
        let (descriptors, saw_error) = client.fetch().await;
        assert!(descriptors.is_empty());
        assert!(saw_error);
    }

    #[test(tokio::test)]
    async fn test_unreachable_registry_is_an_empty_snapshot() {
        // nothing listens on this port
        let client =
            SchemaRegistryClient::new(Url::parse("http://127.0.0.1:9").unwrap());
        let (descriptors, saw_error) = client.fetch().await;
        assert!(descriptors.is_empty());
        assert!(saw_error);
    }

    #[test]
    fn test_normalize_service_url() {
        assert_eq!(normalize_service_url("swarm-api:8100"), "http://swarm-api:8100");
        assert_eq!(
            normalize_service_url("http://swarm-api:8100"),
            "http://swarm-api:8100"
        );
        assert_eq!(
            normalize_service_url("https://swarm.gratheon.com"),
            "https://swarm.gratheon.com"
        );
    }
}

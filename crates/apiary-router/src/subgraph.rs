//! Subgraph dispatch: one HTTP fetcher per subgraph endpoint, built fresh
//! for every supergraph generation.

use apiary_router_core::prelude::graphql::*;
use async_trait::async_trait;
use derivative::Derivative;
use displaydoc::Display;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;
use url::Url;

/// Opaque stamp subgraphs use to recognize traffic coming through the
/// gateway. Carried on every dispatch; not a security boundary.
pub const ROUTER_SIGNATURE: &str = "gratheon-internal";

/// Header carrying [`ROUTER_SIGNATURE`].
pub const ROUTER_SIGNATURE_HEADER: &str = "internal-router-signature";

/// Header carrying the resolved internal user id, when the request is
/// authenticated.
pub const INTERNAL_USER_ID_HEADER: &str = "internal-userId";

/// Header carrying the JSON-encoded scope set of a share-token request.
pub const SHARE_SCOPES_HEADER: &str = "X-Share-Scopes";

/// Subgraph endpoint error, raised while building a generation's fetchers.
#[derive(Debug, Error, Display)]
pub enum EndpointError {
    /// invalid subgraph url '{url}': {reason}
    InvalidUrl { url: String, reason: String },
    /// could not build the http client: {0}
    Client(#[from] reqwest::Error),
}

/// A fetcher for one subgraph endpoint, dispatching over http.
///
/// Only the headers of the dispatch contract are sent: the inbound
/// `Authorization` header, cookies, and everything else from the client
/// request never reach a subgraph.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct HttpSubgraphFetcher {
    service: String,
    url: Url,
    #[derivative(Debug = "ignore")]
    http_client: reqwest::Client,
}

impl HttpSubgraphFetcher {
    /// Construct a fetcher posting to `<endpoint>/graphql`.
    pub fn new(
        service: impl Into<String>,
        endpoint: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, EndpointError> {
        let service = service.into();
        let url = Url::parse(&format!("{}/graphql", endpoint.trim_end_matches('/'))).map_err(
            |err| EndpointError::InvalidUrl {
                url: endpoint.to_string(),
                reason: err.to_string(),
            },
        )?;

        let mut builder =
            reqwest::Client::builder().tcp_keepalive(Some(Duration::from_secs(5)));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(HttpSubgraphFetcher {
            service,
            url,
            http_client: builder.build()?,
        })
    }

    fn http_error(&self, status_code: Option<u16>, reason: String) -> FetchError {
        FetchError::SubrequestHttpError {
            status_code,
            service: self.service.clone(),
            reason,
        }
    }
}

#[async_trait]
impl Fetcher for HttpSubgraphFetcher {
    async fn fetch(
        &self,
        request: Request,
        context: &AuthContext,
    ) -> Result<Response, FetchError> {
        let mut builder = self
            .http_client
            .post(self.url.clone())
            .json(&request)
            .header(ROUTER_SIGNATURE_HEADER, ROUTER_SIGNATURE);
        if let Some(user_id) = context.user_id() {
            builder = builder.header(INTERNAL_USER_ID_HEADER, user_id);
        }
        if let Some(scopes) = context.share_scopes() {
            let encoded = serde_json::to_string(scopes).map_err(|err| {
                self.http_error(None, format!("could not encode share scopes: {err}"))
            })?;
            builder = builder.header(SHARE_SCOPES_HEADER, encoded);
        }

        let response = builder
            .send()
            .instrument(tracing::trace_span!("subgraph-request"))
            .await
            .map_err(|err| self.http_error(err.status().map(|s| s.as_u16()), err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.http_error(
                Some(status.as_u16()),
                format!("subgraph responded with HTTP {status}"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| self.http_error(None, err.to_string()))?;
        serde_json::from_slice::<Response>(&body).map_err(|err| {
            FetchError::SubrequestMalformedResponse {
                service: self.service.clone(),
                reason: err.to_string(),
            }
        })
    }
}

/// The fetchers of one supergraph generation, keyed by subgraph name.
/// Endpoint URLs come from the generation's own `join__Graph` table, so
/// they stay immutable for its lifetime.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct HttpServiceRegistry {
    services: HashMap<String, HttpSubgraphFetcher>,
}

impl HttpServiceRegistry {
    pub fn for_supergraph(supergraph: &Supergraph, timeout: Option<Duration>) -> Self {
        let mut services = HashMap::new();
        for endpoint in supergraph.endpoints() {
            match HttpSubgraphFetcher::new(&endpoint.name, &endpoint.url, timeout) {
                Ok(fetcher) => {
                    services.insert(endpoint.name.clone(), fetcher);
                }
                Err(err) => {
                    tracing::error!(
                        service = endpoint.name.as_str(),
                        "skipping subgraph with unusable endpoint: {err}"
                    );
                }
            }
        }
        Self { services }
    }
}

impl ServiceRegistry for HttpServiceRegistry {
    fn get(&self, name: &str) -> Option<&dyn Fetcher> {
        self.services.get(name).map(|fetcher| fetcher as &dyn Fetcher)
    }

    fn has(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;
    use test_log::test;

    fn fetcher(server: &MockServer) -> HttpSubgraphFetcher {
        HttpSubgraphFetcher::new("swarm-api", &server.base_url(), None).unwrap()
    }

    #[test(tokio::test)]
    async fn test_anonymous_dispatch_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .header("content-type", "application/json")
                .header(ROUTER_SIGNATURE_HEADER, ROUTER_SIGNATURE)
                .matches(|req| {
                    // no identity headers and no client credentials leak
                    req.headers.as_ref().map_or(true, |headers| {
                        headers.iter().all(|(name, _)| {
                            ![
                                "authorization",
                                "cookie",
                                "internal-userid",
                                "x-share-scopes",
                            ]
                            .contains(&name.to_ascii_lowercase().as_str())
                        })
                    })
                });
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"data": {"apiaries": []}}));
        });

        let response = fetcher(&server)
            .fetch(
                Request::builder().query("{ apiaries { id } }").build(),
                &AuthContext::Anonymous,
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(response.data, json!({"apiaries": []}));
    }

    #[test(tokio::test)]
    async fn test_identity_headers_are_injected() {
        let server = MockServer::start();
        let scopes: ScopeSet = serde_json::from_value(json!({
            "allowedQueries": [{"queryName": "hive", "requiredArgs": {"id": "42"}}]
        }))
        .unwrap();
        let encoded = serde_json::to_string(&scopes).unwrap();

        let mock = server.mock(move |when, then| {
            when.method(POST)
                .path("/graphql")
                .header(ROUTER_SIGNATURE_HEADER, ROUTER_SIGNATURE)
                .header(INTERNAL_USER_ID_HEADER, "u9")
                .header(SHARE_SCOPES_HEADER, &encoded);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"data": {"hive": {"id": "42"}}}));
        });

        let response = fetcher(&server)
            .fetch(
                Request::builder()
                    .query("query($id: ID!) { hive(id: $id) { id } }")
                    .variables(Some(json!({"id": "42"}).as_object().cloned().unwrap()))
                    .build(),
                &AuthContext::Shared {
                    user_id: "u9".to_string(),
                    scopes,
                },
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(response.data["hive"]["id"], "42");
    }

    #[test(tokio::test)]
    async fn test_non_2xx_is_annotated() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(502);
        });

        let err = fetcher(&server)
            .fetch(
                Request::builder().query("{ apiaries { id } }").build(),
                &AuthContext::Anonymous,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::SubrequestHttpError {
                status_code: Some(502),
                ref service,
                ..
            } if service == "swarm-api"
        ));
    }

    #[test(tokio::test)]
    async fn test_connection_failure_is_annotated() {
        // nothing listens on this port
        let fetcher = HttpSubgraphFetcher::new("swarm-api", "http://127.0.0.1:9", None).unwrap();
        let err = fetcher
            .fetch(
                Request::builder().query("{ apiaries { id } }").build(),
                &AuthContext::Anonymous,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            FetchError::SubrequestHttpError {
                status_code: None,
                ref service,
                ..
            } if service == "swarm-api"
        ));
    }

    #[test(tokio::test)]
    async fn test_subgraph_errors_are_passed_upward() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({
                    "data": {"hive": null},
                    "errors": [{"message": "hive not found"}],
                    "extensions": {"traceId": "t1"},
                }));
        });

        let response = fetcher(&server)
            .fetch(
                Request::builder().query("{ hive(id: \"42\") { id } }").build(),
                &AuthContext::Anonymous,
            )
            .await
            .unwrap();

        assert_eq!(response.errors[0].message, "hive not found");
        assert_eq!(response.extensions["traceId"], "t1");
    }

    #[test(tokio::test)]
    async fn test_malformed_body_is_annotated() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200).body("surprise");
        });

        let err = fetcher(&server)
            .fetch(
                Request::builder().query("{ apiaries { id } }").build(),
                &AuthContext::Anonymous,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SubrequestMalformedResponse { .. }));
    }

    #[test]
    fn test_registry_for_supergraph() {
        let supergraph = Supergraph::parse(
            include_str!("../../apiary-router-core/src/testdata/supergraph.graphql"),
            1,
        )
        .unwrap();
        let registry = HttpServiceRegistry::for_supergraph(&supergraph, None);
        assert!(registry.has("swarm-api"));
        assert!(registry.has("user-cycle"));
        assert!(registry.get("unknown").is_none());
    }
}

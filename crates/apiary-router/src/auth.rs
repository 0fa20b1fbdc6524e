//! The authentication pipeline: resolves the request's credential to an
//! [`AuthContext`].
//!
//! Three credential kinds are recognized, in strict priority order: a
//! bearer API token (validated by the identity service), a session JWT
//! (cookie or `token` header, verified in-process), and a share token
//! (validated by the identity service, carrying an operation allow-list).
//! A malformed or rejected higher-priority credential fails the request;
//! lower priorities are never consulted.

use apiary_router_core::prelude::graphql::*;
use derivative::Derivative;
use http::header::{self, HeaderMap};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "gratheon_session";

/// Fallback header carrying the session JWT.
pub const SESSION_HEADER: &str = "token";

/// Header carrying a share token.
pub const SHARE_TOKEN_HEADER: &str = "X-Share-Token";

const VALIDATE_API_TOKEN: &str = "mutation ValidateApiToken($token: String) { \
     validateApiToken(token: $token) { \
     ... on TokenUser { __typename id } \
     ... on Error { __typename code } } }";

const VALIDATE_SHARE_TOKEN: &str = "query ValidateShareToken($token: String!) { \
     validateShareToken(token: $token) { \
     ... on ShareTokenDetails { __typename id name scopes userId } \
     ... on Error { __typename code } } }";

#[derive(Deserialize)]
struct IdentityReply {
    #[serde(default)]
    data: Option<IdentityData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityData {
    #[serde(default)]
    validate_api_token: Option<TypedReply>,
    #[serde(default)]
    validate_share_token: Option<TypedReply>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypedReply {
    #[serde(rename = "__typename")]
    typename: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    scopes: Option<Value>,
}

/// GraphQL client for the identity service's token validation operations.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct IdentityClient {
    endpoint: Url,
    #[derivative(Debug = "ignore")]
    http_client: reqwest::Client,
}

impl IdentityClient {
    pub fn new(identity_url: Url) -> Self {
        let endpoint = identity_url.join("graphql").unwrap_or(identity_url);
        Self {
            endpoint,
            http_client: reqwest::Client::new(),
        }
    }

    async fn post_operation(&self, query: &str, token: &str) -> Result<IdentityData, AuthError> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(&json!({ "query": query, "variables": { "token": token } }))
            .send()
            .await
            .map_err(|err| AuthError::IdentityUnavailable {
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::IdentityUnavailable {
                reason: format!("identity service responded with HTTP {status}"),
            });
        }
        let reply =
            response
                .json::<IdentityReply>()
                .await
                .map_err(|err| AuthError::IdentityUnavailable {
                    reason: err.to_string(),
                })?;
        reply.data.ok_or_else(|| AuthError::IdentityUnavailable {
            reason: "identity reply carried no data".to_string(),
        })
    }

    /// Validate a bearer API token, resolving the internal user id.
    pub async fn validate_api_token(&self, token: &str) -> Result<String, AuthError> {
        let data = self.post_operation(VALIDATE_API_TOKEN, token).await?;
        match data.validate_api_token {
            Some(reply) if reply.typename == "TokenUser" => {
                reply.id.ok_or_else(|| AuthError::InvalidCredentials {
                    reason: "token user carried no id".to_string(),
                })
            }
            Some(reply) => Err(AuthError::InvalidCredentials {
                reason: format!(
                    "api token rejected ({})",
                    reply.code.as_deref().unwrap_or(reply.typename.as_str())
                ),
            }),
            None => Err(AuthError::InvalidCredentials {
                reason: "api token rejected".to_string(),
            }),
        }
    }

    /// Validate a share token, resolving the owning user and the scope set.
    pub async fn validate_share_token(
        &self,
        token: &str,
    ) -> Result<(String, ScopeSet), AuthError> {
        let data = self.post_operation(VALIDATE_SHARE_TOKEN, token).await?;
        match data.validate_share_token {
            Some(reply) if reply.typename == "ShareTokenDetails" => {
                let user_id = reply.user_id.ok_or_else(|| AuthError::InvalidCredentials {
                    reason: "share token details carried no userId".to_string(),
                })?;
                let scopes = match &reply.scopes {
                    Some(value) => ScopeSet::from_reply_value(value).map_err(|err| {
                        AuthError::InvalidCredentials {
                            reason: format!("malformed share token scopes: {err}"),
                        }
                    })?,
                    // no scopes means no allowed operations
                    None => ScopeSet::default(),
                };
                Ok((user_id, scopes))
            }
            Some(reply) => Err(AuthError::InvalidCredentials {
                reason: format!(
                    "share token rejected ({})",
                    reply.code.as_deref().unwrap_or(reply.typename.as_str())
                ),
            }),
            None => Err(AuthError::InvalidCredentials {
                reason: "share token rejected".to_string(),
            }),
        }
    }
}

/// The pipeline itself: identity client plus the session JWT key.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct AuthPipeline {
    identity: IdentityClient,
    #[derivative(Debug = "ignore")]
    decoding_key: DecodingKey,
    validation: Validation,
}

#[derive(Deserialize)]
struct SessionClaims {
    user_id: String,
}

impl AuthPipeline {
    pub fn new(identity: IdentityClient, private_key: &str) -> Self {
        // session tokens carry only user_id, so signature is the whole check
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            identity,
            decoding_key: DecodingKey::from_secret(private_key.as_bytes()),
            validation,
        }
    }

    /// Resolve the request's credential, in strict priority order.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            let token = value
                .to_str()
                .ok()
                .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
                .filter(|token| !token.is_empty())
                .ok_or_else(|| AuthError::InvalidCredentials {
                    reason: "malformed authorization header".to_string(),
                })?;
            let user_id = self.identity.validate_api_token(token).await?;
            return Ok(AuthContext::Identified { user_id });
        }

        if let Some(token) = session_token(headers) {
            let token = token.ok_or_else(|| AuthError::InvalidCredentials {
                reason: "malformed session token".to_string(),
            })?;
            let user_id = self.verify_session(&token)?;
            return Ok(AuthContext::Identified { user_id });
        }

        if let Some(value) = headers.get(SHARE_TOKEN_HEADER) {
            let token = value.to_str().map_err(|_| AuthError::InvalidCredentials {
                reason: "malformed share token header".to_string(),
            })?;
            let (user_id, scopes) = self.identity.validate_share_token(token).await?;
            return Ok(AuthContext::Shared { user_id, scopes });
        }

        Ok(AuthContext::Anonymous)
    }

    fn verify_session(&self, token: &str) -> Result<String, AuthError> {
        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims.user_id)
            .map_err(|err| AuthError::InvalidCredentials {
                reason: format!("invalid session token: {err}"),
            })
    }
}

/// The session JWT from the `gratheon_session` cookie or the `token`
/// header. `Some(None)` means a credential is present but unreadable.
fn session_token(headers: &HeaderMap) -> Option<Option<String>> {
    if let Some(cookies) = headers.get(header::COOKIE) {
        if let Some(token) = cookies
            .to_str()
            .ok()
            .and_then(|cookies| parse_cookie(cookies, SESSION_COOKIE))
        {
            return Some(Some(token.to_string()));
        }
    }
    headers
        .get(SESSION_HEADER)
        .map(|value| value.to_str().ok().map(str::to_string))
}

/// Parse a specific cookie value from a Cookie header string.
fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').map(str::trim).find_map(|part| {
        part.strip_prefix(name)
            .and_then(|value| value.strip_prefix('='))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;
    use test_log::test;

    const PRIVATE_KEY: &str = "test-secret";

    #[derive(Serialize)]
    struct TestClaims {
        user_id: String,
    }

    fn pipeline(server: &MockServer) -> AuthPipeline {
        AuthPipeline::new(
            IdentityClient::new(Url::parse(&server.base_url()).unwrap()),
            PRIVATE_KEY,
        )
    }

    fn session_jwt(user_id: &str, key: &str) -> String {
        encode(
            &Header::default(),
            &TestClaims {
                user_id: user_id.to_string(),
            },
            &EncodingKey::from_secret(key.as_bytes()),
        )
        .unwrap()
    }

    #[test(tokio::test)]
    async fn test_no_credentials_is_anonymous() {
        let server = MockServer::start();
        let context = pipeline(&server)
            .authenticate(&HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(context, AuthContext::Anonymous);
    }

    #[test(tokio::test)]
    async fn test_bearer_token_resolves_user() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("ValidateApiToken")
                .body_contains("t1");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "data": {"validateApiToken": {"__typename": "TokenUser", "id": "u9"}}
                }));
        });

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer t1".parse().unwrap());
        let context = pipeline(&server).authenticate(&headers).await.unwrap();

        mock.assert();
        assert_eq!(
            context,
            AuthContext::Identified {
                user_id: "u9".to_string()
            }
        );
    }

    #[test(tokio::test)]
    async fn test_rejected_bearer_never_consults_session() {
        // a valid session cookie rides along, but the bearer path wins and
        // its rejection is final
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "data": {"validateApiToken": {"__typename": "Error", "code": "bad"}}
                }));
        });

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
        headers.insert(
            header::COOKIE,
            format!("gratheon_session={}", session_jwt("u1", PRIVATE_KEY))
                .parse()
                .unwrap(),
        );

        let err = pipeline(&server).authenticate(&headers).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials { .. }));
    }

    #[test(tokio::test)]
    async fn test_bearer_preempts_share_token() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("ValidateApiToken");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "data": {"validateApiToken": {"__typename": "TokenUser", "id": "u9"}}
                }));
        });
        let share_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("ValidateShareToken");
            then.status(200);
        });

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer t1".parse().unwrap());
        headers.insert(SHARE_TOKEN_HEADER, "s1".parse().unwrap());

        let context = pipeline(&server).authenticate(&headers).await.unwrap();
        assert_eq!(context.user_id(), Some("u9"));
        assert!(context.share_scopes().is_none());
        api_mock.assert();
        assert_eq!(share_mock.hits(), 0);
    }

    #[test(tokio::test)]
    async fn test_session_cookie_verifies_in_process() {
        let server = MockServer::start();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("other=1; gratheon_session={}", session_jwt("u3", PRIVATE_KEY))
                .parse()
                .unwrap(),
        );

        let context = pipeline(&server).authenticate(&headers).await.unwrap();
        assert_eq!(context.user_id(), Some("u3"));
    }

    #[test(tokio::test)]
    async fn test_session_header_with_bad_signature() {
        let server = MockServer::start();
        let mut headers = HeaderMap::new();
        headers.insert(
            SESSION_HEADER,
            session_jwt("u3", "other-secret").parse().unwrap(),
        );

        let err = pipeline(&server).authenticate(&headers).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials { .. }));
    }

    #[test(tokio::test)]
    async fn test_share_token_resolves_scopes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/graphql")
                .body_contains("ValidateShareToken");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "data": {"validateShareToken": {
                        "__typename": "ShareTokenDetails",
                        "id": "st1",
                        "name": "inspection link",
                        "scopes": r#"{"allowedQueries":[{"queryName":"apiaries"}]}"#,
                        "userId": "u9",
                    }}
                }));
        });

        let mut headers = HeaderMap::new();
        headers.insert(SHARE_TOKEN_HEADER, "s1".parse().unwrap());
        let context = pipeline(&server).authenticate(&headers).await.unwrap();

        assert_eq!(context.user_id(), Some("u9"));
        let scopes = context.share_scopes().unwrap();
        assert!(scopes.allows("apiaries", &Object::new()));
    }

    #[test(tokio::test)]
    async fn test_share_token_without_user_id_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "data": {"validateShareToken": {
                        "__typename": "ShareTokenDetails",
                        "id": "st1",
                        "scopes": "{\"allowedQueries\":[]}",
                    }}
                }));
        });

        let mut headers = HeaderMap::new();
        headers.insert(SHARE_TOKEN_HEADER, "s1".parse().unwrap());
        let err = pipeline(&server).authenticate(&headers).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials { .. }));
    }

    #[test(tokio::test)]
    async fn test_identity_outage_is_a_transport_error() {
        // nothing listens on this port
        let pipeline = AuthPipeline::new(
            IdentityClient::new(Url::parse("http://127.0.0.1:9").unwrap()),
            PRIVATE_KEY,
        );
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer t1".parse().unwrap());

        let err = pipeline.authenticate(&headers).await.unwrap_err();
        assert!(matches!(err, AuthError::IdentityUnavailable { .. }));
    }

    #[test]
    fn test_parse_cookie() {
        assert_eq!(
            parse_cookie("a=1; gratheon_session=tok; b=2", SESSION_COOKIE),
            Some("tok")
        );
        assert_eq!(parse_cookie("a=1; b=2", SESSION_COOKIE), None);
    }
}

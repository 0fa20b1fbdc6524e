use crate::prelude::graphql::*;
use displaydoc::Display;
use serde::Serialize;
use serde_json::json;
use thiserror::Error as ThisError;

/// Error types for subgraph fetching and plan execution.
///
/// These are not returned to the client directly but converted to GraphQL
/// errors carried in the response `errors` array.
#[derive(ThisError, Display, Debug, Clone, Serialize)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
pub enum FetchError {
    /// query could not be planned: {reason}
    ValidationPlanningError {
        /// The failure reason.
        reason: String,
    },

    /// unknown service '{service}' referenced by the query plan
    ValidationUnknownServiceError {
        /// The service that was not found in the registry.
        service: String,
    },

    /// the operation requires variable '{name}' which was not provided
    ValidationMissingVariable {
        /// Name of the missing variable.
        name: String,
    },

    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// Covers both transport failures and non-2xx statuses; `status_code`
    /// is absent when the subgraph was unreachable.
    SubrequestHttpError {
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,

        /// The service that failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed body.
        service: String,

        /// The reason decoding failed.
        reason: String,
    },
}

impl FetchError {
    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let mut extensions = serde_json::to_value(self)
            .ok()
            .and_then(|value| value.as_object().cloned())
            .unwrap_or_default();
        extensions.insert("code".to_string(), self.extension_code().into());
        if let FetchError::SubrequestHttpError {
            status_code: Some(status_code),
            ..
        } = self
        {
            extensions.remove("status_code");
            extensions.insert("http".to_string(), json!({ "status": status_code }));
        }

        Error::builder()
            .message(self.to_string())
            .path(path)
            .extensions(extensions)
            .build()
    }

    /// Convert the error to a response holding this single error.
    pub fn to_response(&self) -> Response {
        Response::builder()
            .errors(vec![self.to_graphql_error(None)])
            .build()
    }

    fn extension_code(&self) -> &'static str {
        match self {
            FetchError::ValidationPlanningError { .. } => "VALIDATION_PLANNING_ERROR",
            FetchError::ValidationUnknownServiceError { .. } => "VALIDATION_UNKNOWN_SERVICE",
            FetchError::ValidationMissingVariable { .. } => "VALIDATION_MISSING_VARIABLE",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
        }
    }
}

impl From<QueryPlannerError> for FetchError {
    fn from(err: QueryPlannerError) -> Self {
        FetchError::ValidationPlanningError {
            reason: err.to_string(),
        }
    }
}

/// Error types for the authentication pipeline.
#[derive(ThisError, Display, Debug, Clone)]
pub enum AuthError {
    /// unauthenticated: {reason}
    InvalidCredentials {
        /// Why the presented credential was rejected.
        reason: String,
    },

    /// identity service unavailable: {reason}
    IdentityUnavailable {
        /// The transport failure toward the identity service.
        reason: String,
    },
}

impl AuthError {
    /// Convert the auth error to a GraphQL error carrying its HTTP status.
    pub fn to_graphql_error(&self) -> Error {
        let (code, status) = match self {
            AuthError::InvalidCredentials { .. } => ("UNAUTHENTICATED", 401),
            AuthError::IdentityUnavailable { .. } => ("INTERNAL_SERVER_ERROR", 500),
        };
        Error::builder()
            .message(self.to_string())
            .extensions(
                json!({ "code": code, "http": { "status": status } })
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            )
            .build()
    }
}

/// Error types for query planning.
#[derive(ThisError, Display, Debug, Clone)]
pub enum QueryPlannerError {
    /// could not parse operation: {reason}
    OperationParseError {
        /// Aggregated parser diagnostics.
        reason: String,
    },

    /// the document contains no executable operation
    NoOperation,

    /// unknown operation '{name}'
    UnknownOperation { name: String },

    /// the document contains multiple operations and no operationName was provided
    AmbiguousOperation,

    /// subscriptions are not supported
    SubscriptionNotSupported,

    /// unknown fragment '{name}'
    UnknownFragment { name: String },

    /// field '{field}' is not provided by any subgraph
    UnroutableField { field: String },
}

/// Error types for supergraph parsing.
#[derive(ThisError, Display, Debug, Clone)]
pub enum SchemaError {
    /// supergraph could not be parsed: {0}
    Parse(String),
}

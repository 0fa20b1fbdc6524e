use crate::prelude::graphql::*;
use apollo_compiler::ast;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The allow-list of operations granted by a share token.
///
/// Serialized form matches the identity service reply and the
/// `X-Share-Scopes` header: `{"allowedQueries":[{"queryName":"hive",
/// "requiredArgs":{"id":"42"}}]}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSet {
    #[serde(default)]
    pub allowed_queries: Vec<ScopeEntry>,
}

/// A single allow-list entry, keyed by top-level field name with optional
/// required-argument constraints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeEntry {
    pub query_name: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub required_args: Option<Object>,
}

impl ScopeSet {
    /// Decode the `scopes` field of a share-token reply. The identity
    /// service has emitted this as an embedded JSON string, as the scope
    /// object itself, and as a bare entry array; all three are accepted.
    pub fn from_reply_value(value: &Value) -> Result<ScopeSet, serde_json::Error> {
        match value {
            Value::String(inner) => serde_json::from_str(inner),
            Value::Array(entries) => {
                serde_json::from_value(json!({ "allowedQueries": entries }))
            }
            other => serde_json::from_value(other.clone()),
        }
    }

    /// Whether an operation naming `field_name` with the given variables is
    /// admitted. Entries are scanned in order; the first entry whose
    /// `query_name` matches and whose required args all equal the
    /// corresponding variables admits the request. Equality is strict JSON
    /// value equality, no type coercion.
    pub fn allows(&self, field_name: &str, variables: &Object) -> bool {
        self.allowed_queries.iter().any(|entry| {
            if entry.query_name != field_name {
                return false;
            }
            entry
                .required_args
                .iter()
                .flat_map(|args| args.iter())
                .all(|(name, required)| variables.get(name) == Some(required))
        })
    }

    /// Parse the operation and decide admission: the first `query`
    /// operation's first top-level selection field is matched against the
    /// allow-list. Anything else, including unparseable documents and
    /// mutations, is denied.
    pub fn allows_operation(&self, query: &str, variables: &Object) -> bool {
        match operation_field_name(query) {
            Some(field_name) => self.allows(&field_name, variables),
            None => false,
        }
    }
}

/// The name of the first top-level selection field of the first `query`
/// operation in the document, if there is one.
fn operation_field_name(query: &str) -> Option<String> {
    let document = ast::Document::parse(query, "operation.graphql").ok()?;
    let operation = document.definitions.iter().find_map(|definition| {
        match definition {
            ast::Definition::OperationDefinition(operation)
                if operation.operation_type == ast::OperationType::Query =>
            {
                Some(operation)
            }
            _ => None,
        }
    })?;
    match operation.selection_set.first()? {
        ast::Selection::Field(field) => Some(field.name.to_string()),
        _ => None,
    }
}

/// The error returned when the scope gate denies an operation.
pub fn forbidden_error() -> Error {
    Error::builder()
        .message("Forbidden: Operation not allowed by share token scope.")
        .extensions(
            json!({ "code": "FORBIDDEN", "http": { "status": 403 } })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        )
        .build()
}

use crate::prelude::graphql::*;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// A graphql request.
/// Used for client operations and subgraph sub-requests alike.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Request {
    /// The graphql query.
    pub query: String,

    /// The optional graphql operation name.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub operation_name: Option<String>,

    /// The optional variables in the form of a json object.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub variables: Option<Object>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub extensions: Object,
}

impl Request {
    /// The request variables, whether present or not.
    pub fn variables(&self) -> Object {
        self.variables.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request() {
        let result = serde_json::from_str::<Request>(
            json!(
            {
              "query": "query aTest($arg1: String!) { test(who: $arg1) }",
              "operationName": "aTest",
              "variables": { "arg1": "me" },
              "extensions": {"extension": 1}
            })
            .to_string()
            .as_str(),
        );
        assert_eq!(
            result.unwrap(),
            Request::builder()
                .query("query aTest($arg1: String!) { test(who: $arg1) }")
                .operation_name(Some("aTest".to_string()))
                .variables(Some(json!({ "arg1": "me" }).as_object().cloned().unwrap()))
                .extensions(json!({"extension": 1}).as_object().cloned().unwrap())
                .build()
        );
    }

    #[test]
    // some clients send { "variables": null } when running operations without
    // variables, and it must parse like an absent field
    fn test_variables_is_null() {
        let result = serde_json::from_str::<Request>(
            json!(
            {
              "query": "{ apiaries { id } }",
              "variables": null,
            })
            .to_string()
            .as_str(),
        );
        assert_eq!(
            result.unwrap(),
            Request::builder().query("{ apiaries { id } }").build()
        );
    }
}

use crate::prelude::graphql::*;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// A graphql primary response.
/// Used for client responses and decoded subgraph replies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "skip_data_if", default)]
    #[builder(default = Value::Object(Default::default()))]
    pub data: Value,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub extensions: Object,
}

fn skip_data_if(value: &Value) -> bool {
    match value {
        Value::Object(o) => o.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

impl Response {
    /// Deep merge a subgraph reply into this response: data merges at the
    /// root, errors and extensions are carried over as-is.
    pub fn merge(&mut self, mut other: Response) {
        self.data.deep_merge(&other.data);
        self.errors.append(&mut other.errors);
        self.extensions.append(&mut other.extensions);
    }

    /// append_errors keeps the subgraph error order.
    pub fn append_errors(&mut self, errors: &mut Vec<Error>) {
        self.errors.append(errors)
    }
}

/// A graphql error as it appears in the `errors` array of a response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The path to the response field the error applies to.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub path: Option<Path>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub extensions: Object,
}

impl Error {
    /// The HTTP status carried in the error's `http.status` extension, if
    /// any. The response formatter maps errors without one to 500.
    pub fn http_status(&self) -> Option<u16> {
        self.extensions
            .get("http")?
            .get("status")?
            .as_u64()
            .map(|status| status as u16)
    }

    /// Wrap this error in a response with no data.
    pub fn to_response(&self) -> Response {
        Response::builder()
            .data(Value::Null)
            .errors(vec![self.clone()])
            .build()
    }
}

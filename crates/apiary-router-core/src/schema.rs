use crate::prelude::graphql::*;
use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Schema;
use std::collections::HashMap;

/// A subgraph endpoint advertised by the supergraph's `join__Graph` enum.
#[derive(Clone, Debug, PartialEq)]
pub struct SubgraphEndpoint {
    pub name: String,
    pub url: String,
}

/// The currently-composed supergraph: the SDL, the subgraph endpoint table
/// and the top-level field routing tables extracted from its federation
/// `join__` directives. Immutable once parsed; a new registry snapshot
/// produces a whole new value with a bumped generation.
#[derive(Debug)]
pub struct Supergraph {
    sdl: String,
    generation: u64,
    endpoints: Vec<SubgraphEndpoint>,
    query_routing: HashMap<String, String>,
    mutation_routing: HashMap<String, String>,
}

impl Supergraph {
    pub fn parse(sdl: impl Into<String>, generation: u64) -> Result<Self, SchemaError> {
        let sdl = sdl.into();
        let schema = Schema::parse(sdl.as_str(), "supergraph.graphql")
            .map_err(|invalid| SchemaError::Parse(invalid.errors.to_string()))?;

        // enum value name -> advertised service name, plus the endpoint table
        let mut graphs: HashMap<String, String> = HashMap::new();
        let mut endpoints = Vec::new();
        if let Some(ExtendedType::Enum(graph_enum)) = schema.types.get("join__Graph") {
            for value in graph_enum.values.values() {
                let Some(directive) = value
                    .directives
                    .iter()
                    .find(|d| d.name.as_str() == "join__graph")
                else {
                    continue;
                };
                match (
                    string_argument(directive, "name"),
                    string_argument(directive, "url"),
                ) {
                    (Some(name), Some(url)) => {
                        graphs.insert(value.value.to_string(), name.to_string());
                        endpoints.push(SubgraphEndpoint {
                            name: name.to_string(),
                            url: url.to_string(),
                        });
                    }
                    _ => {
                        tracing::warn!(
                            value = value.value.as_str(),
                            "join__Graph value without name/url, ignoring"
                        );
                    }
                }
            }
        }

        let query_routing = root_field_routing(
            &schema,
            schema
                .schema_definition
                .query
                .as_ref()
                .map(|root| root.name.as_str())
                .unwrap_or("Query"),
            &graphs,
        );
        let mutation_routing = root_field_routing(
            &schema,
            schema
                .schema_definition
                .mutation
                .as_ref()
                .map(|root| root.name.as_str())
                .unwrap_or("Mutation"),
            &graphs,
        );

        Ok(Self {
            sdl,
            generation,
            endpoints,
            query_routing,
            mutation_routing,
        })
    }

    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Endpoints in `join__Graph` declaration order.
    pub fn endpoints(&self) -> &[SubgraphEndpoint] {
        &self.endpoints
    }

    /// The subgraph owning a top-level field, if any.
    pub fn route_field(&self, kind: OperationKind, field: &str) -> Option<&str> {
        let routing = match kind {
            OperationKind::Query => &self.query_routing,
            OperationKind::Mutation => &self.mutation_routing,
        };
        routing.get(field).map(String::as_str)
    }
}

/// Routing for the fields of one root object type: `@join__field(graph:)`
/// per field, falling back to the type's sole `@join__type(graph:)` owner.
fn root_field_routing(
    schema: &Schema,
    root_name: &str,
    graphs: &HashMap<String, String>,
) -> HashMap<String, String> {
    let Some(ExtendedType::Object(object)) = schema.types.get(root_name) else {
        return HashMap::new();
    };

    let type_owners: Vec<&String> = object
        .directives
        .iter()
        .filter(|d| d.name.as_str() == "join__type")
        .filter_map(|d| enum_argument(d, "graph"))
        .filter_map(|value| graphs.get(value))
        .collect();
    let sole_owner = match type_owners.as_slice() {
        [owner] => Some((*owner).clone()),
        _ => None,
    };

    let mut routing = HashMap::new();
    for (field_name, field) in &object.fields {
        let field_owner = field
            .directives
            .iter()
            .filter(|d| d.name.as_str() == "join__field")
            .filter_map(|d| enum_argument(d, "graph"))
            .find_map(|value| graphs.get(value));

        match field_owner.cloned().or_else(|| sole_owner.clone()) {
            Some(service) => {
                routing.insert(field_name.to_string(), service);
            }
            None => {
                tracing::debug!(
                    field = field_name.as_str(),
                    root = root_name,
                    "top-level field has no owning subgraph"
                );
            }
        }
    }
    routing
}

fn string_argument<'a>(directive: &'a ast::Directive, name: &str) -> Option<&'a str> {
    directive
        .arguments
        .iter()
        .find(|argument| argument.name.as_str() == name)
        .and_then(|argument| argument.value.as_str())
}

fn enum_argument<'a>(directive: &'a ast::Directive, name: &str) -> Option<&'a str> {
    directive
        .arguments
        .iter()
        .find(|argument| argument.name.as_str() == name)
        .and_then(|argument| argument.value.as_enum())
        .map(|value| value.as_str())
}

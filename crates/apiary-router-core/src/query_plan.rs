//! Object model for a query plan: the set of sub-operations a federated
//! request decomposes into, and how they are ordered.

use crate::prelude::graphql::*;
use serde::Serialize;
use std::collections::HashSet;

/// The root query plan container.
#[derive(Debug, PartialEq, Serialize)]
pub struct QueryPlan {
    /// The hierarchical nodes that make up the query plan.
    pub node: Option<PlanNode>,
}

/// The executable kind of an operation. Subscriptions are rejected at
/// planning time and never reach this model.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// Query plans are composed of a set of nodes.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
pub enum PlanNode {
    /// These nodes must be executed in order.
    Sequence {
        /// The plan nodes that make up the sequence execution.
        nodes: Vec<PlanNode>,
    },

    /// These nodes may be executed in parallel.
    Parallel {
        /// The plan nodes that make up the parallel execution.
        nodes: Vec<PlanNode>,
    },

    /// Fetch some data from a subgraph.
    Fetch(FetchNode),
}

impl PlanNode {
    /// Every service name the plan fetches from, in traversal order.
    /// Duplicates are not filtered.
    pub fn service_usage<'a>(&'a self) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            Self::Sequence { nodes } | Self::Parallel { nodes } => {
                Box::new(nodes.iter().flat_map(|x| x.service_usage()))
            }
            Self::Fetch(fetch) => Box::new(std::iter::once(fetch.service_name.as_str())),
        }
    }

    /// Every variable name the plan's fetches use. Duplicates are not
    /// filtered.
    pub fn variable_usage<'a>(&'a self) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            Self::Sequence { nodes } | Self::Parallel { nodes } => {
                Box::new(nodes.iter().flat_map(|x| x.variable_usage()))
            }
            Self::Fetch(fetch) => Box::new(fetch.variable_usages.iter().map(|x| x.as_str())),
        }
    }

    /// Validate that every service the plan fetches from is known to the
    /// registry, so execution can rely on lookups succeeding.
    pub fn validate_services(&self, service_registry: &dyn ServiceRegistry) -> Vec<FetchError> {
        self.service_usage()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|service| !service_registry.has(service))
            .map(|service| FetchError::ValidationUnknownServiceError {
                service: service.to_string(),
            })
            .collect()
    }

    /// Validate that every variable the plan uses was provided with the
    /// request, so sub-requests never silently drop one.
    pub fn validate_variables(&self, variables: &Object) -> Vec<FetchError> {
        let required = self.variable_usage().collect::<HashSet<_>>();
        let provided = variables
            .keys()
            .map(String::as_str)
            .collect::<HashSet<_>>();
        required
            .difference(&provided)
            .map(|name| FetchError::ValidationMissingVariable {
                name: name.to_string(),
            })
            .collect()
    }
}

/// A fetch node.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNode {
    /// The name of the service or subgraph that the fetch is querying.
    pub service_name: String,

    /// The GraphQL sub-operation that is sent to the subgraph.
    pub operation: String,

    /// The variables that are used for the subgraph fetch.
    pub variable_usages: Vec<String>,
}

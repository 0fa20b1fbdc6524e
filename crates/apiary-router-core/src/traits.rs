use crate::prelude::graphql::*;
use async_trait::async_trait;
use std::fmt;

/// A fetcher is responsible for dispatching one sub-request to one subgraph.
#[async_trait]
pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Dispatch the sub-request carrying the request's auth context.
    async fn fetch(
        &self,
        request: Request,
        context: &AuthContext,
    ) -> Result<Response, FetchError>;
}

/// A registry of the fetchers for one supergraph generation, keyed by
/// subgraph name.
pub trait ServiceRegistry: Send + Sync {
    /// Get the fetcher for a subgraph.
    fn get(&self, name: &str) -> Option<&dyn Fetcher>;

    /// Whether the registry knows a subgraph by this name.
    fn has(&self, name: &str) -> bool;
}

/// QueryPlanner can be used to plan queries against a supergraph.
pub trait QueryPlanner: Send + Sync {
    /// Returns a query plan given the query and optional operation name.
    #[must_use = "query plan result must be used"]
    fn plan(
        &self,
        supergraph: &Supergraph,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<QueryPlan, QueryPlannerError>;
}

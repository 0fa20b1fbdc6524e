use crate::prelude::graphql::*;
use derivative::Derivative;
use futures::future;
use futures::lock::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::Instrument;

/// One generation of the federated graph: the parsed supergraph, the
/// planner, and the registry of per-subgraph fetchers built for it.
///
/// The whole value is immutable; the supergraph manager publishes a fresh
/// instance when composition produces a changed supergraph, and request
/// handlers snapshot the current one for the lifetime of a request.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FederatedGraph {
    supergraph: Arc<Supergraph>,
    #[derivative(Debug = "ignore")]
    query_planner: Arc<dyn QueryPlanner>,
    #[derivative(Debug = "ignore")]
    service_registry: Arc<dyn ServiceRegistry>,
}

impl FederatedGraph {
    /// Create a `FederatedGraph` instance used to execute GraphQL requests.
    pub fn new(
        supergraph: Arc<Supergraph>,
        query_planner: Arc<dyn QueryPlanner>,
        service_registry: Arc<dyn ServiceRegistry>,
    ) -> Self {
        Self {
            supergraph,
            query_planner,
            service_registry,
        }
    }

    pub fn supergraph(&self) -> &Arc<Supergraph> {
        &self.supergraph
    }

    /// Plan the request and execute it across subgraphs. Fetch failures
    /// become GraphQL errors in the response; data from the subgraphs that
    /// did answer is preserved.
    pub async fn execute(&self, request: Request, context: &AuthContext) -> Response {
        let plan = {
            let span = tracing::trace_span!("query_planning");
            let _guard = span.enter();
            match self.query_planner.plan(
                &self.supergraph,
                &request.query,
                request.operation_name.as_deref(),
            ) {
                Ok(QueryPlan { node: Some(root) }) => root,
                Ok(QueryPlan { node: None }) => return Response::builder().build(),
                Err(err) => return FetchError::from(err).to_response(),
            }
        };
        tracing::trace!("query plan:\n{:#?}", plan);

        let variables = request.variables();

        let mut early_errors = Vec::new();
        for err in plan.validate_services(self.service_registry.as_ref()) {
            early_errors.push(err.to_graphql_error(None));
        }
        for err in plan.validate_variables(&variables) {
            early_errors.push(err.to_graphql_error(None));
        }

        // validation problems abort the request before any dispatch
        if !early_errors.is_empty() {
            tracing::error!(errors = format!("{:?}", early_errors).as_str());
            return Response::builder().errors(early_errors).build();
        }

        let response = Arc::new(Mutex::new(Response::builder().build()));
        execute(
            Arc::clone(&response),
            &plan,
            &variables,
            context,
            Arc::clone(&self.service_registry),
        )
        .instrument(tracing::info_span!("execution"))
        .await;

        Arc::try_unwrap(response)
            .expect("execution is done and all tasks dropped their clone; qed")
            .into_inner()
    }
}

fn execute<'a>(
    response: Arc<Mutex<Response>>,
    plan: &'a PlanNode,
    variables: &'a Object,
    context: &'a AuthContext,
    service_registry: Arc<dyn ServiceRegistry>,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        match plan {
            PlanNode::Sequence { nodes } => {
                for node in nodes {
                    execute(
                        Arc::clone(&response),
                        node,
                        variables,
                        context,
                        Arc::clone(&service_registry),
                    )
                    .instrument(tracing::trace_span!("execute-sequence"))
                    .await;
                }
            }
            PlanNode::Parallel { nodes } => {
                future::join_all(nodes.iter().map(|node| {
                    execute(
                        Arc::clone(&response),
                        node,
                        variables,
                        context,
                        Arc::clone(&service_registry),
                    )
                }))
                .instrument(tracing::trace_span!("execute-parallel"))
                .await;
            }
            PlanNode::Fetch(info) => {
                if let Err(err) = fetch_node(
                    Arc::clone(&response),
                    info,
                    variables,
                    context,
                    service_registry,
                )
                .instrument(tracing::trace_span!("execute-fetch"))
                .await
                {
                    tracing::error!("fetch error: {}", err);
                    response
                        .lock()
                        .await
                        .errors
                        .push(err.to_graphql_error(None));
                }
            }
        }
    })
}

async fn fetch_node(
    response: Arc<Mutex<Response>>,
    FetchNode {
        service_name,
        operation,
        variable_usages,
    }: &FetchNode,
    variables: &Object,
    context: &AuthContext,
    service_registry: Arc<dyn ServiceRegistry>,
) -> Result<(), FetchError> {
    let fetcher = service_registry.get(service_name).ok_or_else(|| {
        FetchError::ValidationUnknownServiceError {
            service: service_name.clone(),
        }
    })?;

    let sub_variables: Object = variable_usages
        .iter()
        .filter_map(|key| variables.get(key).map(|value| (key.clone(), value.clone())))
        .collect();

    let sub_request = Request::builder()
        .query(operation.clone())
        .variables((!sub_variables.is_empty()).then_some(sub_variables))
        .build();

    let sub_response = fetcher
        .fetch(sub_request, context)
        .instrument(tracing::info_span!("subgraph", service = service_name.as_str()))
        .await?;

    response.lock().await.merge(sub_response);
    Ok(())
}

use anyhow::Context as _;
use apiary_router::auth::{AuthPipeline, IdentityClient};
use apiary_router::configuration::Configuration;
use apiary_router::manager::{graph_publisher, SharedGraph, SupergraphManager};
use apiary_router::registry::SchemaRegistryClient;
use apiary_router::server::{self, RouterState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let configuration = Configuration::from_env().context("loading configuration")?;
    tracing::info!(
        registry = %configuration.schema_registry_url,
        identity = %configuration.user_cycle_url,
        poll_interval_ms = configuration.poll_interval_ms,
        "starting gateway"
    );
    if configuration.sentry_dsn.is_some() {
        tracing::info!("error reporting configured, handled by an external reporter");
    }
    if let Some(broker) = &configuration.kafka_broker_url {
        tracing::info!(broker = broker.as_str(), "query log broker configured");
    }

    let shared = Arc::new(SharedGraph::default());
    let auth = Arc::new(AuthPipeline::new(
        IdentityClient::new(configuration.user_cycle_url.clone()),
        &configuration.private_key,
    ));

    let manager = SupergraphManager::new(
        SchemaRegistryClient::new(configuration.schema_registry_url.clone()),
        graph_publisher(Arc::clone(&shared), configuration.subgraph_timeout()),
    );
    let mut manager_handle = manager
        .initialize(configuration.poll_interval())
        .await
        .context("building the initial supergraph")?;

    let server_handle = server::serve(
        RouterState {
            graph: shared,
            auth,
        },
        configuration.listen,
    )
    .await
    .context("starting the http server")?;
    tracing::info!("gateway ready on {}", server_handle.listen_address());

    tokio::signal::ctrl_c()
        .await
        .context("listening for the shutdown signal")?;
    tracing::info!("shutting down");
    manager_handle.cancel().await;
    server_handle.shutdown().await?;
    Ok(())
}

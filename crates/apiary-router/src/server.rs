//! The HTTP surface: the playground, the GraphQL execution endpoint, the
//! composed-SDL endpoint, and the top-level error formatter.

use crate::auth::AuthPipeline;
use crate::cors;
use crate::manager::SharedGraph;
use apiary_router_core::prelude::graphql::*;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use displaydoc::Display;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Server error.
#[derive(Debug, ThisError, Display)]
pub enum ServerError {
    /// could not bind to the listen address: {0}
    Bind(std::io::Error),
    /// http server error: {0}
    Http(std::io::Error),
    /// http server task failed
    HttpServerLifecycle,
}

/// Shared state of the request handlers: the current-graph cell and the
/// auth pipeline.
#[derive(Clone)]
pub struct RouterState {
    pub graph: Arc<SharedGraph>,
    pub auth: Arc<AuthPipeline>,
}

/// Build the route table.
pub fn router(state: RouterState) -> Router {
    Router::new()
        .route("/graphql", get(serve_playground).post(handle_graphql))
        .route("/schema.graphql", get(serve_schema))
        .fallback(not_found)
        .layer(middleware::from_fn(cors::layer))
        .with_state(state)
}

/// Bind and start serving. The returned handle owns the shutdown channel.
pub async fn serve(
    state: RouterState,
    listen: SocketAddr,
) -> Result<HttpServerHandle, ServerError> {
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(ServerError::Bind)?;
    let listen_address = listener.local_addr().map_err(ServerError::Bind)?;
    let (shutdown_sender, mut shutdown_receiver) = watch::channel(false);

    let app = router(state);
    let server_future = tokio::task::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_receiver.changed().await;
            })
            .await
            .map_err(ServerError::Http)
    });

    tracing::info!(%listen_address, "http server listening");
    Ok(HttpServerHandle {
        shutdown_sender,
        server_future,
        listen_address,
    })
}

/// A handle with which a client can shut down the server gracefully.
pub struct HttpServerHandle {
    shutdown_sender: watch::Sender<bool>,
    server_future: JoinHandle<Result<(), ServerError>>,
    listen_address: SocketAddr,
}

impl HttpServerHandle {
    /// The listen address the server actually bound; differs from the
    /// configured one when port zero was requested.
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    pub async fn shutdown(self) -> Result<(), ServerError> {
        if self.shutdown_sender.send(true).is_err() {
            tracing::error!("failed to notify http server of shutdown");
        }
        self.server_future
            .await
            .map_err(|_| ServerError::HttpServerLifecycle)?
    }
}

async fn serve_playground() -> Html<&'static str> {
    Html(include_str!("playground.html"))
}

async fn serve_schema(State(state): State<RouterState>) -> axum::response::Response {
    match state.graph.snapshot() {
        Some(graph) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            graph.supergraph().sdl().to_string(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "supergraph not yet composed").into_response(),
    }
}

async fn handle_graphql(
    State(state): State<RouterState>,
    headers: HeaderMap,
    Json(request): Json<Request>,
) -> axum::response::Response {
    let context = match state.auth.authenticate(&headers).await {
        Ok(context) => context,
        Err(err) => return error_response(err.to_graphql_error()),
    };

    if let Some(scopes) = context.share_scopes() {
        if !scopes.allows_operation(&request.query, &request.variables()) {
            tracing::info!(
                user_id = context.user_id().unwrap_or_default(),
                "share token scope denied the operation"
            );
            return error_response(forbidden_error());
        }
    }

    // hold one generation through planning and dispatch
    let Some(graph) = state.graph.snapshot() else {
        return error_response(unavailable_error());
    };

    let response = graph.execute(request, &context).await;
    Json(response).into_response()
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found!")
}

/// Single GraphQL error reply; the status comes from the error's
/// `http.status` extension, defaulting to 500.
fn error_response(error: Error) -> axum::response::Response {
    let status = error
        .http_status()
        .and_then(|status| StatusCode::from_u16(status).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.to_response())).into_response()
}

fn unavailable_error() -> Error {
    Error::builder()
        .message("supergraph not yet composed")
        .extensions(
            json!({ "code": "SERVICE_UNAVAILABLE", "http": { "status": 503 } })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        )
        .build()
}

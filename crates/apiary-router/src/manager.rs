//! The supergraph manager owns the currently-published supergraph and keeps
//! it fresh: it polls the schema registry, detects SDL changes, composes,
//! and atomically swaps the published graph.

use crate::composer::{self, CompositionError};
use crate::registry::{SchemaFetcher, SubgraphDescriptor};
use crate::subgraph::HttpServiceRegistry;
use apiary_router_core::prelude::graphql::*;
use arc_swap::ArcSwapOption;
use displaydoc::Display;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Served when the registry knows no subgraphs and no previous supergraph
/// exists. Requests against it fail planning, but the gateway stays up and
/// `/schema.graphql` keeps answering.
pub const FALLBACK_SDL: &str = "type Query {\n  _up: Boolean\n}\n";

/// Manager error.
#[derive(Debug, Error, Display)]
pub enum ManagerError {
    /// the registry returned no routable subgraphs and no previous supergraph exists
    NoSupergraph,
    /// composition failed with no previous supergraph to fall back to: {0}
    Composition(#[from] CompositionError),
}

/// Lifecycle of the manager. `Polling` is only entered with a positive poll
/// interval; `Stopped` is terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManagerState {
    Initialized,
    Polling,
    Stopped,
}

/// Invoked with the new SDL and its generation whenever composition
/// produces a changed supergraph.
pub type PublishCallback = Box<dyn Fn(&str, u64) + Send + Sync>;

/// The cross-task cell holding the current [`FederatedGraph`]. Written by
/// the manager, snapshotted by request handlers; never mutated in place.
#[derive(Default)]
pub struct SharedGraph(ArcSwapOption<FederatedGraph>);

impl SharedGraph {
    /// Snapshot the current graph. A request holds its snapshot through
    /// dispatch, so a concurrent publish never mixes generations.
    pub fn snapshot(&self) -> Option<Arc<FederatedGraph>> {
        self.0.load_full()
    }

    /// Atomically replace the current graph.
    pub fn replace(&self, graph: FederatedGraph) {
        self.0.store(Some(Arc::new(graph)));
    }
}

/// The publish callback used by the gateway: parse the SDL, build the
/// per-subgraph fetchers for that generation, and swap the shared cell.
pub fn graph_publisher(
    shared: Arc<SharedGraph>,
    subgraph_timeout: Option<Duration>,
) -> PublishCallback {
    Box::new(move |sdl, generation| {
        let supergraph = match Supergraph::parse(sdl, generation) {
            Ok(supergraph) => Arc::new(supergraph),
            Err(err) => {
                tracing::error!("not publishing unparseable supergraph: {err}");
                return;
            }
        };
        let registry = HttpServiceRegistry::for_supergraph(&supergraph, subgraph_timeout);
        shared.replace(FederatedGraph::new(
            Arc::clone(&supergraph),
            Arc::new(RoutingPlanner),
            Arc::new(registry),
        ));
        tracing::info!(
            generation,
            subgraphs = supergraph.endpoints().len(),
            "published new supergraph"
        );
    })
}

struct BuildOutcome {
    sdl: String,
    schema_changed: bool,
}

/// The manager proper. Owns the per-subgraph SDL cache used for change
/// detection and the last successfully composed SDL; nothing else reads
/// either.
pub struct SupergraphManager<F: SchemaFetcher> {
    fetcher: F,
    publish: PublishCallback,
    sdl_cache: HashMap<String, String>,
    last_valid_sdl: Option<String>,
    published_sdl: Option<String>,
    generation: u64,
    state: Arc<Mutex<ManagerState>>,
}

impl<F: SchemaFetcher> SupergraphManager<F> {
    pub fn new(fetcher: F, publish: PublishCallback) -> Self {
        Self {
            fetcher,
            publish,
            sdl_cache: HashMap::new(),
            last_valid_sdl: None,
            published_sdl: None,
            generation: 0,
            state: Arc::new(Mutex::new(ManagerState::Initialized)),
        }
    }

    /// Perform the first build synchronously, then start the poll loop when
    /// a positive interval is configured. Fails hard when no supergraph at
    /// all can be built.
    pub async fn initialize(
        mut self,
        poll_interval: Duration,
    ) -> Result<ManagerHandle, ManagerError> {
        let outcome = self.build_supergraph().await?;
        self.publish_if_changed(outcome);

        let state = Arc::clone(&self.state);
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let task = if !poll_interval.is_zero() {
            *state.lock().expect("state lock poisoned") = ManagerState::Polling;
            Some(tokio::task::spawn(
                self.poll_loop(poll_interval, shutdown_receiver),
            ))
        } else {
            None
        };

        Ok(ManagerHandle {
            shutdown_sender,
            task,
            state,
        })
    }

    async fn poll_loop(mut self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(poll_interval) => {
                    self.cycle(&shutdown).await;
                }
            }
        }
        *self.state.lock().expect("state lock poisoned") = ManagerState::Stopped;
        tracing::debug!("supergraph poll loop stopped");
    }

    /// One poll cycle. Failures are logged and absorbed; a failed cycle
    /// never aborts the loop.
    async fn cycle(&mut self, shutdown: &watch::Receiver<bool>) {
        match self.build_supergraph().await {
            Ok(outcome) => {
                if *shutdown.borrow() {
                    return;
                }
                self.publish_if_changed(outcome);
            }
            Err(err) => {
                tracing::error!("supergraph build failed: {err}");
            }
        }
    }

    async fn build_supergraph(&mut self) -> Result<BuildOutcome, ManagerError> {
        let (descriptors, saw_error) = self.fetcher.fetch().await;
        if saw_error {
            tracing::warn!("schema registry unavailable, treating as an empty snapshot");
        }
        let schema_changed = self.detect_changes(&descriptors);

        if descriptors.is_empty() {
            return match &self.last_valid_sdl {
                Some(sdl) => Ok(BuildOutcome {
                    sdl: sdl.clone(),
                    schema_changed: false,
                }),
                None => Ok(BuildOutcome {
                    sdl: FALLBACK_SDL.to_string(),
                    schema_changed: true,
                }),
            };
        }

        let routable: Vec<&SubgraphDescriptor> =
            descriptors.iter().filter(|d| d.url.is_some()).collect();
        if routable.is_empty() {
            return match &self.last_valid_sdl {
                Some(sdl) => Ok(BuildOutcome {
                    sdl: sdl.clone(),
                    schema_changed: false,
                }),
                None => Err(ManagerError::NoSupergraph),
            };
        }

        match composer::compose(&routable) {
            Ok(sdl) => {
                self.last_valid_sdl = Some(sdl.clone());
                Ok(BuildOutcome {
                    sdl,
                    schema_changed,
                })
            }
            Err(err) => match &self.last_valid_sdl {
                Some(sdl) => {
                    tracing::error!("composition failed, keeping the last valid supergraph: {err}");
                    Ok(BuildOutcome {
                        sdl: sdl.clone(),
                        schema_changed: false,
                    })
                }
                None => Err(err.into()),
            },
        }
    }

    /// Compare each descriptor's SDL against the cache, updating it as a
    /// side effect. A subgraph counts as changed when it is new or its SDL
    /// differs from the cached copy.
    fn detect_changes(&mut self, descriptors: &[SubgraphDescriptor]) -> bool {
        let mut changed = false;
        for descriptor in descriptors {
            if self.sdl_cache.get(&descriptor.name) != Some(&descriptor.type_defs) {
                self.sdl_cache
                    .insert(descriptor.name.clone(), descriptor.type_defs.clone());
                changed = true;
            }
        }
        changed
    }

    /// Publication is edge-triggered: the callback fires only when the
    /// snapshot changed and the SDL differs textually from the previously
    /// published one.
    fn publish_if_changed(&mut self, outcome: BuildOutcome) {
        if !outcome.schema_changed {
            return;
        }
        if self.published_sdl.as_deref() == Some(outcome.sdl.as_str()) {
            return;
        }
        self.generation += 1;
        (self.publish)(&outcome.sdl, self.generation);
        self.published_sdl = Some(outcome.sdl);
    }
}

/// Handle used to observe and stop the manager. Cancellation is
/// cooperative and idempotent; after `cancel()` returns no further publish
/// calls occur.
pub struct ManagerHandle {
    shutdown_sender: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    state: Arc<Mutex<ManagerState>>,
}

impl ManagerHandle {
    pub fn state(&self) -> ManagerState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub async fn cancel(&mut self) {
        let _ = self.shutdown_sender.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        *self.state.lock().expect("state lock poisoned") = ManagerState::Stopped;
    }
}

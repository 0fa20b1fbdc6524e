//! Composition of subgraph SDLs into a supergraph SDL through the federated
//! composition engine.

use crate::registry::SubgraphDescriptor;
use apollo_federation::subgraph::Subgraph;
use apollo_federation::Supergraph;
use displaydoc::Display;
use thiserror::Error;

/// Composition error.
#[derive(Debug, Error, Display, Clone)]
pub enum CompositionError {
    /// subgraph '{name}' could not be expanded: {reason}
    SubgraphExpansion { name: String, reason: String },
    /// composition reported errors: {errors}
    Merge { errors: String },
    /// composition produced an empty supergraph
    EmptySupergraph,
}

/// Compose the given descriptors into a supergraph SDL. Pure aside from
/// logging; the caller decides what a failure means for the currently
/// served supergraph.
pub fn compose(descriptors: &[&SubgraphDescriptor]) -> Result<String, CompositionError> {
    let mut subgraphs = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        let url = descriptor.url.as_deref().unwrap_or_default();
        let subgraph = Subgraph::parse_and_expand(&descriptor.name, url, &descriptor.type_defs)
            .map_err(|err| CompositionError::SubgraphExpansion {
                name: descriptor.name.clone(),
                reason: err.to_string(),
            })?;
        subgraphs.push(subgraph);
    }

    let supergraph =
        Supergraph::compose(subgraphs.iter().collect()).map_err(|failure| {
            CompositionError::Merge {
                errors: failure.errors.join("; "),
            }
        })?;

    let schema: &apollo_compiler::Schema = supergraph.schema.schema();
    let sdl = schema.to_string();
    if sdl.trim().is_empty() {
        return Err(CompositionError::EmptySupergraph);
    }
    tracing::debug!(
        subgraphs = descriptors.len(),
        sdl_bytes = sdl.len(),
        "composed supergraph"
    );
    Ok(sdl)
}

//! Core engine for the federated GraphQL gateway: the GraphQL data model,
//! the supergraph model with its routing tables, the query planner, scope
//! matching for share tokens, and the federated executor.

mod context;
mod error;
mod federated;
mod json_ext;
mod planner;
mod query_plan;
mod request;
mod response;
mod schema;
mod scope;
mod traits;

pub use context::*;
pub use error::*;
pub use federated::*;
pub use json_ext::*;
pub use planner::*;
pub use query_plan::*;
pub use request::*;
pub use response::*;
pub use schema::*;
pub use scope::*;
pub use traits::*;

pub mod prelude {
    pub use crate::json_ext::ValueExt;
    pub use crate::schema::Supergraph;
    pub use crate::traits::*;
    pub mod graphql {
        pub use crate::*;
    }
}

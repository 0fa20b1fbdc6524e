use crate::prelude::graphql::*;

/// The authenticated identity attached to a request.
///
/// Built once by the auth pipeline before planning, then read-only through
/// scope enforcement and subgraph dispatch. A request carries exactly one of
/// these shapes; credential failures are surfaced as [`AuthError`] by the
/// pipeline instead of a context.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum AuthContext {
    /// No credential was presented.
    #[default]
    Anonymous,

    /// A bearer or session credential resolved to an internal user.
    Identified { user_id: String },

    /// A share token resolved to a user plus an operation allow-list.
    Shared { user_id: String, scopes: ScopeSet },
}

impl AuthContext {
    /// The internal user id to stamp on subgraph requests, if any.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuthContext::Anonymous => None,
            AuthContext::Identified { user_id } | AuthContext::Shared { user_id, .. } => {
                Some(user_id)
            }
        }
    }

    /// The share-token scope set, when the request is scope-bounded.
    pub fn share_scopes(&self) -> Option<&ScopeSet> {
        match self {
            AuthContext::Shared { scopes, .. } => Some(scopes),
            _ => None,
        }
    }
}

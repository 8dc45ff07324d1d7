//! Token-based client authentication.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::MuxError;

/// Identity of a single authenticated client of the proxy.
///
/// Serializable because the control plane carries it through request
/// metadata after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,
}

/// A token-based authentication provider.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Client, MuxError>;
}

/// Authenticates against an immutable token table fixed at construction.
pub struct StaticAuthenticator {
    clients: HashMap<String, Client>,
}

impl StaticAuthenticator {
    /// The table is copied so later mutation of the source cannot change
    /// who is allowed in.
    pub fn new(clients: &HashMap<String, Client>) -> Self {
        Self {
            clients: clients.clone(),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, token: &str) -> Result<Client, MuxError> {
        self.clients
            .get(token)
            .cloned()
            .ok_or(MuxError::InvalidToken)
    }
}

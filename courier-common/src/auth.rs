//! Per-tenant client authentication configuration.
//!
//! Tenants configure how the relay authenticates against their sync endpoint.
//! The shape mirrors the stored JSON: `{"method": "bearer", "token": "..."}`.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

/// How to authenticate outbound calls to a tenant's sync endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ClientAuth {
    /// No authentication header.
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// `Authorization: Basic base64(user:password)`
    Basic { user: String, password: String },
}

impl ClientAuth {
    /// Render the `Authorization` header value, if any.
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Bearer { token } => Some(format!("Bearer {token}")),
            Self::Basic { user, password } => {
                let credentials = STANDARD.encode(format!("{user}:{password}"));
                Some(format!("Basic {credentials}"))
            }
        }
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::rollback::Rollback;

/// Credential of the user or service that triggered an operation.
///
/// Only operations started through the authorized API (sink create, update,
/// enable) carry one. Background operations do not.
#[derive(Clone)]
pub struct ApiAuthorization {
    token: SecretString,
}

impl ApiAuthorization {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into()),
        }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl fmt::Debug for ApiAuthorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiAuthorization([REDACTED])")
    }
}

/// Per-operation context threaded through hooks and bridge calls.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub now: DateTime<Utc>,
    pub authorization: Option<ApiAuthorization>,
    pub rollback: Rollback,
}

impl OperationContext {
    /// Context of a background operation without API authority.
    #[must_use]
    pub fn background(now: DateTime<Utc>) -> Self {
        Self {
            now,
            authorization: None,
            rollback: Rollback::new(),
        }
    }

    /// Context of an operation started through the authorized API.
    #[must_use]
    pub fn authorized(now: DateTime<Utc>, token: impl Into<String>) -> Self {
        Self {
            now,
            authorization: Some(ApiAuthorization::new(token)),
            rollback: Rollback::new(),
        }
    }

    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.authorization.is_some()
    }
}

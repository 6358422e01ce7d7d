use thiserror::Error;

use crate::jid::Jid;

/// Errors that can cross the backend contract boundary.
///
/// Transport adapters translate every transport-native failure (HTTP status codes,
/// exit codes, RPC faults, socket errors) into exactly one of these variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmppBackendError {
    /// The targeted account (or session) does not exist. Renders as the JID.
    #[error("{0}")]
    UserNotFound(Jid),

    /// Attempted creation of an account that already exists.
    #[error("User already exists")]
    UserExists,

    /// The operation is not available on the detected server version.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The remote server could not be reached at all.
    #[error("Error reaching backend: {0}")]
    Connection(String),

    /// The remote server responded but signaled a failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A configured backend could not be resolved.
    #[error("Invalid backend: {0}")]
    InvalidBackend(String),
}

impl XmppBackendError {
    /// `UserNotFound` for a bare account.
    pub fn user_not_found(node: &str, domain: &str) -> Self {
        Self::UserNotFound(Jid::new(node, domain))
    }

    /// `UserNotFound` for one specific session of an account.
    pub fn session_not_found(node: &str, domain: &str, resource: &str) -> Self {
        Self::UserNotFound(Jid::with_resource(node, domain, resource))
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn connection(cause: impl std::fmt::Display) -> Self {
        Self::Connection(cause.to_string())
    }

    /// Whether a caller may reasonably retry the operation.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, XmppBackendError>;

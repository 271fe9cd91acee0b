//! Unified error taxonomy for the connection server core.
//! Admission, authentication and configuration failures are distinguished so
//! callers can decide whether a retry makes sense; "not found" cases
//! (unknown client id, missing/expired token) are never errors and are
//! modelled as `Option`/no-op returns at the call sites instead.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerError {
    /// Connection limit reached. Retryable after backoff; no state was changed.
    ConnectionNotAvailable { message: String },
    /// Wrong credentials, or a connect against a live client id under a different user.
    Authentication { message: String },
    /// A connection validator vetoed the attempt.
    Validation { message: String },
    /// A login extension vetoed or failed the attempt.
    Login { message: String },
    /// The collaborator session factory failed; its message is carried verbatim.
    Session { message: String },
    /// Programming error in server setup or core usage (duplicate extension
    /// registration, malformed request, mismatched trace start/end).
    Configuration { message: String },
}

impl ServerError {
    pub fn message(&self) -> &str {
        match self {
            ServerError::ConnectionNotAvailable { message }
            | ServerError::Authentication { message }
            | ServerError::Validation { message }
            | ServerError::Login { message }
            | ServerError::Session { message }
            | ServerError::Configuration { message } => message.as_str(),
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            ServerError::ConnectionNotAvailable { .. } => "connection_not_available",
            ServerError::Authentication { .. } => "authentication",
            ServerError::Validation { .. } => "validation",
            ServerError::Login { .. } => "login",
            ServerError::Session { .. } => "session",
            ServerError::Configuration { .. } => "configuration",
        }
    }

    pub fn not_available() -> Self {
        ServerError::ConnectionNotAvailable { message: "connection limit reached".into() }
    }
    pub fn authentication<S: Into<String>>(msg: S) -> Self { ServerError::Authentication { message: msg.into() } }
    pub fn validation<S: Into<String>>(msg: S) -> Self { ServerError::Validation { message: msg.into() } }
    pub fn login<S: Into<String>>(msg: S) -> Self { ServerError::Login { message: msg.into() } }
    pub fn session<S: Into<String>>(msg: S) -> Self { ServerError::Session { message: msg.into() } }
    pub fn configuration<S: Into<String>>(msg: S) -> Self { ServerError::Configuration { message: msg.into() } }

    /// True when the caller may retry the same request unchanged after backoff.
    /// Only capacity rejections qualify; everything else needs a changed request
    /// or a fixed server setup.
    pub fn retryable(&self) -> bool {
        matches!(self, ServerError::ConnectionNotAvailable { .. })
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind_str(), self.message())
    }
}

impl std::error::Error for ServerError {}

pub type ServerResult<T> = Result<T, ServerError>;

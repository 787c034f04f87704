//! Error types for the avatar session manager

use std::fmt;

/// Result type alias using the session manager's Error
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP status the avatar service uses to signal it is overloaded
pub const SERVER_OVERLOADED_STATUS: u16 = 529;

/// Classification of a failed control-API call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteServiceKind {
    /// Service is overloaded or unreachable; a user-facing retry makes sense
    Unavailable,
    /// The request itself was refused (4xx); retrying will not help
    Rejected,
    /// The service failed while handling a valid request
    ServerError,
}

impl RemoteServiceKind {
    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            429 | 503 | SERVER_OVERLOADED_STATUS => RemoteServiceKind::Unavailable,
            400..=499 => RemoteServiceKind::Rejected,
            _ => RemoteServiceKind::ServerError,
        }
    }
}

impl fmt::Display for RemoteServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteServiceKind::Unavailable => write!(f, "service unavailable"),
            RemoteServiceKind::Rejected => write!(f, "request rejected"),
            RemoteServiceKind::ServerError => write!(f, "server error"),
        }
    }
}

/// Errors that can occur while running an avatar session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Control API returned a non-2xx response or could not be reached
    #[error("Remote service error during {operation} ({kind}, status {status:?}): {message}")]
    RemoteService {
        /// Control API operation (create, answer, ice, speak, stop)
        operation: &'static str,
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Failure classification
        kind: RemoteServiceKind,
        /// Response body or transport failure description
        message: String,
    },

    /// Malformed or out-of-order SDP handling
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Peer connection entered the failed state or could not be built
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transient per-frame draw failure
    #[error("Compositor frame error: {0}")]
    CompositorFrame(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation needs a connected session
    #[error("Session not active: {0}")]
    SessionNotActive(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a remote service error from an HTTP status
    pub fn remote(operation: &'static str, status: u16, message: impl Into<String>) -> Self {
        Error::RemoteService {
            operation,
            status: Some(status),
            kind: RemoteServiceKind::from_status(status),
            message: message.into(),
        }
    }

    /// Check if this error is worth a retry prompt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RemoteService {
                kind: RemoteServiceKind::Unavailable,
                ..
            }
        )
    }

    /// Check if this error came from the control API
    pub fn is_remote_service(&self) -> bool {
        matches!(self, Error::RemoteService { .. })
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// HTTP status of a remote service error
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RemoteService { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtc(err.to_string())
    }
}

//! Stream and auth error types.

/// Result type alias for stream operations. Defaults to [`StreamError`].
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Errors raised by transports, the snapshot source and the probe.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Push channel failure (handshake, protocol or I/O).
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server rejected the credential.
    #[error("unauthorized ({status})")]
    Unauthorized {
        /// HTTP status code (401 or 403).
        status: u16,
    },

    /// The server answered with an unexpected status.
    #[error("unexpected status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        message: String,
    },

    /// Invalid request parameters (bad URL, bad header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl StreamError {
    /// Map a non-success status into the right variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if matches!(status, 401 | 403) {
            Self::Unauthorized { status }
        } else {
            Self::Status {
                status,
                message: message.into(),
            }
        }
    }

    /// Whether this is an authorization rejection.
    pub fn is_auth_rejection(&self) -> bool {
        match self {
            Self::Unauthorized { .. } => true,
            Self::Http(e) => e
                .status()
                .is_some_and(|s| s == reqwest::StatusCode::UNAUTHORIZED || s == reqwest::StatusCode::FORBIDDEN),
            _ => false,
        }
    }

    /// Whether reconnecting could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| {
                        s == reqwest::StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                    })
            }
            Self::WebSocket(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Unauthorized { .. } | Self::Json(_) | Self::InvalidRequest(_) => false,
        }
    }

    /// Short category label for logs and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) | Self::WebSocket(_) => "network",
            Self::Json(_) => "parse",
            Self::Unauthorized { .. } => "auth",
            Self::Status { .. } => "status",
            Self::InvalidRequest(_) => "request",
        }
    }
}

/// Errors raised while refreshing a credential.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The refresh endpoint rejected the request.
    #[error("refresh rejected ({status}): {message}")]
    RefreshRejected {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
    },

    /// The credential carries no refresh token.
    #[error("no refresh token available")]
    NotConfigured,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

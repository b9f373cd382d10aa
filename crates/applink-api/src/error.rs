use thiserror::Error;

/// Top-level error type for the `applink-api` crate.
///
/// Covers every failure mode across the API surfaces: authorization,
/// transport, the REST endpoints, the event stream, and persistent token
/// storage. `applink-core` maps these into consumer-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authorization ───────────────────────────────────────────────
    /// The remote rejected the bearer token (expired or revoked).
    #[error("Authorization failed: {message}")]
    Authorization { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success status from an API endpoint.
    #[error("API error (HTTP {status}): {message}")]
    Api { message: String, status: u16 },

    // ── Event stream ────────────────────────────────────────────────
    /// The event-stream channel could not be established or broke down.
    #[error("Event stream failed: {0}")]
    Stream(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Token storage ───────────────────────────────────────────────
    /// Persistent token store read/write failure.
    #[error("Token store error: {message}")]
    Store { message: String },
}

impl Error {
    /// Returns `true` if this error indicates the bearer token is no longer
    /// accepted and a refresh might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Stream(_) => true,
            _ => false,
        }
    }

    /// The HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

// ── Core error types ──
//
// Consumer-facing errors from applink-core. These are NOT transport
// specific -- the hub glue never sees raw HTTP status codes or JSON parse
// failures directly. The `From<applink_api::Error>` impl translates
// transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the appliance API: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authorization failed: {message}")]
    AuthorizationFailed { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    /// The discovery listing reported a type code the registry does not
    /// know. Expected for exotic appliances; never registered with the hub.
    #[error("Unsupported device type code: {type_code}")]
    UnsupportedDevice { type_code: i64 },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<applink_api::Error> for CoreError {
    fn from(err: applink_api::Error) -> Self {
        match err {
            applink_api::Error::Authorization { message } => {
                CoreError::AuthorizationFailed { message }
            }
            applink_api::Error::Transport(ref e) => {
                if e.is_connect() || e.is_timeout() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            applink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            applink_api::Error::Api { message, status } => CoreError::Api {
                message,
                status: Some(status),
            },
            applink_api::Error::Stream(reason) => CoreError::ConnectionFailed {
                reason: format!("event stream failed: {reason}"),
            },
            applink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            applink_api::Error::Store { message } => CoreError::Config { message },
        }
    }
}

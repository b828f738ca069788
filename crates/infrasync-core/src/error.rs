// ── Core error types ──
//
// Errors surfaced by the reconciler and infra client. Transport failures
// arrive wrapped in `Channel`; everything else describes what the peer
// said or why a request was refused before reaching it.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Reconciler state ─────────────────────────────────────────────
    /// The peer's cache has not been (re)built since the last reset.
    #[error("Peer state not initialized")]
    NotInitialized,

    /// A requested entity differs from the one already on the peer.
    #[error("{peer} entity {kind} {name} was updated - updates are not supported")]
    UpdateNotSupported {
        peer: &'static str,
        kind: String,
        name: String,
    },

    /// The entity cannot be sent to a peer in this form.
    #[error("Invalid entity: {message}")]
    InvalidEntity { message: String },

    #[error("Entity not found: {kind} {name}")]
    NotFound { kind: String, name: String },

    // ── Peer responses ───────────────────────────────────────────────
    /// Router management call answered with a non-2xx status.
    #[error("Response with status code {code}: {description}")]
    Status { code: u16, description: String },

    /// Broker management call reported failure.
    #[error("Operation failed: {message}")]
    OperationFailed { message: String },

    #[error("Unexpected response: {message}")]
    UnexpectedResponse { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    // ── Channel ──────────────────────────────────────────────────────
    #[error(transparent)]
    Channel(#[from] infrasync_amqp::Error),

    #[error("Operation cancelled")]
    Cancelled,

    // ── Scheduling ───────────────────────────────────────────────────
    #[error("No brokers available for placement")]
    NoBrokersAvailable,

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Returns `true` when the peer's mirrored state can no longer be
    /// trusted and must be re-read after reconnecting.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Channel(e) if e.is_connection_error())
    }

    /// Returns `true` for a 404 from the peer or a missing entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { code: 404, .. } | Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

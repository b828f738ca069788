use thiserror::Error;

/// Top-level error type for the `infrasync-amqp` crate.
///
/// Cloneable so one link failure can be fanned out to every request that
/// was in flight when it happened. `infrasync-core` maps these into
/// reconciler errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Channel state ───────────────────────────────────────────────
    /// The channel has no live link to its peer yet.
    #[error("Not connected to {addr}")]
    NotConnected { addr: String },

    /// No response arrived within the request deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The channel was stopped before the request completed.
    #[error("Command channel shut down")]
    Shutdown,

    // ── Transport ───────────────────────────────────────────────────
    /// Connection could not be established or was lost at the socket level
    /// (refused, reset, DNS, TLS handshake).
    #[error("Network error: {0}")]
    Network(String),

    /// Session or link failure on an otherwise established connection.
    #[error("Link error: {0}")]
    Link(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Data ────────────────────────────────────────────────────────
    /// A message body could not be encoded or decoded.
    #[error("Codec error: {message}")]
    Codec { message: String },
}

impl Error {
    /// Returns `true` if the error means the link to the peer is gone or
    /// unusable, so any state mirrored from that peer must be re-read.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. }
                | Self::Timeout { .. }
                | Self::Shutdown
                | Self::Network(_)
                | Self::Link(_)
        )
    }

    /// Returns `true` for socket-level failures, which back off longer
    /// than link-level ones before reconnecting.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec {
            message: err.to_string(),
        }
    }
}

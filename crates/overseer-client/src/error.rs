//! Gateway client error types.

use thiserror::Error;

/// Errors surfaced by [`GatewayClient`](crate::GatewayClient).
///
/// `Clone` so that every caller collapsed onto one connect attempt receives
/// the same outcome.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The gateway rejected the connect request.
    #[error("handshake rejected: {reason}")]
    Handshake {
        /// Server-supplied message.
        reason: String,
    },

    /// No hello-ok within the handshake window.
    #[error("handshake timed out after {timeout_ms}ms")]
    HandshakeTimeout {
        /// The window that elapsed.
        timeout_ms: u64,
    },

    /// Transport failure (open, read or write).
    #[error("socket error: {0}")]
    Socket(String),

    /// The gateway answered a call with `ok: false`.
    #[error("gateway error [{code}]: {message}")]
    Rpc {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// No response within the request deadline.
    #[error("{method} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Method that timed out.
        method: String,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The connection carrying the call went away.
    #[error("gateway connection closed")]
    Disconnected,

    /// No authenticated connection to send on.
    #[error("not connected to gateway")]
    NotConnected,

    /// Unexpected frame or payload.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. }
                | Self::Socket(_)
                | Self::RequestTimeout { .. }
                | Self::Disconnected
                | Self::NotConnected
        )
    }
}

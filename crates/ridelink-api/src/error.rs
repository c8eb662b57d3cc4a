use thiserror::Error;

/// Top-level error type for the `ridelink-api` crate.
///
/// Covers every failure mode across both backend surfaces: the real-time
/// socket session and the HTTP query API. `ridelink-core` maps these into
/// domain errors; consumers never see them raw.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend rejected the supplied identity or token.
    #[error("Authentication rejected: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Query API ───────────────────────────────────────────────────
    /// The query API answered with `success: false`.
    #[error("Query API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    // ── Socket ──────────────────────────────────────────────────────
    /// Socket handshake failed.
    #[error("Socket connection failed: {0}")]
    SocketConnect(String),

    /// Socket closed underneath an operation.
    #[error("Socket closed (code {code}): {reason}")]
    SocketClosed { code: u16, reason: String },

    /// A frame could not be handed to the session (session already gone).
    #[error("Socket session is no longer running")]
    SessionGone,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the backend refused the credential.
    pub fn is_auth_rejected(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Api { status, .. } => matches!(status, Some(401 | 403)),
            Self::Transport(e) => matches!(
                e.status(),
                Some(reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN)
            ),
            _ => false,
        }
    }

    /// Returns `true` if this is a network-level failure worth one
    /// immediate retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::SocketConnect(_) | Self::SessionGone => true,
            Self::Api { status, .. } => matches!(status, Some(502..=504)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_is_detected_from_status() {
        let err = Error::Api {
            message: "token expired".into(),
            status: Some(401),
        };
        assert!(err.is_auth_rejected());
        assert!(!err.is_transient());
    }

    #[test]
    fn gateway_errors_are_transient() {
        let err = Error::Api {
            message: "bad gateway".into(),
            status: Some(502),
        };
        assert!(err.is_transient());
        assert!(Error::SessionGone.is_transient());
        assert!(!Error::Deserialization {
            message: "eof".into(),
            body: String::new()
        }
        .is_transient());
    }
}

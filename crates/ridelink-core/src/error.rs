// ── Core error types ──
//
// User-facing errors from ridelink-core. Consumers never see HTTP status
// codes or socket handshake failures directly: the `From<ridelink_api::Error>`
// impls translate transport-layer errors into domain variants.

use thiserror::Error;

use crate::model::CandidateDriver;

/// Copy shown whenever an emergency alert could not reach the backend.
pub const EMERGENCY_FALLBACK: &str =
    "The alert could not be sent. Contact local emergency services directly.";

// ── Connection ───────────────────────────────────────────────────────

/// Failures of an explicit `connect()` / `reconnect()` call.
///
/// Failures after a session is up are never returned as errors; they show
/// up as connection-state transitions instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Connection timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Credential rejected by backend: {message}")]
    AuthRejected { message: String },

    #[error("Transport error: {reason}")]
    Transport { reason: String },
}

impl ConnectionError {
    /// Auth rejections need new credentials; retrying them is pointless.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthRejected { .. })
    }
}

impl From<ridelink_api::Error> for ConnectionError {
    fn from(err: ridelink_api::Error) -> Self {
        if err.is_auth_rejected() {
            return Self::AuthRejected {
                message: err.to_string(),
            };
        }
        match err {
            ridelink_api::Error::Timeout { timeout_secs } => Self::Timeout { timeout_secs },
            other => Self::Transport {
                reason: other.to_string(),
            },
        }
    }
}

// ── Search ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("No driver found after {attempts} attempts")]
    NoCandidates { attempts: u32 },

    /// The candidate is kept so the caller can re-confirm before giving up.
    #[error("Could not confirm driver {}: {reason}", candidate.id)]
    ConfirmFailed {
        candidate: Box<CandidateDriver>,
        reason: String,
    },

    #[error("Backend unreachable: {reason}")]
    BackendUnreachable { reason: String },

    #[error("A search is already running for {engagement_id}")]
    AlreadySearching { engagement_id: String },

    #[error("No found driver is waiting for confirmation")]
    NothingToConfirm,

    #[error("Search was cancelled")]
    Cancelled,
}

// ── Validation ───────────────────────────────────────────────────────

/// Input rejected before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("An emergency alert is already active for ride {ride_id}")]
    DuplicateEmergency { ride_id: String },

    #[error("A current location is required")]
    MissingLocation,

    #[error("Missing ride id")]
    MissingEngagementId,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message exceeds {max} characters")]
    MessageTooLong { max: usize },
}

// ── Emergency ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmergencyError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Emergency alert for ride {ride_id} was not delivered. {fallback}")]
    NotDelivered {
        ride_id: String,
        fallback: &'static str,
    },
}

impl EmergencyError {
    pub(crate) fn not_delivered(ride_id: impl Into<String>) -> Self {
        Self::NotDelivered {
            ride_id: ride_id.into(),
            fallback: EMERGENCY_FALLBACK,
        }
    }
}

// ── Stale results ────────────────────────────────────────────────────

/// A response tagged with a superseded attempt token.
///
/// Only ever logged; never returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stale attempt token {received} (current {current})")]
pub struct StateConflict {
    pub current: u64,
    pub received: u64,
}

// ── Collaborator calls ───────────────────────────────────────────────

/// Unified error for calls into external collaborators (query API,
/// history cache).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Cannot reach backend: {reason}")]
    Unreachable { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Backend rejected the request: {message}")]
    Rejected {
        message: String,
        status: Option<u16>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether one immediate retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Timeout { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<ridelink_api::Error> for CoreError {
    fn from(err: ridelink_api::Error) -> Self {
        if err.is_auth_rejected() {
            return CoreError::AuthenticationFailed {
                message: err.to_string(),
            };
        }
        let transient = err.is_transient();
        match err {
            ridelink_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            ridelink_api::Error::Transport(ref e) if e.is_timeout() => {
                CoreError::Timeout { timeout_secs: 0 }
            }
            ridelink_api::Error::Api { message, status } if !transient => {
                CoreError::Rejected { message, status }
            }
            ridelink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ridelink_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            ridelink_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            other => CoreError::Unreachable {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_auth_failures_map_to_auth_rejected() {
        let err = ConnectionError::from(ridelink_api::Error::Authentication {
            message: "bad token".into(),
        });
        assert!(matches!(err, ConnectionError::AuthRejected { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn gateway_errors_stay_transient() {
        let err = CoreError::from(ridelink_api::Error::Api {
            message: "upstream down".into(),
            status: Some(503),
        });
        assert!(err.is_transient(), "got {err:?}");

        let err = CoreError::from(ridelink_api::Error::Api {
            message: "ride not found".into(),
            status: Some(404),
        });
        assert_eq!(
            err,
            CoreError::Rejected {
                message: "ride not found".into(),
                status: Some(404)
            }
        );
    }

    #[test]
    fn duplicate_emergency_reads_already_active() {
        let err = EmergencyError::from(ValidationError::DuplicateEmergency {
            ride_id: "r-1".into(),
        });
        assert!(err.to_string().contains("already active"));
    }
}

//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use ridelink_config::ConfigError;
use ridelink_core::{ConnectionError, CoreError, SearchError, ValidationError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the ridelink backend at {url}")]
    #[diagnostic(
        code(ridelink::connection_failed),
        help(
            "Check the server and api URLs of your profile.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(ridelink::auth_failed),
        help(
            "The backend refused the token.\n\
             Run: ridelink config init --profile {profile}"
        )
    )]
    AuthFailed { profile: String },

    #[error("No token configured for profile '{profile}'")]
    #[diagnostic(
        code(ridelink::no_credentials),
        help(
            "Configure a token with: ridelink config init\n\
             Or set the RIDELINK_TOKEN environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Rides ────────────────────────────────────────────────────────
    #[error("No driver found after {attempts} attempts")]
    #[diagnostic(
        code(ridelink::no_driver),
        help("Try again later or widen max_radius_km in the profile's search settings.")
    )]
    NoDriver { attempts: u32 },

    #[error("{message}")]
    #[diagnostic(code(ridelink::search_failed))]
    SearchFailed { message: String },

    #[error("Ride '{ride_id}' not found")]
    #[diagnostic(code(ridelink::not_found))]
    NotFound { ride_id: String },

    #[error("Backend error: {message}")]
    #[diagnostic(code(ridelink::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ridelink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(ridelink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: ridelink config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No backend configured")]
    #[diagnostic(
        code(ridelink::no_config),
        help(
            "Create a profile with: ridelink config init\n\
             Or pass --server and --api.\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(ridelink::config))]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(ridelink::timeout),
        help("Increase the timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(ridelink::encode))]
    Encode(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::NoDriver { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. }
            | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Prompt / terminal interaction failure.
    pub fn prompt(err: impl std::fmt::Display) -> Self {
        Self::Validation {
            field: "interactive".into(),
            reason: format!("prompt failed: {err}"),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::UnknownProfile { name } => Self::ProfileNotFound {
                name,
                available: String::new(),
            },
            other => Self::Config(Box::new(other)),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unreachable { reason } => Self::ConnectionFailed {
                url: "(query api)".into(),
                reason,
            },
            CoreError::AuthenticationFailed { .. } => Self::AuthFailed {
                profile: "current".into(),
            },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::Rejected { message, .. } | CoreError::Internal(message) => {
                Self::ApiError { message }
            }
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

impl From<ridelink_api::Error> for CliError {
    fn from(err: ridelink_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

impl From<ConnectionError> for CliError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::AuthRejected { .. } => Self::AuthFailed {
                profile: "current".into(),
            },
            ConnectionError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            ConnectionError::Transport { reason } => Self::ConnectionFailed {
                url: "(socket)".into(),
                reason,
            },
        }
    }
}

impl From<SearchError> for CliError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::NoCandidates { attempts } => Self::NoDriver { attempts },
            SearchError::BackendUnreachable { reason } => Self::ConnectionFailed {
                url: "(query api)".into(),
                reason,
            },
            other => Self::SearchFailed {
                message: other.to_string(),
            },
        }
    }
}

impl From<ValidationError> for CliError {
    fn from(err: ValidationError) -> Self {
        Self::Validation {
            field: "input".into(),
            reason: err.to_string(),
        }
    }
}

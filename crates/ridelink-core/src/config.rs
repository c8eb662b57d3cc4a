// ── Runtime client configuration ──
//
// These types describe how the coordination layer behaves: where the
// backend lives and how every timer and budget is tuned. They never touch
// disk. The CLI (via ridelink-config) constructs a `ClientConfig` and hands
// it in.

use std::time::Duration;

use ridelink_api::TlsMode;
use url::Url;

/// Top-level configuration for one [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Real-time socket endpoint (e.g. `wss://rides.example.com/socket`).
    pub server_url: Url,
    /// Base URL of the HTTP query API.
    pub api_url: Url,
    /// Timeout for individual query API calls.
    pub request_timeout: Duration,
    /// TLS trust for query API calls.
    pub tls: TlsMode,
    pub connection: ConnectionConfig,
    pub search: SearchConfig,
    pub chat: ChatConfig,
    pub emergency: EmergencyConfig,
}

impl ClientConfig {
    /// Configuration with default tuning for the given endpoints.
    pub fn new(server_url: Url, api_url: Url) -> Self {
        Self {
            server_url,
            api_url,
            request_timeout: Duration::from_secs(15),
            tls: TlsMode::System,
            connection: ConnectionConfig::default(),
            search: SearchConfig::default(),
            chat: ChatConfig::default(),
            emergency: EmergencyConfig::default(),
        }
    }
}

/// Connection lifecycle tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// First reconnect delay; each further attempt doubles it.
    pub backoff_base: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

/// Expanding-radius search tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub initial_radius_km: f64,
    pub radius_increment_km: f64,
    pub max_radius_km: f64,
    pub max_attempts: u32,
    pub attempt_deadline: Duration,
    /// Attempts with an index at or above this value carry a high priority hint.
    pub escalate_priority_at: u32,
    /// Polling cadence when the push path is unavailable.
    pub poll_interval: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            initial_radius_km: 5.0,
            radius_increment_km: 2.0,
            max_radius_km: 20.0,
            max_attempts: 5,
            attempt_deadline: Duration::from_secs(300),
            escalate_priority_at: 2,
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub max_message_chars: usize,
    /// Idle time after the last keystroke before `typingStop` is sent.
    pub typing_debounce: Duration,
    /// How long a remote typing indicator survives without a `typingStop`.
    pub remote_typing_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 1000,
            typing_debounce: Duration::from_secs(3),
            remote_typing_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyConfig {
    /// Safety timeout after which an unresolved alert resolves itself.
    pub auto_resolve_after: Duration,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            auto_resolve_after: Duration::from_secs(30 * 60),
        }
    }
}

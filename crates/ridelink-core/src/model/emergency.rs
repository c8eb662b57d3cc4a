// ── Emergency domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::GeoPoint;

/// What the user supplies when raising an alert.
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyRequest {
    pub ride_id: String,
    pub location: Option<GeoPoint>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAlert {
    pub id: String,
    pub ride_id: String,
    /// `None` when raised by this client.
    pub raised_by: Option<String>,
    pub location: Option<GeoPoint>,
    pub reason: Option<String>,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Resolved by this client.
    Manual,
    /// The backend reported the alert resolved.
    Remote,
    /// The safety timeout elapsed.
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmergencyUpdate {
    Triggered(EmergencyAlert),
    Resolved {
        ride_id: String,
        alert_id: String,
        resolution: Resolution,
    },
}

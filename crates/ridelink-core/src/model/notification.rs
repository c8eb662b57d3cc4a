// ── Notification domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use uuid::Uuid;

use super::engagement::EngagementStatus;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NotificationKind {
    RideRequested,
    DriverFound,
    DriverArriving,
    DriverArrived,
    RideStarted,
    RideCompleted,
    RideCancelled,
    RideTimedOut,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationPriority {
    Normal,
    High,
    Critical,
}

/// Side effect of an accepted status transition, handed to the
/// presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub engagement_id: String,
    pub status: EngagementStatus,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// ── Engagement domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use super::common::LocationFix;

/// What is being fulfilled. Every kind shares the same lifecycle.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EngagementKind {
    #[default]
    Ride,
    Order,
    Errand,
    Parcel,
}

/// Lifecycle status of an engagement.
///
/// The progress chain is `Requested → Accepted → Arriving → Arrived →
/// InProgress → Completed`. `Cancelled` and `Timeout` are terminal
/// exceptions that may interrupt the chain.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EngagementStatus {
    Requested,
    Accepted,
    Arriving,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
    Timeout,
}

impl EngagementStatus {
    /// Position on the progress chain. Terminal exceptions rank above
    /// every progress status.
    pub fn rank(self) -> u8 {
        match self {
            Self::Requested => 0,
            Self::Accepted => 1,
            Self::Arriving => 2,
            Self::Arrived => 3,
            Self::InProgress => 4,
            Self::Completed => 5,
            Self::Cancelled | Self::Timeout => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Timeout)
    }

    /// `Cancelled` or `Timeout`: terminal states outside the progress chain.
    pub fn is_terminal_exception(self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }

    /// Whether an update to `incoming` should replace `self`.
    ///
    /// Nothing leaves a terminal state. A terminal exception interrupts any
    /// live status, including `Arrived` and `InProgress`, which is wider
    /// than the transition table allows on purpose: a late cancel or
    /// timeout from the backend always wins. Everything else must move
    /// strictly forward.
    pub fn accepts(self, incoming: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        incoming.is_terminal_exception() || incoming.rank() > self.rank()
    }

    /// Parse a backend status string, tolerating case, separators and the
    /// aliases older backends emit.
    pub fn from_wire(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "requested" | "pending" | "searching" => Some(Self::Requested),
            "accepted" | "driver_assigned" | "assigned" => Some(Self::Accepted),
            "arriving" | "en_route" | "driver_arriving" => Some(Self::Arriving),
            "arrived" | "driver_arrived" => Some(Self::Arrived),
            "in_progress" | "inprogress" | "started" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "timeout" | "timed_out" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// Who is involved in an engagement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub requester_id: Option<String>,
    pub agent_id: Option<String>,
}

/// A single ride / order / errand / parcel tracked end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub id: String,
    pub kind: EngagementKind,
    pub status: EngagementStatus,
    pub participants: Participants,
    pub server_version: Option<u64>,
    pub driver_location: Option<LocationFix>,
    pub updated_at: DateTime<Utc>,
}

impl Engagement {
    /// A freshly requested engagement.
    pub fn requested(id: impl Into<String>, kind: EngagementKind) -> Self {
        Self {
            id: id.into(),
            kind,
            status: EngagementStatus::Requested,
            participants: Participants::default(),
            server_version: None,
            driver_location: None,
            updated_at: Utc::now(),
        }
    }
}

/// A normalized `rideStatusUpdate`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub engagement_id: String,
    pub status: EngagementStatus,
    /// Full snapshot when the backend included one.
    pub snapshot: Option<Engagement>,
    /// Agent now serving the engagement, if the update names one.
    pub agent_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(engagement_id: impl Into<String>, status: EngagementStatus) -> Self {
        Self {
            engagement_id: engagement_id.into(),
            status,
            snapshot: None,
            agent_id: None,
            at: Utc::now(),
        }
    }
}

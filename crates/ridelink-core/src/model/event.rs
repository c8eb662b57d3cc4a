// ── Inbound / outbound event types ──
//
// `InboundEvent` is the validated tagged union the router produces from raw
// frames. `OutboundEvent` serializes straight into a `WireFrame` with the
// backend's event names and camelCase payload fields.

use chrono::{DateTime, Utc};
use ridelink_api::WireFrame;
use serde::Serialize;
use strum::IntoStaticStr;

use super::chat::{ChatMessage, MessageType};
use super::common::{GeoPoint, LocationFix};
use super::emergency::EmergencyAlert;
use super::engagement::{Engagement, StatusUpdate};
use super::search::{CandidateDriver, PriorityHint};

/// A normalized server event.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum InboundEvent {
    RideStatusUpdate(StatusUpdate),
    DriverLocationUpdate { ride_id: String, fix: LocationFix },
    NewMessage(ChatMessage),
    RideCreated(Engagement),
    TypingStart {
        ride_id: String,
        user_id: Option<String>,
    },
    TypingStop {
        ride_id: String,
        user_id: Option<String>,
    },
    EmergencyTriggered(EmergencyAlert),
    EmergencyResolved {
        ride_id: String,
        alert_id: Option<String>,
    },
    AgentOffer {
        attempt_token: u64,
        candidates: Vec<CandidateDriver>,
    },
    AgentRejected {
        attempt_token: u64,
        reason: Option<String>,
    },
    Pong { at: DateTime<Utc> },
}

impl InboundEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// The engagement this event concerns, if any.
    pub fn engagement_id(&self) -> Option<&str> {
        match self {
            Self::RideStatusUpdate(update) => Some(&update.engagement_id),
            Self::RideCreated(engagement) => Some(&engagement.id),
            Self::NewMessage(message) => Some(&message.ride_id),
            Self::EmergencyTriggered(alert) => Some(&alert.ride_id),
            Self::DriverLocationUpdate { ride_id, .. }
            | Self::TypingStart { ride_id, .. }
            | Self::TypingStop { ride_id, .. }
            | Self::EmergencyResolved { ride_id, .. } => Some(ride_id),
            Self::AgentOffer { .. } | Self::AgentRejected { .. } | Self::Pong { .. } => None,
        }
    }
}

/// Everything the client emits over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, IntoStaticStr)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
#[strum(serialize_all = "camelCase")]
pub enum OutboundEvent {
    JoinRideRoom {
        ride_id: String,
    },
    LeaveRideRoom {
        ride_id: String,
    },
    SendMessage {
        ride_id: String,
        message: String,
        message_type: MessageType,
        client_message_id: String,
        timestamp: DateTime<Utc>,
    },
    UpdateDriverLocation {
        ride_id: String,
        location: GeoPoint,
        heading: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    TypingStart {
        ride_id: String,
    },
    TypingStop {
        ride_id: String,
    },
    TriggerEmergency {
        ride_id: String,
        alert_id: String,
        location: GeoPoint,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ResolveEmergency {
        ride_id: String,
        alert_id: String,
        expired: bool,
    },
    RequestAgents {
        ride_id: String,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        attempt_token: u64,
        priority: PriorityHint,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
}

impl OutboundEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Encode as a socket frame.
    pub fn to_frame(&self) -> Result<WireFrame, serde_json::Error> {
        serde_json::to_value(self).and_then(serde_json::from_value)
    }
}

// ── Chat domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Location,
    System,
}

/// Local delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Appended locally, waiting for the server echo.
    Pending,
    /// Confirmed by the server (or received from a peer).
    Sent,
    /// Could not be handed to the transport; resent on reconnect.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server id once confirmed; a `tmp-` id while pending.
    pub id: String,
    /// Temporary id generated by the sending client, echoed back by the
    /// server as `clientMessageId`.
    pub client_id: Option<String>,
    pub ride_id: String,
    pub sender_id: String,
    pub body: String,
    pub message_type: MessageType,
    pub sent_at: DateTime<Utc>,
    pub delivery: Delivery,
}

impl ChatMessage {
    pub fn is_local_pending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending | Delivery::Failed)
    }
}

/// Change feed for chat observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    Appended(ChatMessage),
    /// A pending message was matched to its server echo.
    Confirmed { temp_id: String, message: ChatMessage },
    Failed { ride_id: String, temp_id: String },
    Typing {
        ride_id: String,
        user_id: Option<String>,
        active: bool,
    },
}

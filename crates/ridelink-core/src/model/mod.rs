// ── Domain model ──
//
// Canonical client-side representation of everything the coordination
// layer tracks. Wire payloads are normalized into these types at the
// router boundary (see `convert`); nothing downstream touches raw JSON.

pub mod chat;
pub mod common;
pub mod emergency;
pub mod engagement;
pub mod event;
pub mod notification;
pub mod search;

// ── Re-exports ──────────────────────────────────────────────────────
// Flat access: `use ridelink_core::model::*` gives you everything.

pub use common::{GeoPoint, LocationFix};

pub use engagement::{Engagement, EngagementKind, EngagementStatus, Participants, StatusUpdate};

pub use search::{
    CandidateDriver, PriorityHint, SearchOutcome, SearchRequest, SearchSession, SearchStatus,
};

pub use notification::{NotificationEvent, NotificationKind, NotificationPriority};

pub use chat::{ChatMessage, ChatUpdate, Delivery, MessageType};

pub use emergency::{EmergencyAlert, EmergencyRequest, EmergencyUpdate, Resolution};

pub use event::{InboundEvent, OutboundEvent};

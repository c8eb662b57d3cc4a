// ridelink-core: real-time coordination layer between ridelink-api and consumers.

pub mod chat;
pub mod config;
pub mod connection;
pub mod convert;
pub mod coordinator;
pub mod emergency;
pub mod error;
pub mod model;
pub mod presence;
pub mod reconciler;
pub mod router;
pub mod search;
pub mod stream;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use chat::{ChatRelay, HistoryCache, HistoryKey, InMemoryHistoryCache};
pub use config::{ChatConfig, ClientConfig, ConnectionConfig, EmergencyConfig, SearchConfig};
pub use connection::{Connected, ConnectionManager, ConnectionPhase, ConnectionState, ListenerId};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use emergency::EmergencyRelay;
pub use error::{
    ConnectionError, CoreError, EmergencyError, SearchError, StateConflict, ValidationError,
};
pub use presence::PresenceChannels;
pub use reconciler::{NotificationPresenter, RideStateReconciler, Transition};
pub use router::EventRouter;
pub use search::{AgentFinder, CandidateQuery, ConfirmVerdict, HttpAgentFinder, SearchCoordinator};
pub use stream::{StateStream, StateWatchStream};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    // Engagement
    Engagement, EngagementKind, EngagementStatus, GeoPoint, LocationFix, Participants,
    StatusUpdate,
    // Search
    CandidateDriver, PriorityHint, SearchOutcome, SearchRequest, SearchSession, SearchStatus,
    // Notifications
    NotificationEvent, NotificationKind, NotificationPriority,
    // Chat / emergency
    ChatMessage, ChatUpdate, Delivery, EmergencyAlert, EmergencyRequest, EmergencyUpdate,
    MessageType, Resolution,
    // Wire events
    InboundEvent, OutboundEvent,
};

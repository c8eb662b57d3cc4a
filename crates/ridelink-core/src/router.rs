// ── Event router ──
//
// Turns raw socket frames into `InboundEvent`s and hands each one to the
// reducer that owns it, synchronously and in delivery order. Nothing is
// buffered here; every reducer is idempotent because the backend may replay
// events across reconnects.

use std::sync::Arc;

use ridelink_api::WireFrame;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::chat::ChatRelay;
use crate::connection::{ConnectionManager, ListenerId};
use crate::convert::{PayloadError, normalize};
use crate::emergency::EmergencyRelay;
use crate::model::InboundEvent;
use crate::presence::PresenceChannels;
use crate::reconciler::RideStateReconciler;
use crate::search::SearchCoordinator;

const EVENT_CHANNEL_SIZE: usize = 256;

pub struct EventRouter {
    reconciler: Arc<RideStateReconciler>,
    presence: Arc<PresenceChannels>,
    chat: ChatRelay,
    emergency: EmergencyRelay,
    search: SearchCoordinator,
    events: broadcast::Sender<Arc<InboundEvent>>,
}

impl EventRouter {
    pub fn new(
        reconciler: Arc<RideStateReconciler>,
        presence: Arc<PresenceChannels>,
        chat: ChatRelay,
        emergency: EmergencyRelay,
        search: SearchCoordinator,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            reconciler,
            presence,
            chat,
            emergency,
            search,
            events,
        }
    }

    /// Register as the connection's frame handler.
    ///
    /// Holds only a weak reference, so dropping the router detaches it.
    pub fn attach(self: &Arc<Self>, connection: &ConnectionManager) -> ListenerId {
        let router = Arc::downgrade(self);
        connection.on_frame(move |frame| {
            if let Some(router) = router.upgrade() {
                router.route(frame);
            }
        })
    }

    /// Normalize and dispatch one frame. Returns `false` if it was dropped.
    pub fn route(&self, frame: &WireFrame) -> bool {
        match normalize(frame) {
            Ok(event) => {
                self.dispatch(event);
                true
            }
            Err(PayloadError::UnknownKind(kind)) => {
                debug!(kind = %kind, "ignoring unknown event kind");
                false
            }
            Err(e) => {
                warn!(error = %e, event = %frame.event, "dropping malformed event");
                false
            }
        }
    }

    /// Apply a normalized event to its reducer, then publish it.
    pub fn dispatch(&self, event: InboundEvent) {
        let event = Arc::new(event);
        trace!(kind = event.kind(), "dispatching event");

        match &*event {
            InboundEvent::RideStatusUpdate(update) => {
                let transition = self.reconciler.apply_status(update);
                if let Some(t) = transition.filter(|t| t.to.is_terminal()) {
                    info!(engagement = %t.engagement_id, status = %t.to, "engagement ended");
                    self.presence.leave(&t.engagement_id);
                    self.chat.clear_typing(&t.engagement_id);
                    self.search.abandon(&t.engagement_id);
                }
            }
            InboundEvent::DriverLocationUpdate { ride_id, fix } => {
                self.reconciler.apply_location(ride_id, *fix);
            }
            InboundEvent::NewMessage(message) => {
                self.chat.receive(message.clone());
            }
            InboundEvent::RideCreated(engagement) => {
                self.reconciler.track(engagement.clone());
                self.presence.join(&engagement.id);
            }
            InboundEvent::TypingStart { ride_id, user_id } => {
                self.chat.remote_typing_started(ride_id, user_id.clone());
            }
            InboundEvent::TypingStop { ride_id, .. } => {
                self.chat.remote_typing_stopped(ride_id);
            }
            InboundEvent::EmergencyTriggered(alert) => {
                self.emergency.record_remote(alert.clone());
            }
            InboundEvent::EmergencyResolved { ride_id, alert_id } => {
                self.emergency.record_resolved(ride_id, alert_id.as_deref());
            }
            InboundEvent::AgentOffer {
                attempt_token,
                candidates,
            } => self.search.offer(*attempt_token, candidates.clone()),
            InboundEvent::AgentRejected {
                attempt_token,
                reason,
            } => self.search.reject(*attempt_token, reason.clone()),
            InboundEvent::Pong { .. } => {}
        }

        let _ = self.events.send(event);
    }

    /// Every event after its reducer ran.
    pub fn events(&self) -> broadcast::Receiver<Arc<InboundEvent>> {
        self.events.subscribe()
    }
}

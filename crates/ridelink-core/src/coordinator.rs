// ── Coordinator ──
//
// Wires every component around one ConnectionManager and owns their
// lifecycle. Consumers talk to this facade; the components stay reachable
// through accessors for finer-grained use.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use ridelink_api::Connector;
use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::chat::{ChatRelay, HistoryCache, InMemoryHistoryCache};
use crate::config::ClientConfig;
use crate::connection::{Connected, ConnectionManager, ConnectionState, ListenerId};
use crate::emergency::EmergencyRelay;
use crate::error::{ConnectionError, EmergencyError, SearchError, ValidationError};
use crate::model::{
    ChatMessage, EmergencyAlert, EmergencyRequest, Engagement, InboundEvent, LocationFix,
    NotificationEvent, OutboundEvent, SearchOutcome, SearchRequest,
};
use crate::presence::PresenceChannels;
use crate::reconciler::{NotificationPresenter, RideStateReconciler};
use crate::router::EventRouter;
use crate::search::{AgentFinder, SearchCoordinator};
use crate::stream::StateStream;

// ── Builder ──────────────────────────────────────────────────────────

pub struct CoordinatorBuilder {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    finder: Arc<dyn AgentFinder>,
    presenter: Option<Arc<dyn NotificationPresenter>>,
    history: Option<Arc<dyn HistoryCache>>,
}

impl CoordinatorBuilder {
    pub fn presenter(mut self, presenter: Arc<dyn NotificationPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Defaults to an [`InMemoryHistoryCache`].
    pub fn history_cache(mut self, cache: Arc<dyn HistoryCache>) -> Self {
        self.history = Some(cache);
        self
    }

    /// Build the component graph. Does NOT connect; call
    /// [`Coordinator::connect()`] for that.
    pub fn build(self) -> Coordinator {
        let config = self.config;
        let connection = ConnectionManager::new(
            config.server_url.clone(),
            config.connection.clone(),
            self.connector,
        );
        let reconciler = Arc::new(RideStateReconciler::new(self.presenter));
        let presence = Arc::new(PresenceChannels::new(connection.clone()));
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(InMemoryHistoryCache::new()));
        let chat = ChatRelay::new(config.chat.clone(), connection.clone(), history);
        let emergency = EmergencyRelay::new(config.emergency.clone(), connection.clone());
        let search = SearchCoordinator::new(
            config.search.clone(),
            connection.clone(),
            self.finder,
            Arc::clone(&reconciler),
        );
        let router = Arc::new(EventRouter::new(
            Arc::clone(&reconciler),
            Arc::clone(&presence),
            chat.clone(),
            emergency.clone(),
            search.clone(),
        ));

        let frames = router.attach(&connection);
        let status = connection.on_status_change(restore_on_reconnect(
            Arc::clone(&presence),
            chat.clone(),
        ));

        Coordinator {
            inner: Arc::new(CoordinatorInner {
                config,
                connection,
                reconciler,
                presence,
                chat,
                emergency,
                search,
                router,
                listeners: [frames, status],
            }),
        }
    }
}

/// Listener that re-joins rooms and resends chat on every transition into
/// `Connected`.
fn restore_on_reconnect(
    presence: Arc<PresenceChannels>,
    chat: ChatRelay,
) -> impl Fn(&ConnectionState) + Send + Sync + 'static {
    let was_connected = AtomicBool::new(false);
    move |state| {
        if !state.is_connected() {
            was_connected.store(false, Ordering::SeqCst);
            return;
        }
        if !was_connected.swap(true, Ordering::SeqCst) {
            let rooms = presence.rejoin_all();
            let resent = chat.resend_pending();
            debug!(rooms, resent, "session restored");
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<CoordinatorInner>`.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: ClientConfig,
    connection: ConnectionManager,
    reconciler: Arc<RideStateReconciler>,
    presence: Arc<PresenceChannels>,
    chat: ChatRelay,
    emergency: EmergencyRelay,
    search: SearchCoordinator,
    router: Arc<EventRouter>,
    listeners: [ListenerId; 2],
}

impl Coordinator {
    pub fn builder(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        finder: Arc<dyn AgentFinder>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            connector,
            finder,
            presenter: None,
            history: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn connect(
        &self,
        user_id: &str,
        token: SecretString,
    ) -> Result<Connected, ConnectionError> {
        self.inner.connection.connect(user_id, token).await
    }

    /// Manual retry after the automatic attempts ran out.
    pub async fn reconnect(&self) -> Result<Connected, ConnectionError> {
        self.inner.connection.reconnect().await
    }

    /// Stop every search, timer and session owned by this coordinator.
    pub fn shutdown(&self) {
        for id in self.inner.listeners {
            self.inner.connection.remove_listener(id);
        }
        self.inner.search.abandon_current();
        self.inner.chat.shutdown();
        self.inner.emergency.shutdown();
        self.inner.connection.disconnect();
        info!("coordinator shut down");
    }

    // ── Engagement ───────────────────────────────────────────────────

    /// Start tracking a freshly created engagement and join its room.
    pub fn place_request(&self, engagement: Engagement) {
        let id = engagement.id.clone();
        self.inner.reconciler.track(engagement);
        self.inner.presence.join(&id);
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchOutcome, SearchError> {
        self.inner.search.run(request).await
    }

    pub async fn cancel_search(&self) -> Result<bool, SearchError> {
        self.inner.search.cancel().await
    }

    /// Publish the driver's position. Dropped silently while offline.
    pub fn update_driver_location(&self, ride_id: &str, fix: LocationFix) -> bool {
        self.inner
            .connection
            .send(&OutboundEvent::UpdateDriverLocation {
                ride_id: ride_id.to_owned(),
                location: fix.point,
                heading: fix.heading,
                timestamp: Utc::now(),
            })
    }

    pub fn send_message(&self, ride_id: &str, body: &str) -> Result<ChatMessage, ValidationError> {
        self.inner.chat.send(ride_id, body)
    }

    pub fn trigger_emergency(
        &self,
        request: EmergencyRequest,
    ) -> Result<EmergencyAlert, EmergencyError> {
        self.inner.emergency.trigger(request)
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    pub fn engagement(&self) -> StateStream<Option<Engagement>> {
        self.inner.reconciler.stream()
    }

    pub fn notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.reconciler.notifications()
    }

    pub fn events(&self) -> broadcast::Receiver<Arc<InboundEvent>> {
        self.inner.router.events()
    }

    // ── Components ───────────────────────────────────────────────────

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn reconciler(&self) -> &Arc<RideStateReconciler> {
        &self.inner.reconciler
    }

    pub fn presence(&self) -> &Arc<PresenceChannels> {
        &self.inner.presence
    }

    pub fn chat(&self) -> &ChatRelay {
        &self.inner.chat
    }

    pub fn emergency(&self) -> &EmergencyRelay {
        &self.inner.emergency
    }

    pub fn searcher(&self) -> &SearchCoordinator {
        &self.inner.search
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.inner.router
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use ridelink_api::WireFrame;
    use serde_json::json;

    use super::*;
    use crate::connection::ConnectionPhase;
    use crate::model::{Delivery, EngagementKind, EngagementStatus, NotificationKind};
    use crate::testing::{Script, ScriptedConnector, ScriptedFinder, drain_events, token};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<NotificationKind>>);

    impl NotificationPresenter for Recorder {
        fn present(&self, notification: &NotificationEvent) {
            self.0.lock().unwrap().push(notification.kind);
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new(
            "ws://ridelink.test/socket".parse().unwrap(),
            "http://ridelink.test/api".parse().unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_rejoins_rooms_and_resends_chat() {
        let (connector, mut peers) = ScriptedConnector::new();
        connector.push(Script::Accept);
        connector.push(Script::Accept);
        let coordinator = Coordinator::builder(config(), connector, ScriptedFinder::empty()).build();

        coordinator.connect("rider-1", token()).await.unwrap();
        let mut first = peers.recv().await.unwrap();
        coordinator.place_request(Engagement::requested("r-1", EngagementKind::Ride));
        let joined: Vec<String> = drain_events(&mut first).into_iter().map(|f| f.event).collect();
        assert_eq!(joined, vec!["joinRideRoom"]);

        let mut state = coordinator.connection_state();
        first.interrupt("wifi dropped");
        state
            .wait_for(|s| s.phase == ConnectionPhase::Reconnecting)
            .await
            .unwrap();
        let message = coordinator.send_message("r-1", "running late").unwrap();
        assert_eq!(message.delivery, Delivery::Failed);

        state.wait_for(ConnectionState::is_connected).await.unwrap();
        let mut second = peers.recv().await.unwrap();
        let frames = drain_events(&mut second);
        let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(events, vec!["joinRideRoom", "sendMessage"]);
        assert_eq!(frames[1].data["clientMessageId"], message.id.as_str());
    }

    #[tokio::test]
    async fn status_frames_drive_notifications_and_room_exit() {
        let (connector, mut peers) = ScriptedConnector::new();
        connector.push(Script::Accept);
        let recorder = Arc::new(Recorder::default());
        let presenter: Arc<dyn NotificationPresenter> = recorder.clone();
        let coordinator = Coordinator::builder(config(), connector, ScriptedFinder::empty())
            .presenter(presenter)
            .build();
        coordinator.connect("rider-1", token()).await.unwrap();
        let peer = peers.recv().await.unwrap();
        coordinator.place_request(Engagement::requested("r-1", EngagementKind::Ride));
        let mut events = coordinator.events();

        for status in ["accepted", "arriving", "accepted", "completed"] {
            peer.deliver(WireFrame::new(
                "rideStatusUpdate",
                json!({ "rideId": "r-1", "status": status }),
            ));
        }
        for _ in 0..4 {
            events.recv().await.unwrap();
        }

        assert_eq!(
            coordinator.reconciler().status(),
            Some(EngagementStatus::Completed)
        );
        assert!(!coordinator.presence().is_joined("r-1"));
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                NotificationKind::DriverFound,
                NotificationKind::DriverArriving,
                NotificationKind::RideCompleted
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disconnects_and_stops_timers() {
        let (connector, mut peers) = ScriptedConnector::new();
        connector.push(Script::Accept);
        let coordinator = Coordinator::builder(config(), connector, ScriptedFinder::empty()).build();
        coordinator.connect("rider-1", token()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        coordinator.chat().start_typing("r-1");

        coordinator.shutdown();
        coordinator.shutdown();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(peer.client_closed());
        assert_eq!(coordinator.connection().state(), ConnectionState::default());
        let events: Vec<String> = drain_events(&mut peer).into_iter().map(|f| f.event).collect();
        assert_eq!(events, vec!["typingStart"]);
    }
}

// ── Connection manager ──
//
// Owns the single socket session to the backend: connect with a short
// timeout, heartbeat while connected, exponential-backoff reconnection on
// unexpected loss, and an observable `ConnectionState`. Transport failures
// never escape as errors once a session is up; they surface only as state
// transitions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::SecretString;
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use ridelink_api::{AuthParams, Connector, Session, SessionSender, SessionSignal, WireFrame};

use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::model::OutboundEvent;

// ── ConnectionState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Automatic reconnection gave up; only `reconnect()` leaves this state.
    Lost,
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Number of the reconnect attempt in flight or scheduled. Zero while
    /// connected.
    pub attempt_count: u32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Delay before the scheduled reconnect attempt.
    pub retry_in: Option<Duration>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == ConnectionPhase::Connected
    }
}

/// Handle for a registered listener or frame handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Proof of a live session, returned by `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected {
    pub session_id: Uuid,
}

/// Delay before reconnect attempt `attempt` (zero-based): `base · 2^attempt`.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt))
}

type StateListener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;
type FrameHandler = Arc<dyn Fn(&WireFrame) + Send + Sync>;

// ── ConnectionManager ────────────────────────────────────────────────

/// Cheaply cloneable via `Arc<ConnectionInner>`.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: ConnectionConfig,
    server_url: Url,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    link: ArcSwapOption<Link>,
    credentials: ArcSwapOption<AuthParams>,
    /// Cancelled by `disconnect()` and replaced on every explicit connect;
    /// reconnect loops and per-session tasks hang off it.
    lifecycle: ArcSwap<CancellationToken>,
    listeners: DashMap<ListenerId, StateListener>,
    frame_handlers: DashMap<ListenerId, FrameHandler>,
    next_listener: AtomicU64,
}

/// The live session plus the token that stops its tasks.
struct Link {
    session_id: Uuid,
    sender: SessionSender,
    cancel: CancellationToken,
}

impl Link {
    fn close(&self) {
        self.cancel.cancel();
        self.sender.close();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("server_url", &self.inner.server_url.as_str())
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager. Does NOT connect; call [`connect()`](Self::connect).
    pub fn new(server_url: Url, config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                server_url,
                connector,
                state,
                link: ArcSwapOption::empty(),
                credentials: ArcSwapOption::empty(),
                lifecycle: ArcSwap::from_pointee(CancellationToken::new()),
                listeners: DashMap::new(),
                frame_handlers: DashMap::new(),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn server_url(&self) -> &Url {
        &self.inner.server_url
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Open a session for `user_id`.
    ///
    /// Gives up after the configured connect timeout. On success the phase
    /// becomes `Connected`, the heartbeat starts and the attempt counter
    /// resets. Calling this while already connected as the same user is a
    /// no-op returning the live session.
    pub async fn connect(
        &self,
        user_id: impl Into<String>,
        token: SecretString,
    ) -> Result<Connected, ConnectionError> {
        let user_id = user_id.into();
        let same_user = self
            .inner
            .credentials
            .load_full()
            .is_some_and(|c| c.user_id == user_id);
        if same_user {
            if let Some(connected) = self.live_session() {
                debug!(session = %connected.session_id, "already connected");
                return Ok(connected);
            }
        }

        let auth = Arc::new(AuthParams { user_id, token });
        self.inner.credentials.store(Some(Arc::clone(&auth)));
        self.establish(auth, ConnectionState::default()).await
    }

    /// Manual retry with the stored credentials, typically offered to the
    /// user once the phase is `Lost`.
    pub async fn reconnect(&self) -> Result<Connected, ConnectionError> {
        let auth =
            self.inner
                .credentials
                .load_full()
                .ok_or_else(|| ConnectionError::Transport {
                    reason: "no stored credentials; connect first".into(),
                })?;
        if let Some(connected) = self.live_session() {
            return Ok(connected);
        }
        info!("manual reconnect requested");
        let mut on_failure = self.state();
        if on_failure.phase != ConnectionPhase::Lost {
            on_failure = ConnectionState::default();
        }
        self.establish(auth, on_failure).await
    }

    /// Tear everything down. Idempotent.
    ///
    /// Stops the heartbeat and any pending reconnect, closes the session,
    /// forgets the credentials and resets the state.
    pub fn disconnect(&self) {
        self.inner.lifecycle.load().cancel();
        if let Some(link) = self.inner.link.swap(None) {
            link.close();
            info!(session = %link.session_id, "disconnected");
        }
        self.inner.credentials.store(None);
        self.transition(|s| *s = ConnectionState::default());
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Emit an event on the live session.
    ///
    /// There is no outbound queue: while disconnected the event is dropped
    /// with a warning and `false` is returned.
    pub fn send(&self, event: &OutboundEvent) -> bool {
        let name = event.name();
        let Some(link) = self.inner.link.load_full() else {
            warn!(event = name, "not connected, dropping outbound event");
            return false;
        };
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = name, error = %e, "failed to encode outbound event");
                return false;
            }
        };
        match link.sender.emit(frame) {
            Ok(()) => {
                debug!(event = name, "sent");
                true
            }
            Err(e) => {
                warn!(event = name, error = %e, "dropping outbound event");
                false
            }
        }
    }

    // ── State observation ────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected() && self.inner.link.load().is_some()
    }

    /// User id of the stored credentials.
    pub fn identity(&self) -> Option<String> {
        self.inner
            .credentials
            .load_full()
            .map(|c| c.user_id.clone())
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Register a listener. It fires immediately with the current state,
    /// then after every transition.
    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        let listener: StateListener = Arc::new(listener);
        listener(&self.state());
        self.inner.listeners.insert(id, listener);
        id
    }

    /// Register a handler for every inbound frame, called synchronously in
    /// delivery order.
    pub fn on_frame<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&WireFrame) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        self.inner.frame_handlers.insert(id, Arc::new(handler));
        id
    }

    /// Remove a listener or frame handler. Returns `false` if unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(&id).is_some() || self.inner.frame_handlers.remove(&id).is_some()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    fn live_session(&self) -> Option<Connected> {
        let link = self.inner.link.load_full()?;
        (self.state().is_connected() && !link.sender.is_closed()).then_some(Connected {
            session_id: link.session_id,
        })
    }

    /// Apply a state change and notify listeners if anything moved.
    fn transition(&self, f: impl FnOnce(&mut ConnectionState)) {
        let mut changed = false;
        self.inner.state.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            changed = *state != before;
            changed
        });
        if changed {
            let snapshot = self.state();
            let listeners: Vec<StateListener> = self
                .inner
                .listeners
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            for listener in listeners {
                listener(&snapshot);
            }
        }
    }

    fn touch_heartbeat(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_connected() {
                state.last_heartbeat_at = Some(Utc::now());
                true
            } else {
                false
            }
        });
    }

    fn renew_lifecycle(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let previous = self.inner.lifecycle.swap(Arc::new(fresh.clone()));
        previous.cancel();
        fresh
    }

    /// Open a fresh session. A failed attempt leaves the state at
    /// `on_failure`.
    async fn establish(
        &self,
        auth: Arc<AuthParams>,
        on_failure: ConnectionState,
    ) -> Result<Connected, ConnectionError> {
        let lifecycle = self.renew_lifecycle();
        if let Some(stale) = self.inner.link.swap(None) {
            stale.close();
        }
        self.transition(|s| {
            s.phase = ConnectionPhase::Connecting;
            s.retry_in = None;
        });

        match self.open_session(&auth).await {
            Ok(session) if lifecycle.is_cancelled() => {
                session.into_parts().0.close();
                Err(ConnectionError::Transport {
                    reason: "disconnected while connecting".into(),
                })
            }
            Ok(session) => Ok(self.install(session, &lifecycle)),
            Err(e) => {
                warn!(error = %e, "connect failed");
                if !lifecycle.is_cancelled() {
                    self.transition(|s| *s = on_failure);
                }
                Err(e)
            }
        }
    }

    async fn open_session(&self, auth: &AuthParams) -> Result<Session, ConnectionError> {
        let timeout = self.inner.config.connect_timeout;
        let connect = self.inner.connector.connect(&self.inner.server_url, auth);
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(ConnectionError::from(e)),
            Err(_) => Err(ConnectionError::Timeout {
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Adopt a freshly opened session and start its tasks.
    fn install(&self, session: Session, lifecycle: &CancellationToken) -> Connected {
        let session_id = session.id();
        let (sender, inbound) = session.into_parts();
        let cancel = lifecycle.child_token();

        let link = Arc::new(Link {
            session_id,
            sender,
            cancel: cancel.clone(),
        });
        if let Some(previous) = self.inner.link.swap(Some(link)) {
            previous.close();
        }

        tokio::spawn(session_task(self.clone(), session_id, inbound, cancel.clone()));
        tokio::spawn(heartbeat_task(self.clone(), cancel));

        self.transition(|s| {
            s.phase = ConnectionPhase::Connected;
            s.attempt_count = 0;
            s.retry_in = None;
            s.last_heartbeat_at = Some(Utc::now());
        });
        info!(session = %session_id, "connected");
        Connected { session_id }
    }

    /// Drop the link if it still belongs to `session_id`.
    fn release_link(&self, session_id: Uuid) -> bool {
        match self.inner.link.load_full() {
            Some(link) if link.session_id == session_id => {
                self.inner.link.store(None);
                link.close();
                true
            }
            _ => false,
        }
    }

    fn dispatch(&self, frame: &WireFrame) {
        if frame.event == "pong" {
            self.touch_heartbeat();
            return;
        }
        let handlers: Vec<FrameHandler> = self
            .inner
            .frame_handlers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        if handlers.is_empty() {
            debug!(event = %frame.event, "no frame handler registered");
        }
        for handler in handlers {
            handler(frame);
        }
    }

    fn on_closed(&self, session_id: Uuid) {
        if self.release_link(session_id) {
            self.transition(|s| {
                s.phase = ConnectionPhase::Disconnected;
                s.attempt_count = 0;
                s.retry_in = None;
            });
        }
    }

    fn on_interrupted(&self, session_id: Uuid, reason: &str) {
        if !self.release_link(session_id) {
            return;
        }
        warn!(reason, "session interrupted");

        let base = self.inner.config.backoff_base;
        if self.inner.config.max_reconnect_attempts > 0 {
            self.transition(|s| {
                s.phase = ConnectionPhase::Reconnecting;
                s.attempt_count = 1;
                s.retry_in = Some(backoff_delay(0, base));
            });
        }
        let lifecycle = CancellationToken::clone(&self.inner.lifecycle.load());
        tokio::spawn(reconnect_task(self.clone(), lifecycle));
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Pump inbound signals for one session until it ends or is cancelled.
async fn session_task(
    manager: ConnectionManager,
    session_id: Uuid,
    mut inbound: mpsc::UnboundedReceiver<SessionSignal>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            signal = inbound.recv() => signal,
        };
        match signal {
            Some(SessionSignal::Frame(frame)) => manager.dispatch(&frame),
            Some(SessionSignal::Closed { code, reason }) => {
                info!(?code, %reason, "backend closed the session");
                manager.on_closed(session_id);
                return;
            }
            Some(SessionSignal::Interrupted { reason }) => {
                manager.on_interrupted(session_id, &reason);
                return;
            }
            None => {
                manager.on_interrupted(session_id, "session channel closed");
                return;
            }
        }
    }
}

/// Emit a ping every heartbeat interval while the session lives. A missing
/// pong is not fatal; loss is detected by the transport.
async fn heartbeat_task(manager: ConnectionManager, cancel: CancellationToken) {
    let period = manager.inner.config.heartbeat_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if manager.send(&OutboundEvent::Ping { timestamp: Utc::now() }) {
                    manager.touch_heartbeat();
                }
            }
        }
    }
}

/// Retry with exponential backoff until connected, cancelled or out of
/// attempts.
async fn reconnect_task(manager: ConnectionManager, lifecycle: CancellationToken) {
    let config = manager.inner.config.clone();
    let Some(auth) = manager.inner.credentials.load_full() else {
        manager.transition(|s| *s = ConnectionState::default());
        return;
    };

    for attempt in 1..=config.max_reconnect_attempts {
        let delay = backoff_delay(attempt - 1, config.backoff_base);
        manager.transition(|s| {
            s.phase = ConnectionPhase::Reconnecting;
            s.attempt_count = attempt;
            s.retry_in = Some(delay);
        });
        info!(attempt, delay_secs = delay.as_secs_f64(), "reconnect scheduled");

        tokio::select! {
            biased;
            () = lifecycle.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let result = tokio::select! {
            biased;
            () = lifecycle.cancelled() => return,
            result = manager.open_session(&auth) => result,
        };

        match result {
            Ok(session) => {
                manager.install(session, &lifecycle);
                info!(attempt, "reconnected");
                return;
            }
            Err(e) if !e.is_retryable() => {
                error!(error = %e, "reconnect rejected, new credentials required");
                manager.transition(|s| {
                    s.phase = ConnectionPhase::Lost;
                    s.retry_in = None;
                });
                return;
            }
            Err(e) => warn!(error = %e, attempt, "reconnect attempt failed"),
        }
    }

    error!(
        attempts = config.max_reconnect_attempts,
        "connection lost, automatic reconnection exhausted"
    );
    manager.transition(|s| {
        s.phase = ConnectionPhase::Lost;
        s.retry_in = None;
    });
}

// ── Tests ────────────────────────────────────────────────────────────

// ── Search coordinator ──
//
// Time-boxed, radius-expanding search for a serving agent. Each attempt is
// tagged with a fresh, monotonically increasing token; every response and
// every state mutation is checked against the current token, so at most one
// attempt is ever authoritative and late results from superseded attempts
// are dropped.
//
// Candidates arrive either pushed over the socket (`agentOffer`) or by
// polling the query API while the socket is down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use chrono::{TimeDelta, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ridelink_api::query::{ConfirmParams, NearbyAgentsParams};
use ridelink_api::{QueryClient, TransportConfig};
use secrecy::SecretString;

use crate::config::{ClientConfig, SearchConfig};
use crate::connection::ConnectionManager;
use crate::error::{CoreError, SearchError, StateConflict};
use crate::model::{
    CandidateDriver, EngagementStatus, GeoPoint, OutboundEvent, PriorityHint, SearchOutcome,
    SearchRequest, SearchSession, SearchStatus, StatusUpdate,
};
use crate::reconciler::RideStateReconciler;
use crate::stream::StateStream;

// ── Agent finder collaborator ────────────────────────────────────────

/// One candidate lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub engagement_id: String,
    pub pickup: GeoPoint,
    pub radius_km: f64,
    pub attempt_token: u64,
    pub priority: PriorityHint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmVerdict {
    Accepted,
    /// The agent declined; the search moves on to the next attempt.
    Rejected { reason: Option<String> },
}

/// Request/response backend used for candidate lookup (polling path),
/// confirmation and cancellation.
///
/// Object-safe so the coordinator can hold an `Arc<dyn AgentFinder>`.
pub trait AgentFinder: Send + Sync + 'static {
    fn find_candidates<'a>(
        &'a self,
        query: &'a CandidateQuery,
    ) -> BoxFuture<'a, Result<Vec<CandidateDriver>, CoreError>>;

    fn confirm<'a>(
        &'a self,
        engagement_id: &'a str,
        candidate: &'a CandidateDriver,
        attempt_token: u64,
    ) -> BoxFuture<'a, Result<ConfirmVerdict, CoreError>>;

    fn cancel<'a>(&'a self, engagement_id: &'a str) -> BoxFuture<'a, Result<(), CoreError>>;
}

/// [`AgentFinder`] backed by the HTTP query API.
#[derive(Debug, Clone)]
pub struct HttpAgentFinder {
    client: QueryClient,
}

impl HttpAgentFinder {
    pub fn new(client: QueryClient) -> Self {
        Self { client }
    }

    /// Finder for `config.api_url`, authenticating with `token`.
    pub fn from_config(config: &ClientConfig, token: SecretString) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.request_timeout,
            bearer: None,
        }
        .with_bearer(token);
        let client = QueryClient::new(config.api_url.clone(), &transport)?;
        Ok(Self::new(client))
    }
}

impl AgentFinder for HttpAgentFinder {
    fn find_candidates<'a>(
        &'a self,
        query: &'a CandidateQuery,
    ) -> BoxFuture<'a, Result<Vec<CandidateDriver>, CoreError>> {
        Box::pin(async move {
            let params = NearbyAgentsParams {
                ride_id: query.engagement_id.clone(),
                latitude: query.pickup.latitude,
                longitude: query.pickup.longitude,
                radius_km: query.radius_km,
                attempt_token: query.attempt_token,
                priority: query.priority.to_string(),
            };
            let agents = self.client.get_nearby_agents(&params).await?;
            Ok(agents.into_iter().map(CandidateDriver::from).collect())
        })
    }

    fn confirm<'a>(
        &'a self,
        engagement_id: &'a str,
        candidate: &'a CandidateDriver,
        attempt_token: u64,
    ) -> BoxFuture<'a, Result<ConfirmVerdict, CoreError>> {
        Box::pin(async move {
            let params = ConfirmParams {
                agent_id: candidate.id.clone(),
                attempt_token,
            };
            let reply = self.client.confirm_agent(engagement_id, &params).await?;
            Ok(if reply.accepted {
                ConfirmVerdict::Accepted
            } else {
                ConfirmVerdict::Rejected {
                    reason: reply.reason,
                }
            })
        })
    }

    fn cancel<'a>(&'a self, engagement_id: &'a str) -> BoxFuture<'a, Result<(), CoreError>> {
        Box::pin(async move { Ok(self.client.cancel(engagement_id).await?) })
    }
}

// ── Pure helpers ─────────────────────────────────────────────────────

/// Radius for zero-based `attempt`: `min(initial + increment·attempt, max)`.
pub fn effective_radius(config: &SearchConfig, attempt: u32) -> f64 {
    (config.initial_radius_km + config.radius_increment_km * f64::from(attempt))
        .min(config.max_radius_km)
}

pub fn priority_hint(config: &SearchConfig, attempt: u32) -> PriorityHint {
    if attempt >= config.escalate_priority_at {
        PriorityHint::High
    } else {
        PriorityHint::Normal
    }
}

/// Smallest ETA wins; distance breaks ties. Unknown ETAs sort last.
pub fn best_candidate(candidates: Vec<CandidateDriver>) -> Option<CandidateDriver> {
    candidates.into_iter().min_by(|a, b| {
        a.eta_secs
            .unwrap_or(u32::MAX)
            .cmp(&b.eta_secs.unwrap_or(u32::MAX))
            .then(a.distance_km.total_cmp(&b.distance_km))
    })
}

// ── Coordinator ──────────────────────────────────────────────────────

#[derive(Debug)]
enum SearchResponse {
    Offer {
        token: u64,
        candidates: Vec<CandidateDriver>,
    },
    Rejected {
        token: u64,
        reason: Option<String>,
    },
    Failed {
        token: u64,
        error: CoreError,
    },
}

impl SearchResponse {
    fn token(&self) -> u64 {
        match self {
            Self::Offer { token, .. } | Self::Rejected { token, .. } | Self::Failed { token, .. } => {
                *token
            }
        }
    }
}

enum AttemptResult {
    Candidate(CandidateDriver),
    Rejected(Option<String>),
    Deadline,
    Cancelled,
}

/// A search that has not reached a terminal outcome yet.
struct ActiveRun {
    request: SearchRequest,
    cancel: CancellationToken,
    responses: mpsc::UnboundedSender<SearchResponse>,
    /// Held by whichever call is currently driving the run.
    inbox: Mutex<Option<mpsc::UnboundedReceiver<SearchResponse>>>,
}

impl ActiveRun {
    fn new(request: SearchRequest) -> Self {
        let (responses, inbox) = mpsc::unbounded_channel();
        Self {
            request,
            cancel: CancellationToken::new(),
            responses,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<SearchResponse>> {
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn return_inbox(&self, inbox: mpsc::UnboundedReceiver<SearchResponse>) {
        *self.inbox.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbox);
    }
}

/// Cheaply cloneable via `Arc<SearchInner>`.
#[derive(Clone)]
pub struct SearchCoordinator {
    inner: Arc<SearchInner>,
}

struct SearchInner {
    config: SearchConfig,
    connection: ConnectionManager,
    finder: Arc<dyn AgentFinder>,
    reconciler: Arc<RideStateReconciler>,
    session: watch::Sender<Option<SearchSession>>,
    run: ArcSwapOption<ActiveRun>,
    next_token: AtomicU64,
}

impl SearchCoordinator {
    pub fn new(
        config: SearchConfig,
        connection: ConnectionManager,
        finder: Arc<dyn AgentFinder>,
        reconciler: Arc<RideStateReconciler>,
    ) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            inner: Arc::new(SearchInner {
                config,
                connection,
                finder,
                reconciler,
                session,
                run: ArcSwapOption::empty(),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Search for and confirm an agent.
    ///
    /// Terminal results (confirmed, exhausted, cancelled) come back as a
    /// [`SearchOutcome`]. A failed confirm returns
    /// [`SearchError::ConfirmFailed`] and keeps the candidate for
    /// [`reconfirm()`](Self::reconfirm).
    pub async fn run(&self, request: SearchRequest) -> Result<SearchOutcome, SearchError> {
        let fresh = Arc::new(ActiveRun::new(request));
        let mut busy = None;
        self.inner.run.rcu(|current| {
            busy = current.as_ref().map(|r| r.request.engagement_id.clone());
            current.clone().or_else(|| Some(Arc::clone(&fresh)))
        });
        if let Some(engagement_id) = busy {
            return Err(SearchError::AlreadySearching { engagement_id });
        }

        info!(engagement = %fresh.request.engagement_id, "search started");
        self.drive(&fresh, 0).await
    }

    /// Retry the confirm call for the candidate kept after a failure.
    pub async fn reconfirm(&self) -> Result<SearchOutcome, SearchError> {
        let run = self
            .inner
            .run
            .load_full()
            .ok_or(SearchError::NothingToConfirm)?;
        let (token, attempt, candidate) = {
            let session = self.inner.session.borrow();
            match session.as_ref() {
                Some(s) if s.status == SearchStatus::Found && !s.confirmed => {
                    let candidate = s.candidate.clone().ok_or(SearchError::NothingToConfirm)?;
                    (s.attempt_token, s.attempt, candidate)
                }
                _ => return Err(SearchError::NothingToConfirm),
            }
        };
        let mut inbox = run.take_inbox().ok_or_else(|| SearchError::AlreadySearching {
            engagement_id: run.request.engagement_id.clone(),
        })?;

        let result = match self.confirm(&run, token, candidate).await {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => self.drive_attempts(&run, &mut inbox, attempt + 1).await,
            Err(e) => Err(e),
        };
        run.return_inbox(inbox);
        result
    }

    /// Cancel the running search and tell the backend.
    ///
    /// Returns `Ok(false)` if nothing was running. The local transition to
    /// `Cancelled` always happens first; a failed backend call is reported
    /// as [`SearchError::BackendUnreachable`] afterwards.
    pub async fn cancel(&self) -> Result<bool, SearchError> {
        let Some(engagement_id) = self.abandon_current() else {
            return Ok(false);
        };
        self.inner
            .finder
            .cancel(&engagement_id)
            .await
            .map_err(|e| {
                warn!(error = %e, engagement = %engagement_id, "backend cancel failed");
                SearchError::BackendUnreachable {
                    reason: e.to_string(),
                }
            })?;
        Ok(true)
    }

    /// Stop the running search locally, without a backend call.
    pub fn abandon_current(&self) -> Option<String> {
        let run = self.inner.run.swap(None)?;
        run.cancel.cancel();
        self.inner.session.send_if_modified(|slot| match slot {
            Some(s) if s.is_active() => {
                s.status = SearchStatus::Cancelled;
                true
            }
            _ => false,
        });
        info!(engagement = %run.request.engagement_id, "search cancelled");
        Some(run.request.engagement_id.clone())
    }

    /// Stop the search for `engagement_id` if that is the one running.
    pub fn abandon(&self, engagement_id: &str) -> bool {
        let running = self
            .inner
            .run
            .load_full()
            .is_some_and(|r| r.request.engagement_id == engagement_id);
        running && self.abandon_current().is_some()
    }

    // ── Push responses ───────────────────────────────────────────────

    /// Candidates pushed by the backend for `attempt_token`.
    pub fn offer(&self, attempt_token: u64, candidates: Vec<CandidateDriver>) {
        self.deliver(SearchResponse::Offer {
            token: attempt_token,
            candidates,
        });
    }

    /// The backend reports that no agent took attempt `attempt_token`.
    pub fn reject(&self, attempt_token: u64, reason: Option<String>) {
        self.deliver(SearchResponse::Rejected {
            token: attempt_token,
            reason,
        });
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn session(&self) -> Option<SearchSession> {
        self.inner.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SearchSession>> {
        self.inner.session.subscribe()
    }

    pub fn stream(&self) -> StateStream<Option<SearchSession>> {
        StateStream::new(self.inner.session.subscribe())
    }

    pub fn config(&self) -> &SearchConfig {
        &self.inner.config
    }

    // ── Internals ────────────────────────────────────────────────────

    fn deliver(&self, response: SearchResponse) {
        match self.inner.run.load_full() {
            Some(run) => {
                let _ = run.responses.send(response);
            }
            None => debug!(token = response.token(), "no search running, discarding response"),
        }
    }

    async fn drive(
        &self,
        run: &Arc<ActiveRun>,
        first_attempt: u32,
    ) -> Result<SearchOutcome, SearchError> {
        let mut inbox = run.take_inbox().ok_or_else(|| SearchError::AlreadySearching {
            engagement_id: run.request.engagement_id.clone(),
        })?;
        let result = self.drive_attempts(run, &mut inbox, first_attempt).await;
        run.return_inbox(inbox);
        result
    }

    async fn drive_attempts(
        &self,
        run: &Arc<ActiveRun>,
        inbox: &mut mpsc::UnboundedReceiver<SearchResponse>,
        first_attempt: u32,
    ) -> Result<SearchOutcome, SearchError> {
        let max_attempts = self.inner.config.max_attempts;
        let mut last_token = self.session().map_or(0, |s| s.attempt_token);

        for attempt in first_attempt..max_attempts {
            let Some(query) = self.begin_attempt(run, attempt) else {
                return Ok(SearchOutcome::Cancelled);
            };
            last_token = query.attempt_token;

            match self.run_attempt(run, &query, inbox).await {
                AttemptResult::Cancelled => return Ok(SearchOutcome::Cancelled),
                AttemptResult::Deadline => {
                    self.update_session(query.attempt_token, |s| {
                        s.status = SearchStatus::Timeout;
                    });
                    info!(attempt, radius_km = query.radius_km, "search attempt timed out");
                }
                AttemptResult::Rejected(reason) => {
                    info!(attempt, reason = reason.as_deref().unwrap_or("-"), "attempt rejected");
                }
                AttemptResult::Candidate(candidate) => {
                    if let Some(outcome) = self.confirm(run, query.attempt_token, candidate).await? {
                        return Ok(outcome);
                    }
                }
            }
        }

        if run.cancel.is_cancelled() {
            return Ok(SearchOutcome::Cancelled);
        }
        self.finish(run);
        self.update_session(last_token, |s| {
            s.status = SearchStatus::Timeout;
            s.candidate = None;
        });
        warn!(attempts = max_attempts, engagement = %run.request.engagement_id, "search exhausted");
        Ok(SearchOutcome::Exhausted {
            attempts: max_attempts,
        })
    }

    /// Publish a new attempt. Returns `None` if the run was cancelled.
    fn begin_attempt(&self, run: &ActiveRun, attempt: u32) -> Option<CandidateQuery> {
        let config = &self.inner.config;
        let query = CandidateQuery {
            engagement_id: run.request.engagement_id.clone(),
            pickup: run.request.pickup,
            radius_km: effective_radius(config, attempt),
            attempt_token: self.inner.next_token.fetch_add(1, Ordering::SeqCst) + 1,
            priority: priority_hint(config, attempt),
        };
        let deadline_at = Utc::now()
            + TimeDelta::from_std(config.attempt_deadline).unwrap_or_else(|_| TimeDelta::zero());

        let published = self.inner.session.send_if_modified(|slot| {
            if run.cancel.is_cancelled() {
                return false;
            }
            *slot = Some(SearchSession {
                engagement_id: query.engagement_id.clone(),
                radius_km: query.radius_km,
                attempt,
                max_attempts: config.max_attempts,
                deadline_at,
                attempt_token: query.attempt_token,
                priority: query.priority,
                status: SearchStatus::Searching,
                candidate: None,
                confirmed: false,
            });
            true
        });

        if published {
            info!(
                attempt,
                radius_km = query.radius_km,
                token = query.attempt_token,
                priority = %query.priority,
                "search attempt started"
            );
            Some(query)
        } else {
            None
        }
    }

    async fn run_attempt(
        &self,
        run: &ActiveRun,
        query: &CandidateQuery,
        inbox: &mut mpsc::UnboundedReceiver<SearchResponse>,
    ) -> AttemptResult {
        let config = &self.inner.config;
        let token = query.attempt_token;
        let pushed = self.push_request(query);

        let deadline = tokio::time::sleep(config.attempt_deadline);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = run.cancel.cancelled() => return AttemptResult::Cancelled,
                () = &mut deadline => return AttemptResult::Deadline,
                Some(response) = inbox.recv() => {
                    if response.token() != token {
                        let conflict = StateConflict { current: token, received: response.token() };
                        debug!(%conflict, "discarding stale search response");
                        continue;
                    }
                    match response {
                        SearchResponse::Offer { candidates, .. } => {
                            if let Some(best) = best_candidate(candidates) {
                                return AttemptResult::Candidate(best);
                            }
                            debug!(token, "no candidates in range yet");
                        }
                        SearchResponse::Rejected { reason, .. } => {
                            return AttemptResult::Rejected(reason);
                        }
                        SearchResponse::Failed { error, .. } => {
                            warn!(error = %error, token, "candidate lookup failed");
                        }
                    }
                }
                _ = poll.tick(), if !pushed || !self.inner.connection.is_connected() => {
                    self.spawn_lookup(query.clone(), run.responses.clone());
                }
            }
        }
    }

    /// Ask over the socket. Returns `false` when polling has to take over.
    fn push_request(&self, query: &CandidateQuery) -> bool {
        if !self.inner.connection.is_connected() {
            return false;
        }
        self.inner.connection.send(&OutboundEvent::RequestAgents {
            ride_id: query.engagement_id.clone(),
            latitude: query.pickup.latitude,
            longitude: query.pickup.longitude,
            radius_km: query.radius_km,
            attempt_token: query.attempt_token,
            priority: query.priority,
        })
    }

    /// Poll the query API once, in the background. The result comes back
    /// through the run's inbox, tagged with the query's token.
    fn spawn_lookup(&self, query: CandidateQuery, responses: mpsc::UnboundedSender<SearchResponse>) {
        let finder = Arc::clone(&self.inner.finder);
        tokio::spawn(async move {
            let token = query.attempt_token;
            let response = match lookup_with_retry(finder.as_ref(), &query).await {
                Ok(candidates) => SearchResponse::Offer { token, candidates },
                Err(error) => SearchResponse::Failed { token, error },
            };
            let _ = responses.send(response);
        });
    }

    /// Confirm `candidate` for attempt `token`.
    ///
    /// `Ok(None)` means the agent declined and the search should continue.
    async fn confirm(
        &self,
        run: &Arc<ActiveRun>,
        token: u64,
        candidate: CandidateDriver,
    ) -> Result<Option<SearchOutcome>, SearchError> {
        let engagement_id = &run.request.engagement_id;
        let marked = self.update_session(token, |s| {
            s.status = SearchStatus::Found;
            s.candidate = Some(candidate.clone());
        });
        if !marked {
            return Ok(Some(SearchOutcome::Cancelled));
        }
        info!(candidate = %candidate.id, token, "candidate found, confirming");

        let result = confirm_with_retry(self.inner.finder.as_ref(), engagement_id, &candidate, token).await;

        if run.cancel.is_cancelled() || !self.is_current(token) {
            debug!(token, "confirm result arrived after cancellation, discarding");
            return Ok(Some(SearchOutcome::Cancelled));
        }

        match result {
            Ok(ConfirmVerdict::Accepted) => {
                self.update_session(token, |s| s.confirmed = true);
                self.finish(run);

                let mut update = StatusUpdate::new(engagement_id.clone(), EngagementStatus::Accepted);
                update.agent_id = Some(candidate.id.clone());
                self.inner.reconciler.apply_status(&update);

                info!(candidate = %candidate.id, engagement = %engagement_id, "driver confirmed");
                Ok(Some(SearchOutcome::Confirmed(candidate)))
            }
            Ok(ConfirmVerdict::Rejected { reason }) => {
                info!(candidate = %candidate.id, reason = reason.as_deref().unwrap_or("-"), "candidate declined");
                self.update_session(token, |s| s.candidate = None);
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, candidate = %candidate.id, "confirm failed, keeping candidate");
                Err(SearchError::ConfirmFailed {
                    candidate: Box::new(candidate),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Mutate the session only while `token` is the live attempt.
    fn update_session(&self, token: u64, f: impl FnOnce(&mut SearchSession)) -> bool {
        self.inner.session.send_if_modified(|slot| match slot {
            Some(s) if s.attempt_token == token && s.status != SearchStatus::Cancelled => {
                f(s);
                true
            }
            _ => false,
        })
    }

    fn is_current(&self, token: u64) -> bool {
        self.inner
            .session
            .borrow()
            .as_ref()
            .is_some_and(|s| s.attempt_token == token && s.status != SearchStatus::Cancelled)
    }

    /// Forget `run` if it is still the registered one.
    fn finish(&self, run: &Arc<ActiveRun>) {
        self.inner.run.rcu(|current| match current {
            Some(c) if Arc::ptr_eq(c, run) => None,
            other => other.clone(),
        });
    }
}

async fn lookup_with_retry(
    finder: &dyn AgentFinder,
    query: &CandidateQuery,
) -> Result<Vec<CandidateDriver>, CoreError> {
    match finder.find_candidates(query).await {
        Err(e) if e.is_transient() => {
            warn!(error = %e, token = query.attempt_token, "candidate lookup failed, retrying once");
            finder.find_candidates(query).await
        }
        other => other,
    }
}

async fn confirm_with_retry(
    finder: &dyn AgentFinder,
    engagement_id: &str,
    candidate: &CandidateDriver,
    token: u64,
) -> Result<ConfirmVerdict, CoreError> {
    match finder.confirm(engagement_id, candidate, token).await {
        Err(e) if e.is_transient() => {
            warn!(error = %e, candidate = %candidate.id, "confirm failed, retrying once");
            finder.confirm(engagement_id, candidate, token).await
        }
        other => other,
    }
}

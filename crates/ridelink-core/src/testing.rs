// ── Test doubles shared by the unit tests ──

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use ridelink_api::socket::{AuthParams, Connector, Session, SessionPeer, WireFrame};
use secrecy::SecretString;
use tokio::sync::mpsc;
use url::Url;

use crate::config::ConnectionConfig;
use crate::connection::ConnectionManager;
use crate::error::CoreError;
use crate::model::CandidateDriver;
use crate::search::{AgentFinder, CandidateQuery, ConfirmVerdict};

// ── Connector ────────────────────────────────────────────────────────

/// What the next `connect()` call does.
pub(crate) enum Script {
    Accept,
    Refuse(ridelink_api::Error),
    /// Never completes; exercises the connect timeout.
    Hang,
}

/// Connector that follows a script and hands each accepted session's
/// peer end to the test.
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    peers: mpsc::UnboundedSender<SessionPeer>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SessionPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            peers,
            attempts: AtomicUsize::new(0),
        });
        (connector, rx)
    }

    pub(crate) fn push(&self, step: Script) {
        self.script.lock().unwrap().push_back(step);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    fn connect<'a>(
        &'a self,
        _url: &'a Url,
        _auth: &'a AuthParams,
    ) -> BoxFuture<'a, Result<Session, ridelink_api::Error>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match step {
                Some(Script::Accept) => {
                    let (session, peer) = Session::pair();
                    let _ = self.peers.send(peer);
                    Ok(session)
                }
                Some(Script::Refuse(err)) => Err(err),
                Some(Script::Hang) => std::future::pending().await,
                None => Err(ridelink_api::Error::SocketConnect("connection refused".into())),
            }
        })
    }
}

pub(crate) fn manager_with(connector: Arc<ScriptedConnector>) -> ConnectionManager {
    ConnectionManager::new(
        "ws://ridelink.test/socket".parse().unwrap(),
        ConnectionConfig::default(),
        connector,
    )
}

pub(crate) fn token() -> SecretString {
    SecretString::from("test-token")
}

/// A manager already connected as `rider-1`, plus the backend end.
pub(crate) async fn connected_manager() -> (ConnectionManager, SessionPeer) {
    let (connector, mut peers) = ScriptedConnector::new();
    connector.push(Script::Accept);
    let manager = manager_with(connector);
    manager.connect("rider-1", token()).await.unwrap();
    let peer = peers.recv().await.unwrap();
    (manager, peer)
}

/// Next emitted frame named `event`, skipping heartbeats and anything else.
pub(crate) async fn next_event(peer: &mut SessionPeer, event: &str) -> WireFrame {
    loop {
        let frame = peer.next_emitted().await.unwrap();
        if frame.event == event {
            return frame;
        }
    }
}

/// Emitted frames so far, heartbeats excluded.
pub(crate) fn drain_events(peer: &mut SessionPeer) -> Vec<WireFrame> {
    peer.drain_emitted()
        .into_iter()
        .filter(|f| f.event != "ping")
        .collect()
}

// ── Agent finder ─────────────────────────────────────────────────────

/// Finder with canned answers that records every call.
#[derive(Default)]
pub(crate) struct ScriptedFinder {
    /// Returned by every lookup.
    pub(crate) candidates: Mutex<Vec<CandidateDriver>>,
    /// Consumed one per confirm; `Accepted` once empty.
    pub(crate) verdicts: Mutex<VecDeque<Result<ConfirmVerdict, CoreError>>>,
    pub(crate) cancel_error: Mutex<Option<CoreError>>,
    pub(crate) queries: Mutex<Vec<CandidateQuery>>,
    pub(crate) confirms: Mutex<Vec<(String, u64)>>,
    pub(crate) cancels: AtomicUsize,
}

impl ScriptedFinder {
    pub(crate) fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn offering(candidates: Vec<CandidateDriver>) -> Arc<Self> {
        let finder = Self::default();
        *finder.candidates.lock().unwrap() = candidates;
        Arc::new(finder)
    }

    pub(crate) fn push_verdict(&self, verdict: Result<ConfirmVerdict, CoreError>) {
        self.verdicts.lock().unwrap().push_back(verdict);
    }

    /// Radii queried, consecutive duplicates collapsed.
    pub(crate) fn radii(&self) -> Vec<f64> {
        let mut radii: Vec<f64> = self
            .queries
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.radius_km)
            .collect();
        radii.dedup();
        radii
    }

    pub(crate) fn tokens(&self) -> Vec<u64> {
        let mut tokens: Vec<u64> = self
            .queries
            .lock()
            .unwrap()
            .iter()
            .map(|q| q.attempt_token)
            .collect();
        tokens.dedup();
        tokens
    }
}

impl AgentFinder for ScriptedFinder {
    fn find_candidates<'a>(
        &'a self,
        query: &'a CandidateQuery,
    ) -> BoxFuture<'a, Result<Vec<CandidateDriver>, CoreError>> {
        self.queries.lock().unwrap().push(query.clone());
        let candidates = self.candidates.lock().unwrap().clone();
        Box::pin(async move { Ok(candidates) })
    }

    fn confirm<'a>(
        &'a self,
        _engagement_id: &'a str,
        candidate: &'a CandidateDriver,
        attempt_token: u64,
    ) -> BoxFuture<'a, Result<ConfirmVerdict, CoreError>> {
        self.confirms
            .lock()
            .unwrap()
            .push((candidate.id.clone(), attempt_token));
        let verdict = self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ConfirmVerdict::Accepted));
        Box::pin(async move { verdict })
    }

    fn cancel<'a>(&'a self, _engagement_id: &'a str) -> BoxFuture<'a, Result<(), CoreError>> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        let result = match self.cancel_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }
}

pub(crate) fn driver(id: &str, distance_km: f64, eta_secs: Option<u32>) -> CandidateDriver {
    CandidateDriver {
        id: id.into(),
        name: Some(format!("Driver {id}")),
        distance_km,
        rating: Some(4.8),
        eta_secs,
    }
}

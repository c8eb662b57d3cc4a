//! Real-time socket session.
//!
//! A [`Session`] is a pair of in-process channels: frames the client emits
//! flow out through [`SessionSender`], and everything the backend delivers
//! arrives as a [`SessionSignal`]. Connectors own the other end, a
//! [`SessionPeer`], and pump it against the real wire. Keeping the session
//! transport-agnostic lets the connection layer be driven by a scripted peer
//! in tests exactly as it is by a live WebSocket.
//!
//! # Example
//!
//! ```rust,ignore
//! use ridelink_api::socket::{AuthParams, Connector, WsConnector};
//!
//! let connector = WsConnector::default();
//! let session = connector.connect(&url, &auth).await?;
//! let (sender, mut inbound) = session.into_parts();
//! sender.emit(WireFrame::new("joinRideRoom", json!({ "rideId": "r-1" })))?;
//!
//! while let Some(signal) = inbound.recv().await {
//!     println!("{signal:?}");
//! }
//! ```

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::error::Error;

// ── Frames & signals ─────────────────────────────────────────────────

/// One named event with its JSON payload, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WireFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Everything the backend side of a session can tell the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// An inbound event frame.
    Frame(WireFrame),
    /// The connection dropped without a close handshake.
    Interrupted { reason: String },
    /// The backend closed the session deliberately.
    Closed { code: Option<u16>, reason: String },
}

/// Identity and credential presented on the socket handshake.
#[derive(Debug, Clone)]
pub struct AuthParams {
    pub user_id: String,
    pub token: SecretString,
}

// ── Session ──────────────────────────────────────────────────────────

/// Client end of a live socket session.
#[derive(Debug)]
pub struct Session {
    sender: SessionSender,
    inbound: mpsc::UnboundedReceiver<SessionSignal>,
}

impl Session {
    /// Create a connected session and the peer end that drives it.
    pub fn pair() -> (Self, SessionPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let close = CancellationToken::new();

        let session = Self {
            sender: SessionSender {
                id: Uuid::new_v4(),
                outbound: out_tx,
                close: close.clone(),
            },
            inbound: in_rx,
        };
        let peer = SessionPeer {
            inbound: in_tx,
            outbound: out_rx,
            close,
        };
        (session, peer)
    }

    pub fn id(&self) -> Uuid {
        self.sender.id
    }

    /// Split into the cloneable emit half and the inbound signal stream.
    pub fn into_parts(self) -> (SessionSender, mpsc::UnboundedReceiver<SessionSignal>) {
        (self.sender, self.inbound)
    }
}

/// Cloneable emit handle for a session.
#[derive(Debug, Clone)]
pub struct SessionSender {
    id: Uuid,
    outbound: mpsc::UnboundedSender<WireFrame>,
    close: CancellationToken,
}

impl SessionSender {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Hand a frame to the connector. Fails only if the session is gone.
    pub fn emit(&self, frame: WireFrame) -> Result<(), Error> {
        if self.close.is_cancelled() {
            return Err(Error::SessionGone);
        }
        self.outbound.send(frame).map_err(|_| Error::SessionGone)
    }

    /// Request a clean close. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled() || self.outbound.is_closed()
    }
}

/// Backend end of a session, owned by a connector (or a test double).
#[derive(Debug)]
pub struct SessionPeer {
    inbound: mpsc::UnboundedSender<SessionSignal>,
    outbound: mpsc::UnboundedReceiver<WireFrame>,
    close: CancellationToken,
}

impl SessionPeer {
    /// Deliver an inbound frame. Returns `false` if the client end is gone.
    pub fn deliver(&self, frame: WireFrame) -> bool {
        self.inbound.send(SessionSignal::Frame(frame)).is_ok()
    }

    /// Report a dropped connection.
    pub fn interrupt(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(SessionSignal::Interrupted {
            reason: reason.into(),
        });
    }

    /// Report a deliberate close by the backend.
    pub fn close_cleanly(&self, code: Option<u16>, reason: impl Into<String>) {
        let _ = self.inbound.send(SessionSignal::Closed {
            code,
            reason: reason.into(),
        });
    }

    /// Wait for the next frame the client emitted.
    pub async fn next_emitted(&mut self) -> Option<WireFrame> {
        self.outbound.recv().await
    }

    /// Drain every frame emitted so far without waiting.
    pub fn drain_emitted(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the client asked to close the session.
    pub fn client_closed(&self) -> bool {
        self.close.is_cancelled()
    }
}

// ── Connector ────────────────────────────────────────────────────────

/// Opens sessions against a backend.
///
/// Object-safe so the connection layer can hold an `Arc<dyn Connector>`.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(
        &'a self,
        url: &'a Url,
        auth: &'a AuthParams,
    ) -> BoxFuture<'a, Result<Session, Error>>;
}

/// WebSocket connector speaking JSON text frames.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect<'a>(
        &'a self,
        url: &'a Url,
        auth: &'a AuthParams,
    ) -> BoxFuture<'a, Result<Session, Error>> {
        Box::pin(async move {
            tracing::info!(url = %url, user = %auth.user_id, "Connecting socket");

            let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
                |e: tungstenite::http::uri::InvalidUri| Error::SocketConnect(e.to_string()),
            )?;

            let request = ClientRequestBuilder::new(uri)
                .with_header(
                    "Authorization",
                    format!("Bearer {}", auth.token.expose_secret()),
                )
                .with_header("X-User-Id", auth.user_id.clone());

            let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(map_handshake_error)?;

            tracing::info!("Socket connected");

            let (session, peer) = Session::pair();
            tokio::spawn(ws_pump(ws_stream, peer));
            Ok(session)
        })
    }
}

fn map_handshake_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(ref resp)
            if matches!(resp.status().as_u16(), 401 | 403) =>
        {
            Error::Authentication {
                message: format!("socket handshake refused (HTTP {})", resp.status()),
            }
        }
        other => Error::SocketConnect(other.to_string()),
    }
}

// ── Wire pump ────────────────────────────────────────────────────────

/// Shovel frames between the WebSocket and the session peer until either
/// side goes away.
async fn ws_pump<S>(ws_stream: tokio_tungstenite::WebSocketStream<S>, mut peer: SessionPeer)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();
    let close = peer.close.clone();

    loop {
        tokio::select! {
            biased;
            () = close.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                let _ = write.close().await;
                tracing::debug!("Socket closed by client");
                return;
            }
            outbound = peer.outbound.recv() => {
                let Some(frame) = outbound else {
                    let _ = write.close().await;
                    return;
                };
                match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                            peer.interrupt(format!("send failed: {e}"));
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, event = %frame.event, "Failed to encode frame");
                    }
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(frame) = parse_frame(&text) {
                            if !peer.deliver(frame) {
                                return;
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pings on the next write/flush
                        tracing::trace!("Socket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((None, String::new()), |cf| {
                            (Some(u16::from(cf.code)), cf.reason.to_string())
                        });
                        tracing::info!(?code, reason = %reason, "Socket close frame received");
                        peer.close_cleanly(code, reason);
                        return;
                    }
                    Some(Err(e)) => {
                        peer.interrupt(e.to_string());
                        return;
                    }
                    None => {
                        peer.interrupt("stream ended without close frame");
                        return;
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

/// Parse a text frame into a [`WireFrame`], dropping anything malformed.
fn parse_frame(text: &str) -> Option<WireFrame> {
    match serde_json::from_str::<WireFrame>(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse socket frame");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

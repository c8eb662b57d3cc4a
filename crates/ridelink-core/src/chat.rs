// ── Chat relay ──
//
// Per-ride message threads with optimistic local append. Outgoing messages
// get a `tmp-` id; the server echo carries it back as `clientMessageId` and
// the pending entry is replaced in place, so the thread never shows a
// message twice. Typing indicators are debounced both ways.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::connection::ConnectionManager;
use crate::error::ValidationError;
use crate::model::{ChatMessage, ChatUpdate, Delivery, MessageType, OutboundEvent};

const UPDATE_CHANNEL_SIZE: usize = 256;

// ── History cache collaborator ───────────────────────────────────────

/// Key for a cached history entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    pub entity_id: String,
    pub entity_type: String,
}

impl HistoryKey {
    pub fn ride(ride_id: impl Into<String>) -> Self {
        Self {
            entity_id: ride_id.into(),
            entity_type: "ride".into(),
        }
    }
}

/// Persistent chat history storage.
pub trait HistoryCache: Send + Sync + 'static {
    fn load(&self, key: &HistoryKey) -> Option<Vec<ChatMessage>>;
    fn store(&self, key: &HistoryKey, messages: &[ChatMessage]);
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryCache {
    entries: DashMap<HistoryKey, Vec<ChatMessage>>,
}

impl InMemoryHistoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryCache for InMemoryHistoryCache {
    fn load(&self, key: &HistoryKey) -> Option<Vec<ChatMessage>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn store(&self, key: &HistoryKey, messages: &[ChatMessage]) {
        self.entries.insert(key.clone(), messages.to_vec());
    }
}

// ── Relay ────────────────────────────────────────────────────────────

struct TypingTimer {
    generation: u64,
    cancel: CancellationToken,
    user_id: Option<String>,
}

enum Received {
    Duplicate,
    Confirmed { temp_id: String, message: ChatMessage },
    Appended(ChatMessage),
}

#[derive(Clone)]
pub struct ChatRelay {
    inner: Arc<ChatInner>,
}

struct ChatInner {
    config: ChatConfig,
    connection: ConnectionManager,
    cache: Arc<dyn HistoryCache>,
    threads: DashMap<String, Vec<ChatMessage>>,
    local_typing: DashMap<String, TypingTimer>,
    remote_typing: DashMap<String, TypingTimer>,
    updates: broadcast::Sender<ChatUpdate>,
    lifecycle: CancellationToken,
    next_generation: AtomicU64,
}

impl ChatRelay {
    pub fn new(
        config: ChatConfig,
        connection: ConnectionManager,
        cache: Arc<dyn HistoryCache>,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        Self {
            inner: Arc::new(ChatInner {
                config,
                connection,
                cache,
                threads: DashMap::new(),
                local_typing: DashMap::new(),
                remote_typing: DashMap::new(),
                updates,
                lifecycle: CancellationToken::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    // ── Messages ─────────────────────────────────────────────────────

    /// Append a message locally and emit it.
    ///
    /// Validation happens before anything is appended. If the socket is
    /// down the message stays in the thread marked [`Delivery::Failed`]
    /// and goes out again on [`resend_pending()`](Self::resend_pending).
    pub fn send(&self, ride_id: &str, body: &str) -> Result<ChatMessage, ValidationError> {
        let ride_id = ride_id.trim();
        if ride_id.is_empty() {
            return Err(ValidationError::MissingEngagementId);
        }
        let text = body.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let max = self.inner.config.max_message_chars;
        if text.chars().count() > max {
            return Err(ValidationError::MessageTooLong { max });
        }

        let temp_id = format!("tmp-{}", Uuid::new_v4());
        let mut message = ChatMessage {
            id: temp_id.clone(),
            client_id: Some(temp_id.clone()),
            ride_id: ride_id.to_owned(),
            sender_id: self.inner.connection.identity().unwrap_or_default(),
            body: text.to_owned(),
            message_type: MessageType::Text,
            sent_at: Utc::now(),
            delivery: Delivery::Pending,
        };

        self.stop_typing(ride_id);
        self.with_thread(ride_id, |thread| thread.push(message.clone()));
        let _ = self.inner.updates.send(ChatUpdate::Appended(message.clone()));

        if !self.emit(&message) {
            warn!(ride = ride_id, temp_id = %temp_id, "message not sent, will retry on reconnect");
            self.set_delivery(ride_id, &temp_id, Delivery::Failed);
            message.delivery = Delivery::Failed;
            let _ = self.inner.updates.send(ChatUpdate::Failed {
                ride_id: ride_id.to_owned(),
                temp_id,
            });
        }
        Ok(message)
    }

    /// Apply an inbound message. Returns `false` for duplicates.
    pub fn receive(&self, message: ChatMessage) -> bool {
        let ride_id = message.ride_id.clone();
        let received = self.with_thread(&ride_id, |thread| merge_inbound(thread, message));

        match received {
            Received::Duplicate => {
                debug!(ride = %ride_id, "duplicate message dropped");
                false
            }
            Received::Confirmed { temp_id, message } => {
                debug!(ride = %ride_id, temp_id = %temp_id, id = %message.id, "message confirmed");
                let _ = self
                    .inner
                    .updates
                    .send(ChatUpdate::Confirmed { temp_id, message });
                true
            }
            Received::Appended(message) => {
                if self
                    .inner
                    .remote_typing
                    .get(&ride_id)
                    .is_some_and(|t| t.user_id.as_deref().is_none_or(|u| u == message.sender_id))
                {
                    self.remote_typing_stopped(&ride_id);
                }
                let _ = self.inner.updates.send(ChatUpdate::Appended(message));
                true
            }
        }
    }

    /// Re-emit every message still waiting for its echo, keeping its
    /// temporary id. Returns how many went out.
    pub fn resend_pending(&self) -> usize {
        let pending: Vec<ChatMessage> = self
            .inner
            .threads
            .iter()
            .flat_map(|thread| {
                thread
                    .value()
                    .iter()
                    .filter(|m| m.is_local_pending())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut resent = 0;
        for message in pending {
            let delivery = if self.emit(&message) {
                resent += 1;
                Delivery::Pending
            } else {
                Delivery::Failed
            };
            self.set_delivery(&message.ride_id, &message.id, delivery);
        }
        if resent > 0 {
            debug!(resent, "resent pending messages");
        }
        resent
    }

    /// The thread for `ride_id`, seeded from the history cache.
    pub fn history(&self, ride_id: &str) -> Vec<ChatMessage> {
        self.inner
            .threads
            .entry(ride_id.to_owned())
            .or_insert_with(|| {
                self.inner
                    .cache
                    .load(&HistoryKey::ride(ride_id))
                    .unwrap_or_default()
            })
            .value()
            .clone()
    }

    // ── Typing ───────────────────────────────────────────────────────

    /// Local keystroke. Emits `typingStart` on the first one and
    /// pushes the debounced `typingStop` back on every call.
    pub fn start_typing(&self, ride_id: &str) {
        let (generation, cancel) = self.new_timer();
        let previous = self.inner.local_typing.insert(
            ride_id.to_owned(),
            TypingTimer {
                generation,
                cancel: cancel.clone(),
                user_id: None,
            },
        );
        match previous {
            Some(timer) => timer.cancel.cancel(),
            None => {
                self.inner.connection.send(&OutboundEvent::TypingStart {
                    ride_id: ride_id.to_owned(),
                });
            }
        }

        let relay = self.clone();
        let ride_id = ride_id.to_owned();
        let debounce = self.inner.config.typing_debounce;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(debounce) => {
                    let expired = relay
                        .inner
                        .local_typing
                        .remove_if(&ride_id, |_, t| t.generation == generation)
                        .is_some();
                    if expired {
                        relay.inner.connection.send(&OutboundEvent::TypingStop { ride_id });
                    }
                }
            }
        });
    }

    /// Emit `typingStop` now. Returns `false` if not typing.
    pub fn stop_typing(&self, ride_id: &str) -> bool {
        let Some((_, timer)) = self.inner.local_typing.remove(ride_id) else {
            return false;
        };
        timer.cancel.cancel();
        self.inner.connection.send(&OutboundEvent::TypingStop {
            ride_id: ride_id.to_owned(),
        });
        true
    }

    /// A peer started typing. Clears itself after the remote timeout.
    pub fn remote_typing_started(&self, ride_id: &str, user_id: Option<String>) {
        let (generation, cancel) = self.new_timer();
        let previous = self.inner.remote_typing.insert(
            ride_id.to_owned(),
            TypingTimer {
                generation,
                cancel: cancel.clone(),
                user_id: user_id.clone(),
            },
        );
        match previous {
            Some(timer) => timer.cancel.cancel(),
            None => {
                let _ = self.inner.updates.send(ChatUpdate::Typing {
                    ride_id: ride_id.to_owned(),
                    user_id,
                    active: true,
                });
            }
        }

        let relay = self.clone();
        let ride_id = ride_id.to_owned();
        let timeout = self.inner.config.remote_typing_timeout;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(timeout) => {
                    if let Some((_, timer)) = relay
                        .inner
                        .remote_typing
                        .remove_if(&ride_id, |_, t| t.generation == generation)
                    {
                        debug!(ride = %ride_id, "remote typing indicator expired");
                        let _ = relay.inner.updates.send(ChatUpdate::Typing {
                            ride_id,
                            user_id: timer.user_id,
                            active: false,
                        });
                    }
                }
            }
        });
    }

    pub fn remote_typing_stopped(&self, ride_id: &str) -> bool {
        let Some((_, timer)) = self.inner.remote_typing.remove(ride_id) else {
            return false;
        };
        timer.cancel.cancel();
        let _ = self.inner.updates.send(ChatUpdate::Typing {
            ride_id: ride_id.to_owned(),
            user_id: timer.user_id,
            active: false,
        });
        true
    }

    pub fn is_peer_typing(&self, ride_id: &str) -> bool {
        self.inner.remote_typing.contains_key(ride_id)
    }

    /// Drop both typing indicators for a ride that has ended.
    pub fn clear_typing(&self, ride_id: &str) {
        self.stop_typing(ride_id);
        self.remote_typing_stopped(ride_id);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn updates(&self) -> broadcast::Receiver<ChatUpdate> {
        self.inner.updates.subscribe()
    }

    /// Cancel every typing timer.
    pub fn shutdown(&self) {
        self.inner.lifecycle.cancel();
        self.inner.local_typing.clear();
        self.inner.remote_typing.clear();
    }

    // ── Internals ────────────────────────────────────────────────────

    fn emit(&self, message: &ChatMessage) -> bool {
        self.inner.connection.send(&OutboundEvent::SendMessage {
            ride_id: message.ride_id.clone(),
            message: message.body.clone(),
            message_type: message.message_type,
            client_message_id: message.client_id.clone().unwrap_or_else(|| message.id.clone()),
            timestamp: message.sent_at,
        })
    }

    fn new_timer(&self) -> (u64, CancellationToken) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        (generation, self.inner.lifecycle.child_token())
    }

    fn set_delivery(&self, ride_id: &str, id: &str, delivery: Delivery) {
        self.with_thread(ride_id, |thread| {
            if let Some(m) = thread.iter_mut().find(|m| m.id == id && m.is_local_pending()) {
                m.delivery = delivery;
            }
        });
    }

    /// Run `f` on the thread for `ride_id` and write the result back to
    /// the history cache.
    fn with_thread<R>(&self, ride_id: &str, f: impl FnOnce(&mut Vec<ChatMessage>) -> R) -> R {
        let key = HistoryKey::ride(ride_id);
        let (result, snapshot) = {
            let mut thread = self
                .inner
                .threads
                .entry(ride_id.to_owned())
                .or_insert_with(|| self.inner.cache.load(&key).unwrap_or_default());
            let result = f(thread.value_mut());
            (result, thread.value().clone())
        };
        self.inner.cache.store(&key, &snapshot);
        result
    }
}

/// Fold a server message into a thread.
///
/// A known server id is a duplicate, and so is a `clientMessageId` that
/// already confirmed an entry. A `clientMessageId` naming a pending
/// entry confirms it; without one, a pending entry from the same sender
/// with the same body is taken as the match.
fn merge_inbound(thread: &mut Vec<ChatMessage>, mut message: ChatMessage) -> Received {
    if thread.iter().any(|m| {
        m.id == message.id
            || (!m.is_local_pending()
                && m.client_id.is_some()
                && m.client_id == message.client_id)
    }) {
        return Received::Duplicate;
    }
    message.delivery = Delivery::Sent;

    let pending = match message.client_id.as_deref() {
        Some(client_id) => thread
            .iter_mut()
            .find(|m| m.is_local_pending() && m.client_id.as_deref() == Some(client_id)),
        None => thread.iter_mut().find(|m| {
            m.is_local_pending() && m.sender_id == message.sender_id && m.body == message.body
        }),
    };

    match pending {
        Some(slot) => {
            let temp_id = std::mem::replace(&mut slot.id, message.id.clone());
            message.client_id = Some(temp_id.clone());
            *slot = message.clone();
            Received::Confirmed { temp_id, message }
        }
        None => {
            thread.push(message.clone());
            Received::Appended(message)
        }
    }
}

//! `ridelink watch`: follow one ride over the socket until it ends.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, warn};

use ridelink_core::{
    ChatMessage, ChatUpdate, ConnectionPhase, ConnectionState, Coordinator, Engagement,
    EngagementStatus, EmergencyUpdate, NotificationEvent, NotificationPriority,
};

use crate::cli::{GlobalOpts, WatchArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output::{self, Painter};

/// One line of the live feed.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FeedItem {
    Status(NotificationEvent),
    Chat(ChatMessage),
    ChatFailed { ride_id: String, temp_id: String },
    Typing { user_id: Option<String>, active: bool },
    Emergency { ride_id: String, detail: String },
    Connection { phase: String, attempt: u32 },
}

pub async fn handle(
    args: WatchArgs,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let rider = resolved.rider_id()?;
    let coordinator = super::coordinator(resolved)?;
    let engagement = initial_engagement(&args, resolved).await;
    if engagement.status.is_terminal() {
        warn!(ride = %args.ride_id, status = %engagement.status, "ride already finished");
    }

    let feeds = Feeds {
        notifications: coordinator.notifications(),
        chat: coordinator.chat().updates(),
        emergencies: coordinator.emergency().updates(),
        connection: coordinator.connection_state(),
    };

    coordinator.connect(rider, resolved.token.clone()).await?;
    coordinator.place_request(engagement);

    if let Some(ref text) = args.say {
        if let Err(e) = coordinator.send_message(&args.ride_id, text) {
            coordinator.shutdown();
            return Err(e.into());
        }
    }

    let painter = Painter::new(global.color);
    let result = follow(&coordinator, &args.ride_id, global, painter, feeds).await;
    coordinator.shutdown();
    result
}

/// Seed the engagement from the query API so stale socket replays are
/// recognised. Falls back to `requested` when the lookup fails.
async fn initial_engagement(args: &WatchArgs, resolved: &Resolved) -> Engagement {
    let mut engagement = Engagement::requested(&args.ride_id, args.kind);
    let snapshot = match super::query_client(resolved) {
        Ok(client) => client.get_status(&args.ride_id).await.map_err(CliError::from),
        Err(e) => Err(e),
    };
    match snapshot {
        Ok(reply) => {
            if let Some(status) = EngagementStatus::from_wire(&reply.status) {
                engagement.status = status;
            }
            engagement.server_version = reply.version;
        }
        Err(e) => debug!(error = %e, "status lookup failed; starting from requested"),
    }
    engagement
}

/// Subscriptions taken before connecting, so nothing is missed.
struct Feeds {
    notifications: broadcast::Receiver<NotificationEvent>,
    chat: broadcast::Receiver<ChatUpdate>,
    emergencies: broadcast::Receiver<EmergencyUpdate>,
    connection: watch::Receiver<ConnectionState>,
}

async fn follow(
    coordinator: &Coordinator,
    ride_id: &str,
    global: &GlobalOpts,
    painter: Painter,
    mut feeds: Feeds,
) -> Result<(), CliError> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let item = tokio::select! {
            biased;
            _ = &mut ctrl_c => return Ok(()),
            event = feeds.notifications.recv() => match event {
                Ok(event) if event.engagement_id == ride_id => {
                    let done = event.status.is_terminal();
                    emit(global, painter, &FeedItem::Status(event))?;
                    if done {
                        return Ok(());
                    }
                    continue;
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification feed lagged");
                    continue;
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            update = feeds.chat.recv() => match update {
                Ok(update) => match chat_item(ride_id, update) {
                    Some(item) => item,
                    None => continue,
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "chat feed lagged");
                    continue;
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            update = feeds.emergencies.recv() => match update {
                Ok(update) => match emergency_item(ride_id, update) {
                    Some(item) => item,
                    None => continue,
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Ok(()),
            },
            changed = feeds.connection.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let state = feeds.connection.borrow_and_update().clone();
                if state.phase == ConnectionPhase::Lost {
                    emit(global, painter, &connection_item(&state))?;
                    coordinator.reconnect().await?;
                    continue;
                }
                connection_item(&state)
            }
        };
        emit(global, painter, &item)?;
    }
}

fn chat_item(ride_id: &str, update: ChatUpdate) -> Option<FeedItem> {
    match update {
        ChatUpdate::Appended(message) | ChatUpdate::Confirmed { message, .. }
            if message.ride_id == ride_id =>
        {
            Some(FeedItem::Chat(message))
        }
        ChatUpdate::Failed {
            ride_id: failed_ride,
            temp_id,
        } if failed_ride == ride_id => Some(FeedItem::ChatFailed {
            ride_id: failed_ride,
            temp_id,
        }),
        ChatUpdate::Typing {
            ride_id: typing_ride,
            user_id,
            active,
        } if typing_ride == ride_id => Some(FeedItem::Typing { user_id, active }),
        _ => None,
    }
}

fn emergency_item(ride_id: &str, update: EmergencyUpdate) -> Option<FeedItem> {
    match update {
        EmergencyUpdate::Triggered(alert) if alert.ride_id == ride_id => {
            let detail = match (alert.raised_by, alert.reason) {
                (Some(by), Some(reason)) => format!("raised by {by}: {reason}"),
                (Some(by), None) => format!("raised by {by}"),
                (None, Some(reason)) => reason,
                (None, None) => "raised".into(),
            };
            Some(FeedItem::Emergency {
                ride_id: alert.ride_id,
                detail,
            })
        }
        EmergencyUpdate::Resolved {
            ride_id: resolved_ride,
            resolution,
            ..
        } if resolved_ride == ride_id => Some(FeedItem::Emergency {
            ride_id: resolved_ride,
            detail: format!("resolved ({resolution:?})").to_lowercase(),
        }),
        _ => None,
    }
}

fn connection_item(state: &ConnectionState) -> FeedItem {
    FeedItem::Connection {
        phase: state.phase.to_string(),
        attempt: state.attempt_count,
    }
}

fn emit(global: &GlobalOpts, painter: Painter, item: &FeedItem) -> Result<(), CliError> {
    let line = output::render_event(global.output, item, |item| feed_line(painter, item))?;
    output::print_output(&line, global.quiet);
    Ok(())
}

fn feed_line(painter: Painter, item: &FeedItem) -> String {
    match item {
        FeedItem::Status(event) => {
            let title = match event.priority {
                NotificationPriority::Critical | NotificationPriority::High => {
                    painter.alert(&event.title)
                }
                NotificationPriority::Normal => painter.good(&event.title),
            };
            format!(
                "{} {title} {}",
                painter.label(&event.created_at.format("%H:%M:%S").to_string()),
                event.body
            )
        }
        FeedItem::Chat(message) => format!(
            "{} {}: {}",
            painter.label(&message.sent_at.format("%H:%M:%S").to_string()),
            painter.accent(&message.sender_id),
            message.body
        ),
        FeedItem::ChatFailed { temp_id, .. } => {
            painter.alert(&format!("message {temp_id} not delivered; will resend"))
        }
        FeedItem::Typing { user_id, active } => {
            let who = user_id.as_deref().unwrap_or("peer");
            let verb = if *active { "is typing" } else { "stopped typing" };
            painter.label(&format!("{who} {verb}"))
        }
        FeedItem::Emergency { detail, .. } => painter.alert(&format!("EMERGENCY {detail}")),
        FeedItem::Connection { phase, attempt } if *attempt > 0 => {
            painter.label(&format!("connection {phase} (attempt {attempt})"))
        }
        FeedItem::Connection { phase, .. } => painter.label(&format!("connection {phase}")),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ridelink_core::{Delivery, MessageType};

    use super::*;
    use crate::cli::ColorMode;

    fn message(ride_id: &str) -> ChatMessage {
        ChatMessage {
            id: "m-1".into(),
            client_id: None,
            ride_id: ride_id.into(),
            sender_id: "driver-7".into(),
            body: "two minutes away".into(),
            message_type: MessageType::Text,
            sent_at: Utc::now(),
            delivery: Delivery::Sent,
        }
    }

    #[test]
    fn chat_for_other_rides_is_filtered() {
        assert!(chat_item("r-1", ChatUpdate::Appended(message("r-2"))).is_none());
        let item = chat_item("r-1", ChatUpdate::Appended(message("r-1"))).map(|item| {
            feed_line(Painter::new(ColorMode::Never), &item)
        });
        assert!(item.is_some_and(|line| line.ends_with("driver-7: two minutes away")));
    }

    #[test]
    fn typing_line_names_the_peer() {
        let item = chat_item(
            "r-1",
            ChatUpdate::Typing {
                ride_id: "r-1".into(),
                user_id: Some("driver-7".into()),
                active: true,
            },
        );
        let line = item.map(|item| feed_line(Painter::new(ColorMode::Never), &item));
        assert_eq!(line.as_deref(), Some("driver-7 is typing"));
    }

    #[test]
    fn feed_items_serialize_with_type_tag() {
        let item = FeedItem::Connection {
            phase: "reconnecting".into(),
            attempt: 2,
        };
        let json = serde_json::to_string(&item).map_err(|e| e.to_string());
        assert_eq!(
            json.as_deref(),
            Ok(r#"{"type":"connection","phase":"reconnecting","attempt":2}"#)
        );
    }
}

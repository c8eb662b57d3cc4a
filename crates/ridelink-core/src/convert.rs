// ── Wire-to-domain conversions ──
//
// Bridges raw socket frames into the canonical `InboundEvent` union. Each
// payload is validated here: ids may arrive as strings or numbers,
// timestamps as RFC 3339 strings or epoch milliseconds, locations as
// `latitude/longitude` or `lat/lng`. Anything downstream of this module
// can assume well-formed data.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use ridelink_api::WireFrame;

use crate::model::{
    CandidateDriver, ChatMessage, Delivery, EmergencyAlert, Engagement, EngagementKind,
    EngagementStatus, GeoPoint, InboundEvent, LocationFix, MessageType, Participants,
    StatusUpdate,
};

/// Why a frame could not become an [`InboundEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),

    #[error("`{kind}` payload is missing `{field}`")]
    Missing { kind: String, field: &'static str },

    #[error("`{kind}` payload has an invalid `{field}`: {reason}")]
    Invalid {
        kind: String,
        field: &'static str,
        reason: String,
    },
}

// ── Field access ─────────────────────────────────────────────────────

/// Lookup helper over one payload object, remembering the event kind for
/// error messages.
struct Fields<'a> {
    kind: &'a str,
    data: &'a Value,
}

impl<'a> Fields<'a> {
    fn new(kind: &'a str, data: &'a Value) -> Self {
        Self { kind, data }
    }

    fn nested(&self, key: &str) -> Option<Fields<'a>> {
        self.data
            .get(key)
            .filter(|v| v.is_object())
            .map(|data| Fields::new(self.kind, data))
    }

    fn first(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|k| self.data.get(*k))
            .find(|v| !v.is_null())
    }

    /// String or number id, as a string.
    fn id(&self, keys: &[&str]) -> Option<String> {
        match self.first(keys)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn require_id(&self, keys: &[&str], field: &'static str) -> Result<String, PayloadError> {
        self.id(keys).ok_or_else(|| self.missing(field))
    }

    fn text(&self, keys: &[&str]) -> Option<String> {
        self.first(keys).and_then(Value::as_str).map(str::to_owned)
    }

    fn float(&self, keys: &[&str]) -> Option<f64> {
        match self.first(keys)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn unsigned(&self, keys: &[&str]) -> Option<u64> {
        match self.first(keys)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Timestamp, falling back to now when absent or unparseable.
    fn timestamp(&self, keys: &[&str]) -> DateTime<Utc> {
        self.first(keys).and_then(parse_timestamp).unwrap_or_else(Utc::now)
    }

    fn missing(&self, field: &'static str) -> PayloadError {
        PayloadError::Missing {
            kind: self.kind.to_owned(),
            field,
        }
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> PayloadError {
        PayloadError::Invalid {
            kind: self.kind.to_owned(),
            field,
            reason: reason.into(),
        }
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

// ── Normalization ────────────────────────────────────────────────────

/// Validate a raw frame and convert it into an [`InboundEvent`].
pub fn normalize(frame: &WireFrame) -> Result<InboundEvent, PayloadError> {
    let f = Fields::new(&frame.event, &frame.data);

    match frame.event.as_str() {
        "rideStatusUpdate" => ride_status(&f).map(InboundEvent::RideStatusUpdate),
        "driverLocationUpdate" => {
            let ride_id = f.require_id(&["rideId"], "rideId")?;
            let point = f
                .nested("location")
                .map_or_else(|| geo_point(&f), |loc| geo_point(&loc))?;
            let heading = f
                .nested("location")
                .and_then(|loc| loc.float(&["heading"]))
                .or_else(|| f.float(&["heading"]));
            Ok(InboundEvent::DriverLocationUpdate {
                ride_id,
                fix: LocationFix {
                    point,
                    heading,
                    recorded_at: f.timestamp(&["timestamp"]),
                },
            })
        }
        "newMessage" => chat_message(&f).map(InboundEvent::NewMessage),
        "rideCreated" => {
            let ride = f.nested("ride").ok_or_else(|| f.missing("ride"))?;
            engagement(&ride).map(InboundEvent::RideCreated)
        }
        "typingStart" => Ok(InboundEvent::TypingStart {
            ride_id: f.require_id(&["rideId"], "rideId")?,
            user_id: f.id(&["userId", "senderId"]),
        }),
        "typingStop" => Ok(InboundEvent::TypingStop {
            ride_id: f.require_id(&["rideId"], "rideId")?,
            user_id: f.id(&["userId", "senderId"]),
        }),
        "emergencyTriggered" => {
            let location = f
                .nested("location")
                .map(|loc| geo_point(&loc))
                .transpose()?;
            Ok(InboundEvent::EmergencyTriggered(EmergencyAlert {
                id: f
                    .id(&["alertId", "id", "_id"])
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                ride_id: f.require_id(&["rideId"], "rideId")?,
                raised_by: f.id(&["userId", "triggeredBy"]),
                location,
                reason: f.text(&["reason", "message"]),
                raised_at: f.timestamp(&["timestamp", "createdAt"]),
            }))
        }
        "emergencyResolved" => Ok(InboundEvent::EmergencyResolved {
            ride_id: f.require_id(&["rideId"], "rideId")?,
            alert_id: f.id(&["alertId", "id"]),
        }),
        "agentOffer" => {
            let attempt_token = f
                .unsigned(&["attemptToken"])
                .ok_or_else(|| f.missing("attemptToken"))?;
            let candidates = match (f.data.get("agents"), f.nested("agent")) {
                (Some(Value::Array(items)), _) => items
                    .iter()
                    .map(|item| candidate(&Fields::new(f.kind, item)))
                    .collect::<Result<Vec<_>, _>>()?,
                (_, Some(agent)) => vec![candidate(&agent)?],
                _ => return Err(f.missing("agent")),
            };
            Ok(InboundEvent::AgentOffer {
                attempt_token,
                candidates,
            })
        }
        "agentRejected" => Ok(InboundEvent::AgentRejected {
            attempt_token: f
                .unsigned(&["attemptToken"])
                .ok_or_else(|| f.missing("attemptToken"))?,
            reason: f.text(&["reason"]),
        }),
        "pong" => Ok(InboundEvent::Pong {
            at: f.timestamp(&["timestamp"]),
        }),
        other => Err(PayloadError::UnknownKind(other.to_owned())),
    }
}

fn ride_status(f: &Fields<'_>) -> Result<StatusUpdate, PayloadError> {
    let ride = f.nested("ride");
    let engagement_id = f
        .id(&["rideId"])
        .or_else(|| ride.as_ref().and_then(|r| r.id(&["id", "_id"])))
        .ok_or_else(|| f.missing("rideId"))?;
    let raw_status = f
        .text(&["status"])
        .or_else(|| ride.as_ref().and_then(|r| r.text(&["status"])))
        .ok_or_else(|| f.missing("status"))?;
    let status = EngagementStatus::from_wire(&raw_status)
        .ok_or_else(|| f.invalid("status", format!("unrecognized status `{raw_status}`")))?;

    let snapshot = match ride {
        Some(ref r) => match engagement(r) {
            Ok(mut e) => {
                e.id.clone_from(&engagement_id);
                e.status = status;
                Some(e)
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unusable ride snapshot");
                None
            }
        },
        None => None,
    };
    let agent_id = f
        .id(&["driverId"])
        .or_else(|| snapshot.as_ref().and_then(|s| s.participants.agent_id.clone()));

    Ok(StatusUpdate {
        engagement_id,
        status,
        snapshot,
        agent_id,
        at: f.timestamp(&["timestamp", "updatedAt"]),
    })
}

/// Build an engagement from a `ride` object.
fn engagement(f: &Fields<'_>) -> Result<Engagement, PayloadError> {
    let id = f.require_id(&["id", "_id", "rideId"], "ride.id")?;
    let status = match f.text(&["status"]) {
        Some(raw) => EngagementStatus::from_wire(&raw)
            .ok_or_else(|| f.invalid("ride.status", format!("unrecognized status `{raw}`")))?,
        None => EngagementStatus::Requested,
    };
    let kind = f
        .text(&["kind", "type"])
        .and_then(|k| k.parse::<EngagementKind>().ok())
        .unwrap_or_default();
    let agent_id = f
        .id(&["driverId"])
        .or_else(|| f.nested("driver").and_then(|d| d.id(&["id", "_id"])));
    let requester_id = f
        .id(&["riderId", "userId"])
        .or_else(|| f.nested("rider").and_then(|r| r.id(&["id", "_id"])));

    Ok(Engagement {
        id,
        kind,
        status,
        participants: Participants {
            requester_id,
            agent_id,
        },
        server_version: f.unsigned(&["version", "__v"]),
        driver_location: None,
        updated_at: f.timestamp(&["updatedAt", "createdAt"]),
    })
}

fn chat_message(f: &Fields<'_>) -> Result<ChatMessage, PayloadError> {
    let body = f.text(&["message", "text"]).ok_or_else(|| f.missing("message"))?;
    let message_type = f
        .text(&["messageType"])
        .and_then(|t| t.parse::<MessageType>().ok())
        .unwrap_or_default();

    Ok(ChatMessage {
        id: f.require_id(&["id", "_id", "messageId"], "id")?,
        client_id: f.id(&["clientMessageId", "tempId"]),
        ride_id: f.require_id(&["rideId"], "rideId")?,
        sender_id: f.require_id(&["senderId"], "senderId")?,
        body,
        message_type,
        sent_at: f.timestamp(&["timestamp", "createdAt"]),
        delivery: Delivery::Sent,
    })
}

fn candidate(f: &Fields<'_>) -> Result<CandidateDriver, PayloadError> {
    Ok(CandidateDriver {
        id: f.require_id(&["id", "_id", "driverId"], "agent.id")?,
        name: f.text(&["name"]),
        distance_km: f
            .float(&["distance", "distanceKm"])
            .ok_or_else(|| f.missing("agent.distance"))?,
        rating: f.float(&["rating"]).map(narrow_rating),
        eta_secs: f
            .unsigned(&["eta", "etaSecs"])
            .and_then(|eta| u32::try_from(eta).ok()),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn narrow_rating(rating: f64) -> f32 {
    rating as f32
}

fn geo_point(f: &Fields<'_>) -> Result<GeoPoint, PayloadError> {
    let latitude = f
        .float(&["latitude", "lat"])
        .ok_or_else(|| f.missing("latitude"))?;
    let longitude = f
        .float(&["longitude", "lng", "lon"])
        .ok_or_else(|| f.missing("longitude"))?;
    let point = GeoPoint::new(latitude, longitude);
    if point.is_valid() {
        Ok(point)
    } else {
        Err(f.invalid("location", format!("({latitude}, {longitude}) is out of range")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn frame(event: &str, data: Value) -> WireFrame {
        WireFrame::new(event, data)
    }

    #[test]
    fn status_update_accepts_numeric_ids_and_aliases() {
        let event = normalize(&frame(
            "rideStatusUpdate",
            json!({ "rideId": 42, "status": "In-Progress", "timestamp": 1_700_000_000_000_i64 }),
        ))
        .unwrap();

        let InboundEvent::RideStatusUpdate(update) = event else {
            panic!("expected status update, got {event:?}");
        };
        assert_eq!(update.engagement_id, "42");
        assert_eq!(update.status, EngagementStatus::InProgress);
        assert_eq!(update.at.timestamp(), 1_700_000_000);
        assert!(update.snapshot.is_none());
    }

    #[test]
    fn status_update_reads_driver_from_snapshot() {
        let event = normalize(&frame(
            "rideStatusUpdate",
            json!({
                "rideId": "r-1",
                "status": "accepted",
                "ride": { "_id": "r-1", "status": "accepted", "driver": { "id": "d-9" }, "version": 3 }
            }),
        ))
        .unwrap();

        let InboundEvent::RideStatusUpdate(update) = event else {
            panic!("expected status update");
        };
        assert_eq!(update.agent_id.as_deref(), Some("d-9"));
        assert_eq!(update.snapshot.unwrap().server_version, Some(3));
    }

    #[test]
    fn location_accepts_short_keys() {
        let event = normalize(&frame(
            "driverLocationUpdate",
            json!({ "rideId": "r-1", "location": { "lat": 52.5, "lng": 13.4, "heading": 90 },
                    "timestamp": "2026-03-01T10:00:00Z" }),
        ))
        .unwrap();

        assert_eq!(
            event,
            InboundEvent::DriverLocationUpdate {
                ride_id: "r-1".into(),
                fix: LocationFix {
                    point: GeoPoint::new(52.5, 13.4),
                    heading: Some(90.0),
                    recorded_at: "2026-03-01T10:00:00Z".parse().unwrap(),
                },
            }
        );
    }

    #[test]
    fn out_of_range_location_is_rejected() {
        let err = normalize(&frame(
            "driverLocationUpdate",
            json!({ "rideId": "r-1", "location": { "latitude": 123.0, "longitude": 0.0 } }),
        ))
        .unwrap_err();
        assert!(matches!(err, PayloadError::Invalid { field: "location", .. }));
    }

    #[test]
    fn message_carries_client_id_echo() {
        let event = normalize(&frame(
            "newMessage",
            json!({ "_id": "m-7", "rideId": "r-1", "senderId": "u-1", "message": "on my way",
                    "messageType": "TEXT", "clientMessageId": "tmp-abc" }),
        ))
        .unwrap();

        let InboundEvent::NewMessage(msg) = event else {
            panic!("expected message");
        };
        assert_eq!(msg.id, "m-7");
        assert_eq!(msg.client_id.as_deref(), Some("tmp-abc"));
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.delivery, Delivery::Sent);
    }

    #[test]
    fn agent_offer_single_or_list() {
        let single = normalize(&frame(
            "agentOffer",
            json!({ "attemptToken": 3, "agent": { "id": "d-1", "distance": 1.2, "eta": 180 } }),
        ))
        .unwrap();
        let list = normalize(&frame(
            "agentOffer",
            json!({ "attemptToken": "3", "agents": [{ "id": "d-1", "distance": 1.2 }, { "id": "d-2", "distance": 2.0 }] }),
        ))
        .unwrap();

        assert!(matches!(single, InboundEvent::AgentOffer { attempt_token: 3, ref candidates } if candidates.len() == 1));
        assert!(matches!(list, InboundEvent::AgentOffer { attempt_token: 3, ref candidates } if candidates.len() == 2));
    }

    #[test]
    fn missing_fields_and_unknown_kinds() {
        assert_eq!(
            normalize(&frame("typingStart", json!({}))).unwrap_err(),
            PayloadError::Missing {
                kind: "typingStart".into(),
                field: "rideId"
            }
        );
        assert_eq!(
            normalize(&frame("surgePricing", json!({ "x": 1 }))).unwrap_err(),
            PayloadError::UnknownKind("surgePricing".into())
        );
    }
}

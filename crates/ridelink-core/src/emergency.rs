// ── Emergency relay ──
//
// At most one active alert per ride. An alert only becomes active once the
// trigger frame was handed to the socket; it then resolves manually, by a
// remote `emergencyResolved`, or by the safety timeout.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EmergencyConfig;
use crate::connection::ConnectionManager;
use crate::error::{EmergencyError, ValidationError};
use crate::model::{
    EmergencyAlert, EmergencyRequest, EmergencyUpdate, GeoPoint, OutboundEvent, Resolution,
};

const UPDATE_CHANNEL_SIZE: usize = 32;

struct ActiveAlert {
    alert: EmergencyAlert,
    timer: CancellationToken,
    /// Raised by this client, so expiry is reported to the backend.
    local: bool,
}

#[derive(Clone)]
pub struct EmergencyRelay {
    inner: Arc<EmergencyInner>,
}

struct EmergencyInner {
    config: EmergencyConfig,
    connection: ConnectionManager,
    active: DashMap<String, ActiveAlert>,
    updates: broadcast::Sender<EmergencyUpdate>,
    lifecycle: CancellationToken,
}

impl EmergencyRelay {
    pub fn new(config: EmergencyConfig, connection: ConnectionManager) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        Self {
            inner: Arc::new(EmergencyInner {
                config,
                connection,
                active: DashMap::new(),
                updates,
                lifecycle: CancellationToken::new(),
            }),
        }
    }

    /// Raise an alert for a ride.
    ///
    /// Fails with [`ValidationError::DuplicateEmergency`] while an alert for
    /// the same ride is active, and with [`EmergencyError::NotDelivered`]
    /// when the socket is down. Nothing is sent in either case.
    pub fn trigger(&self, request: EmergencyRequest) -> Result<EmergencyAlert, EmergencyError> {
        let ride_id = request.ride_id.trim();
        if ride_id.is_empty() {
            return Err(ValidationError::MissingEngagementId.into());
        }
        let location = request
            .location
            .filter(GeoPoint::is_valid)
            .ok_or(ValidationError::MissingLocation)?;

        let timer = self.inner.lifecycle.child_token();
        let alert = match self.inner.active.entry(ride_id.to_owned()) {
            Entry::Occupied(_) => {
                return Err(ValidationError::DuplicateEmergency {
                    ride_id: ride_id.to_owned(),
                }
                .into());
            }
            Entry::Vacant(slot) => {
                let alert = EmergencyAlert {
                    id: Uuid::new_v4().to_string(),
                    ride_id: ride_id.to_owned(),
                    raised_by: None,
                    location: Some(location),
                    reason: request.reason,
                    raised_at: Utc::now(),
                };
                let sent = self.inner.connection.send(&OutboundEvent::TriggerEmergency {
                    ride_id: alert.ride_id.clone(),
                    alert_id: alert.id.clone(),
                    location,
                    reason: alert.reason.clone(),
                    timestamp: alert.raised_at,
                });
                if !sent {
                    error!(ride = ride_id, "emergency alert could not be delivered");
                    return Err(EmergencyError::not_delivered(ride_id));
                }
                slot.insert(ActiveAlert {
                    alert: alert.clone(),
                    timer: timer.clone(),
                    local: true,
                });
                alert
            }
        };

        warn!(ride = %alert.ride_id, alert = %alert.id, "emergency alert raised");
        self.spawn_auto_resolve(&alert, timer);
        let _ = self.inner.updates.send(EmergencyUpdate::Triggered(alert.clone()));
        Ok(alert)
    }

    /// Resolve the active alert for `ride_id`. Returns `false` if none.
    pub fn resolve(&self, ride_id: &str) -> bool {
        let Some((_, active)) = self.inner.active.remove(ride_id) else {
            return false;
        };
        active.timer.cancel();
        self.inner.connection.send(&OutboundEvent::ResolveEmergency {
            ride_id: ride_id.to_owned(),
            alert_id: active.alert.id.clone(),
            expired: false,
        });
        info!(ride = ride_id, alert = %active.alert.id, "emergency resolved");
        self.publish_resolved(active.alert, Resolution::Manual);
        true
    }

    /// Record an alert raised elsewhere (the other participant, support).
    /// Returns `false` if the ride already has an active alert.
    pub fn record_remote(&self, alert: EmergencyAlert) -> bool {
        let timer = self.inner.lifecycle.child_token();
        match self.inner.active.entry(alert.ride_id.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(ActiveAlert {
                    alert: alert.clone(),
                    timer: timer.clone(),
                    local: false,
                });
            }
        }
        warn!(ride = %alert.ride_id, alert = %alert.id, "emergency alert received");
        self.spawn_auto_resolve(&alert, timer);
        let _ = self.inner.updates.send(EmergencyUpdate::Triggered(alert));
        true
    }

    /// The backend reports the alert resolved. A mismatching `alert_id`
    /// leaves the active alert alone.
    pub fn record_resolved(&self, ride_id: &str, alert_id: Option<&str>) -> bool {
        let removed = self
            .inner
            .active
            .remove_if(ride_id, |_, a| alert_id.is_none_or(|id| id == a.alert.id));
        let Some((_, active)) = removed else {
            return false;
        };
        active.timer.cancel();
        info!(ride = ride_id, alert = %active.alert.id, "emergency resolved remotely");
        self.publish_resolved(active.alert, Resolution::Remote);
        true
    }

    pub fn is_active(&self, ride_id: &str) -> bool {
        self.inner.active.contains_key(ride_id)
    }

    pub fn active_alert(&self, ride_id: &str) -> Option<EmergencyAlert> {
        self.inner.active.get(ride_id).map(|a| a.alert.clone())
    }

    pub fn updates(&self) -> broadcast::Receiver<EmergencyUpdate> {
        self.inner.updates.subscribe()
    }

    /// Cancel every auto-resolve timer. Active alerts are kept.
    pub fn shutdown(&self) {
        self.inner.lifecycle.cancel();
    }

    // ── Internals ────────────────────────────────────────────────────

    fn spawn_auto_resolve(&self, alert: &EmergencyAlert, timer: CancellationToken) {
        let relay = self.clone();
        let ride_id = alert.ride_id.clone();
        let alert_id = alert.id.clone();
        let after = self.inner.config.auto_resolve_after;
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(after) => relay.expire(&ride_id, &alert_id),
            }
        });
    }

    fn expire(&self, ride_id: &str, alert_id: &str) {
        let Some((_, active)) = self
            .inner
            .active
            .remove_if(ride_id, |_, a| a.alert.id == alert_id)
        else {
            return;
        };
        if active.local {
            self.inner.connection.send(&OutboundEvent::ResolveEmergency {
                ride_id: ride_id.to_owned(),
                alert_id: alert_id.to_owned(),
                expired: true,
            });
        }
        warn!(ride = ride_id, alert = alert_id, "emergency alert expired unresolved");
        self.publish_resolved(active.alert, Resolution::Expired);
    }

    fn publish_resolved(&self, alert: EmergencyAlert, resolution: Resolution) {
        let _ = self.inner.updates.send(EmergencyUpdate::Resolved {
            ride_id: alert.ride_id,
            alert_id: alert.id,
            resolution,
        });
    }
}

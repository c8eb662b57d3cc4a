// ── Ride state reconciler ──
//
// Single writer for the tracked engagement. Applies status updates under
// the forward-progress rule so replayed, duplicated and reordered events
// converge on the same state, and turns every accepted transition into a
// `NotificationEvent`.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{
    Engagement, EngagementKind, EngagementStatus, LocationFix, NotificationEvent,
    NotificationKind, NotificationPriority, StatusUpdate,
};
use crate::stream::StateStream;

const NOTIFICATION_CHANNEL_SIZE: usize = 64;

/// Presentation collaborator for notifications (toasts, push, sound).
pub trait NotificationPresenter: Send + Sync + 'static {
    fn present(&self, notification: &NotificationEvent);
}

/// An accepted status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub engagement_id: String,
    /// `None` when the update started tracking a new engagement.
    pub from: Option<EngagementStatus>,
    pub to: EngagementStatus,
}

pub struct RideStateReconciler {
    engagement: watch::Sender<Option<Engagement>>,
    notifications: broadcast::Sender<NotificationEvent>,
    presenter: Option<Arc<dyn NotificationPresenter>>,
}

impl RideStateReconciler {
    pub fn new(presenter: Option<Arc<dyn NotificationPresenter>>) -> Self {
        let (engagement, _) = watch::channel(None);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_SIZE);
        Self {
            engagement,
            notifications,
            presenter,
        }
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Start tracking `engagement` as-is. No notification is produced.
    pub fn track(&self, engagement: Engagement) {
        debug!(engagement = %engagement.id, status = %engagement.status, "tracking engagement");
        self.engagement.send_replace(Some(engagement));
    }

    /// Stop tracking anything.
    pub fn clear(&self) {
        self.engagement.send_if_modified(|slot| slot.take().is_some());
    }

    /// Apply a status update.
    ///
    /// Accepted when it moves the tracked engagement forward, is a terminal
    /// exception, or names a different engagement (which then becomes the
    /// tracked one). Anything else is discarded and `None` returned.
    pub fn apply_status(&self, update: &StatusUpdate) -> Option<Transition> {
        let mut transition = None;

        self.engagement.send_if_modified(|slot| match slot {
            Some(current) if current.id == update.engagement_id => {
                if !current.status.accepts(update.status) {
                    debug!(
                        engagement = %current.id,
                        current = %current.status,
                        incoming = %update.status,
                        "discarding non-progressing status update"
                    );
                    return false;
                }
                let from = current.status;
                current.status = update.status;
                merge_update(current, update);
                transition = Some(Transition {
                    engagement_id: current.id.clone(),
                    from: Some(from),
                    to: update.status,
                });
                true
            }
            _ => {
                let mut fresh = update.snapshot.clone().unwrap_or_else(|| {
                    Engagement::requested(&update.engagement_id, EngagementKind::Ride)
                });
                fresh.id.clone_from(&update.engagement_id);
                fresh.status = update.status;
                merge_update(&mut fresh, update);
                if let Some(previous) = slot.as_ref() {
                    info!(previous = %previous.id, next = %fresh.id, "switching tracked engagement");
                }
                transition = Some(Transition {
                    engagement_id: fresh.id.clone(),
                    from: None,
                    to: fresh.status,
                });
                *slot = Some(fresh);
                true
            }
        });

        if let Some(ref t) = transition {
            self.notify(t);
        }
        transition
    }

    /// Last-write-wins driver location for the tracked engagement.
    pub fn apply_location(&self, engagement_id: &str, fix: LocationFix) -> bool {
        self.engagement.send_if_modified(|slot| match slot {
            Some(current) if current.id == engagement_id => {
                current.driver_location = Some(fix);
                true
            }
            _ => false,
        })
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn current(&self) -> Option<Engagement> {
        self.engagement.borrow().clone()
    }

    pub fn status(&self) -> Option<EngagementStatus> {
        self.engagement.borrow().as_ref().map(|e| e.status)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Engagement>> {
        self.engagement.subscribe()
    }

    pub fn stream(&self) -> StateStream<Option<Engagement>> {
        StateStream::new(self.engagement.subscribe())
    }

    pub fn notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notifications.subscribe()
    }

    fn notify(&self, transition: &Transition) {
        let (kind, title, body) = copy_for(transition.to);
        let notification = NotificationEvent {
            id: Uuid::new_v4(),
            kind,
            priority: priority_for(transition.to),
            engagement_id: transition.engagement_id.clone(),
            status: transition.to,
            title: title.to_owned(),
            body: body.to_owned(),
            created_at: Utc::now(),
        };
        debug!(kind = %notification.kind, engagement = %notification.engagement_id, "notification");

        if let Some(ref presenter) = self.presenter {
            presenter.present(&notification);
        }
        let _ = self.notifications.send(notification);
    }
}

fn merge_update(engagement: &mut Engagement, update: &StatusUpdate) {
    if let Some(ref agent) = update.agent_id {
        engagement.participants.agent_id = Some(agent.clone());
    }
    if let Some(ref snapshot) = update.snapshot {
        if snapshot.participants.requester_id.is_some() {
            engagement
                .participants
                .requester_id
                .clone_from(&snapshot.participants.requester_id);
        }
        engagement.server_version = engagement.server_version.max(snapshot.server_version);
    }
    engagement.updated_at = update.at;
}

// ── Notification tables ──────────────────────────────────────────────

pub fn priority_for(status: EngagementStatus) -> NotificationPriority {
    match status {
        EngagementStatus::Arrived | EngagementStatus::Completed => NotificationPriority::High,
        EngagementStatus::Cancelled => NotificationPriority::Critical,
        EngagementStatus::Requested
        | EngagementStatus::Accepted
        | EngagementStatus::Arriving
        | EngagementStatus::InProgress
        | EngagementStatus::Timeout => NotificationPriority::Normal,
    }
}

fn copy_for(status: EngagementStatus) -> (NotificationKind, &'static str, &'static str) {
    match status {
        EngagementStatus::Requested => (
            NotificationKind::RideRequested,
            "Ride requested",
            "Looking for a driver near you.",
        ),
        EngagementStatus::Accepted => (
            NotificationKind::DriverFound,
            "Driver found",
            "A driver accepted your ride.",
        ),
        EngagementStatus::Arriving => (
            NotificationKind::DriverArriving,
            "Driver on the way",
            "Your driver is heading to the pickup point.",
        ),
        EngagementStatus::Arrived => (
            NotificationKind::DriverArrived,
            "Driver arrived",
            "Your driver is waiting at the pickup point.",
        ),
        EngagementStatus::InProgress => (
            NotificationKind::RideStarted,
            "Ride started",
            "You are on your way.",
        ),
        EngagementStatus::Completed => (
            NotificationKind::RideCompleted,
            "Ride completed",
            "You have arrived. Thanks for riding.",
        ),
        EngagementStatus::Cancelled => (
            NotificationKind::RideCancelled,
            "Ride cancelled",
            "This ride has been cancelled.",
        ),
        EngagementStatus::Timeout => (
            NotificationKind::RideTimedOut,
            "No driver found",
            "No driver accepted the ride in time.",
        ),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::model::GeoPoint;

    use EngagementStatus as S;

    fn drain(rx: &mut broadcast::Receiver<NotificationEvent>) -> Vec<NotificationEvent> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[test]
    fn accepted_transition_emits_driver_found() {
        let reconciler = RideStateReconciler::new(None);
        let mut rx = reconciler.notifications();
        reconciler.track(Engagement::requested("r-1", EngagementKind::Ride));

        let mut update = StatusUpdate::new("r-1", S::Accepted);
        update.agent_id = Some("d-7".into());
        let t = reconciler.apply_status(&update).unwrap();

        assert_eq!(t.from, Some(S::Requested));
        let engagement = reconciler.current().unwrap();
        assert_eq!(engagement.status, S::Accepted);
        assert_eq!(engagement.participants.agent_id.as_deref(), Some("d-7"));

        let n = rx.try_recv().unwrap();
        assert_eq!(n.kind, NotificationKind::DriverFound);
        assert_eq!(n.kind.to_string(), "driver-found");
        assert_eq!(n.priority, NotificationPriority::Normal);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn duplicate_update_is_discarded() {
        let reconciler = RideStateReconciler::new(None);
        let mut rx = reconciler.notifications();
        reconciler.track(Engagement::requested("r-1", EngagementKind::Ride));

        let update = StatusUpdate::new("r-1", S::Arrived);
        assert!(reconciler.apply_status(&update).is_some());
        assert!(reconciler.apply_status(&update).is_none());

        let notes = drain(&mut rx);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].priority, NotificationPriority::High);
    }

    #[test]
    fn stale_progress_is_ignored_but_cancel_wins() {
        let reconciler = RideStateReconciler::new(None);
        reconciler.track(Engagement::requested("r-1", EngagementKind::Ride));

        reconciler.apply_status(&StatusUpdate::new("r-1", S::Arriving));
        assert!(reconciler.apply_status(&StatusUpdate::new("r-1", S::Accepted)).is_none());
        let t = reconciler
            .apply_status(&StatusUpdate::new("r-1", S::Cancelled))
            .unwrap();

        assert_eq!(t.to, S::Cancelled);
        assert_eq!(priority_for(t.to), NotificationPriority::Critical);
        assert!(reconciler.apply_status(&StatusUpdate::new("r-1", S::InProgress)).is_none());
    }

    #[test]
    fn different_engagement_starts_tracking() {
        let reconciler = RideStateReconciler::new(None);
        reconciler.track(Engagement::requested("r-1", EngagementKind::Ride));
        reconciler.apply_status(&StatusUpdate::new("r-1", S::Completed));

        let t = reconciler
            .apply_status(&StatusUpdate::new("r-2", S::Requested))
            .unwrap();

        assert_eq!(t.from, None);
        assert_eq!(reconciler.current().unwrap().id, "r-2");
    }

    #[test]
    fn location_is_last_write_wins_for_tracked_engagement_only() {
        let reconciler = RideStateReconciler::new(None);
        reconciler.track(Engagement::requested("r-1", EngagementKind::Ride));
        let newer = LocationFix {
            point: GeoPoint::new(1.0, 1.0),
            heading: None,
            recorded_at: "2026-05-01T10:00:10Z".parse().unwrap(),
        };
        let older = LocationFix {
            point: GeoPoint::new(2.0, 2.0),
            heading: None,
            recorded_at: "2026-05-01T10:00:00Z".parse().unwrap(),
        };

        assert!(reconciler.apply_location("r-1", newer));
        assert!(reconciler.apply_location("r-1", older));
        assert!(!reconciler.apply_location("r-9", newer));

        assert_eq!(reconciler.current().unwrap().driver_location, Some(older));
    }

    #[test]
    fn presenter_sees_every_notification() {
        struct Recorder(Mutex<Vec<NotificationKind>>);
        impl NotificationPresenter for Recorder {
            fn present(&self, n: &NotificationEvent) {
                self.0.lock().unwrap().push(n.kind);
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let presenter: Arc<dyn NotificationPresenter> = recorder.clone();
        let reconciler = RideStateReconciler::new(Some(presenter));
        reconciler.track(Engagement::requested("r-1", EngagementKind::Ride));
        for status in [S::Accepted, S::Arriving, S::Arrived, S::InProgress, S::Completed] {
            reconciler.apply_status(&StatusUpdate::new("r-1", status));
        }

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                NotificationKind::DriverFound,
                NotificationKind::DriverArriving,
                NotificationKind::DriverArrived,
                NotificationKind::RideStarted,
                NotificationKind::RideCompleted,
            ]
        );
    }

    // ── Ordering properties ──────────────────────────────────────────

    fn progress_status() -> impl Strategy<Value = EngagementStatus> {
        prop::sample::select(vec![
            S::Requested,
            S::Accepted,
            S::Arriving,
            S::Arrived,
            S::InProgress,
            S::Completed,
        ])
    }

    fn live_status() -> impl Strategy<Value = EngagementStatus> {
        prop::sample::select(vec![
            S::Requested,
            S::Accepted,
            S::Arriving,
            S::Arrived,
            S::InProgress,
        ])
    }

    fn replay(statuses: &[EngagementStatus]) -> (EngagementStatus, usize) {
        let reconciler = RideStateReconciler::new(None);
        let mut rx = reconciler.notifications();
        for status in statuses {
            reconciler.apply_status(&StatusUpdate::new("r-1", *status));
        }
        (reconciler.status().unwrap(), drain(&mut rx).len())
    }

    proptest! {
        #[test]
        fn any_delivery_order_converges_on_max_progress(
            statuses in prop::collection::vec(progress_status(), 1..12)
        ) {
            let (status, _) = replay(&statuses);
            let max = statuses.iter().copied().max_by_key(|s| s.rank()).unwrap();
            prop_assert_eq!(status, max);
        }

        #[test]
        fn terminal_exception_wins_regardless_of_position(
            mut statuses in prop::collection::vec(live_status(), 0..10),
            exception in prop_oneof![Just(S::Cancelled), Just(S::Timeout)],
            position in any::<prop::sample::Index>(),
        ) {
            let at = position.index(statuses.len() + 1);
            statuses.insert(at, exception);
            let (status, _) = replay(&statuses);
            prop_assert_eq!(status, exception);
        }

        #[test]
        fn replaying_every_update_twice_adds_no_notifications(
            statuses in prop::collection::vec(progress_status(), 1..12)
        ) {
            let doubled: Vec<_> = statuses.iter().flat_map(|s| [*s, *s]).collect();
            let (once_status, once_count) = replay(&statuses);
            let (twice_status, twice_count) = replay(&doubled);
            prop_assert_eq!(once_status, twice_status);
            prop_assert_eq!(once_count, twice_count);
        }
    }
}

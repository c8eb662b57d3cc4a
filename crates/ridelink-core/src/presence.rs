// ── Presence channels ──
//
// Tracks which ride rooms this client belongs to. Membership is local
// intent: it survives disconnects and is replayed by `rejoin_all()` once a
// session is back, while join/leave frames only go out when connected.

use dashmap::DashSet;
use tracing::debug;

use crate::connection::ConnectionManager;
use crate::model::OutboundEvent;

pub struct PresenceChannels {
    connection: ConnectionManager,
    rooms: DashSet<String>,
}

impl PresenceChannels {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            rooms: DashSet::new(),
        }
    }

    /// Join the room for `ride_id`. Returns `false` if already a member.
    pub fn join(&self, ride_id: &str) -> bool {
        if !self.rooms.insert(ride_id.to_owned()) {
            return false;
        }
        let sent = self.connection.send(&OutboundEvent::JoinRideRoom {
            ride_id: ride_id.to_owned(),
        });
        debug!(ride = ride_id, sent, "joined ride room");
        true
    }

    /// Leave the room for `ride_id`. Returns `false` if not a member.
    pub fn leave(&self, ride_id: &str) -> bool {
        if self.rooms.remove(ride_id).is_none() {
            return false;
        }
        let sent = self.connection.send(&OutboundEvent::LeaveRideRoom {
            ride_id: ride_id.to_owned(),
        });
        debug!(ride = ride_id, sent, "left ride room");
        true
    }

    pub fn is_joined(&self, ride_id: &str) -> bool {
        self.rooms.contains(ride_id)
    }

    /// Current memberships, sorted.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.iter().map(|r| r.key().clone()).collect();
        rooms.sort();
        rooms
    }

    /// Re-announce every membership on a fresh session.
    pub fn rejoin_all(&self) -> usize {
        let rooms = self.rooms();
        let mut sent = 0;
        for ride_id in rooms {
            if self.connection.send(&OutboundEvent::JoinRideRoom { ride_id }) {
                sent += 1;
            }
        }
        debug!(rooms = sent, "rejoined ride rooms");
        sent
    }

    /// Forget every membership without telling the backend.
    pub fn clear(&self) {
        self.rooms.clear();
    }
}

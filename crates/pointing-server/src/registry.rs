//! Meeting registry: maps meeting IDs to their live room tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pointing_core::MeetingId;
use tracing::{debug, instrument};

use crate::errors::RoomError;
use crate::room::{RoomHandle, RoomPolicy, spawn_room};
use crate::websocket::connection::ClientConnection;

/// Rooms tried before giving up on a join.
const JOIN_ATTEMPTS: usize = 16;

/// Owns every live meeting.
///
/// Creation is atomic per meeting ID: concurrent first joiners all receive
/// the same room. A room removes itself from the map when it retires.
pub struct SessionRegistry {
    rooms: Arc<DashMap<MeetingId, RoomHandle>>,
    next_generation: AtomicU64,
    policy: RoomPolicy,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(policy: RoomPolicy) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
            policy,
        }
    }

    /// Policy applied to new rooms.
    pub fn policy(&self) -> RoomPolicy {
        self.policy
    }

    /// The room for `meeting_id`, starting one if none is live.
    pub fn get_or_create(&self, meeting_id: &MeetingId) -> RoomHandle {
        match self.rooms.entry(meeting_id.clone()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                debug!(meeting_id = %meeting_id, "replacing retired room");
                let handle = self.spawn(meeting_id);
                let _ = entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(meeting_id);
                let _ = entry.insert(handle.clone());
                handle
            }
        }
    }

    fn spawn(&self, meeting_id: &MeetingId) -> RoomHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        debug!(meeting_id = %meeting_id, generation, "starting room");
        spawn_room(
            meeting_id.clone(),
            generation,
            self.policy,
            Arc::clone(&self.rooms),
        )
    }

    /// The live room for `meeting_id`, if any.
    pub fn get(&self, meeting_id: &MeetingId) -> Option<RoomHandle> {
        self.rooms
            .get(meeting_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    /// Whether `meeting_id` has a live room.
    pub fn contains(&self, meeting_id: &MeetingId) -> bool {
        self.get(meeting_id).is_some()
    }

    /// Number of meetings with a live room.
    pub fn meeting_count(&self) -> usize {
        self.rooms.iter().filter(|entry| !entry.value().is_closed()).count()
    }

    /// IDs of all meetings with a live room.
    pub fn meeting_ids(&self) -> Vec<MeetingId> {
        self.rooms
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// End `meeting_id`: members receive `meetingEnded` and are
    /// disconnected. Returns `false` if no such meeting was live.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn remove(&self, meeting_id: &MeetingId) -> bool {
        match self.get(meeting_id) {
            Some(room) => room.close().await.is_ok(),
            None => false,
        }
    }

    /// Join `connection` to the meeting named in its context, retrying when
    /// the room retires between lookup and join.
    pub async fn join(&self, connection: Arc<ClientConnection>) -> Result<RoomHandle, RoomError> {
        let meeting_id = connection.context().meeting_id.clone();
        for attempt in 1..=JOIN_ATTEMPTS {
            let room = self.get_or_create(&meeting_id);
            match room.join(Arc::clone(&connection)).await {
                Ok(()) => return Ok(room),
                Err(e) => {
                    debug!(meeting_id = %meeting_id, attempt, error = %e, "room retired during join, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }
        Err(RoomError::JoinFailed {
            meeting_id,
            attempts: JOIN_ATTEMPTS,
        })
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RoomPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::tests::context;
    use tokio::sync::mpsc;

    fn connection(meeting: &str, user: &str) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(64);
        (Arc::new(ClientConnection::new(context(meeting, user), tx)), rx)
    }

    #[tokio::test]
    async fn get_or_create_reuses_live_room() {
        let registry = SessionRegistry::default();
        let id = MeetingId::from("M1");
        let first = registry.get_or_create(&id);
        let second = registry.get_or_create(&id);
        assert_eq!(first.generation(), second.generation());
        assert_eq!(registry.meeting_count(), 1);
        assert!(registry.contains(&id));
    }

    #[tokio::test]
    async fn meetings_are_independent() {
        let registry = SessionRegistry::default();
        let (a, _rx_a) = connection("M1", "a");
        let (b, _rx_b) = connection("M2", "b");
        let room_a = registry.join(a).await.unwrap();
        let room_b = registry.join(b).await.unwrap();
        assert_ne!(room_a.generation(), room_b.generation());
        assert_eq!(registry.meeting_count(), 2);

        let mut ids = registry.meeting_ids();
        ids.sort();
        assert_eq!(ids, vec![MeetingId::from("M1"), MeetingId::from("M2")]);
        assert_eq!(room_a.snapshot().await.unwrap().roster.len(), 1);
        assert_eq!(room_b.snapshot().await.unwrap().roster.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_joins_share_one_room() {
        let registry = Arc::new(SessionRegistry::default());
        let mut receivers = Vec::new();
        let mut tasks = Vec::new();
        for i in 0..20 {
            let (conn, rx) = connection("M1", &format!("user{i}"));
            receivers.push(rx);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move { registry.join(conn).await }));
        }
        let mut generations = Vec::new();
        for task in tasks {
            generations.push(task.await.unwrap().unwrap().generation());
        }
        generations.dedup();
        assert_eq!(generations.len(), 1);

        let room = registry.get(&MeetingId::from("M1")).unwrap();
        assert_eq!(room.snapshot().await.unwrap().roster.len(), 20);
    }

    #[tokio::test]
    async fn last_leave_removes_meeting() {
        let registry = SessionRegistry::default();
        let (a, _rx) = connection("M1", "a");
        let id = a.id.clone();
        let room = registry.join(a).await.unwrap();
        room.leave(&id).await.unwrap();

        assert!(!registry.contains(&MeetingId::from("M1")));
        assert_eq!(registry.meeting_count(), 0);
    }

    #[tokio::test]
    async fn rejoin_after_retirement_gets_fresh_state() {
        let registry = SessionRegistry::default();
        let (a, _rx) = connection("M1", "a");
        let id = a.id.clone();
        let first = registry.join(a).await.unwrap();
        first.leave(&id).await.unwrap();

        let (b, _rx_b) = connection("M1", "b");
        let second = registry.join(b).await.unwrap();
        assert!(second.generation() > first.generation());
        let snap = second.snapshot().await.unwrap();
        assert_eq!(snap.roster.len(), 1);
        assert_eq!(snap.roster[0].user_id.as_str(), "b");
    }

    #[tokio::test]
    async fn remove_ends_meeting() {
        let registry = SessionRegistry::default();
        let (a, mut rx) = connection("M1", "a");
        let _room = registry.join(Arc::clone(&a)).await.unwrap();
        let _ = rx.recv().await;

        assert!(registry.remove(&MeetingId::from("M1")).await);
        assert!(!registry.contains(&MeetingId::from("M1")));
        assert!(a.is_closing());
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("meetingEnded"));
    }

    #[tokio::test]
    async fn remove_unknown_meeting_is_false() {
        let registry = SessionRegistry::default();
        assert!(!registry.remove(&MeetingId::from("nope")).await);
    }

    #[tokio::test]
    async fn closed_handle_is_replaced() {
        let registry = SessionRegistry::default();
        let id = MeetingId::from("M1");
        let stale = registry.get_or_create(&id);
        stale.close().await.unwrap();
        // Simulate a stale entry that survived retirement
        let _ = registry.rooms.insert(id.clone(), stale.clone());
        while !stale.is_closed() {
            tokio::task::yield_now().await;
        }

        assert!(registry.get(&id).is_none());
        let fresh = registry.get_or_create(&id);
        assert_ne!(fresh.generation(), stale.generation());
        assert!(!fresh.is_closed());
    }

    #[tokio::test]
    async fn closed_handles_are_not_counted() {
        let registry = SessionRegistry::default();
        let live = MeetingId::from("live");
        let stale_id = MeetingId::from("stale");
        let _ = registry.get_or_create(&live);
        let stale = registry.get_or_create(&stale_id);
        stale.close().await.unwrap();
        let _ = registry.rooms.insert(stale_id.clone(), stale.clone());
        while !stale.is_closed() {
            tokio::task::yield_now().await;
        }

        assert_eq!(registry.rooms.len(), 2);
        assert_eq!(registry.meeting_count(), 1);
        assert_eq!(registry.meeting_ids(), vec![live]);
        assert!(!registry.contains(&stale_id));
    }
}

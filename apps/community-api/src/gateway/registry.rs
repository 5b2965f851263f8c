//! Presence & room registry: live connections, room membership and typing
//! state, all process-local.
//!
//! Backed by `DashMap`s with shard-level locking. Maps are always locked in
//! the order connections → users → rooms → typing, and a guard on one map is
//! never held while calling back into the same map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::models::user::UserProfile;

use super::events::ServerEvent;

/// Work queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Dispatch(Arc<ServerEvent>),
    HeartbeatAck(u64),
    Close { code: u16, reason: &'static str },
}

struct ConnectionEntry {
    user: UserProfile,
    authenticated_at: DateTime<Utc>,
    rooms: HashSet<String>,
    tx: mpsc::Sender<Outbound>,
}

#[derive(Debug, Clone)]
struct TypingEntry {
    connection_id: String,
    user_name: String,
    since: Instant,
}

/// Result of registering a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    /// No other live connection existed for this user.
    pub first_connection: bool,
}

/// Everything a disconnect has to clean up after, returned exactly once.
#[derive(Debug)]
pub struct Unregistered {
    pub user: UserProfile,
    pub authenticated_at: DateTime<Utc>,
    pub rooms: Vec<String>,
    /// The user has no live connections left.
    pub last_connection: bool,
    /// Communities where this connection's typing indicator was cleared.
    pub typing_stopped: Vec<String>,
}

/// A typing indicator removed by the expiry sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTyping {
    pub community_id: String,
    pub user_id: String,
    pub user_name: String,
}

#[derive(Default)]
pub struct RoomRegistry {
    connections: DashMap<String, ConnectionEntry>,
    /// user id → live connection ids.
    users: DashMap<String, HashSet<String>>,
    /// community id → joined connection ids.
    rooms: DashMap<String, HashSet<String>>,
    /// community id → user id → typing entry.
    typing: DashMap<String, HashMap<String, TypingEntry>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        connection_id: &str,
        user: UserProfile,
        tx: mpsc::Sender<Outbound>,
    ) -> Registered {
        let user_id = user.id.clone();
        self.connections.insert(
            connection_id.to_string(),
            ConnectionEntry {
                user,
                authenticated_at: Utc::now(),
                rooms: HashSet::new(),
                tx,
            },
        );
        let mut live = self.users.entry(user_id).or_default();
        live.insert(connection_id.to_string());
        Registered {
            first_connection: live.len() == 1,
        }
    }

    /// Remove a connection and everything hanging off it. Returns `None` if
    /// it was already removed, so cleanup runs once per connection.
    pub fn unregister(&self, connection_id: &str) -> Option<Unregistered> {
        let (_, entry) = self.connections.remove(connection_id)?;

        let last_connection = match self.users.entry(entry.user.id.clone()) {
            Entry::Occupied(mut live) => {
                live.get_mut().remove(connection_id);
                if live.get().is_empty() {
                    live.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => true,
        };

        let mut rooms: Vec<String> = entry.rooms.into_iter().collect();
        rooms.sort();
        for community_id in &rooms {
            self.remove_from_room(community_id, connection_id);
        }

        let mut typing_stopped = Vec::new();
        for mut typing in self.typing.iter_mut() {
            let owned = typing
                .get(&entry.user.id)
                .is_some_and(|t| t.connection_id == connection_id);
            if owned {
                typing.remove(&entry.user.id);
                typing_stopped.push(typing.key().clone());
            }
        }
        self.typing.retain(|_, users| !users.is_empty());
        typing_stopped.sort();

        Some(Unregistered {
            user: entry.user,
            authenticated_at: entry.authenticated_at,
            rooms,
            last_connection,
            typing_stopped,
        })
    }

    /// Subscribe a connection to a room. Returns `false` if the connection
    /// is gone or already joined.
    pub fn join(&self, connection_id: &str, community_id: &str) -> bool {
        let Some(mut entry) = self.connections.get_mut(connection_id) else {
            return false;
        };
        let newly = entry.rooms.insert(community_id.to_string());
        self.rooms
            .entry(community_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        newly
    }

    /// Unsubscribe a connection from a room. Returns whether it was joined.
    pub fn leave(&self, connection_id: &str, community_id: &str) -> bool {
        let Some(mut entry) = self.connections.get_mut(connection_id) else {
            return false;
        };
        let was_joined = entry.rooms.remove(community_id);
        self.remove_from_room(community_id, connection_id);
        was_joined
    }

    fn remove_from_room(&self, community_id: &str, connection_id: &str) {
        if let Entry::Occupied(mut room) = self.rooms.entry(community_id.to_string()) {
            room.get_mut().remove(connection_id);
            if room.get().is_empty() {
                room.remove();
            }
        }
    }

    pub fn is_joined(&self, connection_id: &str, community_id: &str) -> bool {
        self.connections
            .get(connection_id)
            .is_some_and(|e| e.rooms.contains(community_id))
    }

    /// Whether any of the user's live connections is joined to the room.
    pub fn user_in_room(&self, user_id: &str, community_id: &str) -> bool {
        self.user_connections(user_id)
            .iter()
            .any(|connection_id| self.is_joined(connection_id, community_id))
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_user(&self, connection_id: &str) -> Option<UserProfile> {
        self.connections.get(connection_id).map(|e| e.user.clone())
    }

    /// Rooms joined by one connection, sorted.
    pub fn connection_rooms(&self, connection_id: &str) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .connections
            .get(connection_id)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Rooms joined by any of the user's connections, sorted.
    pub fn user_rooms(&self, user_id: &str) -> Vec<String> {
        let mut rooms = HashSet::new();
        for connection_id in self.user_connections(user_id) {
            if let Some(entry) = self.connections.get(&connection_id) {
                rooms.extend(entry.rooms.iter().cloned());
            }
        }
        let mut rooms: Vec<String> = rooms.into_iter().collect();
        rooms.sort();
        rooms
    }

    pub fn user_connections(&self, user_id: &str) -> Vec<String> {
        self.users
            .get(user_id)
            .map(|live| live.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_connections(&self, community_id: &str) -> Vec<String> {
        self.rooms
            .get(community_id)
            .map(|room| room.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Distinct online user ids in a room, sorted.
    pub fn room_users(&self, community_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .room_connections(community_id)
            .iter()
            .filter_map(|id| self.connections.get(id).map(|e| e.user.id.clone()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        users.sort();
        users
    }

    /// Outbound queue of a live connection.
    pub fn sender(&self, connection_id: &str) -> Option<mpsc::Sender<Outbound>> {
        self.connections.get(connection_id).map(|e| e.tx.clone())
    }

    /// Mark `user_id` as typing in a room from `connection_id`. Returns
    /// `true` only when the user was not already typing there.
    pub fn start_typing(
        &self,
        community_id: &str,
        user: &UserProfile,
        connection_id: &str,
    ) -> bool {
        let entry = TypingEntry {
            connection_id: connection_id.to_string(),
            user_name: user.name.clone(),
            since: Instant::now(),
        };
        self.typing
            .entry(community_id.to_string())
            .or_default()
            .insert(user.id.clone(), entry)
            .is_none()
    }

    /// Returns `true` if the user was typing in the room.
    pub fn stop_typing(&self, community_id: &str, user_id: &str) -> bool {
        match self.typing.entry(community_id.to_string()) {
            Entry::Occupied(mut room) => {
                let was_typing = room.get_mut().remove(user_id).is_some();
                if room.get().is_empty() {
                    room.remove();
                }
                was_typing
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Like [`Self::stop_typing`], but only clears an indicator that
    /// `connection_id` started.
    pub fn stop_typing_from(&self, community_id: &str, user_id: &str, connection_id: &str) -> bool {
        match self.typing.entry(community_id.to_string()) {
            Entry::Occupied(mut room) => {
                let owned = room
                    .get()
                    .get(user_id)
                    .is_some_and(|t| t.connection_id == connection_id);
                if owned {
                    room.get_mut().remove(user_id);
                    if room.get().is_empty() {
                        room.remove();
                    }
                }
                owned
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Users currently typing in a room, sorted.
    pub fn typing_users(&self, community_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .typing
            .get(community_id)
            .map(|room| room.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Drop typing entries older than `max_age`.
    pub fn expire_typing(&self, max_age: Duration) -> Vec<ExpiredTyping> {
        let now = Instant::now();
        let mut expired = Vec::new();
        for mut room in self.typing.iter_mut() {
            let community_id = room.key().clone();
            room.retain(|user_id, entry| {
                let stale = now.duration_since(entry.since) >= max_age;
                if stale {
                    expired.push(ExpiredTyping {
                        community_id: community_id.clone(),
                        user_id: user_id.clone(),
                        user_name: entry.user_name.clone(),
                    });
                }
                !stale
            });
        }
        self.typing.retain(|_, users| !users.is_empty());
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserProfile {
        UserProfile {
            id: id.into(),
            name: format!("name-{id}"),
            email: None,
            role: "volunteer".into(),
        }
    }

    fn channel() -> mpsc::Sender<Outbound> {
        mpsc::channel(8).0
    }

    #[test]
    fn first_and_last_connection_are_reported() {
        let registry = RoomRegistry::new();
        assert!(registry.register("conn_1", user("usr_a"), channel()).first_connection);
        assert!(!registry.register("conn_2", user("usr_a"), channel()).first_connection);

        let gone = registry.unregister("conn_1").unwrap();
        assert!(!gone.last_connection);
        assert!(registry.is_online("usr_a"));

        let gone = registry.unregister("conn_2").unwrap();
        assert!(gone.last_connection);
        assert!(!registry.is_online("usr_a"));
    }

    #[test]
    fn unregister_runs_once() {
        let registry = RoomRegistry::new();
        registry.register("conn_1", user("usr_a"), channel());
        assert!(registry.unregister("conn_1").is_some());
        assert!(registry.unregister("conn_1").is_none());
    }

    #[test]
    fn unregister_clears_rooms_and_owned_typing() {
        let registry = RoomRegistry::new();
        let a = user("usr_a");
        registry.register("conn_1", a.clone(), channel());
        registry.register("conn_2", user("usr_b"), channel());
        for room in ["com_1", "com_2"] {
            registry.join("conn_1", room);
            registry.join("conn_2", room);
        }
        registry.start_typing("com_2", &a, "conn_1");

        let gone = registry.unregister("conn_1").unwrap();
        assert_eq!(gone.rooms, ["com_1", "com_2"]);
        assert_eq!(gone.typing_stopped, ["com_2"]);
        assert_eq!(registry.room_users("com_1"), ["usr_b"]);
        assert!(registry.typing_users("com_2").is_empty());
    }

    #[test]
    fn typing_from_another_device_survives_disconnect() {
        let registry = RoomRegistry::new();
        let a = user("usr_a");
        registry.register("conn_phone", a.clone(), channel());
        registry.register("conn_laptop", a.clone(), channel());
        registry.start_typing("com_1", &a, "conn_laptop");

        let gone = registry.unregister("conn_phone").unwrap();
        assert!(gone.typing_stopped.is_empty());
        assert_eq!(registry.typing_users("com_1"), ["usr_a"]);
    }

    #[test]
    fn stop_typing_from_ignores_other_devices() {
        let registry = RoomRegistry::new();
        let a = user("usr_a");
        registry.start_typing("com_1", &a, "conn_laptop");

        assert!(!registry.stop_typing_from("com_1", "usr_a", "conn_phone"));
        assert_eq!(registry.typing_users("com_1"), ["usr_a"]);
        assert!(registry.stop_typing_from("com_1", "usr_a", "conn_laptop"));
        assert!(registry.typing_users("com_1").is_empty());
    }

    #[test]
    fn user_in_room_counts_any_device() {
        let registry = RoomRegistry::new();
        registry.register("conn_phone", user("usr_a"), channel());
        registry.register("conn_laptop", user("usr_a"), channel());
        registry.join("conn_phone", "com_1");
        registry.join("conn_laptop", "com_1");

        registry.leave("conn_phone", "com_1");
        assert!(registry.user_in_room("usr_a", "com_1"));
        registry.leave("conn_laptop", "com_1");
        assert!(!registry.user_in_room("usr_a", "com_1"));
    }

    #[test]
    fn join_and_leave_report_transitions() {
        let registry = RoomRegistry::new();
        registry.register("conn_1", user("usr_a"), channel());
        assert!(registry.join("conn_1", "com_1"));
        assert!(!registry.join("conn_1", "com_1"));
        assert!(registry.is_joined("conn_1", "com_1"));
        assert!(registry.leave("conn_1", "com_1"));
        assert!(!registry.leave("conn_1", "com_1"));
        assert!(registry.room_connections("com_1").is_empty());
    }

    #[test]
    fn join_requires_a_live_connection() {
        let registry = RoomRegistry::new();
        assert!(!registry.join("conn_ghost", "com_1"));
        assert!(registry.room_connections("com_1").is_empty());
    }

    #[test]
    fn room_users_are_distinct() {
        let registry = RoomRegistry::new();
        registry.register("conn_1", user("usr_a"), channel());
        registry.register("conn_2", user("usr_a"), channel());
        registry.join("conn_1", "com_1");
        registry.join("conn_2", "com_1");
        assert_eq!(registry.room_users("com_1"), ["usr_a"]);
        assert_eq!(registry.room_connections("com_1").len(), 2);
    }

    #[test]
    fn typing_transitions_only_once() {
        let registry = RoomRegistry::new();
        let a = user("usr_a");
        assert!(registry.start_typing("com_1", &a, "conn_1"));
        assert!(!registry.start_typing("com_1", &a, "conn_1"));
        assert!(registry.stop_typing("com_1", "usr_a"));
        assert!(!registry.stop_typing("com_1", "usr_a"));
    }

    #[test]
    fn stale_typing_expires() {
        let registry = RoomRegistry::new();
        let a = user("usr_a");
        registry.start_typing("com_1", &a, "conn_1");

        assert!(registry.expire_typing(Duration::from_secs(60)).is_empty());
        let expired = registry.expire_typing(Duration::ZERO);
        assert_eq!(
            expired,
            [ExpiredTyping {
                community_id: "com_1".into(),
                user_id: "usr_a".into(),
                user_name: "name-usr_a".into(),
            }]
        );
        assert!(registry.typing_users("com_1").is_empty());
    }

    #[test]
    fn user_rooms_unions_devices() {
        let registry = RoomRegistry::new();
        registry.register("conn_1", user("usr_a"), channel());
        registry.register("conn_2", user("usr_a"), channel());
        registry.join("conn_1", "com_1");
        registry.join("conn_2", "com_2");
        assert_eq!(registry.user_rooms("usr_a"), ["com_1", "com_2"]);
        assert_eq!(registry.connection_rooms("conn_2"), ["com_2"]);
    }
}

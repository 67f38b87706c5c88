//! Shared application state: store handle, room registry, presence, notifier

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::db::Database;
use crate::events::{Effect, ServerEvent};
use crate::notify::Notifier;
use crate::presence::PresenceMap;
use crate::rooms::RoomKey;

/// Broadcast channel capacity per room.
/// If clients can't keep up, oldest events are dropped.
const CHANNEL_CAPACITY: usize = 100;

/// Room key → broadcast channel sender mapping.
///
/// DashMap gives lock-free concurrent access across connections; each room
/// has its own broadcast channel for fan-out.
pub type RoomsMap = DashMap<RoomKey, broadcast::Sender<String>>;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub rooms: Arc<RoomsMap>,
    pub presence: PresenceMap,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self {
            db,
            rooms: Arc::new(DashMap::new()),
            presence: PresenceMap::new(),
            notifier,
        }
    }

    /// Get or create the broadcast channel for a room
    pub fn room(&self, key: &RoomKey) -> broadcast::Sender<String> {
        self.rooms
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel::<String>(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Serialize an event and send it to a room's subscribers.
    /// Having no subscribers is not an error.
    pub fn broadcast(&self, room: &RoomKey, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => {
                let _ = self.room(room).send(payload);
            }
            Err(err) => {
                error!(room = %room, error = %err, "failed to serialize event");
            }
        }
    }

    /// Dispatch handler effects: broadcasts go out synchronously, the
    /// best-effort notification channels run detached so they can never
    /// block or fail the operation that produced them.
    pub fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Broadcast { room, event } => self.broadcast(&room, &event),
                Effect::Push {
                    push_token,
                    title,
                    body,
                } => {
                    let notifier = self.notifier.clone();
                    tokio::spawn(async move {
                        notifier.push(&push_token, &title, &body).await;
                    });
                }
                Effect::ModerationAlert {
                    conversation_id,
                    reported_by,
                    reason,
                } => {
                    let notifier = self.notifier.clone();
                    tokio::spawn(async move {
                        notifier
                            .moderation_alert(&conversation_id, &reported_by, &reason)
                            .await;
                    });
                }
            }
        }
    }

    /// Drop a room once its last subscriber detaches, so abandoned rooms
    /// don't accumulate.
    pub fn remove_room_if_empty(&self, key: &RoomKey) {
        if let Some(entry) = self.rooms.get(key) {
            if entry.receiver_count() == 0 {
                drop(entry);
                self.rooms.remove(key);
                info!(room = %key, "room removed (no remaining subscribers)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;
    use vendora_core::Role;

    async fn setup_state() -> AppState {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        AppState::new(Database::new(pool), Notifier::disabled())
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let state = setup_state().await;
        let room = RoomKey::identity(Role::User, "u1");

        let mut rx_a = state.room(&room).subscribe();
        let mut rx_b = state.room(&room).subscribe();

        state.broadcast(
            &room,
            &ServerEvent::Error {
                code: "x".to_string(),
                message: "y".to_string(),
            },
        );

        assert!(rx_a.try_recv().unwrap().contains("\"type\":\"error\""));
        assert!(rx_b.try_recv().unwrap().contains("\"type\":\"error\""));
    }

    #[tokio::test]
    async fn test_room_garbage_collection() {
        let state = setup_state().await;
        let room = RoomKey::conversation("v1_u1");

        let rx = state.room(&room).subscribe();
        state.remove_room_if_empty(&room);
        assert!(state.rooms.contains_key(&room));

        drop(rx);
        state.remove_room_if_empty(&room);
        assert!(!state.rooms.contains_key(&room));
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::trace;
use uuid::Uuid;

use weldiwin_types::events::GatewayEvent;

/// Tracks live connections and the room groups they subscribed to.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct Connection {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    /// Account behind the socket, `None` for unauthenticated connections.
    user_id: Option<Uuid>,
}

#[derive(Default)]
struct DispatcherInner {
    connections: RwLock<HashMap<Uuid, Connection>>,

    /// Room groups: room_id -> subscribed conn_ids
    rooms: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Returns (conn_id, receiver).
    pub async fn register(
        &self,
        user_id: Option<Uuid>,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(conn_id, Connection { tx, user_id });
        (conn_id, rx)
    }

    /// Drop a connection and remove it from every room group.
    /// Returns the rooms it was subscribed to.
    pub async fn unregister(&self, conn_id: Uuid) -> Vec<Uuid> {
        self.inner.connections.write().await.remove(&conn_id);

        let mut rooms = self.inner.rooms.write().await;
        let mut left = Vec::new();
        rooms.retain(|room_id, members| {
            if members.remove(&conn_id) {
                left.push(*room_id);
            }
            !members.is_empty()
        });
        left
    }

    /// Subscribe a connection to a room group. Returns false if it already was.
    pub async fn join(&self, room_id: Uuid, conn_id: Uuid) -> bool {
        self.inner
            .rooms
            .write()
            .await
            .entry(room_id)
            .or_default()
            .insert(conn_id)
    }

    pub async fn leave(&self, room_id: Uuid, conn_id: Uuid) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        let Some(members) = rooms.get_mut(&room_id) else {
            return false;
        };
        let removed = members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(&room_id);
        }
        removed
    }

    /// Fan an event out to a room group, optionally skipping one connection.
    /// Never waits on a subscriber; closed channels are skipped. Returns the
    /// number of connections the event was queued for.
    pub async fn broadcast_to_room(
        &self,
        room_id: Uuid,
        event: GatewayEvent,
        except: Option<Uuid>,
    ) -> usize {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(&room_id) else {
            return 0;
        };
        let connections = self.inner.connections.read().await;

        let mut delivered = 0;
        for conn_id in members {
            if Some(*conn_id) == except {
                continue;
            }
            if let Some(conn) = connections.get(conn_id) {
                if conn.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    trace!("Connection {} gone, skipping", conn_id);
                }
            }
        }
        delivered
    }

    /// Send an event to a single connection.
    pub async fn send_to(&self, conn_id: Uuid, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(conn) = connections.get(&conn_id) {
            let _ = conn.tx.send(event);
        }
    }

    /// Unsubscribes every connection of `user_id` from `room_id`, or from
    /// all rooms when `room_id` is `None`. Returns the (room, conn) pairs
    /// that were removed.
    pub async fn remove_user(&self, user_id: Uuid, room_id: Option<Uuid>) -> Vec<(Uuid, Uuid)> {
        let owned: HashSet<Uuid> = self
            .inner
            .connections
            .read()
            .await
            .iter()
            .filter(|(_, conn)| conn.user_id == Some(user_id))
            .map(|(conn_id, _)| *conn_id)
            .collect();
        if owned.is_empty() {
            return Vec::new();
        }

        let mut rooms = self.inner.rooms.write().await;
        let mut removed = Vec::new();
        rooms.retain(|room, members| {
            if room_id.is_none_or(|target| target == *room) {
                members.retain(|conn_id| {
                    let hit = owned.contains(conn_id);
                    if hit {
                        removed.push((*room, *conn_id));
                    }
                    !hit
                });
            }
            !members.is_empty()
        });
        removed
    }

    /// Dissolves a room group. Returns the connections that were in it.
    pub async fn close_room(&self, room_id: Uuid) -> Vec<Uuid> {
        self.inner
            .rooms
            .write()
            .await
            .remove(&room_id)
            .map(|members| members.into_iter().collect())
            .unwrap_or_default()
    }

    pub async fn room_size(&self, room_id: Uuid) -> usize {
        self.inner
            .rooms
            .read()
            .await
            .get(&room_id)
            .map_or(0, HashSet::len)
    }
}

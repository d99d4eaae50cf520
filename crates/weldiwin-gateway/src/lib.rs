pub mod connection;
pub mod dispatcher;
pub mod session;

use std::collections::HashSet;

use tracing::{debug, info};
use uuid::Uuid;

use weldiwin_core::Services;
use weldiwin_types::ServiceResult;
use weldiwin_types::events::{GatewayEvent, PresenceState};
use weldiwin_types::models::{Actor, Message, Room};

use crate::dispatcher::Dispatcher;

/// Everything a realtime connection needs, cloned into each socket task.
#[derive(Clone)]
pub struct Gateway {
    pub dispatcher: Dispatcher,
    pub services: Services,
    /// When set, `joinRoom` runs the same room-access check as the REST
    /// surface. When clear, any authenticated connection may subscribe to
    /// any room id.
    pub enforce_membership: bool,
}

impl Gateway {
    pub fn new(services: Services, enforce_membership: bool) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            services,
            enforce_membership,
        }
    }

    /// Pushes a message appended outside the socket (REST) to the room's
    /// subscribers.
    pub async fn publish(&self, message: &Message) {
        let event = if message.message_type.is_signal() {
            GatewayEvent::Signal(message.clone())
        } else {
            GatewayEvent::NewMessage(message.clone())
        };
        let delivered = self
            .dispatcher
            .broadcast_to_room(message.room_id, event, None)
            .await;
        debug!("Published message {} to {} connections", message.id, delivered);
    }

    /// REST removal of an invited parent. With membership enforced, the
    /// removed parent's sockets are also dropped from the room group so no
    /// further room traffic reaches them.
    pub async fn remove_invited_parent(
        &self,
        actor: &Actor,
        room_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Room> {
        let room = self
            .services
            .rooms
            .remove_invited_parent(actor, room_id, user_id)
            .await?;
        if self.enforce_membership {
            self.evict(user_id, Some(room_id)).await;
        }
        Ok(room)
    }

    /// Deletes a child and dissolves the groups of the rooms that went with it.
    pub async fn delete_child(&self, actor: &Actor, child_id: Uuid) -> ServiceResult<()> {
        let rooms = self.services.children.delete(actor, child_id).await?;
        for room_id in rooms {
            for conn_id in self.dispatcher.close_room(room_id).await {
                let presence = GatewayEvent::Presence {
                    user_id: child_id,
                    state: PresenceState::Left,
                    room_id,
                };
                self.dispatcher.send_to(conn_id, presence).await;
            }
            info!("Room {} closed after child {} was deleted", room_id, child_id);
        }
        Ok(())
    }

    /// Deletes a user account and takes its sockets out of every room.
    pub async fn delete_user(&self, actor: &Actor, user_id: Uuid) -> ServiceResult<()> {
        self.services.accounts.delete_user(actor, user_id).await?;
        self.evict(user_id, None).await;
        Ok(())
    }

    /// Unsubscribes a user's connections and announces the departure both to
    /// the evicted sockets and to whoever remains in each room.
    async fn evict(&self, user_id: Uuid, room_id: Option<Uuid>) {
        let removed = self.dispatcher.remove_user(user_id, room_id).await;
        let mut rooms = HashSet::new();
        for (room_id, conn_id) in removed {
            let presence = GatewayEvent::Presence {
                user_id,
                state: PresenceState::Left,
                room_id,
            };
            self.dispatcher.send_to(conn_id, presence).await;
            rooms.insert(room_id);
        }
        for room_id in rooms {
            let presence = GatewayEvent::Presence {
                user_id,
                state: PresenceState::Left,
                room_id,
            };
            self.dispatcher.broadcast_to_room(room_id, presence, None).await;
            info!("Evicted {} from room {}", user_id, room_id);
        }
    }
}

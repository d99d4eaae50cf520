//! Room registry: one room per (main parent, child) pair.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use weldiwin_db::is_unique_violation;
use weldiwin_db::models::RoomRow;
use weldiwin_types::access;
use weldiwin_types::models::{AccountSummary, Actor, Role, Room};
use weldiwin_types::{ServiceError, ServiceResult};

use crate::store::Store;

#[derive(Clone)]
pub struct Rooms {
    store: Store,
}

impl Rooms {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Finds or creates the room for `child_id`. `parent_id` must be the
    /// child's main or a linked parent; the room itself is always keyed by
    /// the main parent. Safe under concurrent first access: the losing insert
    /// hits the unique (parent, child) key and re-reads the winner's row.
    pub async fn get_or_create(&self, parent_id: Uuid, child_id: Uuid) -> ServiceResult<RoomRow> {
        let child = self
            .store
            .read("load child", move |db| db.get_child(child_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("Child not found"))?;
        if !child.access_ref().is_parent(parent_id) {
            return Err(ServiceError::forbidden("Parent is not linked to this child"));
        }
        let main_parent = child.main_parent;

        if let Some(room) = self.find_pair(main_parent, child_id).await? {
            return self.ensure_active(room).await;
        }

        let room_id = Uuid::new_v4();
        let created = self
            .store
            .write("create room", move |db| {
                match db.insert_room(room_id, main_parent, child_id, Utc::now()) {
                    Ok(()) => Ok(true),
                    Err(e) if is_unique_violation(&e) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await?;

        if created {
            info!("Room {} created for child {}", room_id, child_id);
        } else {
            debug!("Room for child {} created concurrently, re-reading", child_id);
        }

        let room = self
            .find_pair(main_parent, child_id)
            .await?
            .ok_or_else(|| ServiceError::Internal("room vanished after creation".into()))?;
        self.ensure_active(room).await
    }

    async fn find_pair(&self, parent_id: Uuid, child_id: Uuid) -> ServiceResult<Option<RoomRow>> {
        self.store
            .read("find room", move |db| db.find_room_by_pair(parent_id, child_id))
            .await
    }

    async fn ensure_active(&self, mut room: RoomRow) -> ServiceResult<RoomRow> {
        if !room.is_active {
            let id = room.id;
            self.store
                .write("reactivate room", move |db| db.set_room_active(id, true))
                .await?;
            info!("Room {} reactivated", id);
            room.is_active = true;
        }
        Ok(room)
    }

    /// Loads a room without any access check.
    pub async fn load(&self, room_id: Uuid) -> ServiceResult<RoomRow> {
        self.store
            .read("load room", move |db| db.get_room(room_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("Room not found"))
    }

    pub async fn get(&self, actor: &Actor, room_id: Uuid) -> ServiceResult<Room> {
        let room = self.load(room_id).await?;
        access::read_room(actor, &room.access_ref())?;
        self.resolve(room).await
    }

    pub async fn list_for_parent(&self, actor: &Actor, parent_id: Uuid) -> ServiceResult<Vec<Room>> {
        access::list_for_parent(actor, parent_id)?;
        let rows = self
            .store
            .read("list rooms", move |db| db.list_rooms_for_parent(parent_id))
            .await?;
        let mut rooms = Vec::with_capacity(rows.len());
        for row in rows {
            rooms.push(self.resolve(row).await?);
        }
        Ok(rooms)
    }

    /// A child's own room, provisioned on first use.
    pub async fn for_child(&self, actor: &Actor, child_id: Uuid) -> ServiceResult<Room> {
        access::child_room(actor, child_id)?;
        let child = self
            .store
            .read("load child", move |db| db.get_child(child_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("Child not found"))?;

        let existing = self
            .store
            .read("find child room", move |db| db.find_active_room_for_child(child_id))
            .await?;
        let room = match existing {
            Some(room) => room,
            None => self.get_or_create(child.main_parent, child_id).await?,
        };
        self.resolve(room).await
    }

    pub async fn invite_parent(
        &self,
        actor: &Actor,
        room_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Room> {
        let room = self.load(room_id).await?;
        access::manage_invites(actor, &room.access_ref())?;

        let invitee = self
            .store
            .read("load invitee", move |db| db.get_user(user_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("Invited parent not found"))?;
        if invitee.role != Role::Parent {
            return Err(ServiceError::forbidden("Can only invite users with PARENT role"));
        }
        if room.parent_id == user_id {
            return Err(ServiceError::forbidden("Cannot invite the main parent"));
        }

        self.store
            .write("invite parent", move |db| db.add_invite(room_id, user_id))
            .await
            .map_err(|e| match e {
                ServiceError::Conflict(_) => {
                    ServiceError::conflict("Parent is already invited to this room")
                }
                other => other,
            })?;
        info!("Parent {} invited to room {} by {}", user_id, room_id, actor.id);

        self.resolve(self.load(room_id).await?).await
    }

    /// Removing someone who was never invited leaves the room unchanged.
    pub async fn remove_invited_parent(
        &self,
        actor: &Actor,
        room_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<Room> {
        let room = self.load(room_id).await?;
        access::manage_invites(actor, &room.access_ref())?;

        let removed = self
            .store
            .write("remove invite", move |db| db.remove_invite(room_id, user_id))
            .await?;
        if removed {
            info!("Parent {} removed from room {} by {}", user_id, room_id, actor.id);
        }

        self.resolve(self.load(room_id).await?).await
    }

    /// Replaces ids with name/avatar summaries.
    pub async fn resolve(&self, room: RoomRow) -> ServiceResult<Room> {
        let mut user_ids = vec![room.parent_id];
        user_ids.extend(room.invited_parents.iter().copied());
        let child_id = room.child_id;

        let (users, child) = self
            .store
            .read("resolve room", move |db| {
                Ok((db.user_summaries(&user_ids)?, db.child_summary(child_id)?))
            })
            .await?;

        let summary = |id: Uuid| {
            users
                .iter()
                .find(|s| s.id == id)
                .cloned()
                .unwrap_or_else(|| unknown(id))
        };

        Ok(Room {
            id: room.id,
            parent: summary(room.parent_id),
            child: child.unwrap_or_else(|| unknown(room.child_id)),
            invited_parents: room.invited_parents.iter().map(|id| summary(*id)).collect(),
            is_active: room.is_active,
            last_message: room.last_message,
            created_at: room.created_at,
        })
    }
}

fn unknown(id: Uuid) -> AccountSummary {
    AccountSummary {
        id,
        name: String::new(),
        avatar_url: None,
    }
}

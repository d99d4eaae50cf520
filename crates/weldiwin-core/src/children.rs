use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use weldiwin_db::models::{ChildPatch, ChildRow, NewChild};
use weldiwin_types::access;
use weldiwin_types::models::{Actor, Attributes, Child};
use weldiwin_types::{ServiceError, ServiceResult};

use crate::accounts::Accounts;
use crate::rooms::Rooms;
use crate::store::Store;

/// Fields accepted when creating a child.
#[derive(Debug, Default)]
pub struct ChildDraft {
    pub name: String,
    /// Honored for admins only; parents always create for themselves.
    pub parent_id: Option<Uuid>,
    pub avatar_url: Option<String>,
    pub device_info: Option<Value>,
    pub qr_code: Option<String>,
    pub attributes: Attributes,
}

#[derive(Clone)]
pub struct Children {
    store: Store,
    accounts: Accounts,
    rooms: Rooms,
}

impl Children {
    pub fn new(store: Store, accounts: Accounts, rooms: Rooms) -> Self {
        Self {
            store,
            accounts,
            rooms,
        }
    }

    pub async fn create(&self, actor: &Actor, draft: ChildDraft) -> ServiceResult<Child> {
        let name = draft.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::invalid("name is required"));
        }

        let parent_id = match (actor.is_admin(), draft.parent_id) {
            (true, Some(id)) => id,
            (true, None) => return Err(ServiceError::invalid("parentId is required")),
            (false, Some(id)) if id != actor.id => {
                return Err(ServiceError::forbidden(
                    "parents can only create children for themselves",
                ));
            }
            (false, _) => actor.id,
        };
        access::create_child(actor, parent_id)?;
        self.accounts.require_parent(parent_id).await?;

        let id = Uuid::new_v4();
        let child = NewChild {
            id,
            name,
            main_parent: parent_id,
            avatar_url: draft.avatar_url,
            device_info: draft.device_info,
            qr_code: draft.qr_code.unwrap_or_else(generate_qr_code),
            attributes: draft.attributes,
        };
        self.store
            .write("create child", move |db| db.insert_child(&child, Utc::now()))
            .await
            .map_err(|e| match e {
                ServiceError::Conflict(_) => ServiceError::conflict("QR code already in use"),
                other => other,
            })?;
        info!("Child {} created for parent {}", id, parent_id);

        self.rooms.get_or_create(parent_id, id).await?;
        Ok(self.require(id).await?.to_child())
    }

    /// Admins list every child, parents their main-or-linked children, a
    /// child only itself.
    pub async fn list(&self, actor: &Actor) -> ServiceResult<Vec<Child>> {
        let rows = if actor.is_admin() {
            self.store.read("list children", |db| db.list_children()).await?
        } else if actor.is_child() {
            vec![self.require(actor.id).await?]
        } else if actor.is_parent() {
            let parent_id = actor.id;
            self.store
                .read("list children", move |db| db.list_children_for_parent(parent_id))
                .await?
        } else {
            return Err(ServiceError::forbidden("not allowed to list children"));
        };
        Ok(rows.iter().map(ChildRow::to_child).collect())
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> ServiceResult<Child> {
        let row = self.require(id).await?;
        access::read_child(actor, &row.access_ref())?;
        Ok(row.to_child())
    }

    pub async fn profile(&self, actor: &Actor) -> ServiceResult<Child> {
        if !actor.is_child() {
            return Err(ServiceError::forbidden("This endpoint is only for children"));
        }
        Ok(self.require(actor.id).await?.to_child())
    }

    pub async fn list_for_parent(&self, actor: &Actor, parent_id: Uuid) -> ServiceResult<Vec<Child>> {
        access::list_for_parent(actor, parent_id)?;
        let rows = self
            .store
            .read("list children", move |db| db.list_children_for_parent(parent_id))
            .await?;
        Ok(rows.iter().map(ChildRow::to_child).collect())
    }

    pub async fn update(&self, actor: &Actor, id: Uuid, patch: ChildPatch) -> ServiceResult<Child> {
        let row = self.require(id).await?;
        access::update_child(actor, &row.access_ref())?;
        if let Some(name) = patch.name.as_deref() {
            if name.trim().is_empty() {
                return Err(ServiceError::invalid("name cannot be empty"));
            }
        }
        self.store
            .write("update child", move |db| db.update_child(id, &patch))
            .await?;
        Ok(self.require(id).await?.to_child())
    }

    pub async fn update_location(
        &self,
        actor: &Actor,
        id: Uuid,
        lat: f64,
        lng: f64,
    ) -> ServiceResult<Child> {
        let row = self.require(id).await?;
        access::update_child(actor, &row.access_ref())?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            warn!("Rejected location ({}, {}) for child {}", lat, lng, id);
            return Err(ServiceError::invalid("lat/lng out of range"));
        }
        self.store
            .write("update location", move |db| db.update_location(id, lat, lng, Utc::now()))
            .await?;
        Ok(self.require(id).await?.to_child())
    }

    /// Takes the child's room, invitations and messages with it. Returns the
    /// ids of the rooms that were removed.
    pub async fn delete(&self, actor: &Actor, id: Uuid) -> ServiceResult<Vec<Uuid>> {
        let row = self.require(id).await?;
        access::delete_child(actor, &row.access_ref())?;
        let rooms = self
            .store
            .write("delete child", move |db| {
                let rooms = db.room_ids_for_child(id)?;
                db.delete_child(id)?;
                Ok(rooms)
            })
            .await?;
        info!("Child {} deleted by {}", id, actor.id);
        Ok(rooms)
    }

    pub async fn link_parent(&self, actor: &Actor, id: Uuid, parent_id: Uuid) -> ServiceResult<Child> {
        let row = self.require(id).await?;
        access::manage_child_parents(actor, &row.access_ref())?;
        if row.main_parent == parent_id {
            return Err(ServiceError::invalid("user is already the main parent"));
        }
        self.accounts.require_parent(parent_id).await?;

        let linked = self
            .store
            .write("link parent", move |db| db.link_parent(id, parent_id))
            .await?;
        if !linked {
            return Err(ServiceError::conflict("Parent is already linked to this child"));
        }
        info!("Parent {} linked to child {}", parent_id, id);
        Ok(self.require(id).await?.to_child())
    }

    /// Unlinking someone who is not linked is a no-op.
    pub async fn unlink_parent(
        &self,
        actor: &Actor,
        id: Uuid,
        parent_id: Uuid,
    ) -> ServiceResult<Child> {
        let row = self.require(id).await?;
        access::manage_child_parents(actor, &row.access_ref())?;
        self.store
            .write("unlink parent", move |db| db.unlink_parent(id, parent_id))
            .await?;
        Ok(self.require(id).await?.to_child())
    }

    /// QR login lookup. Unknown codes resolve to `None`.
    pub async fn find_by_qr(&self, qr_code: &str) -> ServiceResult<Option<ChildRow>> {
        let qr_code = qr_code.trim().to_string();
        self.store
            .read("find child by qr", move |db| db.find_child_by_qr(&qr_code))
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> ServiceResult<Option<ChildRow>> {
        self.store.read("load child", move |db| db.get_child(id)).await
    }

    async fn require(&self, id: Uuid) -> ServiceResult<ChildRow> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Child not found"))
    }
}

/// 16 random bytes, hex encoded.
fn generate_qr_code() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{family, services};
    use weldiwin_types::models::Role;

    fn draft(name: &str) -> ChildDraft {
        ChildDraft {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creating_a_child_provisions_its_room() {
        let svc = services();
        let fam = family(&svc).await;
        let parent = Actor::user(fam.parent, Role::Parent);

        let child = svc.children.create(&parent, draft("Sam")).await.unwrap();
        assert_eq!(child.main_parent, fam.parent);
        assert_eq!(child.qr_code.as_ref().map(|q| q.len()), Some(32));

        let count = svc
            .store
            .read("count", move |db| db.count_rooms_for_child(child.id))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn parent_cannot_create_for_someone_else() {
        let svc = services();
        let fam = family(&svc).await;
        let parent = Actor::user(fam.parent, Role::Parent);
        let mut d = draft("Sam");
        d.parent_id = Some(fam.other_parent);
        let err = svc.children.create(&parent, d).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn child_sees_only_itself() {
        let svc = services();
        let fam = family(&svc).await;
        let sibling = svc
            .children
            .create(&Actor::user(fam.parent, Role::Parent), draft("Sibling"))
            .await
            .unwrap();
        let me = Actor::child(fam.child, fam.parent);

        assert_eq!(svc.children.get(&me, fam.child).await.unwrap().id, fam.child);
        let err = svc.children.get(&me, sibling.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let listed = svc.children.list(&me).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(svc.children.profile(&me).await.unwrap().id, fam.child);
    }

    #[tokio::test]
    async fn linked_parent_can_update_but_not_delete() {
        let svc = services();
        let fam = family(&svc).await;
        let owner = Actor::user(fam.parent, Role::Parent);
        let linked = Actor::user(fam.other_parent, Role::Parent);

        svc.children.link_parent(&owner, fam.child, fam.other_parent).await.unwrap();
        let err = svc
            .children
            .link_parent(&owner, fam.child, fam.other_parent)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let patch = ChildPatch {
            is_online: Some(true),
            ..Default::default()
        };
        assert!(svc.children.update(&linked, fam.child, patch).await.unwrap().is_online);

        let err = svc.children.delete(&linked, fam.child).await.unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = svc
            .children
            .link_parent(&linked, fam.child, fam.stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn location_is_range_checked() {
        let svc = services();
        let fam = family(&svc).await;
        let me = Actor::child(fam.child, fam.parent);
        let err = svc
            .children
            .update_location(&me, fam.child, 123.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let child = svc.children.update_location(&me, fam.child, 36.8, 10.18).await.unwrap();
        assert_eq!(child.location.unwrap().lat, 36.8);
    }
}

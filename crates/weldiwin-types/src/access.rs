//! Access control evaluator.
//!
//! Every check is a pure function of an [`Actor`] and a borrowed view of the
//! target record. Rules apply in a fixed precedence, first match wins:
//!
//! 1. An ADMIN user may do anything to accounts and rooms.
//! 2. A child may only see or update itself and use its own room.
//! 3. A PARENT user is limited to itself, the children it is main or linked
//!    parent of, and the rooms it owns or was invited to.
//! 4. Anything else is denied.
//!
//! Callers run these checks before touching the store; a denial is always
//! [`ServiceError::Forbidden`].

use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{Actor, Sender, SenderKind};

/// The parts of a child record that access decisions look at.
#[derive(Debug, Clone, Copy)]
pub struct ChildRef<'a> {
    pub id: Uuid,
    pub main_parent: Uuid,
    pub linked_parents: &'a [Uuid],
}

impl ChildRef<'_> {
    pub fn is_parent(&self, user_id: Uuid) -> bool {
        self.main_parent == user_id || self.linked_parents.contains(&user_id)
    }
}

/// The parts of a room record that access decisions look at.
#[derive(Debug, Clone, Copy)]
pub struct RoomRef<'a> {
    pub parent: Uuid,
    pub child: Uuid,
    pub invited_parents: &'a [Uuid],
}

impl RoomRef<'_> {
    pub fn is_member_parent(&self, user_id: Uuid) -> bool {
        self.parent == user_id || self.invited_parents.contains(&user_id)
    }
}

fn deny(reason: &str) -> ServiceResult<()> {
    Err(ServiceError::forbidden(reason))
}

// -- Users --

pub fn create_user(actor: &Actor) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    deny("only an admin can create users")
}

pub fn read_user(actor: &Actor, user_id: Uuid) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_child() {
        return deny("children cannot access user accounts");
    }
    if actor.is_parent() && actor.id == user_id {
        return Ok(());
    }
    deny("you can only access your own profile")
}

pub fn update_user(actor: &Actor, user_id: Uuid) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_child() {
        return deny("children cannot update user accounts");
    }
    if actor.is_parent() && actor.id == user_id {
        return Ok(());
    }
    deny("you can only update your own profile")
}

pub fn delete_user(actor: &Actor, user_id: Uuid) -> ServiceResult<()> {
    if !actor.is_admin() {
        return deny("only an admin can delete users");
    }
    if actor.id == user_id {
        return deny("you cannot delete your own account");
    }
    Ok(())
}

// -- Children --

/// `parent_id` is the user the new child will belong to.
pub fn create_child(actor: &Actor, parent_id: Uuid) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_child() {
        return deny("children cannot create other children");
    }
    if actor.is_parent() && actor.id == parent_id {
        return Ok(());
    }
    deny("parents can only create children for themselves")
}

pub fn read_child(actor: &Actor, child: &ChildRef<'_>) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_child() {
        if actor.id == child.id {
            return Ok(());
        }
        return deny("you can only access your own profile");
    }
    if actor.is_parent() && child.is_parent(actor.id) {
        return Ok(());
    }
    deny("you can only access your own children")
}

pub fn update_child(actor: &Actor, child: &ChildRef<'_>) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_child() {
        if actor.id == child.id {
            return Ok(());
        }
        return deny("you can only update your own profile");
    }
    if actor.is_parent() && child.is_parent(actor.id) {
        return Ok(());
    }
    deny("you can only update your own children")
}

pub fn delete_child(actor: &Actor, child: &ChildRef<'_>) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_child() {
        return deny("children cannot delete accounts");
    }
    if actor.is_parent() && child.main_parent == actor.id {
        return Ok(());
    }
    deny("only the main parent can delete a child")
}

/// Linking or unlinking secondary parents of a child.
pub fn manage_child_parents(actor: &Actor, child: &ChildRef<'_>) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_parent() && child.main_parent == actor.id {
        return Ok(());
    }
    deny("only the main parent can link other parents")
}

/// Listing the children (or rooms) that belong to `parent_id`.
pub fn list_for_parent(actor: &Actor, parent_id: Uuid) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_parent() && actor.id == parent_id {
        return Ok(());
    }
    deny("you can only view your own children and rooms")
}

// -- Rooms --

pub fn read_room(actor: &Actor, room: &RoomRef<'_>) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_child() {
        if room.child == actor.id {
            return Ok(());
        }
        return deny("you can only access your own room");
    }
    if actor.is_parent() && room.is_member_parent(actor.id) {
        return Ok(());
    }
    deny("you can only access rooms with your children or rooms you are invited to")
}

/// Posting into a room uses the same membership rule as reading it.
pub fn post_to_room(actor: &Actor, room: &RoomRef<'_>) -> ServiceResult<()> {
    read_room(actor, room)
}

/// Inviting or removing secondary parents. Invited parents cannot invite.
pub fn manage_invites(actor: &Actor, room: &RoomRef<'_>) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_parent() && room.parent == actor.id {
        return Ok(());
    }
    deny("only the main parent can manage invited parents")
}

/// Fetching a child's own room through the child-facing lookup.
pub fn child_room(actor: &Actor, child_id: Uuid) -> ServiceResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if actor.is_child() && actor.id == child_id {
        return Ok(());
    }
    deny("only the child itself can fetch its room this way")
}

/// The declared sender must be a current participant of the room,
/// independent of who is making the call.
pub fn legitimate_sender(room: &RoomRef<'_>, sender: &Sender) -> ServiceResult<()> {
    match sender.kind {
        SenderKind::ChildSide if sender.id == room.child => Ok(()),
        SenderKind::ChildSide => deny("senderId must match the child in this room"),
        SenderKind::ParentSide if room.is_member_parent(sender.id) => Ok(()),
        SenderKind::ParentSide => {
            deny("senderId must be the main parent or an invited parent in this room")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    struct Family {
        admin: Actor,
        main: Actor,
        linked: Actor,
        invited: Actor,
        stranger: Actor,
        child: Actor,
        other_child: Actor,
        linked_ids: Vec<Uuid>,
        invited_ids: Vec<Uuid>,
    }

    impl Family {
        fn new() -> Self {
            let main = Actor::user(Uuid::new_v4(), Role::Parent);
            let linked = Actor::user(Uuid::new_v4(), Role::Parent);
            let invited = Actor::user(Uuid::new_v4(), Role::Parent);
            Self {
                admin: Actor::user(Uuid::new_v4(), Role::Admin),
                child: Actor::child(Uuid::new_v4(), main.id),
                other_child: Actor::child(Uuid::new_v4(), main.id),
                stranger: Actor::user(Uuid::new_v4(), Role::Parent),
                linked_ids: vec![linked.id],
                invited_ids: vec![invited.id],
                main,
                linked,
                invited,
            }
        }

        fn child_ref(&self) -> ChildRef<'_> {
            ChildRef {
                id: self.child.id,
                main_parent: self.main.id,
                linked_parents: &self.linked_ids,
            }
        }

        fn room_ref(&self) -> RoomRef<'_> {
            RoomRef {
                parent: self.main.id,
                child: self.child.id,
                invited_parents: &self.invited_ids,
            }
        }
    }

    fn forbidden(result: ServiceResult<()>) -> bool {
        matches!(result, Err(ServiceError::Forbidden(_)))
    }

    #[test]
    fn admin_may_do_everything() {
        let f = Family::new();
        assert!(create_user(&f.admin).is_ok());
        assert!(read_user(&f.admin, f.main.id).is_ok());
        assert!(create_child(&f.admin, f.main.id).is_ok());
        assert!(delete_child(&f.admin, &f.child_ref()).is_ok());
        assert!(read_room(&f.admin, &f.room_ref()).is_ok());
        assert!(manage_invites(&f.admin, &f.room_ref()).is_ok());
    }

    #[test]
    fn admin_cannot_delete_itself() {
        let f = Family::new();
        assert!(forbidden(delete_user(&f.admin, f.admin.id)));
        assert!(delete_user(&f.admin, f.main.id).is_ok());
    }

    #[test]
    fn child_sees_only_itself() {
        let f = Family::new();
        let sibling = ChildRef {
            id: f.other_child.id,
            main_parent: f.main.id,
            linked_parents: &[],
        };
        assert!(read_child(&f.child, &f.child_ref()).is_ok());
        assert!(update_child(&f.child, &f.child_ref()).is_ok());
        assert!(forbidden(read_child(&f.child, &sibling)));
        assert!(forbidden(update_child(&f.child, &sibling)));
        assert!(forbidden(delete_child(&f.child, &f.child_ref())));
        assert!(forbidden(create_child(&f.child, f.main.id)));
        assert!(forbidden(read_user(&f.child, f.main.id)));
    }

    #[test]
    fn parent_child_rules() {
        let f = Family::new();
        assert!(create_child(&f.main, f.main.id).is_ok());
        assert!(forbidden(create_child(&f.main, f.stranger.id)));

        assert!(read_child(&f.linked, &f.child_ref()).is_ok());
        assert!(update_child(&f.linked, &f.child_ref()).is_ok());
        assert!(forbidden(delete_child(&f.linked, &f.child_ref())));
        assert!(delete_child(&f.main, &f.child_ref()).is_ok());

        assert!(forbidden(read_child(&f.stranger, &f.child_ref())));
        assert!(forbidden(manage_child_parents(&f.linked, &f.child_ref())));
        assert!(manage_child_parents(&f.main, &f.child_ref()).is_ok());
    }

    #[test]
    fn parent_user_rules() {
        let f = Family::new();
        assert!(read_user(&f.main, f.main.id).is_ok());
        assert!(forbidden(read_user(&f.main, f.linked.id)));
        assert!(forbidden(update_user(&f.main, f.linked.id)));
        assert!(forbidden(create_user(&f.main)));
        assert!(forbidden(delete_user(&f.main, f.linked.id)));
    }

    #[test]
    fn room_membership_rules() {
        let f = Family::new();
        let room = f.room_ref();
        assert!(read_room(&f.main, &room).is_ok());
        assert!(read_room(&f.invited, &room).is_ok());
        assert!(read_room(&f.child, &room).is_ok());
        assert!(forbidden(read_room(&f.other_child, &room)));
        assert!(forbidden(read_room(&f.stranger, &room)));

        assert!(manage_invites(&f.main, &room).is_ok());
        assert!(forbidden(manage_invites(&f.invited, &room)));
        assert!(forbidden(manage_invites(&f.child, &room)));
    }

    #[test]
    fn sender_must_be_a_participant() {
        let f = Family::new();
        let room = f.room_ref();
        let ok = [
            Sender { kind: SenderKind::ParentSide, id: f.main.id },
            Sender { kind: SenderKind::ParentSide, id: f.invited.id },
            Sender { kind: SenderKind::ChildSide, id: f.child.id },
        ];
        for sender in ok {
            assert!(legitimate_sender(&room, &sender).is_ok());
        }

        let bad = [
            Sender { kind: SenderKind::ParentSide, id: f.stranger.id },
            Sender { kind: SenderKind::ChildSide, id: f.other_child.id },
            // Right id, wrong side.
            Sender { kind: SenderKind::ChildSide, id: f.main.id },
            Sender { kind: SenderKind::ParentSide, id: f.child.id },
        ];
        for sender in bad {
            assert!(forbidden(legitimate_sender(&room, &sender)));
        }
    }

    #[test]
    fn listing_is_self_or_admin() {
        let f = Family::new();
        assert!(list_for_parent(&f.main, f.main.id).is_ok());
        assert!(list_for_parent(&f.admin, f.main.id).is_ok());
        assert!(forbidden(list_for_parent(&f.stranger, f.main.id)));
        assert!(forbidden(list_for_parent(&f.child, f.main.id)));
        assert!(child_room(&f.child, f.child.id).is_ok());
        assert!(forbidden(child_room(&f.main, f.child.id)));
    }
}

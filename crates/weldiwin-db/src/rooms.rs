use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use weldiwin_types::models::{LastMessage, Sender};

use crate::Database;
use crate::models::{
    OptionalExt, RoomRow, opt_enum_col, opt_time_col, opt_uuid_col, time_col, ts, uuid_col,
};

const ROOM_COLUMNS: &str = "id, parent_id, child_id, is_active, last_text, last_type, \
     last_sender_model, last_sender_id, last_at, created_at";

impl Database {
    /// Plain insert. A second room for the same (parent, child) pair fails
    /// with a unique violation, which callers treat as "already created".
    pub fn insert_room(
        &self,
        id: Uuid,
        parent_id: Uuid,
        child_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, parent_id, child_id, is_active, created_at) \
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![
                    id.to_string(),
                    parent_id.to_string(),
                    child_id.to_string(),
                    ts(&created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_room(&self, id: Uuid) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, "id = ?1", params![id.to_string()]))
    }

    pub fn find_room_by_pair(&self, parent_id: Uuid, child_id: Uuid) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            query_room(
                conn,
                "parent_id = ?1 AND child_id = ?2",
                params![parent_id.to_string(), child_id.to_string()],
            )
        })
    }

    pub fn find_active_room_for_child(&self, child_id: Uuid) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            query_room(
                conn,
                "child_id = ?1 AND is_active = 1 ORDER BY created_at LIMIT 1",
                params![child_id.to_string()],
            )
        })
    }

    pub fn set_room_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE rooms SET is_active = ?2 WHERE id = ?1",
                params![id.to_string(), active],
            )?;
            Ok(())
        })
    }

    /// Active rooms the user owns or is invited to. Rooms with recent traffic
    /// come first; never-messaged rooms follow, newest first.
    pub fn list_rooms_for_parent(&self, user_id: Uuid) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {ROOM_COLUMNS} FROM rooms \
                 WHERE is_active = 1 \
                   AND (parent_id = ?1 \
                        OR id IN (SELECT room_id FROM room_invites WHERE user_id = ?1)) \
                 ORDER BY last_at IS NULL, last_at DESC, created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map([user_id.to_string()], room_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            for room in &mut rows {
                room.invited_parents = query_invited(conn, room.id)?;
            }
            Ok(rows)
        })
    }

    /// Atomic add. Inviting someone twice fails with a primary-key violation.
    pub fn add_invite(&self, room_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO room_invites (room_id, user_id) VALUES (?1, ?2)",
                [room_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Atomic remove. Returns false when the user was not invited.
    pub fn remove_invite(&self, room_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM room_invites WHERE room_id = ?1 AND user_id = ?2",
                [room_id.to_string(), user_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn room_ids_for_child(&self, child_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM rooms WHERE child_id = ?1")?;
            let ids = stmt
                .query_map([child_id.to_string()], |row| uuid_col(row, 0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn count_rooms_for_child(&self, child_id: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM rooms WHERE child_id = ?1",
                [child_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn query_room<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Option<RoomRow>> {
    let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE {filter}");
    let room = conn.query_row(&sql, params, room_from_row).optional()?;
    match room {
        Some(mut room) => {
            room.invited_parents = query_invited(conn, room.id)?;
            Ok(Some(room))
        }
        None => Ok(None),
    }
}

fn query_invited(conn: &Connection, room_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM room_invites WHERE room_id = ?1 ORDER BY rowid")?;
    let ids = stmt
        .query_map([room_id.to_string()], |row| uuid_col(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    let last_text: Option<String> = row.get(4)?;
    let last_type = opt_enum_col(row, 5)?;
    let last_kind = opt_enum_col(row, 6)?;
    let last_sender = opt_uuid_col(row, 7)?;
    let last_at = opt_time_col(row, 8)?;

    let last_message = match (last_text, last_type, last_kind, last_sender, last_at) {
        (Some(text), Some(message_type), Some(kind), Some(id), Some(created_at)) => {
            Some(LastMessage {
                text,
                message_type,
                sender: Sender { kind, id },
                created_at,
            })
        }
        _ => None,
    };

    Ok(RoomRow {
        id: uuid_col(row, 0)?,
        parent_id: uuid_col(row, 1)?,
        child_id: uuid_col(row, 2)?,
        invited_parents: Vec::new(),
        is_active: row.get(3)?,
        last_message,
        created_at: time_col(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::children::tests::seed_child;
    use crate::users::tests::seed_user;
    use weldiwin_types::models::Role;

    #[test]
    fn second_room_for_pair_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let parent = seed_user(&db, "P", Role::Parent);
        let child = seed_child(&db, "C", parent);

        db.insert_room(Uuid::new_v4(), parent, child, Utc::now()).unwrap();
        let err = db
            .insert_room(Uuid::new_v4(), parent, child, Utc::now())
            .unwrap_err();
        assert!(crate::is_unique_violation(&err));
        assert_eq!(db.count_rooms_for_child(child).unwrap(), 1);
    }

    #[test]
    fn invites_are_a_set() {
        let db = Database::open_in_memory().unwrap();
        let parent = seed_user(&db, "P", Role::Parent);
        let guest = seed_user(&db, "G", Role::Parent);
        let child = seed_child(&db, "C", parent);
        let room = Uuid::new_v4();
        db.insert_room(room, parent, child, Utc::now()).unwrap();

        db.add_invite(room, guest).unwrap();
        let err = db.add_invite(room, guest).unwrap_err();
        assert!(crate::is_unique_violation(&err));

        let row = db.get_room(room).unwrap().unwrap();
        assert_eq!(row.invited_parents, vec![guest]);
        assert_eq!(db.list_rooms_for_parent(guest).unwrap().len(), 1);

        assert!(db.remove_invite(room, guest).unwrap());
        assert!(!db.remove_invite(room, guest).unwrap());
        assert!(db.list_rooms_for_parent(guest).unwrap().is_empty());
    }

    #[test]
    fn inactive_rooms_are_hidden_from_listing() {
        let db = Database::open_in_memory().unwrap();
        let parent = seed_user(&db, "P", Role::Parent);
        let child = seed_child(&db, "C", parent);
        let room = Uuid::new_v4();
        db.insert_room(room, parent, child, Utc::now()).unwrap();

        db.set_room_active(room, false).unwrap();
        assert!(db.list_rooms_for_parent(parent).unwrap().is_empty());
        assert!(db.find_active_room_for_child(child).unwrap().is_none());

        db.set_room_active(room, true).unwrap();
        assert_eq!(db.find_active_room_for_child(child).unwrap().unwrap().id, room);
    }

    #[test]
    fn deleting_child_removes_its_room() {
        let db = Database::open_in_memory().unwrap();
        let parent = seed_user(&db, "P", Role::Parent);
        let child = seed_child(&db, "C", parent);
        let room = Uuid::new_v4();
        db.insert_room(room, parent, child, Utc::now()).unwrap();

        db.delete_child(child).unwrap();
        assert!(db.get_room(room).unwrap().is_none());
    }
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use weldiwin_types::models::{AccountSummary, Location};

use crate::Database;
use crate::models::{
    ChildPatch, ChildRow, NewChild, OptionalExt, enum_col, json_col, json_text, opt_json_col,
    opt_time_col, time_col, ts, uuid_col,
};

const CHILD_COLUMNS: &str = "id, name, main_parent_id, avatar_url, lat, lng, \
     location_updated_at, device_info, is_online, status, qr_code, attributes, created_at";

impl Database {
    pub fn insert_child(&self, child: &NewChild, created_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO children (id, name, main_parent_id, avatar_url, device_info, \
                 qr_code, attributes, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    child.id.to_string(),
                    child.name,
                    child.main_parent.to_string(),
                    child.avatar_url,
                    child.device_info.as_ref().map(json_text),
                    child.qr_code,
                    json_text(&child.attributes),
                    ts(&created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_child(&self, id: Uuid) -> Result<Option<ChildRow>> {
        self.with_conn(|conn| query_child(conn, "id = ?1", &id.to_string()))
    }

    pub fn find_child_by_qr(&self, qr_code: &str) -> Result<Option<ChildRow>> {
        self.with_conn(|conn| query_child(conn, "qr_code = ?1", qr_code))
    }

    pub fn list_children(&self) -> Result<Vec<ChildRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CHILD_COLUMNS} FROM children ORDER BY created_at DESC");
            query_children(conn, &sql, params![])
        })
    }

    /// Children whose main parent is `parent_id`, or that list it as a linked parent.
    pub fn list_children_for_parent(&self, parent_id: Uuid) -> Result<Vec<ChildRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHILD_COLUMNS} FROM children \
                 WHERE main_parent_id = ?1 \
                    OR id IN (SELECT child_id FROM child_parents WHERE user_id = ?1) \
                 ORDER BY created_at DESC"
            );
            query_children(conn, &sql, [parent_id.to_string()])
        })
    }

    pub fn update_child(&self, id: Uuid, patch: &ChildPatch) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE children SET \
                 name = COALESCE(?2, name), \
                 avatar_url = COALESCE(?3, avatar_url), \
                 device_info = COALESCE(?4, device_info), \
                 is_online = COALESCE(?5, is_online), \
                 status = COALESCE(?6, status), \
                 attributes = COALESCE(?7, attributes) \
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    patch.name,
                    patch.avatar_url,
                    patch.device_info.as_ref().map(json_text),
                    patch.is_online,
                    patch.status.map(|s| s.as_str()),
                    patch.attributes.as_ref().map(json_text),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn update_location(&self, id: Uuid, lat: f64, lng: f64, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE children SET lat = ?2, lng = ?3, location_updated_at = ?4 WHERE id = ?1",
                params![id.to_string(), lat, lng, ts(&at)],
            )?;
            Ok(changed > 0)
        })
    }

    /// Removes the child together with its rooms, invites and messages.
    pub fn delete_child(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM children WHERE id = ?1", [id.to_string()])?;
            Ok(removed > 0)
        })
    }

    /// Returns false when the parent was already linked.
    pub fn link_parent(&self, child_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO child_parents (child_id, user_id) VALUES (?1, ?2)",
                [child_id.to_string(), user_id.to_string()],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn unlink_parent(&self, child_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM child_parents WHERE child_id = ?1 AND user_id = ?2",
                [child_id.to_string(), user_id.to_string()],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn child_summary(&self, id: Uuid) -> Result<Option<AccountSummary>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, avatar_url FROM children WHERE id = ?1",
                [id.to_string()],
                |row| {
                    Ok(AccountSummary {
                        id: uuid_col(row, 0)?,
                        name: row.get(1)?,
                        avatar_url: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }
}

fn query_child(conn: &Connection, filter: &str, key: &str) -> Result<Option<ChildRow>> {
    let sql = format!("SELECT {CHILD_COLUMNS} FROM children WHERE {filter}");
    let child = conn.query_row(&sql, [key], child_from_row).optional()?;
    match child {
        Some(mut child) => {
            child.linked_parents = query_linked_parents(conn, child.id)?;
            Ok(Some(child))
        }
        None => Ok(None),
    }
}

fn query_children<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<ChildRow>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt
        .query_map(params, child_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for child in &mut rows {
        child.linked_parents = query_linked_parents(conn, child.id)?;
    }
    Ok(rows)
}

fn query_linked_parents(conn: &Connection, child_id: Uuid) -> Result<Vec<Uuid>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM child_parents WHERE child_id = ?1 ORDER BY rowid")?;
    let ids = stmt
        .query_map([child_id.to_string()], |row| uuid_col(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn child_from_row(row: &Row<'_>) -> rusqlite::Result<ChildRow> {
    let lat: Option<f64> = row.get(4)?;
    let lng: Option<f64> = row.get(5)?;
    let updated_at = opt_time_col(row, 6)?;
    let location = match (lat, lng, updated_at) {
        (Some(lat), Some(lng), Some(updated_at)) => Some(Location { lat, lng, updated_at }),
        _ => None,
    };

    Ok(ChildRow {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        main_parent: uuid_col(row, 2)?,
        linked_parents: Vec::new(),
        avatar_url: row.get(3)?,
        location,
        device_info: opt_json_col(row, 7)?,
        is_online: row.get(8)?,
        status: enum_col(row, 9)?,
        qr_code: row.get(10)?,
        attributes: json_col(row, 11)?,
        created_at: time_col(row, 12)?,
    })
}

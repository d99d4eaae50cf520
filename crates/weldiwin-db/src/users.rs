use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use weldiwin_types::models::{AccountSummary, VerificationChannel};

use crate::Database;
use crate::models::{
    NewUser, OptionalExt, UserPatch, UserRow, enum_col, json_col, json_text, opt_enum_col,
    opt_time_col, time_col, ts, uuid_col,
};

const USER_COLUMNS: &str = "id, name, email, phone, password, role, status, avatar_url, \
     is_verified, verification_code, verification_expires_at, verification_channel, \
     reset_code, reset_expires_at, last_code_sent_at, google_id, attributes, created_at";

impl Database {
    pub fn insert_user(&self, user: &NewUser, created_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, phone, password, role, status, avatar_url, \
                 is_verified, google_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.email,
                    user.phone,
                    user.password_hash,
                    user.role.as_str(),
                    user.status.as_str(),
                    user.avatar_url,
                    user.is_verified,
                    user.google_id,
                    ts(&created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", &id.to_string()))
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn find_user_by_phone(&self, phone: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "phone = ?1", phone))
    }

    pub fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "google_id = ?1", google_id))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Applies the set fields of `patch`. Returns false when the user does not exist.
    pub fn update_user(&self, id: Uuid, patch: &UserPatch) -> Result<bool> {
        self.with_conn(|conn| {
            let attributes = patch.attributes.as_ref().map(json_text);
            let changed = conn.execute(
                "UPDATE users SET \
                 name = COALESCE(?2, name), \
                 email = COALESCE(?3, email), \
                 phone = COALESCE(?4, phone), \
                 password = COALESCE(?5, password), \
                 role = COALESCE(?6, role), \
                 status = COALESCE(?7, status), \
                 avatar_url = COALESCE(?8, avatar_url), \
                 is_verified = COALESCE(?9, is_verified), \
                 attributes = COALESCE(?10, attributes) \
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    patch.name,
                    patch.email,
                    patch.phone,
                    patch.password_hash,
                    patch.role.map(|r| r.as_str()),
                    patch.status.map(|s| s.as_str()),
                    patch.avatar_url,
                    patch.is_verified,
                    attributes,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Fails with a foreign-key violation while the user is still main parent
    /// of a child or owner of a room.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
            Ok(removed > 0)
        })
    }

    pub fn set_verification_code(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
        channel: VerificationChannel,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET verification_code = ?2, verification_expires_at = ?3, \
                 verification_channel = ?4, last_code_sent_at = ?5 WHERE id = ?1",
                params![
                    id.to_string(),
                    code,
                    ts(&expires_at),
                    channel.as_str(),
                    ts(&sent_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Marks the account verified and clears any pending verification code.
    pub fn mark_verified(&self, id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_verified = 1, verification_code = NULL, \
                 verification_expires_at = NULL WHERE id = ?1",
                [id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn set_reset_code(
        &self,
        id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET reset_code = ?2, reset_expires_at = ?3, last_code_sent_at = ?4 \
                 WHERE id = ?1",
                params![id.to_string(), code, ts(&expires_at), ts(&sent_at)],
            )?;
            Ok(())
        })
    }

    /// Stores the new password hash and consumes the reset code.
    pub fn reset_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET password = ?2, reset_code = NULL, reset_expires_at = NULL \
                 WHERE id = ?1",
                params![id.to_string(), password_hash],
            )?;
            Ok(())
        })
    }

    /// Attaches a Google account id. A verified Google email verifies the account too.
    pub fn link_google_id(&self, id: Uuid, google_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET google_id = ?2, is_verified = 1 WHERE id = ?1",
                params![id.to_string(), google_id],
            )?;
            Ok(())
        })
    }

    pub fn user_summaries(&self, ids: &[Uuid]) -> Result<Vec<AccountSummary>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, name, avatar_url FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );
            let keys: Vec<String> = ids.iter().map(Uuid::to_string).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(keys.iter()), |row| {
                    Ok(AccountSummary {
                        id: uuid_col(row, 0)?,
                        name: row.get(1)?,
                        avatar_url: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, filter: &str, key: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter}");
    conn.query_row(&sql, [key], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        password: row.get(4)?,
        role: enum_col(row, 5)?,
        status: enum_col(row, 6)?,
        avatar_url: row.get(7)?,
        is_verified: row.get(8)?,
        verification_code: row.get(9)?,
        verification_expires_at: opt_time_col(row, 10)?,
        verification_channel: opt_enum_col(row, 11)?,
        reset_code: row.get(12)?,
        reset_expires_at: opt_time_col(row, 13)?,
        last_code_sent_at: opt_time_col(row, 14)?,
        google_id: row.get(15)?,
        attributes: json_col(row, 16)?,
        created_at: time_col(row, 17)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use weldiwin_types::models::{Role, UserStatus};

    pub(crate) fn seed_user(db: &Database, name: &str, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        db.insert_user(
            &NewUser {
                id,
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                phone: None,
                password_hash: "hash".to_string(),
                role,
                status: UserStatus::Active,
                avatar_url: None,
                is_verified: false,
                google_id: None,
            },
            Utc::now(),
        )
        .unwrap();
        id
    }

    #[test]
    fn email_lookup_ignores_case() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "Alice", Role::Parent);
        let found = db.find_user_by_email("ALICE@example.com").unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.role, Role::Parent);
        assert!(found.attributes.is_empty());
    }

    #[test]
    fn duplicate_email_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "Bob", Role::Parent);
        let err = db
            .insert_user(
                &NewUser {
                    id: Uuid::new_v4(),
                    name: "Bobby".into(),
                    email: "bob@example.com".into(),
                    phone: None,
                    password_hash: "x".into(),
                    role: Role::Parent,
                    status: UserStatus::Active,
                    avatar_url: None,
                    is_verified: false,
                    google_id: None,
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(crate::is_unique_violation(&err));
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "Carol", Role::Parent);
        let patch = UserPatch {
            name: Some("Caroline".into()),
            status: Some(UserStatus::Suspended),
            ..Default::default()
        };
        assert!(db.update_user(id, &patch).unwrap());
        let row = db.get_user(id).unwrap().unwrap();
        assert_eq!(row.name, "Caroline");
        assert_eq!(row.status, UserStatus::Suspended);
        assert_eq!(row.email, "carol@example.com");
        assert!(!db.update_user(Uuid::new_v4(), &patch).unwrap());
    }

    #[test]
    fn verification_code_is_cleared_on_verify() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "Dan", Role::Parent);
        let now = Utc::now();
        db.set_verification_code(id, "123456", now, VerificationChannel::Sms, now)
            .unwrap();
        let row = db.get_user(id).unwrap().unwrap();
        assert_eq!(row.verification_code.as_deref(), Some("123456"));
        assert_eq!(row.verification_channel, Some(VerificationChannel::Sms));

        db.mark_verified(id).unwrap();
        let row = db.get_user(id).unwrap().unwrap();
        assert!(row.is_verified);
        assert!(row.verification_code.is_none());
    }
}

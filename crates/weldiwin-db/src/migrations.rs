use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      TEXT PRIMARY KEY,
                name                    TEXT NOT NULL,
                email                   TEXT NOT NULL UNIQUE COLLATE NOCASE,
                phone                   TEXT,
                password                TEXT NOT NULL,
                role                    TEXT NOT NULL,
                status                  TEXT NOT NULL DEFAULT 'ACTIVE',
                avatar_url              TEXT,
                is_verified             INTEGER NOT NULL DEFAULT 0,
                verification_code       TEXT,
                verification_expires_at TEXT,
                verification_channel    TEXT,
                reset_code              TEXT,
                reset_expires_at        TEXT,
                last_code_sent_at       TEXT,
                google_id               TEXT,
                attributes              TEXT NOT NULL DEFAULT '{}',
                created_at              TEXT NOT NULL
            );

            CREATE INDEX idx_users_phone ON users(phone);

            -- main_parent_id has no ON DELETE action: deleting a parent that
            -- still owns children is refused.
            CREATE TABLE children (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                main_parent_id      TEXT NOT NULL REFERENCES users(id),
                avatar_url          TEXT,
                lat                 REAL,
                lng                 REAL,
                location_updated_at TEXT,
                device_info         TEXT,
                is_online           INTEGER NOT NULL DEFAULT 0,
                status              TEXT NOT NULL DEFAULT 'ACTIVE',
                qr_code             TEXT UNIQUE,
                attributes          TEXT NOT NULL DEFAULT '{}',
                created_at          TEXT NOT NULL
            );

            CREATE INDEX idx_children_parent ON children(main_parent_id);

            CREATE TABLE child_parents (
                child_id    TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (child_id, user_id)
            );

            CREATE INDEX idx_child_parents_user ON child_parents(user_id);

            CREATE TABLE rooms (
                id                  TEXT PRIMARY KEY,
                parent_id           TEXT NOT NULL REFERENCES users(id),
                child_id            TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
                is_active           INTEGER NOT NULL DEFAULT 1,
                last_text           TEXT,
                last_type           TEXT,
                last_sender_model   TEXT,
                last_sender_id      TEXT,
                last_at             TEXT,
                created_at          TEXT NOT NULL,
                UNIQUE (parent_id, child_id)
            );

            CREATE INDEX idx_rooms_child ON rooms(child_id);

            CREATE TABLE room_invites (
                room_id     TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (room_id, user_id)
            );

            CREATE INDEX idx_room_invites_user ON room_invites(user_id);

            -- seq is the insertion order and the paging key.
            CREATE TABLE messages (
                seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
                id                  TEXT NOT NULL UNIQUE,
                room_id             TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
                sender_model        TEXT NOT NULL,
                sender_id           TEXT NOT NULL,
                type                TEXT NOT NULL,
                text                TEXT,
                audio               TEXT,
                signaling_payload   TEXT,
                is_delivered        INTEGER NOT NULL DEFAULT 0,
                is_read             INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL
            );

            CREATE INDEX idx_messages_room ON messages(room_id, seq);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

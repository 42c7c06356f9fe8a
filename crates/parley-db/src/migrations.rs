use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, conversations, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                display_name    TEXT NOT NULL,
                bio             TEXT,
                profile_picture TEXT,
                password        TEXT,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE conversations (
                id                   TEXT PRIMARY KEY,
                participant1         TEXT NOT NULL REFERENCES users(id),
                participant2         TEXT NOT NULL REFERENCES users(id),
                created_at           INTEGER NOT NULL,
                last_message_at      INTEGER NOT NULL,
                last_message_preview TEXT,
                UNIQUE(participant1, participant2),
                CHECK(participant1 < participant2)
            );

            CREATE INDEX idx_conversations_p1 ON conversations(participant1, last_message_at);
            CREATE INDEX idx_conversations_p2 ON conversations(participant2, last_message_at);

            -- One counter row per conversation; survives message deletion so
            -- sequences are never reused.
            CREATE TABLE conversation_sequences (
                conversation_id TEXT PRIMARY KEY,
                last_seq        INTEGER NOT NULL,
                last_ts         INTEGER NOT NULL
            );

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL,
                seq              INTEGER NOT NULL,
                sender_id        TEXT NOT NULL REFERENCES users(id),
                kind             TEXT NOT NULL,
                content          TEXT,
                file_content     BLOB,
                file_type        TEXT,
                reply_to_id      TEXT,
                reply_to_content TEXT,
                reply_to_sender  TEXT,
                created_at       INTEGER NOT NULL,
                UNIQUE(conversation_id, seq)
            );

            CREATE TABLE read_markers (
                conversation_id TEXT NOT NULL,
                user_id         TEXT NOT NULL REFERENCES users(id),
                last_read_at    INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (groups)");
        conn.execute_batch(
            "
            CREATE TABLE chat_groups (
                id                   TEXT PRIMARY KEY,
                name                 TEXT NOT NULL,
                description          TEXT,
                creator              TEXT NOT NULL REFERENCES users(id),
                created_at           INTEGER NOT NULL,
                last_message_at      INTEGER NOT NULL,
                last_message_preview TEXT,
                last_message_sender  TEXT
            );

            CREATE TABLE group_members (
                group_id  TEXT NOT NULL REFERENCES chat_groups(id) ON DELETE CASCADE,
                user_id   TEXT NOT NULL REFERENCES users(id),
                joined_at INTEGER NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );

            CREATE INDEX idx_group_members_user ON group_members(user_id);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    if version < 3 {
        info!("Running migration v3 (status, community)");
        conn.execute_batch(
            "
            CREATE TABLE statuses (
                id           TEXT PRIMARY KEY,
                user_id      TEXT NOT NULL REFERENCES users(id),
                user_name    TEXT NOT NULL,
                content      TEXT,
                image_base64 TEXT,
                image_type   TEXT,
                created_at   INTEGER NOT NULL,
                expires_at   INTEGER NOT NULL
            );

            CREATE INDEX idx_statuses_expiry ON statuses(expires_at);

            CREATE TABLE status_views (
                status_id TEXT NOT NULL REFERENCES statuses(id) ON DELETE CASCADE,
                viewer_id TEXT NOT NULL,
                viewed_at INTEGER NOT NULL,
                PRIMARY KEY (status_id, viewer_id)
            );

            CREATE TABLE community_posts (
                id           TEXT PRIMARY KEY,
                author_id    TEXT NOT NULL REFERENCES users(id),
                author_name  TEXT NOT NULL,
                content      TEXT,
                image_base64 TEXT,
                image_type   TEXT,
                created_at   INTEGER NOT NULL
            );

            CREATE TABLE post_likes (
                post_id    TEXT NOT NULL REFERENCES community_posts(id) ON DELETE CASCADE,
                user_id    TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (post_id, user_id)
            );

            CREATE TABLE post_comments (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES community_posts(id) ON DELETE CASCADE,
                author_id   TEXT NOT NULL,
                author_name TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_post_comments_post ON post_comments(post_id, created_at);

            INSERT INTO schema_version (version) VALUES (3);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::Database;
use crate::models::ConversationRow;

const CONVERSATION_COLUMNS: &str =
    "id, participant1, participant2, created_at, last_message_at, last_message_preview";

impl Database {
    /// Get or create the conversation for an ordered participant pair.
    ///
    /// `candidate_id` is only used if no row exists yet. The UNIQUE constraint
    /// plus `INSERT OR IGNORE` means a racing creator silently loses and both
    /// callers read back the same row.
    pub fn get_or_create_conversation(
        &self,
        candidate_id: &str,
        participant1: &str,
        participant2: &str,
        now: i64,
    ) -> Result<ConversationRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO conversations (id, participant1, participant2, created_at, last_message_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![candidate_id, participant1, participant2, now],
            )?;
            let sql = format!(
                "SELECT {} FROM conversations WHERE participant1 = ?1 AND participant2 = ?2",
                CONVERSATION_COLUMNS
            );
            let row = tx.query_row(&sql, [participant1, participant2], map_conversation)?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Conversations a user takes part in, most recent activity first.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversations
                 WHERE participant1 = ?1 OR participant2 = ?1
                 ORDER BY last_message_at DESC",
                CONVERSATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Remove a conversation with its messages, watermarks and counter.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [id])?;
            tx.execute("DELETE FROM read_markers WHERE conversation_id = ?1", [id])?;
            tx.execute("DELETE FROM conversation_sequences WHERE conversation_id = ?1", [id])?;
            let removed = tx.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(removed == 1)
        })
    }

    /// Participant set of a direct conversation or group, or `None` if the id
    /// names neither.
    pub fn conversation_members(&self, id: &str) -> Result<Option<Vec<String>>> {
        self.with_conn(|conn| {
            if let Some(conv) = query_conversation(conn, id)? {
                return Ok(Some(vec![conv.participant1, conv.participant2]));
            }

            let is_group: Option<i64> = conn
                .query_row("SELECT 1 FROM chat_groups WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            if is_group.is_none() {
                return Ok(None);
            }

            let mut stmt =
                conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY joined_at")?;
            let members = stmt
                .query_map([id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(Some(members))
        })
    }

    // -- Read watermarks --

    /// Move a reader's watermark forward. Never moves it back; returns the
    /// stored value.
    pub fn advance_read_marker(&self, conversation_id: &str, user_id: &str, at: i64) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let stored = conn.query_row(
                "INSERT INTO read_markers (conversation_id, user_id, last_read_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(conversation_id, user_id)
                 DO UPDATE SET last_read_at = MAX(last_read_at, excluded.last_read_at)
                 RETURNING last_read_at",
                rusqlite::params![conversation_id, user_id, at],
                |row| row.get(0),
            )?;
            Ok(stored)
        })
    }

    /// All watermarks recorded for a conversation as `(user_id, last_read_at)`.
    pub fn read_markers(&self, conversation_id: &str) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, last_read_at FROM read_markers WHERE conversation_id = ?1",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<(String, i64)>, _>>()?;
            Ok(rows)
        })
    }

    pub fn read_marker(&self, conversation_id: &str, user_id: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let at = conn
                .query_row(
                    "SELECT last_read_at FROM read_markers WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(at)
        })
    }
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let sql = format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS);
    Ok(conn.query_row(&sql, [id], map_conversation).optional()?)
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant1: row.get(1)?,
        participant2: row.get(2)?,
        created_at: row.get(3)?,
        last_message_at: row.get(4)?,
        last_message_preview: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::queries::test_support::db_with_users;

    #[test]
    fn get_or_create_returns_existing_row() {
        let db = db_with_users(&["111111", "222222"]);
        let first = db.get_or_create_conversation("c-first", "111111", "222222", 10).unwrap();
        let second = db.get_or_create_conversation("c-second", "111111", "222222", 20).unwrap();

        assert_eq!(first.id, "c-first");
        assert_eq!(second.id, "c-first");
        assert_eq!(second.created_at, 10);
    }

    #[test]
    fn unordered_pair_is_rejected_by_schema() {
        let db = db_with_users(&["111111", "222222"]);
        assert!(db.get_or_create_conversation("c", "222222", "111111", 1).is_err());
    }

    #[test]
    fn members_resolve_for_direct_conversations() {
        let db = db_with_users(&["111111", "222222"]);
        db.get_or_create_conversation("c1", "111111", "222222", 1).unwrap();

        assert_eq!(
            db.conversation_members("c1").unwrap(),
            Some(vec!["111111".to_string(), "222222".to_string()])
        );
        assert_eq!(db.conversation_members("nope").unwrap(), None);
    }

    #[test]
    fn read_marker_never_moves_backwards() {
        let db = db_with_users(&["111111", "222222"]);
        db.get_or_create_conversation("c1", "111111", "222222", 1).unwrap();

        assert_eq!(db.advance_read_marker("c1", "111111", 500).unwrap(), 500);
        assert_eq!(db.advance_read_marker("c1", "111111", 300).unwrap(), 500);
        assert_eq!(db.read_marker("c1", "111111").unwrap(), Some(500));
        assert_eq!(db.read_marker("c1", "222222").unwrap(), None);
    }

    #[test]
    fn list_orders_by_recent_activity() {
        let db = db_with_users(&["111111", "222222", "333333"]);
        db.get_or_create_conversation("old", "111111", "222222", 1).unwrap();
        db.get_or_create_conversation("new", "111111", "333333", 2).unwrap();

        let ids: Vec<String> = db
            .conversations_for_user("111111")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }
}

use std::collections::BTreeMap;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};

use super::{MAX_BATCH_IDS, as_params, placeholders};
use crate::Database;
use crate::models::{DeleteOutcome, DeletedBatch, MessageRow, NewMessage, Sequenced};

const MESSAGE_COLUMNS: &str = "id, conversation_id, seq, sender_id, kind, content, file_content, \
     file_type, reply_to_id, reply_to_content, reply_to_sender, created_at";

/// Kind tag stored for attachment messages; used to render previews.
const FILE_KIND: &str = "FILE";
const FILE_PREVIEW: &str = "Photo";

impl Database {
    /// Persist a message, assigning the conversation's next sequence number.
    ///
    /// The per-conversation counter is bumped in the same transaction as the
    /// insert, so two messages can never share a sequence. Timestamps are
    /// strictly increasing within a conversation: a message written in the
    /// same millisecond as its predecessor, or after the clock stepped back,
    /// lands one millisecond after it.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<Sequenced> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let sequenced = tx.query_row(
                "INSERT INTO conversation_sequences (conversation_id, last_seq, last_ts) VALUES (?1, 1, ?2)
                 ON CONFLICT(conversation_id)
                 DO UPDATE SET last_seq = last_seq + 1, last_ts = MAX(last_ts + 1, excluded.last_ts)
                 RETURNING last_seq, last_ts",
                rusqlite::params![msg.conversation_id, msg.now],
                |row| {
                    Ok(Sequenced {
                        seq: row.get(0)?,
                        timestamp: row.get(1)?,
                    })
                },
            )?;

            tx.execute(
                "INSERT INTO messages (id, conversation_id, seq, sender_id, kind, content, file_content,
                                       file_type, reply_to_id, reply_to_content, reply_to_sender, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    msg.id,
                    msg.conversation_id,
                    sequenced.seq,
                    msg.sender_id,
                    msg.kind,
                    msg.content,
                    msg.file_content,
                    msg.file_type,
                    msg.reply_to_id,
                    msg.reply_to_content,
                    msg.reply_to_sender,
                    sequenced.timestamp,
                ],
            )?;

            touch_last_message(
                &tx,
                msg.conversation_id,
                Some(msg.preview),
                Some(sequenced.timestamp),
                Some(msg.sender_id),
            )?;

            tx.commit()?;
            Ok(sequenced)
        })
    }

    /// Newest `limit` messages of a conversation, returned oldest first.
    pub fn recent_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(rusqlite::params![conversation_id, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            Ok(conn.query_row(&sql, [id], map_message).optional()?)
        })
    }

    /// Timestamp of the newest message ever written to a conversation, or
    /// `None` if nothing has been sent yet. Deletes do not move it back.
    pub fn latest_message_at(&self, conversation_id: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let at = conn
                .query_row(
                    "SELECT last_ts FROM conversation_sequences WHERE conversation_id = ?1",
                    [conversation_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(at)
        })
    }

    /// Batch-fetch messages by id. Unknown ids are skipped.
    pub fn messages_by_ids(&self, ids: &[String]) -> Result<Vec<MessageRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| query_messages_by_ids(conn, ids))
    }

    /// Hard-delete messages owned by `sender_id`.
    ///
    /// All-or-nothing: if any existing id belongs to another sender nothing is
    /// removed. Unknown ids are ignored. Each affected conversation gets its
    /// last-message cache recomputed from the newest surviving message.
    pub fn delete_messages(&self, ids: &[String], sender_id: &str) -> Result<DeleteOutcome> {
        if ids.is_empty() {
            return Ok(DeleteOutcome::Deleted(vec![]));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let found = query_messages_by_ids(&tx, ids)?;
            if found.iter().any(|m| m.sender_id != sender_id) {
                return Ok(DeleteOutcome::NotOwner);
            }

            // Batches ordered by conversation id.
            let mut by_conversation: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for msg in found {
                by_conversation.entry(msg.conversation_id).or_default().push(msg.id);
            }

            for (conversation_id, msg_ids) in &by_conversation {
                for chunk in msg_ids.chunks(MAX_BATCH_IDS) {
                    let sql = format!("DELETE FROM messages WHERE id IN ({})", placeholders(chunk.len()));
                    tx.execute(&sql, as_params(chunk).as_slice())?;
                }
                refresh_last_message(&tx, conversation_id)?;
            }

            tx.commit()?;

            Ok(DeleteOutcome::Deleted(
                by_conversation
                    .into_iter()
                    .map(|(conversation_id, ids)| DeletedBatch { conversation_id, ids })
                    .collect(),
            ))
        })
    }
}

/// Ordered by conversation, then sequence.
fn query_messages_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<MessageRow>> {
    let mut rows = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(MAX_BATCH_IDS) {
        let sql = format!("SELECT {} FROM messages WHERE id IN ({})", MESSAGE_COLUMNS, placeholders(chunk.len()));
        let mut stmt = conn.prepare(&sql)?;
        let found = stmt.query_map(as_params(chunk).as_slice(), map_message)?;
        for row in found {
            rows.push(row?);
        }
    }
    rows.sort_by(|a, b| (&a.conversation_id, a.seq).cmp(&(&b.conversation_id, b.seq)));
    Ok(rows)
}

/// Point the last-message cache of a conversation or group at the newest
/// surviving message, or clear it when none is left.
fn refresh_last_message(tx: &Transaction<'_>, conversation_id: &str) -> Result<()> {
    let newest: Option<(String, Option<String>, i64, String)> = tx
        .query_row(
            "SELECT kind, content, created_at, sender_id FROM messages
             WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT 1",
            [conversation_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    match newest {
        Some((kind, content, at, sender)) => {
            let preview = if kind == FILE_KIND {
                FILE_PREVIEW.to_string()
            } else {
                content.unwrap_or_default().chars().take(100).collect()
            };
            touch_last_message(tx, conversation_id, Some(&preview), Some(at), Some(&sender))
        }
        None => touch_last_message(tx, conversation_id, None, None, None),
    }
}

/// Update the preview cache on whichever of `conversations` / `chat_groups`
/// owns the id. `at = None` falls back to the creation time.
fn touch_last_message(
    conn: &Connection,
    conversation_id: &str,
    preview: Option<&str>,
    at: Option<i64>,
    sender_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET last_message_preview = ?2, last_message_at = COALESCE(?3, created_at)
         WHERE id = ?1",
        rusqlite::params![conversation_id, preview, at],
    )?;
    conn.execute(
        "UPDATE chat_groups
         SET last_message_preview = ?2,
             last_message_at = COALESCE(?3, created_at),
             last_message_sender = (SELECT COALESCE(MAX(display_name), ?4) FROM users WHERE id = ?4)
         WHERE id = ?1",
        rusqlite::params![conversation_id, preview, at, sender_id],
    )?;
    Ok(())
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        seq: row.get(2)?,
        sender_id: row.get(3)?,
        kind: row.get(4)?,
        content: row.get(5)?,
        file_content: row.get(6)?,
        file_type: row.get(7)?,
        reply_to_id: row.get(8)?,
        reply_to_content: row.get(9)?,
        reply_to_sender: row.get(10)?,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::models::{DeleteOutcome, DeletedBatch, NewMessage};
    use crate::queries::MAX_BATCH_IDS;
    use crate::queries::test_support::db_with_users;

    fn text<'a>(id: &'a str, conv: &'a str, sender: &'a str, body: &'a str, now: i64) -> NewMessage<'a> {
        NewMessage {
            id,
            conversation_id: conv,
            sender_id: sender,
            kind: "CHAT",
            content: Some(body),
            file_content: None,
            file_type: None,
            reply_to_id: None,
            reply_to_content: None,
            reply_to_sender: None,
            preview: body,
            now,
        }
    }

    fn setup() -> Database {
        let db = db_with_users(&["111111", "222222"]);
        db.get_or_create_conversation("c1", "111111", "222222", 1).unwrap();
        db
    }

    #[test]
    fn sequences_increase_and_timestamps_never_regress() {
        let db = setup();
        let a = db.insert_message(&text("m1", "c1", "111111", "hi", 1_000)).unwrap();
        // Wall clock stepped backwards between the two writes.
        let b = db.insert_message(&text("m2", "c1", "222222", "yo", 900)).unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(b.timestamp, 1_001);
        assert_eq!(db.latest_message_at("c1").unwrap(), Some(1_001));
    }

    #[test]
    fn same_millisecond_messages_get_distinct_timestamps() {
        let db = setup();
        let stamps: Vec<i64> = ["m1", "m2", "m3"]
            .iter()
            .map(|id| db.insert_message(&text(id, "c1", "111111", "x", 500)).unwrap().timestamp)
            .collect();
        assert_eq!(stamps, vec![500, 501, 502]);

        let later = db.insert_message(&text("m4", "c1", "111111", "x", 900)).unwrap();
        assert_eq!(later.timestamp, 900);
        assert_eq!(db.latest_message_at("nope").unwrap(), None);
    }

    #[test]
    fn sequences_are_not_reused_after_deleting_the_tail() {
        let db = setup();
        db.insert_message(&text("m1", "c1", "111111", "one", 10)).unwrap();
        db.insert_message(&text("m2", "c1", "111111", "two", 20)).unwrap();
        db.delete_messages(&["m2".to_string()], "111111").unwrap();

        let next = db.insert_message(&text("m3", "c1", "111111", "three", 30)).unwrap();
        assert_eq!(next.seq, 3);
    }

    #[test]
    fn recent_messages_returns_newest_window_in_ascending_order() {
        let db = setup();
        for (i, id) in ["m1", "m2", "m3", "m4"].iter().enumerate() {
            db.insert_message(&text(id, "c1", "111111", "x", i as i64)).unwrap();
        }

        let ids: Vec<String> = db.recent_messages("c1", 2).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m3", "m4"]);
    }

    #[test]
    fn insert_updates_conversation_preview() {
        let db = setup();
        db.insert_message(&text("m1", "c1", "111111", "hello there", 50)).unwrap();

        let conv = db.get_conversation("c1").unwrap().unwrap();
        assert_eq!(conv.last_message_preview.as_deref(), Some("hello there"));
        assert_eq!(conv.last_message_at, 50);
    }

    #[test]
    fn delete_refuses_foreign_messages_atomically() {
        let db = setup();
        db.insert_message(&text("m1", "c1", "111111", "mine", 10)).unwrap();
        db.insert_message(&text("m2", "c1", "222222", "theirs", 20)).unwrap();

        let outcome = db
            .delete_messages(&["m1".to_string(), "m2".to_string()], "111111")
            .unwrap();
        assert_eq!(outcome, DeleteOutcome::NotOwner);
        assert_eq!(db.recent_messages("c1", 10).unwrap().len(), 2);
    }

    #[test]
    fn delete_ignores_unknown_ids_and_recomputes_preview() {
        let db = setup();
        db.insert_message(&text("m1", "c1", "111111", "first", 10)).unwrap();
        db.insert_message(&text("m2", "c1", "111111", "second", 20)).unwrap();

        let outcome = db
            .delete_messages(&["m2".to_string(), "ghost".to_string()], "111111")
            .unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome::Deleted(vec![DeletedBatch {
                conversation_id: "c1".into(),
                ids: vec!["m2".into()],
            }])
        );

        let conv = db.get_conversation("c1").unwrap().unwrap();
        assert_eq!(conv.last_message_preview.as_deref(), Some("first"));
        assert_eq!(conv.last_message_at, 10);
    }

    #[test]
    fn lookups_and_deletes_span_several_statements() {
        let db = setup();
        let mut ids: Vec<String> = (0..MAX_BATCH_IDS + 20).map(|i| format!("m{}", i)).collect();
        for (i, id) in ids.iter().enumerate() {
            db.insert_message(&text(id, "c1", "111111", "x", i as i64)).unwrap();
        }
        ids.push("ghost".into());

        let found = db.messages_by_ids(&ids).unwrap();
        assert_eq!(found.len(), MAX_BATCH_IDS + 20);
        assert!(found.windows(2).all(|w| w[0].seq < w[1].seq));

        match db.delete_messages(&ids, "111111").unwrap() {
            DeleteOutcome::Deleted(batches) => assert_eq!(batches[0].ids.len(), MAX_BATCH_IDS + 20),
            DeleteOutcome::NotOwner => panic!("sender owns every message"),
        }
        assert!(db.recent_messages("c1", 10).unwrap().is_empty());
    }

    #[test]
    fn deleting_every_message_clears_preview() {
        let db = setup();
        db.insert_message(&text("m1", "c1", "111111", "only", 10)).unwrap();
        db.delete_messages(&["m1".to_string()], "111111").unwrap();

        let conv = db.get_conversation("c1").unwrap().unwrap();
        assert!(conv.last_message_preview.is_none());
        assert_eq!(conv.last_message_at, conv.created_at);
    }
}

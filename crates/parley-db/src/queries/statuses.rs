use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{OptionalExtension, Row};

use super::{MAX_BATCH_IDS, as_params, placeholders};
use crate::Database;
use crate::models::StatusRow;

const STATUS_COLUMNS: &str =
    "id, user_id, user_name, content, image_base64, image_type, created_at, expires_at";

impl Database {
    pub fn insert_status(&self, status: &StatusRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO statuses (id, user_id, user_name, content, image_base64, image_type, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    status.id,
                    status.user_id,
                    status.user_name,
                    status.content,
                    status.image_base64,
                    status.image_type,
                    status.created_at,
                    status.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Statuses that have not expired at `now`, newest first.
    pub fn active_statuses(&self, now: i64) -> Result<Vec<StatusRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM statuses WHERE expires_at > ?1 ORDER BY created_at DESC",
                STATUS_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([now], map_status)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn active_statuses_for_user(&self, user_id: &str, now: i64) -> Result<Vec<StatusRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM statuses WHERE user_id = ?1 AND expires_at > ?2 ORDER BY created_at DESC",
                STATUS_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, now], map_status)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_status(&self, id: &str) -> Result<Option<StatusRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM statuses WHERE id = ?1", STATUS_COLUMNS);
            Ok(conn.query_row(&sql, [id], map_status).optional()?)
        })
    }

    /// Record a view. The viewer set only grows; repeat views are no-ops.
    pub fn add_status_viewer(&self, status_id: &str, viewer_id: &str, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO status_views (status_id, viewer_id, viewed_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![status_id, viewer_id, now],
            )?;
            Ok(())
        })
    }

    /// Viewer ids per status, in view order.
    pub fn status_viewers(&self, status_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        if status_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let mut viewers: HashMap<String, Vec<String>> = HashMap::new();
            for chunk in status_ids.chunks(MAX_BATCH_IDS) {
                let sql = format!(
                    "SELECT status_id, viewer_id FROM status_views WHERE status_id IN ({}) ORDER BY viewed_at",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let pairs = stmt
                    .query_map(as_params(chunk).as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

                for (status_id, viewer_id) in pairs {
                    viewers.entry(status_id).or_default().push(viewer_id);
                }
            }
            Ok(viewers)
        })
    }

    pub fn delete_status(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| Ok(conn.execute("DELETE FROM statuses WHERE id = ?1", [id])? == 1))
    }

    /// Hard-delete every status that expired at or before `now`.
    pub fn delete_expired_statuses(&self, now: i64) -> Result<usize> {
        self.with_conn_mut(|conn| Ok(conn.execute("DELETE FROM statuses WHERE expires_at <= ?1", [now])?))
    }
}

fn map_status(row: &Row<'_>) -> rusqlite::Result<StatusRow> {
    Ok(StatusRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        content: row.get(3)?,
        image_base64: row.get(4)?,
        image_type: row.get(5)?,
        created_at: row.get(6)?,
        expires_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::models::StatusRow;
    use crate::queries::MAX_BATCH_IDS;
    use crate::queries::test_support::db_with_users;

    fn status(id: &str, created_at: i64, expires_at: i64) -> StatusRow {
        StatusRow {
            id: id.into(),
            user_id: "111111".into(),
            user_name: "Ada".into(),
            content: Some("on a boat".into()),
            image_base64: None,
            image_type: None,
            created_at,
            expires_at,
        }
    }

    #[test]
    fn expired_statuses_are_hidden_then_swept() {
        let db = db_with_users(&["111111"]);
        db.insert_status(&status("old", 0, 100)).unwrap();
        db.insert_status(&status("new", 50, 1_000)).unwrap();

        let active: Vec<String> = db.active_statuses(200).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(active, vec!["new"]);

        assert_eq!(db.delete_expired_statuses(200).unwrap(), 1);
        assert!(db.get_status("old").unwrap().is_none());
    }

    #[test]
    fn viewer_set_only_grows() {
        let db = db_with_users(&["111111"]);
        db.insert_status(&status("s1", 0, 1_000)).unwrap();
        db.add_status_viewer("s1", "222222", 1).unwrap();
        db.add_status_viewer("s1", "222222", 2).unwrap();
        db.add_status_viewer("s1", "333333", 3).unwrap();

        let viewers = db.status_viewers(&["s1".to_string()]).unwrap();
        assert_eq!(viewers["s1"], vec!["222222", "333333"]);
    }

    #[test]
    fn viewer_lookup_handles_long_id_lists() {
        let db = db_with_users(&["111111"]);
        db.insert_status(&status("s1", 0, 1_000)).unwrap();
        db.add_status_viewer("s1", "222222", 1).unwrap();

        let mut ids: Vec<String> = (0..MAX_BATCH_IDS * 2).map(|i| format!("missing-{}", i)).collect();
        ids.push("s1".into());
        let viewers = db.status_viewers(&ids).unwrap();
        assert_eq!(viewers.len(), 1);
        assert_eq!(viewers["s1"], vec!["222222"]);
    }

    #[test]
    fn deleting_a_status_drops_its_views() {
        let db = db_with_users(&["111111"]);
        db.insert_status(&status("s1", 0, 1_000)).unwrap();
        db.add_status_viewer("s1", "222222", 1).unwrap();

        assert!(db.delete_status("s1").unwrap());
        assert!(db.status_viewers(&["s1".to_string()]).unwrap().is_empty());
    }
}

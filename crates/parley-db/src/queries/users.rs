use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

use super::{MAX_BATCH_IDS, as_params, placeholders};
use crate::Database;
use crate::models::UserRow;

const USER_COLUMNS: &str = "id, display_name, bio, profile_picture, password, created_at";

impl Database {
    /// Insert a user. Returns `false` if the id is already registered.
    pub fn create_user(
        &self,
        id: &str,
        display_name: &str,
        password_hash: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (id, display_name, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, display_name, password_hash, now],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn count_users(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
    }

    /// Returns `false` if the user does not exist.
    pub fn update_display_name(&self, id: &str, display_name: &str) -> Result<bool> {
        self.update_user_column(id, "display_name", Some(display_name))
    }

    pub fn update_bio(&self, id: &str, bio: &str) -> Result<bool> {
        self.update_user_column(id, "bio", Some(bio))
    }

    pub fn update_profile_picture(&self, id: &str, picture: Option<&str>) -> Result<bool> {
        self.update_user_column(id, "profile_picture", picture)
    }

    fn update_user_column(&self, id: &str, column: &'static str, value: Option<&str>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let sql = format!("UPDATE users SET {} = ?1 WHERE id = ?2", column);
            let updated = conn.execute(&sql, rusqlite::params![value, id])?;
            Ok(updated == 1)
        })
    }

    /// Batch lookup of display names; ids with no user are absent from the map.
    pub fn display_names(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let mut names = HashMap::with_capacity(ids.len());
            for chunk in ids.chunks(MAX_BATCH_IDS) {
                let sql = format!(
                    "SELECT id, display_name FROM users WHERE id IN ({})",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(as_params(chunk).as_slice(), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (id, name) = row?;
                    names.insert(id, name);
                }
            }
            Ok(names)
        })
    }
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    let row = conn
        .query_row(&sql, [id], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                display_name: row.get(1)?,
                bio: row.get(2)?,
                profile_picture: row.get(3)?,
                password: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use crate::Database;

    #[test]
    fn duplicate_signup_is_reported() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_user("555001", "Ada", Some("h"), 1).unwrap());
        assert!(!db.create_user("555001", "Imposter", Some("h"), 2).unwrap());
        assert_eq!(db.get_user("555001").unwrap().unwrap().display_name, "Ada");
        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn profile_updates_touch_only_existing_users() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("555001", "Ada", None, 1).unwrap();

        assert!(db.update_bio("555001", "hello").unwrap());
        assert!(db.update_profile_picture("555001", Some("aGk=")).unwrap());
        assert!(!db.update_display_name("999999", "Ghost").unwrap());

        let user = db.get_user("555001").unwrap().unwrap();
        assert_eq!(user.bio.as_deref(), Some("hello"));
        assert_eq!(user.profile_picture.as_deref(), Some("aGk="));
        assert!(user.password.is_none());
    }

    #[test]
    fn display_names_skips_unknown_ids() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("555001", "Ada", None, 1).unwrap();
        let names = db
            .display_names(&["555001".to_string(), "555002".to_string()])
            .unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names["555001"], "Ada");
    }
}

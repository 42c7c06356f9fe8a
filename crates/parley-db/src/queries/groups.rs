use anyhow::Result;
use rusqlite::{OptionalExtension, Row};

use crate::Database;
use crate::models::GroupRow;

const GROUP_COLUMNS: &str = "g.id, g.name, g.description, g.creator, g.created_at, \
     g.last_message_at, g.last_message_preview, g.last_message_sender";

impl Database {
    /// Create a group with its initial member set. The creator is always added.
    pub fn create_group(&self, group: &GroupRow, members: &[String]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chat_groups (id, name, description, creator, created_at, last_message_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![group.id, group.name, group.description, group.creator, group.created_at],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                )?;
                stmt.execute(rusqlite::params![group.id, group.creator, group.created_at])?;
                for member in members {
                    stmt.execute(rusqlite::params![group.id, member, group.created_at])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_group(&self, id: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM chat_groups g WHERE g.id = ?1", GROUP_COLUMNS);
            Ok(conn.query_row(&sql, [id], map_group).optional()?)
        })
    }

    pub fn group_members(&self, group_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY joined_at, user_id")?;
            let members = stmt
                .query_map([group_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(members)
        })
    }

    /// Groups the user belongs to, most recent activity first.
    pub fn groups_for_user(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_groups g
                 JOIN group_members m ON m.group_id = g.id
                 WHERE m.user_id = ?1
                 ORDER BY g.last_message_at DESC",
                GROUP_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_group)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns `false` if the user was already a member.
    pub fn add_group_member(&self, group_id: &str, user_id: &str, now: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![group_id, user_id, now],
            )?;
            Ok(inserted == 1)
        })
    }

    /// Returns `false` if the user was not a member.
    pub fn remove_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let removed = conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                [group_id, user_id],
            )?;
            Ok(removed == 1)
        })
    }
}

fn map_group(row: &Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        creator: row.get(3)?,
        created_at: row.get(4)?,
        last_message_at: row.get(5)?,
        last_message_preview: row.get(6)?,
        last_message_sender: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::models::{GroupRow, NewMessage};
    use crate::queries::test_support::db_with_users;

    fn group(id: &str, creator: &str) -> GroupRow {
        GroupRow {
            id: id.into(),
            name: "Climbers".into(),
            description: Some("weekend crew".into()),
            creator: creator.into(),
            created_at: 100,
            last_message_at: 100,
            last_message_preview: None,
            last_message_sender: None,
        }
    }

    #[test]
    fn creator_is_always_a_member() {
        let db = db_with_users(&["111111", "222222"]);
        db.create_group(&group("g1", "111111"), &["222222".to_string()]).unwrap();

        assert_eq!(db.group_members("g1").unwrap(), vec!["111111", "222222"]);
        assert_eq!(
            db.conversation_members("g1").unwrap().map(|m| m.len()),
            Some(2)
        );
    }

    #[test]
    fn membership_changes_report_whether_anything_changed() {
        let db = db_with_users(&["111111", "222222"]);
        db.create_group(&group("g1", "111111"), &[]).unwrap();

        assert!(db.add_group_member("g1", "222222", 200).unwrap());
        assert!(!db.add_group_member("g1", "222222", 300).unwrap());
        assert!(db.remove_group_member("g1", "222222").unwrap());
        assert!(!db.remove_group_member("g1", "222222").unwrap());
        assert!(db.groups_for_user("222222").unwrap().is_empty());
    }

    #[test]
    fn group_messages_record_sender_display_name() {
        let db = db_with_users(&["111111", "222222"]);
        db.create_group(&group("g1", "111111"), &["222222".to_string()]).unwrap();
        db.insert_message(&NewMessage {
            id: "m1",
            conversation_id: "g1",
            sender_id: "222222",
            kind: "CHAT",
            content: Some("hey all"),
            file_content: None,
            file_type: None,
            reply_to_id: None,
            reply_to_content: None,
            reply_to_sender: None,
            preview: "hey all",
            now: 500,
        })
        .unwrap();

        let row = db.get_group("g1").unwrap().unwrap();
        assert_eq!(row.last_message_preview.as_deref(), Some("hey all"));
        assert_eq!(row.last_message_sender.as_deref(), Some("user-222222"));
        assert_eq!(row.last_message_at, 500);
    }
}

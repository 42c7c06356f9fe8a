use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{OptionalExtension, Row};

use super::{MAX_BATCH_IDS, as_params, placeholders};
use crate::Database;
use crate::models::{CommentRow, PostRow};

const POST_COLUMNS: &str = "id, author_id, author_name, content, image_base64, image_type, created_at";

impl Database {
    pub fn insert_post(&self, post: &PostRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO community_posts (id, author_id, author_name, content, image_base64, image_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    post.id,
                    post.author_id,
                    post.author_name,
                    post.content,
                    post.image_base64,
                    post.image_type,
                    post.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// All posts, newest first.
    pub fn list_posts(&self) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM community_posts ORDER BY created_at DESC", POST_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_post(&self, id: &str) -> Result<Option<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM community_posts WHERE id = ?1", POST_COLUMNS);
            Ok(conn.query_row(&sql, [id], map_post).optional()?)
        })
    }

    pub fn delete_post(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            Ok(conn.execute("DELETE FROM community_posts WHERE id = ?1", [id])? == 1)
        })
    }

    /// Toggle a like: removes it if present, adds it otherwise.
    /// Returns `(liked, like_count)` after the change.
    pub fn toggle_post_like(&self, post_id: &str, user_id: &str, now: i64) -> Result<(bool, usize)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                [post_id, user_id],
            )?;
            let liked = if removed == 0 {
                tx.execute(
                    "INSERT INTO post_likes (post_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![post_id, user_id, now],
                )?;
                true
            } else {
                false
            };
            let count: i64 =
                tx.query_row("SELECT COUNT(*) FROM post_likes WHERE post_id = ?1", [post_id], |row| row.get(0))?;
            tx.commit()?;
            Ok((liked, count as usize))
        })
    }

    pub fn insert_comment(&self, comment: &CommentRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO post_comments (id, post_id, author_id, author_name, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    comment.id,
                    comment.post_id,
                    comment.author_id,
                    comment.author_name,
                    comment.content,
                    comment.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Likers per post, in like order.
    pub fn likes_for_posts(&self, post_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let mut likes: HashMap<String, Vec<String>> = HashMap::new();
            for chunk in post_ids.chunks(MAX_BATCH_IDS) {
                let sql = format!(
                    "SELECT post_id, user_id FROM post_likes WHERE post_id IN ({}) ORDER BY created_at, user_id",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let pairs = stmt
                    .query_map(as_params(chunk).as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

                for (post_id, user_id) in pairs {
                    likes.entry(post_id).or_default().push(user_id);
                }
            }
            Ok(likes)
        })
    }

    /// Comments per post, oldest first.
    pub fn comments_for_posts(&self, post_ids: &[String]) -> Result<HashMap<String, Vec<CommentRow>>> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let mut comments: HashMap<String, Vec<CommentRow>> = HashMap::new();
            for chunk in post_ids.chunks(MAX_BATCH_IDS) {
                let sql = format!(
                    "SELECT id, post_id, author_id, author_name, content, created_at
                     FROM post_comments WHERE post_id IN ({}) ORDER BY created_at, rowid",
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(as_params(chunk).as_slice(), |row| {
                        Ok(CommentRow {
                            id: row.get(0)?,
                            post_id: row.get(1)?,
                            author_id: row.get(2)?,
                            author_name: row.get(3)?,
                            content: row.get(4)?,
                            created_at: row.get(5)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                for comment in rows {
                    comments.entry(comment.post_id.clone()).or_default().push(comment);
                }
            }
            Ok(comments)
        })
    }
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_name: row.get(2)?,
        content: row.get(3)?,
        image_base64: row.get(4)?,
        image_type: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::models::{CommentRow, PostRow};
    use crate::queries::test_support::db_with_users;

    fn post(id: &str) -> PostRow {
        PostRow {
            id: id.into(),
            author_id: "111111".into(),
            author_name: "Ada".into(),
            content: Some("sunset".into()),
            image_base64: None,
            image_type: None,
            created_at: 10,
        }
    }

    #[test]
    fn like_toggles_membership() {
        let db = db_with_users(&["111111"]);
        db.insert_post(&post("p1")).unwrap();

        assert_eq!(db.toggle_post_like("p1", "222222", 1).unwrap(), (true, 1));
        assert_eq!(db.toggle_post_like("p1", "333333", 2).unwrap(), (true, 2));
        assert_eq!(db.toggle_post_like("p1", "222222", 3).unwrap(), (false, 1));
    }

    #[test]
    fn comments_are_returned_in_append_order() {
        let db = db_with_users(&["111111"]);
        db.insert_post(&post("p1")).unwrap();
        for (i, body) in ["first", "second"].iter().enumerate() {
            db.insert_comment(&CommentRow {
                id: format!("k{}", i),
                post_id: "p1".into(),
                author_id: "222222".into(),
                author_name: "Bob".into(),
                content: body.to_string(),
                created_at: 100,
            })
            .unwrap();
        }

        let comments = db.comments_for_posts(&["p1".to_string()]).unwrap();
        let bodies: Vec<&str> = comments["p1"].iter().map(|c| c.content.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn deleting_post_cascades() {
        let db = db_with_users(&["111111"]);
        db.insert_post(&post("p1")).unwrap();
        db.toggle_post_like("p1", "222222", 1).unwrap();

        assert!(db.delete_post("p1").unwrap());
        assert!(db.likes_for_posts(&["p1".to_string()]).unwrap().is_empty());
        assert!(!db.delete_post("p1").unwrap());
    }
}

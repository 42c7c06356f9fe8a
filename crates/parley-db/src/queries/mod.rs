mod community;
mod conversations;
mod groups;
mod messages;
mod statuses;
mod users;

use rusqlite::types::ToSql;

/// Most values bound into one `IN (...)` list. Longer id lists are split
/// into several statements; SQLite caps bound variables per statement.
pub const MAX_BATCH_IDS: usize = 500;

/// `?1, ?2, ...` placeholder list for an `IN (...)` clause.
fn placeholders(count: usize) -> String {
    (1..=count).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn as_params(values: &[String]) -> Vec<&dyn ToSql> {
    values.iter().map(|v| v as &dyn ToSql).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::Database;

    pub fn db_with_users(ids: &[&str]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for id in ids {
            db.create_user(id, &format!("user-{}", id), Some("hash"), 1).unwrap();
        }
        db
    }
}

use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use parley_db::Database;

/// Failures of the delivery core. Each variant maps to one HTTP status and
/// to an `ERROR` envelope on the socket.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("attachment is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Storage hiccup; the caller may retry.
    #[error("storage temporarily unavailable")]
    TransientIo(#[from] anyhow::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

/// Run a blocking database call off the async runtime.
pub async fn blocking<F, T>(db: &Arc<Database>, f: F) -> ChatResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::TransientIo(anyhow::anyhow!("blocking task failed: {}", e))
        })?
        .map_err(|e| {
            error!("Storage error: {:#}", e);
            ChatError::TransientIo(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_message_names_both_sizes() {
        let err = ChatError::PayloadTooLarge { size: 6_000_000, limit: 5_242_880 };
        assert_eq!(err.to_string(), "attachment is 6000000 bytes, limit is 5242880");
    }

    #[tokio::test]
    async fn storage_failures_become_transient() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let result: ChatResult<()> =
            blocking(&db, |db| db.with_conn(|conn| Ok(conn.execute_batch("NOT SQL")?))).await;
        assert!(matches!(result, Err(ChatError::TransientIo(_))));
    }
}

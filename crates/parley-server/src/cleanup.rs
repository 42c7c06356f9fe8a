use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use parley_db::Database;
use parley_gateway::{ChatResult, blocking};
use parley_types::now_millis;

/// Background task that drops statuses past their `expires_at`.
///
/// Reads already filter expired rows, so this only reclaims space.
pub async fn run_status_sweep(db: Arc<Database>, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match sweep_expired(&db).await {
            Ok(count) if count > 0 => info!("Cleanup: pruned {} expired status(es)", count),
            Ok(_) => {}
            Err(e) => warn!("Cleanup error: {}", e),
        }
    }
}

async fn sweep_expired(db: &Arc<Database>) -> ChatResult<usize> {
    blocking(db, |db| db.delete_expired_statuses(now_millis())).await
}

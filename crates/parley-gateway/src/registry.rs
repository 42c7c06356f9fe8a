use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::info;
use uuid::Uuid;

use parley_types::events::ChatEvent;
use parley_types::now_millis;

const SHARD_COUNT: usize = 16;
const PRESENCE_CAPACITY: usize = 1024;

/// Outbound queue depth per session unless configured otherwise.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

pub type SessionId = Uuid;

/// One live connection of a user. Cloning shares the outbound queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: String,
    pub created_at: i64,
    tx: mpsc::Sender<ChatEvent>,
}

/// Result of handing an event to a session's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue at capacity; the event was dropped.
    Full,
    /// The connection is gone.
    Closed,
}

impl SessionHandle {
    /// Never waits: a slow reader loses events rather than stalling senders.
    pub fn try_deliver(&self, event: ChatEvent) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

type Shard = RwLock<HashMap<String, Vec<SessionHandle>>>;

/// Tracks which users are connected and on how many sessions.
///
/// Users are spread over fixed shards by a hash of their id, so connects and
/// disconnects of different users rarely touch the same lock. Presence
/// transitions (first session opened, last session closed) are published on a
/// broadcast channel while the shard lock is held, so JOIN/LEAVE for one user
/// are emitted in the order the transitions happened.
pub struct SessionRegistry {
    shards: Vec<Shard>,
    queue_depth: usize,
    presence_tx: broadcast::Sender<ChatEvent>,
}

impl SessionRegistry {
    pub fn new(queue_depth: usize) -> Self {
        let (presence_tx, _) = broadcast::channel(PRESENCE_CAPACITY);
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            queue_depth: queue_depth.max(1),
            presence_tx,
        }
    }

    fn shard(&self, user_id: &str) -> &Shard {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Receive JOIN/LEAVE envelopes for every presence transition.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<ChatEvent> {
        self.presence_tx.subscribe()
    }

    /// Add a session for `user_id`. Returns its handle and the receiving end
    /// of its outbound queue.
    pub async fn register(&self, user_id: &str) -> (SessionHandle, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            created_at: now_millis(),
            tx,
        };

        let mut shard = self.shard(user_id).write().await;
        let sessions = shard.entry(user_id.to_string()).or_default();
        let came_online = sessions.is_empty();
        sessions.push(handle.clone());

        if came_online {
            info!("{} is online", user_id);
            let _ = self.presence_tx.send(ChatEvent::presence(user_id, true, now_millis()));
        }

        (handle, rx)
    }

    /// Remove a session. Returns `true` if it was the user's last one, in
    /// which case a LEAVE is published. Unknown sessions are ignored, so
    /// racing removals of the same session are harmless.
    pub async fn unregister(&self, user_id: &str, session_id: SessionId) -> bool {
        let mut shard = self.shard(user_id).write().await;
        let Some(sessions) = shard.get_mut(user_id) else {
            return false;
        };

        let before = sessions.len();
        sessions.retain(|s| s.id != session_id);
        if sessions.len() == before || !sessions.is_empty() {
            return false;
        }

        shard.remove(user_id);
        info!("{} is offline", user_id);
        let _ = self.presence_tx.send(ChatEvent::presence(user_id, false, now_millis()));
        true
    }

    pub async fn sessions_for(&self, user_id: &str) -> Vec<SessionHandle> {
        self.shard(user_id)
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.shard(user_id).read().await.contains_key(user_id)
    }

    /// Every user with at least one session, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        let mut users = Vec::new();
        for shard in &self.shards {
            users.extend(shard.read().await.keys().cloned());
        }
        users.sort();
        users
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

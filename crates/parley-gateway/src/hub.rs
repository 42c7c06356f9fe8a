use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::ConversationRow;
use parley_types::events::{ChatEvent, DeliveryStatus};
use parley_types::models::{Conversation, Message, Payload};
use parley_types::now_millis;

use crate::error::{ChatError, ChatResult, blocking};
use crate::registry::{DEFAULT_QUEUE_DEPTH, SessionId, SessionRegistry};
use crate::router::{ConversationRouter, DispatchReport};
use crate::signals::SignalBus;
use crate::store::{DEFAULT_MAX_ATTACHMENT_BYTES, HistoryEntry, MessageStore};

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub queue_depth: usize,
    pub max_attachment_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

/// A durable message on its way out.
#[derive(Debug)]
pub struct Outgoing {
    pub conversation_id: String,
    pub sender: String,
    pub payload: Payload,
    pub reply_to_id: Option<String>,
    /// Session the command arrived on; it gets the ack instead of the mirror.
    pub origin: Option<SessionId>,
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub message: Message,
    pub status: DeliveryStatus,
    pub report: DispatchReport,
}

impl Sent {
    /// Envelope returned to the sending session.
    pub fn ack(&self, client_ref: Option<String>) -> ChatEvent {
        self.message.to_event().with_status(self.status).with_client_ref(client_ref)
    }
}

/// Entry point to the delivery core, shared by REST handlers and sockets.
#[derive(Clone)]
pub struct Hub {
    db: Arc<Database>,
    registry: Arc<SessionRegistry>,
    router: Arc<ConversationRouter>,
    store: Arc<MessageStore>,
    signals: Arc<SignalBus>,
}

impl Hub {
    pub fn new(db: Arc<Database>, config: HubConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.queue_depth));
        let router = Arc::new(ConversationRouter::new(db.clone(), registry.clone()));
        let store = Arc::new(MessageStore::new(db.clone(), config.max_attachment_bytes));
        let signals = Arc::new(SignalBus::new(router.clone(), store.clone()));
        Self { db, registry, router, store, signals }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    // -- Conversations --

    /// Idempotent: both orderings of a pair resolve to the same conversation.
    pub async fn get_or_create_conversation(&self, requester: &str, other: &str) -> ChatResult<Conversation> {
        if requester == other {
            return Err(ChatError::bad_request("cannot start a conversation with yourself"));
        }

        let (p1, p2) = if requester < other { (requester, other) } else { (other, requester) };
        let (p1, p2, other) = (p1.to_string(), p2.to_string(), other.to_string());
        let candidate = Uuid::new_v4().to_string();

        let row = blocking(&self.db, move |db| {
            if !db.user_exists(&other)? {
                return Ok(None);
            }
            db.get_or_create_conversation(&candidate, &p1, &p2, now_millis()).map(Some)
        })
        .await?
        .ok_or_else(|| ChatError::not_found("user"))?;

        Ok(conversation_from_row(row))
    }

    /// A conversation the requester takes part in.
    pub async fn conversation(&self, id: &str, requester: &str) -> ChatResult<Conversation> {
        let id = id.to_string();
        let conversation = blocking(&self.db, move |db| db.get_conversation(&id))
            .await?
            .map(conversation_from_row)
            .ok_or_else(|| ChatError::not_found("conversation"))?;

        if !conversation.has_participant(requester) {
            return Err(ChatError::forbidden("not a participant of this conversation"));
        }
        Ok(conversation)
    }

    pub async fn conversations_for(&self, user_id: &str) -> ChatResult<Vec<Conversation>> {
        let user = user_id.to_string();
        let rows = blocking(&self.db, move |db| db.conversations_for_user(&user)).await?;
        Ok(rows.into_iter().map(conversation_from_row).collect())
    }

    /// Remove a conversation and all of its messages.
    pub async fn delete_conversation(&self, id: &str, requester: &str) -> ChatResult<()> {
        self.conversation(id, requester).await?;

        let _order = self.store.lock(id).await;
        let conv_id = id.to_string();
        blocking(&self.db, move |db| db.delete_conversation(&conv_id)).await?;
        info!("{} deleted conversation {}", requester, id);
        Ok(())
    }

    // -- Messages --

    /// Persist a CHAT/FILE message and fan it out.
    ///
    /// The conversation lock is held from sequencing until every recipient
    /// queue has the event, so sessions see a conversation in sequence order.
    pub async fn send(&self, out: Outgoing) -> ChatResult<Sent> {
        let recipients = self.router.resolve_recipients(&out.conversation_id, &out.sender).await?;

        let _order = self.store.lock(&out.conversation_id).await;
        let message = self
            .store
            .append(&out.conversation_id, &out.sender, out.payload, out.reply_to_id.as_deref())
            .await?;

        let report = self.router.dispatch(&message.to_event(), &recipients).await;
        let status = if report.reached > 0 {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        };
        self.router
            .mirror(&message.to_event().with_status(status), &out.sender, out.origin)
            .await;

        debug!(
            "{} -> {} seq {} reached {} session(s)",
            out.sender, out.conversation_id, message.seq, report.reached
        );
        Ok(Sent { message, status, report })
    }

    pub async fn history(&self, conversation_id: &str, requester: &str, limit: u32) -> ChatResult<Vec<HistoryEntry>> {
        self.store.list(conversation_id, requester, limit).await
    }

    /// Bulk delete; emits one DELETED per affected conversation. Returns the
    /// number of messages removed.
    pub async fn delete_messages(&self, ids: Vec<String>, requester: &str) -> ChatResult<usize> {
        let batches = self.store.delete_by_ids(ids, requester).await?;

        let mut removed = 0;
        for batch in batches {
            removed += batch.ids.len();
            let event = ChatEvent::deleted(&batch.conversation_id, requester, batch.ids, now_millis());
            // The sender may have left a group since; the remaining members
            // still need to drop the rows.
            match self.router.others(&batch.conversation_id, requester).await {
                Ok(recipients) => {
                    self.router.dispatch(&event, &recipients).await;
                }
                Err(e) => debug!("No DELETED fan-out for {}: {}", batch.conversation_id, e),
            }
            self.router.mirror(&event, requester, None).await;
        }

        Ok(removed)
    }

    pub async fn mark_read(&self, conversation_id: &str, reader: &str) -> ChatResult<i64> {
        self.signals.publish_read(conversation_id, reader).await
    }

    pub async fn typing(&self, conversation_id: &str, sender: &str) {
        self.signals.publish_typing(conversation_id, sender).await;
    }

    // -- Presence --

    pub async fn online_users(&self) -> Vec<String> {
        self.registry.online_users().await
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.registry.is_online(user_id).await
    }
}

pub fn conversation_from_row(row: ConversationRow) -> Conversation {
    Conversation {
        id: row.id,
        participant1: row.participant1,
        participant2: row.participant2,
        created_at: row.created_at,
        last_message_at: row.last_message_at,
        last_message_preview: row.last_message_preview,
    }
}

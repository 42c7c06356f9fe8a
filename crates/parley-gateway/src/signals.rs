use std::sync::Arc;

use tracing::debug;

use parley_types::events::ChatEvent;
use parley_types::now_millis;

use crate::error::ChatResult;
use crate::router::{ConversationRouter, DispatchReport};
use crate::store::MessageStore;

/// Ephemeral signals. Typing never touches storage; read receipts persist
/// only the reader's watermark.
pub struct SignalBus {
    router: Arc<ConversationRouter>,
    store: Arc<MessageStore>,
}

impl SignalBus {
    pub fn new(router: Arc<ConversationRouter>, store: Arc<MessageStore>) -> Self {
        Self { router, store }
    }

    /// Tell the other participants' live sessions that `sender_id` is typing.
    /// Failures are dropped; there is no "stopped typing" signal.
    pub async fn publish_typing(&self, conversation_id: &str, sender_id: &str) -> DispatchReport {
        match self.router.resolve_recipients(conversation_id, sender_id).await {
            Ok(recipients) => {
                let event = ChatEvent::typing(conversation_id, sender_id, now_millis());
                self.router.dispatch(&event, &recipients).await
            }
            Err(e) => {
                debug!("Dropping typing signal from {} in {}: {}", sender_id, conversation_id, e);
                DispatchReport::default()
            }
        }
    }

    /// Advance the reader's watermark to the newest message and notify the
    /// counterparts. Returns the stored watermark.
    ///
    /// Runs under the conversation lock, so the receipt covers exactly the
    /// messages appended before it and lands in their stream after them.
    pub async fn publish_read(&self, conversation_id: &str, reader_id: &str) -> ChatResult<i64> {
        let recipients = self.router.resolve_recipients(conversation_id, reader_id).await?;

        let _order = self.store.lock(conversation_id).await;
        let at = self.store.mark_read(conversation_id, reader_id).await?;

        let event = ChatEvent::read(conversation_id, reader_id, at);
        self.router.dispatch(&event, &recipients).await;
        Ok(at)
    }
}

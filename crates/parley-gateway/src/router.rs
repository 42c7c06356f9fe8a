use std::ops::AddAssign;
use std::sync::Arc;

use tracing::{debug, warn};

use parley_db::Database;
use parley_types::events::ChatEvent;

use crate::error::{ChatError, ChatResult, blocking};
use crate::registry::{Delivery, SessionId, SessionRegistry};

/// How far one dispatch got.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sessions whose queue accepted the event.
    pub reached: usize,
    /// Sessions that were full or already closed.
    pub dropped: usize,
}

impl AddAssign for DispatchReport {
    fn add_assign(&mut self, other: Self) {
        self.reached += other.reached;
        self.dropped += other.dropped;
    }
}

/// Resolves conversations to participants and fans events out to their
/// live sessions.
pub struct ConversationRouter {
    db: Arc<Database>,
    registry: Arc<SessionRegistry>,
}

impl ConversationRouter {
    pub fn new(db: Arc<Database>, registry: Arc<SessionRegistry>) -> Self {
        Self { db, registry }
    }

    /// Participants of a direct conversation or group, minus the sender.
    ///
    /// A sender outside the conversation gets the same `NotFound` as a
    /// missing conversation, so membership is not leaked.
    pub async fn resolve_recipients(&self, conversation_id: &str, sender_id: &str) -> ChatResult<Vec<String>> {
        let members = self.members(conversation_id).await?;
        if !members.iter().any(|m| m == sender_id) {
            return Err(ChatError::not_found("conversation"));
        }

        Ok(members.into_iter().filter(|m| m != sender_id).collect())
    }

    /// Current participants other than `user_id`, whether or not `user_id`
    /// still belongs to the conversation.
    pub async fn others(&self, conversation_id: &str, user_id: &str) -> ChatResult<Vec<String>> {
        let members = self.members(conversation_id).await?;
        Ok(members.into_iter().filter(|m| m != user_id).collect())
    }

    async fn members(&self, conversation_id: &str) -> ChatResult<Vec<String>> {
        let id = conversation_id.to_string();
        blocking(&self.db, move |db| db.conversation_members(&id))
            .await?
            .ok_or_else(|| ChatError::not_found("conversation"))
    }

    /// Push `event` to every live session of every recipient. Best effort:
    /// nothing is retried.
    pub async fn dispatch(&self, event: &ChatEvent, recipients: &[String]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for user_id in recipients {
            report += self.deliver_to_user(user_id, event, None).await;
        }
        report
    }

    /// Copy an event to the sender's other devices. `origin` is the session
    /// the event came from, if any; it is skipped.
    pub async fn mirror(&self, event: &ChatEvent, user_id: &str, origin: Option<SessionId>) -> DispatchReport {
        self.deliver_to_user(user_id, event, origin).await
    }

    async fn deliver_to_user(&self, user_id: &str, event: &ChatEvent, skip: Option<SessionId>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for session in self.registry.sessions_for(user_id).await {
            if Some(session.id) == skip {
                continue;
            }

            match session.try_deliver(event.clone()) {
                Delivery::Queued => report.reached += 1,
                Delivery::Full => {
                    report.dropped += 1;
                    if event.kind.is_durable() {
                        warn!("Session {} of {} is backed up, dropped {:?}", session.id, user_id, event.kind);
                    } else {
                        debug!("Session {} of {} is backed up, dropped {:?}", session.id, user_id, event.kind);
                    }
                }
                Delivery::Closed => {
                    report.dropped += 1;
                    debug!("Session {} of {} is closed, unregistering", session.id, user_id);
                    self.registry.unregister(user_id, session.id).await;
                }
            }
        }

        report
    }
}

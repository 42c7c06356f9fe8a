use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::{DeleteOutcome, DeletedBatch, MessageRow, NewMessage};
use parley_types::events::{ChatEvent, MessageType};
use parley_types::models::{FILE_PREVIEW, Message, Payload, ReplySnapshot, escape_html};
use parley_types::now_millis;

use crate::error::{ChatError, ChatResult, blocking};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 100;
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;
/// Most distinct ids one bulk delete may name.
pub const MAX_DELETE_BATCH: usize = 500;

/// Locks not held by anyone are pruned once the map grows past this.
const LOCK_PRUNE_THRESHOLD: usize = 256;

/// One async mutex per key, created on demand.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                // Only the map holds these, and nobody can clone them while we
                // hold the map lock.
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A stored message with its read state as seen by the requester.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub message: Message,
    pub read: bool,
}

impl HistoryEntry {
    pub fn to_event(&self) -> ChatEvent {
        self.message.to_event().with_read(self.read)
    }
}

/// Decode a base64 attachment and enforce the size limit on the decoded
/// bytes. A `data:<mime>;base64,` prefix is accepted and stripped.
pub fn decode_attachment(encoded: &str, limit: usize) -> ChatResult<Vec<u8>> {
    let data = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(";base64,").map_or(rest, |(_, data)| data),
        None => encoded,
    }
    .trim();

    // Reject obviously oversized input before allocating for it.
    let upper_bound = data.len() / 4 * 3;
    if upper_bound > limit + 2 {
        return Err(ChatError::PayloadTooLarge { size: upper_bound, limit });
    }

    let bytes = B64
        .decode(data)
        .map_err(|_| ChatError::bad_request("attachment is not valid base64"))?;
    if bytes.len() > limit {
        return Err(ChatError::PayloadTooLarge { size: bytes.len(), limit });
    }
    Ok(bytes)
}

/// Persists messages and derives their read state.
///
/// Sequence numbers come from a per-conversation counter row updated inside
/// the insert transaction, so concurrent appends never share a sequence.
/// Callers that fan out after appending hold [`MessageStore::lock`] across
/// both steps so recipients observe conversation order.
pub struct MessageStore {
    db: Arc<Database>,
    locks: KeyedLocks,
    max_attachment_bytes: usize,
}

impl MessageStore {
    pub fn new(db: Arc<Database>, max_attachment_bytes: usize) -> Self {
        Self {
            db,
            locks: KeyedLocks::default(),
            max_attachment_bytes,
        }
    }

    pub fn max_attachment_bytes(&self) -> usize {
        self.max_attachment_bytes
    }

    /// Serialize writers of one conversation.
    pub async fn lock(&self, conversation_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(conversation_id).await
    }

    /// Build a file payload from its wire form.
    pub fn file_payload(&self, encoded: &str, mime: &str) -> ChatResult<Payload> {
        if mime.trim().is_empty() {
            return Err(ChatError::bad_request("file type is required"));
        }
        let bytes = decode_attachment(encoded, self.max_attachment_bytes)?;
        Ok(Payload::File { bytes, mime: mime.trim().to_string() })
    }

    fn validate(&self, payload: Payload) -> ChatResult<Payload> {
        match payload {
            Payload::Text(text) => {
                if text.trim().is_empty() {
                    return Err(ChatError::bad_request("message content cannot be empty"));
                }
                Ok(Payload::Text(escape_html(&text)))
            }
            Payload::File { bytes, mime } => {
                if bytes.is_empty() {
                    return Err(ChatError::bad_request("attachment is empty"));
                }
                if bytes.len() > self.max_attachment_bytes {
                    return Err(ChatError::PayloadTooLarge {
                        size: bytes.len(),
                        limit: self.max_attachment_bytes,
                    });
                }
                Ok(Payload::File { bytes, mime })
            }
        }
    }

    /// Assign the next sequence and persist. The sender's membership is
    /// checked by the caller.
    pub async fn append(
        &self,
        conversation_id: &str,
        sender_id: &str,
        payload: Payload,
        reply_to_id: Option<&str>,
    ) -> ChatResult<Message> {
        let payload = self.validate(payload)?;

        let reply_to = match reply_to_id.filter(|id| !id.is_empty()) {
            Some(reply_id) => Some(self.reply_snapshot(conversation_id, reply_id).await?),
            None => None,
        };

        let mut message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender: sender_id.to_string(),
            seq: 0,
            timestamp: 0,
            payload,
            reply_to,
        };

        let stored = message.clone();
        let sequenced = blocking(&self.db, move |db| {
            let (content, file_content, file_type) = match &stored.payload {
                Payload::Text(text) => (Some(text.as_str()), None, None),
                Payload::File { bytes, mime } => (None, Some(bytes.as_slice()), Some(mime.as_str())),
            };
            let preview = stored.payload.preview();
            db.insert_message(&NewMessage {
                id: &stored.id,
                conversation_id: &stored.conversation_id,
                sender_id: &stored.sender,
                kind: stored.payload.kind().as_str(),
                content,
                file_content,
                file_type,
                reply_to_id: stored.reply_to.as_ref().map(|r| r.id.as_str()),
                reply_to_content: stored.reply_to.as_ref().map(|r| r.content.as_str()),
                reply_to_sender: stored.reply_to.as_ref().map(|r| r.sender.as_str()),
                preview: &preview,
                now: now_millis(),
            })
        })
        .await?;

        message.seq = sequenced.seq;
        message.timestamp = sequenced.timestamp;
        Ok(message)
    }

    async fn reply_snapshot(&self, conversation_id: &str, reply_id: &str) -> ChatResult<ReplySnapshot> {
        let id = reply_id.to_string();
        let original = blocking(&self.db, move |db| db.get_message(&id))
            .await?
            .filter(|row| row.conversation_id == conversation_id)
            .ok_or_else(|| ChatError::not_found("replied message"))?;

        let content = if original.kind == MessageType::File.as_str() {
            FILE_PREVIEW.to_string()
        } else {
            original.content.unwrap_or_default()
        };

        Ok(ReplySnapshot {
            id: original.id,
            content,
            sender: original.sender_id,
        })
    }

    /// Newest `limit` messages in ascending order, with read state.
    pub async fn list(&self, conversation_id: &str, requester_id: &str, limit: u32) -> ChatResult<Vec<HistoryEntry>> {
        let limit = match limit {
            0 => DEFAULT_HISTORY_LIMIT,
            n => n.min(MAX_HISTORY_LIMIT),
        };

        let id = conversation_id.to_string();
        let (members, rows, markers) = blocking(&self.db, move |db| {
            let members = db.conversation_members(&id)?;
            let rows = db.recent_messages(&id, limit)?;
            let markers = db.read_markers(&id)?;
            Ok((members, rows, markers))
        })
        .await?;

        let members = members.ok_or_else(|| ChatError::not_found("conversation"))?;
        if !members.iter().any(|m| m == requester_id) {
            return Err(ChatError::forbidden("not a participant of this conversation"));
        }

        let watermarks: HashMap<String, i64> = markers.into_iter().collect();
        Ok(rows
            .into_iter()
            .map(|row| {
                let message = message_from_row(row);
                let read = is_read(&message, &members, &watermarks);
                HistoryEntry { message, read }
            })
            .collect())
    }

    /// Hard-delete messages. Only the sender may delete; one foreign id
    /// fails the whole request and nothing is removed. Unknown ids are skipped.
    pub async fn delete_by_ids(&self, ids: Vec<String>, requester_id: &str) -> ChatResult<Vec<DeletedBatch>> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = ids
            .into_iter()
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return Err(ChatError::bad_request("no message ids given"));
        }
        if ids.len() > MAX_DELETE_BATCH {
            return Err(ChatError::bad_request(format!(
                "at most {} message ids per request",
                MAX_DELETE_BATCH
            )));
        }

        let requester = requester_id.to_string();
        match blocking(&self.db, move |db| db.delete_messages(&ids, &requester)).await? {
            DeleteOutcome::Deleted(batches) => Ok(batches),
            DeleteOutcome::NotOwner => Err(ChatError::forbidden("only the sender can delete a message")),
        }
    }

    /// Move the reader's watermark up to the newest message in the
    /// conversation. Returns the stored value, which never decreases.
    ///
    /// Callers hold [`MessageStore::lock`] so no append can slip in between
    /// reading the newest timestamp and storing it.
    pub async fn mark_read(&self, conversation_id: &str, reader_id: &str) -> ChatResult<i64> {
        let id = conversation_id.to_string();
        let reader = reader_id.to_string();
        let stored = blocking(&self.db, move |db| {
            let Some(members) = db.conversation_members(&id)? else {
                return Ok(None);
            };
            if !members.contains(&reader) {
                return Ok(Some(None));
            }
            let newest = db.latest_message_at(&id)?.unwrap_or(0);
            Ok(Some(Some(db.advance_read_marker(&id, &reader, newest)?)))
        })
        .await?;

        match stored {
            None => Err(ChatError::not_found("conversation")),
            Some(None) => Err(ChatError::forbidden("not a participant of this conversation")),
            Some(Some(at)) => Ok(at),
        }
    }
}

/// Read once every participant other than the sender has a watermark at or
/// past the message.
fn is_read(message: &Message, members: &[String], watermarks: &HashMap<String, i64>) -> bool {
    members
        .iter()
        .filter(|m| **m != message.sender)
        .all(|m| watermarks.get(m).is_some_and(|at| *at >= message.timestamp))
}

pub(crate) fn message_from_row(row: MessageRow) -> Message {
    let payload = if row.kind == MessageType::File.as_str() {
        Payload::File {
            bytes: row.file_content.unwrap_or_default(),
            mime: row.file_type.unwrap_or_default(),
        }
    } else {
        Payload::Text(row.content.unwrap_or_default())
    };

    let reply_to = row.reply_to_id.map(|id| ReplySnapshot {
        id,
        content: row.reply_to_content.unwrap_or_default(),
        sender: row.reply_to_sender.unwrap_or_default(),
    });

    Message {
        id: row.id,
        conversation_id: row.conversation_id,
        sender: row.sender_id,
        seq: row.seq,
        timestamp: row.created_at,
        payload,
        reply_to,
    }
}

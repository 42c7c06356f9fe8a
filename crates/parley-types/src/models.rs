use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

use crate::events::{ChatEvent, MessageType};

/// Preview text used for attachments in conversation lists and reply snapshots.
pub const FILE_PREVIEW: &str = "Photo";

const PREVIEW_MAX_CHARS: usize = 100;

/// Prefix marking identifiers minted by an OAuth provider rather than a phone number.
const OAUTH_ID_PREFIX: &str = "google_";

/// Normalize a user identifier.
///
/// OAuth identifiers are kept as-is (trimmed). Everything else is treated as a
/// phone number and reduced to its ASCII digits, so "+1 (555) 010-2000" and
/// "15550102000" name the same user. Returns `None` when nothing is left.
pub fn normalize_user_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let normalized = if trimmed.starts_with(OAUTH_ID_PREFIX) {
        trimmed.to_string()
    } else {
        trimmed.chars().filter(|c| c.is_ascii_digit()).collect()
    };
    (!normalized.is_empty()).then_some(normalized)
}

/// Escape the characters that matter when text is rendered as HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

/// Truncate free text to the length kept in last-message caches.
pub fn truncate_preview(text: &str) -> String {
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}

/// Body of a persisted message: text XOR an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    File { bytes: Vec<u8>, mime: String },
}

impl Payload {
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Text(_) => MessageType::Chat,
            Self::File { .. } => MessageType::File,
        }
    }

    pub fn preview(&self) -> String {
        match self {
            Self::Text(text) => truncate_preview(text),
            Self::File { .. } => FILE_PREVIEW.to_string(),
        }
    }
}

/// Copy of the replied-to message taken when the reply was written.
/// Survives deletion of the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplySnapshot {
    pub id: String,
    pub content: String,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub seq: i64,
    pub timestamp: i64,
    pub payload: Payload,
    pub reply_to: Option<ReplySnapshot>,
}

impl Message {
    /// Render as the envelope delivered to clients.
    pub fn to_event(&self) -> ChatEvent {
        let mut event = ChatEvent::new(self.payload.kind(), self.timestamp);
        event.id = Some(self.id.clone());
        event.conversation_id = Some(self.conversation_id.clone());
        event.sender = Some(self.sender.clone());
        event.seq = Some(self.seq);

        match &self.payload {
            Payload::Text(text) => event.content = Some(text.clone()),
            Payload::File { bytes, mime } => {
                event.content = Some(String::new());
                event.file_content = Some(B64.encode(bytes));
                event.file_type = Some(mime.clone());
            }
        }

        if let Some(reply) = &self.reply_to {
            event.reply_to_id = Some(reply.id.clone());
            event.reply_to_content = Some(reply.content.clone());
            event.reply_to_sender = Some(reply.sender.clone());
        }

        event
    }
}

/// One-to-one conversation. `participant1 < participant2` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub participant1: String,
    pub participant2: String,
    pub created_at: i64,
    pub last_message_at: i64,
    pub last_message_preview: Option<String>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant1 == user_id || self.participant2 == user_id
    }

    /// The counterpart of `user_id`, or `None` if `user_id` is not a participant.
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        if self.participant1 == user_id {
            Some(&self.participant2)
        } else if self.participant2 == user_id {
            Some(&self.participant1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub creator: String,
    pub members: Vec<String>,
    pub created_at: i64,
    pub last_message_at: i64,
    pub last_message_preview: Option<String>,
    pub last_message_sender: Option<String>,
}

impl Group {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_phone_numbers_to_digits() {
        assert_eq!(normalize_user_id("+1 (555) 010-2000").as_deref(), Some("15550102000"));
        assert_eq!(normalize_user_id("  98765 "), Some("98765".to_string()));
        assert_eq!(normalize_user_id("abc"), None);
    }

    #[test]
    fn keeps_oauth_identifiers_verbatim() {
        assert_eq!(
            normalize_user_id(" google_ada@example.com ").as_deref(),
            Some("google_ada@example.com")
        );
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<b>hi</b> & 'yo'"), "&lt;b&gt;hi&lt;&#x2F;b&gt; &amp; &#x27;yo&#x27;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn file_payload_previews_as_photo() {
        let payload = Payload::File { bytes: vec![1, 2, 3], mime: "image/png".into() };
        assert_eq!(payload.preview(), FILE_PREVIEW);
        assert_eq!(payload.kind(), MessageType::File);
    }

    #[test]
    fn text_preview_is_truncated() {
        let long = "x".repeat(250);
        assert_eq!(Payload::Text(long).preview().chars().count(), 100);
    }

    #[test]
    fn message_event_carries_reply_snapshot_and_base64_file() {
        let msg = Message {
            id: "m2".into(),
            conversation_id: "c1".into(),
            sender: "111111".into(),
            seq: 2,
            timestamp: 1_700_000_000_000,
            payload: Payload::File { bytes: b"hi".to_vec(), mime: "image/jpeg".into() },
            reply_to: Some(ReplySnapshot {
                id: "m1".into(),
                content: "original".into(),
                sender: "222222".into(),
            }),
        };

        let event = msg.to_event();
        assert_eq!(event.kind, MessageType::File);
        assert_eq!(event.file_content.as_deref(), Some("aGk="));
        assert_eq!(event.reply_to_content.as_deref(), Some("original"));
        assert_eq!(event.seq, Some(2));
    }

    #[test]
    fn other_participant_is_symmetric() {
        let conv = Conversation {
            id: "c".into(),
            participant1: "111111".into(),
            participant2: "222222".into(),
            created_at: 0,
            last_message_at: 0,
            last_message_preview: None,
        };
        assert_eq!(conv.other_participant("111111"), Some("222222"));
        assert_eq!(conv.other_participant("222222"), Some("111111"));
        assert_eq!(conv.other_participant("333333"), None);
    }
}

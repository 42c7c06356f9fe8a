use serde::{Deserialize, Serialize};

/// Kind tag of every envelope on the real-time channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Chat,
    Join,
    Leave,
    Typing,
    File,
    Deleted,
    Read,
    /// Accepted on the wire for older clients. Delivery is reported through
    /// `status` on acks and history instead.
    Delivered,
    /// A command on the socket failed; carries the client's `clientRef`.
    Error,
}

impl MessageType {
    /// Durable kinds are persisted in the message store; the rest are signals.
    pub fn is_durable(self) -> bool {
        matches!(self, Self::Chat | Self::File)
    }

    /// Tag stored in the `messages.kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Join => "JOIN",
            Self::Leave => "LEAVE",
            Self::Typing => "TYPING",
            Self::File => "FILE",
            Self::Deleted => "DELETED",
            Self::Read => "READ",
            Self::Delivered => "DELIVERED",
            Self::Error => "ERROR",
        }
    }
}

/// Sender-side view of a message's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// Envelope pushed to a user's private queue, and the shape of message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Base64 attachment bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_sender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    /// Only set on history entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl ChatEvent {
    pub fn new(kind: MessageType, timestamp: i64) -> Self {
        Self {
            kind,
            id: None,
            content: None,
            sender: None,
            conversation_id: None,
            file_content: None,
            file_type: None,
            timestamp,
            seq: None,
            message_ids: Vec::new(),
            reply_to_id: None,
            reply_to_content: None,
            reply_to_sender: None,
            status: None,
            read: None,
            client_ref: None,
        }
    }

    pub fn typing(conversation_id: &str, sender: &str, timestamp: i64) -> Self {
        let mut event = Self::new(MessageType::Typing, timestamp);
        event.conversation_id = Some(conversation_id.to_string());
        event.sender = Some(sender.to_string());
        event
    }

    /// `timestamp` is the reader's new watermark.
    pub fn read(conversation_id: &str, reader: &str, timestamp: i64) -> Self {
        let mut event = Self::new(MessageType::Read, timestamp);
        event.conversation_id = Some(conversation_id.to_string());
        event.sender = Some(reader.to_string());
        event
    }

    pub fn deleted(conversation_id: &str, sender: &str, ids: Vec<String>, timestamp: i64) -> Self {
        let mut event = Self::new(MessageType::Deleted, timestamp);
        event.conversation_id = Some(conversation_id.to_string());
        event.sender = Some(sender.to_string());
        event.message_ids = ids;
        event
    }

    pub fn presence(user_id: &str, online: bool, timestamp: i64) -> Self {
        let kind = if online { MessageType::Join } else { MessageType::Leave };
        let mut event = Self::new(kind, timestamp);
        event.sender = Some(user_id.to_string());
        event
    }

    pub fn error(message: impl Into<String>, client_ref: Option<String>, timestamp: i64) -> Self {
        let mut event = Self::new(MessageType::Error, timestamp);
        event.content = Some(message.into());
        event.client_ref = client_ref;
        event
    }

    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Mark a history entry with its derived read state.
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self.status = Some(if read { DeliveryStatus::Read } else { DeliveryStatus::Sent });
        self
    }

    pub fn with_client_ref(mut self, client_ref: Option<String>) -> Self {
        self.client_ref = client_ref;
        self
    }
}

/// Commands sent FROM client TO server over the WebSocket, addressed like the
/// publish endpoints the web client uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "destination")]
pub enum ClientCommand {
    #[serde(rename = "chat.sendMessage", rename_all = "camelCase")]
    SendMessage {
        conversation_id: String,
        content: String,
        #[serde(default)]
        reply_to_id: Option<String>,
        #[serde(default)]
        client_ref: Option<String>,
    },

    #[serde(rename = "chat.sendFile", rename_all = "camelCase")]
    SendFile {
        conversation_id: String,
        file_content: String,
        file_type: String,
        #[serde(default)]
        reply_to_id: Option<String>,
        #[serde(default)]
        client_ref: Option<String>,
    },

    #[serde(rename = "chat.typing", rename_all = "camelCase")]
    Typing { conversation_id: String },

    #[serde(rename = "chat.read", rename_all = "camelCase")]
    Read { conversation_id: String },
}

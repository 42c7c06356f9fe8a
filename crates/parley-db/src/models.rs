//! Database row types. These map directly to SQLite rows and stay independent
//! of the wire and domain types in parley-types. All timestamps are epoch ms.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub password: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub participant1: String,
    pub participant2: String,
    pub created_at: i64,
    pub last_message_at: i64,
    pub last_message_preview: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub seq: i64,
    pub sender_id: String,
    pub kind: String,
    pub content: Option<String>,
    pub file_content: Option<Vec<u8>>,
    pub file_type: Option<String>,
    pub reply_to_id: Option<String>,
    pub reply_to_content: Option<String>,
    pub reply_to_sender: Option<String>,
    pub created_at: i64,
}

/// Insert parameters for a message. Sequence and timestamp are assigned by
/// `Database::insert_message`.
#[derive(Debug)]
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub conversation_id: &'a str,
    pub sender_id: &'a str,
    pub kind: &'a str,
    pub content: Option<&'a str>,
    pub file_content: Option<&'a [u8]>,
    pub file_type: Option<&'a str>,
    pub reply_to_id: Option<&'a str>,
    pub reply_to_content: Option<&'a str>,
    pub reply_to_sender: Option<&'a str>,
    /// Text cached as the conversation's last-message preview.
    pub preview: &'a str,
    pub now: i64,
}

/// Position assigned to a freshly inserted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequenced {
    pub seq: i64,
    pub timestamp: i64,
}

/// Ids removed from one conversation by a bulk delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedBatch {
    pub conversation_id: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(Vec<DeletedBatch>),
    /// At least one existing id belongs to someone else; nothing was removed.
    NotOwner,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub creator: String,
    pub created_at: i64,
    pub last_message_at: i64,
    pub last_message_preview: Option<String>,
    pub last_message_sender: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StatusRow {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub content: Option<String>,
    pub image_base64: Option<String>,
    pub image_type: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: Option<String>,
    pub image_base64: Option<String>,
    pub image_type: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub created_at: i64,
}

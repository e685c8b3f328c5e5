//! Conversation and Message domain types.
//!
//! A conversation belongs to one owner and holds an ordered sequence of
//! messages. Assistant messages carry the ids of the records that were
//! retrieved as context for the turn that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::{OwnerId, RecordId};

/// Title given to conversations created without one.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Maximum number of characters kept when deriving a title.
pub const TITLE_MAX_CHARS: usize = 50;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Instruction block sent to the model; never persisted
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ids of the records that were retrieved as context for a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<RecordId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<RecordId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finance: Option<Vec<RecordId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing: Option<Vec<RecordId>>,
}

/// A single persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: RecordId,

    /// Owning conversation
    pub conversation_id: RecordId,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    pub created_at: DateTime<Utc>,

    /// Total tokens reported by the model for the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,

    /// Model that produced the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    /// Records retrieved as context for this reply
    #[serde(default)]
    pub context: ContextRefs,

    /// 1–5 star rating, assistant messages only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<String>,
}

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: RecordId,
    pub role: Role,
    pub content: String,
    pub tokens_used: Option<u32>,
    pub model_used: Option<String>,
    pub context: ContextRefs,
}

impl NewMessage {
    /// A plain user message.
    pub fn user(conversation_id: RecordId, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            role: Role::User,
            content: content.into(),
            tokens_used: None,
            model_used: None,
            context: ContextRefs::default(),
        }
    }

    /// An assistant reply with its context references.
    pub fn assistant(
        conversation_id: RecordId,
        content: impl Into<String>,
        tokens_used: Option<u32>,
        model_used: Option<String>,
        context: ContextRefs,
    ) -> Self {
        Self {
            conversation_id,
            role: Role::Assistant,
            content: content.into(),
            tokens_used,
            model_used,
            context,
        }
    }
}

/// A conversation between one owner and the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub title: String,
    pub archived: bool,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    /// Bumped on every new message; never earlier than `created_at`
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether the title is still the placeholder given at creation.
    pub fn has_placeholder_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

/// Partial update of a conversation. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Per-owner usage figures for the assistant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatStatistics {
    pub total_conversations: u64,
    pub total_messages: u64,
    pub avg_messages_per_conversation: f64,
    pub total_tokens_used: u64,
    pub most_used_model: Option<String>,
    pub avg_user_rating: Option<f64>,
}

/// Derive a conversation title from the first user message.
///
/// Keeps the first [`TITLE_MAX_CHARS`] characters and appends `...` when the
/// message was longer.
pub fn derive_title(first_message: &str) -> String {
    let mut title: String = first_message
        .chars()
        .take(TITLE_MAX_CHARS)
        .collect::<String>()
        .trim()
        .to_string();
    if first_message.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

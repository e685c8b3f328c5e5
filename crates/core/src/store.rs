//! Store traits: the narrow contracts the assistant reads and writes through.
//!
//! `DomainStore` covers the four owner-scoped record collections;
//! `ConversationStore` persists conversations and their messages.
//!
//! Implementations: SQLite (sqlx) and in-memory (for testing).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::message::{ChatStatistics, Conversation, ConversationUpdate, Message, NewMessage};
use crate::records::{
    Campaign, Document, FinanceRecord, NewCampaign, NewDocument, NewFinanceRecord, NewTask,
    OwnerId, RecordId, Task,
};

type Result<T> = std::result::Result<T, StoreError>;

/// Filtered, most-recent-first listing of one domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    /// Maximum number of records returned
    pub limit: usize,

    /// Only records created at or after this instant (finance: dated on or after its day)
    pub since: Option<DateTime<Utc>>,

    /// Case-insensitive substring that must occur in one of the domain's text fields
    pub text: Option<String>,
}

impl ListQuery {
    /// The `limit` most recent records.
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Records whose text fields contain `text`.
    pub fn matching(text: impl Into<String>, limit: usize) -> Self {
        Self {
            limit,
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Records created since `cutoff`.
    pub fn since(cutoff: DateTime<Utc>, limit: usize) -> Self {
        Self {
            limit,
            since: Some(cutoff),
            ..Self::default()
        }
    }
}

/// The owner-scoped domain collections.
///
/// Text matching for [`ListQuery::text`] covers: tasks title/description/
/// category, finance description/category, documents title/content/type,
/// campaigns name/description/platform.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    async fn list_tasks(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Task>>;

    /// Finance records are ordered by their own date, newest first.
    async fn list_finance(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<FinanceRecord>>;

    async fn list_documents(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Document>>;

    async fn list_campaigns(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Campaign>>;

    async fn create_task(&self, owner: OwnerId, task: NewTask) -> Result<Task>;

    /// Create several tasks in a single commit; either all are stored or none.
    async fn create_tasks(&self, owner: OwnerId, tasks: Vec<NewTask>) -> Result<Vec<Task>>;

    async fn create_finance_record(
        &self,
        owner: OwnerId,
        record: NewFinanceRecord,
    ) -> Result<FinanceRecord>;

    /// All finance records dated within `[start, end]`, inclusive.
    async fn finance_between(
        &self,
        owner: OwnerId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FinanceRecord>>;

    async fn create_document(&self, owner: OwnerId, document: NewDocument) -> Result<Document>;

    async fn create_campaign(&self, owner: OwnerId, campaign: NewCampaign) -> Result<Campaign>;

    /// A campaign, only if it belongs to `owner`.
    async fn get_campaign(&self, owner: OwnerId, id: RecordId) -> Result<Option<Campaign>>;
}

/// Persistence for conversations and messages.
///
/// Lookups taking an `owner` return `None` for conversations that are absent
/// or belong to someone else.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(
        &self,
        owner: OwnerId,
        title: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Conversation>;

    async fn get_conversation(&self, owner: OwnerId, id: RecordId)
    -> Result<Option<Conversation>>;

    /// Ordered by `updated_at`, most recent first.
    async fn list_conversations(
        &self,
        owner: OwnerId,
        include_archived: bool,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>>;

    /// Apply a partial update and bump `updated_at`.
    async fn update_conversation(
        &self,
        owner: OwnerId,
        id: RecordId,
        update: ConversationUpdate,
    ) -> Result<Option<Conversation>>;

    /// Delete a conversation and all its messages. Returns false if nothing matched.
    async fn delete_conversation(&self, owner: OwnerId, id: RecordId) -> Result<bool>;

    /// Oldest first.
    async fn list_messages(
        &self,
        conversation_id: RecordId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// The last `limit` messages of a conversation, oldest first.
    async fn recent_messages(&self, conversation_id: RecordId, limit: usize)
    -> Result<Vec<Message>>;

    /// Persist a user message and the assistant reply in one commit.
    ///
    /// Bumps the conversation's `updated_at` and, when `title` is given,
    /// replaces its title if it is still the placeholder at commit time.
    async fn record_turn(
        &self,
        user: NewMessage,
        reply: NewMessage,
        title: Option<String>,
    ) -> Result<(Message, Message)>;

    /// A message, only if its conversation belongs to `owner`.
    async fn get_message(&self, owner: OwnerId, message_id: RecordId) -> Result<Option<Message>>;

    async fn set_feedback(
        &self,
        message_id: RecordId,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<Message>;

    async fn statistics(&self, owner: OwnerId) -> Result<ChatStatistics>;
}

//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use bizpilot_core::error::StoreError;
use bizpilot_core::message::{
    ChatStatistics, Conversation, ConversationUpdate, Message, NewMessage, round2,
};
use bizpilot_core::records::*;
use bizpilot_core::store::{ConversationStore, DomainStore, ListQuery};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::any_contains;

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Default)]
struct State {
    next_id: RecordId,
    tasks: Vec<Task>,
    finance: Vec<FinanceRecord>,
    documents: Vec<Document>,
    campaigns: Vec<Campaign>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

impl State {
    fn next_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }

    fn owns_conversation(&self, owner: OwnerId, id: RecordId) -> bool {
        self.conversations
            .iter()
            .any(|c| c.id == id && c.owner_id == owner)
    }
}

/// A store that keeps every collection in a Vec behind one lock.
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner filter, `since` filter, text filter, newest first, limit.
fn select<T: Clone, K: Ord>(
    items: &[T],
    owner: OwnerId,
    query: &ListQuery,
    owner_of: impl Fn(&T) -> OwnerId,
    recent_enough: impl Fn(&T) -> bool,
    matches: impl Fn(&T, &str) -> bool,
    sort_key: impl Fn(&T) -> K,
) -> Vec<T> {
    let mut hits: Vec<T> = items
        .iter()
        .filter(|item| owner_of(item) == owner)
        .filter(|item| query.since.is_none() || recent_enough(item))
        .filter(|item| query.text.as_deref().is_none_or(|t| matches(item, t)))
        .cloned()
        .collect();
    hits.sort_by_key(|item| std::cmp::Reverse(sort_key(item)));
    hits.truncate(query.limit);
    hits
}

#[async_trait]
impl DomainStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn list_tasks(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Task>> {
        let state = self.state.read().await;
        let since = query.since;
        Ok(select(
            &state.tasks,
            owner,
            query,
            |t| t.owner_id,
            |t| since.is_some_and(|s| t.created_at >= s),
            |t, needle| {
                any_contains(
                    needle,
                    &[Some(t.title.as_str()), t.description.as_deref(), t.category.as_deref()],
                )
            },
            |t| (t.created_at, t.id),
        ))
    }

    async fn list_finance(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<FinanceRecord>> {
        let state = self.state.read().await;
        let since = query.since.map(|s| s.date_naive());
        Ok(select(
            &state.finance,
            owner,
            query,
            |r| r.owner_id,
            |r| since.is_some_and(|s| r.date >= s),
            |r, needle| any_contains(needle, &[r.description.as_deref(), r.category.as_deref()]),
            |r| (r.date, r.id),
        ))
    }

    async fn list_documents(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        let since = query.since;
        Ok(select(
            &state.documents,
            owner,
            query,
            |d| d.owner_id,
            |d| since.is_some_and(|s| d.created_at >= s),
            |d, needle| {
                any_contains(
                    needle,
                    &[Some(d.title.as_str()), d.content.as_deref(), d.doc_type.as_deref()],
                )
            },
            |d| (d.created_at, d.id),
        ))
    }

    async fn list_campaigns(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let since = query.since;
        Ok(select(
            &state.campaigns,
            owner,
            query,
            |c| c.owner_id,
            |c| since.is_some_and(|s| c.created_at >= s),
            |c, needle| {
                any_contains(
                    needle,
                    &[Some(c.name.as_str()), c.description.as_deref(), c.platform.as_deref()],
                )
            },
            |c| (c.created_at, c.id),
        ))
    }

    async fn create_task(&self, owner: OwnerId, task: NewTask) -> Result<Task> {
        let mut created = self.create_tasks(owner, vec![task]).await?;
        created
            .pop()
            .ok_or_else(|| StoreError::Storage("task was not created".into()))
    }

    async fn create_tasks(&self, owner: OwnerId, tasks: Vec<NewTask>) -> Result<Vec<Task>> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let created: Vec<Task> = tasks
            .into_iter()
            .map(|t| Task {
                id: state.next_id(),
                owner_id: owner,
                title: t.title,
                description: t.description,
                priority: t.priority,
                status: TaskStatus::Todo,
                due_date: t.due_date,
                category: t.category,
                ai_suggested: t.ai_suggested,
                created_at: now,
            })
            .collect();
        state.tasks.extend(created.iter().cloned());
        Ok(created)
    }

    async fn create_finance_record(
        &self,
        owner: OwnerId,
        record: NewFinanceRecord,
    ) -> Result<FinanceRecord> {
        let mut state = self.state.write().await;
        let record = FinanceRecord {
            id: state.next_id(),
            owner_id: owner,
            date: record.date,
            amount: record.amount,
            kind: record.kind,
            description: record.description,
            category: record.category,
            created_at: Utc::now(),
        };
        state.finance.push(record.clone());
        Ok(record)
    }

    async fn finance_between(
        &self,
        owner: OwnerId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FinanceRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<FinanceRecord> = state
            .finance
            .iter()
            .filter(|r| r.owner_id == owner && r.date >= start && r.date <= end)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.date, r.id));
        Ok(records)
    }

    async fn create_document(&self, owner: OwnerId, document: NewDocument) -> Result<Document> {
        let mut state = self.state.write().await;
        let document = Document {
            id: state.next_id(),
            owner_id: owner,
            title: document.title,
            content: document.content,
            doc_type: document.doc_type,
            variables: document.variables,
            created_at: Utc::now(),
        };
        state.documents.push(document.clone());
        Ok(document)
    }

    async fn create_campaign(&self, owner: OwnerId, campaign: NewCampaign) -> Result<Campaign> {
        let mut state = self.state.write().await;
        let campaign = Campaign {
            id: state.next_id(),
            owner_id: owner,
            name: campaign.name,
            description: campaign.description,
            platform: campaign.platform,
            content_type: campaign.content_type,
            target_audience: campaign.target_audience,
            budget: campaign.budget,
            status: CampaignStatus::Draft,
            ai_generated: campaign.ai_generated,
            created_at: Utc::now(),
        };
        state.campaigns.push(campaign.clone());
        Ok(campaign)
    }

    async fn get_campaign(&self, owner: OwnerId, id: RecordId) -> Result<Option<Campaign>> {
        let state = self.state.read().await;
        Ok(state
            .campaigns
            .iter()
            .find(|c| c.id == id && c.owner_id == owner)
            .cloned())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(
        &self,
        owner: OwnerId,
        title: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Conversation> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let conversation = Conversation {
            id: state.next_id(),
            owner_id: owner,
            title: title.to_string(),
            archived: false,
            metadata,
            created_at: now,
            updated_at: now,
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        owner: OwnerId,
        id: RecordId,
    ) -> Result<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .iter()
            .find(|c| c.id == id && c.owner_id == owner)
            .cloned())
    }

    async fn list_conversations(
        &self,
        owner: OwnerId,
        include_archived: bool,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut conversations: Vec<Conversation> = state
            .conversations
            .iter()
            .filter(|c| c.owner_id == owner && (include_archived || !c.archived))
            .cloned()
            .collect();
        conversations.sort_by_key(|c| std::cmp::Reverse((c.updated_at, c.id)));
        Ok(conversations.into_iter().skip(skip).take(limit).collect())
    }

    async fn update_conversation(
        &self,
        owner: OwnerId,
        id: RecordId,
        update: ConversationUpdate,
    ) -> Result<Option<Conversation>> {
        let mut state = self.state.write().await;
        let Some(conversation) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == id && c.owner_id == owner)
        else {
            return Ok(None);
        };
        if let Some(title) = update.title {
            conversation.title = title;
        }
        if let Some(archived) = update.archived {
            conversation.archived = archived;
        }
        if let Some(metadata) = update.metadata {
            conversation.metadata = metadata;
        }
        conversation.updated_at = Utc::now().max(conversation.created_at);
        Ok(Some(conversation.clone()))
    }

    async fn delete_conversation(&self, owner: OwnerId, id: RecordId) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.owns_conversation(owner, id) {
            return Ok(false);
        }
        state.conversations.retain(|c| c.id != id);
        state.messages.retain(|m| m.conversation_id != id);
        Ok(true)
    }

    async fn list_messages(
        &self,
        conversation_id: RecordId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_messages(
        &self,
        conversation_id: RecordId,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let all: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].iter().map(|m| (*m).clone()).collect())
    }

    async fn record_turn(
        &self,
        user: NewMessage,
        reply: NewMessage,
        title: Option<String>,
    ) -> Result<(Message, Message)> {
        let mut state = self.state.write().await;
        let conversation_id = user.conversation_id;
        if !state.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(StoreError::NotFound {
                entity: "conversation",
                id: conversation_id,
            });
        }

        let now = Utc::now();
        let mut persist = |m: NewMessage| Message {
            id: state.next_id(),
            conversation_id: m.conversation_id,
            role: m.role,
            content: m.content,
            created_at: now,
            tokens_used: m.tokens_used,
            model_used: m.model_used,
            context: m.context,
            user_rating: None,
            user_feedback: None,
        };
        let user = persist(user);
        let reply = persist(reply);
        state.messages.push(user.clone());
        state.messages.push(reply.clone());

        if let Some(conversation) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conversation.updated_at = now.max(conversation.created_at);
            if let Some(title) = title.filter(|_| conversation.has_placeholder_title()) {
                conversation.title = title;
            }
        }
        Ok((user, reply))
    }

    async fn get_message(&self, owner: OwnerId, message_id: RecordId) -> Result<Option<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .find(|m| m.id == message_id && state.owns_conversation(owner, m.conversation_id))
            .cloned())
    }

    async fn set_feedback(
        &self,
        message_id: RecordId,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<Message> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(StoreError::NotFound {
                entity: "message",
                id: message_id,
            })?;
        message.user_rating = Some(rating);
        message.user_feedback = feedback;
        Ok(message.clone())
    }

    async fn statistics(&self, owner: OwnerId) -> Result<ChatStatistics> {
        let state = self.state.read().await;
        let conversations = state
            .conversations
            .iter()
            .filter(|c| c.owner_id == owner)
            .count();
        let messages: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| state.owns_conversation(owner, m.conversation_id))
            .collect();

        let mut model_uses: HashMap<&str, usize> = HashMap::new();
        for model in messages.iter().filter_map(|m| m.model_used.as_deref()) {
            *model_uses.entry(model).or_default() += 1;
        }
        let most_used_model = model_uses
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(model, _)| model.to_string());

        let ratings: Vec<f64> = messages
            .iter()
            .filter_map(|m| m.user_rating.map(f64::from))
            .collect();

        Ok(ChatStatistics {
            total_conversations: conversations as u64,
            total_messages: messages.len() as u64,
            avg_messages_per_conversation: if conversations > 0 {
                round2(messages.len() as f64 / conversations as f64)
            } else {
                0.0
            },
            total_tokens_used: messages
                .iter()
                .filter_map(|m| m.tokens_used.map(u64::from))
                .sum(),
            most_used_model,
            avg_user_rating: (!ratings.is_empty())
                .then(|| round2(ratings.iter().sum::<f64>() / ratings.len() as f64)),
        })
    }
}

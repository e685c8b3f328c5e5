//! The chat service: one assistant turn end to end, plus conversation
//! management, feedback, statistics and the action/search entry points.
//!
//! A turn runs: retrieve context → assemble prompt → invoke model → record
//! both messages in one commit → parse suggested actions from the reply.
//! Actions are only executed when the caller asks for it.

use std::sync::Arc;

use bizpilot_config::{AssistantConfig, LlmConfig};
use bizpilot_core::action::{ActionRequest, ActionResult};
use bizpilot_core::error::StoreError;
use bizpilot_core::message::{
    ChatStatistics, Conversation, ConversationUpdate, DEFAULT_TITLE, Message, NewMessage, Role,
    derive_title,
};
use bizpilot_core::provider::Provider;
use bizpilot_core::records::{OwnerId, RecordId};
use bizpilot_core::store::{ConversationStore, DomainStore};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::actions::{ActionDispatcher, parse_actions};
use crate::intent::{IntentMatch, detect_intent};
use crate::invoker::ModelInvoker;
use crate::prompt::PromptAssembler;
use crate::relevance::{KeywordScorer, RelevanceScorer};
use crate::retriever::{ContextRetriever, RetrievalWindows};
use crate::search::{DomainGroups, MAX_ACTIVITY_DAYS, SearchResults, SearchService};

/// Longest accepted user message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

pub const DEFAULT_CONVERSATION_LIMIT: usize = 50;
pub const DEFAULT_MESSAGE_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("conversation {0} not found")]
    ConversationNotFound(RecordId),

    #[error("message {0} not found")]
    MessageNotFound(RecordId),

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(i64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound {
                entity: "conversation",
                id,
            } => ChatError::ConversationNotFound(id),
            StoreError::NotFound {
                entity: "message",
                id,
            } => ChatError::MessageNotFound(id),
            other => ChatError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// Everything one turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub conversation_id: RecordId,
    pub user_message: Message,
    /// The assistant message, with its context references
    pub message: Message,
    /// Directives found in the reply, not yet executed
    pub suggested_actions: Vec<ActionRequest>,
    pub intent: IntentMatch,
}

/// A conversation with its messages, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

pub struct ChatService {
    conversations: Arc<dyn ConversationStore>,
    retriever: ContextRetriever,
    prompt: PromptAssembler,
    invoker: ModelInvoker,
    dispatcher: ActionDispatcher,
    search: SearchService,
    history_window: usize,
}

impl ChatService {
    pub fn new(
        domain: Arc<dyn DomainStore>,
        conversations: Arc<dyn ConversationStore>,
        provider: Arc<dyn Provider>,
        llm: &LlmConfig,
        assistant: &AssistantConfig,
    ) -> Self {
        Self::with_scorer(
            domain,
            conversations,
            ModelInvoker::from_config(provider, llm),
            Arc::new(KeywordScorer),
            assistant,
        )
    }

    /// Assemble the service around a prepared invoker and a relevance scorer.
    pub fn with_scorer(
        domain: Arc<dyn DomainStore>,
        conversations: Arc<dyn ConversationStore>,
        invoker: ModelInvoker,
        scorer: Arc<dyn RelevanceScorer>,
        assistant: &AssistantConfig,
    ) -> Self {
        Self {
            conversations,
            retriever: ContextRetriever::new(
                domain.clone(),
                scorer.clone(),
                RetrievalWindows::from(assistant),
            ),
            prompt: PromptAssembler::from(assistant),
            invoker,
            dispatcher: ActionDispatcher::with_builtin(domain.clone()),
            search: SearchService::new(domain, scorer),
            history_window: assistant.history_window,
        }
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn model(&self) -> &str {
        self.invoker.model()
    }

    // ── Turns ─────────────────────────────────────────────────────────────

    /// Run one assistant turn and return the stored assistant message.
    pub async fn send_message(
        &self,
        owner: OwnerId,
        conversation_id: Option<RecordId>,
        text: &str,
    ) -> Result<Message> {
        Ok(self.turn(owner, conversation_id, text).await?.message)
    }

    /// Run one assistant turn.
    ///
    /// Without a `conversation_id` a new conversation is started, titled from
    /// `text`. A conversation still carrying the default title takes its
    /// title from this message; other titles are left alone.
    pub async fn turn(
        &self,
        owner: OwnerId,
        conversation_id: Option<RecordId>,
        text: &str,
    ) -> Result<ChatReply> {
        validate_message(text)?;

        let (conversation, new_title) = match conversation_id {
            Some(id) => {
                let conversation = self
                    .conversations
                    .get_conversation(owner, id)
                    .await?
                    .ok_or(ChatError::ConversationNotFound(id))?;
                let title = conversation
                    .has_placeholder_title()
                    .then(|| derive_title(text));
                (conversation, title)
            }
            None => {
                let conversation = self
                    .conversations
                    .create_conversation(owner, &derive_title(text), Map::new())
                    .await?;
                (conversation, None)
            }
        };

        let history = self
            .conversations
            .recent_messages(conversation.id, self.history_window)
            .await?;
        let bundle = self.retriever.retrieve(owner, text).await;
        let turns = self.prompt.build(&bundle, &history, text);
        debug!(
            owner,
            conversation = conversation.id,
            history = history.len(),
            context_items = bundle.len(),
            "Prompt assembled"
        );

        let invocation = self.invoker.invoke(turns).await;
        let fallback = invocation.is_fallback();

        let (user_message, message) = self
            .conversations
            .record_turn(
                NewMessage::user(conversation.id, text),
                NewMessage::assistant(
                    conversation.id,
                    invocation.content,
                    invocation.tokens_used,
                    invocation.model_used,
                    bundle.refs(),
                ),
                new_title,
            )
            .await?;

        let suggested_actions = parse_actions(&message.content);
        let intent = detect_intent(text);
        info!(
            owner,
            conversation = conversation.id,
            message = message.id,
            tokens = ?message.tokens_used,
            fallback,
            actions = suggested_actions.len(),
            intent = %intent.intent,
            "Assistant turn recorded"
        );

        Ok(ChatReply {
            conversation_id: conversation.id,
            user_message,
            message,
            suggested_actions,
            intent,
        })
    }

    // ── Conversations ─────────────────────────────────────────────────────

    pub async fn create_conversation(
        &self,
        owner: OwnerId,
        title: Option<&str>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Conversation> {
        let title = title.map(str::trim).filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TITLE);
        let conversation = self
            .conversations
            .create_conversation(owner, title, metadata.unwrap_or_default())
            .await?;
        info!(owner, conversation = conversation.id, "Conversation created");
        Ok(conversation)
    }

    pub async fn list_conversations(
        &self,
        owner: OwnerId,
        include_archived: bool,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        Ok(self
            .conversations
            .list_conversations(owner, include_archived, skip, limit)
            .await?)
    }

    /// A conversation with all its messages.
    pub async fn get_conversation(&self, owner: OwnerId, id: RecordId) -> Result<ConversationDetail> {
        let conversation = self.owned_conversation(owner, id).await?;
        let messages = self
            .conversations
            .list_messages(id, 0, usize::MAX)
            .await?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    pub async fn update_conversation(
        &self,
        owner: OwnerId,
        id: RecordId,
        update: ConversationUpdate,
    ) -> Result<Conversation> {
        if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ChatError::InvalidInput("title must not be empty".into()));
        }
        self.conversations
            .update_conversation(owner, id, update)
            .await?
            .ok_or(ChatError::ConversationNotFound(id))
    }

    pub async fn delete_conversation(&self, owner: OwnerId, id: RecordId) -> Result<()> {
        if !self.conversations.delete_conversation(owner, id).await? {
            return Err(ChatError::ConversationNotFound(id));
        }
        info!(owner, conversation = id, "Conversation deleted");
        Ok(())
    }

    /// Messages of an owned conversation, oldest first.
    pub async fn list_messages(
        &self,
        owner: OwnerId,
        conversation_id: RecordId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.owned_conversation(owner, conversation_id).await?;
        Ok(self
            .conversations
            .list_messages(conversation_id, skip, limit)
            .await?)
    }

    async fn owned_conversation(&self, owner: OwnerId, id: RecordId) -> Result<Conversation> {
        self.conversations
            .get_conversation(owner, id)
            .await?
            .ok_or(ChatError::ConversationNotFound(id))
    }

    // ── Feedback & statistics ─────────────────────────────────────────────

    /// Rate an assistant message in one of the owner's conversations.
    pub async fn rate_message(
        &self,
        owner: OwnerId,
        message_id: RecordId,
        rating: i64,
        feedback: Option<String>,
    ) -> Result<Message> {
        let rating = u8::try_from(rating)
            .ok()
            .filter(|r| (1..=5).contains(r))
            .ok_or(ChatError::InvalidRating(rating))?;

        let message = self
            .conversations
            .get_message(owner, message_id)
            .await?
            .filter(|m| m.role == Role::Assistant)
            .ok_or(ChatError::MessageNotFound(message_id))?;

        let rated = self
            .conversations
            .set_feedback(message.id, rating, feedback)
            .await?;
        info!(owner, message = message_id, rating, "Message rated");
        Ok(rated)
    }

    pub async fn statistics(&self, owner: OwnerId) -> Result<ChatStatistics> {
        Ok(self.conversations.statistics(owner).await?)
    }

    // ── Actions & search ──────────────────────────────────────────────────

    pub async fn execute_action(&self, owner: OwnerId, tag: &str, params: &[String]) -> ActionResult {
        self.dispatcher.execute(owner, tag, params).await
    }

    pub async fn execute_actions(&self, owner: OwnerId, requests: &[ActionRequest]) -> Vec<ActionResult> {
        self.dispatcher.execute_all(owner, requests).await
    }

    pub async fn search(
        &self,
        owner: OwnerId,
        query: &str,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<SearchResults> {
        Ok(self.search.search(owner, query, domain, limit).await?)
    }

    pub async fn recent_activity(&self, owner: OwnerId, days: i64, limit: usize) -> Result<DomainGroups> {
        if !(0..=MAX_ACTIVITY_DAYS).contains(&days) {
            return Err(ChatError::InvalidInput(format!(
                "days must be between 0 and {MAX_ACTIVITY_DAYS}, got {days}"
            )));
        }
        Ok(self.search.recent_activity(owner, days, limit).await?)
    }
}

fn validate_message(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(ChatError::InvalidInput("message must not be empty".into()));
    }
    let chars = text.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(ChatError::InvalidInput(format!(
            "message is {chars} characters long, the limit is {MAX_MESSAGE_CHARS}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingProvider, HangingProvider, SequentialMockProvider};
    use bizpilot_core::action::ActionType;
    use bizpilot_core::error::ProviderError;
    use bizpilot_core::records::NewTask;
    use bizpilot_store::InMemoryStore;

    fn service(store: &Arc<InMemoryStore>, provider: Arc<dyn Provider>) -> ChatService {
        ChatService::new(
            store.clone(),
            store.clone(),
            provider,
            &LlmConfig::default(),
            &AssistantConfig::default(),
        )
    }

    #[tokio::test]
    async fn first_turn_creates_titled_conversation() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(SequentialMockProvider::single_text("Hello!")));

        let reply = chat.turn(1, None, "Hi, what can you do?").await.unwrap();
        assert_eq!(reply.message.role, Role::Assistant);
        assert_eq!(reply.message.content, "Hello!");
        assert_eq!(reply.message.tokens_used, Some(15));
        assert_eq!(reply.message.model_used.as_deref(), Some("gpt-4o-mini"));

        let detail = chat.get_conversation(1, reply.conversation_id).await.unwrap();
        assert_eq!(detail.conversation.title, "Hi, what can you do?");
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[0].role, Role::User);
        assert!(detail.conversation.updated_at >= detail.conversation.created_at);
    }

    #[tokio::test]
    async fn long_first_message_is_truncated_and_title_kept() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(SequentialMockProvider::texts(&["a", "b"])));
        let first = "x".repeat(80);

        let reply = chat.turn(1, None, &first).await.unwrap();
        chat.turn(1, Some(reply.conversation_id), "second message").await.unwrap();

        let detail = chat.get_conversation(1, reply.conversation_id).await.unwrap();
        assert_eq!(detail.conversation.title, format!("{}...", "x".repeat(50)));
        assert_eq!(detail.messages.len(), 4);
    }

    #[tokio::test]
    async fn placeholder_title_is_replaced_once() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(SequentialMockProvider::texts(&["a", "b"])));
        let conversation = chat.create_conversation(1, None, None).await.unwrap();
        assert_eq!(conversation.title, DEFAULT_TITLE);

        chat.turn(1, Some(conversation.id), "Plan the spring sale").await.unwrap();
        chat.turn(1, Some(conversation.id), "And the summer one").await.unwrap();

        let detail = chat.get_conversation(1, conversation.id).await.unwrap();
        assert_eq!(detail.conversation.title, "Plan the spring sale");
    }

    /// Renames the conversation while the model is "thinking".
    struct RenamingProvider {
        store: Arc<InMemoryStore>,
        conversation_id: RecordId,
    }

    #[async_trait::async_trait]
    impl Provider for RenamingProvider {
        fn name(&self) -> &str {
            "renaming"
        }

        async fn complete(
            &self,
            _request: bizpilot_core::provider::ProviderRequest,
        ) -> std::result::Result<bizpilot_core::provider::ProviderResponse, ProviderError> {
            let rename = ConversationUpdate {
                title: Some("Renamed by user".into()),
                ..ConversationUpdate::default()
            };
            self.store
                .update_conversation(1, self.conversation_id, rename)
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;
            Ok(bizpilot_core::provider::ProviderResponse {
                content: "Sure".into(),
                usage: None,
                model: "mock".into(),
            })
        }
    }

    #[tokio::test]
    async fn rename_during_the_model_call_survives_the_turn() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store
            .create_conversation(1, DEFAULT_TITLE, Map::new())
            .await
            .unwrap();
        let provider = Arc::new(RenamingProvider {
            store: store.clone(),
            conversation_id: conversation.id,
        });
        let chat = service(&store, provider);

        chat.turn(1, Some(conversation.id), "Plan the spring sale").await.unwrap();

        let detail = chat.get_conversation(1, conversation.id).await.unwrap();
        assert_eq!(detail.conversation.title, "Renamed by user");
    }

    #[tokio::test]
    async fn history_precedes_the_new_message() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(SequentialMockProvider::texts(&["first reply", "second reply"]));
        let chat = service(&store, provider.clone());

        let reply = chat.turn(1, None, "first question").await.unwrap();
        chat.turn(1, Some(reply.conversation_id), "second question").await.unwrap();

        let requests = provider.requests();
        let contents: Vec<&str> = requests[1].messages.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(&contents[1..], &["first question", "first reply", "second question"]);
        assert_eq!(requests[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn model_failure_still_records_the_turn() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(
            &store,
            Arc::new(FailingProvider::new(ProviderError::ApiError {
                status_code: 502,
                message: "bad gateway".into(),
            })),
        );

        let message = chat.send_message(1, None, "hello").await.unwrap();
        assert!(message.content.starts_with("Sorry, I'm temporarily unavailable."));
        assert_eq!(message.tokens_used, None);
        assert_eq!(message.model_used, None);

        let stats = chat.statistics(1).await.unwrap();
        assert_eq!(stats.total_messages, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn model_timeout_yields_fallback() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(HangingProvider));
        let message = chat.send_message(1, None, "are you there?").await.unwrap();
        assert_eq!(message.tokens_used, None);
        assert_eq!(message.model_used, None);
        assert!(message.content.contains("(Error: "));
    }

    #[tokio::test]
    async fn context_refs_and_suggested_actions() {
        let store = Arc::new(InMemoryStore::new());
        let task = store
            .create_task(1, NewTask::titled("Prepare quarterly report"))
            .await
            .unwrap();
        let chat = service(
            &store,
            Arc::new(SequentialMockProvider::single_text(
                "I'll add it. [ACTION:create_task:Review quarterly report|Check numbers|high]",
            )),
        );

        let reply = chat.turn(1, None, "remind me about the quarterly report").await.unwrap();
        assert_eq!(reply.message.context.tasks, Some(vec![task.id]));
        assert_eq!(reply.message.context.finance, None);
        assert_eq!(reply.suggested_actions.len(), 1);
        assert_eq!(reply.suggested_actions[0].action, ActionType::CreateTask);

        // Nothing is executed until asked.
        assert_eq!(
            store.list_tasks(1, &bizpilot_core::store::ListQuery::recent(10)).await.unwrap().len(),
            1
        );
        let results = chat.execute_actions(1, &reply.suggested_actions).await;
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn foreign_or_missing_conversation_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(SequentialMockProvider::texts(&[])));
        let theirs = chat.create_conversation(2, Some("Private"), None).await.unwrap();

        let err = chat.turn(1, Some(theirs.id), "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::ConversationNotFound(id) if id == theirs.id));
        assert!(matches!(
            chat.list_messages(1, theirs.id, 0, 100).await,
            Err(ChatError::ConversationNotFound(_))
        ));
        assert!(matches!(
            chat.delete_conversation(1, 999).await,
            Err(ChatError::ConversationNotFound(999))
        ));
    }

    #[tokio::test]
    async fn message_length_is_validated() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(SequentialMockProvider::texts(&[])));
        assert!(matches!(
            chat.turn(1, None, "   ").await,
            Err(ChatError::InvalidInput(_))
        ));
        let too_long = "y".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(
            chat.turn(1, None, &too_long).await,
            Err(ChatError::InvalidInput(_))
        ));
        assert!(chat.list_conversations(1, true, 0, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activity_window_out_of_range_is_invalid() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(SequentialMockProvider::texts(&[])));
        for days in [-1, MAX_ACTIVITY_DAYS + 1, 200_000_000] {
            assert!(matches!(
                chat.recent_activity(1, days, 20).await,
                Err(ChatError::InvalidInput(_))
            ));
        }
        assert!(chat.recent_activity(1, MAX_ACTIVITY_DAYS, 20).await.is_ok());
    }

    #[tokio::test]
    async fn rating_rules() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(SequentialMockProvider::single_text("ok")));
        let reply = chat.turn(1, None, "hello").await.unwrap();

        assert!(matches!(
            chat.rate_message(1, reply.message.id, 6, None).await,
            Err(ChatError::InvalidRating(6))
        ));
        assert!(matches!(
            chat.rate_message(1, reply.user_message.id, 5, None).await,
            Err(ChatError::MessageNotFound(_))
        ));
        assert!(matches!(
            chat.rate_message(2, reply.message.id, 5, None).await,
            Err(ChatError::MessageNotFound(_))
        ));

        let rated = chat
            .rate_message(1, reply.message.id, 4, Some("useful".into()))
            .await
            .unwrap();
        assert_eq!(rated.user_rating, Some(4));
        assert_eq!(rated.user_feedback.as_deref(), Some("useful"));
        assert_eq!(chat.statistics(1).await.unwrap().avg_user_rating, Some(4.0));
    }

    #[tokio::test]
    async fn update_and_archive() {
        let store = Arc::new(InMemoryStore::new());
        let chat = service(&store, Arc::new(SequentialMockProvider::texts(&[])));
        let c = chat.create_conversation(1, Some("Taxes"), None).await.unwrap();

        let updated = chat
            .update_conversation(
                1,
                c.id,
                ConversationUpdate {
                    archived: Some(true),
                    ..ConversationUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.archived);
        assert!(chat.list_conversations(1, false, 0, 50).await.unwrap().is_empty());
        assert_eq!(chat.list_conversations(1, true, 0, 50).await.unwrap().len(), 1);

        let err = chat
            .update_conversation(
                1,
                c.id,
                ConversationUpdate {
                    title: Some("  ".into()),
                    ..ConversationUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[test]
    fn store_not_found_maps_to_chat_errors() {
        let err: ChatError = StoreError::NotFound {
            entity: "conversation",
            id: 3,
        }
        .into();
        assert!(matches!(err, ChatError::ConversationNotFound(3)));

        let err: ChatError = StoreError::Storage("disk full".into()).into();
        assert_eq!(err.to_string(), "Storage error: disk full");
    }
}

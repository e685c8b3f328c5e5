//! REST API v1 for Bizpilot.
//!
//! Endpoints (mounted under `/v1`):
//! - `POST   /chat/conversations`               Create a conversation
//! - `GET    /chat/conversations`               List conversations
//! - `GET    /chat/conversations/{id}`          Conversation with its messages
//! - `PUT    /chat/conversations/{id}`          Update title, archive flag or metadata
//! - `DELETE /chat/conversations/{id}`          Delete a conversation
//! - `GET    /chat/conversations/{id}/messages` Page through messages
//! - `POST   /chat/messages`                    Run one assistant turn
//! - `POST   /chat/messages/{id}/feedback`      Rate an assistant reply
//! - `GET    /chat/statistics`                  Usage statistics
//! - `POST   /chat/actions/execute`             Execute one action
//! - `POST   /chat/actions/execute-batch`       Execute actions in order
//! - `POST   /chat/actions/parse`               Extract action directives from text
//! - `POST   /chat/intent/detect`               Classify a message
//! - `GET    /search`                           Search all business domains
//! - `GET    /search/recent`                    Recently created records
//!
//! Every endpoint that reads or writes owner data takes the owner from the
//! `X-Owner-Id` header.

use std::sync::Arc;

use axum::{
    Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use bizpilot_assistant::search::{DEFAULT_ACTIVITY_DAYS, DEFAULT_ACTIVITY_LIMIT, DEFAULT_SEARCH_LIMIT};
use bizpilot_assistant::service::{DEFAULT_CONVERSATION_LIMIT, DEFAULT_MESSAGE_LIMIT};
use bizpilot_assistant::{
    ChatError, ChatReply, ChatService, ConversationDetail, DomainGroups, IntentMatch,
    SearchResults, detect_intent, parse_actions, strip_actions,
};
use bizpilot_core::action::{ActionRequest, ActionResult};
use bizpilot_core::message::{ChatStatistics, Conversation, ConversationUpdate, Message};
use bizpilot_core::records::{OwnerId, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info};

/// Header carrying the caller's owner id.
pub const OWNER_HEADER: &str = "x-owner-id";

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for v1 API handlers.
pub struct ApiState {
    pub chat: ChatService,
}

impl ApiState {
    pub fn new(chat: ChatService) -> Self {
        Self { chat }
    }
}

pub type SharedApiState = Arc<ApiState>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route(
            "/chat/conversations",
            post(create_conversation_handler).get(list_conversations_handler),
        )
        .route(
            "/chat/conversations/{id}",
            get(get_conversation_handler)
                .put(update_conversation_handler)
                .delete(delete_conversation_handler),
        )
        .route("/chat/conversations/{id}/messages", get(list_messages_handler))
        .route("/chat/messages", post(send_message_handler))
        .route("/chat/messages/{id}/feedback", post(feedback_handler))
        .route("/chat/statistics", get(statistics_handler))
        .route("/chat/actions/execute", post(execute_action_handler))
        .route("/chat/actions/execute-batch", post(execute_batch_handler))
        .route("/chat/actions/parse", post(parse_actions_handler))
        .route("/chat/intent/detect", post(detect_intent_handler))
        .route("/search", get(search_handler))
        .route("/search/recent", get(recent_activity_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid x-owner-id header")]
    Unauthorized,

    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Chat(ChatError::ConversationNotFound(_) | ChatError::MessageNotFound(_)) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Chat(ChatError::InvalidRating(_) | ChatError::InvalidInput(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            ApiError::Chat(ChatError::Store(e)) => {
                error!(error = %e, "Store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Owner ─────────────────────────────────────────────────────────────────

/// The caller's owner id, read from [`OWNER_HEADER`].
#[derive(Debug, Clone, Copy)]
pub struct Owner(pub OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<OwnerId>().ok())
            .filter(|id| *id > 0)
            .map(Owner)
            .ok_or(ApiError::Unauthorized)
    }
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct CreateConversationRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ConversationListQuery {
    #[serde(default)]
    include_archived: bool,
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_conversation_limit")]
    limit: usize,
}

fn default_conversation_limit() -> usize {
    DEFAULT_CONVERSATION_LIMIT
}

#[derive(Deserialize)]
struct MessageListQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_message_limit")]
    limit: usize,
}

fn default_message_limit() -> usize {
    DEFAULT_MESSAGE_LIMIT
}

#[derive(Deserialize)]
struct SendMessageRequest {
    /// Existing conversation; omitted to start a new one.
    #[serde(default)]
    conversation_id: Option<RecordId>,
    message: String,
}

#[derive(Deserialize)]
struct FeedbackRequest {
    rating: i64,
    #[serde(default)]
    feedback: Option<String>,
}

/// An action to execute. Accepts the `type`/`params` shape of a suggested action.
#[derive(Deserialize)]
struct ExecuteActionRequest {
    #[serde(rename = "type")]
    action: String,
    #[serde(default)]
    params: Vec<String>,
}

#[derive(Deserialize)]
struct ExecuteBatchRequest {
    actions: Vec<ExecuteActionRequest>,
}

#[derive(Serialize, Deserialize)]
struct ExecuteBatchResponse {
    results: Vec<ActionResult>,
    succeeded: usize,
    failed: usize,
}

#[derive(Deserialize)]
struct ParseActionsRequest {
    text: String,
}

#[derive(Serialize)]
struct ParseActionsResponse {
    actions: Vec<ActionRequest>,
    clean_text: String,
}

#[derive(Deserialize)]
struct DetectIntentRequest {
    message: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

#[derive(Deserialize)]
struct RecentQuery {
    #[serde(default = "default_activity_days")]
    days: i64,
    #[serde(default = "default_activity_limit")]
    limit: usize,
}

fn default_activity_days() -> i64 {
    DEFAULT_ACTIVITY_DAYS
}

fn default_activity_limit() -> usize {
    DEFAULT_ACTIVITY_LIMIT
}

// ── Conversation handlers ─────────────────────────────────────────────────

async fn create_conversation_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    payload: Option<Json<CreateConversationRequest>>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let conversation = state
        .chat
        .create_conversation(owner, payload.title.as_deref(), payload.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn list_conversations_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Query(query): Query<ConversationListQuery>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let conversations = state
        .chat
        .list_conversations(owner, query.include_archived, query.skip, query.limit)
        .await?;
    Ok(Json(conversations))
}

async fn get_conversation_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Path(id): Path<RecordId>,
) -> ApiResult<Json<ConversationDetail>> {
    Ok(Json(state.chat.get_conversation(owner, id).await?))
}

async fn update_conversation_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Path(id): Path<RecordId>,
    Json(update): Json<ConversationUpdate>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.chat.update_conversation(owner, id, update).await?))
}

async fn delete_conversation_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Path(id): Path<RecordId>,
) -> ApiResult<StatusCode> {
    state.chat.delete_conversation(owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Path(id): Path<RecordId>,
    Query(query): Query<MessageListQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .chat
        .list_messages(owner, id, query.skip, query.limit)
        .await?;
    Ok(Json(messages))
}

// ── Message handlers ──────────────────────────────────────────────────────

async fn send_message_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Json(payload): Json<SendMessageRequest>,
) -> ApiResult<Json<ChatReply>> {
    info!(owner, conversation = ?payload.conversation_id, "v1/chat/messages request");
    let reply = state
        .chat
        .turn(owner, payload.conversation_id, &payload.message)
        .await?;
    Ok(Json(reply))
}

async fn feedback_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Path(id): Path<RecordId>,
    Json(payload): Json<FeedbackRequest>,
) -> ApiResult<Json<Message>> {
    let message = state
        .chat
        .rate_message(owner, id, payload.rating, payload.feedback)
        .await?;
    Ok(Json(message))
}

async fn statistics_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
) -> ApiResult<Json<ChatStatistics>> {
    Ok(Json(state.chat.statistics(owner).await?))
}

// ── Action handlers ───────────────────────────────────────────────────────

async fn execute_action_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Json(payload): Json<ExecuteActionRequest>,
) -> Json<ActionResult> {
    Json(
        state
            .chat
            .execute_action(owner, &payload.action, &payload.params)
            .await,
    )
}

async fn execute_batch_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Json(payload): Json<ExecuteBatchRequest>,
) -> Json<ExecuteBatchResponse> {
    let mut results = Vec::with_capacity(payload.actions.len());
    for action in &payload.actions {
        results.push(
            state
                .chat
                .execute_action(owner, &action.action, &action.params)
                .await,
        );
    }
    let succeeded = results.iter().filter(|r| r.success).count();
    Json(ExecuteBatchResponse {
        failed: results.len() - succeeded,
        succeeded,
        results,
    })
}

async fn parse_actions_handler(Json(payload): Json<ParseActionsRequest>) -> Json<ParseActionsResponse> {
    Json(ParseActionsResponse {
        actions: parse_actions(&payload.text),
        clean_text: strip_actions(&payload.text),
    })
}

async fn detect_intent_handler(Json(payload): Json<DetectIntentRequest>) -> Json<IntentMatch> {
    Json(detect_intent(&payload.message))
}

// ── Search handlers ───────────────────────────────────────────────────────

async fn search_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResults>> {
    let results = state
        .chat
        .search(owner, &query.q, query.domain.as_deref(), query.limit)
        .await?;
    Ok(Json(results))
}

async fn recent_activity_handler(
    State(state): State<SharedApiState>,
    Owner(owner): Owner,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<DomainGroups>> {
    Ok(Json(
        state
            .chat
            .recent_activity(owner, query.days, query.limit)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use bizpilot_assistant::{KeywordScorer, ModelInvoker};
    use bizpilot_config::AssistantConfig;
    use bizpilot_core::error::ProviderError;
    use bizpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
    use bizpilot_core::message::DEFAULT_TITLE;
    use bizpilot_core::records::NewTask;
    use bizpilot_core::store::{DomainStore, ListQuery};
    use bizpilot_store::InMemoryStore;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Lightweight mock provider for gateway tests.
    struct MockProvider {
        response_text: String,
    }

    impl MockProvider {
        fn new(text: &str) -> Self {
            Self {
                response_text: text.to_string(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        async fn complete(
            &self,
            _request: ProviderRequest,
        ) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                content: self.response_text.clone(),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
                model: "mock-model".into(),
            })
        }
    }

    fn test_api_state_with(reply: &str) -> (Arc<InMemoryStore>, SharedApiState) {
        let store = Arc::new(InMemoryStore::new());
        let chat = ChatService::with_scorer(
            store.clone(),
            store.clone(),
            ModelInvoker::new(
                Arc::new(MockProvider::new(reply)),
                "mock-model",
                Duration::from_secs(5),
            ),
            Arc::new(KeywordScorer),
            &AssistantConfig::default(),
        );
        (store, Arc::new(ApiState::new(chat)))
    }

    fn test_api_state() -> SharedApiState {
        test_api_state_with("Mock response from assistant").1
    }

    fn fetch(uri: &str, owner: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(owner) = owner {
            builder = builder.header(OWNER_HEADER, owner);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn send(method: &str, uri: &str, owner: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(OWNER_HEADER, owner)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(state: &SharedApiState, req: Request<Body>) -> (StatusCode, Value) {
        let response = v1_router(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        // Extractor rejections answer in plain text.
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
        };
        (status, json)
    }

    #[tokio::test]
    async fn missing_owner_is_unauthorized() {
        let state = test_api_state();
        let (status, json) = call(&state, fetch("/chat/conversations", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(json["error"].as_str().unwrap().contains(OWNER_HEADER));

        let (status, _) = call(&state, fetch("/chat/conversations", Some("abc"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_and_list_conversations() {
        let state = test_api_state();

        let (status, created) = call(
            &state,
            send("POST", "/chat/conversations", "1", json!({ "title": "Q3 planning" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["title"], "Q3 planning");

        let (status, list) = call(&state, fetch("/chat/conversations", Some("1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        // Other owners see nothing.
        let (_, list) = call(&state, fetch("/chat/conversations", Some("2"))).await;
        assert!(list.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_conversation_without_body_uses_placeholder_title() {
        let state = test_api_state();
        let req = Request::builder()
            .method("POST")
            .uri("/chat/conversations")
            .header(OWNER_HEADER, "1")
            .body(Body::empty())
            .unwrap();

        let (status, created) = call(&state, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["title"], DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn get_conversation_not_found() {
        let state = test_api_state();
        let (status, json) = call(&state, fetch("/chat/conversations/999", Some("1"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "conversation 999 not found");
    }

    #[tokio::test]
    async fn send_message_returns_reply_with_actions_and_intent() {
        let (store, state) =
            test_api_state_with("Noted. [ACTION:create_task:Call the bank|Discuss the loan|high]");

        let (status, reply) = call(
            &state,
            send(
                "POST",
                "/chat/messages",
                "1",
                json!({ "message": "Create a task to call the bank" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["message"]["role"], "assistant");
        assert_eq!(reply["message"]["tokens_used"], 15);
        assert_eq!(reply["user_message"]["role"], "user");
        assert_eq!(reply["suggested_actions"][0]["type"], "create_task");
        assert_eq!(reply["intent"]["intent"], "create_task");

        // Suggested actions are not executed by the turn itself.
        assert!(store.list_tasks(1, &ListQuery::recent(10)).await.unwrap().is_empty());

        let conversation_id = reply["conversation_id"].as_i64().unwrap();
        let uri = format!("/chat/conversations/{conversation_id}");
        let (status, detail) = call(&state, fetch(&uri, Some("1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["title"], "Create a task to call the bank");
        assert_eq!(detail["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_message_is_unprocessable() {
        let state = test_api_state();
        let (status, json) = call(
            &state,
            send("POST", "/chat/messages", "1", json!({ "message": "   " })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].as_str().unwrap().starts_with("invalid input"));
    }

    #[tokio::test]
    async fn foreign_conversation_is_not_found() {
        let state = test_api_state();
        let (_, reply) = call(
            &state,
            send("POST", "/chat/messages", "1", json!({ "message": "Hello" })),
        )
        .await;
        let conversation_id = reply["conversation_id"].clone();

        let (status, _) = call(
            &state,
            send(
                "POST",
                "/chat/messages",
                "2",
                json!({ "conversation_id": conversation_id, "message": "Hello" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_and_delete_conversation() {
        let state = test_api_state();
        let (_, created) =
            call(&state, send("POST", "/chat/conversations", "1", json!({}))).await;
        let uri = format!("/chat/conversations/{}", created["id"]);

        let (status, updated) =
            call(&state, send("PUT", &uri, "1", json!({ "archived": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["archived"], true);

        let (status, _) = call(&state, send("PUT", &uri, "1", json!({ "title": " " }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let delete = Request::builder()
            .method("DELETE")
            .uri(&uri)
            .header(OWNER_HEADER, "1")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&state, delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&state, fetch(&uri, Some("1"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn messages_are_paged_oldest_first() {
        let state = test_api_state();
        let (_, reply) = call(
            &state,
            send("POST", "/chat/messages", "1", json!({ "message": "First question" })),
        )
        .await;
        let uri = format!("/chat/conversations/{}/messages?skip=1&limit=5", reply["conversation_id"]);

        let (status, messages) = call(&state, fetch(&uri, Some("1"))).await;
        assert_eq!(status, StatusCode::OK);
        let messages = messages.as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "assistant");
    }

    #[tokio::test]
    async fn feedback_validates_rating_and_updates_statistics() {
        let state = test_api_state();
        let (_, reply) = call(
            &state,
            send("POST", "/chat/messages", "1", json!({ "message": "Hi" })),
        )
        .await;
        let uri = format!("/chat/messages/{}/feedback", reply["message"]["id"]);

        let (status, _) = call(&state, send("POST", &uri, "1", json!({ "rating": 6 }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, rated) = call(
            &state,
            send("POST", &uri, "1", json!({ "rating": 4, "feedback": "helpful" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rated["user_rating"], 4);

        // The user's own message cannot be rated.
        let uri = format!("/chat/messages/{}/feedback", reply["user_message"]["id"]);
        let (status, _) = call(&state, send("POST", &uri, "1", json!({ "rating": 4 }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, stats) = call(&state, fetch("/chat/statistics", Some("1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_conversations"], 1);
        assert_eq!(stats["total_messages"], 2);
        assert_eq!(stats["avg_user_rating"], 4.0);
    }

    #[tokio::test]
    async fn execute_action_reports_failures_in_body() {
        let (store, state) = test_api_state_with("ok");

        let (status, result) = call(
            &state,
            send(
                "POST",
                "/chat/actions/execute",
                "1",
                json!({ "type": "add_income", "params": ["1200", "Consulting"] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["success"], true);
        assert_eq!(store.list_finance(1, &ListQuery::recent(10)).await.unwrap().len(), 1);

        let (status, result) = call(
            &state,
            send(
                "POST",
                "/chat/actions/execute",
                "1",
                json!({ "type": "launch_rocket", "params": [] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["success"], false);
        assert_eq!(result["message"], "Unknown action type: launch_rocket");
    }

    #[tokio::test]
    async fn execute_batch_counts_outcomes() {
        let (store, state) = test_api_state_with("ok");
        let (status, json) = call(
            &state,
            send(
                "POST",
                "/chat/actions/execute-batch",
                "1",
                json!({ "actions": [
                    { "type": "create_task", "params": ["First"] },
                    { "type": "add_expense", "params": ["abc", "Broken"] },
                    { "type": "create_task", "params": ["Third"] },
                ]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let batch: ExecuteBatchResponse = serde_json::from_value(json).unwrap();
        assert_eq!(batch.succeeded, 2);
        assert_eq!(batch.failed, 1);
        assert!(!batch.results[1].success);
        assert_eq!(store.list_tasks(1, &ListQuery::recent(10)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn parse_and_detect_need_no_owner() {
        let state = test_api_state();

        let req = Request::builder()
            .method("POST")
            .uri("/chat/actions/parse")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "text": "Sure. [ACTION:add_expense:150|Lunch] [ACTION:fly:x]" }).to_string(),
            ))
            .unwrap();
        let (status, json) = call(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["actions"].as_array().unwrap().len(), 1);
        assert_eq!(json["actions"][0]["params"], json!(["150", "Lunch"]));
        assert!(!json["clean_text"].as_str().unwrap().contains("[ACTION:add_expense"));

        let req = Request::builder()
            .method("POST")
            .uri("/chat/intent/detect")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "message": "Any overdue tasks?" }).to_string()))
            .unwrap();
        let (status, json) = call(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["intent"], "show_overdue_tasks");
    }

    #[tokio::test]
    async fn search_groups_hits_by_domain() {
        let (store, state) = test_api_state_with("ok");
        store
            .create_task(1, NewTask::titled("Prepare invoice for ACME"))
            .await
            .unwrap();
        store
            .create_task(2, NewTask::titled("Invoice for someone else"))
            .await
            .unwrap();

        let (status, json) = call(&state, fetch("/search?q=invoice", Some("1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["query"], "invoice");
        assert_eq!(json["total_results"], 1);
        assert_eq!(json["tasks"][0]["title"], "Prepare invoice for ACME");

        let (_, json) = call(&state, fetch("/search?q=invoice&domain=rockets", Some("1"))).await;
        assert_eq!(json["total_results"], 0);

        let (status, body) = call(&state, fetch("/search", Some("1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.as_str().unwrap().contains("missing field `q`"));
    }

    #[tokio::test]
    async fn recent_activity_lists_new_records() {
        let (store, state) = test_api_state_with("ok");
        store.create_task(1, NewTask::titled("Fresh task")).await.unwrap();

        let (status, json) = call(&state, fetch("/search/recent?days=1", Some("1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["tasks"][0]["title"], "Fresh task");
        assert!(json["finance"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recent_activity_rejects_huge_window() {
        let (_, state) = test_api_state_with("ok");
        let (status, json) = call(&state, fetch("/search/recent?days=200000000", Some("1"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(json["error"].as_str().unwrap().contains("days"));
    }
}

//! Action dispatch: maps an action tag to the handler that performs it.
//!
//! Handlers register under their tag; adding an action means registering
//! another [`ActionHandler`]. Every outcome is an [`ActionResult`]: unknown
//! tags and handler errors become `success = false` with a message, never
//! an error for the caller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bizpilot_core::action::{ActionRequest, ActionResult, ActionType};
use bizpilot_core::error::StoreError;
use bizpilot_core::records::OwnerId;
use bizpilot_core::store::DomainStore;
use serde_json::Value;
use tracing::{info, warn};

use super::handlers;

/// Why a handler could not complete.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("invalid {name} '{value}': {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown document template '{0}' (expected contract, invoice or act)")]
    UnknownTemplate(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One executable action.
///
/// A handler owns its parameter contract: it reads the positional
/// parameters, applies defaults, validates, and performs exactly one commit.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The tag this handler answers to.
    fn action(&self) -> ActionType;

    /// Perform the action and return identifying data for what changed.
    async fn execute(&self, owner: OwnerId, params: &[String]) -> Result<Value, ActionError>;
}

/// Registry of action handlers keyed by tag.
pub struct ActionDispatcher {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl ActionDispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A dispatcher with every built-in action wired to `store`.
    pub fn with_builtin(store: Arc<dyn DomainStore>) -> Self {
        let mut dispatcher = Self::new();
        for handler in handlers::builtin(store) {
            dispatcher.register(handler);
        }
        dispatcher
    }

    /// Register a handler, replacing any previous one for the same tag.
    pub fn register(&mut self, handler: Box<dyn ActionHandler>) {
        self.handlers
            .insert(handler.action().as_str().to_string(), handler);
    }

    pub fn get(&self, tag: &str) -> Option<&dyn ActionHandler> {
        self.handlers.get(tag).map(|h| h.as_ref())
    }

    /// Registered tags, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Execute the action registered under `tag`.
    pub async fn execute(&self, owner: OwnerId, tag: &str, params: &[String]) -> ActionResult {
        let Some(handler) = self.handlers.get(tag) else {
            warn!(owner, action = tag, "Unknown action type");
            return ActionResult::failed(format!("Unknown action type: {tag}"));
        };

        match handler.execute(owner, params).await {
            Ok(data) => {
                info!(owner, action = tag, "Action executed");
                ActionResult::ok(tag, data)
            }
            Err(e) => {
                warn!(owner, action = tag, error = %e, "Action failed");
                ActionResult::failed(format!("Error executing action: {e}"))
            }
        }
    }

    /// Execute a parsed request with its own parameters.
    pub async fn execute_request(&self, owner: OwnerId, request: &ActionRequest) -> ActionResult {
        self.execute(owner, request.action.as_str(), &request.params)
            .await
    }

    /// Execute requests one after another. Earlier successes stand when a later one fails.
    pub async fn execute_all(&self, owner: OwnerId, requests: &[ActionRequest]) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.execute_request(owner, request).await);
        }
        results
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::parser::parse_actions;
    use bizpilot_core::records::{FinanceKind, TaskPriority};
    use bizpilot_core::store::ListQuery;
    use bizpilot_store::InMemoryStore;
    use serde_json::json;

    fn setup() -> (Arc<InMemoryStore>, ActionDispatcher) {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = ActionDispatcher::with_builtin(store.clone());
        (store, dispatcher)
    }

    fn params(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        fn action(&self) -> ActionType {
            ActionType::CreateTask
        }

        async fn execute(&self, _owner: OwnerId, params: &[String]) -> Result<Value, ActionError> {
            Ok(json!({ "echo": params }))
        }
    }

    #[test]
    fn builtin_registers_every_action() {
        let (_, dispatcher) = setup();
        assert_eq!(dispatcher.len(), ActionType::ALL.len());
        for action in ActionType::ALL {
            assert!(dispatcher.get(action.as_str()).is_some(), "{action}");
        }
        assert_eq!(dispatcher.names()[0], "add_expense");
    }

    #[tokio::test]
    async fn custom_handler_replaces_builtin() {
        let (_, mut dispatcher) = setup();
        dispatcher.register(Box::new(Echo));
        let result = dispatcher.execute(1, "create_task", &params(&["x"])).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["echo"], json!(["x"]));
    }

    #[tokio::test]
    async fn unknown_type_fails_softly() {
        let (_, dispatcher) = setup();
        let result = dispatcher.execute(1, "unknown_type", &[]).await;
        assert!(!result.success);
        assert!(result.message.contains("Unknown action type"));
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn create_task_returns_id_and_title() {
        let (store, dispatcher) = setup();
        let result = dispatcher
            .execute(1, "create_task", &params(&["Call bank", "About the loan", "high", "finance"]))
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.message, "Action 'create_task' executed successfully");
        let data = result.data.unwrap();
        assert_eq!(data["title"], "Call bank");

        let tasks = store.list_tasks(1, &ListQuery::recent(10)).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, data["id"].as_i64().unwrap());
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert!(tasks[0].ai_suggested);
    }

    #[tokio::test]
    async fn invalid_priority_is_reported() {
        let (store, dispatcher) = setup();
        let result = dispatcher
            .execute(1, "create_task", &params(&["Call bank", "", "asap"]))
            .await;
        assert!(!result.success);
        assert!(result.message.starts_with("Error executing action: invalid priority"));
        assert!(store.list_tasks(1, &ListQuery::recent(10)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expense_amount_is_stored_as_magnitude() {
        let (store, dispatcher) = setup();
        let result = dispatcher
            .execute(1, "add_expense", &params(&["-150.5", "Lunch"]))
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.data.unwrap()["amount"], 150.5);

        let records = store.list_finance(1, &ListQuery::recent(10)).await.unwrap();
        assert_eq!(records[0].kind, FinanceKind::Expense);
        assert_eq!(records[0].amount, 150.5);
        assert_eq!(records[0].category.as_deref(), Some("uncategorized"));
    }

    #[tokio::test]
    async fn non_numeric_amount_fails() {
        let (_, dispatcher) = setup();
        let result = dispatcher
            .execute(1, "add_income", &params(&["lots", "Consulting"]))
            .await;
        assert!(!result.success);
        assert!(result.message.contains("invalid amount 'lots'"));
    }

    #[tokio::test]
    async fn missing_parameter_is_named() {
        let (_, dispatcher) = setup();
        let result = dispatcher.execute(1, "add_income", &params(&["100"])).await;
        assert_eq!(
            result.message,
            "Error executing action: missing required parameter 'description'"
        );
    }

    #[tokio::test]
    async fn parsed_requests_round_trip_into_stored_entities() {
        let (store, dispatcher) = setup();
        let requests = parse_actions(
            "Done! [ACTION:create_task:Renew domain|Before March] [ACTION:add_expense:99.90|Hosting|IT]",
        );
        let results = dispatcher.execute_all(7, &requests).await;
        assert!(results.iter().all(|r| r.success));

        let tasks = store.list_tasks(7, &ListQuery::recent(10)).await.unwrap();
        assert_eq!(tasks[0].title, "Renew domain");
        let finance = store.list_finance(7, &ListQuery::recent(10)).await.unwrap();
        assert_eq!(finance[0].amount, 99.90);
        assert_eq!(finance[0].description.as_deref(), Some("Hosting"));
    }

    #[tokio::test]
    async fn batch_keeps_earlier_successes() {
        let (store, dispatcher) = setup();
        let requests = vec![
            ActionRequest::new(ActionType::CreateTask, params(&["First"])),
            ActionRequest::new(ActionType::AddExpense, params(&["abc", "Broken"])),
            ActionRequest::new(ActionType::CreateTask, params(&["Third"])),
        ];
        let results = dispatcher.execute_all(1, &requests).await;
        let flags: Vec<bool> = results.iter().map(|r| r.success).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(store.list_tasks(1, &ListQuery::recent(10)).await.unwrap().len(), 2);
    }
}

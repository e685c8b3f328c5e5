//! Action types: structured side effects the assistant can request.
//!
//! The model emits in-band directives of the form
//! `[ACTION:<type>:<param1>|<param2>|...]`. Parsed directives become
//! [`ActionRequest`]s; executing one yields an [`ActionResult`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;

/// Every action the dispatcher knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateTask,
    CreateTasksBulk,
    AddExpense,
    AddIncome,
    AnalyzeFinance,
    GenerateDocument,
    CreateCampaign,
    ScheduleCampaign,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::CreateTask,
        ActionType::CreateTasksBulk,
        ActionType::AddExpense,
        ActionType::AddIncome,
        ActionType::AnalyzeFinance,
        ActionType::GenerateDocument,
        ActionType::CreateCampaign,
        ActionType::ScheduleCampaign,
    ];

    /// The types the model is taught to emit as directives.
    pub const DIRECTIVES: [ActionType; 6] = [
        ActionType::CreateTask,
        ActionType::AddExpense,
        ActionType::AddIncome,
        ActionType::AnalyzeFinance,
        ActionType::GenerateDocument,
        ActionType::CreateCampaign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreateTask => "create_task",
            ActionType::CreateTasksBulk => "create_tasks_bulk",
            ActionType::AddExpense => "add_expense",
            ActionType::AddIncome => "add_income",
            ActionType::AnalyzeFinance => "analyze_finance",
            ActionType::GenerateDocument => "generate_document",
            ActionType::CreateCampaign => "create_campaign",
            ActionType::ScheduleCampaign => "schedule_campaign",
        }
    }

    /// Minimum number of positional parameters.
    pub fn min_params(&self) -> usize {
        match self {
            ActionType::CreateTask
            | ActionType::CreateTasksBulk
            | ActionType::GenerateDocument => 1,
            ActionType::AddExpense
            | ActionType::AddIncome
            | ActionType::AnalyzeFinance
            | ActionType::ScheduleCampaign => 2,
            ActionType::CreateCampaign => 3,
        }
    }

    /// Fixed confidence attached to a parsed directive of this type.
    pub fn confidence(&self) -> f32 {
        match self {
            ActionType::CreateTask => 0.90,
            ActionType::AddExpense | ActionType::AddIncome => 0.95,
            ActionType::AnalyzeFinance | ActionType::CreateCampaign => 0.85,
            ActionType::GenerateDocument => 0.80,
            ActionType::CreateTasksBulk | ActionType::ScheduleCampaign => 0.80,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A structured action extracted from a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub action: ActionType,

    /// Positional parameters exactly as they appeared in the directive
    pub params: Vec<String>,

    /// Short label shown before the user confirms execution
    pub title: String,

    /// One-line summary of what executing the action will do
    pub description: String,

    pub confidence: f32,
}

impl ActionRequest {
    /// Build a request, deriving title, description and confidence from the type.
    pub fn new(action: ActionType, params: Vec<String>) -> Self {
        let first = params.first().map(String::as_str).unwrap_or_default();
        let second = params.get(1).map(String::as_str).unwrap_or_default();
        let (title, description) = match action {
            ActionType::CreateTask => ("Create task", format!("Create: {first}")),
            ActionType::CreateTasksBulk => {
                ("Create tasks", format!("Create {} tasks", params.len()))
            }
            ActionType::AddExpense => ("Add expense", format!("Expense: {second}, amount {first}")),
            ActionType::AddIncome => ("Add income", format!("Income: {second}, amount {first}")),
            ActionType::AnalyzeFinance => (
                "Analyze finances",
                format!("Analyze finances from {first} to {second}"),
            ),
            ActionType::GenerateDocument => ("Generate document", format!("Generate {first}")),
            ActionType::CreateCampaign => ("Create campaign", format!("Launch {first} on {second}")),
            ActionType::ScheduleCampaign => (
                "Schedule campaign",
                format!("Plan execution tasks for {second}"),
            ),
        };
        Self {
            action,
            confidence: action.confidence(),
            title: title.to_string(),
            description,
            params,
        }
    }

    /// Named view of the positional parameters with display defaults filled in.
    pub fn parameters(&self) -> Value {
        let p = |i: usize| self.params.get(i).map(|s| s.trim()).filter(|s| !s.is_empty());
        let amount = |i: usize| match p(i) {
            Some(raw) => raw
                .parse::<f64>()
                .map(|n| json!(n))
                .unwrap_or_else(|_| json!(raw)),
            None => Value::Null,
        };
        match self.action {
            ActionType::CreateTask => json!({
                "title": p(0),
                "description": p(1),
                "priority": p(2).unwrap_or("medium"),
                "category": p(3),
            }),
            ActionType::CreateTasksBulk => json!({ "titles": self.params }),
            ActionType::AddExpense | ActionType::AddIncome => json!({
                "amount": amount(0),
                "description": p(1),
                "category": p(2).unwrap_or("uncategorized"),
            }),
            ActionType::AnalyzeFinance => json!({
                "start_date": p(0),
                "end_date": p(1),
            }),
            ActionType::GenerateDocument => {
                let variables: Map<String, Value> = self.params[1.min(self.params.len())..]
                    .iter()
                    .filter_map(|kv| kv.split_once('='))
                    .map(|(k, v)| (k.trim().to_string(), json!(v.trim())))
                    .collect();
                json!({ "template_type": p(0), "variables": variables })
            }
            ActionType::CreateCampaign => json!({
                "name": p(0),
                "platform": p(1),
                "content_type": p(2),
            }),
            ActionType::ScheduleCampaign => json!({
                "campaign_id": p(0),
                "campaign_name": p(1),
            }),
        }
    }
}

/// Uniform outcome of executing an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ActionResult {
    pub fn ok(action: &str, data: Value) -> Self {
        Self {
            success: true,
            message: format!("Action '{action}' executed successfully"),
            data: Some(data),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

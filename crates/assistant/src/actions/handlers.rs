//! Built-in action handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bizpilot_core::action::ActionType;
use bizpilot_core::error::StoreError;
use bizpilot_core::message::round2;
use bizpilot_core::records::{
    FinanceKind, NewCampaign, NewDocument, NewFinanceRecord, NewTask, OwnerId, RecordId,
    TaskPriority,
};
use bizpilot_core::store::DomainStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{Map, Value, json};

use super::dispatcher::{ActionError, ActionHandler};
use super::templates;

/// Category given to finance records created without one.
pub const DEFAULT_FINANCE_CATEGORY: &str = "uncategorized";

/// Category used when totals are grouped and a record has none.
const NO_CATEGORY: &str = "no category";

/// Every built-in handler, sharing one store.
pub fn builtin(store: Arc<dyn DomainStore>) -> Vec<Box<dyn ActionHandler>> {
    vec![
        Box::new(CreateTask(store.clone())),
        Box::new(CreateTasksBulk(store.clone())),
        Box::new(RecordFinance {
            store: store.clone(),
            kind: FinanceKind::Expense,
        }),
        Box::new(RecordFinance {
            store: store.clone(),
            kind: FinanceKind::Income,
        }),
        Box::new(AnalyzeFinance(store.clone())),
        Box::new(GenerateDocument(store.clone())),
        Box::new(CreateCampaign(store.clone())),
        Box::new(ScheduleCampaign(store)),
    ]
}

// ── Parameter access ──────────────────────────────────────────────────────

/// Positional parameters; blank values count as absent.
struct Params<'a>(&'a [String]);

impl<'a> Params<'a> {
    fn optional(&self, index: usize) -> Option<&'a str> {
        self.0
            .get(index)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn required(&self, index: usize, name: &'static str) -> Result<&'a str, ActionError> {
        self.optional(index)
            .ok_or(ActionError::MissingParameter(name))
    }

    /// `key=value` pairs from `start` onwards; other entries are ignored.
    fn variables(&self, start: usize) -> Map<String, Value> {
        self.0
            .iter()
            .skip(start)
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), Value::String(v.trim().to_string())))
            .filter(|(k, _)| !k.is_empty())
            .collect()
    }
}

fn invalid(name: &'static str, value: &str, reason: impl Into<String>) -> ActionError {
    ActionError::InvalidParameter {
        name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_amount(name: &'static str, raw: &str) -> Result<f64, ActionError> {
    let amount: f64 = raw
        .replace(' ', "")
        .parse()
        .map_err(|_| invalid(name, raw, "not a number"))?;
    if !amount.is_finite() {
        return Err(invalid(name, raw, "not a finite number"));
    }
    Ok(amount)
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp whose calendar day is used.
fn parse_day(name: &'static str, raw: &str) -> Result<NaiveDate, ActionError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| invalid(name, raw, "expected YYYY-MM-DD"))
}

fn parse_priority(raw: Option<&str>) -> Result<TaskPriority, ActionError> {
    match raw {
        None => Ok(TaskPriority::default()),
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid("priority", raw, "expected low, medium, high or urgent")),
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────

/// `create_task`: title, description?, priority?, category?
struct CreateTask(Arc<dyn DomainStore>);

#[async_trait]
impl ActionHandler for CreateTask {
    fn action(&self) -> ActionType {
        ActionType::CreateTask
    }

    async fn execute(&self, owner: OwnerId, params: &[String]) -> Result<Value, ActionError> {
        let p = Params(params);
        let task = NewTask {
            title: p.required(0, "title")?.to_string(),
            description: p.optional(1).map(str::to_string),
            priority: parse_priority(p.optional(2))?,
            category: p.optional(3).map(str::to_string),
            ai_suggested: true,
            due_date: None,
        };
        let task = self.0.create_task(owner, task).await?;
        Ok(json!({ "id": task.id, "title": task.title }))
    }
}

/// `create_tasks_bulk`: every parameter is a task title.
struct CreateTasksBulk(Arc<dyn DomainStore>);

#[async_trait]
impl ActionHandler for CreateTasksBulk {
    fn action(&self) -> ActionType {
        ActionType::CreateTasksBulk
    }

    async fn execute(&self, owner: OwnerId, params: &[String]) -> Result<Value, ActionError> {
        let titles: Vec<NewTask> = params
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| NewTask {
                ai_suggested: true,
                ..NewTask::titled(t)
            })
            .collect();
        if titles.is_empty() {
            return Err(ActionError::MissingParameter("titles"));
        }

        let tasks = self.0.create_tasks(owner, titles).await?;
        let summary: Vec<Value> = tasks
            .iter()
            .map(|t| json!({ "id": t.id, "title": t.title }))
            .collect();
        Ok(json!({ "count": tasks.len(), "tasks": summary }))
    }
}

// ── Finance ───────────────────────────────────────────────────────────────

/// `add_expense` / `add_income`: amount, description, category?
///
/// The amount is stored as a non-negative magnitude; the record kind
/// carries the direction.
struct RecordFinance {
    store: Arc<dyn DomainStore>,
    kind: FinanceKind,
}

#[async_trait]
impl ActionHandler for RecordFinance {
    fn action(&self) -> ActionType {
        match self.kind {
            FinanceKind::Expense => ActionType::AddExpense,
            FinanceKind::Income => ActionType::AddIncome,
        }
    }

    async fn execute(&self, owner: OwnerId, params: &[String]) -> Result<Value, ActionError> {
        let p = Params(params);
        let amount = parse_amount("amount", p.required(0, "amount")?)?.abs();
        let record = NewFinanceRecord {
            date: Utc::now().date_naive(),
            amount,
            kind: self.kind,
            description: Some(p.required(1, "description")?.to_string()),
            category: Some(p.optional(2).unwrap_or(DEFAULT_FINANCE_CATEGORY).to_string()),
        };
        let record = self.store.create_finance_record(owner, record).await?;
        Ok(json!({ "id": record.id, "amount": record.amount }))
    }
}

/// `analyze_finance`: start_date, end_date (inclusive).
struct AnalyzeFinance(Arc<dyn DomainStore>);

#[async_trait]
impl ActionHandler for AnalyzeFinance {
    fn action(&self) -> ActionType {
        ActionType::AnalyzeFinance
    }

    async fn execute(&self, owner: OwnerId, params: &[String]) -> Result<Value, ActionError> {
        let p = Params(params);
        let start = parse_day("start_date", p.required(0, "start_date")?)?;
        let end = parse_day("end_date", p.required(1, "end_date")?)?;
        if start > end {
            return Err(invalid(
                "end_date",
                &end.to_string(),
                format!("before start_date {start}"),
            ));
        }

        let records = self.0.finance_between(owner, start, end).await?;

        let mut income = 0.0;
        let mut expense = 0.0;
        let mut categories: BTreeMap<String, f64> = BTreeMap::new();
        let mut expense_categories: BTreeMap<String, f64> = BTreeMap::new();
        for r in &records {
            let category = r.category.clone().unwrap_or_else(|| NO_CATEGORY.to_string());
            *categories.entry(category.clone()).or_default() += r.amount;
            match r.kind {
                FinanceKind::Income => income += r.amount,
                FinanceKind::Expense => {
                    expense += r.amount;
                    *expense_categories.entry(category).or_default() += r.amount;
                }
            }
        }

        let top_expense_category = expense_categories
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(name, _)| name.clone());
        let categories: Map<String, Value> = categories
            .into_iter()
            .map(|(name, total)| (name, json!(round2(total))))
            .collect();

        Ok(json!({
            "period": { "start": start.to_string(), "end": end.to_string() },
            "total_income": round2(income),
            "total_expense": round2(expense),
            "balance": round2(income - expense),
            "records_count": records.len(),
            "categories": categories,
            "top_expense_category": top_expense_category,
        }))
    }
}

// ── Documents ─────────────────────────────────────────────────────────────

/// `generate_document`: template_type, then `key=value` variables.
struct GenerateDocument(Arc<dyn DomainStore>);

#[async_trait]
impl ActionHandler for GenerateDocument {
    fn action(&self) -> ActionType {
        ActionType::GenerateDocument
    }

    async fn execute(&self, owner: OwnerId, params: &[String]) -> Result<Value, ActionError> {
        let p = Params(params);
        let template = p.required(0, "template_type")?.to_lowercase();
        let variables = p.variables(1);
        let content = templates::render(&template, &variables)
            .ok_or_else(|| ActionError::UnknownTemplate(template.clone()))?;

        let document = NewDocument {
            title: format!(
                "{} from {}",
                template.to_uppercase(),
                Utc::now().format("%d.%m.%Y")
            ),
            content: Some(content),
            doc_type: Some(template),
            variables,
        };
        let document = self.0.create_document(owner, document).await?;
        Ok(json!({ "id": document.id, "title": document.title }))
    }
}

// ── Marketing ─────────────────────────────────────────────────────────────

/// `create_campaign`: name, platform, content_type, target_audience?, budget?
struct CreateCampaign(Arc<dyn DomainStore>);

#[async_trait]
impl ActionHandler for CreateCampaign {
    fn action(&self) -> ActionType {
        ActionType::CreateCampaign
    }

    async fn execute(&self, owner: OwnerId, params: &[String]) -> Result<Value, ActionError> {
        let p = Params(params);
        let budget = p
            .optional(4)
            .map(|raw| parse_amount("budget", raw))
            .transpose()?;
        let campaign = NewCampaign {
            name: p.required(0, "name")?.to_string(),
            platform: Some(p.required(1, "platform")?.to_string()),
            content_type: Some(p.required(2, "content_type")?.to_string()),
            target_audience: p.optional(3).map(str::to_string),
            budget,
            description: None,
            ai_generated: true,
        };
        let campaign = self.0.create_campaign(owner, campaign).await?;
        Ok(json!({ "id": campaign.id, "name": campaign.name }))
    }
}

/// `schedule_campaign`: campaign_id, campaign_name.
///
/// Creates the four-step execution checklist for a campaign the owner has.
struct ScheduleCampaign(Arc<dyn DomainStore>);

/// Checklist steps: title prefix, description, priority, days until due.
const CHECKLIST: [(&str, &str, TaskPriority, i64); 4] = [
    (
        "Prepare content for",
        "Create visuals and copy for campaign",
        TaskPriority::High,
        3,
    ),
    (
        "Set up targeting for",
        "Configure ad accounts for campaign",
        TaskPriority::High,
        5,
    ),
    (
        "Launch campaign",
        "Activate advertising campaign",
        TaskPriority::Urgent,
        7,
    ),
    (
        "Analyze results of",
        "Collect metrics and review the performance of campaign",
        TaskPriority::Medium,
        14,
    ),
];

/// The checklist for one campaign, due relative to `now`.
pub fn campaign_checklist(id: RecordId, name: &str, now: DateTime<Utc>) -> Vec<NewTask> {
    CHECKLIST
        .iter()
        .map(|(title, description, priority, days)| NewTask {
            title: format!("{title} {name}"),
            description: Some(format!("{description} #{id}")),
            priority: *priority,
            due_date: Some(now + Duration::days(*days)),
            category: Some("marketing".to_string()),
            ai_suggested: true,
        })
        .collect()
}

#[async_trait]
impl ActionHandler for ScheduleCampaign {
    fn action(&self) -> ActionType {
        ActionType::ScheduleCampaign
    }

    async fn execute(&self, owner: OwnerId, params: &[String]) -> Result<Value, ActionError> {
        let p = Params(params);
        let raw_id = p.required(0, "campaign_id")?;
        let id: RecordId = raw_id
            .parse()
            .map_err(|_| invalid("campaign_id", raw_id, "not an integer id"))?;
        let name = p.required(1, "campaign_name")?;

        if self.0.get_campaign(owner, id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "campaign",
                id,
            }
            .into());
        }

        let tasks = self
            .0
            .create_tasks(owner, campaign_checklist(id, name, Utc::now()))
            .await?;
        Ok(json!({ "tasks_created": tasks.len(), "campaign_id": id }))
    }
}

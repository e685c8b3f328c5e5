//! Domain records: tasks, finance records, documents, marketing campaigns.
//!
//! Every record is keyed by its owner. The assistant reads recent windows of
//! these records as context and creates new ones through actions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies the user who owns a record.
pub type OwnerId = i64;

/// Primary key of any persisted record.
pub type RecordId = i64;

/// The four data domains the assistant can read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Tasks,
    Finance,
    Documents,
    Marketing,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Tasks,
        Domain::Finance,
        Domain::Documents,
        Domain::Marketing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Tasks => "tasks",
            Domain::Finance => "finance",
            Domain::Documents => "documents",
            Domain::Marketing => "marketing",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tasks" => Ok(Domain::Tasks),
            "finance" => Ok(Domain::Finance),
            "documents" => Ok(Domain::Documents),
            "marketing" => Ok(Domain::Marketing),
            other => Err(format!("unknown domain '{other}'")),
        }
    }
}

// ── Tasks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            other => Err(format!(
                "invalid priority '{other}' (expected low, medium, high or urgent)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("invalid task status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category: Option<String>,
    /// Created by the assistant rather than by hand
    pub ai_suggested: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub ai_suggested: bool,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

// ── Finance ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinanceKind {
    Income,
    Expense,
}

impl FinanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinanceKind::Income => "income",
            FinanceKind::Expense => "expense",
        }
    }
}

impl FromStr for FinanceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(FinanceKind::Income),
            "expense" => Ok(FinanceKind::Expense),
            other => Err(format!("invalid finance record type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceRecord {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub date: NaiveDate,
    /// Non-negative magnitude; the direction lives in `kind`
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: FinanceKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFinanceRecord {
    pub date: NaiveDate,
    pub amount: f64,
    pub kind: FinanceKind,
    pub description: Option<String>,
    pub category: Option<String>,
}

// ── Documents ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    /// Values substituted into the template, if generated from one
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: String,
    pub content: Option<String>,
    pub doc_type: Option<String>,
    pub variables: serde_json::Map<String, serde_json::Value>,
}

// ── Marketing ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Published,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Published => "published",
            CampaignStatus::Archived => "archived",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "published" => Ok(CampaignStatus::Published),
            "archived" => Ok(CampaignStatus::Archived),
            other => Err(format!("invalid campaign status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub budget: Option<f64>,
    pub status: CampaignStatus,
    pub ai_generated: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewCampaign {
    pub name: String,
    pub description: Option<String>,
    pub platform: Option<String>,
    pub content_type: Option<String>,
    pub target_audience: Option<String>,
    pub budget: Option<f64>,
    pub ai_generated: bool,
}

//! Context retrieval: the per-turn slice of the owner's data shown to the model.
//!
//! Each domain contributes a small window of its most recent records. A
//! record enters the [`ContextBundle`] only when the boolean relevance test
//! accepts one of its two domain text fields:
//!
//! | domain | window | fields |
//! |---|---|---|
//! | tasks | 20 | title, description |
//! | finance | 30 | description, category |
//! | documents | 10 | title, content preview |
//! | marketing | 10 | name, description |
//!
//! Retrieval never fails: a store error for one domain is logged and that
//! domain contributes nothing.

use std::sync::Arc;

use bizpilot_config::AssistantConfig;
use bizpilot_core::error::StoreError;
use bizpilot_core::message::ContextRefs;
use bizpilot_core::records::{
    Campaign, CampaignStatus, Document, Domain, FinanceKind, FinanceRecord, OwnerId, RecordId,
    Task, TaskPriority, TaskStatus,
};
use bizpilot_core::store::{DomainStore, ListQuery};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::relevance::RelevanceScorer;

// ── Types ─────────────────────────────────────────────────────────────────

/// A context record together with its ranking score against the turn's query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scored<T> {
    #[serde(flatten)]
    pub item: T,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskContext {
    pub id: RecordId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinanceContext {
    pub id: RecordId,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: FinanceKind,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentContext {
    pub id: RecordId,
    pub title: String,
    pub doc_type: Option<String>,
    /// Leading slice of the document body
    pub content_preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignContext {
    pub id: RecordId,
    pub name: String,
    pub description: Option<String>,
    pub platform: Option<String>,
    pub status: CampaignStatus,
}

/// The records retrieved for one assistant turn, newest first per domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBundle {
    pub tasks: Vec<Scored<TaskContext>>,
    pub finance: Vec<Scored<FinanceContext>>,
    pub documents: Vec<Scored<DocumentContext>>,
    pub marketing: Vec<Scored<CampaignContext>>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.finance.is_empty()
            && self.documents.is_empty()
            && self.marketing.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len() + self.finance.len() + self.documents.len() + self.marketing.len()
    }

    /// The ids this bundle holds, per domain. Empty domains are `None`.
    pub fn refs(&self) -> ContextRefs {
        fn ids<T>(items: &[Scored<T>], id: impl Fn(&T) -> RecordId) -> Option<Vec<RecordId>> {
            (!items.is_empty()).then(|| items.iter().map(|s| id(&s.item)).collect())
        }
        ContextRefs {
            documents: ids(&self.documents, |d| d.id),
            tasks: ids(&self.tasks, |t| t.id),
            finance: ids(&self.finance, |f| f.id),
            marketing: ids(&self.marketing, |c| c.id),
        }
    }
}

// ── Retriever ─────────────────────────────────────────────────────────────

/// Per-domain recency windows and preview size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalWindows {
    pub tasks: usize,
    pub finance: usize,
    pub documents: usize,
    pub marketing: usize,
    pub preview_chars: usize,
}

impl Default for RetrievalWindows {
    fn default() -> Self {
        Self::from(&AssistantConfig::default())
    }
}

impl From<&AssistantConfig> for RetrievalWindows {
    fn from(config: &AssistantConfig) -> Self {
        Self {
            tasks: config.task_window,
            finance: config.finance_window,
            documents: config.document_window,
            marketing: config.marketing_window,
            preview_chars: config.preview_chars,
        }
    }
}

/// Builds a [`ContextBundle`] from the domain stores.
pub struct ContextRetriever {
    store: Arc<dyn DomainStore>,
    scorer: Arc<dyn RelevanceScorer>,
    windows: RetrievalWindows,
}

impl ContextRetriever {
    pub fn new(
        store: Arc<dyn DomainStore>,
        scorer: Arc<dyn RelevanceScorer>,
        windows: RetrievalWindows,
    ) -> Self {
        Self {
            store,
            scorer,
            windows,
        }
    }

    pub async fn retrieve(&self, owner: OwnerId, query: &str) -> ContextBundle {
        let w = self.windows;
        let task_query = ListQuery::recent(w.tasks);
        let finance_query = ListQuery::recent(w.finance);
        let document_query = ListQuery::recent(w.documents);
        let campaign_query = ListQuery::recent(w.marketing);
        let (tasks, finance, documents, campaigns) = tokio::join!(
            self.store.list_tasks(owner, &task_query),
            self.store.list_finance(owner, &finance_query),
            self.store.list_documents(owner, &document_query),
            self.store.list_campaigns(owner, &campaign_query),
        );

        let bundle = ContextBundle {
            tasks: self.keep_tasks(query, or_empty(Domain::Tasks, tasks)),
            finance: self.keep_finance(query, or_empty(Domain::Finance, finance)),
            documents: self.keep_documents(query, or_empty(Domain::Documents, documents)),
            marketing: self.keep_campaigns(query, or_empty(Domain::Marketing, campaigns)),
        };

        debug!(
            owner,
            tasks = bundle.tasks.len(),
            finance = bundle.finance.len(),
            documents = bundle.documents.len(),
            marketing = bundle.marketing.len(),
            "Context retrieved"
        );
        bundle
    }

    fn keep_tasks(&self, query: &str, tasks: Vec<Task>) -> Vec<Scored<TaskContext>> {
        tasks
            .into_iter()
            .filter_map(|t| {
                let (title, body) = (Some(t.title.as_str()), t.description.as_deref());
                self.scored(query, title, body, || TaskContext {
                    id: t.id,
                    title: t.title.clone(),
                    description: t.description.clone(),
                    status: t.status,
                    priority: t.priority,
                    due_date: t.due_date,
                })
            })
            .collect()
    }

    fn keep_finance(&self, query: &str, records: Vec<FinanceRecord>) -> Vec<Scored<FinanceContext>> {
        records
            .into_iter()
            .filter_map(|f| {
                let (title, body) = (f.description.as_deref(), f.category.as_deref());
                self.scored(query, title, body, || FinanceContext {
                    id: f.id,
                    date: f.date,
                    amount: f.amount,
                    kind: f.kind,
                    description: f.description.clone(),
                    category: f.category.clone(),
                })
            })
            .collect()
    }

    fn keep_documents(&self, query: &str, documents: Vec<Document>) -> Vec<Scored<DocumentContext>> {
        documents
            .into_iter()
            .filter_map(|d| {
                let preview = preview(d.content.as_deref(), self.windows.preview_chars);
                self.scored(query, Some(d.title.as_str()), Some(preview.as_str()), || {
                    DocumentContext {
                        id: d.id,
                        title: d.title.clone(),
                        doc_type: d.doc_type.clone(),
                        content_preview: preview.clone(),
                    }
                })
            })
            .collect()
    }

    fn keep_campaigns(&self, query: &str, campaigns: Vec<Campaign>) -> Vec<Scored<CampaignContext>> {
        campaigns
            .into_iter()
            .filter_map(|c| {
                let (title, body) = (Some(c.name.as_str()), c.description.as_deref());
                self.scored(query, title, body, || CampaignContext {
                    id: c.id,
                    name: c.name.clone(),
                    description: c.description.clone(),
                    platform: c.platform.clone(),
                    status: c.status,
                })
            })
            .collect()
    }

    fn scored<T>(
        &self,
        query: &str,
        title: Option<&str>,
        body: Option<&str>,
        item: impl FnOnce() -> T,
    ) -> Option<Scored<T>> {
        self.scorer
            .is_relevant(query, &[title, body])
            .then(|| Scored {
                relevance_score: self.scorer.score(query, title, body),
                item: item(),
            })
    }
}

/// The first `max_chars` characters of a document body.
pub fn preview(content: Option<&str>, max_chars: usize) -> String {
    content
        .unwrap_or_default()
        .chars()
        .take(max_chars)
        .collect()
}

fn or_empty<T>(domain: Domain, result: Result<Vec<T>, StoreError>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!(domain = %domain, error = %e, "Context lookup failed; domain left out of this turn");
        Vec::new()
    })
}

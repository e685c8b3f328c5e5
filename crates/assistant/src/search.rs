//! Unified search and recent activity across the four domains.

use std::sync::Arc;

use bizpilot_core::error::StoreError;
use bizpilot_core::records::{Campaign, Document, Domain, FinanceRecord, OwnerId, RecordId, Task};
use bizpilot_core::store::{DomainStore, ListQuery};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::relevance::RelevanceScorer;

/// Characters of document content shown in a hit.
const DOCUMENT_SNIPPET_CHARS: usize = 200;

pub const DEFAULT_SEARCH_LIMIT: usize = 50;
pub const DEFAULT_ACTIVITY_DAYS: i64 = 7;
pub const DEFAULT_ACTIVITY_LIMIT: usize = 20;
/// Widest activity window, in days.
pub const MAX_ACTIVITY_DAYS: i64 = 3650;

/// One record in a search result or activity feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub domain: Domain,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    /// Domain-specific fields (status, amount, platform, ...)
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

fn details(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl From<&Task> for RecordSummary {
    fn from(t: &Task) -> Self {
        Self {
            id: t.id,
            domain: Domain::Tasks,
            title: t.title.clone(),
            description: t.description.clone(),
            created_at: t.created_at,
            relevance_score: None,
            details: details(json!({
                "status": t.status,
                "priority": t.priority,
                "due_date": t.due_date,
                "category": t.category,
            })),
        }
    }
}

impl From<&FinanceRecord> for RecordSummary {
    fn from(r: &FinanceRecord) -> Self {
        Self {
            id: r.id,
            domain: Domain::Finance,
            title: format!(
                "{}: {}",
                r.kind.as_str(),
                r.description.as_deref().unwrap_or_default()
            ),
            description: Some(format!(
                "{:.2} - {}",
                r.amount,
                r.category.as_deref().unwrap_or("no category")
            )),
            created_at: r.created_at,
            relevance_score: None,
            details: details(json!({
                "amount": r.amount,
                "record_type": r.kind,
                "category": r.category,
                "date": r.date,
            })),
        }
    }
}

impl From<&Document> for RecordSummary {
    fn from(d: &Document) -> Self {
        let description = d.content.as_deref().map(|content| {
            if content.chars().count() > DOCUMENT_SNIPPET_CHARS {
                let head: String = content.chars().take(DOCUMENT_SNIPPET_CHARS).collect();
                format!("{head}...")
            } else {
                content.to_string()
            }
        });
        Self {
            id: d.id,
            domain: Domain::Documents,
            title: d.title.clone(),
            description,
            created_at: d.created_at,
            relevance_score: None,
            details: details(json!({ "doc_type": d.doc_type })),
        }
    }
}

impl From<&Campaign> for RecordSummary {
    fn from(c: &Campaign) -> Self {
        let description = c.description.clone().or_else(|| {
            Some(format!(
                "Campaign on {}",
                c.platform.as_deref().unwrap_or("an unspecified platform")
            ))
        });
        Self {
            id: c.id,
            domain: Domain::Marketing,
            title: c.name.clone(),
            description,
            created_at: c.created_at,
            relevance_score: None,
            details: details(json!({ "platform": c.platform, "status": c.status })),
        }
    }
}

/// Hits grouped by domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DomainGroups {
    pub tasks: Vec<RecordSummary>,
    pub finance: Vec<RecordSummary>,
    pub documents: Vec<RecordSummary>,
    pub marketing: Vec<RecordSummary>,
}

impl DomainGroups {
    pub fn total(&self) -> usize {
        self.tasks.len() + self.finance.len() + self.documents.len() + self.marketing.len()
    }

    /// The group for one domain.
    pub fn get(&self, domain: Domain) -> &[RecordSummary] {
        match domain {
            Domain::Tasks => &self.tasks,
            Domain::Finance => &self.finance,
            Domain::Documents => &self.documents,
            Domain::Marketing => &self.marketing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub query: String,
    #[serde(flatten)]
    pub groups: DomainGroups,
    pub total_results: usize,
}

/// Substring search ranked by the relevance scorer.
pub struct SearchService {
    store: Arc<dyn DomainStore>,
    scorer: Arc<dyn RelevanceScorer>,
}

impl SearchService {
    pub fn new(store: Arc<dyn DomainStore>, scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self { store, scorer }
    }

    /// Search every domain, or only `domain` when given. An unrecognized
    /// domain name or a blank query yields no hits.
    pub async fn search(
        &self,
        owner: OwnerId,
        query: &str,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<SearchResults, StoreError> {
        let needle = query.trim();
        let domains: Vec<Domain> = match domain {
            None => Domain::ALL.to_vec(),
            Some(name) => name.parse::<Domain>().into_iter().collect(),
        };

        let mut groups = DomainGroups::default();
        if !needle.is_empty() {
            for d in domains {
                let hits = self.search_domain(owner, needle, d, limit).await?;
                match d {
                    Domain::Tasks => groups.tasks = hits,
                    Domain::Finance => groups.finance = hits,
                    Domain::Documents => groups.documents = hits,
                    Domain::Marketing => groups.marketing = hits,
                }
            }
        }

        let total_results = groups.total();
        debug!(owner, query = needle, total_results, "Search finished");
        Ok(SearchResults {
            query: query.to_string(),
            groups,
            total_results,
        })
    }

    /// Hits within one domain, highest score first.
    pub async fn search_domain(
        &self,
        owner: OwnerId,
        query: &str,
        domain: Domain,
        limit: usize,
    ) -> Result<Vec<RecordSummary>, StoreError> {
        let q = ListQuery::matching(query, limit);
        let s = self.scorer.as_ref();
        let mut hits: Vec<RecordSummary> = match domain {
            Domain::Tasks => self
                .store
                .list_tasks(owner, &q)
                .await?
                .iter()
                .map(|t| {
                    ranked(t.into(), s.score(query, Some(t.title.as_str()), t.description.as_deref()))
                })
                .collect(),
            Domain::Finance => self
                .store
                .list_finance(owner, &q)
                .await?
                .iter()
                .map(|r| {
                    let score = s.score(query, r.description.as_deref(), r.category.as_deref());
                    ranked(r.into(), score)
                })
                .collect(),
            Domain::Documents => self
                .store
                .list_documents(owner, &q)
                .await?
                .iter()
                .map(|d| ranked(d.into(), s.score(query, Some(d.title.as_str()), d.content.as_deref())))
                .collect(),
            Domain::Marketing => self
                .store
                .list_campaigns(owner, &q)
                .await?
                .iter()
                .map(|c| ranked(c.into(), s.score(query, Some(c.name.as_str()), c.description.as_deref())))
                .collect(),
        };

        hits.sort_by(|a, b| {
            b.relevance_score
                .unwrap_or_default()
                .total_cmp(&a.relevance_score.unwrap_or_default())
        });
        Ok(hits)
    }

    /// Records created in the last `days` days (finance: dated), newest first.
    ///
    /// `days` is clamped to `0..=MAX_ACTIVITY_DAYS`.
    pub async fn recent_activity(
        &self,
        owner: OwnerId,
        days: i64,
        limit: usize,
    ) -> Result<DomainGroups, StoreError> {
        let window = Duration::days(days.clamp(0, MAX_ACTIVITY_DAYS));
        let q = ListQuery::since(Utc::now() - window, limit);
        let (tasks, finance, documents, campaigns) = tokio::try_join!(
            self.store.list_tasks(owner, &q),
            self.store.list_finance(owner, &q),
            self.store.list_documents(owner, &q),
            self.store.list_campaigns(owner, &q),
        )?;

        Ok(DomainGroups {
            tasks: tasks.iter().map(RecordSummary::from).collect(),
            finance: finance.iter().map(RecordSummary::from).collect(),
            documents: documents.iter().map(RecordSummary::from).collect(),
            marketing: campaigns.iter().map(RecordSummary::from).collect(),
        })
    }
}

fn ranked(mut summary: RecordSummary, score: f64) -> RecordSummary {
    summary.relevance_score = Some(score);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relevance::KeywordScorer;
    use bizpilot_core::records::{FinanceKind, NewCampaign, NewDocument, NewFinanceRecord, NewTask};
    use bizpilot_store::InMemoryStore;

    async fn seeded() -> (Arc<InMemoryStore>, SearchService) {
        let store = Arc::new(InMemoryStore::new());
        store.create_task(1, NewTask::titled("Send invoice to ACME")).await.unwrap();
        store
            .create_task(
                1,
                NewTask {
                    description: Some("Remember the ACME invoice".into()),
                    ..NewTask::titled("Call accountant")
                },
            )
            .await
            .unwrap();
        store
            .create_finance_record(
                1,
                NewFinanceRecord {
                    date: Utc::now().date_naive(),
                    amount: 500.0,
                    kind: FinanceKind::Income,
                    description: Some("ACME invoice paid".into()),
                    category: Some("sales".into()),
                },
            )
            .await
            .unwrap();
        store
            .create_document(
                1,
                NewDocument {
                    title: "Invoice 7".into(),
                    content: Some("a".repeat(300)),
                    doc_type: Some("invoice".into()),
                    ..NewDocument::default()
                },
            )
            .await
            .unwrap();
        store
            .create_campaign(
                1,
                NewCampaign {
                    name: "Spring".into(),
                    platform: Some("vk".into()),
                    ..NewCampaign::default()
                },
            )
            .await
            .unwrap();
        let service = SearchService::new(store.clone(), Arc::new(KeywordScorer));
        (store, service)
    }

    #[tokio::test]
    async fn searches_all_domains_and_counts() {
        let (_, service) = seeded().await;
        let results = service.search(1, "invoice", None, 50).await.unwrap();
        assert_eq!(results.groups.tasks.len(), 2);
        assert_eq!(results.groups.finance.len(), 1);
        assert_eq!(results.groups.documents.len(), 1);
        assert!(results.groups.marketing.is_empty());
        assert_eq!(results.total_results, 4);
    }

    #[tokio::test]
    async fn hits_are_ranked_by_score() {
        let (_, service) = seeded().await;
        let hits = service.search_domain(1, "invoice", Domain::Tasks, 50).await.unwrap();
        assert_eq!(hits[0].title, "Send invoice to ACME");
        let scores: Vec<f64> = hits.iter().map(|h| h.relevance_score.unwrap()).collect();
        assert!(scores[0] >= scores[1]);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[tokio::test]
    async fn domain_filter_and_unknown_domain() {
        let (_, service) = seeded().await;
        let only_docs = service.search(1, "invoice", Some("documents"), 50).await.unwrap();
        assert_eq!(only_docs.total_results, 1);
        assert!(only_docs.groups.tasks.is_empty());

        let unknown = service.search(1, "invoice", Some("weather"), 50).await.unwrap();
        assert_eq!(unknown.total_results, 0);

        let blank = service.search(1, "   ", None, 50).await.unwrap();
        assert_eq!(blank.total_results, 0);
    }

    #[tokio::test]
    async fn summaries_carry_domain_fields() {
        let (_, service) = seeded().await;
        let results = service.search(1, "invoice", None, 50).await.unwrap();

        let finance = &results.groups.finance[0];
        assert_eq!(finance.title, "income: ACME invoice paid");
        assert_eq!(finance.description.as_deref(), Some("500.00 - sales"));

        let doc = &results.groups.documents[0];
        assert!(doc.description.as_deref().unwrap().ends_with("..."));
        assert_eq!(doc.description.as_deref().unwrap().chars().count(), 203);

        let json = serde_json::to_value(finance).unwrap();
        assert_eq!(json["type"], "finance");
        assert_eq!(json["record_type"], "income");
    }

    #[tokio::test]
    async fn recent_activity_covers_every_domain() {
        let (_, service) = seeded().await;
        let feed = service.recent_activity(1, 7, 20).await.unwrap();
        assert_eq!(feed.get(Domain::Tasks).len(), 2);
        assert_eq!(feed.finance.len(), 1);
        assert_eq!(feed.marketing[0].description.as_deref(), Some("Campaign on vk"));
        assert!(feed.tasks.iter().all(|t| t.relevance_score.is_none()));

        let other = service.recent_activity(2, 7, 20).await.unwrap();
        assert_eq!(other.total(), 0);
    }

    #[tokio::test]
    async fn huge_activity_window_is_clamped() {
        let (_, service) = seeded().await;
        let feed = service.recent_activity(1, 200_000_000, 20).await.unwrap();
        assert_eq!(feed.tasks.len(), 2);
        assert_eq!(feed.finance.len(), 1);

        let widest = service.recent_activity(1, i64::MAX, 20).await.unwrap();
        assert_eq!(widest.total(), feed.total());
    }
}

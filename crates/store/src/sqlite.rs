//! SQLite store backed by sqlx.
//!
//! One database file holds the four domain tables plus
//! `chat_conversations` and `chat_messages`. Timestamps are stored as
//! fixed-width RFC 3339 text so they order lexically; finance dates as
//! `YYYY-MM-DD`. JSON-valued columns are stored as text.

use async_trait::async_trait;
use bizpilot_core::error::StoreError;
use bizpilot_core::message::{
    ChatStatistics, ContextRefs, Conversation, ConversationUpdate, DEFAULT_TITLE, Message,
    NewMessage, Role, round2,
};
use bizpilot_core::records::*;
use bizpilot_core::store::{ConversationStore, DomainStore, ListQuery};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

type Result<T> = std::result::Result<T, StoreError>;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A SQLite implementation of the domain and conversation stores.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database from an sqlx URL and run migrations.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self> {
        Self::with_max_connections(url, 4).await
    }

    pub async fn with_max_connections(url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
            if let Some(dir) = options.get_filename().parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(|e| {
                    StoreError::Storage(format!("Failed to create {}: {e}", dir.display()))
                })?;
            }
        }

        // Every connection to ":memory:" is a separate database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {url}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let statements: [(&str, &str); 10] = [
            (
                "tasks table",
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id            INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id      INTEGER NOT NULL,
                    title         TEXT NOT NULL,
                    description   TEXT,
                    priority      TEXT NOT NULL DEFAULT 'medium',
                    status        TEXT NOT NULL DEFAULT 'todo',
                    due_date      TEXT,
                    category      TEXT,
                    ai_suggested  INTEGER NOT NULL DEFAULT 0,
                    created_at    TEXT NOT NULL
                )
                "#,
            ),
            (
                "finance_records table",
                r#"
                CREATE TABLE IF NOT EXISTS finance_records (
                    id            INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id      INTEGER NOT NULL,
                    date          TEXT NOT NULL,
                    amount        REAL NOT NULL,
                    kind          TEXT NOT NULL,
                    description   TEXT,
                    category      TEXT,
                    created_at    TEXT NOT NULL
                )
                "#,
            ),
            (
                "documents table",
                r#"
                CREATE TABLE IF NOT EXISTS documents (
                    id            INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id      INTEGER NOT NULL,
                    title         TEXT NOT NULL,
                    content       TEXT,
                    doc_type      TEXT,
                    variables     TEXT NOT NULL DEFAULT '{}',
                    created_at    TEXT NOT NULL
                )
                "#,
            ),
            (
                "marketing_campaigns table",
                r#"
                CREATE TABLE IF NOT EXISTS marketing_campaigns (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id        INTEGER NOT NULL,
                    name            TEXT NOT NULL,
                    description     TEXT,
                    platform        TEXT,
                    content_type    TEXT,
                    target_audience TEXT,
                    budget          REAL,
                    status          TEXT NOT NULL DEFAULT 'draft',
                    ai_generated    INTEGER NOT NULL DEFAULT 0,
                    created_at      TEXT NOT NULL
                )
                "#,
            ),
            (
                "chat_conversations table",
                r#"
                CREATE TABLE IF NOT EXISTS chat_conversations (
                    id            INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id      INTEGER NOT NULL,
                    title         TEXT NOT NULL,
                    archived      INTEGER NOT NULL DEFAULT 0,
                    metadata      TEXT NOT NULL DEFAULT '{}',
                    created_at    TEXT NOT NULL,
                    updated_at    TEXT NOT NULL
                )
                "#,
            ),
            (
                "chat_messages table",
                r#"
                CREATE TABLE IF NOT EXISTS chat_messages (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id INTEGER NOT NULL
                                    REFERENCES chat_conversations(id) ON DELETE CASCADE,
                    role            TEXT NOT NULL,
                    content         TEXT NOT NULL,
                    created_at      TEXT NOT NULL,
                    tokens_used     INTEGER,
                    model_used      TEXT,
                    context         TEXT NOT NULL DEFAULT '{}',
                    user_rating     INTEGER,
                    user_feedback   TEXT
                )
                "#,
            ),
            (
                "tasks index",
                "CREATE INDEX IF NOT EXISTS idx_tasks_owner_created ON tasks(owner_id, created_at DESC)",
            ),
            (
                "finance index",
                "CREATE INDEX IF NOT EXISTS idx_finance_owner_date ON finance_records(owner_id, date DESC)",
            ),
            (
                "conversations index",
                "CREATE INDEX IF NOT EXISTS idx_conversations_owner ON chat_conversations(owner_id, updated_at DESC)",
            ),
            (
                "messages index",
                "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON chat_messages(conversation_id, created_at)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    // ── Row mapping ─────────────────────────────────────────────────────────

    fn row_to_task(row: &SqliteRow) -> Result<Task> {
        let priority: String = col(row, "priority")?;
        let status: String = col(row, "status")?;
        let due_date: Option<String> = col(row, "due_date")?;
        Ok(Task {
            id: col(row, "id")?,
            owner_id: col(row, "owner_id")?,
            title: col(row, "title")?,
            description: col(row, "description")?,
            priority: priority.parse().map_err(StoreError::Invalid)?,
            status: status.parse().map_err(StoreError::Invalid)?,
            due_date: due_date.as_deref().map(parse_ts).transpose()?,
            category: col(row, "category")?,
            ai_suggested: col(row, "ai_suggested")?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
        })
    }

    fn row_to_finance(row: &SqliteRow) -> Result<FinanceRecord> {
        let kind: String = col(row, "kind")?;
        Ok(FinanceRecord {
            id: col(row, "id")?,
            owner_id: col(row, "owner_id")?,
            date: parse_date(&col::<String>(row, "date")?)?,
            amount: col(row, "amount")?,
            kind: kind.parse().map_err(StoreError::Invalid)?,
            description: col(row, "description")?,
            category: col(row, "category")?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
        })
    }

    fn row_to_document(row: &SqliteRow) -> Result<Document> {
        Ok(Document {
            id: col(row, "id")?,
            owner_id: col(row, "owner_id")?,
            title: col(row, "title")?,
            content: col(row, "content")?,
            doc_type: col(row, "doc_type")?,
            variables: parse_json(&col::<String>(row, "variables")?)?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
        })
    }

    fn row_to_campaign(row: &SqliteRow) -> Result<Campaign> {
        let status: String = col(row, "status")?;
        Ok(Campaign {
            id: col(row, "id")?,
            owner_id: col(row, "owner_id")?,
            name: col(row, "name")?,
            description: col(row, "description")?,
            platform: col(row, "platform")?,
            content_type: col(row, "content_type")?,
            target_audience: col(row, "target_audience")?,
            budget: col(row, "budget")?,
            status: status.parse().map_err(StoreError::Invalid)?,
            ai_generated: col(row, "ai_generated")?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
        })
    }

    fn row_to_conversation(row: &SqliteRow) -> Result<Conversation> {
        Ok(Conversation {
            id: col(row, "id")?,
            owner_id: col(row, "owner_id")?,
            title: col(row, "title")?,
            archived: col(row, "archived")?,
            metadata: parse_json(&col::<String>(row, "metadata")?)?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
            updated_at: parse_ts(&col::<String>(row, "updated_at")?)?,
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<Message> {
        let role: String = col(row, "role")?;
        let context: String = col(row, "context")?;
        let tokens_used: Option<i64> = col(row, "tokens_used")?;
        let user_rating: Option<i64> = col(row, "user_rating")?;
        Ok(Message {
            id: col(row, "id")?,
            conversation_id: col(row, "conversation_id")?,
            role: Role::parse(&role)
                .ok_or_else(|| StoreError::Invalid(format!("message role '{role}'")))?,
            content: col(row, "content")?,
            created_at: parse_ts(&col::<String>(row, "created_at")?)?,
            tokens_used: tokens_used.map(|t| t as u32),
            model_used: col(row, "model_used")?,
            context: serde_json::from_str::<ContextRefs>(&context)
                .map_err(|e| StoreError::Invalid(format!("message context: {e}")))?,
            user_rating: user_rating.map(|r| r as u8),
            user_feedback: col(row, "user_feedback")?,
        })
    }

    async fn insert_message(
        conn: &mut sqlx::SqliteConnection,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<Message> {
        let context = serde_json::to_string(&message.context)
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        let id = sqlx::query(
            "INSERT INTO chat_messages
                (conversation_id, role, content, created_at, tokens_used, model_used, context)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(ts(&now))
        .bind(message.tokens_used.map(i64::from))
        .bind(&message.model_used)
        .bind(context)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert message failed: {e}")))?
        .last_insert_rowid();

        Ok(Message {
            id,
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content,
            created_at: now,
            tokens_used: message.tokens_used,
            model_used: message.model_used,
            context: message.context,
            user_rating: None,
            user_feedback: None,
        })
    }

    async fn insert_task(
        conn: &mut sqlx::SqliteConnection,
        owner: OwnerId,
        task: NewTask,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let id = sqlx::query(
            "INSERT INTO tasks
                (owner_id, title, description, priority, status, due_date, category, ai_suggested, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.as_str())
        .bind(TaskStatus::Todo.as_str())
        .bind(task.due_date.as_ref().map(ts))
        .bind(&task.category)
        .bind(task.ai_suggested)
        .bind(ts(&now))
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert task failed: {e}")))?
        .last_insert_rowid();

        Ok(Task {
            id,
            owner_id: owner,
            title: task.title,
            description: task.description,
            priority: task.priority,
            status: TaskStatus::Todo,
            due_date: task.due_date,
            category: task.category,
            ai_suggested: task.ai_suggested,
            created_at: now,
        })
    }

    async fn query_all<'q, T>(
        &self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        map: fn(&SqliteRow) -> Result<T>,
    ) -> Result<Vec<T>> {
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(map).collect()
    }
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Invalid(format!("timestamp '{s}': {e}")))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| StoreError::Invalid(format!("date '{s}': {e}")))
}

fn parse_json(s: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    serde_json::from_str(s).map_err(|e| StoreError::Invalid(format!("json column: {e}")))
}

fn to_json(map: &serde_json::Map<String, serde_json::Value>) -> Result<String> {
    serde_json::to_string(map).map_err(|e| StoreError::Storage(e.to_string()))
}

/// Lowercased needle for `instr(lower(..), ?)` matching.
fn needle(query: &ListQuery) -> Option<String> {
    query.text.as_ref().map(|t| t.to_lowercase())
}

#[async_trait]
impl DomainStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list_tasks(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Task>> {
        let q = sqlx::query(
            "SELECT * FROM tasks
             WHERE owner_id = ?1
               AND (?2 IS NULL OR created_at >= ?2)
               AND (?3 IS NULL
                    OR instr(lower(title), ?3) > 0
                    OR instr(lower(coalesce(description, '')), ?3) > 0
                    OR instr(lower(coalesce(category, '')), ?3) > 0)
             ORDER BY created_at DESC, id DESC
             LIMIT ?4",
        )
        .bind(owner)
        .bind(query.since.as_ref().map(ts))
        .bind(needle(query))
        .bind(query.limit as i64);
        self.query_all(q, Self::row_to_task).await
    }

    async fn list_finance(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<FinanceRecord>> {
        let q = sqlx::query(
            "SELECT * FROM finance_records
             WHERE owner_id = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL
                    OR instr(lower(coalesce(description, '')), ?3) > 0
                    OR instr(lower(coalesce(category, '')), ?3) > 0)
             ORDER BY date DESC, id DESC
             LIMIT ?4",
        )
        .bind(owner)
        .bind(
            query
                .since
                .map(|s| s.date_naive().format(DATE_FORMAT).to_string()),
        )
        .bind(needle(query))
        .bind(query.limit as i64);
        self.query_all(q, Self::row_to_finance).await
    }

    async fn list_documents(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Document>> {
        let q = sqlx::query(
            "SELECT * FROM documents
             WHERE owner_id = ?1
               AND (?2 IS NULL OR created_at >= ?2)
               AND (?3 IS NULL
                    OR instr(lower(title), ?3) > 0
                    OR instr(lower(coalesce(content, '')), ?3) > 0
                    OR instr(lower(coalesce(doc_type, '')), ?3) > 0)
             ORDER BY created_at DESC, id DESC
             LIMIT ?4",
        )
        .bind(owner)
        .bind(query.since.as_ref().map(ts))
        .bind(needle(query))
        .bind(query.limit as i64);
        self.query_all(q, Self::row_to_document).await
    }

    async fn list_campaigns(&self, owner: OwnerId, query: &ListQuery) -> Result<Vec<Campaign>> {
        let q = sqlx::query(
            "SELECT * FROM marketing_campaigns
             WHERE owner_id = ?1
               AND (?2 IS NULL OR created_at >= ?2)
               AND (?3 IS NULL
                    OR instr(lower(name), ?3) > 0
                    OR instr(lower(coalesce(description, '')), ?3) > 0
                    OR instr(lower(coalesce(platform, '')), ?3) > 0)
             ORDER BY created_at DESC, id DESC
             LIMIT ?4",
        )
        .bind(owner)
        .bind(query.since.as_ref().map(ts))
        .bind(needle(query))
        .bind(query.limit as i64);
        self.query_all(q, Self::row_to_campaign).await
    }

    async fn create_task(&self, owner: OwnerId, task: NewTask) -> Result<Task> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Self::insert_task(&mut conn, owner, task, Utc::now()).await
    }

    async fn create_tasks(&self, owner: OwnerId, tasks: Vec<NewTask>) -> Result<Vec<Task>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("Begin transaction failed: {e}")))?;
        let now = Utc::now();
        let mut created = Vec::with_capacity(tasks.len());
        for task in tasks {
            created.push(Self::insert_task(&mut tx, owner, task, now).await?);
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("Commit failed: {e}")))?;
        Ok(created)
    }

    async fn create_finance_record(
        &self,
        owner: OwnerId,
        record: NewFinanceRecord,
    ) -> Result<FinanceRecord> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO finance_records
                (owner_id, date, amount, kind, description, category, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(record.date.format(DATE_FORMAT).to_string())
        .bind(record.amount)
        .bind(record.kind.as_str())
        .bind(&record.description)
        .bind(&record.category)
        .bind(ts(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert finance record failed: {e}")))?
        .last_insert_rowid();

        Ok(FinanceRecord {
            id,
            owner_id: owner,
            date: record.date,
            amount: record.amount,
            kind: record.kind,
            description: record.description,
            category: record.category,
            created_at: now,
        })
    }

    async fn finance_between(
        &self,
        owner: OwnerId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<FinanceRecord>> {
        let q = sqlx::query(
            "SELECT * FROM finance_records
             WHERE owner_id = ? AND date >= ? AND date <= ?
             ORDER BY date ASC, id ASC",
        )
        .bind(owner)
        .bind(start.format(DATE_FORMAT).to_string())
        .bind(end.format(DATE_FORMAT).to_string());
        self.query_all(q, Self::row_to_finance).await
    }

    async fn create_document(&self, owner: OwnerId, document: NewDocument) -> Result<Document> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO documents (owner_id, title, content, doc_type, variables, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.doc_type)
        .bind(to_json(&document.variables)?)
        .bind(ts(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert document failed: {e}")))?
        .last_insert_rowid();

        Ok(Document {
            id,
            owner_id: owner,
            title: document.title,
            content: document.content,
            doc_type: document.doc_type,
            variables: document.variables,
            created_at: now,
        })
    }

    async fn create_campaign(&self, owner: OwnerId, campaign: NewCampaign) -> Result<Campaign> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO marketing_campaigns
                (owner_id, name, description, platform, content_type, target_audience,
                 budget, status, ai_generated, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(owner)
        .bind(&campaign.name)
        .bind(&campaign.description)
        .bind(&campaign.platform)
        .bind(&campaign.content_type)
        .bind(&campaign.target_audience)
        .bind(campaign.budget)
        .bind(CampaignStatus::Draft.as_str())
        .bind(campaign.ai_generated)
        .bind(ts(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert campaign failed: {e}")))?
        .last_insert_rowid();

        Ok(Campaign {
            id,
            owner_id: owner,
            name: campaign.name,
            description: campaign.description,
            platform: campaign.platform,
            content_type: campaign.content_type,
            target_audience: campaign.target_audience,
            budget: campaign.budget,
            status: CampaignStatus::Draft,
            ai_generated: campaign.ai_generated,
            created_at: now,
        })
    }

    async fn get_campaign(&self, owner: OwnerId, id: RecordId) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM marketing_campaigns WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.as_ref().map(Self::row_to_campaign).transpose()
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(
        &self,
        owner: OwnerId,
        title: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO chat_conversations (owner_id, title, archived, metadata, created_at, updated_at)
             VALUES (?, ?, 0, ?, ?, ?)",
        )
        .bind(owner)
        .bind(title)
        .bind(to_json(&metadata)?)
        .bind(ts(&now))
        .bind(ts(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Insert conversation failed: {e}")))?
        .last_insert_rowid();

        Ok(Conversation {
            id,
            owner_id: owner,
            title: title.to_string(),
            archived: false,
            metadata,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_conversation(
        &self,
        owner: OwnerId,
        id: RecordId,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM chat_conversations WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn list_conversations(
        &self,
        owner: OwnerId,
        include_archived: bool,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        let q = sqlx::query(
            "SELECT * FROM chat_conversations
             WHERE owner_id = ? AND (? OR archived = 0)
             ORDER BY updated_at DESC, id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(owner)
        .bind(include_archived)
        .bind(limit as i64)
        .bind(skip as i64);
        self.query_all(q, Self::row_to_conversation).await
    }

    async fn update_conversation(
        &self,
        owner: OwnerId,
        id: RecordId,
        update: ConversationUpdate,
    ) -> Result<Option<Conversation>> {
        let Some(mut conversation) = self.get_conversation(owner, id).await? else {
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

        sqlx::query(
            "UPDATE chat_conversations
             SET title = ?, archived = ?, metadata = ?, updated_at = ?
             WHERE id = ? AND owner_id = ?",
        )
        .bind(&conversation.title)
        .bind(conversation.archived)
        .bind(to_json(&conversation.metadata)?)
        .bind(ts(&conversation.updated_at))
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Update conversation failed: {e}")))?;

        Ok(Some(conversation))
    }

    async fn delete_conversation(&self, owner: OwnerId, id: RecordId) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("Begin transaction failed: {e}")))?;
        sqlx::query(
            "DELETE FROM chat_messages WHERE conversation_id IN
                (SELECT id FROM chat_conversations WHERE id = ? AND owner_id = ?)",
        )
        .bind(id)
        .bind(owner)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("Delete messages failed: {e}")))?;
        let result = sqlx::query("DELETE FROM chat_conversations WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Delete conversation failed: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("Commit failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_messages(
        &self,
        conversation_id: RecordId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let q = sqlx::query(
            "SELECT * FROM chat_messages WHERE conversation_id = ?
             ORDER BY created_at ASC, id ASC
             LIMIT ? OFFSET ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .bind(skip as i64);
        self.query_all(q, Self::row_to_message).await
    }

    async fn recent_messages(
        &self,
        conversation_id: RecordId,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let q = sqlx::query(
            "SELECT * FROM (
                SELECT * FROM chat_messages WHERE conversation_id = ?
                ORDER BY created_at DESC, id DESC
                LIMIT ?
             ) ORDER BY created_at ASC, id ASC",
        )
        .bind(conversation_id)
        .bind(limit as i64);
        self.query_all(q, Self::row_to_message).await
    }

    async fn record_turn(
        &self,
        user: NewMessage,
        reply: NewMessage,
        title: Option<String>,
    ) -> Result<(Message, Message)> {
        let conversation_id = user.conversation_id;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("Begin transaction failed: {e}")))?;

        let now = Utc::now();
        let user = Self::insert_message(&mut tx, user, now).await?;
        let reply = Self::insert_message(&mut tx, reply, now).await?;

        let updated = sqlx::query(
            "UPDATE chat_conversations
             SET updated_at = max(created_at, ?),
                 title = coalesce(CASE WHEN title = ? THEN ? END, title)
             WHERE id = ?",
        )
        .bind(ts(&now))
        .bind(DEFAULT_TITLE)
        .bind(title)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("Touch conversation failed: {e}")))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "conversation",
                id: conversation_id,
            });
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("Commit failed: {e}")))?;
        Ok((user, reply))
    }

    async fn get_message(&self, owner: OwnerId, message_id: RecordId) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT m.* FROM chat_messages m
             JOIN chat_conversations c ON c.id = m.conversation_id
             WHERE m.id = ? AND c.owner_id = ?",
        )
        .bind(message_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        row.as_ref().map(Self::row_to_message).transpose()
    }

    async fn set_feedback(
        &self,
        message_id: RecordId,
        rating: u8,
        feedback: Option<String>,
    ) -> Result<Message> {
        let row = sqlx::query(
            "UPDATE chat_messages SET user_rating = ?, user_feedback = ?
             WHERE id = ? RETURNING *",
        )
        .bind(i64::from(rating))
        .bind(feedback)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("Rate message failed: {e}")))?
        .ok_or(StoreError::NotFound {
            entity: "message",
            id: message_id,
        })?;
        Self::row_to_message(&row)
    }

    async fn statistics(&self, owner: OwnerId) -> Result<ChatStatistics> {
        let totals = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM chat_conversations WHERE owner_id = ?1) AS conversations,
                COUNT(m.id) AS messages,
                COALESCE(SUM(m.tokens_used), 0) AS tokens,
                AVG(m.user_rating) AS avg_rating
             FROM chat_messages m
             JOIN chat_conversations c ON c.id = m.conversation_id
             WHERE c.owner_id = ?1",
        )
        .bind(owner)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let most_used_model: Option<String> = sqlx::query(
            "SELECT m.model_used, COUNT(*) AS uses FROM chat_messages m
             JOIN chat_conversations c ON c.id = m.conversation_id
             WHERE c.owner_id = ? AND m.model_used IS NOT NULL
             GROUP BY m.model_used
             ORDER BY uses DESC, m.model_used ASC
             LIMIT 1",
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?
        .map(|row| col(&row, "model_used"))
        .transpose()?;

        let conversations: i64 = col(&totals, "conversations")?;
        let messages: i64 = col(&totals, "messages")?;
        let tokens: i64 = col(&totals, "tokens")?;
        let avg_rating: Option<f64> = col(&totals, "avg_rating")?;

        Ok(ChatStatistics {
            total_conversations: conversations as u64,
            total_messages: messages as u64,
            avg_messages_per_conversation: if conversations > 0 {
                round2(messages as f64 / conversations as f64)
            } else {
                0.0
            },
            total_tokens_used: tokens as u64,
            most_used_model,
            avg_user_rating: avg_rating.map(round2),
        })
    }
}

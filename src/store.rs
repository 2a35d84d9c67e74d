//! SQLite persistence for tasks, sessions, injections, and knowledge.
//!
//! One database file holds four primary tables plus FTS5 shadow indexes:
//!
//! 1. **tasks** - research task lifecycle (queued/running/completed/failed/injected)
//! 2. **knowledge** - append-only store of completed findings
//! 3. **sessions** - observed assistant sessions and their injection counters
//! 4. **injections** - append-only audit trail of surfaced content
//!
//! `tasks_fts` and `knowledge_fts` are external-content FTS5 tables mirrored
//! inside the same transaction as every primary-row write, so the shadow
//! index never drifts from the primary rows.
//!
//! WAL mode is enabled for concurrent access; the connection itself is
//! wrapped in a mutex, which gives the single-writer-at-a-time guarantee the
//! queue and injection manager rely on.

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    InjectionRecord, InjectionType, KnowledgeCategory, KnowledgeEntry, ResearchDepth,
    ResearchResult, ResearchTask, Session, TaskOrigin, TaskStatus,
};

/// Shared handle to the scout database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (creating if needed) the database at the given path
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock means another thread panicked mid-write; the
        // connection itself is still usable for reads and fresh writes.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize database schema with all tables, indexes, and FTS shadows
    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                query TEXT NOT NULL,
                context TEXT,
                depth TEXT NOT NULL,
                status TEXT NOT NULL,
                origin TEXT NOT NULL,
                session_id TEXT,
                priority INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                error TEXT,
                result_json TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_queue_order
                ON tasks(status, priority DESC, created_at ASC);
            CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks(session_id);

            CREATE VIRTUAL TABLE IF NOT EXISTS tasks_fts USING fts5(
                query,
                content='tasks',
                content_rowid='rowid',
                tokenize='porter unicode61'
            );

            CREATE TABLE IF NOT EXISTS knowledge (
                id TEXT PRIMARY KEY,
                task_id TEXT,
                session_id TEXT,
                project_path TEXT,
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT NOT NULL,
                content TEXT NOT NULL,
                confidence REAL NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_knowledge_created ON knowledge(created_at DESC);

            CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
                title, summary, content,
                content='knowledge',
                content_rowid='rowid',
                tokenize='porter unicode61'
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                project_path TEXT,
                injection_count INTEGER NOT NULL DEFAULT 0,
                tokens_injected INTEGER NOT NULL DEFAULT 0,
                last_injection_at TEXT
            );

            CREATE TABLE IF NOT EXISTS injections (
                id TEXT PRIMARY KEY,
                candidate_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                content TEXT NOT NULL,
                tokens_estimate INTEGER NOT NULL,
                accepted INTEGER NOT NULL DEFAULT 1,
                injection_type TEXT NOT NULL,

                FOREIGN KEY(session_id) REFERENCES sessions(id)
            );

            CREATE INDEX IF NOT EXISTS idx_injections_session
                ON injections(session_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )?;
        Ok(())
    }

    /// Current schema version
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock();
        let version =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })?;
        Ok(version)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Persist a new task and mirror its query text into the FTS index.
    pub fn insert_task(&self, task: &ResearchTask) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO tasks
               (id, query, context, depth, status, origin, session_id, priority,
                retry_count, created_at, started_at, completed_at, error, result_json)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"#,
            params![
                task.id.to_string(),
                task.query,
                task.context,
                task.depth.as_str(),
                task.status.as_str(),
                task.origin.as_str(),
                task.session_id,
                task.priority as i64,
                task.retry_count as i64,
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.error,
                task.result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;
        tx.execute(
            "INSERT INTO tasks_fts(rowid, query)
             SELECT rowid, query FROM tasks WHERE id = ?1",
            params![task.id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Keyed lookup by task id
    pub fn get_task(&self, id: &Uuid) -> Result<Option<ResearchTask>> {
        let conn = self.lock();
        let task = conn
            .query_row(
                "SELECT * FROM tasks WHERE id = ?1",
                params![id.to_string()],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Number of tasks currently in `queued` state
    pub fn count_queued(&self) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE status = 'queued'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Up to `n` queued tasks, priority descending then FIFO within a
    /// priority. Pure read; claiming is separate.
    pub fn dequeue_batch(&self, n: usize) -> Result<Vec<ResearchTask>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE status = 'queued'
             ORDER BY priority DESC, created_at ASC
             LIMIT ?1",
        )?;
        let tasks = stmt
            .query_map(params![n as i64], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Atomically claim a queued task for a worker. Returns false if another
    /// worker got there first (or the task is no longer queued).
    pub fn claim_task(&self, id: &Uuid) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tasks SET status = 'running', started_at = ?1
             WHERE id = ?2 AND status = 'queued'",
            params![Local::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// Attach a result and move the task to `completed`. Refused once the
    /// task is in any state other than `running` (monotonic transitions).
    pub fn complete_task(&self, id: &Uuid, result: &ResearchResult) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tasks SET status = 'completed', completed_at = ?1, result_json = ?2
             WHERE id = ?3 AND status = 'running'",
            params![
                Local::now().to_rfc3339(),
                serde_json::to_string(result)?,
                id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(Error::InvalidTransition {
                task: *id,
                detail: "complete refused: task is not running".to_string(),
            });
        }
        Ok(())
    }

    /// Move a running task to terminal `failed` with an error message.
    pub fn fail_task(&self, id: &Uuid, error: &str) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tasks SET status = 'failed', completed_at = ?1, error = ?2
             WHERE id = ?3 AND status = 'running'",
            params![Local::now().to_rfc3339(), error, id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::InvalidTransition {
                task: *id,
                detail: "fail refused: task is not running".to_string(),
            });
        }
        Ok(())
    }

    /// Put a timed-out running task back in the queue at the same priority
    /// with its retry counter bumped.
    pub fn requeue_task(&self, id: &Uuid, retry_count: u32) -> Result<()> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tasks SET status = 'queued', started_at = NULL, retry_count = ?1
             WHERE id = ?2 AND status = 'running'",
            params![retry_count as i64, id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::InvalidTransition {
                task: *id,
                detail: "requeue refused: task is not running".to_string(),
            });
        }
        Ok(())
    }

    /// Overlay flag set when the injection manager consumes a completed
    /// task. Only valid from `completed`.
    pub fn mark_injected(&self, id: &Uuid) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tasks SET status = 'injected' WHERE id = ?1 AND status = 'completed'",
            params![id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// Recently completed (not yet injected) tasks, newest first. Tasks tied
    /// to a different session are excluded; global tasks are included.
    pub fn completed_tasks(
        &self,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ResearchTask>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks
             WHERE status = 'completed'
               AND (session_id IS NULL OR session_id = ?1)
             ORDER BY completed_at DESC
             LIMIT ?2",
        )?;
        let tasks = stmt
            .query_map(params![session_id, limit as i64], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Has this query (or a very similar one) already been researched?
    /// Consulted by callers before enqueueing; the queue itself never dedups.
    pub fn has_similar_task(&self, query: &str) -> Result<bool> {
        let match_expr = fts_match_expression(query);
        if match_expr.is_empty() {
            return Ok(false);
        }
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks_fts WHERE tasks_fts MATCH ?1",
            params![match_expr],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ------------------------------------------------------------------
    // Knowledge
    // ------------------------------------------------------------------

    /// Append a knowledge entry and mirror it into the FTS index within the
    /// same transaction.
    pub fn append_knowledge(&self, entry: &KnowledgeEntry) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO knowledge
               (id, task_id, session_id, project_path, category, title, summary,
                content, confidence, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                entry.id.to_string(),
                entry.task_id.map(|t| t.to_string()),
                entry.session_id,
                entry.project_path,
                entry.category.as_str(),
                entry.title,
                entry.summary,
                entry.content,
                entry.confidence,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "INSERT INTO knowledge_fts(rowid, title, summary, content)
             SELECT rowid, title, summary, content FROM knowledge WHERE id = ?1",
            params![entry.id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Ranked keyword search over stored knowledge. Double-quoted phrases in
    /// the input are matched exactly; other tokens are OR-ed.
    pub fn search_knowledge(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let match_expr = fts_match_expression(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT k.* FROM knowledge_fts fts
             JOIN knowledge k ON k.rowid = fts.rowid
             WHERE knowledge_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![match_expr, limit as i64], row_to_knowledge)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Sessions & injections
    // ------------------------------------------------------------------

    /// Create a session on first observed activity, or refresh
    /// `last_activity` on an existing one. Returns the current row.
    pub fn touch_session(&self, id: &str, project_path: Option<&str>) -> Result<Session> {
        let now = Local::now().to_rfc3339();
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO sessions (id, started_at, last_activity, project_path)
                 VALUES (?1, ?2, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    last_activity = excluded.last_activity,
                    project_path = COALESCE(excluded.project_path, sessions.project_path)",
                params![id, now, project_path],
            )?;
        }
        self.get_session(id)?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    pub fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.lock();
        let session = conn
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                params![id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    /// Record one injection and update the owning session's counters and
    /// cooldown clock in the same transaction.
    pub fn record_injection(&self, record: &InjectionRecord) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            r#"INSERT INTO injections
               (id, candidate_id, session_id, created_at, content, tokens_estimate,
                accepted, injection_type)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                record.id.to_string(),
                record.candidate_id,
                record.session_id,
                record.created_at.to_rfc3339(),
                record.content,
                record.tokens_estimate as i64,
                record.accepted as i64,
                record.injection_type.as_str(),
            ],
        )?;
        tx.execute(
            "UPDATE sessions SET
                injection_count = injection_count + 1,
                tokens_injected = tokens_injected + ?1,
                last_injection_at = ?2,
                last_activity = ?2
             WHERE id = ?3",
            params![
                record.tokens_estimate as i64,
                record.created_at.to_rfc3339(),
                record.session_id
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Audit trail for a session, newest first
    pub fn injections_for_session(&self, session_id: &str) -> Result<Vec<InjectionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM injections WHERE session_id = ?1 ORDER BY created_at DESC",
        )?;
        let records = stmt
            .query_map(params![session_id], row_to_injection)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// Build an FTS5 MATCH expression from free text. A double-quoted span is
/// kept as an exact phrase; remaining tokens are quoted individually and
/// OR-ed so stray punctuation never produces FTS syntax errors.
pub fn fts_match_expression(input: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut rest = input;

    // Pull out explicit "quoted phrases" first.
    while let Some(start) = rest.find('"') {
        if let Some(len) = rest[start + 1..].find('"') {
            let phrase = &rest[start + 1..start + 1 + len];
            let cleaned: String = phrase
                .chars()
                .filter(|c| c.is_alphanumeric() || c.is_whitespace())
                .collect();
            if !cleaned.trim().is_empty() {
                parts.push(format!("\"{}\"", cleaned.trim()));
            }
            rest = &rest[start + 1 + len + 1..];
        } else {
            break;
        }
    }

    let mut tokens: Vec<String> = input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    tokens.dedup();
    parts.extend(tokens);
    parts.join(" OR ")
}

fn parse_dt(column: usize, raw: &str) -> rusqlite::Result<DateTime<Local>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn bad_enum(column: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unrecognized value: {}", raw).into(),
    )
}

fn row_to_task(row: &Row) -> rusqlite::Result<ResearchTask> {
    let id_str: String = row.get("id")?;
    let depth_str: String = row.get("depth")?;
    let status_str: String = row.get("status")?;
    let origin_str: String = row.get("origin")?;
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let result_json: Option<String> = row.get("result_json")?;

    Ok(ResearchTask {
        id: Uuid::parse_str(&id_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        query: row.get("query")?,
        context: row.get("context")?,
        depth: ResearchDepth::parse(&depth_str).ok_or_else(|| bad_enum(3, &depth_str))?,
        status: TaskStatus::parse(&status_str).ok_or_else(|| bad_enum(4, &status_str))?,
        origin: TaskOrigin::parse(&origin_str).ok_or_else(|| bad_enum(5, &origin_str))?,
        session_id: row.get("session_id")?,
        priority: row.get::<_, i64>("priority")? as u8,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        created_at: parse_dt(9, &created_at)?,
        started_at: started_at.as_deref().map(|s| parse_dt(10, s)).transpose()?,
        completed_at: completed_at
            .as_deref()
            .map(|s| parse_dt(11, s))
            .transpose()?,
        error: row.get("error")?,
        result: result_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    13,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
    })
}

fn row_to_knowledge(row: &Row) -> rusqlite::Result<KnowledgeEntry> {
    let id_str: String = row.get("id")?;
    let task_id: Option<String> = row.get("task_id")?;
    let category_str: String = row.get("category")?;
    let created_at: String = row.get("created_at")?;

    Ok(KnowledgeEntry {
        id: Uuid::parse_str(&id_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        task_id: task_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        session_id: row.get("session_id")?,
        project_path: row.get("project_path")?,
        category: KnowledgeCategory::parse(&category_str)
            .ok_or_else(|| bad_enum(4, &category_str))?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        content: row.get("content")?,
        confidence: row.get("confidence")?,
        created_at: parse_dt(9, &created_at)?,
    })
}

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let started_at: String = row.get("started_at")?;
    let last_activity: String = row.get("last_activity")?;
    let last_injection_at: Option<String> = row.get("last_injection_at")?;

    Ok(Session {
        id: row.get("id")?,
        started_at: parse_dt(1, &started_at)?,
        last_activity: parse_dt(2, &last_activity)?,
        project_path: row.get("project_path")?,
        injection_count: row.get::<_, i64>("injection_count")? as u32,
        tokens_injected: row.get::<_, i64>("tokens_injected")? as u32,
        last_injection_at: last_injection_at
            .as_deref()
            .map(|s| parse_dt(6, s))
            .transpose()?,
    })
}

fn row_to_injection(row: &Row) -> rusqlite::Result<InjectionRecord> {
    let id_str: String = row.get("id")?;
    let created_at: String = row.get("created_at")?;
    let type_str: String = row.get("injection_type")?;

    Ok(InjectionRecord {
        id: Uuid::parse_str(&id_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        candidate_id: row.get("candidate_id")?,
        session_id: row.get("session_id")?,
        created_at: parse_dt(3, &created_at)?,
        content: row.get("content")?,
        tokens_estimate: row.get::<_, i64>("tokens_estimate")? as u32,
        accepted: row.get::<_, i64>("accepted")? != 0,
        injection_type: InjectionType::parse(&type_str).ok_or_else(|| bad_enum(7, &type_str))?,
    })
}

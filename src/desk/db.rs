use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, Row, params};

use super::models::{LookupKey, RepairRequest, RepairStatus, TicketPatch, is_valid_column_name};
use super::store::TicketStore;
use crate::errors::StoreError;

/// Async-safe handle to the ticket database.
///
/// Wraps `TicketDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TicketDb>>,
}

impl DbHandle {
    pub fn new(db: TicketDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&TicketDb) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

#[async_trait]
impl TicketStore for DbHandle {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, ticket: RepairRequest) -> Result<RepairRequest, StoreError> {
        self.call(move |db| db.insert_request(&ticket)).await
    }

    async fn list(&self) -> Result<Vec<RepairRequest>, StoreError> {
        self.call(|db| db.list_requests()).await
    }

    async fn find(&self, key: LookupKey, value: &str) -> Result<Option<RepairRequest>, StoreError> {
        let value = value.to_string();
        self.call(move |db| db.find_request(key, &value)).await
    }

    async fn update(
        &self,
        key: LookupKey,
        value: &str,
        patch: &TicketPatch,
    ) -> Result<Vec<RepairRequest>, StoreError> {
        let value = value.to_string();
        let patch = patch.clone();
        self.call(move |db| db.update_requests(key, &value, &patch))
            .await
    }

    async fn delete(&self, key: LookupKey, value: &str) -> Result<bool, StoreError> {
        let value = value.to_string();
        self.call(move |db| db.delete_request(key, &value)).await
    }
}

pub struct TicketDb {
    conn: Connection,
}

impl TicketDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// In-memory database with a caller-supplied schema and no migrations,
    /// for exercising older table layouts.
    #[cfg(test)]
    pub(crate) fn with_schema(ddl: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(ddl)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS repair_requests (
                    id TEXT PRIMARY KEY,
                    job_id TEXT NOT NULL UNIQUE,
                    full_name TEXT NOT NULL DEFAULT '',
                    dept_name TEXT,
                    dept_building TEXT,
                    dept_floor TEXT,
                    device TEXT NOT NULL DEFAULT '',
                    device_id TEXT NOT NULL DEFAULT '',
                    issue TEXT NOT NULL DEFAULT '',
                    phone TEXT,
                    notes TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    handler_id TEXT,
                    handler_tag TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_repair_requests_created ON repair_requests(created_at);
                CREATE INDEX IF NOT EXISTS idx_repair_requests_status ON repair_requests(status);
                ",
            )
            .context("Failed to create tables")?;

        // Additive migrations (columns are nullable, safe to re-run).
        // We only ignore "duplicate column" errors, anything else error is propagated.
        for column in ["request_ip", "receipt_no", "reject_reason"] {
            let sql = format!("ALTER TABLE repair_requests ADD COLUMN {} TEXT", column);
            match self.conn.execute(&sql, []) {
                Ok(_) => {}
                Err(e) if e.to_string().contains("duplicate column") => {}
                Err(e) => {
                    return Err(anyhow::anyhow!("Failed to add {} column: {}", column, e));
                }
            }
        }

        Ok(())
    }

    // ── Ticket CRUD ───────────────────────────────────────────────────

    pub fn insert_request(&self, r: &RepairRequest) -> Result<RepairRequest, StoreError> {
        self.conn.execute(
            "INSERT INTO repair_requests (
                id, job_id, full_name, dept_name, dept_building, dept_floor,
                device, device_id, issue, phone, notes, request_ip, status,
                receipt_no, reject_reason, handler_id, handler_tag, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                r.id,
                r.job_id,
                r.full_name,
                r.dept_name,
                r.dept_building,
                r.dept_floor,
                r.device,
                r.device_id,
                r.issue,
                r.phone,
                r.notes,
                r.request_ip,
                r.status.as_str(),
                r.receipt_no,
                r.reject_reason,
                r.handler_id,
                r.handler_tag,
                r.created_at,
                r.updated_at,
            ],
        )?;
        self.find_request(LookupKey::Id, &r.id)?
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("Ticket not found after insert")))
    }

    pub fn list_requests(&self) -> Result<Vec<RepairRequest>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM repair_requests ORDER BY created_at DESC, rowid DESC")?;
        let rows = stmt.query_map([], TicketRow::from_row)?;
        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row?.into_ticket());
        }
        Ok(tickets)
    }

    pub fn find_request(
        &self,
        key: LookupKey,
        value: &str,
    ) -> Result<Option<RepairRequest>, StoreError> {
        Ok(self.select_where(key, value)?.into_iter().next())
    }

    /// Apply `patch` to rows matching `key = value`, returning the rows as written.
    pub fn update_requests(
        &self,
        key: LookupKey,
        value: &str,
        patch: &TicketPatch,
    ) -> Result<Vec<RepairRequest>, StoreError> {
        if patch.is_empty() {
            return Err(StoreError::EmptyPatch);
        }

        let mut assignments = Vec::with_capacity(patch.len());
        let mut values: Vec<&str> = Vec::with_capacity(patch.len() + 1);
        for (idx, (column, column_value)) in patch.iter().enumerate() {
            if !is_valid_column_name(column) {
                return Err(StoreError::InvalidColumn(column.to_string()));
            }
            assignments.push(format!("{} = ?{}", column, idx + 1));
            values.push(column_value);
        }
        values.push(value);

        let sql = format!(
            "UPDATE repair_requests SET {} WHERE {} = ?{}",
            assignments.join(", "),
            key.column(),
            values.len()
        );
        self.conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))?;

        self.select_where(key, value)
    }

    pub fn delete_request(&self, key: LookupKey, value: &str) -> Result<bool, StoreError> {
        let sql = format!("DELETE FROM repair_requests WHERE {} = ?1", key.column());
        let affected = self.conn.execute(&sql, params![value])?;
        Ok(affected > 0)
    }

    fn select_where(&self, key: LookupKey, value: &str) -> Result<Vec<RepairRequest>, StoreError> {
        let sql = format!(
            "SELECT * FROM repair_requests WHERE {} = ?1 ORDER BY created_at DESC",
            key.column()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], TicketRow::from_row)?;
        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row?.into_ticket());
        }
        Ok(tickets)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

/// Read an optional text column, treating a column the table lacks as NULL.
fn optional_text(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<String>> {
    match row.get::<_, Option<String>>(name) {
        Ok(value) => Ok(value),
        Err(rusqlite::Error::InvalidColumnName(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Intermediate row struct for repair_requests.
struct TicketRow {
    id: String,
    job_id: String,
    full_name: Option<String>,
    dept_name: Option<String>,
    dept_building: Option<String>,
    dept_floor: Option<String>,
    device: Option<String>,
    device_id: Option<String>,
    issue: Option<String>,
    phone: Option<String>,
    notes: Option<String>,
    request_ip: Option<String>,
    status: Option<String>,
    receipt_no: Option<String>,
    reject_reason: Option<String>,
    handler_id: Option<String>,
    handler_tag: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl TicketRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            full_name: optional_text(row, "full_name")?,
            dept_name: optional_text(row, "dept_name")?,
            dept_building: optional_text(row, "dept_building")?,
            dept_floor: optional_text(row, "dept_floor")?,
            device: optional_text(row, "device")?,
            device_id: optional_text(row, "device_id")?,
            issue: optional_text(row, "issue")?,
            phone: optional_text(row, "phone")?,
            notes: optional_text(row, "notes")?,
            request_ip: optional_text(row, "request_ip")?,
            status: optional_text(row, "status")?,
            receipt_no: optional_text(row, "receipt_no")?,
            reject_reason: optional_text(row, "reject_reason")?,
            handler_id: optional_text(row, "handler_id")?,
            handler_tag: optional_text(row, "handler_tag")?,
            created_at: optional_text(row, "created_at")?,
            updated_at: optional_text(row, "updated_at")?,
        })
    }

    fn into_ticket(self) -> RepairRequest {
        let status = RepairStatus::from_stored(self.status.as_deref());
        let created_at = self.created_at.unwrap_or_default();
        let updated_at = self.updated_at.unwrap_or_else(|| created_at.clone());

        RepairRequest {
            id: self.id,
            job_id: self.job_id,
            full_name: self.full_name.unwrap_or_default(),
            dept_name: self.dept_name,
            dept_building: self.dept_building,
            dept_floor: self.dept_floor,
            device: self.device.unwrap_or_default(),
            device_id: self.device_id.unwrap_or_default(),
            issue: self.issue.unwrap_or_default(),
            phone: self.phone,
            notes: self.notes,
            request_ip: self.request_ip,
            status,
            receipt_no: self.receipt_no,
            reject_reason: self.reject_reason,
            handler_id: self.handler_id,
            handler_tag: self.handler_tag,
            created_at,
            updated_at,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desk::models::{NewRepairRequest, columns};

    fn sample_ticket(name: &str) -> RepairRequest {
        NewRepairRequest {
            full_name: name.into(),
            device: "Printer".into(),
            device_id: "PR-01".into(),
            issue: "Paper jam".into(),
            ..Default::default()
        }
        .into_ticket(None)
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = TicketDb::new_in_memory()?;

        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = 'repair_requests'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 1);

        let index_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name IN ('idx_repair_requests_created', 'idx_repair_requests_status')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(index_count, 2);

        // Migrations are idempotent
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_reopen_file_database_keeps_rows() -> Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("tickets.db");
        let ticket = sample_ticket("Somchai");
        {
            let db = TicketDb::new(&path)?;
            db.insert_request(&ticket)?;
        }
        let db = TicketDb::new(&path)?;
        let found = db.find_request(LookupKey::JobId, &ticket.job_id)?;
        assert_eq!(found.map(|t| t.full_name), Some("Somchai".to_string()));
        Ok(())
    }

    #[test]
    fn test_insert_and_find() -> Result<()> {
        let db = TicketDb::new_in_memory()?;
        let ticket = sample_ticket("Somchai");
        let saved = db.insert_request(&ticket)?;
        assert_eq!(saved, ticket);

        let by_job = db.find_request(LookupKey::JobId, &ticket.job_id)?;
        assert_eq!(by_job.as_ref().map(|t| t.id.as_str()), Some(ticket.id.as_str()));
        let by_id = db.find_request(LookupKey::Id, &ticket.id)?;
        assert!(by_id.is_some());
        assert!(db.find_request(LookupKey::JobId, "missing")?.is_none());
        Ok(())
    }

    #[test]
    fn test_duplicate_job_id_is_rejected() -> Result<()> {
        let db = TicketDb::new_in_memory()?;
        let ticket = sample_ticket("A");
        db.insert_request(&ticket)?;
        let mut dup = sample_ticket("B");
        dup.job_id = ticket.job_id.clone();
        let err = db.insert_request(&dup).unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));
        Ok(())
    }

    #[test]
    fn test_list_newest_first() -> Result<()> {
        let db = TicketDb::new_in_memory()?;
        let mut older = sample_ticket("older");
        older.created_at = "2026-01-01T00:00:00.000Z".into();
        let mut newer = sample_ticket("newer");
        newer.created_at = "2026-02-01T00:00:00.000Z".into();
        db.insert_request(&older)?;
        db.insert_request(&newer)?;

        let names: Vec<String> = db
            .list_requests()?
            .into_iter()
            .map(|t| t.full_name)
            .collect();
        assert_eq!(names, vec!["newer", "older"]);
        Ok(())
    }

    #[test]
    fn test_update_returns_written_rows() -> Result<()> {
        let db = TicketDb::new_in_memory()?;
        let ticket = db.insert_request(&sample_ticket("A"))?;
        let patch = TicketPatch::new()
            .set(columns::STATUS, "in-progress")
            .set(columns::HANDLER_ID, "U123")
            .set(columns::UPDATED_AT, "2026-03-01T00:00:00.000Z");

        let rows = db.update_requests(LookupKey::JobId, &ticket.job_id, &patch)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RepairStatus::InProgress);
        assert_eq!(rows[0].handler_id.as_deref(), Some("U123"));
        assert_eq!(rows[0].updated_at, "2026-03-01T00:00:00.000Z");
        Ok(())
    }

    #[test]
    fn test_update_unknown_key_matches_nothing() -> Result<()> {
        let db = TicketDb::new_in_memory()?;
        let patch = TicketPatch::new().set(columns::STATUS, "completed");
        assert!(db.update_requests(LookupKey::JobId, "nope", &patch)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_update_rejects_empty_patch_and_bad_columns() -> Result<()> {
        let db = TicketDb::new_in_memory()?;
        assert!(matches!(
            db.update_requests(LookupKey::JobId, "x", &TicketPatch::new()),
            Err(StoreError::EmptyPatch)
        ));
        let patch = TicketPatch::new().set("status = 'x' --", "y");
        assert!(matches!(
            db.update_requests(LookupKey::JobId, "x", &patch),
            Err(StoreError::InvalidColumn(_))
        ));
        Ok(())
    }

    #[test]
    fn test_update_missing_column_reports_sqlite_text() -> Result<()> {
        let db = TicketDb::with_schema(
            "CREATE TABLE repair_requests (id TEXT PRIMARY KEY, job_id TEXT, status TEXT, created_at TEXT, updated_at TEXT);",
        )?;
        let patch = TicketPatch::new().set("receipt_no", "R-1");
        let err = db
            .update_requests(LookupKey::JobId, "JOB-1", &patch)
            .unwrap_err();
        assert!(
            err.to_string().contains("no such column: receipt_no"),
            "unexpected error: {}",
            err
        );
        Ok(())
    }

    #[test]
    fn test_legacy_table_rows_still_read() -> Result<()> {
        let db = TicketDb::with_schema(
            "CREATE TABLE repair_requests (id TEXT PRIMARY KEY, job_id TEXT, full_name TEXT, status TEXT, created_at TEXT);
             INSERT INTO repair_requests VALUES ('1', 'JOB-1', 'A', 'completed', '2026-01-01T00:00:00.000Z');",
        )?;
        let ticket = db.find_request(LookupKey::JobId, "JOB-1")?.expect("row should exist");
        assert_eq!(ticket.status, RepairStatus::Completed);
        assert!(ticket.receipt_no.is_none());
        assert_eq!(ticket.updated_at, "2026-01-01T00:00:00.000Z");
        Ok(())
    }

    #[test]
    fn test_unknown_status_row_does_not_fail_listing() -> Result<()> {
        let db = TicketDb::new_in_memory()?;
        db.insert_request(&sample_ticket("A"))?;
        let odd = db.insert_request(&sample_ticket("B"))?;
        db.execute_batch(&format!(
            "UPDATE repair_requests SET status = 'approved' WHERE job_id = '{}'",
            odd.job_id
        ))?;

        let tickets = db.list_requests()?;
        assert_eq!(tickets.len(), 2);
        assert!(tickets.iter().all(|t| t.status == RepairStatus::Pending));
        Ok(())
    }

    #[test]
    fn test_delete_by_key() -> Result<()> {
        let db = TicketDb::new_in_memory()?;
        let ticket = db.insert_request(&sample_ticket("A"))?;
        assert!(!db.delete_request(LookupKey::Id, &ticket.job_id)?);
        assert!(db.delete_request(LookupKey::JobId, &ticket.job_id)?);
        assert!(db.find_request(LookupKey::Id, &ticket.id)?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_handle_implements_store() -> Result<()> {
        let handle = DbHandle::new(TicketDb::new_in_memory()?);
        let store: &dyn TicketStore = &handle;
        let ticket = store.insert(sample_ticket("A")).await?;
        assert_eq!(store.list().await?.len(), 1);

        let rows = store
            .update(
                LookupKey::Id,
                &ticket.id,
                &TicketPatch::new().set(columns::STATUS, "rejected"),
            )
            .await?;
        assert_eq!(rows[0].status, RepairStatus::Rejected);
        assert!(store.delete(LookupKey::Id, &ticket.id).await?);
        assert!(store.find(LookupKey::Id, &ticket.id).await?.is_none());
        Ok(())
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::db::{DbHandle, TicketDb};
use super::models::{LookupKey, RepairRequest, TicketPatch};
use super::postgrest::PostgrestStore;
use crate::config::DatastoreConfig;
use crate::errors::StoreError;

/// Abstraction over the ticket table.
///
/// Real implementations: `DbHandle` (embedded SQLite) and `PostgrestStore`
/// (hosted REST endpoint). Every write is last-write-wins on a single row.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn insert(&self, ticket: RepairRequest) -> Result<RepairRequest, StoreError>;

    /// All tickets, newest `created_at` first.
    async fn list(&self) -> Result<Vec<RepairRequest>, StoreError>;

    async fn find(&self, key: LookupKey, value: &str) -> Result<Option<RepairRequest>, StoreError>;

    /// Apply `patch` to rows where `key = value` and return the updated rows.
    async fn update(
        &self,
        key: LookupKey,
        value: &str,
        patch: &TicketPatch,
    ) -> Result<Vec<RepairRequest>, StoreError>;

    /// Delete rows where `key = value`. Returns whether anything was removed.
    async fn delete(&self, key: LookupKey, value: &str) -> Result<bool, StoreError>;
}

/// Open the backend named by `config`.
pub fn open_store(config: &DatastoreConfig) -> Result<Arc<dyn TicketStore>> {
    match config {
        DatastoreConfig::Sqlite { path } => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
            let db = TicketDb::new(path).context("Failed to initialize ticket database")?;
            Ok(Arc::new(DbHandle::new(db)))
        }
        DatastoreConfig::Postgrest {
            url,
            service_key,
            table,
        } => Ok(Arc::new(PostgrestStore::new(url, service_key, table))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_sqlite_store_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/tickets.db");
        let store = open_store(&DatastoreConfig::Sqlite { path: path.clone() }).unwrap();
        assert_eq!(store.backend(), "sqlite");
        assert!(path.exists());
    }

    #[test]
    fn test_open_postgrest_store() {
        let store = open_store(&DatastoreConfig::Postgrest {
            url: "https://db.example.org".into(),
            service_key: "key".into(),
            table: "repair_requests".into(),
        })
        .unwrap();
        assert_eq!(store.backend(), "postgrest");
    }
}

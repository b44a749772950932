//! # Docharvest Warehouse
//!
//! DuckDB-backed document store for docharvest.
//!
//! ## Overview
//!
//! The warehouse owns the deduplication ground truth for ingested documents. Uniqueness
//! is enforced by the schema itself: one row per `(entity_id, document_type, period)`
//! and one row per `source_url`. Inserts are insert-if-absent, so concurrent writers
//! that race on the same document observe a conflict instead of a duplicate row.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `documents` | Persisted documents, keyed by unit identity |
//! | `ingest_log` | Terminal outcome of every unit a worker processed |
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `vw_entity_coverage` | Document counts and period range per entity and type |
//! | `vw_run_outcomes` | Outcome counts per run and worker instance |
//! | `vw_source_latency` | Average unit latency by source |

pub mod duckdb;
pub mod migrations;
pub mod views;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::duckdb::{params_from_iter, Connection, ToSql};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use duckdb::{AccessMode, DuckDbConnectionManager, PoolSettings, PooledConnection};

/// Environment variable overriding the docharvest home directory.
pub const HOME_ENV_VAR: &str = "DOCHARVEST_HOME";

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for docharvest data.
    pub home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Idle connections retained per access mode. Zero closes every connection after use.
    pub max_pool_size: usize,
    /// Extra open attempts while another process holds the database file lock.
    pub open_retries: u32,
    /// Pause between open attempts.
    pub open_retry_delay: Duration,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let home = resolve_home();
        let db_path = home.join("warehouse.duckdb");
        let pool = PoolSettings::default();
        Self {
            home,
            db_path,
            max_pool_size: pool.max_idle,
            open_retries: pool.open_retries,
            open_retry_delay: pool.open_retry_delay,
        }
    }
}

impl WarehouseConfig {
    fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_idle: self.max_pool_size,
            open_retries: self.open_retries,
            open_retry_delay: self.open_retry_delay,
        }
    }
}

/// A document ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRow {
    pub entity_id: String,
    pub document_type: String,
    /// Period the document is stored under (the detected period when one was reported).
    pub period: String,
    /// Period the worker asked the source for.
    pub requested_period: String,
    pub source: String,
    pub source_url: String,
    pub content: String,
    pub content_hash: String,
    /// RFC 3339 retrieval timestamp.
    pub retrieved_at: String,
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was written.
    Inserted,
    /// A row with the same identity or source URL already exists.
    Conflict,
}

/// A stored document as read back from the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub entity_id: String,
    pub document_type: String,
    pub period: String,
    pub requested_period: String,
    pub source: String,
    pub source_url: String,
    pub content_hash: String,
    pub content_length: u64,
}

/// One terminal unit outcome for the ingest ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRow {
    pub run_id: String,
    pub instance_index: u32,
    pub entity_id: String,
    pub document_type: String,
    pub period: String,
    /// `done`, `skipped` or `failed`.
    pub outcome: String,
    pub reason: Option<String>,
    pub source: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// A `(entity, document_type, period)` combination that has a stored document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoveredKey {
    pub entity_id: String,
    pub document_type: String,
    pub period: String,
}

/// Aggregate coverage for one entity and document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageSummaryRow {
    pub entity_id: String,
    pub document_type: String,
    pub documents: u64,
    pub first_period: String,
    pub last_period: String,
}

/// A failed unit recorded in the ingest ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUnitRow {
    pub run_id: String,
    pub instance_index: u32,
    pub entity_id: String,
    pub document_type: String,
    pub period: String,
    pub reason: Option<String>,
    pub attempts: u32,
}

/// The document warehouse.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created or migrated.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse, creating the database file and schema when missing.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created or migrated.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.pool_settings());
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply migrations and (re)create views.
    ///
    /// # Errors
    /// Returns an error if the schema SQL fails.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            migrations::apply_migrations(&connection)?;
            views::create_views(&connection)?;
            Ok(())
        })();
        finalize_transaction(&connection, result)
    }

    #[must_use]
    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    /// Whether a document exists for the given unit identity.
    ///
    /// # Errors
    /// Returns an error if the lookup fails.
    pub fn document_exists(
        &self,
        entity_id: &str,
        document_type: &str,
        period: &str,
    ) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 3] = [&entity_id, &document_type, &period];
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM documents \
             WHERE entity_id = ? AND document_type = ? AND period = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Whether any document was stored from the given source URL.
    ///
    /// # Errors
    /// Returns an error if the lookup fails.
    pub fn url_exists(&self, source_url: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM documents WHERE source_url = ?",
            [source_url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a document unless its identity or source URL is already present.
    ///
    /// Uniqueness is decided by the table constraints, so a writer in another process
    /// that commits first turns this insert into [`InsertOutcome::Conflict`].
    ///
    /// # Errors
    /// Returns an error for failures other than a uniqueness conflict.
    pub fn insert_document(&self, row: &DocumentRow) -> Result<InsertOutcome, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 9] = [
            &row.entity_id,
            &row.document_type,
            &row.period,
            &row.requested_period,
            &row.source,
            &row.source_url,
            &row.content,
            &row.content_hash,
            &row.retrieved_at,
        ];
        let inserted = connection.execute(
            "INSERT OR IGNORE INTO documents \
             (entity_id, document_type, period, requested_period, source, source_url, \
              content, content_hash, retrieved_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, \
                     COALESCE(TRY_CAST(? AS TIMESTAMP), CURRENT_TIMESTAMP))",
            params.as_slice(),
        );

        match inserted {
            Ok(0) => Ok(InsertOutcome::Conflict),
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(error) if is_uniqueness_conflict(&error) => Ok(InsertOutcome::Conflict),
            Err(error) => Err(error.into()),
        }
    }

    /// Read one stored document by identity.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn get_document(
        &self,
        entity_id: &str,
        document_type: &str,
        period: &str,
    ) -> Result<Option<StoredDocument>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let params: [&dyn ToSql; 3] = [&entity_id, &document_type, &period];
        let mut statement = connection.prepare(
            "SELECT entity_id, document_type, period, requested_period, source, source_url, \
                    content_hash, LENGTH(content) \
             FROM documents WHERE entity_id = ? AND document_type = ? AND period = ?",
        )?;
        let mut rows = statement.query(params.as_slice())?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let content_length: i64 = row.get(7)?;
        Ok(Some(StoredDocument {
            entity_id: row.get(0)?,
            document_type: row.get(1)?,
            period: row.get(2)?,
            requested_period: row.get(3)?,
            source: row.get(4)?,
            source_url: row.get(5)?,
            content_hash: row.get(6)?,
            content_length: u64::try_from(content_length).unwrap_or_default(),
        }))
    }

    /// Total number of stored documents.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn document_count(&self) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let count: i64 = connection.query_row("SELECT COUNT(*) FROM documents", [], |row| {
            row.get(0)
        })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Append a terminal unit outcome to the ingest ledger.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn record_outcome(&self, row: &OutcomeRow) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let elapsed_ms = i64::try_from(row.elapsed_ms).unwrap_or(i64::MAX);
        let params: [&dyn ToSql; 10] = [
            &row.run_id,
            &row.instance_index,
            &row.entity_id,
            &row.document_type,
            &row.period,
            &row.outcome,
            &row.reason,
            &row.source,
            &row.attempts,
            &elapsed_ms,
        ];
        connection.execute(
            "INSERT INTO ingest_log \
             (run_id, instance_index, entity_id, document_type, period, outcome, reason, \
              source, attempts, elapsed_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Every stored `(entity, document_type, period)`, optionally restricted to entities.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn coverage(&self, entity_ids: &[String]) -> Result<Vec<CoveredKey>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let sql = format!(
            "SELECT DISTINCT entity_id, document_type, period FROM documents{} \
             ORDER BY entity_id, document_type, period",
            entity_filter(entity_ids.len())
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params_from_iter(entity_ids.iter()), |row| {
            Ok(CoveredKey {
                entity_id: row.get(0)?,
                document_type: row.get(1)?,
                period: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Per-entity, per-type aggregates from `vw_entity_coverage`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn coverage_summary(
        &self,
        entity_ids: &[String],
    ) -> Result<Vec<CoverageSummaryRow>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let sql = format!(
            "SELECT entity_id, document_type, documents, first_period, last_period \
             FROM vw_entity_coverage{} ORDER BY entity_id, document_type",
            entity_filter(entity_ids.len())
        );
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params_from_iter(entity_ids.iter()), |row| {
            let documents: i64 = row.get(2)?;
            Ok(CoverageSummaryRow {
                entity_id: row.get(0)?,
                document_type: row.get(1)?,
                documents: u64::try_from(documents).unwrap_or_default(),
                first_period: row.get(3)?,
                last_period: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Failed units from the ingest ledger that still have no stored document.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn failed_units(
        &self,
        run_id: Option<&str>,
        instance_index: Option<u32>,
    ) -> Result<Vec<FailedUnitRow>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let mut sql = String::from(
            "SELECT l.run_id, l.instance_index, l.entity_id, l.document_type, l.period, \
                    l.reason, l.attempts \
             FROM ingest_log l \
             WHERE l.outcome = 'failed' \
               AND NOT EXISTS (SELECT 1 FROM documents d \
                               WHERE d.entity_id = l.entity_id \
                                 AND d.document_type = l.document_type \
                                 AND d.period = l.period)",
        );
        let mut params: Vec<&dyn ToSql> = Vec::new();
        if let Some(run_id) = run_id.as_ref() {
            sql.push_str(" AND l.run_id = ?");
            params.push(run_id);
        }
        if let Some(instance_index) = instance_index.as_ref() {
            sql.push_str(" AND l.instance_index = ?");
            params.push(instance_index);
        }
        sql.push_str(" ORDER BY l.entity_id, l.document_type, l.period, l.logged_at");

        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params.as_slice(), |row| {
            Ok(FailedUnitRow {
                run_id: row.get(0)?,
                instance_index: row.get(1)?,
                entity_id: row.get(2)?,
                document_type: row.get(3)?,
                period: row.get(4)?,
                reason: row.get(5)?,
                attempts: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The most recently logged run id, if any outcome was ever recorded.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn latest_run_id(&self) -> Result<Option<String>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let mut statement = connection.prepare(
            "SELECT run_id FROM ingest_log GROUP BY run_id ORDER BY MAX(logged_at) DESC LIMIT 1",
        )?;
        let mut rows = statement.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

/// Resolve the docharvest home directory from the environment.
#[must_use]
pub fn resolve_home() -> PathBuf {
    if let Some(path) = env::var_os(HOME_ENV_VAR) {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".docharvest");
    }

    PathBuf::from(".docharvest")
}

fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn entity_filter(count: usize) -> String {
    if count == 0 {
        return String::new();
    }
    let placeholders = vec!["?"; count].join(", ");
    format!(" WHERE entity_id IN ({placeholders})")
}

fn is_uniqueness_conflict(error: &::duckdb::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("duplicate key")
        || message.contains("constraint error")
        || message.contains("write-write conflict")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp(dir: &Path, max_pool_size: usize) -> Warehouse {
        let home = dir.join("docharvest-home");
        let db_path = home.join("warehouse.duckdb");
        Warehouse::open(WarehouseConfig {
            home,
            db_path,
            max_pool_size,
            open_retries: 0,
            open_retry_delay: Duration::from_millis(1),
        })
        .expect("warehouse open")
    }

    fn document(entity: &str, period: &str, url: &str) -> DocumentRow {
        DocumentRow {
            entity_id: entity.to_string(),
            document_type: "annual_report".to_string(),
            period: period.to_string(),
            requested_period: period.to_string(),
            source: "filings".to_string(),
            source_url: url.to_string(),
            content: format!("{entity} {period} report"),
            content_hash: "ab".repeat(32),
            retrieved_at: "2026-02-20T10:00:00Z".to_string(),
        }
    }

    #[test]
    fn initializes_tables_and_views() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path(), 2);

        let connection = warehouse
            .manager
            .acquire(AccessMode::ReadWrite)
            .expect("connection");
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_name IN ('documents', 'ingest_log', 'vw_entity_coverage')",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(tables, 3);
    }

    #[test]
    fn reopening_does_not_reapply_migrations() {
        let temp = tempdir().expect("tempdir");
        let first = open_temp(temp.path(), 0);
        first
            .insert_document(&document("INFY", "FY2024", "https://a/1"))
            .expect("insert");
        drop(first);

        let second = open_temp(temp.path(), 0);
        assert_eq!(second.document_count().expect("count"), 1);
    }

    #[test]
    fn insert_is_idempotent_on_identity() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path(), 2);

        let row = document("INFY", "FY2024", "https://a/1");
        assert_eq!(
            warehouse.insert_document(&row).expect("insert"),
            InsertOutcome::Inserted
        );

        let mut same_identity = row.clone();
        same_identity.source_url = "https://b/1".to_string();
        assert_eq!(
            warehouse.insert_document(&same_identity).expect("insert"),
            InsertOutcome::Conflict
        );
        assert_eq!(warehouse.document_count().expect("count"), 1);
    }

    #[test]
    fn insert_conflicts_on_duplicate_source_url() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path(), 2);

        warehouse
            .insert_document(&document("INFY", "FY2024", "https://a/1"))
            .expect("insert");
        let outcome = warehouse
            .insert_document(&document("INFY", "FY2023", "https://a/1"))
            .expect("insert");

        assert_eq!(outcome, InsertOutcome::Conflict);
        assert!(!warehouse
            .document_exists("INFY", "annual_report", "FY2023")
            .expect("exists"));
    }

    #[test]
    fn existence_checks_use_parameterized_queries() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path(), 2);

        let dangerous = r"INFY'; DROP TABLE documents; --";
        warehouse
            .insert_document(&document(dangerous, "FY2024", "https://a/'1"))
            .expect("insert");

        assert!(warehouse
            .document_exists(dangerous, "annual_report", "FY2024")
            .expect("exists"));
        assert!(warehouse.url_exists("https://a/'1").expect("url exists"));
        assert!(!warehouse.url_exists("https://a/2").expect("url exists"));
    }

    #[test]
    fn coverage_lists_stored_keys_per_entity() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path(), 2);

        warehouse
            .insert_document(&document("INFY", "FY2024", "https://a/1"))
            .expect("insert");
        warehouse
            .insert_document(&document("INFY", "FY2023", "https://a/2"))
            .expect("insert");
        warehouse
            .insert_document(&document("TCS", "FY2024", "https://a/3"))
            .expect("insert");

        let infy = warehouse
            .coverage(&["INFY".to_string()])
            .expect("coverage");
        let periods: Vec<_> = infy.iter().map(|key| key.period.as_str()).collect();
        assert_eq!(periods, vec!["FY2023", "FY2024"]);

        assert_eq!(warehouse.coverage(&[]).expect("coverage").len(), 3);

        let summary = warehouse
            .coverage_summary(&["INFY".to_string()])
            .expect("summary");
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].documents, 2);
        assert_eq!(summary[0].first_period, "FY2023");
        assert_eq!(summary[0].last_period, "FY2024");
    }

    #[test]
    fn failed_units_exclude_units_covered_later() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path(), 2);

        for (period, outcome) in [("FY2023", "failed"), ("FY2024", "failed"), ("FY2022", "done")] {
            warehouse
                .record_outcome(&OutcomeRow {
                    run_id: "run-1".to_string(),
                    instance_index: 1,
                    entity_id: "INFY".to_string(),
                    document_type: "annual_report".to_string(),
                    period: period.to_string(),
                    outcome: outcome.to_string(),
                    reason: (outcome == "failed").then(|| "attempts_exhausted".to_string()),
                    source: Some("filings".to_string()),
                    attempts: 3,
                    elapsed_ms: 1_200,
                })
                .expect("record");
        }
        warehouse
            .insert_document(&document("INFY", "FY2024", "https://a/1"))
            .expect("insert");

        let failed = warehouse
            .failed_units(Some("run-1"), Some(1))
            .expect("failed units");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].period, "FY2023");
        assert_eq!(failed[0].reason.as_deref(), Some("attempts_exhausted"));

        assert!(warehouse
            .failed_units(Some("run-2"), None)
            .expect("failed units")
            .is_empty());
        assert_eq!(
            warehouse.latest_run_id().expect("latest"),
            Some("run-1".to_string())
        );
    }

    #[test]
    fn get_document_reads_back_metadata() {
        let temp = tempdir().expect("tempdir");
        let warehouse = open_temp(temp.path(), 0);

        let mut row = document("INFY", "FY2024", "https://a/1");
        row.requested_period = "FY2023".to_string();
        warehouse.insert_document(&row).expect("insert");

        let stored = warehouse
            .get_document("INFY", "annual_report", "FY2024")
            .expect("get")
            .expect("present");
        assert_eq!(stored.requested_period, "FY2023");
        assert_eq!(stored.content_length, row.content.len() as u64);
        assert!(warehouse
            .get_document("INFY", "annual_report", "FY2020")
            .expect("get")
            .is_none());
    }
}

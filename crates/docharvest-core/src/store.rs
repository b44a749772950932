//! Document store contract.
//!
//! The store owns deduplication ground truth. `insert` must be atomic insert-if-absent
//! on both the unit identity and the source URL; the worker's pre-checks only save
//! network fetches.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use docharvest_warehouse::{DocumentRow, InsertOutcome, OutcomeRow, Warehouse, WarehouseError};
use thiserror::Error;

use crate::{DocumentRecord, DocumentType, EntityId, Period, SourceId, Unit};

/// Store failures other than uniqueness conflicts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("store returned an unreadable row: {0}")]
    Corrupt(String),
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// The identity or the source URL is already stored.
    Conflict,
}

/// Terminal outcome category written to the ingest ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Done,
    Skipped,
    Failed,
}

impl OutcomeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// One ledger entry describing how a unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeEntry {
    pub run_id: String,
    pub instance_index: u32,
    pub unit: Unit,
    pub outcome: OutcomeKind,
    pub reason: Option<String>,
    pub source: Option<SourceId>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Durable keyed document storage.
pub trait DocumentStore: Send + Sync {
    /// Whether a document exists for the unit identity.
    fn exists(&self, unit: &Unit) -> Result<bool, StoreError>;

    /// Whether a document was stored from this source URL.
    fn exists_by_url(&self, url: &str) -> Result<bool, StoreError>;

    /// Atomic insert-if-absent.
    fn insert(&self, record: &DocumentRecord) -> Result<InsertResult, StoreError>;

    /// Covered units, optionally restricted to entities (empty slice means all).
    fn coverage(&self, entities: &[EntityId]) -> Result<Vec<Unit>, StoreError>;

    /// Append a terminal outcome to the ingest ledger.
    fn record_outcome(&self, entry: &OutcomeEntry) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    documents: BTreeMap<Unit, DocumentRecord>,
    urls: HashSet<String>,
    outcomes: Vec<OutcomeEntry>,
}

/// In-process store with the same uniqueness rules as the warehouse.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn documents(&self) -> Vec<DocumentRecord> {
        let state = self.state.lock().expect("memory store lock is not poisoned");
        state.documents.values().cloned().collect()
    }

    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn outcomes(&self) -> Vec<OutcomeEntry> {
        let state = self.state.lock().expect("memory store lock is not poisoned");
        state.outcomes.clone()
    }

    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryStore {
    fn exists(&self, unit: &Unit) -> Result<bool, StoreError> {
        let state = self.state.lock().expect("memory store lock is not poisoned");
        Ok(state.documents.contains_key(unit))
    }

    fn exists_by_url(&self, url: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().expect("memory store lock is not poisoned");
        Ok(state.urls.contains(url))
    }

    fn insert(&self, record: &DocumentRecord) -> Result<InsertResult, StoreError> {
        let mut state = self.state.lock().expect("memory store lock is not poisoned");
        let unit = record.unit();
        if state.documents.contains_key(&unit) || state.urls.contains(&record.source_url) {
            return Ok(InsertResult::Conflict);
        }
        state.urls.insert(record.source_url.clone());
        state.documents.insert(unit, record.clone());
        Ok(InsertResult::Inserted)
    }

    fn coverage(&self, entities: &[EntityId]) -> Result<Vec<Unit>, StoreError> {
        let state = self.state.lock().expect("memory store lock is not poisoned");
        Ok(state
            .documents
            .keys()
            .filter(|unit| entities.is_empty() || entities.contains(&unit.entity_id))
            .cloned()
            .collect())
    }

    fn record_outcome(&self, entry: &OutcomeEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("memory store lock is not poisoned");
        state.outcomes.push(entry.clone());
        Ok(())
    }
}

impl DocumentStore for Warehouse {
    fn exists(&self, unit: &Unit) -> Result<bool, StoreError> {
        Ok(self.document_exists(
            unit.entity_id.as_str(),
            unit.document_type.as_str(),
            &unit.period.to_string(),
        )?)
    }

    fn exists_by_url(&self, url: &str) -> Result<bool, StoreError> {
        Ok(self.url_exists(url)?)
    }

    fn insert(&self, record: &DocumentRecord) -> Result<InsertResult, StoreError> {
        let row = DocumentRow {
            entity_id: record.entity_id.to_string(),
            document_type: record.document_type.as_str().to_owned(),
            period: record.period.to_string(),
            requested_period: record.requested_period.to_string(),
            source: record.source.to_string(),
            source_url: record.source_url.clone(),
            content: record.content.clone(),
            content_hash: record.content_hash.clone(),
            retrieved_at: record.retrieved_at.format_rfc3339(),
        };
        match self.insert_document(&row)? {
            InsertOutcome::Inserted => Ok(InsertResult::Inserted),
            InsertOutcome::Conflict => Ok(InsertResult::Conflict),
        }
    }

    fn coverage(&self, entities: &[EntityId]) -> Result<Vec<Unit>, StoreError> {
        let ids: Vec<String> = entities.iter().map(ToString::to_string).collect();
        let keys = Warehouse::coverage(self, &ids)?;
        keys.into_iter()
            .map(|key| {
                let corrupt = |error: crate::ValidationError| StoreError::Corrupt(error.to_string());
                Ok(Unit::new(
                    EntityId::parse(&key.entity_id).map_err(corrupt)?,
                    DocumentType::from_str(&key.document_type).map_err(corrupt)?,
                    Period::parse(&key.period).map_err(corrupt)?,
                ))
            })
            .collect()
    }

    fn record_outcome(&self, entry: &OutcomeEntry) -> Result<(), StoreError> {
        let row = OutcomeRow {
            run_id: entry.run_id.clone(),
            instance_index: entry.instance_index,
            entity_id: entry.unit.entity_id.to_string(),
            document_type: entry.unit.document_type.as_str().to_owned(),
            period: entry.unit.period.to_string(),
            outcome: entry.outcome.as_str().to_owned(),
            reason: entry.reason.clone(),
            source: entry.source.as_ref().map(ToString::to_string),
            attempts: entry.attempts,
            elapsed_ms: u64::try_from(entry.elapsed.as_millis()).unwrap_or(u64::MAX),
        };
        Ok(Warehouse::record_outcome(self, &row)?)
    }
}

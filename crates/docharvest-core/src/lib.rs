//! # docharvest core
//!
//! Resumable, horizontally scaled ingestion of financial documents.
//!
//! Each worker process owns one slice of the unit universe, selected by
//! [`partition`]. Units are processed one at a time: a [`DedupGate`] check against
//! the shared [`DocumentStore`], a fetch through the registered [`DocumentSource`]s
//! paced by the [`RateGovernor`], then an atomic insert-if-absent. Restarting a worker
//! with the same `(instance, total)` resumes the identical slice and skips covered units.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | HTTP source adapter driven by URL templates |
//! | [`config`] | TOML launch configuration |
//! | [`coordination`] | Per-instance advisory lock tokens |
//! | [`dedup`] | Pre-fetch and pre-persist existence checks |
//! | [`document_source`] | Source adapter contract and registry |
//! | [`domain`] | Units, entities, periods, documents |
//! | [`governor`] | Per-source adaptive backoff and cooldown |
//! | [`partition`] | Deterministic work partitioning |
//! | [`store`] | Document store contract and in-memory store |
//! | [`universe`] | Universe enumeration and unit list files |
//! | [`worker`] | The per-instance worker loop |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docharvest_core::{
//!     partition, HarvestConfig, InstanceSlot, MemoryStore, RateGovernor, Worker,
//! };
//!
//! let config = HarvestConfig::default();
//! let units = config.universe_spec().enumerate(&entities);
//! let mine = partition(&units, 2, 4)?;
//! let governor = Arc::new(config.rate_governor()?);
//! let worker = Worker::new(
//!     InstanceSlot::new(2, 4)?,
//!     config.source_registry(&governor)?,
//!     governor,
//!     Arc::new(MemoryStore::new()),
//!     config.worker_config(),
//! );
//! let report = worker.run(&mine).await;
//! ```

pub mod adapters;
pub mod config;
pub mod coordination;
pub mod dedup;
pub mod document_source;
pub mod domain;
pub mod error;
pub mod governor;
pub mod http_client;
pub mod lifecycle;
pub mod partition;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod universe;
pub mod worker;

pub use adapters::{HttpDocumentSource, HttpSourceDefinition};
pub use config::HarvestConfig;
pub use coordination::{
    Acquisition, CoordinationError, Coordinator, FileCoordinator, LockGuard, LockToken,
    MemoryCoordinator, StaleLock,
};
pub use dedup::DedupGate;
pub use document_source::{
    DocumentBatch, DocumentSource, FetchFuture, FetchOutcome, SourceError, SourceErrorKind,
    SourceRegistry,
};
pub use domain::{
    content_hash, DocumentRecord, DocumentType, EntityId, Period, Quarter, RawDocument, Unit,
    UtcDateTime,
};
pub use error::{ConfigError, CoreError, ValidationError};
pub use governor::{CircuitState, GovernorPolicy, QuotaPolicy, RateGovernor, SourceSnapshot, Verdict};
pub use partition::{partition, partition_for, InstanceSlot};
pub use source::SourceId;
pub use store::{DocumentStore, InsertResult, MemoryStore, OutcomeEntry, OutcomeKind, StoreError};
pub use universe::UniverseSpec;
pub use worker::{
    FailureReason, RunReport, SkipReason, UnitOutcome, UnitReport, UnitState, Worker, WorkerConfig,
};

pub use docharvest_warehouse::{
    resolve_home, CoverageSummaryRow, CoveredKey, FailedUnitRow, Warehouse, WarehouseConfig,
    WarehouseError,
};

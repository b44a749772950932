//! # Domain Models
//!
//! Canonical domain types for document ingestion.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EntityId`] | Validated company identifier |
//! | [`Period`] | Fiscal year or fiscal quarter |
//! | [`DocumentType`] | Annual report or call transcript |
//! | [`Unit`] | One `(entity, document type, period)` fetch target |
//! | [`RawDocument`] | Adapter output before reconciliation |
//! | [`DocumentRecord`] | Persisted document |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! All identifiers validate at construction, so a [`Unit`] built from operator input
//! is always well-formed.

mod document;
mod entity;
mod period;
mod timestamp;
mod unit;

pub use document::{content_hash, DocumentRecord, DocumentType, RawDocument};
pub use entity::EntityId;
pub use period::{Period, Quarter};
pub use timestamp::UtcDateTime;
pub use unit::Unit;

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Validation errors for domain values parsed from operator input or source payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("entity id cannot be empty")]
    EmptyEntityId,
    #[error("entity id length {len} exceeds max {max}")]
    EntityIdTooLong { len: usize, max: usize },
    #[error("entity id must start with an ASCII letter or digit: '{ch}'")]
    EntityIdInvalidStart { ch: char },
    #[error("entity id contains invalid character '{ch}' at index {index}")]
    EntityIdInvalidChar { ch: char, index: usize },

    #[error("invalid period '{value}', expected FY<year> or FY<year>Q<1-4>")]
    InvalidPeriod { value: String },
    #[error("invalid document type '{value}', expected annual_report or call_transcript")]
    InvalidDocumentType { value: String },
    #[error("invalid source id '{value}', expected lowercase [a-z0-9_-]+")]
    InvalidSourceId { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Launch configuration errors. Always fatal, raised before any unit is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("total instances must be at least 1, got {total}")]
    InvalidTotalInstances { total: u32 },
    #[error("instance index {index} is outside [1, {total}]")]
    InstanceIndexOutOfRange { index: u32, total: u32 },

    #[error("invalid governor policy for '{source_id}': {reason}")]
    InvalidGovernorPolicy { source_id: String, reason: String },
    #[error("invalid worker setting: {0}")]
    InvalidWorker(String),
    #[error("invalid universe: {0}")]
    InvalidUniverse(String),
    #[error("invalid source definition '{source_id}': {reason}")]
    InvalidSource { source_id: String, reason: String },
    #[error("no source adapter is registered for document type '{document_type}'")]
    NoSourceForDocumentType { document_type: String },

    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

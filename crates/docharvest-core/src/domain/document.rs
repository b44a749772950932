use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{EntityId, Period, SourceId, Unit, UtcDateTime, ValidationError};

/// Category of financial document.
///
/// Declaration order is the canonical tie-break order used when sorting units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    AnnualReport,
    CallTranscript,
}

impl DocumentType {
    pub const ALL: [Self; 2] = [Self::AnnualReport, Self::CallTranscript];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AnnualReport => "annual_report",
            Self::CallTranscript => "call_transcript",
        }
    }
}

impl Display for DocumentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "annual_report" => Ok(Self::AnnualReport),
            "call_transcript" | "concall" => Ok(Self::CallTranscript),
            other => Err(ValidationError::InvalidDocumentType {
                value: other.to_owned(),
            }),
        }
    }
}

/// Raw document returned by a source adapter before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub source_url: String,
    pub raw_content: String,
    /// Period read from the document itself, when the adapter could determine it.
    pub detected_period: Option<Period>,
}

impl RawDocument {
    pub fn new(source_url: impl Into<String>, raw_content: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            raw_content: raw_content.into(),
            detected_period: None,
        }
    }

    #[must_use]
    pub fn with_detected_period(mut self, period: Period) -> Self {
        self.detected_period = Some(period);
        self
    }

    pub fn is_blank(&self) -> bool {
        self.raw_content.trim().is_empty()
    }
}

/// A document as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub entity_id: EntityId,
    pub document_type: DocumentType,
    /// Period the document is stored under.
    pub period: Period,
    /// Period the worker requested; differs from `period` when the source mislabeled it.
    pub requested_period: Period,
    pub source: SourceId,
    pub source_url: String,
    pub content: String,
    pub retrieved_at: UtcDateTime,
    pub content_hash: String,
}

impl DocumentRecord {
    /// Build a record from a fetched document, storing it under `period`.
    pub fn from_raw(unit: &Unit, period: Period, source: SourceId, raw: RawDocument) -> Self {
        let content_hash = content_hash(&raw.raw_content);
        Self {
            entity_id: unit.entity_id.clone(),
            document_type: unit.document_type,
            period,
            requested_period: unit.period,
            source,
            source_url: raw.source_url,
            content: raw.raw_content,
            retrieved_at: UtcDateTime::now(),
            content_hash,
        }
    }

    /// Identity of the stored record.
    pub fn unit(&self) -> Unit {
        Unit::new(self.entity_id.clone(), self.document_type, self.period)
    }
}

/// Lowercase hex SHA-256 of the document content.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_document_type_aliases() {
        assert_eq!(
            "annual-report".parse::<DocumentType>().expect("parse"),
            DocumentType::AnnualReport
        );
        assert_eq!(
            "concall".parse::<DocumentType>().expect("parse"),
            DocumentType::CallTranscript
        );
        assert!("prospectus".parse::<DocumentType>().is_err());
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn record_keeps_requested_period_when_stored_under_detected_one() {
        let unit = Unit::new(
            EntityId::parse("INFY").expect("entity"),
            DocumentType::AnnualReport,
            Period::year(2023),
        );
        let raw = RawDocument::new("https://filings.test/infy/2024", "annual report")
            .with_detected_period(Period::year(2024));

        let record = DocumentRecord::from_raw(
            &unit,
            Period::year(2024),
            SourceId::parse("filings").expect("source"),
            raw,
        );

        assert_eq!(record.period, Period::year(2024));
        assert_eq!(record.requested_period, Period::year(2023));
        assert_eq!(record.unit().period, Period::year(2024));
        assert_eq!(record.content_hash.len(), 64);
    }
}

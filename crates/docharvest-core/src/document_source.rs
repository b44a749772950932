//! Source adapter contract.
//!
//! A [`DocumentSource`] fetches candidate documents for one [`Unit`] and classifies
//! failures into a small set of kinds the worker and the rate governor act on. Request
//! shaping and parsing stay inside the adapter.
//!
//! | Kind | Governor reaction | Worker reaction |
//! |------|-------------------|-----------------|
//! | `RateLimited` | floor grows, streak counts | retry within the attempt budget |
//! | `Blocked` | floor grows, streak counts | retry within the attempt budget |
//! | `Network` | short fixed retry delay | retry within the attempt budget |
//! | `NotFound` | none | try the next source for the document type |
//! | `Invalid` | none | try the next source for the document type |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{ConfigError, DocumentType, RawDocument, SourceId, Unit};

/// Response classification fed to the rate governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchOutcome {
    Success,
    RateLimited,
    Blocked,
    NotFound,
    NetworkError,
}

impl FetchOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RateLimited => "rate_limited",
            Self::Blocked => "blocked",
            Self::NotFound => "not_found",
            Self::NetworkError => "network_error",
        }
    }
}

impl Display for FetchOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    RateLimited,
    Blocked,
    NotFound,
    Network,
    Invalid,
}

/// Structured source error returned by adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Blocked, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::NotFound, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Network, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Invalid, message)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether another attempt against the same source can succeed.
    pub const fn retryable(&self) -> bool {
        matches!(
            self.kind,
            SourceErrorKind::RateLimited | SourceErrorKind::Blocked | SourceErrorKind::Network
        )
    }

    /// Outcome reported to the rate governor.
    pub const fn outcome(&self) -> FetchOutcome {
        match self.kind {
            SourceErrorKind::RateLimited => FetchOutcome::RateLimited,
            SourceErrorKind::Blocked => FetchOutcome::Blocked,
            SourceErrorKind::Network => FetchOutcome::NetworkError,
            SourceErrorKind::NotFound | SourceErrorKind::Invalid => FetchOutcome::NotFound,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::Blocked => "source.blocked",
            SourceErrorKind::NotFound => "source.not_found",
            SourceErrorKind::Network => "source.network",
            SourceErrorKind::Invalid => "source.invalid",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// Documents returned by one successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentBatch {
    pub documents: Vec<RawDocument>,
}

impl DocumentBatch {
    pub fn new(documents: Vec<RawDocument>) -> Self {
        Self { documents }
    }

    pub fn single(document: RawDocument) -> Self {
        Self {
            documents: vec![document],
        }
    }
}

/// Boxed future returned by [`DocumentSource::fetch`].
pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<DocumentBatch, SourceError>> + Send + 'a>>;

/// Source adapter contract.
///
/// Implementations must be `Send + Sync`; a single adapter instance serves every unit
/// of a worker's partition.
pub trait DocumentSource: Send + Sync {
    /// Stable source identifier.
    fn id(&self) -> SourceId;

    /// Whether this source publishes the given document type.
    fn supports(&self, document_type: DocumentType) -> bool;

    /// Fetch candidate documents for a unit.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] classified by [`SourceErrorKind`]; an empty batch is
    /// treated by callers the same as [`SourceErrorKind::NotFound`].
    fn fetch<'a>(&'a self, unit: &'a Unit) -> FetchFuture<'a>;
}

/// Ordered adapters per document type.
///
/// Registration order is fallback order: a `NotFound` from one source moves on to the
/// next source that supports the same document type.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn DocumentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.register(source);
        self
    }

    pub fn register(&mut self, source: Arc<dyn DocumentSource>) {
        self.sources.push(source);
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|source| source.id()).collect()
    }

    /// Sources able to serve `document_type`, in fallback order.
    pub fn candidates(&self, document_type: DocumentType) -> Vec<Arc<dyn DocumentSource>> {
        self.sources
            .iter()
            .filter(|source| source.supports(document_type))
            .cloned()
            .collect()
    }

    /// Fail fast when a requested document type has no source at all.
    pub fn ensure_covers(&self, document_types: &[DocumentType]) -> Result<(), ConfigError> {
        for document_type in document_types {
            if self.candidates(*document_type).is_empty() {
                return Err(ConfigError::NoSourceForDocumentType {
                    document_type: document_type.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource {
        id: &'static str,
        document_type: DocumentType,
    }

    impl DocumentSource for FixedSource {
        fn id(&self) -> SourceId {
            SourceId::parse(self.id).expect("valid id")
        }

        fn supports(&self, document_type: DocumentType) -> bool {
            document_type == self.document_type
        }

        fn fetch<'a>(&'a self, unit: &'a Unit) -> FetchFuture<'a> {
            Box::pin(async move {
                Ok(DocumentBatch::single(RawDocument::new(
                    format!("https://{}.test/{}", self.id, unit.entity_id),
                    "body",
                )))
            })
        }
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new()
            .with_source(Arc::new(FixedSource {
                id: "filings",
                document_type: DocumentType::AnnualReport,
            }))
            .with_source(Arc::new(FixedSource {
                id: "mirror",
                document_type: DocumentType::AnnualReport,
            }))
            .with_source(Arc::new(FixedSource {
                id: "transcripts",
                document_type: DocumentType::CallTranscript,
            }))
    }

    #[test]
    fn candidates_keep_registration_order() {
        let ids: Vec<String> = registry()
            .candidates(DocumentType::AnnualReport)
            .iter()
            .map(|source| source.id().to_string())
            .collect();
        assert_eq!(ids, vec!["filings", "mirror"]);
    }

    #[test]
    fn ensure_covers_reports_missing_document_type() {
        let registry = SourceRegistry::new().with_source(Arc::new(FixedSource {
            id: "filings",
            document_type: DocumentType::AnnualReport,
        }));
        let error = registry
            .ensure_covers(&DocumentType::ALL)
            .expect_err("transcripts are not covered");
        assert!(matches!(
            error,
            ConfigError::NoSourceForDocumentType { ref document_type } if document_type == "call_transcript"
        ));
    }

    #[test]
    fn error_kinds_map_to_governor_outcomes() {
        assert_eq!(SourceError::blocked("captcha").outcome(), FetchOutcome::Blocked);
        assert_eq!(SourceError::invalid("bad url").outcome(), FetchOutcome::NotFound);
        assert!(SourceError::network("reset").retryable());
        assert!(!SourceError::not_found("404").retryable());
        assert_eq!(SourceError::rate_limited("429").code(), "source.rate_limited");
    }
}

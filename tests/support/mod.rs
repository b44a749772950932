//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use docharvest_core::{
    DocumentBatch, DocumentSource, DocumentStore, DocumentType, EntityId, FetchFuture,
    GovernorPolicy, InstanceSlot, Period, RateGovernor, RawDocument, SourceError, SourceId,
    SourceRegistry, Unit, Worker, WorkerConfig,
};

/// Source adapter that replays a fixed script of responses, one per fetch.
///
/// Once the script runs out every fetch answers with a document whose URL is derived
/// from the unit, so repeated units produce the same URL.
pub struct ScriptedSource {
    id: SourceId,
    document_types: Vec<DocumentType>,
    script: Mutex<VecDeque<Result<DocumentBatch, SourceError>>>,
    calls: AtomicUsize,
    sent_at: Mutex<Vec<Instant>>,
    delay: Duration,
}

impl ScriptedSource {
    pub fn new(id: &str, script: Vec<Result<DocumentBatch, SourceError>>) -> Self {
        Self {
            id: SourceId::parse(id).expect("source id"),
            document_types: DocumentType::ALL.to_vec(),
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            sent_at: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Always answers with a document for the unit.
    pub fn healthy(id: &str) -> Self {
        Self::new(id, Vec::new())
    }

    /// Sleep before answering, to widen race windows between workers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn only(mut self, document_type: DocumentType) -> Self {
        self.document_types = vec![document_type];
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Time between consecutive fetches, in call order.
    pub fn gaps(&self) -> Vec<Duration> {
        let sent_at = self.sent_at.lock().expect("sent_at");
        sent_at.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

impl DocumentSource for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    fn supports(&self, document_type: DocumentType) -> bool {
        self.document_types.contains(&document_type)
    }

    fn fetch<'a>(&'a self, unit: &'a Unit) -> FetchFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent_at.lock().expect("sent_at").push(Instant::now());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().expect("script").pop_front();
            next.unwrap_or_else(|| Ok(document_for(&self.id, unit)))
        })
    }
}

pub fn document_for(source: &SourceId, unit: &Unit) -> DocumentBatch {
    DocumentBatch::single(RawDocument::new(
        format!("https://{source}.test/{unit}"),
        format!("{} {} {}", unit.entity_id, unit.document_type, unit.period),
    ))
}

pub fn ok(url: &str, content: &str) -> Result<DocumentBatch, SourceError> {
    Ok(DocumentBatch::single(RawDocument::new(url, content)))
}

pub fn rate_limited() -> Result<DocumentBatch, SourceError> {
    Err(SourceError::rate_limited("429 too many requests"))
}

pub fn blocked() -> Result<DocumentBatch, SourceError> {
    Err(SourceError::blocked("403 forbidden"))
}

pub fn not_found() -> Result<DocumentBatch, SourceError> {
    Err(SourceError::not_found("404"))
}

pub fn entity(id: &str) -> EntityId {
    EntityId::parse(id).expect("entity id")
}

pub fn annual(id: &str, year: u16) -> Unit {
    Unit::new(entity(id), DocumentType::AnnualReport, Period::year(year))
}

/// Millisecond-scale policy so backoff is observable without slowing tests down.
pub fn fast_policy() -> GovernorPolicy {
    GovernorPolicy {
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(40),
        backoff_multiplier: 2.0,
        decay_factor: 0.85,
        recovery_streak: 1,
        cooldown_threshold: 5,
        cooldown: Duration::from_millis(20),
        network_retry_delay: Duration::from_millis(1),
        jitter: Duration::ZERO,
        quota: None,
    }
}

pub fn worker_config(max_attempts: u32) -> WorkerConfig {
    WorkerConfig {
        max_attempts,
        fetch_timeout: Duration::from_secs(2),
        max_wait: Duration::from_secs(2),
        progress_every: 0,
    }
}

pub fn worker(
    sources: Vec<Arc<dyn DocumentSource>>,
    governor: Arc<RateGovernor>,
    store: Arc<dyn DocumentStore>,
    max_attempts: u32,
) -> Worker {
    let registry = sources
        .into_iter()
        .fold(SourceRegistry::new(), SourceRegistry::with_source);
    Worker::new(
        InstanceSlot::new(1, 1).expect("slot"),
        registry,
        governor,
        store,
        worker_config(max_attempts),
    )
}

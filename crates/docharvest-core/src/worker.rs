//! The per-instance worker loop.
//!
//! Each unit runs through `Pending -> Checking -> Fetching -> Persisting` and ends in
//! exactly one of `Done`, `Skipped` or `Failed`. Units are processed strictly one after
//! another in partition order; a unit's failure is recorded and the loop moves on.
//! Cancellation is honoured between units and during governor waits, never in the
//! middle of a fetch or a store write.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dedup::DedupGate;
use crate::document_source::{DocumentBatch, DocumentSource, SourceError, SourceRegistry};
use crate::governor::{RateGovernor, Verdict};
use crate::partition::InstanceSlot;
use crate::store::{DocumentStore, InsertResult, OutcomeEntry, OutcomeKind};
use crate::{DocumentRecord, FetchOutcome, Period, RawDocument, SourceId, Unit};

/// Worker loop tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Fetch attempts per unit, shared across fallback sources.
    pub max_attempts: u32,
    /// Upper bound on a single fetch.
    pub fetch_timeout: Duration,
    /// Upper bound on a single governor wait.
    pub max_wait: Duration,
    /// Emit a progress line every this many units; zero disables it.
    pub progress_every: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            fetch_timeout: Duration::from_secs(30),
            max_wait: Duration::from_secs(600),
            progress_every: 10,
        }
    }
}

/// Lifecycle of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Checking,
    Fetching,
    Persisting,
    Done,
    Skipped,
    Failed,
}

impl UnitState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }
}

/// Why a unit was skipped. Every variant counts as success for coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A document for the unit was already stored.
    AlreadyCovered,
    /// The fetched document's URL was already stored.
    DuplicateUrl,
    /// The store rejected the insert because another writer got there first.
    Conflict,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyCovered => "already_covered",
            Self::DuplicateUrl => "duplicate_url",
            Self::Conflict => "conflict",
        }
    }
}

/// Why a unit failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The attempt budget ran out; `last` is the final outcome observed.
    AttemptsExhausted { last: FetchOutcome },
    /// No source had a usable document.
    NotFound,
    /// Termination was requested while waiting to fetch.
    Cancelled,
    /// The governor asked for a longer wait than `max_wait`; nothing was sent.
    WaitExceeded { wait: Duration },
    /// The store could not be read or written.
    Store(String),
}

impl FailureReason {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AttemptsExhausted { .. } => "attempts_exhausted",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::WaitExceeded { .. } => "wait_exceeded",
            Self::Store(_) => "store_error",
        }
    }
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttemptsExhausted { last } => write!(f, "attempts_exhausted (last: {last})"),
            Self::Store(message) => write!(f, "store_error: {message}"),
            Self::WaitExceeded { wait } => write!(f, "wait_exceeded ({}ms)", duration_ms(*wait)),
            other => f.write_str(other.code()),
        }
    }
}

/// Terminal outcome of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// A document was stored under `stored_period`.
    Done { stored_period: Period },
    Skipped(SkipReason),
    Failed(FailureReason),
}

impl UnitOutcome {
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Done { .. } => OutcomeKind::Done,
            Self::Skipped(_) => OutcomeKind::Skipped,
            Self::Failed(_) => OutcomeKind::Failed,
        }
    }

    pub const fn state(&self) -> UnitState {
        match self {
            Self::Done { .. } => UnitState::Done,
            Self::Skipped(_) => UnitState::Skipped,
            Self::Failed(_) => UnitState::Failed,
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::Done { .. } => None,
            Self::Skipped(reason) => Some(reason.as_str().to_owned()),
            Self::Failed(reason) => Some(reason.to_string()),
        }
    }
}

/// What happened to one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub unit: Unit,
    pub outcome: UnitOutcome,
    pub attempts: u32,
    pub source: Option<SourceId>,
    pub elapsed: Duration,
}

/// Summary of one worker run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub instance_index: u32,
    pub total_instances: u32,
    pub units_total: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub documents_saved: usize,
    pub elapsed_ms: u64,
    pub interrupted: bool,
}

impl RunReport {
    fn processed(&self) -> usize {
        self.done + self.skipped + self.failed
    }

    fn record(&mut self, report: &UnitReport) {
        match &report.outcome {
            UnitOutcome::Done { .. } => {
                self.done += 1;
                self.documents_saved += 1;
            }
            UnitOutcome::Skipped(_) => self.skipped += 1,
            UnitOutcome::Failed(reason) => {
                self.failed += 1;
                if *reason == FailureReason::Cancelled {
                    self.interrupted = true;
                }
            }
        }
    }
}

/// Result of the fetching phase.
enum Fetched {
    Batch { source: SourceId, documents: Vec<RawDocument> },
    Failed(FailureReason),
}

/// Sequential worker for one partition.
pub struct Worker {
    slot: InstanceSlot,
    run_id: String,
    sources: SourceRegistry,
    governor: Arc<RateGovernor>,
    store: Arc<dyn DocumentStore>,
    gate: DedupGate,
    config: WorkerConfig,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        slot: InstanceSlot,
        sources: SourceRegistry,
        governor: Arc<RateGovernor>,
        store: Arc<dyn DocumentStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            slot,
            run_id: Uuid::new_v4().to_string(),
            sources,
            governor,
            gate: DedupGate::new(Arc::clone(&store)),
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Process `units` in order and summarize the run.
    pub async fn run(&self, units: &[Unit]) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport {
            run_id: self.run_id.clone(),
            instance_index: self.slot.index(),
            total_instances: self.slot.total(),
            units_total: units.len(),
            done: 0,
            skipped: 0,
            failed: 0,
            documents_saved: 0,
            elapsed_ms: 0,
            interrupted: false,
        };

        tracing::info!(
            run_id = %self.run_id,
            instance = self.slot.index(),
            total = self.slot.total(),
            units = units.len(),
            "worker starting"
        );

        for unit in units {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                tracing::info!(
                    instance = self.slot.index(),
                    remaining = units.len() - report.processed(),
                    "termination requested; not starting further units"
                );
                break;
            }

            let unit_report = self.process_unit(unit).await;
            report.record(&unit_report);

            let processed = report.processed();
            if self.config.progress_every > 0 && processed % self.config.progress_every == 0 {
                let minutes = started.elapsed().as_secs_f64() / 60.0;
                let rate = if minutes > 0.0 {
                    (processed as f64 / minutes * 10.0).round() / 10.0
                } else {
                    0.0
                };
                tracing::info!(
                    instance = self.slot.index(),
                    processed,
                    total = units.len(),
                    done = report.done,
                    skipped = report.skipped,
                    failed = report.failed,
                    units_per_min = rate,
                    "progress"
                );
            }
        }

        report.elapsed_ms = duration_ms(started.elapsed());
        tracing::info!(
            run_id = %report.run_id,
            instance = report.instance_index,
            units = report.units_total,
            done = report.done,
            skipped = report.skipped,
            failed = report.failed,
            interrupted = report.interrupted,
            elapsed_ms = report.elapsed_ms,
            "worker finished"
        );
        report
    }

    /// Drive one unit to a terminal state, then log and record the outcome.
    pub async fn process_unit(&self, unit: &Unit) -> UnitReport {
        let started = Instant::now();
        let mut attempts = 0;
        let mut source = None;
        let outcome = self.drive(unit, &mut attempts, &mut source).await;

        let report = UnitReport {
            unit: unit.clone(),
            outcome,
            attempts,
            source,
            elapsed: started.elapsed(),
        };
        self.finish(&report);
        report
    }

    async fn drive(
        &self,
        unit: &Unit,
        attempts: &mut u32,
        used_source: &mut Option<SourceId>,
    ) -> UnitOutcome {
        self.trace_state(unit, UnitState::Checking);
        match self.gate.already_covered(unit) {
            Ok(true) => return UnitOutcome::Skipped(SkipReason::AlreadyCovered),
            Ok(false) => {}
            Err(error) => return UnitOutcome::Failed(FailureReason::Store(error.to_string())),
        }

        self.trace_state(unit, UnitState::Fetching);
        let (source, documents) = match self.fetch(unit, attempts, used_source).await {
            Fetched::Batch { source, documents } => (source, documents),
            Fetched::Failed(reason) => return UnitOutcome::Failed(reason),
        };

        self.trace_state(unit, UnitState::Persisting);
        self.persist(unit, &source, documents)
    }

    async fn fetch(
        &self,
        unit: &Unit,
        attempts: &mut u32,
        used_source: &mut Option<SourceId>,
    ) -> Fetched {
        let mut last_failure = None;

        for adapter in self.sources.candidates(unit.document_type) {
            if *attempts >= self.config.max_attempts {
                break;
            }
            let source_id = adapter.id();
            *used_source = Some(source_id.clone());

            while *attempts < self.config.max_attempts {
                if let Err(reason) = self.await_turn(&source_id).await {
                    return Fetched::Failed(reason);
                }

                *attempts += 1;
                let result = self.fetch_once(adapter.as_ref(), unit).await;
                let outcome = match &result {
                    Ok(_) => FetchOutcome::Success,
                    Err(error) => error.outcome(),
                };

                match result {
                    Ok(batch) => {
                        let documents: Vec<RawDocument> = batch
                            .documents
                            .into_iter()
                            .filter(|document| !document.is_blank())
                            .collect();
                        if documents.is_empty() {
                            // An answer without content is a miss, not a throttle.
                            self.governor.on_response(&source_id, FetchOutcome::NotFound);
                            tracing::debug!(unit = %unit, source = %source_id, "source returned no usable content");
                            last_failure = Some(FetchOutcome::NotFound);
                            break;
                        }
                        self.governor.on_response(&source_id, outcome);
                        return Fetched::Batch {
                            source: source_id,
                            documents,
                        };
                    }
                    Err(error) => {
                        let verdict = self.governor.on_response(&source_id, outcome);
                        last_failure = Some(outcome);
                        tracing::debug!(
                            unit = %unit,
                            source = %source_id,
                            attempt = *attempts,
                            error = %error,
                            verdict = ?verdict,
                            "fetch attempt failed"
                        );
                        if !error.retryable() {
                            break;
                        }
                        if let Verdict::Cooldown { pause } = verdict {
                            tracing::info!(
                                unit = %unit,
                                source = %source_id,
                                pause_ms = duration_ms(pause),
                                "source cooling down before next attempt"
                            );
                        }
                    }
                }
            }
        }

        match last_failure {
            None | Some(FetchOutcome::NotFound) => Fetched::Failed(FailureReason::NotFound),
            Some(last) => Fetched::Failed(FailureReason::AttemptsExhausted { last }),
        }
    }

    async fn fetch_once(
        &self,
        adapter: &dyn DocumentSource,
        unit: &Unit,
    ) -> Result<DocumentBatch, SourceError> {
        match tokio::time::timeout(self.config.fetch_timeout, adapter.fetch(unit)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::network(format!(
                "fetch timed out after {}ms",
                duration_ms(self.config.fetch_timeout)
            ))),
        }
    }

    fn persist(&self, unit: &Unit, source: &SourceId, documents: Vec<RawDocument>) -> UnitOutcome {
        let mut skipped = SkipReason::DuplicateUrl;

        for document in documents {
            let period = match document.detected_period {
                Some(detected) if detected != unit.period => {
                    tracing::warn!(
                        unit = %unit,
                        detected = %detected,
                        source_url = %document.source_url,
                        "source labelled the document with a different period; storing under the detected one"
                    );
                    tracing::debug!(
                        unit = %unit,
                        detected = %detected,
                        "requested unit stays uncovered and will be fetched again on the next run"
                    );
                    let target = unit.with_period(detected);
                    match self.gate.already_covered(&target) {
                        Ok(true) => {
                            skipped = SkipReason::AlreadyCovered;
                            continue;
                        }
                        Ok(false) => {}
                        Err(error) => {
                            return UnitOutcome::Failed(FailureReason::Store(error.to_string()))
                        }
                    }
                    detected
                }
                _ => unit.period,
            };

            match self.gate.url_already_covered(&document.source_url) {
                Ok(true) => {
                    tracing::debug!(unit = %unit, source_url = %document.source_url, "discarding fetch of an already stored url");
                    skipped = SkipReason::DuplicateUrl;
                    continue;
                }
                Ok(false) => {}
                Err(error) => return UnitOutcome::Failed(FailureReason::Store(error.to_string())),
            }

            let record = DocumentRecord::from_raw(unit, period, source.clone(), document);
            match self.store.insert(&record) {
                Ok(InsertResult::Inserted) => {
                    return UnitOutcome::Done {
                        stored_period: period,
                    }
                }
                Ok(InsertResult::Conflict) => skipped = SkipReason::Conflict,
                Err(error) => return UnitOutcome::Failed(FailureReason::Store(error.to_string())),
            }
        }

        UnitOutcome::Skipped(skipped)
    }

    /// Wait until the governor lets a request to `source` out.
    async fn await_turn(&self, source: &SourceId) -> Result<(), FailureReason> {
        let mut wait = self.governor.before_request(source);
        loop {
            if wait > self.config.max_wait {
                tracing::warn!(
                    source = %source,
                    wait_ms = duration_ms(wait),
                    max_wait_ms = duration_ms(self.config.max_wait),
                    "governor wait exceeds max_wait; giving up on the unit"
                );
                return Err(FailureReason::WaitExceeded { wait });
            }
            if !self.pause(wait).await {
                return Err(FailureReason::Cancelled);
            }
            match self.governor.admit(source) {
                Ok(()) => return Ok(()),
                Err(not_until) => wait = not_until,
            }
        }
    }

    async fn pause(&self, wait: Duration) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if wait.is_zero() {
            return true;
        }
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(wait) => true,
        }
    }

    fn trace_state(&self, unit: &Unit, state: UnitState) {
        tracing::trace!(instance = self.slot.index(), unit = %unit, state = ?state, "unit state");
    }

    fn finish(&self, report: &UnitReport) {
        let unit = &report.unit;
        let source = report.source.as_ref().map_or("-", SourceId::as_str);
        let elapsed_ms = duration_ms(report.elapsed);
        let outcome = report.outcome.kind().as_str();
        let detail = report.outcome.detail();

        match &report.outcome {
            UnitOutcome::Failed(reason) => tracing::warn!(
                instance = self.slot.index(),
                entity = %unit.entity_id,
                document_type = %unit.document_type,
                period = %unit.period,
                outcome,
                reason = %reason,
                source,
                attempts = report.attempts,
                elapsed_ms,
                "unit failed"
            ),
            _ => tracing::info!(
                instance = self.slot.index(),
                entity = %unit.entity_id,
                document_type = %unit.document_type,
                period = %unit.period,
                outcome,
                detail = detail.as_deref().unwrap_or("-"),
                source,
                attempts = report.attempts,
                elapsed_ms,
                "unit finished"
            ),
        }

        let entry = OutcomeEntry {
            run_id: self.run_id.clone(),
            instance_index: self.slot.index(),
            unit: unit.clone(),
            outcome: report.outcome.kind(),
            reason: detail,
            source: report.source.clone(),
            attempts: report.attempts,
            elapsed: report.elapsed,
        };
        if let Err(error) = self.store.record_outcome(&entry) {
            tracing::warn!(unit = %unit, error = %error, "could not record unit outcome");
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

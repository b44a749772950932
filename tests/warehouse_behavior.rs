//! Behavior-driven tests for the DuckDB warehouse as the workers' document store
//!
//! These tests verify what survives a run: stored documents, the ingest ledger, and
//! the failure list an operator feeds back into a targeted re-run.

mod support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docharvest_core::{
    content_hash, DocumentStore, RateGovernor, UnitOutcome, Warehouse, WarehouseConfig,
};
use support::{annual, blocked, fast_policy, worker, ScriptedSource};
use tempfile::tempdir;

fn open_warehouse(dir: &Path, max_pool_size: usize) -> Warehouse {
    Warehouse::open(WarehouseConfig {
        home: dir.to_path_buf(),
        db_path: dir.join("warehouse.duckdb"),
        max_pool_size,
        open_retries: 3,
        open_retry_delay: Duration::from_millis(10),
    })
    .expect("warehouse open")
}

// =============================================================================
// Warehouse: persistence through a worker run
// =============================================================================

#[tokio::test]
async fn when_a_worker_runs_documents_and_outcomes_land_in_the_warehouse() {
    // Given: a warehouse and a source that blocks the first unit until the budget is gone
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path(), 2);
    let store: Arc<dyn DocumentStore> = Arc::new(warehouse.clone());
    let source = Arc::new(ScriptedSource::new(
        "filings",
        vec![blocked(), blocked(), blocked()],
    ));
    let worker = worker(
        vec![source],
        Arc::new(RateGovernor::new(fast_policy())),
        store,
        3,
    )
    .with_run_id("run-1");

    // When
    let report = worker
        .run(&[annual("INFY", 2023), annual("INFY", 2024)])
        .await;

    // Then: one document stored, with its hash, and one failure in the ledger
    assert_eq!(report.done, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(warehouse.document_count().expect("count"), 1);

    let stored = warehouse
        .get_document("INFY", "annual_report", "FY2024")
        .expect("query")
        .expect("stored");
    assert_eq!(stored.source, "filings");
    assert_eq!(stored.requested_period, "FY2024");
    assert_eq!(stored.content_hash, content_hash("INFY annual_report FY2024"));

    let failures = warehouse.failed_units(Some("run-1"), None).expect("failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].entity_id, "INFY");
    assert_eq!(failures[0].period, "FY2023");
    assert_eq!(failures[0].attempts, 3);
    assert_eq!(warehouse.latest_run_id().expect("run id").as_deref(), Some("run-1"));
}

#[tokio::test]
async fn when_a_failed_unit_is_rerun_it_leaves_the_failure_list() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path(), 2);
    let unit = annual("TCS", 2022);

    let failing = worker(
        vec![Arc::new(ScriptedSource::new(
            "filings",
            vec![blocked(), blocked(), blocked()],
        ))],
        Arc::new(RateGovernor::new(fast_policy())),
        Arc::new(warehouse.clone()),
        3,
    )
    .with_run_id("run-1");
    failing.run(std::slice::from_ref(&unit)).await;
    assert_eq!(warehouse.failed_units(None, None).expect("failures").len(), 1);

    let retry = worker(
        vec![Arc::new(ScriptedSource::healthy("filings"))],
        Arc::new(RateGovernor::new(fast_policy())),
        Arc::new(warehouse.clone()),
        3,
    )
    .with_run_id("run-2");
    let report = retry.run(std::slice::from_ref(&unit)).await;

    assert_eq!(report.done, 1);
    assert!(warehouse.failed_units(None, None).expect("failures").is_empty());
}

// =============================================================================
// Warehouse: restarts
// =============================================================================

#[tokio::test]
async fn after_a_restart_the_reopened_warehouse_still_covers_stored_units() {
    let temp = tempdir().expect("tempdir");
    let units = vec![annual("INFY", 2024), annual("WIPRO", 2024)];

    {
        let warehouse = open_warehouse(temp.path(), 0);
        let report = worker(
            vec![Arc::new(ScriptedSource::healthy("filings"))],
            Arc::new(RateGovernor::new(fast_policy())),
            Arc::new(warehouse),
            3,
        )
        .run(&units)
        .await;
        assert_eq!(report.done, 2);
    }

    let reopened = open_warehouse(temp.path(), 0);
    let source = Arc::new(ScriptedSource::healthy("filings"));
    let report = worker(
        vec![source.clone()],
        Arc::new(RateGovernor::new(fast_policy())),
        Arc::new(reopened.clone()),
        3,
    )
    .run(&units)
    .await;

    assert_eq!(report.skipped, 2);
    assert_eq!(source.calls(), 0);

    let covered = DocumentStore::coverage(&reopened, &[]).expect("coverage");
    assert_eq!(covered, {
        let mut sorted = units.clone();
        sorted.sort();
        sorted
    });
}

#[tokio::test]
async fn a_document_reported_under_another_period_is_stored_under_that_period() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open_warehouse(temp.path(), 2);
    let source = Arc::new(ScriptedSource::new(
        "filings",
        vec![Ok(docharvest_core::DocumentBatch::single(
            docharvest_core::RawDocument::new("https://filings.test/infy/ar-2023.pdf", "report")
                .with_detected_period(docharvest_core::Period::year(2023)),
        ))],
    ));

    let report = worker(
        vec![source],
        Arc::new(RateGovernor::new(fast_policy())),
        Arc::new(warehouse.clone()),
        3,
    )
    .process_unit(&annual("INFY", 2024))
    .await;

    assert_eq!(
        report.outcome,
        UnitOutcome::Done {
            stored_period: docharvest_core::Period::year(2023)
        }
    );
    let stored = warehouse
        .get_document("INFY", "annual_report", "FY2023")
        .expect("query")
        .expect("stored");
    assert_eq!(stored.requested_period, "FY2024");
    assert!(warehouse
        .get_document("INFY", "annual_report", "FY2024")
        .expect("query")
        .is_none());
}

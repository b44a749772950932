//! Database views backing the coverage report.

use ::duckdb::Connection;

/// Create database views for coverage and run reporting.
///
/// Creates the following views:
/// - `vw_entity_coverage`: document counts and period range per entity and document type
/// - `vw_run_outcomes`: terminal outcome counts per run and worker instance
/// - `vw_source_latency`: average unit latency by source
///
/// # Errors
/// Returns an error if the view creation SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_entity_coverage AS
SELECT
    entity_id,
    document_type,
    COUNT(*) AS documents,
    MIN(period) AS first_period,
    MAX(period) AS last_period
FROM documents
GROUP BY entity_id, document_type;

CREATE OR REPLACE VIEW vw_run_outcomes AS
SELECT
    run_id,
    instance_index,
    outcome,
    COUNT(*) AS units,
    MIN(logged_at) AS started_at,
    MAX(logged_at) AS finished_at
FROM ingest_log
GROUP BY run_id, instance_index, outcome;

CREATE OR REPLACE VIEW vw_source_latency AS
SELECT
    source,
    AVG(elapsed_ms)::DOUBLE AS avg_elapsed_ms,
    COUNT(*) AS units
FROM ingest_log
WHERE source IS NOT NULL
GROUP BY source;
",
    )?;

    Ok(())
}

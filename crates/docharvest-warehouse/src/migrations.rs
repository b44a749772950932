use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

// `documents` carries both uniqueness guarantees: one row per unit identity and one
// row per source URL. Concurrent workers rely on these, not on the pre-checks.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_documents",
        sql: r#"
CREATE TABLE IF NOT EXISTS documents (
    entity_id TEXT NOT NULL,
    document_type TEXT NOT NULL,
    period TEXT NOT NULL,
    requested_period TEXT NOT NULL,
    source TEXT NOT NULL,
    source_url TEXT NOT NULL,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    retrieved_at TIMESTAMP NOT NULL,
    inserted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(entity_id, document_type, period),
    UNIQUE(source_url)
);

CREATE TABLE IF NOT EXISTS ingest_log (
    run_id TEXT NOT NULL,
    instance_index INTEGER NOT NULL,
    entity_id TEXT NOT NULL,
    document_type TEXT NOT NULL,
    period TEXT NOT NULL,
    outcome TEXT NOT NULL,
    reason TEXT,
    source TEXT,
    attempts INTEGER NOT NULL,
    elapsed_ms BIGINT NOT NULL,
    logged_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_documents_entity ON documents(entity_id);
CREATE INDEX IF NOT EXISTS idx_ingest_log_run_outcome ON ingest_log(run_id, outcome);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

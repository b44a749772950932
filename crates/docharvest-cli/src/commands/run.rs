use std::collections::BTreeSet;
use std::sync::Arc;

use docharvest_core::lifecycle::cancel_on_shutdown_signal;
use docharvest_core::{DocumentStore, DocumentType, FileCoordinator, LockGuard, Worker};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, RunArgs};
use crate::error::CliError;

pub async fn run(cli: &Cli, args: &RunArgs) -> Result<Value, CliError> {
    // Everything that can be misconfigured is checked before the first unit.
    let config = super::load_config(cli)?;
    let (slot, units) = super::resolve_partition(&args.partition, &config)?;

    let governor = Arc::new(config.rate_governor()?);
    let sources = config.source_registry(&governor)?;
    let document_types: Vec<DocumentType> = units
        .iter()
        .map(|unit| unit.document_type)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    sources.ensure_covers(&document_types)?;

    let warehouse = super::open_warehouse(cli, &config)?;
    let lock_dir = config.lock_dir(&warehouse.config().home);
    let store: Arc<dyn DocumentStore> = Arc::new(warehouse);

    let lock = LockGuard::acquire(Arc::new(FileCoordinator::new(lock_dir)), slot.index());

    let cancel = CancellationToken::new();
    let signals = cancel_on_shutdown_signal(cancel.clone());

    let mut worker = Worker::new(slot, sources, governor, store, config.worker_config())
        .with_cancellation(cancel.clone());
    if let Some(run_id) = args.run_id.as_deref() {
        worker = worker.with_run_id(run_id);
    }

    let report = worker.run(&units).await;

    lock.release();
    cancel.cancel();
    let _ = signals.await;

    Ok(serde_json::to_value(&report)?)
}

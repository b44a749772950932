mod coverage;
mod failures;
mod plan;
mod run;

use docharvest_core::universe::{self, filter_document_type, filter_entities};
use docharvest_core::{
    partition_for, resolve_home, EntityId, HarvestConfig, InstanceSlot, Unit, Warehouse,
};
use serde_json::Value;

use crate::cli::{Cli, Command, PartitionArgs};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    match &cli.command {
        Command::Run(args) => run::run(cli, args).await,
        Command::Plan(args) => plan::run(cli, args),
        Command::Coverage(args) => coverage::run(cli, args),
        Command::Failures(args) => failures::run(cli, args),
    }
}

/// Load and validate the configuration. A missing default file means defaults.
fn load_config(cli: &Cli) -> Result<HarvestConfig, CliError> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| resolve_home().join("docharvest.toml"));
    let config = HarvestConfig::load(&path)?;
    config.validate()?;
    Ok(config)
}

fn open_warehouse(cli: &Cli, config: &HarvestConfig) -> Result<Warehouse, CliError> {
    Ok(Warehouse::open(config.warehouse_config(cli.db.as_deref()))?)
}

fn parse_entity_ids(values: &[String]) -> Result<Vec<EntityId>, CliError> {
    values
        .iter()
        .map(|value| EntityId::parse(value).map_err(CliError::from))
        .collect()
}

/// The units this instance owns, in processing order.
///
/// Filters apply after partitioning so that narrowing a run never moves units between
/// instances.
fn resolve_partition(
    args: &PartitionArgs,
    config: &HarvestConfig,
) -> Result<(InstanceSlot, Vec<Unit>), CliError> {
    let slot = InstanceSlot::new(args.instance, args.total)?;

    let all_units = match (&args.units, &args.entities) {
        (Some(path), _) => universe::load_units(path)?,
        (None, Some(path)) => {
            let entities = universe::load_entities(path)?;
            config.universe_spec().enumerate(&entities)
        }
        (None, None) => {
            return Err(CliError::Command(String::from(
                "either --entities or --units is required",
            )))
        }
    };

    let mut units = partition_for(&all_units, slot);
    units = filter_entities(units, &parse_entity_ids(&args.entities_filter)?);
    units = filter_document_type(units, args.doc_type.map(Into::into));
    if let Some(limit) = args.limit {
        units.truncate(limit);
    }

    tracing::debug!(
        instance = slot.index(),
        total = slot.total(),
        universe = all_units.len(),
        assigned = units.len(),
        "partition resolved"
    );
    Ok((slot, units))
}

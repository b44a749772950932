use serde::Serialize;
use serde_json::Value;

use docharvest_core::Unit;

use crate::cli::{Cli, PlanArgs};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct PlanResponse {
    instance_index: u32,
    total_instances: u32,
    unit_count: usize,
    units: Vec<Unit>,
}

pub fn run(cli: &Cli, args: &PlanArgs) -> Result<Value, CliError> {
    let config = super::load_config(cli)?;
    let (slot, units) = super::resolve_partition(&args.partition, &config)?;

    let response = PlanResponse {
        instance_index: slot.index(),
        total_instances: slot.total(),
        unit_count: units.len(),
        units,
    };
    Ok(serde_json::to_value(&response)?)
}

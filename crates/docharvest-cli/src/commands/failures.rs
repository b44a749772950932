use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use docharvest_core::universe::save_units;
use docharvest_core::{DocumentType, EntityId, FailedUnitRow, Period, Unit};

use crate::cli::{Cli, FailuresArgs};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct FailuresResponse {
    run_id: Option<String>,
    unit_count: usize,
    units: Vec<Unit>,
    failures: Vec<FailedUnitRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    written_to: Option<String>,
}

pub fn run(cli: &Cli, args: &FailuresArgs) -> Result<Value, CliError> {
    let config = super::load_config(cli)?;
    let warehouse = super::open_warehouse(cli, &config)?;

    let run_id = match args.run_id.clone() {
        Some(run_id) => Some(run_id),
        None => warehouse.latest_run_id()?,
    };

    let failures = match run_id.as_deref() {
        Some(run_id) => warehouse.failed_units(Some(run_id), args.instance)?,
        None => Vec::new(),
    };

    // A unit may fail more than once in a run; list it once.
    let units: Vec<Unit> = failures
        .iter()
        .map(unit_from_row)
        .collect::<Result<BTreeSet<_>, _>>()?
        .into_iter()
        .collect();

    let written_to = match args.output.as_deref() {
        Some(path) => {
            save_units(path, &units)?;
            Some(path.display().to_string())
        }
        None => None,
    };

    let response = FailuresResponse {
        run_id,
        unit_count: units.len(),
        units,
        failures,
        written_to,
    };
    Ok(serde_json::to_value(&response)?)
}

fn unit_from_row(row: &FailedUnitRow) -> Result<Unit, CliError> {
    Ok(Unit::new(
        EntityId::parse(&row.entity_id)?,
        row.document_type.parse::<DocumentType>()?,
        Period::parse(&row.period)?,
    ))
}

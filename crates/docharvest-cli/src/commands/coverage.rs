use serde::Serialize;
use serde_json::Value;

use docharvest_core::{CoverageSummaryRow, CoveredKey};

use crate::cli::{Cli, CoverageArgs};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct CoverageResponse {
    documents: u64,
    summary: Vec<CoverageSummaryRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    covered: Option<Vec<CoveredKey>>,
}

pub fn run(cli: &Cli, args: &CoverageArgs) -> Result<Value, CliError> {
    let config = super::load_config(cli)?;
    let entities: Vec<String> = super::parse_entity_ids(&args.entities)?
        .into_iter()
        .map(String::from)
        .collect();

    let warehouse = super::open_warehouse(cli, &config)?;
    let summary = warehouse.coverage_summary(&entities)?;
    let covered = if args.detailed {
        Some(warehouse.coverage(&entities)?)
    } else {
        None
    };

    let response = CoverageResponse {
        documents: summary.iter().map(|row| row.documents).sum(),
        summary,
        covered,
    };
    Ok(serde_json::to_value(&response)?)
}

//! Unit universe enumeration and unit list files.
//!
//! The universe is recomputed at every launch from the master entity list. It is never
//! persisted; determinism comes from [`crate::partition`] sorting what is produced here.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, CoreError, DocumentType, EntityId, Period, Quarter, Unit};

/// Which document types and fiscal years make up the universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseSpec {
    pub min_year: u16,
    pub max_year: u16,
    pub document_types: Vec<DocumentType>,
}

impl Default for UniverseSpec {
    fn default() -> Self {
        Self {
            min_year: 2015,
            max_year: 2026,
            document_types: DocumentType::ALL.to_vec(),
        }
    }
}

impl UniverseSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_year > self.max_year {
            return Err(ConfigError::InvalidUniverse(format!(
                "min_year {} is after max_year {}",
                self.min_year, self.max_year
            )));
        }
        if self.document_types.is_empty() {
            return Err(ConfigError::InvalidUniverse(String::from(
                "at least one document type is required",
            )));
        }
        Ok(())
    }

    /// Periods enumerated for one document type, oldest first.
    pub fn periods(&self, document_type: DocumentType) -> Vec<Period> {
        let years = self.min_year..=self.max_year;
        match document_type {
            DocumentType::AnnualReport => years.map(Period::year).collect(),
            DocumentType::CallTranscript => years
                .flat_map(|year| {
                    Quarter::ALL
                        .into_iter()
                        .map(move |quarter| Period::quarter(year, quarter))
                })
                .collect(),
        }
    }

    /// Every `entity x document type x period` combination.
    pub fn enumerate(&self, entities: &[EntityId]) -> Vec<Unit> {
        let document_types: BTreeSet<DocumentType> =
            self.document_types.iter().copied().collect();
        let entities: BTreeSet<&EntityId> = entities.iter().collect();

        let mut units = Vec::new();
        for entity in entities {
            for document_type in &document_types {
                for period in self.periods(*document_type) {
                    units.push(Unit::new(entity.clone(), *document_type, period));
                }
            }
        }
        units
    }
}

/// Parse a master entity list.
///
/// Accepts a JSON array of ids, or plain text with one id per line where blank lines
/// and `#` comments are ignored. Duplicates collapse.
pub fn parse_entities(text: &str) -> Result<Vec<EntityId>, CoreError> {
    let raw: Vec<String> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text)?
    } else {
        text.lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    };

    let mut entities = BTreeSet::new();
    for value in raw {
        entities.insert(EntityId::parse(&value)?);
    }
    Ok(entities.into_iter().collect())
}

pub fn load_entities(path: &Path) -> Result<Vec<EntityId>, CoreError> {
    let text = read_to_string(path)?;
    parse_entities(&text)
}

/// Read a unit list file (a JSON array of units).
pub fn load_units(path: &Path) -> Result<Vec<Unit>, CoreError> {
    let text = read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Write a unit list file that [`load_units`] can read back.
pub fn save_units(path: &Path, units: &[Unit]) -> Result<(), CoreError> {
    let body = serde_json::to_string_pretty(units)?;
    fs::write(path, body).map_err(|source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Keep only units of one document type.
pub fn filter_document_type(units: Vec<Unit>, document_type: Option<DocumentType>) -> Vec<Unit> {
    match document_type {
        Some(document_type) => units
            .into_iter()
            .filter(|unit| unit.document_type == document_type)
            .collect(),
        None => units,
    }
}

/// Keep only units of the listed entities. An empty list keeps everything.
pub fn filter_entities(units: Vec<Unit>, entities: &[EntityId]) -> Vec<Unit> {
    if entities.is_empty() {
        return units;
    }
    units
        .into_iter()
        .filter(|unit| entities.contains(&unit.entity_id))
        .collect()
}

fn read_to_string(path: &Path) -> Result<String, CoreError> {
    fs::read_to_string(path).map_err(|source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_text_list_with_comments_and_duplicates() {
        let entities = parse_entities("# nifty sample\ninfy\nTCS  # it services\n\nINFY\n")
            .expect("parse");
        let ids: Vec<&str> = entities.iter().map(EntityId::as_str).collect();
        assert_eq!(ids, vec!["INFY", "TCS"]);
    }

    #[test]
    fn parses_json_array() {
        let entities = parse_entities(r#"["wipro", "500325"]"#).expect("parse");
        let ids: Vec<&str> = entities.iter().map(EntityId::as_str).collect();
        assert_eq!(ids, vec!["500325", "WIPRO"]);
    }

    #[test]
    fn rejects_invalid_entity_in_list() {
        assert!(matches!(
            parse_entities("INFY\nBAD ID\n"),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn enumerates_years_and_quarters() {
        let spec = UniverseSpec {
            min_year: 2023,
            max_year: 2024,
            document_types: DocumentType::ALL.to_vec(),
        };
        let units = spec.enumerate(&[EntityId::parse("INFY").expect("entity")]);

        let annual = units
            .iter()
            .filter(|unit| unit.document_type == DocumentType::AnnualReport)
            .count();
        let calls = units
            .iter()
            .filter(|unit| unit.document_type == DocumentType::CallTranscript)
            .count();
        assert_eq!(annual, 2);
        assert_eq!(calls, 8);
    }

    #[test]
    fn validate_rejects_inverted_years() {
        let spec = UniverseSpec {
            min_year: 2025,
            max_year: 2020,
            ..UniverseSpec::default()
        };
        assert!(matches!(spec.validate(), Err(ConfigError::InvalidUniverse(_))));
    }

    #[test]
    fn unit_lists_survive_a_file_round_trip() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("units.json");
        let units = UniverseSpec {
            min_year: 2024,
            max_year: 2024,
            document_types: vec![DocumentType::CallTranscript],
        }
        .enumerate(&[EntityId::parse("TCS").expect("entity")]);

        save_units(&path, &units).expect("save");
        assert_eq!(load_units(&path).expect("load"), units);
    }

    #[test]
    fn filters_by_type_and_entity() {
        let entities = vec![
            EntityId::parse("INFY").expect("entity"),
            EntityId::parse("TCS").expect("entity"),
        ];
        let units = UniverseSpec {
            min_year: 2024,
            max_year: 2024,
            ..UniverseSpec::default()
        }
        .enumerate(&entities);

        let annual = filter_document_type(units.clone(), Some(DocumentType::AnnualReport));
        assert_eq!(annual.len(), 2);

        let tcs = filter_entities(units, &entities[1..]);
        assert!(tcs.iter().all(|unit| unit.entity_id.as_str() == "TCS"));
        assert_eq!(tcs.len(), 5);
    }
}

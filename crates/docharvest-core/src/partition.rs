use crate::{ConfigError, Unit};

/// Validated `(instance_index, total_instances)` pair. Instance indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSlot {
    index: u32,
    total: u32,
}

impl InstanceSlot {
    pub fn new(index: u32, total: u32) -> Result<Self, ConfigError> {
        if total == 0 {
            return Err(ConfigError::InvalidTotalInstances { total });
        }
        if index == 0 || index > total {
            return Err(ConfigError::InstanceIndexOutOfRange { index, total });
        }
        Ok(Self { index, total })
    }

    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn total(self) -> u32 {
        self.total
    }

    fn owns(self, ordinal: usize) -> bool {
        ordinal % self.total as usize == (self.index - 1) as usize
    }
}

/// The units assigned to one worker instance.
///
/// Units are sorted canonically (entity, document type, period) and deduplicated before
/// assignment, so the result depends only on the set of input units, never on the order
/// they were listed in. Position `i` of the sorted universe goes to instance
/// `i mod total + 1`. Because the sort is entity-major, the returned partition is too.
pub fn partition(
    all_units: &[Unit],
    instance_index: u32,
    total_instances: u32,
) -> Result<Vec<Unit>, ConfigError> {
    let slot = InstanceSlot::new(instance_index, total_instances)?;
    Ok(partition_for(all_units, slot))
}

/// [`partition`] for an already validated slot.
pub fn partition_for(all_units: &[Unit], slot: InstanceSlot) -> Vec<Unit> {
    let mut sorted = all_units.to_vec();
    sorted.sort();
    sorted.dedup();

    sorted
        .into_iter()
        .enumerate()
        .filter(|(ordinal, _)| slot.owns(*ordinal))
        .map(|(_, unit)| unit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocumentType, EntityId, Period};

    fn units(entities: &[&str]) -> Vec<Unit> {
        entities
            .iter()
            .flat_map(|entity| {
                DocumentType::ALL.into_iter().map(move |document_type| {
                    Unit::new(
                        EntityId::parse(entity).expect("entity"),
                        document_type,
                        Period::year(2024),
                    )
                })
            })
            .collect()
    }

    #[test]
    fn rejects_zero_total() {
        let error = partition(&units(&["INFY"]), 1, 0).expect_err("must fail");
        assert!(matches!(error, ConfigError::InvalidTotalInstances { total: 0 }));
    }

    #[test]
    fn rejects_index_outside_range() {
        for index in [0, 3] {
            let error = partition(&units(&["INFY"]), index, 2).expect_err("must fail");
            assert!(matches!(
                error,
                ConfigError::InstanceIndexOutOfRange { total: 2, .. }
            ));
        }
    }

    #[test]
    fn single_instance_gets_everything_sorted() {
        let universe = units(&["TCS", "INFY"]);
        let assigned = partition(&universe, 1, 1).expect("partition");
        let mut expected = universe.clone();
        expected.sort();
        assert_eq!(assigned, expected);
    }

    #[test]
    fn input_order_does_not_matter() {
        let universe = units(&["TCS", "INFY", "WIPRO", "HDFCBANK"]);
        let mut reversed = universe.clone();
        reversed.reverse();

        for index in 1..=3 {
            assert_eq!(
                partition(&universe, index, 3).expect("partition"),
                partition(&reversed, index, 3).expect("partition")
            );
        }
    }

    #[test]
    fn duplicate_units_are_assigned_once() {
        let mut universe = units(&["INFY"]);
        universe.extend(units(&["INFY"]));
        let first = partition(&universe, 1, 2).expect("partition");
        let second = partition(&universe, 2, 2).expect("partition");
        assert_eq!(first.len() + second.len(), 2);
    }

    #[test]
    fn more_instances_than_units_leaves_some_empty() {
        let universe = units(&["INFY"]);
        assert_eq!(partition(&universe, 3, 5).expect("partition").len(), 0);
        assert_eq!(partition(&universe, 2, 5).expect("partition").len(), 1);
    }
}

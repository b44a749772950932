use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{DocumentType, EntityId, Period};

/// One atomic fetch target.
///
/// Field order defines the canonical ordering: entity, then document type, then period.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Unit {
    pub entity_id: EntityId,
    pub document_type: DocumentType,
    pub period: Period,
}

impl Unit {
    pub fn new(entity_id: EntityId, document_type: DocumentType, period: Period) -> Self {
        Self {
            entity_id,
            document_type,
            period,
        }
    }

    /// The same unit re-keyed to another period.
    #[must_use]
    pub fn with_period(&self, period: Period) -> Self {
        Self {
            entity_id: self.entity_id.clone(),
            document_type: self.document_type,
            period,
        }
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.entity_id, self.document_type, self.period)
    }
}

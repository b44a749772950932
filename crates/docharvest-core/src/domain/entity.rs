use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_ENTITY_ID_LEN: usize = 20;

/// Normalized company identifier (exchange ticker or scrip code).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Parse and normalize an entity id to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyEntityId);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_ENTITY_ID_LEN {
            return Err(ValidationError::EntityIdTooLong {
                len,
                max: MAX_ENTITY_ID_LEN,
            });
        }

        // Numeric scrip codes are valid ids, so a leading digit is allowed.
        if let Some(first) = normalized.chars().next() {
            if !first.is_ascii_alphanumeric() {
                return Err(ValidationError::EntityIdInvalidStart { ch: first });
            }
        }

        for (index, ch) in normalized.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '&' | '_');
            if !valid {
                return Err(ValidationError::EntityIdInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for EntityId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for EntityId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_entity_id() {
        let parsed = EntityId::parse(" infy ").expect("entity id should parse");
        assert_eq!(parsed.as_str(), "INFY");
    }

    #[test]
    fn accepts_numeric_scrip_codes_and_ampersands() {
        assert_eq!(EntityId::parse("500325").expect("scrip").as_str(), "500325");
        assert_eq!(EntityId::parse("m&m").expect("ticker").as_str(), "M&M");
    }

    #[test]
    fn rejects_invalid_chars() {
        let err = EntityId::parse("INFY$").expect_err("must fail");
        assert!(matches!(err, ValidationError::EntityIdInvalidChar { ch: '$', index: 4 }));
    }

    #[test]
    fn rejects_leading_punctuation() {
        let err = EntityId::parse("-INFY").expect_err("must fail");
        assert!(matches!(err, ValidationError::EntityIdInvalidStart { .. }));
    }
}

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Fiscal quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub const ALL: [Self; 4] = [Self::Q1, Self::Q2, Self::Q3, Self::Q4];

    pub const fn number(self) -> u8 {
        match self {
            Self::Q1 => 1,
            Self::Q2 => 2,
            Self::Q3 => 3,
            Self::Q4 => 4,
        }
    }

    pub const fn from_number(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Q1),
            2 => Some(Self::Q2),
            3 => Some(Self::Q3),
            4 => Some(Self::Q4),
            _ => None,
        }
    }
}

/// A fiscal year, or a quarter of a fiscal year.
///
/// Ordering is chronological with a full year sorting before its quarters.
/// The canonical text form is `FY2024` or `FY2024Q3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    fiscal_year: u16,
    quarter: Option<Quarter>,
}

impl Period {
    pub const fn year(fiscal_year: u16) -> Self {
        Self {
            fiscal_year,
            quarter: None,
        }
    }

    pub const fn quarter(fiscal_year: u16, quarter: Quarter) -> Self {
        Self {
            fiscal_year,
            quarter: Some(quarter),
        }
    }

    pub const fn fiscal_year(self) -> u16 {
        self.fiscal_year
    }

    pub const fn fiscal_quarter(self) -> Option<Quarter> {
        self.quarter
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidPeriod {
            value: input.to_owned(),
        };

        let normalized = input.trim().to_ascii_uppercase();
        let rest = normalized.strip_prefix("FY").ok_or_else(invalid)?;
        let (year, quarter) = match rest.split_once('Q') {
            Some((year, quarter)) => (year, Some(quarter)),
            None => (rest, None),
        };

        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let fiscal_year: u16 = year.parse().map_err(|_| invalid())?;

        let quarter = match quarter {
            None => None,
            Some(value) => {
                let number: u8 = value.parse().map_err(|_| invalid())?;
                Some(Quarter::from_number(number).ok_or_else(invalid)?)
            }
        };

        Ok(Self {
            fiscal_year,
            quarter,
        })
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.quarter {
            Some(quarter) => write!(f, "FY{}Q{}", self.fiscal_year, quarter.number()),
            None => write!(f, "FY{}", self.fiscal_year),
        }
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Period {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}

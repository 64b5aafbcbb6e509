//! Indian financial year (April 1 – March 31).

use core::fmt;
use core::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// A financial year identified by the calendar year it starts in.
///
/// Rendered as `"YYYY-YY"`, e.g. `2024-25` for April 2024 – March 2025.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FinancialYear {
    start_year: i32,
}

impl FinancialYear {
    pub fn starting(start_year: i32) -> Self {
        Self { start_year }
    }

    /// Month >= April belongs to the year starting that April, earlier months
    /// to the year that started the previous April.
    pub fn for_date(date: NaiveDate) -> Self {
        let year = date.year();
        if date.month() >= 4 {
            Self::starting(year)
        } else {
            Self::starting(year - 1)
        }
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.start_year, 4, 1)
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.start_year + 1, 3, 31)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::for_date(date) == *self
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FinancialYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.start_year, (self.start_year + 1).rem_euclid(100))
    }
}

impl FromStr for FinancialYear {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("financial year must look like 2024-25, got '{s}'"));
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        if start.len() != 4 || end.len() != 2 {
            return Err(invalid());
        }
        let start_year: i32 = start.parse().map_err(|_| invalid())?;
        let end_suffix: i32 = end.parse().map_err(|_| invalid())?;
        if (start_year + 1).rem_euclid(100) != end_suffix {
            return Err(invalid());
        }
        Ok(Self::starting(start_year))
    }
}

impl TryFrom<String> for FinancialYear {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FinancialYear> for String {
    fn from(value: FinancialYear) -> Self {
        value.to_string()
    }
}

impl ValueObject for FinancialYear {}

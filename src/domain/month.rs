use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar month (year + month), the reference unit for bill projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Self {
        assert!((1..=12).contains(&month), "month must be 1-12");
        Self { year, month }
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parse a "YYYY-MM" string.
    pub fn parse(s: &str) -> Result<Self, ParseMonthError> {
        let (year_str, month_str) = s.trim().split_once('-').ok_or(ParseMonthError)?;
        let year: i32 = year_str.parse().map_err(|_| ParseMonthError)?;
        let month: u32 = month_str.parse().map_err(|_| ParseMonthError)?;
        if !(1..=12).contains(&month) {
            return Err(ParseMonthError);
        }
        Ok(Self { year, month })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).expect("valid month")
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day() - Duration::days(1)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Month offset by `n` (negative allowed).
    pub fn add_months(&self, n: i32) -> Self {
        let zero_based = self.year * 12 + (self.month as i32 - 1) + n;
        Self {
            year: zero_based.div_euclid(12),
            month: zero_based.rem_euclid(12) as u32 + 1,
        }
    }

    /// Signed number of whole months from `other` to `self`.
    pub fn months_since(&self, other: Month) -> i32 {
        (self.year - other.year) * 12 + self.month as i32 - other.month as i32
    }

    /// The given day-of-month within this month, clamped to the month's
    /// length (Jan 31 -> Feb 29 in a leap year, Feb 28 otherwise).
    pub fn day_clamped(&self, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, day).unwrap_or_else(|| self.last_day())
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMonthError;

impl fmt::Display for ParseMonthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid month format, expected YYYY-MM")
    }
}

impl std::error::Error for ParseMonthError {}

use std::{fmt, str::FromStr};

use time::{Date, macros::format_description};

use super::error::DomainError;

/// Calendar-date key identifying one journal entry and its artifact.
///
/// Always the canonical `YYYY-MM-DD` rendering of a real date, which also
/// makes it safe to use verbatim as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateKey(String);

impl DateKey {
    /// Parse and validate a date key. Surrounding whitespace is tolerated;
    /// anything that is not a zero-padded real calendar date is rejected.
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("date key must not be empty"));
        }

        let format = format_description!("[year]-[month]-[day]");
        Date::parse(trimmed, format).map_err(|err| {
            DomainError::validation(format!("invalid date key `{trimmed}`: {err}"))
        })?;

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DateKey {
    type Err = DomainError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

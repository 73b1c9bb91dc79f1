//! Field-level normalisation rules

use crate::error::FieldParseError;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::str::FromStr;

/// Empty text becomes null; anything else passes through verbatim.
pub fn text(raw: String) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw)
    }
}

/// Placeholders the registry writes for "no date"
const NULL_DATES: [&str; 2] = ["0", "00000000"];

/// `capital_social` is `NUMERIC(18, 2)`.
const MAX_INTEGER_DIGITS: usize = 16;

/// Parse a `YYYYMMDD` date. Blank values and the `0`/`00000000` placeholders are null.
pub fn date(field: &'static str, raw: &str) -> Result<Option<NaiveDate>, FieldParseError> {
    let value = raw.trim();
    if value.is_empty() || NULL_DATES.contains(&value) {
        return Ok(None);
    }

    let invalid = || FieldParseError::InvalidDate {
        field,
        value: value.to_string(),
    };

    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    NaiveDate::parse_from_str(value, "%Y%m%d")
        .map(Some)
        .map_err(|_| invalid())
}

/// Parse a locale-formatted decimal such as `1.250.000,50`.
///
/// Dots are thousands separators and the comma is the decimal separator.
/// Exponents and values wider than the target column are rejected.
pub fn decimal(field: &'static str, raw: &str) -> Result<Option<BigDecimal>, FieldParseError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }

    let invalid = || FieldParseError::InvalidDecimal {
        field,
        value: value.to_string(),
    };

    let unsigned = value.strip_prefix('-').unwrap_or(value);
    if !unsigned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return Err(invalid());
    }

    let canonical: String = value
        .chars()
        .filter(|c| *c != '.')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    let integer_digits = canonical
        .split('.')
        .next()
        .unwrap_or_default()
        .trim_start_matches('-')
        .trim_start_matches('0')
        .len();
    if integer_digits > MAX_INTEGER_DIGITS {
        return Err(invalid());
    }

    BigDecimal::from_str(&canonical).map(Some).map_err(|_| invalid())
}

/// Left-pad a numeric code with zeros, e.g. country `76` -> `076`.
pub fn zero_pad(value: Option<String>, width: usize) -> Option<String> {
    value.map(|v| {
        let trimmed = v.trim();
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            format!("{trimmed:0>width$}")
        } else {
            v
        }
    })
}

/// Sequential reader over one row's columns
pub(crate) struct Row {
    columns: std::vec::IntoIter<String>,
}

impl Row {
    pub(crate) fn new(columns: Vec<String>, expected: usize) -> Result<Self, FieldParseError> {
        if columns.len() != expected {
            return Err(FieldParseError::ColumnCount {
                expected,
                found: columns.len(),
            });
        }
        Ok(Self {
            columns: columns.into_iter(),
        })
    }

    fn next_raw(&mut self) -> String {
        self.columns.next().unwrap_or_default()
    }

    pub(crate) fn text(&mut self) -> Option<String> {
        text(self.next_raw())
    }

    /// Key columns are trimmed; whitespace around an identifier is never meaningful.
    pub(crate) fn key(&mut self) -> Option<String> {
        text(self.next_raw().trim().to_string())
    }

    pub(crate) fn date(&mut self, field: &'static str) -> Result<Option<NaiveDate>, FieldParseError> {
        date(field, &self.next_raw())
    }

    pub(crate) fn decimal(
        &mut self,
        field: &'static str,
    ) -> Result<Option<BigDecimal>, FieldParseError> {
        decimal(field, &self.next_raw())
    }
}

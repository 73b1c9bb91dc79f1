//! Domain types shared by the ingestion pipeline

mod entity;

pub use entity::EntityKind;

use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One monthly snapshot of the registry, identified by year and month.
///
/// Orders chronologically, so the most recent period of a sorted list is the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: u16,
    month: u8,
}

impl Period {
    pub fn new(year: u16, month: u8) -> crate::Result<Self> {
        if !(1..=12).contains(&month) || year < 1000 {
            return Err(CommonError::InvalidPeriod(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }
}

impl FromStr for Period {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CommonError::InvalidPeriod(s.to_string());
        let trimmed = s.trim().trim_end_matches('/');
        let (year, month) = trimmed.split_once('-').ok_or_else(invalid)?;

        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        if !year.bytes().chain(month.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Period::new(year, month).map_err(|_| invalid())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl TryFrom<String> for Period {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

/// An archive published for a period.
///
/// `kind` is `None` when the file name matches no known entity; such files are
/// reported but never loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub period: Period,
    pub filename: String,
    pub kind: Option<EntityKind>,
    pub size: Option<u64>,
}

impl SourceFile {
    pub fn new(period: Period, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let kind = EntityKind::from_archive_name(&filename);
        Self {
            period,
            filename,
            kind,
            size: None,
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    /// Sort key placing reference tables first, then companies, establishments,
    /// partners, the simples regime, and finally unrecognised files.
    pub fn load_order(&self) -> (u8, &str) {
        let rank = self.kind.map_or(EntityKind::UNRECOGNISED_RANK, EntityKind::load_rank);
        (rank, self.filename.as_str())
    }
}

impl fmt::Display for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.period, self.filename)
    }
}

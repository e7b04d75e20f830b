//! Cell grid model and structural analysis.
//!
//! - `directive`: inline row/column control directives (ONLY / FROM / UNTIL)
//! - `group`: prompt groups and upstream group descriptors
//! - `analyzer`: header detection, group resolution strategies, work rows

pub mod analyzer;
pub mod directive;
pub mod group;

pub use analyzer::{Analyzer, GroupStrategy, HeaderLayout, SheetAnalysis};
pub use directive::{Axis, AxisDirectives, DirectiveKind, DirectiveSet};
pub use group::{AnswerColumn, ColumnRef, GroupDescriptor, GroupType, PromptGroup};

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::GridError;

/// Convert a zero-based column index to its letter form (0 → A, 26 → AA).
///
/// Total over `usize`, including `usize::MAX`.
pub fn column_to_letter(index: usize) -> String {
    let mut n = index;
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert a column letter (case-insensitive) back to its zero-based index.
pub fn letter_to_column(letters: &str) -> Option<usize> {
    let letters = letters.trim();
    if letters.is_empty() {
        return None;
    }
    let mut index: Option<usize> = None;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A') as usize;
        index = Some(match index {
            None => digit,
            Some(prefix) => prefix.checked_add(1)?.checked_mul(26)?.checked_add(digit)?,
        });
    }
    index
}

/// True when the cell holds nothing worth processing: blank or the `null` literal.
pub fn is_blank(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null")
}

/// A zero-based cell position, rendered as `B6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: usize,
    pub column: usize,
}

impl CellAddress {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_to_letter(self.column), self.row + 1)
    }
}

/// An ordered grid of string cells. Empty string means an empty cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CellGrid {
    rows: Vec<Vec<String>>,
}

impl CellGrid {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Build a grid from string slices, mostly for fixtures.
    pub fn from_rows<R, C>(rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Width of the widest row.
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Cell value, or the empty string when out of range.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn row(&self, row: usize) -> &[String] {
        self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A row counts as empty when every cell is whitespace.
    pub fn is_row_empty(&self, row: usize) -> bool {
        self.row(row).iter().all(|c| c.trim().is_empty())
    }
}

impl<'de> Deserialize<'de> for CellGrid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Vec<Vec<serde_json::Value>> = Vec::deserialize(deserializer)?;
        let rows = raw
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect();
        Ok(Self { rows })
    }
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Everything the core reads from the tabular source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataSource {
    pub rows: CellGrid,
    /// Ready-made group descriptors; when present they replace the heuristic.
    #[serde(default)]
    pub groups: Option<Vec<GroupDescriptor>>,
}

impl DataSource {
    pub fn new(grid: CellGrid) -> Self {
        Self {
            rows: grid,
            groups: None,
        }
    }

    pub fn with_descriptors(mut self, descriptors: Vec<GroupDescriptor>) -> Self {
        self.groups = Some(descriptors);
        self
    }

    pub fn grid(&self) -> &CellGrid {
        &self.rows
    }

    pub fn from_json_str(json: &str) -> Result<Self, GridError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, GridError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

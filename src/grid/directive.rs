//! Inline control directives.
//!
//! Directives are plain phrases typed into cells. Row directives live in one
//! fixed column and apply to the row they sit on; column directives live in the
//! header rows and apply to the column they sit in.

use serde::Serialize;
use tracing::debug;

use crate::grid::CellGrid;

/// Which axis a directive restricts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Row,
    Column,
}

/// What a directive does to its axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    Only,
    From,
    Until,
}

/// Phrase vocabulary, matched by substring. ONLY is checked first.
const ROW_PHRASES: &[(DirectiveKind, &str)] = &[
    (DirectiveKind::Only, "この行のみ処理"),
    (DirectiveKind::Only, "process only this row"),
    (DirectiveKind::Until, "この行で処理終了"),
    (DirectiveKind::Until, "process until this row"),
    (DirectiveKind::From, "この行から処理"),
    (DirectiveKind::From, "process from this row"),
];

const COLUMN_PHRASES: &[(DirectiveKind, &str)] = &[
    (DirectiveKind::Only, "この列のみ処理"),
    (DirectiveKind::Only, "process only this column"),
    (DirectiveKind::Until, "この列で処理終了"),
    (DirectiveKind::Until, "process until this column"),
    (DirectiveKind::From, "この列から処理"),
    (DirectiveKind::From, "process from this column"),
];

/// Classify a cell's text as a directive on `axis`, if it carries one.
pub fn match_directive(axis: Axis, text: &str) -> Option<DirectiveKind> {
    let phrases = match axis {
        Axis::Row => ROW_PHRASES,
        Axis::Column => COLUMN_PHRASES,
    };
    let lowered = text.to_lowercase();
    phrases
        .iter()
        .find(|(_, phrase)| lowered.contains(phrase))
        .map(|(kind, _)| *kind)
}

/// Directives collected for one axis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AxisDirectives {
    pub only: Vec<usize>,
    pub from: Vec<usize>,
    pub until: Vec<usize>,
}

impl AxisDirectives {
    pub fn push(&mut self, kind: DirectiveKind, position: usize) {
        let list = match kind {
            DirectiveKind::Only => &mut self.only,
            DirectiveKind::From => &mut self.from,
            DirectiveKind::Until => &mut self.until,
        };
        if !list.contains(&position) {
            list.push(position);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.only.is_empty() && self.from.is_empty() && self.until.is_empty()
    }

    /// Any ONLY directive shadows every FROM/UNTIL on the same axis.
    pub fn contains(&self, position: usize) -> bool {
        if !self.only.is_empty() {
            return self.only.contains(&position);
        }
        self.from.iter().all(|&f| position >= f) && self.until.iter().all(|&u| position <= u)
    }

    /// True if any position in `start..=end` is in range.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        if !self.only.is_empty() {
            return self.only.iter().any(|&p| p >= start && p <= end);
        }
        let lower = self.from.iter().copied().max().unwrap_or(0).max(start);
        let upper = self
            .until
            .iter()
            .copied()
            .min()
            .unwrap_or(usize::MAX)
            .min(end);
        lower <= upper
    }
}

/// Row and column directives discovered in a grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectiveSet {
    pub rows: AxisDirectives,
    pub columns: AxisDirectives,
}

impl DirectiveSet {
    /// Scan `row_column` across every row for row directives, and every cell of
    /// the first `header_rows` rows for column directives.
    pub fn scan(grid: &CellGrid, row_column: usize, header_rows: usize) -> Self {
        let mut set = Self::default();

        for row in 0..grid.row_count() {
            if let Some(kind) = match_directive(Axis::Row, grid.cell(row, row_column)) {
                debug!(row, ?kind, "Row directive");
                set.rows.push(kind, row);
            }
        }

        for row in 0..grid.row_count().min(header_rows) {
            for (column, text) in grid.row(row).iter().enumerate() {
                if let Some(kind) = match_directive(Axis::Column, text) {
                    debug!(row, column, ?kind, "Column directive");
                    set.columns.push(kind, column);
                }
            }
        }

        set
    }

    pub fn axis(&self, axis: Axis) -> &AxisDirectives {
        match axis {
            Axis::Row => &self.rows,
            Axis::Column => &self.columns,
        }
    }

    pub fn row_in_range(&self, row: usize) -> bool {
        self.rows.contains(row)
    }

    pub fn span_in_range(&self, start: usize, end: usize) -> bool {
        self.columns.overlaps(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrases_match_by_substring() {
        assert_eq!(
            match_directive(Axis::Row, "★この行のみ処理★"),
            Some(DirectiveKind::Only)
        );
        assert_eq!(
            match_directive(Axis::Row, "Process FROM this row"),
            Some(DirectiveKind::From)
        );
        assert_eq!(
            match_directive(Axis::Column, "この列で処理終了"),
            Some(DirectiveKind::Until)
        );
        assert_eq!(match_directive(Axis::Column, "この行のみ処理"), None);
        assert_eq!(match_directive(Axis::Row, "prompt"), None);
    }

    #[test]
    fn empty_axis_allows_everything() {
        let axis = AxisDirectives::default();
        assert!(axis.contains(0));
        assert!(axis.contains(999));
        assert!(axis.overlaps(3, 4));
    }

    #[test]
    fn from_and_until_bound_the_range() {
        let mut axis = AxisDirectives::default();
        axis.push(DirectiveKind::From, 10);
        axis.push(DirectiveKind::Until, 20);
        assert!(!axis.contains(9));
        assert!(axis.contains(10));
        assert!(axis.contains(20));
        assert!(!axis.contains(21));
    }

    #[test]
    fn every_from_bound_applies() {
        let mut axis = AxisDirectives::default();
        axis.push(DirectiveKind::From, 5);
        axis.push(DirectiveKind::From, 12);
        assert!(!axis.contains(8));
        assert!(axis.contains(12));
    }

    #[test]
    fn only_shadows_from_and_until() {
        let mut axis = AxisDirectives::default();
        axis.push(DirectiveKind::From, 10);
        axis.push(DirectiveKind::Until, 12);
        axis.push(DirectiveKind::Only, 3);
        assert!(axis.contains(3));
        assert!(!axis.contains(11));
        assert!(!axis.overlaps(10, 12));
        assert!(axis.overlaps(2, 4));
    }

    #[test]
    fn span_overlap_with_bounds() {
        let mut axis = AxisDirectives::default();
        axis.push(DirectiveKind::From, 4);
        assert!(!axis.overlaps(1, 3));
        assert!(axis.overlaps(2, 4));
        axis.push(DirectiveKind::Until, 6);
        assert!(!axis.overlaps(7, 9));
        assert!(axis.overlaps(6, 9));
    }

    #[test]
    fn scan_reads_row_column_and_header_rows() {
        let mut rows = vec![vec![String::new(); 4]; 12];
        rows[1][2] = "この列のみ処理".into();
        rows[7][0] = "この行のみ処理".into();
        rows[11][3] = "この列から処理".into(); // below the header scan window
        let grid = CellGrid::new(rows);

        let set = DirectiveSet::scan(&grid, 0, 10);
        assert_eq!(set.rows.only, vec![7]);
        assert_eq!(set.columns.only, vec![2]);
        assert!(set.columns.from.is_empty());
        assert!(set.row_in_range(7));
        assert!(!set.row_in_range(8));
    }
}

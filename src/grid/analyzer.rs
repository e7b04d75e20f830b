//! Grid structure analysis.
//!
//! Finds the header rows, collects control directives, resolves prompt groups
//! and lists the work rows. Group resolution sits behind [`GroupStrategy`] so
//! the label heuristic can be tested and replaced on its own.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::GeneratorConfig;
use crate::grid::directive::DirectiveSet;
use crate::grid::group::{
    AnswerColumn, GroupDescriptor, GroupType, PromptGroup, is_multi_variant_label,
    variant_answers, VARIANT_ORDER,
};
use crate::grid::{CellGrid, DataSource};
use crate::tasks::AiType;

const MENU_LABELS: &[&str] = &["メニュー", "menu"];
const AI_LABELS: &[&str] = &["ai", "使用ai", "ai type"];
const MODEL_LABELS: &[&str] = &["モデル", "model"];
const FUNCTION_LABELS: &[&str] = &["機能", "function"];

const PROMPT_MARKERS: &[&str] = &["プロンプト", "prompt"];
const ANSWER_MARKERS: &[&str] = &["回答", "answer"];

/// Rows holding the structural headers, where found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeaderLayout {
    pub menu_row: Option<usize>,
    pub ai_row: Option<usize>,
    pub model_row: Option<usize>,
    pub function_row: Option<usize>,
}

impl HeaderLayout {
    /// Scan the first `scan_rows` rows for label cells. First match per role wins.
    pub fn detect(grid: &CellGrid, scan_rows: usize) -> Self {
        let mut layout = Self::default();
        for row in 0..grid.row_count().min(scan_rows) {
            for cell in grid.row(row) {
                let label = cell.trim().to_lowercase();
                if label.is_empty() {
                    continue;
                }
                let slot = if MENU_LABELS.contains(&label.as_str()) {
                    &mut layout.menu_row
                } else if AI_LABELS.contains(&label.as_str()) {
                    &mut layout.ai_row
                } else if MODEL_LABELS.contains(&label.as_str()) {
                    &mut layout.model_row
                } else if FUNCTION_LABELS.contains(&label.as_str()) {
                    &mut layout.function_row
                } else {
                    continue;
                };
                if slot.is_none() {
                    *slot = Some(row);
                }
            }
        }
        debug!(?layout, "Detected header rows");
        layout
    }

    pub fn header_rows(&self) -> impl Iterator<Item = usize> {
        [self.menu_row, self.ai_row, self.model_row, self.function_row]
            .into_iter()
            .flatten()
    }

    /// First row that may hold work, never earlier than `floor`.
    pub fn first_work_row(&self, floor: usize) -> usize {
        self.header_rows()
            .max()
            .map(|r| r + 1)
            .unwrap_or(0)
            .max(floor)
    }
}

/// Turns a raw grid into prompt groups.
pub trait GroupStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, grid: &CellGrid) -> Vec<PromptGroup>;
}

/// Role of a menu-row cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuRole {
    Prompt,
    Answer,
    Other,
    Empty,
}

impl MenuRole {
    fn of(text: &str) -> Self {
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            Self::Empty
        } else if ANSWER_MARKERS.iter().any(|m| lowered.contains(m)) {
            Self::Answer
        } else if PROMPT_MARKERS.iter().any(|m| lowered.contains(m)) {
            Self::Prompt
        } else {
            Self::Other
        }
    }
}

/// A group being assembled during the menu-row walk.
#[derive(Debug)]
struct OpenGroup {
    prompts: Vec<usize>,
    answers: Vec<usize>,
}

impl OpenGroup {
    fn new(column: usize) -> Self {
        Self {
            prompts: vec![column],
            answers: Vec::new(),
        }
    }

    fn extends_to(&self, column: usize) -> bool {
        self.answers.is_empty() && self.prompts.last().is_some_and(|&c| c + 1 == column)
    }
}

/// Label-matching heuristic over the menu and AI rows.
pub struct HeuristicStrategy {
    scan_rows: usize,
}

impl HeuristicStrategy {
    pub fn new(scan_rows: usize) -> Self {
        Self { scan_rows }
    }

    fn close(
        &self,
        grid: &CellGrid,
        ai_row: Option<usize>,
        open: OpenGroup,
        out: &mut Vec<PromptGroup>,
    ) {
        if open.answers.is_empty() {
            debug!(prompts = ?open.prompts, "Discarding prompt span without answers");
            return;
        }

        let ai_cell = |column: usize| ai_row.map(|r| grid.cell(r, column)).unwrap_or("");
        let first_prompt = open.prompts[0];
        let label = ai_cell(first_prompt);

        if is_multi_variant_label(label) {
            if open.answers.len() != VARIANT_ORDER.len() {
                warn!(
                    prompts = ?open.prompts,
                    answers = open.answers.len(),
                    "Three-variant group without exactly three answer columns, skipping"
                );
                return;
            }
            out.push(PromptGroup {
                prompt_columns: open.prompts,
                answer_columns: variant_answers(&open.answers),
                ai_type: VARIANT_ORDER[0],
                log_column: None,
                group_type: GroupType::MultiVariant,
                sequence_order: out.len(),
                dependencies: Vec::new(),
            });
            return;
        }

        let group_ai = AiType::from_label(label);
        let answer_columns: Vec<AnswerColumn> = open
            .answers
            .iter()
            .enumerate()
            .map(|(index, &column)| {
                let ai_type = AiType::from_label(ai_cell(column))
                    .or(group_ai)
                    .unwrap_or_else(|| {
                        let own = ai_cell(column);
                        if !own.trim().is_empty() || !label.trim().is_empty() {
                            warn!(column, label = %own, "Unknown AI label, using default");
                        }
                        AiType::default()
                    });
                AnswerColumn {
                    index,
                    column,
                    ai_type,
                }
            })
            .collect();

        out.push(PromptGroup {
            prompt_columns: open.prompts,
            ai_type: group_ai.unwrap_or(answer_columns[0].ai_type),
            answer_columns,
            log_column: None,
            group_type: GroupType::Single,
            sequence_order: out.len(),
            dependencies: Vec::new(),
        });
    }
}

impl GroupStrategy for HeuristicStrategy {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn resolve(&self, grid: &CellGrid) -> Vec<PromptGroup> {
        let layout = HeaderLayout::detect(grid, self.scan_rows);
        let Some(menu_row) = layout.menu_row else {
            debug!("No menu row found, no prompt groups");
            return Vec::new();
        };

        let mut groups = Vec::new();
        let mut open: Option<OpenGroup> = None;

        for (column, text) in grid.row(menu_row).iter().enumerate() {
            match MenuRole::of(text) {
                MenuRole::Prompt => {
                    if let Some(group) = open.as_mut()
                        && group.extends_to(column)
                    {
                        group.prompts.push(column);
                        continue;
                    }
                    if let Some(done) = open.take() {
                        self.close(grid, layout.ai_row, done, &mut groups);
                    }
                    open = Some(OpenGroup::new(column));
                }
                MenuRole::Answer => {
                    if let Some(group) = open.as_mut() {
                        group.answers.push(column);
                    }
                }
                MenuRole::Other => {
                    if open.as_ref().is_some_and(|g| !g.answers.is_empty())
                        && let Some(done) = open.take()
                    {
                        self.close(grid, layout.ai_row, done, &mut groups);
                    }
                }
                MenuRole::Empty => {}
            }
        }
        if let Some(done) = open.take() {
            self.close(grid, layout.ai_row, done, &mut groups);
        }

        groups
    }
}

/// Upstream-supplied descriptors, mapped 1:1.
pub struct ExplicitStrategy {
    descriptors: Vec<GroupDescriptor>,
}

impl ExplicitStrategy {
    pub fn new(descriptors: Vec<GroupDescriptor>) -> Self {
        Self { descriptors }
    }
}

impl GroupStrategy for ExplicitStrategy {
    fn name(&self) -> &str {
        "explicit"
    }

    fn resolve(&self, _grid: &CellGrid) -> Vec<PromptGroup> {
        self.descriptors
            .iter()
            .enumerate()
            .filter_map(|(i, descriptor)| match descriptor.to_group(i) {
                Ok(group) => Some(group),
                Err(e) => {
                    warn!(descriptor = i, error = %e, "Skipping malformed group descriptor");
                    None
                }
            })
            .collect()
    }
}

/// Everything the task generator needs to know about a sheet.
#[derive(Debug, Clone, Serialize)]
pub struct SheetAnalysis {
    pub layout: HeaderLayout,
    pub directives: DirectiveSet,
    pub groups: Vec<PromptGroup>,
    pub work_rows: Vec<usize>,
}

/// Runs header detection, directive scanning and group resolution.
pub struct Analyzer {
    config: GeneratorConfig,
}

impl Analyzer {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Analyze a data source, preferring its descriptors over the heuristic.
    pub fn analyze(&self, source: &DataSource) -> SheetAnalysis {
        match source.groups.as_ref().filter(|d| !d.is_empty()) {
            Some(descriptors) => {
                self.analyze_with(source.grid(), &ExplicitStrategy::new(descriptors.clone()))
            }
            None => self.analyze_with(
                source.grid(),
                &HeuristicStrategy::new(self.config.header_scan_rows),
            ),
        }
    }

    pub fn analyze_with(&self, grid: &CellGrid, strategy: &dyn GroupStrategy) -> SheetAnalysis {
        let layout = HeaderLayout::detect(grid, self.config.header_scan_rows);
        let directives = DirectiveSet::scan(
            grid,
            self.config.row_directive_column,
            self.config.header_scan_rows,
        );
        let groups = strategy.resolve(grid);

        let start = layout.first_work_row(self.config.min_work_row);
        let work_rows: Vec<usize> = (start..grid.row_count())
            .filter(|&row| !grid.is_row_empty(row))
            .collect();

        info!(
            strategy = strategy.name(),
            groups = groups.len(),
            work_rows = work_rows.len(),
            first_work_row = start,
            "Sheet analyzed"
        );

        SheetAnalysis {
            layout,
            directives,
            groups,
            work_rows,
        }
    }
}

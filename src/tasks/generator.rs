//! Task generation: work rows × prompt groups.
//!
//! Output order is row-major, then group left-to-right, then variant order.
//! The batch scheduler relies on that order for reproducible batching.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::GridError;
use crate::grid::{AnswerColumn, CellGrid, GroupType, PromptGroup, SheetAnalysis, is_blank};
use crate::tasks::answered::{is_answered, is_normal_or_blank};
use crate::tasks::model::Task;

/// Builds tasks from an analyzed sheet.
pub struct TaskGenerator<'a> {
    grid: &'a CellGrid,
    analysis: &'a SheetAnalysis,
}

impl<'a> TaskGenerator<'a> {
    pub fn new(grid: &'a CellGrid, analysis: &'a SheetAnalysis) -> Self {
        Self { grid, analysis }
    }

    pub fn group_count(&self) -> usize {
        self.analysis.groups.len()
    }

    /// Tasks for every resolved group.
    pub fn generate_all(&self) -> Vec<Task> {
        let tasks = self.generate(None);
        info!(
            tasks = tasks.len(),
            groups = self.group_count(),
            "Generated tasks for the whole sheet"
        );
        tasks
    }

    /// Tasks for one group only, to materialize a sheet one group at a time.
    pub fn generate_for_group(&self, group_index: usize) -> Result<Vec<Task>, GridError> {
        if group_index >= self.group_count() {
            return Err(GridError::GroupOutOfRange {
                index: group_index,
                count: self.group_count(),
            });
        }
        let tasks = self.generate(Some(group_index));
        info!(group = group_index, tasks = tasks.len(), "Generated tasks for group");
        Ok(tasks)
    }

    fn generate(&self, only_group: Option<usize>) -> Vec<Task> {
        let directives = &self.analysis.directives;
        let mut tasks = Vec::new();

        for &row in &self.analysis.work_rows {
            if !directives.row_in_range(row) {
                continue;
            }

            for (group_index, group) in self.analysis.groups.iter().enumerate() {
                if only_group.is_some_and(|g| g != group_index) {
                    continue;
                }
                let (start, end) = group.span();
                if !directives.span_in_range(start, end) {
                    debug!(row, group = group_index, "Group excluded by column directive");
                    continue;
                }
                if !self.has_prompt(row, group) {
                    continue;
                }

                let group_id = Uuid::new_v4();
                for answer in &group.answer_columns {
                    if is_answered(self.grid.cell(row, answer.column)) {
                        continue;
                    }
                    tasks.push(self.build_task(row, group_index, group, answer, group_id));
                }
            }
        }

        tasks
    }

    fn has_prompt(&self, row: usize, group: &PromptGroup) -> bool {
        group
            .prompt_columns
            .iter()
            .any(|&c| !is_blank(self.grid.cell(row, c)))
    }

    fn build_task(
        &self,
        row: usize,
        group_index: usize,
        group: &PromptGroup,
        answer: &AnswerColumn,
        group_id: Uuid,
    ) -> Task {
        let layout = &self.analysis.layout;
        let model = self
            .header_value(layout.model_row, group, answer.column)
            .unwrap_or_else(|| answer.ai_type.default_model().to_string());
        let function = self
            .header_value(layout.function_row, group, answer.column)
            .unwrap_or_else(|| answer.ai_type.default_function().to_string());

        let (group_id, group_position) = match group.group_type {
            GroupType::MultiVariant => (group_id, Some(answer.index)),
            GroupType::Single => (Uuid::new_v4(), None),
        };

        Task {
            id: Uuid::new_v4(),
            row,
            column: answer.column,
            prompt_columns: group.prompt_columns.clone(),
            prompts: group
                .prompt_columns
                .iter()
                .map(|&c| self.grid.cell(row, c).to_string())
                .collect(),
            ai_type: answer.ai_type,
            model,
            function,
            log_columns: vec![group.resolved_log_column()],
            group_index,
            group_id,
            group_type: group.group_type,
            group_position,
            sequence_order: group.sequence_order,
            dependencies: group.dependencies.clone(),
            created_at: Utc::now(),
        }
    }

    /// Model/function row value at the answer column, falling back to the
    /// group's first prompt column. `None` means "use the AI default".
    fn header_value(
        &self,
        header_row: Option<usize>,
        group: &PromptGroup,
        answer_column: usize,
    ) -> Option<String> {
        let row = header_row?;
        [answer_column, group.first_prompt_column()]
            .into_iter()
            .map(|c| self.grid.cell(row, c).trim())
            .find(|v| !is_normal_or_blank(v))
            .map(str::to_string)
    }
}

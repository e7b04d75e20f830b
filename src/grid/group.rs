//! Prompt groups and upstream group descriptors.

use serde::{Deserialize, Serialize};

use crate::error::GridError;
use crate::grid::letter_to_column;
use crate::tasks::AiType;

/// Labels that mark a group answered by the three fixed variants.
const MULTI_VARIANT_MARKERS: &[&str] = &["3種類", "3-variant", "3 variants"];

/// Variant order for multi-variant groups: position 0, 1, 2.
pub const VARIANT_ORDER: [AiType; 3] = [AiType::ChatGpt, AiType::Claude, AiType::Gemini];

/// True if an AI label names the three-variant set.
pub fn is_multi_variant_label(label: &str) -> bool {
    let lowered = label.to_lowercase();
    MULTI_VARIANT_MARKERS.iter().any(|m| lowered.contains(m))
}

/// How a group's answers are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    Single,
    MultiVariant,
}

/// One answer column of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerColumn {
    /// Position within the group (variant position for multi-variant groups).
    pub index: usize,
    pub column: usize,
    pub ai_type: AiType,
}

/// A contiguous prompt span paired with its answer columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptGroup {
    pub prompt_columns: Vec<usize>,
    pub answer_columns: Vec<AnswerColumn>,
    pub ai_type: AiType,
    /// Explicit log column, if the source named one.
    pub log_column: Option<usize>,
    pub group_type: GroupType,
    pub sequence_order: usize,
    pub dependencies: Vec<usize>,
}

impl PromptGroup {
    pub fn first_prompt_column(&self) -> usize {
        self.prompt_columns.iter().copied().min().unwrap_or(0)
    }

    pub fn last_answer_column(&self) -> usize {
        self.answer_columns
            .iter()
            .map(|a| a.column)
            .max()
            .unwrap_or_else(|| self.first_prompt_column())
    }

    /// Column span used for column-directive filtering.
    pub fn span(&self) -> (usize, usize) {
        let start = self.first_prompt_column();
        (start, self.last_answer_column().max(start))
    }

    /// Explicit log column, or the column left of the prompt span (clamped at 0).
    pub fn resolved_log_column(&self) -> usize {
        self.log_column
            .unwrap_or_else(|| self.first_prompt_column().saturating_sub(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.prompt_columns.is_empty() {
            return Err("no prompt columns".into());
        }
        if !is_contiguous(&self.prompt_columns) {
            return Err(format!(
                "prompt columns {:?} are not contiguous",
                self.prompt_columns
            ));
        }
        if self.answer_columns.is_empty() {
            return Err("no answer columns".into());
        }
        if self.group_type == GroupType::MultiVariant {
            if self.answer_columns.len() != VARIANT_ORDER.len() {
                return Err(format!(
                    "multi-variant group needs {} answer columns, found {}",
                    VARIANT_ORDER.len(),
                    self.answer_columns.len()
                ));
            }
            let ordered = self
                .answer_columns
                .iter()
                .enumerate()
                .all(|(i, a)| a.index == i && a.ai_type == VARIANT_ORDER[i]);
            if !ordered {
                return Err("multi-variant answers are not in variant order".into());
            }
        }
        Ok(())
    }
}

fn is_contiguous(columns: &[usize]) -> bool {
    columns.windows(2).all(|w| w[1] == w[0] + 1)
}

/// Assign the fixed variant AI types to three answer columns.
pub fn variant_answers(columns: &[usize]) -> Vec<AnswerColumn> {
    columns
        .iter()
        .zip(VARIANT_ORDER)
        .enumerate()
        .map(|(index, (&column, ai_type))| AnswerColumn {
            index,
            column,
            ai_type,
        })
        .collect()
}

/// Column given either as a zero-based index or a letter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Letter(String),
}

impl ColumnRef {
    pub fn resolve(&self) -> Result<usize, GridError> {
        match self {
            Self::Index(i) => Ok(*i),
            Self::Letter(s) => {
                letter_to_column(s).ok_or_else(|| GridError::InvalidColumn(s.clone()))
            }
        }
    }
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for ColumnRef {
    fn from(letter: &str) -> Self {
        Self::Letter(letter.to_string())
    }
}

/// One answer column as supplied upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerDescriptor {
    Column(ColumnRef),
    Detailed {
        column: ColumnRef,
        #[serde(default)]
        ai_type: Option<String>,
    },
}

impl AnswerDescriptor {
    fn column(&self) -> &ColumnRef {
        match self {
            Self::Column(c) => c,
            Self::Detailed { column, .. } => column,
        }
    }

    fn ai_label(&self) -> Option<&str> {
        match self {
            Self::Column(_) => None,
            Self::Detailed { ai_type, .. } => ai_type.as_deref(),
        }
    }
}

/// Ready-made group description supplied by the data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    #[serde(default)]
    pub prompt_columns: Option<Vec<ColumnRef>>,
    #[serde(default)]
    pub answer_columns: Option<Vec<AnswerDescriptor>>,
    #[serde(default)]
    pub ai_type: Option<String>,
    #[serde(default)]
    pub log_column: Option<ColumnRef>,
    #[serde(default)]
    pub group_type: Option<GroupType>,
    #[serde(default)]
    pub sequence_order: Option<usize>,
    #[serde(default)]
    pub dependencies: Vec<usize>,
}

impl GroupDescriptor {
    /// Map the descriptor 1:1 into a prompt group.
    pub fn to_group(&self, position: usize) -> Result<PromptGroup, GridError> {
        let malformed = |reason: String| GridError::MalformedDescriptor {
            index: position,
            reason,
        };

        let prompt_refs = self
            .prompt_columns
            .as_ref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| malformed("missing prompt_columns".into()))?;
        let answer_refs = self
            .answer_columns
            .as_ref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| malformed("missing answer_columns".into()))?;

        let mut prompt_columns = prompt_refs
            .iter()
            .map(ColumnRef::resolve)
            .collect::<Result<Vec<_>, _>>()?;
        prompt_columns.sort_unstable();
        prompt_columns.dedup();

        let label = self.ai_type.as_deref().unwrap_or("");
        let group_type = self.group_type.unwrap_or(if is_multi_variant_label(label) {
            GroupType::MultiVariant
        } else {
            GroupType::Single
        });

        let answer_cols = answer_refs
            .iter()
            .map(|a| a.column().resolve())
            .collect::<Result<Vec<_>, _>>()?;

        if group_type == GroupType::MultiVariant && answer_cols.len() != VARIANT_ORDER.len() {
            return Err(malformed(format!(
                "multi-variant group needs {} answer columns, found {}",
                VARIANT_ORDER.len(),
                answer_cols.len()
            )));
        }

        let group_ai = AiType::from_label(label).unwrap_or_default();
        let answer_columns = match group_type {
            GroupType::MultiVariant => variant_answers(&answer_cols),
            GroupType::Single => answer_refs
                .iter()
                .zip(&answer_cols)
                .enumerate()
                .map(|(index, (descriptor, &column))| AnswerColumn {
                    index,
                    column,
                    ai_type: descriptor
                        .ai_label()
                        .and_then(AiType::from_label)
                        .unwrap_or(group_ai),
                })
                .collect(),
        };

        let log_column = self.log_column.as_ref().map(ColumnRef::resolve).transpose()?;

        let group = PromptGroup {
            prompt_columns,
            answer_columns,
            ai_type: group_ai,
            log_column,
            group_type,
            sequence_order: self.sequence_order.unwrap_or(position),
            dependencies: self.dependencies.clone(),
        };

        group.validate().map_err(malformed)?;
        Ok(group)
    }
}

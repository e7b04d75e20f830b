//! The "already answered" predicate and the sentinel markers it ignores.

/// Written by another runner when a cell has been handed off as complete.
pub const PROCESSING_COMPLETE: &str = "処理完了";

/// Prefix of an exclusive lock held by a runner that is working on the cell.
pub const LOCK_PREFIX: &str = "現在操作中です";

/// Substrings that mark a previous attempt as failed.
pub const ERROR_MARKERS: &[&str] = &["エラー", "ERROR:", "処理失敗", "Timed out"];

/// Value of the model/function rows meaning "use the default".
pub const NORMAL_SENTINELS: &[&str] = &["normal", "通常"];

/// True if `value` holds a real answer, so no task should be produced.
///
/// Blank cells, the processing-complete sentinel, lock markers and error
/// markers all still need work.
pub fn is_answered(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == PROCESSING_COMPLETE || trimmed.starts_with(LOCK_PREFIX) {
        return false;
    }
    !ERROR_MARKERS.iter().any(|m| trimmed.contains(m))
}

/// True for a model/function cell that defers to the fallback chain.
pub fn is_normal_or_blank(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || NORMAL_SENTINELS
            .iter()
            .any(|s| trimmed.eq_ignore_ascii_case(s))
}

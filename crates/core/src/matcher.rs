//! Fuzzy task matching by name hint
//!
//! Conservative on purpose: a candidate must share a substring with the hint
//! and clear a character-overlap threshold, otherwise the caller asks the user.

use std::collections::HashSet;

use crate::types::Task;

/// A match must score strictly above this (tunable)
pub const ACCEPT_THRESHOLD: f64 = 0.3;

/// How many candidates to offer after a no-match
pub const SUGGESTION_LIMIT: usize = 5;

/// Words that signal completion rather than name the task
pub const COMPLETE_FILLERS: &[&str] = &["完了", "やった", "できた", "済んだ", "終わった"];

pub const DELETE_FILLERS: &[&str] = &["削除して", "削除", "消して", "消去", "delete", "remove"];

pub const EDIT_FILLERS: &[&str] = &["編集して", "編集", "変更して", "変更", "修正", "更新", "edit", "update"];

/// Lower-case the hint and strip intent filler words
pub fn normalize_hint(hint: &str, fillers: &[&str]) -> String {
    let mut h = hint.to_lowercase();
    for filler in fillers {
        h = h.replace(filler, "");
    }
    h.trim().to_string()
}

/// Jaccard similarity over character sets
pub fn char_jaccard(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: HashSet<char> = a.chars().collect();
    let sb: HashSet<char> = b.chars().collect();
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    inter as f64 / union as f64
}

/// Score of every eligible candidate, in candidate order
fn eligible_scores<'t>(hint: &str, candidates: impl Iterator<Item = &'t Task>) -> Vec<(usize, f64)> {
    if hint.is_empty() {
        return Vec::new();
    }
    candidates
        .enumerate()
        .filter_map(|(i, task)| {
            let name = task.name.to_lowercase();
            if name.is_empty() {
                return None;
            }
            (name.contains(hint) || hint.contains(name.as_str()))
                .then(|| (i, char_jaccard(hint, &name)))
        })
        .collect()
}

/// Index (into `candidates`) of the best match, if any clears the threshold
pub fn best_match<'t, I>(hint: &str, candidates: I, fillers: &[&str]) -> Option<usize>
where
    I: IntoIterator<Item = &'t Task>,
{
    let hint = normalize_hint(hint, fillers);
    let mut best: Option<(usize, f64)> = None;

    for (i, score) in eligible_scores(&hint, candidates.into_iter()) {
        let best_score = best.map_or(0.0, |(_, s)| s);
        if score > best_score && score > ACCEPT_THRESHOLD {
            best = Some((i, score));
        }
    }

    best.map(|(i, _)| i)
}

/// Candidates to present after a no-match: eligible ones by descending score,
/// or the head of the list when nothing was eligible
pub fn suggestions<'t, I>(hint: &str, candidates: I, fillers: &[&str], limit: usize) -> Vec<usize>
where
    I: IntoIterator<Item = &'t Task>,
{
    let hint = normalize_hint(hint, fillers);
    let candidates: Vec<&Task> = candidates.into_iter().collect();

    let mut scored = eligible_scores(&hint, candidates.iter().copied());
    if scored.is_empty() {
        return (0..candidates.len()).take(limit).collect();
    }

    // stable sort keeps listing order among equal scores
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(limit).map(|(i, _)| i).collect()
}

// ============================================================================
// Tests
// ============================================================================

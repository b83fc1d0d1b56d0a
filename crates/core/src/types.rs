//! Domain models for the task engine
//!
//! This module contains the core types used throughout the engine, including:
//! - Task records and their status
//! - Intent actions and payloads
//! - Status filters and positional listings

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp format used for `created_at` on disk and in messages
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format used for due dates on disk and in messages
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Tasks
// ============================================================================

/// Task status as stored in the `status` column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Todo,
    Done,
    /// Anything else found on disk. Kept verbatim so a rewrite does not lose it.
    Other(String),
}

impl TaskStatus {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "todo" => TaskStatus::Todo,
            "done" => TaskStatus::Done,
            other => TaskStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Done => "done",
            TaskStatus::Other(s) => s,
        }
    }

    /// Label shown to the user
    pub fn label(&self) -> &str {
        match self {
            TaskStatus::Todo => "未完了",
            TaskStatus::Done => "完了",
            TaskStatus::Other(s) if s.is_empty() => "unknown",
            TaskStatus::Other(s) => s,
        }
    }
}

/// A single task record
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    pub due_date: Option<NaiveDate>,
    /// Raw `due_date` cell that did not parse. Written back unchanged until
    /// the due date is set again.
    pub unreadable_due: Option<String>,
    pub status: TaskStatus,
    pub created_at: NaiveDateTime,
    pub calendar_event_id: Option<String>,
}

impl Task {
    /// New `todo` task stamped with the current local time (second precision)
    pub fn new(name: impl Into<String>, due_date: Option<NaiveDate>) -> Self {
        Self {
            name: name.into(),
            due_date,
            unreadable_due: None,
            status: TaskStatus::Todo,
            created_at: now_timestamp(),
            calendar_event_id: None,
        }
    }

    pub fn is_todo(&self) -> bool {
        self.status == TaskStatus::Todo
    }

    pub fn due_label(&self) -> Option<String> {
        self.due_date.map(format_date)
    }
}

/// Current local time truncated to whole seconds, matching the on-disk format
pub fn now_timestamp() -> NaiveDateTime {
    let now = Local::now().naive_local();
    NaiveDateTime::parse_from_str(&now.format(TIMESTAMP_FORMAT).to_string(), TIMESTAMP_FORMAT)
        .unwrap_or(now)
}

/// Format a NaiveDate as YYYY-MM-DD
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a strict YYYY-MM-DD date
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

// ============================================================================
// Intents
// ============================================================================

/// Actions the classifier can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Add,
    Edit,
    Delete,
    Complete,
    Show,
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "ADD",
            Action::Edit => "EDIT",
            Action::Delete => "DELETE",
            Action::Complete => "COMPLETE",
            Action::Show => "SHOW",
            Action::Unknown => "UNKNOWN",
        }
    }

    /// Lenient mapping from whatever the LLM wrote
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "add" | "create" | "new" | "追加" => Action::Add,
            "edit" | "update" | "modify" | "change" | "編集" | "変更" => Action::Edit,
            "delete" | "remove" | "削除" => Action::Delete,
            "complete" | "done" | "finish" | "完了" => Action::Complete,
            "show" | "list" | "view" | "表示" | "一覧" => Action::Show,
            _ => Action::Unknown,
        }
    }

    /// Whether the action operates on an existing task
    pub fn needs_target(&self) -> bool {
        matches!(self, Action::Edit | Action::Delete | Action::Complete)
    }
}

/// Where an intent came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Llm,
    Fallback,
    /// Entered through the numbered menu; slots are already exact
    Menu,
}

/// Structured interpretation of one utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    pub action: Action,
    pub task_name: String,
    pub due_date: Option<NaiveDate>,
    /// 1-based display index
    pub task_index: Option<usize>,
    pub confidence: f32,
    pub source: IntentSource,
}

impl Intent {
    pub fn unknown(source: IntentSource) -> Self {
        Self {
            action: Action::Unknown,
            task_name: String::new(),
            due_date: None,
            task_index: None,
            confidence: 0.0,
            source,
        }
    }

    /// Intent built from explicit menu input
    pub fn menu(action: Action) -> Self {
        Self {
            action,
            confidence: 1.0,
            ..Self::unknown(IntentSource::Menu)
        }
    }
}

// ============================================================================
// Listings
// ============================================================================

/// Status filter applied before numbering a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListFilter {
    #[default]
    All,
    Todo,
    Done,
}

impl ListFilter {
    pub fn admits(&self, task: &Task) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Todo => task.status == TaskStatus::Todo,
            ListFilter::Done => task.status == TaskStatus::Done,
        }
    }

    /// Filter implied by the wording of a SHOW request
    pub fn from_text(text: &str) -> Self {
        let t = text.to_lowercase();
        // 未完了 contains 完了, so it is checked first
        if t.contains("未完了") || t.contains("todo") || t.contains("残り") {
            ListFilter::Todo
        } else if t.contains("完了済") || t.contains("終わった") || t.contains("done") {
            ListFilter::Done
        } else {
            ListFilter::All
        }
    }
}

/// A numbered view over the store. Display index `n` (1-based) maps to
/// storage position `positions[n - 1]`; valid only until the next mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    positions: Vec<usize>,
}

impl Listing {
    pub fn new(tasks: &[Task], filter: ListFilter) -> Self {
        let positions = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| filter.admits(t))
            .map(|(i, _)| i)
            .collect();
        Self { positions }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Storage position for a 1-based display index
    pub fn position(&self, display_index: usize) -> Option<usize> {
        display_index
            .checked_sub(1)
            .and_then(|i| self.positions.get(i).copied())
    }

    /// Storage positions in display order
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Tasks in display order
    pub fn tasks<'a>(&'a self, tasks: &'a [Task]) -> impl Iterator<Item = &'a Task> + 'a {
        self.positions.iter().filter_map(move |&p| tasks.get(p))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, status: TaskStatus) -> Task {
        Task {
            status,
            ..Task::new(name, None)
        }
    }

    #[test]
    fn test_status_parse_roundtrip() {
        assert_eq!(TaskStatus::parse("todo"), TaskStatus::Todo);
        assert_eq!(TaskStatus::parse("done"), TaskStatus::Done);
        assert_eq!(TaskStatus::parse(""), TaskStatus::Other(String::new()));
        assert_eq!(TaskStatus::parse("archived").as_str(), "archived");
    }

    #[test]
    fn test_new_task_is_todo() {
        let t = Task::new("レポートを書く", None);
        assert!(t.is_todo());
        assert!(t.calendar_event_id.is_none());
    }

    #[test]
    fn test_action_from_label() {
        assert_eq!(Action::from_label("add"), Action::Add);
        assert_eq!(Action::from_label(" DELETE "), Action::Delete);
        assert_eq!(Action::from_label("完了"), Action::Complete);
        assert_eq!(Action::from_label("dance"), Action::Unknown);
    }

    #[test]
    fn test_listing_maps_filtered_index_to_storage() {
        let tasks = vec![
            task("a", TaskStatus::Done),
            task("b", TaskStatus::Todo),
            task("c", TaskStatus::Other(String::new())),
            task("d", TaskStatus::Todo),
        ];

        let todo = Listing::new(&tasks, ListFilter::Todo);
        assert_eq!(todo.len(), 2);
        assert_eq!(todo.position(1), Some(1));
        assert_eq!(todo.position(2), Some(3));
        assert_eq!(todo.position(0), None);
        assert_eq!(todo.position(3), None);

        let done = Listing::new(&tasks, ListFilter::Done);
        assert_eq!(done.positions(), &[0]);

        let all = Listing::new(&tasks, ListFilter::All);
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_malformed_status_outside_both_filters() {
        let t = task("x", TaskStatus::Other("???".to_string()));
        assert!(!ListFilter::Todo.admits(&t));
        assert!(!ListFilter::Done.admits(&t));
        assert!(ListFilter::All.admits(&t));
    }

    #[test]
    fn test_filter_from_text() {
        assert_eq!(ListFilter::from_text("未完了のタスクを表示"), ListFilter::Todo);
        assert_eq!(ListFilter::from_text("完了済みのタスク一覧"), ListFilter::Done);
        assert_eq!(ListFilter::from_text("タスク一覧"), ListFilter::All);
    }
}

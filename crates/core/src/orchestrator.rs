//! Conversation orchestrator
//!
//! One user turn is one pass through
//! `Idle -> Classifying -> Resolving -> Mutating -> Syncing -> Responding -> Idle`.
//! Resolving runs only for actions that target an existing task and Syncing
//! only when the calendar is involved. Nothing but the task store carries over
//! between turns.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::calendar::{AddSync, CalendarEvent, CalendarSync, DeleteSync, EditSync, UPCOMING_DAYS};
use crate::dates::DateResolver;
use crate::history::{ConversationLog, HistoryEntry};
use crate::intent::{IntentClassifier, EDIT_KEYWORDS};
use crate::llm::Completion;
use crate::error::StoreError;
use crate::matcher::{self, COMPLETE_FILLERS, DELETE_FILLERS, EDIT_FILLERS, SUGGESTION_LIMIT};
use crate::nudge::{NudgePattern, Nudger};
use crate::persona::Persona;
use crate::store::TaskStore;
use crate::types::{format_date, Action, Intent, IntentSource, ListFilter, Listing, Task, TaskStatus};

/// Calendar wording that is not part of a task name
const CALENDAR_PHRASES: &[&str] = &[
    "をカレンダーに追加して",
    "をカレンダーに追加",
    "をカレンダーに登録",
    "をカレンダーに入れて",
    "カレンダーに追加",
    "カレンダーに登録",
    "カレンダーに入れて",
    "カレンダーに",
    "をスケジュールに",
    "スケジュールに",
    "を予定に",
    "予定に",
    "を入れておいて",
    "を追加して",
    "を追加",
];

/// Generic verbs trailing a task name ("サッカーする" -> "サッカー")
const ACTION_SUFFIXES: &[&str] = &["を行う", "を実行", "する", "やる"];

/// Particles left dangling once a phrase is cut out of a name
const LEADING_PARTICLES: &[char] = &['の', 'に', 'を', '、'];
const TRAILING_PARTICLES: &[char] = &['を', 'に', 'で', '、'];

// ============================================================================
// Turn bookkeeping
// ============================================================================

/// Orchestrator states, in the order a full turn visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Classifying,
    Resolving,
    Mutating,
    Syncing,
    Responding,
}

/// Result of one turn
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message: String,
    pub action: Action,
    /// States visited, starting and ending with `Idle`
    pub states: Vec<TurnState>,
    /// Backlog nudge prepended to `message`; the caller may ask for feedback
    pub nudge: Option<NudgePattern>,
}

struct Turn {
    states: Vec<TurnState>,
}

impl Turn {
    fn start() -> Self {
        Self {
            states: vec![TurnState::Idle],
        }
    }

    fn enter(&mut self, state: TurnState) {
        debug!(?state, "turn state");
        self.states.push(state);
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug)]
enum Outcome {
    Added {
        task: Task,
        sync: AddSync,
    },
    MissingName,
    DueChanged {
        task: Task,
        previous: Option<NaiveDate>,
        sync: EditSync,
    },
    Renamed {
        task: Task,
        previous: String,
        sync: EditSync,
    },
    EditUnspecified {
        task: Task,
    },
    Completed {
        task: Task,
    },
    Deleted {
        task: Task,
        sync: DeleteSync,
    },
    Listed {
        filter: ListFilter,
        tasks: Vec<Task>,
        /// Present when the request mentioned the calendar
        events: Option<Result<Vec<CalendarEvent>, String>>,
    },
    NothingToTarget {
        action: Action,
    },
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    NoMatch {
        action: Action,
        /// (display index, task)
        candidates: Vec<(usize, Task)>,
    },
    NotUnderstood,
}

impl Outcome {
    /// Task name a restyled confirmation must keep; `None` when the outcome
    /// is not a confirmation
    fn confirmed_name(&self) -> Option<&str> {
        match self {
            Outcome::Added { task, .. }
            | Outcome::DueChanged { task, .. }
            | Outcome::Renamed { task, .. }
            | Outcome::Completed { task }
            | Outcome::Deleted { task, .. } => Some(&task.name),
            _ => None,
        }
    }
}

enum Resolution {
    /// Storage position of the target
    Position(usize),
    Unresolved(Outcome),
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs user turns against the task store
pub struct Orchestrator {
    store: TaskStore,
    classifier: IntentClassifier,
    calendar: CalendarSync,
    persona: Option<(Persona, Arc<dyn Completion>)>,
    history: Option<ConversationLog>,
    nudger: Option<Nudger>,
    add_dates: DateResolver,
    today: Option<NaiveDate>,
}

impl Orchestrator {
    pub fn new(store: TaskStore, classifier: IntentClassifier, calendar: CalendarSync) -> Self {
        Self {
            store,
            classifier,
            calendar,
            persona: None,
            history: None,
            nudger: None,
            add_dates: DateResolver::extended(),
            today: None,
        }
    }

    /// Restyle confirmations through `llm`
    pub fn with_persona(mut self, persona: Persona, llm: Arc<dyn Completion>) -> Self {
        self.persona = Some((persona, llm));
        self
    }

    pub fn with_history(mut self, log: ConversationLog) -> Self {
        self.history = Some(log);
        self
    }

    /// Open task-check replies with a nudge when the backlog is long
    pub fn with_nudger(mut self, nudger: Nudger) -> Self {
        self.nudger = Some(nudger);
        self
    }

    /// Pin the reference day for relative dates
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    pub fn nudger(&self) -> Option<&Nudger> {
        self.nudger.as_ref()
    }

    /// Store the user's verdict on a nudge
    pub fn record_nudge(&mut self, pattern: NudgePattern, effective: bool) -> Result<(), StoreError> {
        match &mut self.nudger {
            Some(nudger) => nudger.record(pattern, effective),
            None => Ok(()),
        }
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Process one natural-language utterance
    pub fn handle(&mut self, text: &str) -> Reply {
        let started = Instant::now();
        let mut turn = Turn::start();

        turn.enter(TurnState::Classifying);
        let intent = self.classifier.classify_on(text, self.today());

        self.run(&intent, text, turn, started)
    }

    /// Run an intent whose slots are already known (numbered menu)
    pub fn execute(&mut self, intent: &Intent, text: &str) -> Reply {
        self.run(intent, text, Turn::start(), Instant::now())
    }

    fn run(&self, intent: &Intent, text: &str, mut turn: Turn, started: Instant) -> Reply {
        // Counted before the turn mutates anything
        let nudge = self.nudge_for(text);
        let outcome = self.dispatch(intent, text, &mut turn);

        turn.enter(TurnState::Responding);
        let mut message = match outcome {
            Ok(outcome) => self.respond(&outcome),
            Err(e) => {
                warn!(error = %format!("{:#}", e), action = intent.action.as_str(), "turn failed");
                format!("⚠️ エラーが発生しました: {:#}", e)
            }
        };
        if let Some((_, prefix)) = &nudge {
            message = format!("{}\n\n{}", prefix, message);
        }
        turn.enter(TurnState::Idle);

        let reply = Reply {
            message,
            action: intent.action,
            states: turn.states,
            nudge: nudge.map(|(pattern, _)| pattern),
        };
        self.record(text, &reply, started);
        reply
    }

    fn nudge_for(&self, text: &str) -> Option<(NudgePattern, String)> {
        let nudger = self.nudger.as_ref()?;
        if !Nudger::is_task_check(text) {
            return None;
        }
        let todo_count = match self.store.load() {
            Ok(tasks) => tasks.iter().filter(|t| t.is_todo()).count(),
            Err(e) => {
                warn!(error = %e, "could not count open tasks for a nudge");
                return None;
            }
        };
        nudger
            .choose(text, todo_count)
            .map(|pattern| (pattern, Nudger::message(pattern, todo_count)))
    }

    fn dispatch(&self, intent: &Intent, text: &str, turn: &mut Turn) -> Result<Outcome> {
        match intent.action {
            Action::Add => self.add(intent, text, turn),
            Action::Show => self.show(text),
            Action::Complete | Action::Edit | Action::Delete => {
                turn.enter(TurnState::Resolving);
                let tasks = self.store.load()?;
                let position = match self.resolve(intent, text, &tasks) {
                    Resolution::Position(p) => p,
                    Resolution::Unresolved(outcome) => return Ok(outcome),
                };
                debug!(position, action = intent.action.as_str(), "target resolved");

                match intent.action {
                    Action::Complete => self.complete(tasks, position, turn),
                    Action::Edit => self.edit(intent, tasks, position, turn),
                    _ => self.delete(tasks, position, turn),
                }
            }
            Action::Unknown => Ok(Outcome::NotUnderstood),
        }
    }

    // ------------------------------------------------------------------------
    // Resolving
    // ------------------------------------------------------------------------

    fn resolve(&self, intent: &Intent, text: &str, tasks: &[Task]) -> Resolution {
        let filter = match intent.action {
            Action::Complete => ListFilter::Todo,
            _ => ListFilter::All,
        };
        let listing = Listing::new(tasks, filter);

        if listing.is_empty() {
            return Resolution::Unresolved(Outcome::NothingToTarget {
                action: intent.action,
            });
        }

        if let Some(index) = intent.task_index {
            return match listing.position(index) {
                Some(position) => Resolution::Position(position),
                None => Resolution::Unresolved(Outcome::IndexOutOfRange {
                    index,
                    len: listing.len(),
                }),
            };
        }

        let hint = match intent.task_name.trim() {
            "" => text,
            name => name,
        };
        let fillers = match intent.action {
            Action::Complete => COMPLETE_FILLERS,
            Action::Delete => DELETE_FILLERS,
            _ => EDIT_FILLERS,
        };

        if let Some(position) = matcher::best_match(hint, listing.tasks(tasks), fillers)
            .and_then(|i| listing.position(i + 1))
        {
            return Resolution::Position(position);
        }

        let candidates = matcher::suggestions(hint, listing.tasks(tasks), fillers, SUGGESTION_LIMIT)
            .into_iter()
            .filter_map(|i| {
                listing
                    .position(i + 1)
                    .and_then(|p| tasks.get(p))
                    .map(|t| (i + 1, t.clone()))
            })
            .collect();

        Resolution::Unresolved(Outcome::NoMatch {
            action: intent.action,
            candidates,
        })
    }

    // ------------------------------------------------------------------------
    // Mutating + Syncing
    // ------------------------------------------------------------------------

    fn add(&self, intent: &Intent, text: &str, turn: &mut Turn) -> Result<Outcome> {
        // Menu input is stored exactly as typed
        let name = match intent.source {
            IntentSource::Menu => intent.task_name.trim().to_string(),
            IntentSource::Llm | IntentSource::Fallback => {
                tidy_task_name(&intent.task_name, &self.add_dates)
            }
        };
        if name.is_empty() {
            return Ok(Outcome::MissingName);
        }

        // The keyword fallback only knows the short date table
        let today = self.today();
        let due_date = match intent.source {
            IntentSource::Menu => intent.due_date,
            IntentSource::Fallback => self.add_dates.resolve_on(text, today).or(intent.due_date),
            IntentSource::Llm => intent
                .due_date
                .or_else(|| self.add_dates.resolve_on(text, today)),
        };

        turn.enter(TurnState::Mutating);
        let mut tasks = self.store.load()?;
        let mut task = Task::new(name, due_date);
        tasks.push(task.clone());
        self.store.save(&tasks)?;
        debug!(task = %task.name, due = ?task.due_date, "task added");

        if intent.source == IntentSource::Menu || !CalendarSync::wants_calendar(text) {
            return Ok(Outcome::Added {
                task,
                sync: AddSync::NotRequested,
            });
        }

        turn.enter(TurnState::Syncing);
        let sync = self.calendar.sync_on_add(&task, text);
        if let AddSync::Created(id) = &sync {
            task.calendar_event_id = Some(id.clone());
            if let Some(stored) = tasks.last_mut() {
                stored.calendar_event_id = Some(id.clone());
            }
            self.store
                .save(&tasks)
                .context("failed to record the calendar event id")?;
        }

        Ok(Outcome::Added { task, sync })
    }

    fn complete(&self, mut tasks: Vec<Task>, position: usize, turn: &mut Turn) -> Result<Outcome> {
        turn.enter(TurnState::Mutating);
        let task = tasks
            .get_mut(position)
            .context("task to complete is no longer in the store")?;
        task.status = TaskStatus::Done;
        let task = task.clone();

        self.store.save(&tasks)?;
        Ok(Outcome::Completed { task })
    }

    fn edit(&self, intent: &Intent, mut tasks: Vec<Task>, position: usize, turn: &mut Turn) -> Result<Outcome> {
        enum Change {
            Due(Option<NaiveDate>),
            Rename(String),
        }

        let task = tasks
            .get_mut(position)
            .context("task to edit is no longer in the store")?;

        let change = if let Some(due) = intent.due_date {
            task.unreadable_due = None;
            Change::Due(task.due_date.replace(due))
        } else if intent.task_index.is_some() && is_new_name(&intent.task_name, &task.name) {
            Change::Rename(std::mem::replace(
                &mut task.name,
                intent.task_name.trim().to_string(),
            ))
        } else {
            return Ok(Outcome::EditUnspecified { task: task.clone() });
        };
        let task = task.clone();

        turn.enter(TurnState::Mutating);
        self.store.save(&tasks)?;

        let sync = if task.calendar_event_id.is_some() {
            turn.enter(TurnState::Syncing);
            self.calendar.sync_on_edit(&task)
        } else {
            EditSync::NotLinked
        };

        Ok(match change {
            Change::Due(previous) => Outcome::DueChanged { task, previous, sync },
            Change::Rename(previous) => Outcome::Renamed { task, previous, sync },
        })
    }

    fn delete(&self, mut tasks: Vec<Task>, position: usize, turn: &mut Turn) -> Result<Outcome> {
        turn.enter(TurnState::Mutating);
        anyhow::ensure!(
            position < tasks.len(),
            "task to delete is no longer in the store"
        );
        let task = tasks.remove(position);
        self.store.save(&tasks)?;

        let sync = if task.calendar_event_id.is_some() {
            turn.enter(TurnState::Syncing);
            self.calendar.sync_on_delete(&task)
        } else {
            DeleteSync::NotLinked
        };

        Ok(Outcome::Deleted { task, sync })
    }

    // ------------------------------------------------------------------------
    // Read-only
    // ------------------------------------------------------------------------

    fn show(&self, text: &str) -> Result<Outcome> {
        let tasks = self.store.load()?;
        let filter = ListFilter::from_text(text);
        let listing = Listing::new(&tasks, filter);
        let rows = listing.tasks(&tasks).cloned().collect();

        let events = CalendarSync::wants_calendar(text).then(|| {
            self.calendar.upcoming("", UPCOMING_DAYS).map_err(|e| {
                warn!(error = %e, "calendar search failed");
                e.to_string()
            })
        });

        Ok(Outcome::Listed {
            filter,
            tasks: rows,
            events,
        })
    }

    // ------------------------------------------------------------------------
    // Responding
    // ------------------------------------------------------------------------

    /// Only the confirmation itself is restyled; the sync note is appended
    /// verbatim afterwards
    fn respond(&self, outcome: &Outcome) -> String {
        let base = render_base(outcome);
        let base = match (&self.persona, outcome.confirmed_name()) {
            (Some((persona, llm)), Some(name)) => persona.restyle(llm.as_ref(), &base, name),
            _ => base,
        };
        format!("{}{}", base, sync_note(outcome))
    }

    fn record(&self, text: &str, reply: &Reply, started: Instant) {
        let Some(log) = &self.history else {
            return;
        };
        let entry = HistoryEntry {
            user_input: text,
            ai_response: &reply.message,
            action: reply.action,
            response_time: started.elapsed(),
        };
        if let Err(e) = log.append(&entry) {
            warn!(error = %e, "failed to append conversation history");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Strip calendar wording, date phrases and generic trailing verbs from a
/// task name. Returns the trimmed input when nothing would be left.
pub fn tidy_task_name(raw: &str, dates: &DateResolver) -> String {
    let raw = raw.trim();

    let mut stripped = raw.to_string();
    for phrase in CALENDAR_PHRASES {
        stripped = stripped.replace(phrase, "");
    }
    let stripped = dates.strip(&stripped).replace("までに", "");

    let mut name = stripped.trim();
    if name != raw {
        name = name.trim_start_matches(LEADING_PARTICLES).trim_start();
    }
    while let Some(rest) = ACTION_SUFFIXES.iter().find_map(|s| name.strip_suffix(s)) {
        name = rest.trim_end();
    }
    if name != raw {
        name = name.trim_end_matches(TRAILING_PARTICLES).trim_end();
    }

    if name.is_empty() {
        raw.to_string()
    } else {
        name.to_string()
    }
}

/// Whether an EDIT's name slot reads as a replacement name
fn is_new_name(candidate: &str, current: &str) -> bool {
    let candidate = candidate.trim();
    let lower = candidate.to_lowercase();
    !candidate.is_empty() && candidate != current && !EDIT_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn due_text(due: Option<NaiveDate>) -> String {
    due.map(format_date).unwrap_or_else(|| "なし".to_string())
}

fn task_row(display_index: usize, task: &Task) -> String {
    format!(
        "[No.{}] {} (期限: {}) - {}{}",
        display_index,
        task.name,
        due_text(task.due_date),
        task.status.label(),
        if task.calendar_event_id.is_some() { " 📅" } else { "" }
    )
}

fn action_verb(action: Action) -> &'static str {
    match action {
        Action::Complete => "完了",
        Action::Delete => "削除",
        Action::Edit => "編集",
        Action::Add => "追加",
        Action::Show => "表示",
        Action::Unknown => "操作",
    }
}

/// Calendar outcome attached to a confirmation, empty when there is none
fn sync_note(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Added { sync, .. } => match sync {
            AddSync::NotRequested => String::new(),
            AddSync::Created(_) => " 📅 Googleカレンダーにも追加しました！".to_string(),
            AddSync::SkippedNoDate => " ⚠️ 期限がないためカレンダー追加をスキップしました".to_string(),
            AddSync::Failed(reason) => format!(" ⚠️ カレンダー追加に失敗しました（{}）", reason),
        },
        Outcome::DueChanged { sync, .. } | Outcome::Renamed { sync, .. } => match sync {
            EditSync::NotLinked => String::new(),
            EditSync::Updated => " 📅 カレンダーも更新しました".to_string(),
            EditSync::Failed(reason) => format!(" ⚠️ カレンダーの更新に失敗しました（{}）", reason),
        },
        Outcome::Deleted { sync, .. } => match sync {
            DeleteSync::NotLinked => String::new(),
            DeleteSync::Deleted => " 📅 カレンダーの予定も削除しました".to_string(),
            DeleteSync::Failed(reason) => {
                format!(" ⚠️ カレンダーの予定の削除に失敗しました（{}）", reason)
            }
        },
        _ => String::new(),
    }
}

/// Deterministic Japanese message for an outcome, without the sync note
fn render_base(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Added { task, .. } => format!(
            "✅ タスク「{}」を追加しました（期限: {}）",
            task.name,
            due_text(task.due_date)
        ),
        Outcome::MissingName => {
            "追加するタスク名がわかりませんでした。「タスク名」のように指定してください。".to_string()
        }
        Outcome::DueChanged { task, previous, .. } => format!(
            "✏️ タスク「{}」の期限を{}から{}に変更しました",
            task.name,
            due_text(*previous),
            due_text(task.due_date)
        ),
        Outcome::Renamed { task, previous, .. } => format!(
            "✏️ タスク「{}」の名前を「{}」に変更しました",
            previous, task.name
        ),
        Outcome::EditUnspecified { task } => format!(
            "タスク「{}」の何を変更しますか？新しい期限か「新しい名前」を指定してください。",
            task.name
        ),
        Outcome::Completed { task } => {
            format!("🎉 タスク「{}」を完了しました！お疲れ様でした！", task.name)
        }
        Outcome::Deleted { task, .. } => format!("🗑️ タスク「{}」を削除しました", task.name),
        Outcome::Listed {
            filter,
            tasks,
            events,
        } => render_listing(*filter, tasks, events.as_ref()),
        Outcome::NothingToTarget { action } => match action {
            Action::Complete => "未完了のタスクはありません。".to_string(),
            _ => "タスクがありません。".to_string(),
        },
        Outcome::IndexOutOfRange { index, len } => format!(
            "No.{} のタスクは見つかりません（1〜{}の番号を指定してください）",
            index, len
        ),
        Outcome::NoMatch { action, candidates } => {
            let mut out = format!(
                "{}するタスクが特定できませんでした。次の中から番号で指定してください：",
                action_verb(*action)
            );
            for (display_index, task) in candidates {
                out.push('\n');
                out.push_str(&task_row(*display_index, task));
            }
            out
        }
        Outcome::NotUnderstood => "操作を理解できませんでした。もう一度お試しください。".to_string(),
    }
}

fn render_listing(
    filter: ListFilter,
    tasks: &[Task],
    events: Option<&Result<Vec<CalendarEvent>, String>>,
) -> String {
    let mut out = if tasks.is_empty() {
        "📭 表示するタスクはありません".to_string()
    } else {
        let title = match filter {
            ListFilter::All => "📋 タスク一覧",
            ListFilter::Todo => "📋 未完了のタスク",
            ListFilter::Done => "📋 完了済みのタスク",
        };
        let rows: Vec<String> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| task_row(i + 1, t))
            .collect();
        format!("{}:\n{}", title, rows.join("\n"))
    };

    match events {
        None => {}
        Some(Ok(events)) if events.is_empty() => {
            out.push_str(&format!("\n\n📅 今後{}日間の予定はありません", UPCOMING_DAYS));
        }
        Some(Ok(events)) => {
            out.push_str(&format!("\n\n📅 今後{}日間の予定:", UPCOMING_DAYS));
            for (i, event) in events.iter().enumerate() {
                out.push_str(&format!("\n{}. {} ({})", i + 1, event.summary, event.start));
            }
        }
        Some(Err(reason)) => {
            out.push_str(&format!("\n\n⚠️ カレンダーの予定を取得できませんでした（{}）", reason));
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

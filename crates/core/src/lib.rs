//! Natural-language task manager core
//!
//! This crate provides the engine behind the `tasktalk` CLI:
//! - Intent classification (LLM with a keyword fallback)
//! - Fuzzy task matching and date phrase resolution
//! - CSV task store
//! - Google Calendar sync
//! - The per-turn conversation orchestrator
//! - Backlog nudges with persisted feedback

pub mod types;

pub mod calendar;
pub mod config;
pub mod dates;
pub mod error;
pub mod history;
pub mod intent;
pub mod llm;
pub mod matcher;
pub mod nudge;
pub mod orchestrator;
pub mod persona;
pub mod store;

// Re-export commonly used types at crate root
pub use types::{
    format_date, parse_date, Action, Intent, IntentSource, ListFilter, Listing, Task, TaskStatus,
};

pub use calendar::{CalendarService, CalendarSync, GoogleCalendar};
pub use config::Config;
pub use dates::DateResolver;
pub use error::{CalendarError, ConfigError, StoreError};
pub use history::ConversationLog;
pub use intent::IntentClassifier;
pub use llm::{Completion, OpenRouterClient};
pub use nudge::{NudgePattern, Nudger};
pub use orchestrator::{Orchestrator, Reply, TurnState};
pub use persona::Persona;
pub use store::TaskStore;

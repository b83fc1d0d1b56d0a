//! Conversation history log
//!
//! One CSV row per natural-language turn, appended. The log is best effort:
//! callers log a failed append and carry on.

use chrono::Local;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;
use crate::types::{now_timestamp, Action, TIMESTAMP_FORMAT};

pub const HISTORY_HEADERS: [&str; 6] = [
    "session_id",
    "timestamp",
    "user_input",
    "ai_response",
    "action",
    "response_time",
];

/// One completed turn
#[derive(Debug, Clone)]
pub struct HistoryEntry<'a> {
    pub user_input: &'a str,
    pub ai_response: &'a str,
    pub action: Action,
    pub response_time: Duration,
}

/// Append-only conversation log for one session
#[derive(Debug, Clone)]
pub struct ConversationLog {
    path: PathBuf,
    session_id: String,
}

impl ConversationLog {
    /// Session id derived from the start time, e.g. `20250610_093000`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let session_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::with_session(path, session_id)
    }

    pub fn with_session(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Append one row, writing the header first when the file is new or empty
    pub fn append(&self, entry: &HistoryEntry<'_>) -> Result<(), StoreError> {
        let io_error = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)?;
        let is_new = file.metadata().map_err(io_error)?.len() == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        let csv_error = |source: csv::Error| StoreError::Csv {
            path: self.path.clone(),
            source,
        };

        if is_new {
            writer.write_record(HISTORY_HEADERS).map_err(csv_error)?;
        }

        let timestamp = now_timestamp().format(TIMESTAMP_FORMAT).to_string();
        let response_time = format!("{:.2}", entry.response_time.as_secs_f64());
        writer
            .write_record([
                self.session_id.as_str(),
                timestamp.as_str(),
                entry.user_input,
                entry.ai_response,
                entry.action.as_str(),
                response_time.as_str(),
            ])
            .map_err(csv_error)?;
        writer.flush().map_err(io_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::ReaderBuilder;

    fn entry<'a>(input: &'a str, response: &'a str) -> HistoryEntry<'a> {
        HistoryEntry {
            user_input: input,
            ai_response: response,
            action: Action::Add,
            response_time: Duration::from_millis(1234),
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::with_session(dir.path().join("history.csv"), "s1");

        log.append(&entry("牛乳を追加", "✅ 追加しました")).unwrap();
        log.append(&entry("一覧", "1件,\n2件")).unwrap();

        let mut reader = ReaderBuilder::new().from_path(log.path()).unwrap();
        assert_eq!(reader.headers().unwrap(), &HISTORY_HEADERS[..]);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "s1");
        assert_eq!(&rows[0][2], "牛乳を追加");
        assert_eq!(&rows[0][4], "ADD");
        assert_eq!(&rows[0][5], "1.23");
        // embedded comma and newline survive quoting
        assert_eq!(&rows[1][3], "1件,\n2件");
    }

    #[test]
    fn test_session_id_shape() {
        let log = ConversationLog::new("unused.csv");
        assert_eq!(log.session_id().len(), "20250610_093000".len());
        assert_eq!(&log.session_id()[8..9], "_");
    }

    #[test]
    fn test_unwritable_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::with_session(dir.path().join("missing/history.csv"), "s");
        assert!(log.append(&entry("a", "b")).is_err());
    }
}

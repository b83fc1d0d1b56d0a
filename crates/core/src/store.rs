//! CSV-backed task store
//!
//! The whole collection is the unit of persistence: `load` reads every row,
//! `save` rewrites the file. There is no locking; the last writer wins.

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::types::{Task, TaskStatus, DATE_FORMAT, TIMESTAMP_FORMAT};

/// Column order of the store file
pub const HEADERS: [&str; 5] = [
    "task_name",
    "due_date",
    "status",
    "created_at",
    "calendar_event_id",
];

/// Flat-file task store
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

/// Header name -> column position, for files whose columns are missing or reordered
struct ColumnMap([Option<usize>; 5]);

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut cols = [None; 5];
        for (slot, name) in cols.iter_mut().zip(HEADERS) {
            *slot = headers.iter().position(|h| h.trim() == name);
        }
        Self(cols)
    }

    fn get<'r>(&self, record: &'r StringRecord, column: usize) -> &'r str {
        self.0[column]
            .and_then(|i| record.get(i))
            .unwrap_or("")
    }
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with only the header row if it does not exist
    pub fn initialize(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            self.save(&[])?;
        }
        Ok(())
    }

    /// Read every task. A missing file is an empty collection.
    pub fn load(&self) -> Result<Vec<Task>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader.headers().map_err(|e| self.csv_error(e))?.clone();
        let columns = ColumnMap::from_headers(&headers);

        let mut tasks = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| self.csv_error(e))?;
            tasks.push(self.task_from_record(&columns, &record, line + 2));
        }

        debug!(path = %self.path.display(), count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }

    /// Rewrite the whole file
    pub fn save(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let mut writer = WriterBuilder::new()
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;

        writer.write_record(HEADERS).map_err(|e| self.csv_error(e))?;
        for task in tasks {
            let created_at = task.created_at.format(TIMESTAMP_FORMAT).to_string();
            let due_date = task
                .due_date
                .map(|d| d.format(DATE_FORMAT).to_string())
                .or_else(|| task.unreadable_due.clone())
                .unwrap_or_default();
            writer
                .write_record([
                    task.name.as_str(),
                    due_date.as_str(),
                    task.status.as_str(),
                    created_at.as_str(),
                    task.calendar_event_id.as_deref().unwrap_or(""),
                ])
                .map_err(|e| self.csv_error(e))?;
        }
        writer.flush().map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), count = tasks.len(), "saved tasks");
        Ok(())
    }

    /// Malformed fields default instead of failing the read
    fn task_from_record(&self, columns: &ColumnMap, record: &StringRecord, line: usize) -> Task {
        let due_raw = columns.get(record, 1).trim();
        let (due_date, unreadable_due) = if due_raw.is_empty() {
            (None, None)
        } else {
            match NaiveDate::parse_from_str(due_raw, DATE_FORMAT) {
                Ok(d) => (Some(d), None),
                Err(_) => {
                    warn!(line, value = due_raw, "unreadable due_date, treating as none");
                    (None, Some(due_raw.to_string()))
                }
            }
        };

        let created_raw = columns.get(record, 3).trim();
        let created_at = NaiveDateTime::parse_from_str(created_raw, TIMESTAMP_FORMAT)
            .unwrap_or_else(|_| {
                warn!(line, value = created_raw, "unreadable created_at");
                NaiveDateTime::default()
            });

        let event_id = columns.get(record, 4).trim();

        Task {
            name: columns.get(record, 0).to_string(),
            due_date,
            unreadable_due,
            status: TaskStatus::parse(columns.get(record, 2)),
            created_at,
            calendar_event_id: (!event_id.is_empty()).then(|| event_id.to_string()),
        }
    }

    fn csv_error(&self, source: csv::Error) -> StoreError {
        StoreError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_in(dir: &tempfile::TempDir) -> TaskStore {
        TaskStore::new(dir.path().join("tasks.csv"))
    }

    fn sample_tasks() -> Vec<Task> {
        let mut linked = Task::new("会議, 資料準備", NaiveDate::from_ymd_opt(2025, 12, 24));
        linked.calendar_event_id = Some("evt123".to_string());
        let mut done = Task::new("Buy \"milk\"", None);
        done.status = TaskStatus::Done;
        vec![Task::new("レポートを書く", None), linked, done]
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_initialize_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.initialize().unwrap();
        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            content.trim_end(),
            "task_name,due_date,status,created_at,calendar_event_id"
        );
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let tasks = sample_tasks();

        store.save(&tasks).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, tasks);
    }

    #[test]
    fn test_empty_strings_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let task = Task::new("plain", None);
        store.save(std::slice::from_ref(&task)).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        let row = content.lines().nth(1).unwrap();
        let expected = format!("plain,,todo,{},", task.created_at.format(TIMESTAMP_FORMAT));
        assert_eq!(row, expected);
    }

    #[test]
    fn test_malformed_rows_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            "task_name,due_date,status,created_at,calendar_event_id\n\
             short row\n\
             bad date,2025-13-40,todo,yesterday,\n\
             ok,2025-06-10,done,2025-06-01 09:00:00,abc\n",
        )
        .unwrap();

        let tasks = store.load().unwrap();
        assert_eq!(tasks.len(), 3);

        assert_eq!(tasks[0].name, "short row");
        assert_eq!(tasks[0].status, TaskStatus::Other(String::new()));
        assert!(tasks[0].due_date.is_none());

        assert!(tasks[1].due_date.is_none());
        assert_eq!(tasks[1].unreadable_due.as_deref(), Some("2025-13-40"));
        assert_eq!(tasks[1].created_at, NaiveDateTime::default());

        assert_eq!(tasks[2].status, TaskStatus::Done);
        assert_eq!(tasks[2].calendar_event_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_missing_column_in_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            "task_name,due_date,status,created_at\nold,,todo,2025-01-01 00:00:00\n",
        )
        .unwrap();

        let tasks = store.load().unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].calendar_event_id.is_none());
        assert!(tasks[0].is_todo());
    }

    #[test]
    fn test_unknown_status_survives_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut task = Task::new("archived one", None);
        task.status = TaskStatus::Other("archived".to_string());
        store.save(&[task]).unwrap();

        let again = store.load().unwrap();
        store.save(&again).unwrap();
        assert_eq!(store.load().unwrap()[0].status.as_str(), "archived");
    }

    #[test]
    fn test_unreadable_due_survives_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            "task_name,due_date,status,created_at,calendar_event_id\n\
             odd,next friday,todo,2025-06-01 09:00:00,\n\
             other,,todo,2025-06-01 09:00:00,\n",
        )
        .unwrap();

        // an unrelated change rewrites the whole file
        let mut tasks = store.load().unwrap();
        tasks[1].status = TaskStatus::Done;
        store.save(&tasks).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("odd,next friday,todo,"));

        // setting a real date replaces the raw text
        let mut tasks = store.load().unwrap();
        tasks[0].due_date = NaiveDate::from_ymd_opt(2025, 6, 20);
        tasks[0].unreadable_due = None;
        store.save(&tasks).unwrap();
        assert_eq!(store.load().unwrap()[0].due_date, NaiveDate::from_ymd_opt(2025, 6, 20));
    }
}

//! Calendar sync adapter
//!
//! [`CalendarService`] is the remote capability (Google Calendar v3 over REST
//! in production). [`CalendarSync`] decides when a task mutation should touch
//! the calendar and turns every remote failure into a reportable outcome; it
//! never returns an error that would undo a local change.

use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveDate, SecondsFormat, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CalendarConfig;
use crate::error::CalendarError;
use crate::types::{format_date, Task, TIMESTAMP_FORMAT};

/// Words that ask for a calendar side effect (matched case-insensitively)
pub const CALENDAR_KEYWORDS: &[&str] = &["カレンダー", "スケジュール", "予定", "calendar"];

/// Horizon of the event list appended to SHOW
pub const UPCOMING_DAYS: i64 = 7;

/// Max events fetched for SHOW
pub const UPCOMING_LIMIT: u32 = 10;

const EVENT_TITLE_PREFIX: &str = "📋 ";

// ============================================================================
// Capability
// ============================================================================

/// All-day event to create
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub summary: String,
    pub description: String,
    pub date: NaiveDate,
}

/// Fields to change on an existing event; `None` leaves the field alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Event as returned by a search
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    /// `YYYY-MM-DD` for all-day events, RFC 3339 otherwise
    pub start: String,
    pub description: String,
}

/// Remote calendar operations
pub trait CalendarService {
    /// Create an event and return its id
    fn create_event(&self, event: &NewEvent) -> Result<String, CalendarError>;

    fn search_events(
        &self,
        query: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;

    fn update_event(&self, event_id: &str, patch: &EventPatch) -> Result<(), CalendarError>;

    fn delete_event(&self, event_id: &str) -> Result<(), CalendarError>;
}

// ============================================================================
// Google Calendar v3
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
}

impl EventTime {
    fn all_day(date: NaiveDate) -> Self {
        Self {
            date: Some(format_date(date)),
            date_time: None,
        }
    }
}

#[derive(Serialize, Debug, Default)]
struct EventBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<EventTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<EventTime>,
}

#[derive(Deserialize, Debug)]
struct CreatedEvent {
    id: String,
}

#[derive(Deserialize, Debug)]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Deserialize, Debug)]
struct EventItem {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start: Option<EventTime>,
}

impl From<EventItem> for CalendarEvent {
    fn from(item: EventItem) -> Self {
        let start = item
            .start
            .and_then(|s| s.date_time.or(s.date))
            .unwrap_or_default();
        Self {
            id: item.id,
            summary: item.summary.unwrap_or_else(|| "（タイトルなし）".to_string()),
            start,
            description: item.description.unwrap_or_default(),
        }
    }
}

/// All-day events span `[date, date + 1)`
fn all_day_span(date: NaiveDate) -> (EventTime, EventTime) {
    let end = date.checked_add_days(Days::new(1)).unwrap_or(date);
    (EventTime::all_day(date), EventTime::all_day(end))
}

fn event_body(event: &NewEvent) -> EventBody<'_> {
    let (start, end) = all_day_span(event.date);
    EventBody {
        summary: Some(&event.summary),
        description: Some(&event.description),
        start: Some(start),
        end: Some(end),
    }
}

fn patch_body(patch: &EventPatch) -> EventBody<'_> {
    let (start, end) = match patch.date.map(all_day_span) {
        Some((s, e)) => (Some(s), Some(e)),
        None => (None, None),
    };
    EventBody {
        summary: patch.summary.as_deref(),
        description: None,
        start,
        end,
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, CalendarError> {
    serde_json::from_str(body).map_err(|e| CalendarError::Decode(e.to_string()))
}

/// Google Calendar REST client authenticated with a bearer access token
pub struct GoogleCalendar {
    client: Client,
    base_url: String,
    calendar_id: String,
    access_token: String,
}

impl GoogleCalendar {
    /// Fails with `NotConfigured` when no access token is set
    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        let access_token = config
            .access_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(CalendarError::NotConfigured)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            calendar_id: config.calendar_id.clone(),
            access_token,
        })
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(&self.calendar_id)
        )
    }

    fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    /// Send with auth; non-2xx becomes `Api` with the response body
    fn send(&self, request: RequestBuilder) -> Result<Response, CalendarError> {
        let response = request.bearer_auth(&self.access_token).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CalendarError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

impl CalendarService for GoogleCalendar {
    fn create_event(&self, event: &NewEvent) -> Result<String, CalendarError> {
        let response = self.send(self.client.post(self.events_url()).json(&event_body(event)))?;
        let created: CreatedEvent = decode(&response.text()?)?;
        debug!(event_id = %created.id, "calendar event created");
        Ok(created.id)
    }

    fn search_events(
        &self,
        query: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let mut params = vec![
            ("timeMin", time_min.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("timeMax", time_max.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("maxResults", max_results.to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        if !query.is_empty() {
            params.push(("q", query.to_string()));
        }

        let response = self.send(self.client.get(self.events_url()).query(&params))?;
        let list: EventList = decode(&response.text()?)?;
        Ok(list.items.into_iter().map(CalendarEvent::from).collect())
    }

    fn update_event(&self, event_id: &str, patch: &EventPatch) -> Result<(), CalendarError> {
        self.send(
            self.client
                .patch(self.event_url(event_id))
                .json(&patch_body(patch)),
        )?;
        Ok(())
    }

    fn delete_event(&self, event_id: &str) -> Result<(), CalendarError> {
        self.send(self.client.delete(self.event_url(event_id)))?;
        Ok(())
    }
}

// ============================================================================
// Sync policy
// ============================================================================

/// Calendar side effect of an ADD
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddSync {
    /// The utterance did not mention the calendar
    NotRequested,
    /// Requested, but the task has no due date
    SkippedNoDate,
    Created(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditSync {
    NotLinked,
    Updated,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSync {
    NotLinked,
    Deleted,
    Failed(String),
}

/// Applies calendar side effects for task mutations
pub struct CalendarSync {
    service: Option<Box<dyn CalendarService>>,
}

impl CalendarSync {
    pub fn new(service: Option<Box<dyn CalendarService>>) -> Self {
        Self { service }
    }

    pub fn disabled() -> Self {
        Self { service: None }
    }

    /// Whether the utterance asks for a calendar side effect
    pub fn wants_calendar(text: &str) -> bool {
        let lower = text.to_lowercase();
        CALENDAR_KEYWORDS.iter().any(|k| lower.contains(k))
    }

    fn service(&self) -> Result<&dyn CalendarService, CalendarError> {
        self.service.as_deref().ok_or(CalendarError::NotConfigured)
    }

    /// Create an all-day event for a freshly added task when asked to
    pub fn sync_on_add(&self, task: &Task, origin_text: &str) -> AddSync {
        if !Self::wants_calendar(origin_text) {
            return AddSync::NotRequested;
        }
        let Some(date) = task.due_date else {
            debug!(task = %task.name, "calendar requested but task has no due date");
            return AddSync::SkippedNoDate;
        };

        let event = NewEvent {
            summary: event_title(&task.name),
            description: format!(
                "TODOアプリから作成されたタスク\n作成日時: {}",
                task.created_at.format(TIMESTAMP_FORMAT)
            ),
            date,
        };

        match self.service().and_then(|s| s.create_event(&event)) {
            Ok(id) => AddSync::Created(id),
            Err(e) => {
                warn!(error = %e, task = %task.name, "calendar create failed");
                AddSync::Failed(e.to_string())
            }
        }
    }

    /// Mirror a task edit onto its linked event
    pub fn sync_on_edit(&self, task: &Task) -> EditSync {
        let Some(event_id) = task.calendar_event_id.as_deref() else {
            return EditSync::NotLinked;
        };

        let patch = EventPatch {
            summary: Some(event_title(&task.name)),
            date: task.due_date,
        };

        match self.service().and_then(|s| s.update_event(event_id, &patch)) {
            Ok(()) => EditSync::Updated,
            Err(e) => {
                warn!(error = %e, event_id, "calendar update failed");
                EditSync::Failed(e.to_string())
            }
        }
    }

    /// Remove the linked event of a deleted task
    pub fn sync_on_delete(&self, task: &Task) -> DeleteSync {
        let Some(event_id) = task.calendar_event_id.as_deref() else {
            return DeleteSync::NotLinked;
        };

        match self.service().and_then(|s| s.delete_event(event_id)) {
            Ok(()) => DeleteSync::Deleted,
            Err(e) => {
                warn!(error = %e, event_id, "calendar delete failed");
                DeleteSync::Failed(e.to_string())
            }
        }
    }

    /// Events from now through the next `days` days
    pub fn upcoming(&self, query: &str, days: i64) -> Result<Vec<CalendarEvent>, CalendarError> {
        let now = Utc::now();
        self.service()?
            .search_events(query, now, now + ChronoDuration::days(days), UPCOMING_LIMIT)
    }
}

fn event_title(task_name: &str) -> String {
    format!("{}{}", EVENT_TITLE_PREFIX, task_name)
}

// ============================================================================
// Test doubles
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::fake::FakeCalendar;
    use super::*;
    use serde_json::{json, Value};

    fn due(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn linked(name: &str, event_id: &str) -> Task {
        let mut task = Task::new(name, due(2025, 6, 11));
        task.calendar_event_id = Some(event_id.to_string());
        task
    }

    fn sync_with(fake: FakeCalendar) -> CalendarSync {
        CalendarSync::new(Some(Box::new(fake)))
    }

    #[test]
    fn test_wants_calendar() {
        assert!(CalendarSync::wants_calendar("明日の会議をカレンダーに追加"));
        assert!(CalendarSync::wants_calendar("予定に入れて"));
        assert!(CalendarSync::wants_calendar("add to my Calendar"));
        assert!(!CalendarSync::wants_calendar("レポートを追加"));
    }

    #[test]
    fn test_add_not_requested_makes_no_call() {
        let fake = FakeCalendar::working();
        let calls = fake.calls();
        let sync = sync_with(fake);

        let task = Task::new("会議", due(2025, 6, 11));
        assert_eq!(sync.sync_on_add(&task, "会議を追加"), AddSync::NotRequested);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_add_without_date_is_skipped() {
        let fake = FakeCalendar::working();
        let calls = fake.calls();
        let sync = sync_with(fake);

        let task = Task::new("会議", None);
        assert_eq!(
            sync.sync_on_add(&task, "会議をカレンダーに追加"),
            AddSync::SkippedNoDate
        );
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_add_creates_all_day_event() {
        let fake = FakeCalendar::working();
        let calls = fake.calls();
        let sync = sync_with(fake);

        let task = Task::new("会議", due(2025, 6, 11));
        assert_eq!(
            sync.sync_on_add(&task, "明日の会議をカレンダーに追加"),
            AddSync::Created("evt-1".to_string())
        );
        assert_eq!(calls.borrow()[0], "create:📋 会議:2025-06-11");
    }

    #[test]
    fn test_add_failure_is_reported() {
        let sync = sync_with(FakeCalendar::failing());
        let task = Task::new("会議", due(2025, 6, 11));
        match sync.sync_on_add(&task, "カレンダーに入れて") {
            AddSync::Failed(reason) => assert!(reason.contains("503")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_add_without_service_fails() {
        let sync = CalendarSync::disabled();
        let task = Task::new("会議", due(2025, 6, 11));
        assert!(matches!(
            sync.sync_on_add(&task, "カレンダーに入れて"),
            AddSync::Failed(_)
        ));
    }

    #[test]
    fn test_edit_and_delete_skip_unlinked() {
        let fake = FakeCalendar::working();
        let calls = fake.calls();
        let sync = sync_with(fake);

        let task = Task::new("会議", due(2025, 6, 11));
        assert_eq!(sync.sync_on_edit(&task), EditSync::NotLinked);
        assert_eq!(sync.sync_on_delete(&task), DeleteSync::NotLinked);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_edit_patches_title_and_date() {
        let fake = FakeCalendar::working();
        let calls = fake.calls();
        let sync = sync_with(fake);

        assert_eq!(sync.sync_on_edit(&linked("会議", "abc")), EditSync::Updated);
        assert_eq!(calls.borrow()[0], "update:abc:📋 会議:2025-06-11");
    }

    #[test]
    fn test_delete_outcomes() {
        let ok = sync_with(FakeCalendar::working());
        assert_eq!(ok.sync_on_delete(&linked("会議", "abc")), DeleteSync::Deleted);

        let broken = sync_with(FakeCalendar::failing());
        assert!(matches!(
            broken.sync_on_delete(&linked("会議", "abc")),
            DeleteSync::Failed(_)
        ));
    }

    #[test]
    fn test_upcoming_requires_service() {
        assert!(matches!(
            CalendarSync::disabled().upcoming("", UPCOMING_DAYS),
            Err(CalendarError::NotConfigured)
        ));

        let event = CalendarEvent {
            id: "e1".to_string(),
            summary: "歯医者".to_string(),
            start: "2025-06-12".to_string(),
            description: String::new(),
        };
        let sync = sync_with(FakeCalendar::working().with_events(vec![event.clone()]));
        assert_eq!(sync.upcoming("", UPCOMING_DAYS).unwrap(), vec![event]);
    }

    #[test]
    fn test_event_body_shape() {
        let event = NewEvent {
            summary: "📋 会議".to_string(),
            description: "memo".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        };
        let body = serde_json::to_value(event_body(&event)).unwrap();
        assert_eq!(
            body,
            json!({
                "summary": "📋 会議",
                "description": "memo",
                "start": {"date": "2025-12-31"},
                "end": {"date": "2026-01-01"},
            })
        );
    }

    #[test]
    fn test_patch_body_omits_unchanged_fields() {
        let patch = EventPatch {
            summary: Some("📋 new".to_string()),
            date: None,
        };
        let body: Value = serde_json::to_value(patch_body(&patch)).unwrap();
        assert_eq!(body, json!({"summary": "📋 new"}));
    }

    #[test]
    fn test_decode_event_list() {
        let list: EventList = decode(
            r#"{"items": [
                {"id": "a", "summary": "終日", "start": {"date": "2025-06-12"}},
                {"id": "b", "start": {"dateTime": "2025-06-13T10:00:00+09:00"}, "description": "d"}
            ]}"#,
        )
        .unwrap();
        let events: Vec<CalendarEvent> = list.items.into_iter().map(Into::into).collect();
        assert_eq!(events[0].start, "2025-06-12");
        assert_eq!(events[1].summary, "（タイトルなし）");
        assert_eq!(events[1].start, "2025-06-13T10:00:00+09:00");
        assert_eq!(events[1].description, "d");

        assert!(matches!(
            decode::<EventList>("not json"),
            Err(CalendarError::Decode(_))
        ));
    }

    #[test]
    fn test_google_client_requires_token() {
        assert!(matches!(
            GoogleCalendar::from_config(&CalendarConfig::default()),
            Err(CalendarError::NotConfigured)
        ));

        let config = CalendarConfig {
            access_token: Some("ya29.x".to_string()),
            calendar_id: "team@group.calendar.google.com".to_string(),
            ..Default::default()
        };
        let client = GoogleCalendar::from_config(&config).unwrap();
        assert_eq!(
            client.event_url("id 1"),
            "https://www.googleapis.com/calendar/v3/calendars/team%40group.calendar.google.com/events/id%201"
        );
    }
}

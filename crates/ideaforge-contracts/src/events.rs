use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Every kind of entry the session log holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted,
    IdeasGenerated,
    VariationsReady,
    ViewReady,
    ViewsFailed,
    ModelSaved,
    ModelDeleted,
    KeywordsExtracted,
    GenerationRetry,
    StorageRecovered,
    ArchiveExported,
    ArchiveImported,
    SceneDescribed,
    RealisticRendered,
    ListingGenerated,
    Error,
}

impl SessionEvent {
    pub const ALL: [SessionEvent; 16] = [
        SessionEvent::SessionStarted,
        SessionEvent::IdeasGenerated,
        SessionEvent::VariationsReady,
        SessionEvent::ViewReady,
        SessionEvent::ViewsFailed,
        SessionEvent::ModelSaved,
        SessionEvent::ModelDeleted,
        SessionEvent::KeywordsExtracted,
        SessionEvent::GenerationRetry,
        SessionEvent::StorageRecovered,
        SessionEvent::ArchiveExported,
        SessionEvent::ArchiveImported,
        SessionEvent::SceneDescribed,
        SessionEvent::RealisticRendered,
        SessionEvent::ListingGenerated,
        SessionEvent::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionEvent::SessionStarted => "session_started",
            SessionEvent::IdeasGenerated => "ideas_generated",
            SessionEvent::VariationsReady => "variations_ready",
            SessionEvent::ViewReady => "view_ready",
            SessionEvent::ViewsFailed => "views_failed",
            SessionEvent::ModelSaved => "model_saved",
            SessionEvent::ModelDeleted => "model_deleted",
            SessionEvent::KeywordsExtracted => "keywords_extracted",
            SessionEvent::GenerationRetry => "generation_retry",
            SessionEvent::StorageRecovered => "storage_recovered",
            SessionEvent::ArchiveExported => "archive_exported",
            SessionEvent::ArchiveImported => "archive_imported",
            SessionEvent::SceneDescribed => "scene_described",
            SessionEvent::RealisticRendered => "realistic_rendered",
            SessionEvent::ListingGenerated => "listing_generated",
            SessionEvent::Error => "error",
        }
    }

    /// Failures and recoveries, as opposed to progress.
    pub fn is_problem(self) -> bool {
        matches!(
            self,
            SessionEvent::ViewsFailed
                | SessionEvent::GenerationRetry
                | SessionEvent::StorageRecovered
                | SessionEvent::Error
        )
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ENVELOPE_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// One line of `events.jsonl`: the envelope plus a flat payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event: SessionEvent,
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventRecord {
    /// Payload keys that collide with the envelope are dropped.
    pub fn new(event: SessionEvent, session_id: &str, mut payload: EventPayload) -> Self {
        for key in ENVELOPE_KEYS {
            payload.remove(key);
        }
        Self {
            event,
            session_id: session_id.to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            payload,
        }
    }
}

/// Append-only session log, shared across threads by cloning.
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    session_id: String,
    write_lock: Mutex<()>,
    dropped: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                session_id: session_id.into(),
                write_lock: Mutex::new(()),
                dropped: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: SessionEvent, payload: EventPayload) -> anyhow::Result<EventRecord> {
        let record = EventRecord::new(event, &self.inner.session_id, payload);
        let line = serde_json::to_string(&record)?;

        let path = &self.inner.path;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let _guard = self
            .inner
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed opening event log {}", path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed appending to {}", path.display()))?;
        Ok(record)
    }

    /// For callers with nowhere to return an error. A failed write is kept
    /// until `take_dropped` collects it.
    pub fn emit_or_note(&self, event: SessionEvent, payload: EventPayload) {
        if let Err(err) = self.emit(event, payload) {
            if let Ok(mut dropped) = self.inner.dropped.lock() {
                dropped.push(format!("{event} not logged: {err:#}"));
            }
        }
    }

    pub fn take_dropped(&self) -> Vec<String> {
        self.inner
            .dropped
            .lock()
            .map(|mut dropped| std::mem::take(&mut *dropped))
            .unwrap_or_default()
    }
}

/// Reads a whole log back. Blank lines are skipped.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<EventRecord>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: bad event", path.display(), index + 1))
        })
        .collect()
}

/// Builds a payload from a `json!({...})` object literal; other values yield an
/// empty payload.
pub fn payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{payload, read_events, EventLog, SessionEvent};

    #[test]
    fn emitted_records_read_back() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("logs").join("events.jsonl");
        let log = EventLog::new(&path, "session-7");

        let saved = log.emit(
            SessionEvent::ModelSaved,
            payload(json!({"idea": "a tide-pool planter", "timestamp": 17})),
        )?;
        log.emit(SessionEvent::ModelDeleted, payload(json!({"remaining": 0})))?;

        let records = read_events(&path)?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], saved);
        assert_eq!(records[0].session_id, "session-7");
        assert_eq!(records[0].payload["idea"], json!("a tide-pool planter"));
        assert_eq!(records[1].event, SessionEvent::ModelDeleted);
        DateTime::parse_from_rfc3339(&records[0].ts)?;

        let raw = std::fs::read_to_string(&path)?;
        let first: Value = serde_json::from_str(raw.lines().next().unwrap_or_default())?;
        assert_eq!(first["type"], json!("model_saved"));
        Ok(())
    }

    #[test]
    fn payload_cannot_rewrite_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let log = EventLog::new(temp.path().join("events.jsonl"), "session-7");
        let record = log.emit(
            SessionEvent::Error,
            payload(json!({"type": "other", "session_id": "forged", "message": "boom"})),
        )?;
        assert_eq!(record.event, SessionEvent::Error);
        assert_eq!(record.session_id, "session-7");
        assert!(!record.payload.contains_key("type"));
        assert_eq!(record.payload["message"], json!("boom"));
        Ok(())
    }

    #[test]
    fn wire_names_match_as_str() -> anyhow::Result<()> {
        for event in SessionEvent::ALL {
            assert_eq!(serde_json::to_value(event)?, json!(event.as_str()));
        }
        assert!(SessionEvent::StorageRecovered.is_problem());
        assert!(!SessionEvent::ViewReady.is_problem());
        Ok(())
    }

    #[test]
    fn unwritable_log_is_noted_for_later() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        std::fs::create_dir(&path)?;
        let log = EventLog::new(&path, "session-7");

        assert!(log.emit(SessionEvent::SessionStarted, payload(json!({}))).is_err());
        log.emit_or_note(SessionEvent::GenerationRetry, payload(json!({"retry": 1})));
        let dropped = log.take_dropped();
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].starts_with("generation_retry not logged"));
        assert!(log.take_dropped().is_empty());
        Ok(())
    }

    #[test]
    fn read_events_names_the_bad_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let log = EventLog::new(&path, "session-7");
        log.emit(SessionEvent::SessionStarted, payload(json!({})))?;
        let mut raw = std::fs::read_to_string(&path)?;
        raw.push_str("\n{\"type\": \"mystery\"}\n");
        std::fs::write(&path, raw)?;

        let err = match read_events(&path) {
            Ok(records) => anyhow::bail!("expected failure, got {records:?}"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").contains(":3: bad event"));
        Ok(())
    }
}

//! Event log store: single append-only, indexed log (spec.md §4.6).
//!
//! Backed by SQLite in WAL mode, following the teacher's `core::db`/
//! `core::broker` pattern: a single connection per call, serialised by a
//! per-path in-process mutex so concurrent invocations inside one process
//! never interleave appends (spec.md §5 "single-writer-at-a-time").
//! Cross-process serialisation is provided by SQLite's own locking.
//!
//! Readers iterate by insertion-order row id, not by `ts`, so that
//! same-second events remain ordered (spec.md §4.6).

use crate::core::error::CskError;
use crate::core::model::Event;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS events (
        row_id INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        ts TEXT NOT NULL,
        type TEXT NOT NULL,
        actor TEXT NOT NULL,
        mission_id TEXT,
        module_id TEXT,
        task_id TEXT,
        slice_id TEXT,
        payload TEXT NOT NULL,
        artifact_refs TEXT NOT NULL,
        repo_git_head TEXT,
        engine_version TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);
    CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
    CREATE INDEX IF NOT EXISTS idx_events_ids ON events(mission_id, module_id, task_id, slice_id);
";

/// Optional filter for `tail`/scoped reads.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    pub task_id: Option<String>,
    pub slice_id: Option<String>,
}

pub struct EventLog {
    db_path: PathBuf,
}

impl EventLog {
    pub fn open(db_path: &Path) -> Result<Self, CskError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = EventLog {
            db_path: db_path.to_path_buf(),
        };
        log.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })?;
        Ok(log)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, CskError>
    where
        F: FnOnce(&Connection) -> Result<R, CskError>,
    {
        let lock = get_db_lock(&self.db_path);
        let _guard = lock
            .lock()
            .map_err(|_| CskError::Internal("event log lock poisoned".into()))?;
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        conn.execute("PRAGMA foreign_keys=ON;", [])?;
        f(&conn)
    }

    /// Append one event. Validates the envelope (serialisable, unique id)
    /// before committing; unknown/invalid fields fail the JSON parse at
    /// the call site since `Event` is a closed struct.
    pub fn append(&self, event: &Event) -> Result<(), CskError> {
        let payload = serde_json::to_string(&event.payload)?;
        let artifact_refs = serde_json::to_string(&event.artifact_refs)?;
        let event_type = serde_json::to_value(event.event_type)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, ts, type, actor, mission_id, module_id, task_id, slice_id, payload, artifact_refs, repo_git_head, engine_version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    event.id,
                    event.ts,
                    event_type,
                    event.actor,
                    event.mission_id,
                    event.module_id,
                    event.task_id,
                    event.slice_id,
                    payload,
                    artifact_refs,
                    event.repo_git_head,
                    event.engine_version,
                ],
            )?;
            Ok(())
        })
    }

    /// Iterate all events in insertion order.
    pub fn iter_chronological(&self) -> Result<Vec<Event>, CskError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM events ORDER BY row_id ASC")?;
            let rows = stmt.query_map([], row_to_event)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
    }

    /// Last `n` events matching `filter`, in insertion order.
    pub fn tail(&self, filter: &EventFilter, n: usize) -> Result<Vec<Event>, CskError> {
        let all = self.iter_chronological()?;
        let filtered: Vec<Event> = all
            .into_iter()
            .filter(|e| {
                if let Some(t) = &filter.event_type {
                    let et = serde_json::to_value(e.event_type)
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s.to_string()))
                        .unwrap_or_default();
                    if &et != t {
                        return false;
                    }
                }
                if let Some(tid) = &filter.task_id {
                    if e.task_id.as_deref() != Some(tid.as_str()) {
                        return false;
                    }
                }
                if let Some(sid) = &filter.slice_id {
                    if e.slice_id.as_deref() != Some(sid.as_str()) {
                        return false;
                    }
                }
                true
            })
            .collect();
        let start = filtered.len().saturating_sub(n);
        Ok(filtered[start..].to_vec())
    }

    pub fn event_by_id(&self, id: &str) -> Result<Option<Event>, CskError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM events WHERE id = ?1",
                params![id],
                row_to_event,
            )
            .optional()
            .map_err(CskError::from)
        })
    }
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let type_str: String = row.get("type")?;
    let event_type: crate::core::model::EventType =
        serde_json::from_value(serde_json::Value::String(type_str)).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let payload_str: String = row.get("payload")?;
    let payload: serde_json::Value = serde_json::from_str(&payload_str).unwrap_or_default();
    let artifact_refs_str: String = row.get("artifact_refs")?;
    let artifact_refs: Vec<String> = serde_json::from_str(&artifact_refs_str).unwrap_or_default();
    Ok(Event {
        id: row.get("id")?,
        ts: row.get("ts")?,
        event_type,
        actor: row.get("actor")?,
        mission_id: row.get("mission_id")?,
        module_id: row.get("module_id")?,
        task_id: row.get("task_id")?,
        slice_id: row.get("slice_id")?,
        payload,
        artifact_refs,
        repo_git_head: row.get("repo_git_head")?,
        engine_version: row.get("engine_version")?,
    })
}

fn db_lock_map() -> &'static Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn get_db_lock(db_path: &Path) -> Arc<Mutex<()>> {
    let mut map = db_lock_map().lock().unwrap_or_else(|e| e.into_inner());
    map.entry(db_path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::EventType;
    use crate::core::time;
    use tempfile::tempdir;

    fn sample_event(event_type: EventType, task_id: &str) -> Event {
        Event {
            id: time::new_id(),
            ts: time::now_epoch_z(),
            event_type,
            actor: "test".into(),
            mission_id: None,
            module_id: None,
            task_id: Some(task_id.to_string()),
            slice_id: None,
            payload: serde_json::json!({}),
            artifact_refs: vec![],
            repo_git_head: None,
            engine_version: "0.1.0".into(),
        }
    }

    #[test]
    fn append_and_iter_preserves_insertion_order() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(&dir.path().join("eventlog")).unwrap();
        for i in 0..5 {
            log.append(&sample_event(EventType::TaskCreated, &format!("T-{:04}", i)))
                .unwrap();
        }
        let events = log.iter_chronological().unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].task_id.as_deref(), Some("T-0000"));
        assert_eq!(events[4].task_id.as_deref(), Some("T-0004"));
    }

    #[test]
    fn tail_filters_by_task_id() {
        let dir = tempdir().unwrap();
        let log = EventLog::open(&dir.path().join("eventlog")).unwrap();
        log.append(&sample_event(EventType::TaskCreated, "T-0001")).unwrap();
        log.append(&sample_event(EventType::TaskCreated, "T-0002")).unwrap();
        let filter = EventFilter {
            task_id: Some("T-0002".into()),
            ..Default::default()
        };
        let tail = log.tail(&filter, 10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].task_id.as_deref(), Some("T-0002"));
    }

    #[test]
    fn concurrent_appends_preserve_all_events() {
        use std::sync::Arc as StdArc;
        use std::thread;
        let dir = tempdir().unwrap();
        let log = StdArc::new(EventLog::open(&dir.path().join("eventlog")).unwrap());
        let mut handles = vec![];
        for i in 0..8 {
            let log = log.clone();
            handles.push(thread::spawn(move || {
                log.append(&sample_event(EventType::IncidentLogged, &format!("T-{:04}", i)))
                    .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let events = log.iter_chronological().unwrap();
        assert_eq!(events.len(), 8);
        let ids: std::collections::HashSet<_> = events.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids.len(), 8);
    }
}

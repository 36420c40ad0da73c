//! Event Store Integration Tests
//!
//! Tests for the JSONL log format, the cursor tail protocol and the runs
//! fingerprint.

use std::io::Write;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use officeflow::core::event_store::{tail_file, EVENTS_FILE};
use officeflow::core::{EventStore, LogError, RunsRoot};
use officeflow::domain::{
    AgentState, AgentStatusUpdate, EventBody, EventType, Level, RunEvent, RunFinished, RunStarted,
    RunState, StageStarted, ValidationError,
};
use tempfile::TempDir;

fn started(run_id: &str) -> RunEvent {
    RunEvent::new(
        run_id,
        EventBody::RunStarted(RunStarted {
            goal: "ship it".to_string(),
        }),
    )
}

fn stage(run_id: &str, name: &str) -> RunEvent {
    RunEvent::new(
        run_id,
        EventBody::StageStarted(StageStarted {
            stage: name.to_string(),
        }),
    )
    .in_stage(name)
}

#[tokio::test]
async fn test_append_format_is_one_json_object_per_line() {
    let temp = TempDir::new().unwrap();
    let store = EventStore::open(temp.path(), "run-1").await.unwrap();

    let event = stage("run-1", "SPEC").with_level(Level::Warn);
    store.append(&event).await.unwrap();

    let raw = std::fs::read_to_string(store.events_path()).unwrap();
    assert!(raw.ends_with('\n'));
    assert_eq!(raw.lines().count(), 1);

    let json: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
    assert_eq!(json["id"], event.id.as_str());
    assert_eq!(json["runId"], "run-1");
    assert_eq!(json["type"], "stage_started");
    assert_eq!(json["level"], "warn");
    assert_eq!(json["stage"], "SPEC");
    assert_eq!(json["payload"]["stage"], "SPEC");
}

#[tokio::test]
async fn test_read_all_preserves_append_order() {
    let temp = TempDir::new().unwrap();
    let store = EventStore::open(temp.path(), "run-1").await.unwrap();

    let events = vec![
        started("run-1"),
        stage("run-1", "SPEC"),
        stage("run-1", "IMPLEMENT"),
    ];
    for event in &events {
        store.append(event).await.unwrap();
    }

    let read = store.read_all().await.unwrap();
    assert_eq!(read, events);
    assert_eq!(read[0].event_type(), EventType::RunStarted);
}

#[tokio::test]
async fn test_invalid_events_are_rejected_before_writing() {
    let temp = TempDir::new().unwrap();
    let store = EventStore::open(temp.path(), "run-1").await.unwrap();

    let mut event = started("run-1");
    event.id = String::new();

    let err = store.append(&event).await.unwrap_err();
    assert!(matches!(
        err,
        LogError::Validation(ValidationError::EmptyField(_))
    ));
    assert!(store.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tail_consumes_only_complete_lines() {
    let temp = TempDir::new().unwrap();
    let store = EventStore::open(temp.path(), "run-1").await.unwrap();

    store.append(&started("run-1")).await.unwrap();
    let first = store.tail(0).await.unwrap();
    assert_eq!(first.events.len(), 1);

    // Simulate a writer that has flushed half a line
    let partial = serde_json::to_string(&stage("run-1", "SPEC")).unwrap();
    let (head, tail) = partial.split_at(partial.len() / 2);
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.events_path())
            .unwrap();
        file.write_all(head.as_bytes()).unwrap();
    }

    let second = store.tail(first.cursor).await.unwrap();
    assert!(second.events.is_empty());
    assert_eq!(second.cursor, first.cursor);
    assert!(!second.reset);

    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.events_path())
            .unwrap();
        file.write_all(tail.as_bytes()).unwrap();
        file.write_all(b"\n").unwrap();
    }

    let third = store.tail(second.cursor).await.unwrap();
    assert_eq!(third.events.len(), 1);
    assert_eq!(third.events[0].event_type(), EventType::StageStarted);

    let size = std::fs::metadata(store.events_path()).unwrap().len();
    assert_eq!(third.cursor, size);
}

#[tokio::test]
async fn test_tail_resets_after_truncation() {
    let temp = TempDir::new().unwrap();
    let store = EventStore::open(temp.path(), "run-1").await.unwrap();

    for name in ["SPEC", "IMPLEMENT", "TEST"] {
        store.append(&stage("run-1", name)).await.unwrap();
    }
    let read = store.tail(0).await.unwrap();
    assert_eq!(read.events.len(), 3);

    // Rewrite the log with a single line
    let line = serde_json::to_string(&started("run-1")).unwrap();
    std::fs::write(store.events_path(), format!("{}\n", line)).unwrap();

    let after = store.tail(read.cursor).await.unwrap();
    assert!(after.reset);
    assert_eq!(after.events.len(), 1);
    assert_eq!(after.events[0].event_type(), EventType::RunStarted);
    assert_eq!(after.cursor, line.len() as u64 + 1);
}

#[tokio::test]
async fn test_tail_missing_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nope").join(EVENTS_FILE);

    let fresh = tail_file(&path, 0).await.unwrap();
    assert!(fresh.events.is_empty());
    assert_eq!(fresh.cursor, 0);
    assert!(!fresh.reset);

    let gone = tail_file(&path, 120).await.unwrap();
    assert!(gone.reset);
    assert_eq!(gone.cursor, 0);
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let temp = TempDir::new().unwrap();
    let store = EventStore::open(temp.path(), "run-1").await.unwrap();

    store.append(&started("run-1")).await.unwrap();
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.events_path())
            .unwrap();
        file.write_all(b"{not json}\n\n").unwrap();
    }
    store.append(&stage("run-1", "SPEC")).await.unwrap();

    let read = store.tail(0).await.unwrap();
    assert_eq!(read.events.len(), 2);
}

#[tokio::test]
async fn test_invalid_utf8_lines_are_skipped() {
    let temp = TempDir::new().unwrap();
    let store = EventStore::open(temp.path(), "run-1").await.unwrap();

    store.append(&stage("run-1", "SPEC")).await.unwrap();

    // Well-formed JSON apart from a stray byte inside the goal string
    let line = serde_json::to_string(&started("run-1")).unwrap();
    let corrupted = line.replace("ship it", "ship \u{1} it").into_bytes();
    let corrupted: Vec<u8> = corrupted
        .into_iter()
        .map(|b| if b == 0x01 { 0xff } else { b })
        .collect();
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.events_path())
            .unwrap();
        file.write_all(&corrupted).unwrap();
        file.write_all(b"\n").unwrap();
    }
    store.append(&stage("run-1", "IMPLEMENT")).await.unwrap();

    let read = store.tail(0).await.unwrap();
    assert_eq!(read.events.len(), 2);
    assert!(read
        .events
        .iter()
        .all(|e| e.event_type() == EventType::StageStarted));

    let size = std::fs::metadata(store.events_path()).unwrap().len();
    assert_eq!(read.cursor, size);
    assert_eq!(store.read_all().await.unwrap(), read.events);
}

#[tokio::test]
async fn test_fingerprint_tracks_size_and_mtime() {
    let temp = TempDir::new().unwrap();
    let runs = RunsRoot::new(temp.path());

    assert_eq!(runs.fingerprint().await.unwrap(), "");

    let b = EventStore::open(temp.path(), "run-b").await.unwrap();
    let a = EventStore::open(temp.path(), "run-a").await.unwrap();
    b.append(&started("run-b")).await.unwrap();
    a.append(&started("run-a")).await.unwrap();

    let pinned = FileTime::from_system_time(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
    filetime::set_file_mtime(a.events_path(), pinned).unwrap();
    filetime::set_file_mtime(b.events_path(), pinned).unwrap();

    let first = runs.fingerprint().await.unwrap();
    let parts: Vec<&str> = first.split('|').collect();
    assert_eq!(parts.len(), 2);
    assert!(parts[0].starts_with("run-a:"));
    assert!(parts[0].ends_with(":1000000"));
    assert!(parts[1].starts_with("run-b:"));

    // Stable without changes
    assert_eq!(runs.fingerprint().await.unwrap(), first);

    // Touching a log changes it even at equal size
    let later = FileTime::from_system_time(SystemTime::UNIX_EPOCH + Duration::from_secs(2_000));
    filetime::set_file_mtime(a.events_path(), later).unwrap();
    let touched = runs.fingerprint().await.unwrap();
    assert_ne!(touched, first);

    // Growing a log changes it
    a.append(&stage("run-a", "SPEC")).await.unwrap();
    filetime::set_file_mtime(a.events_path(), later).unwrap();
    assert_ne!(runs.fingerprint().await.unwrap(), touched);
}

#[tokio::test]
async fn test_summaries_are_folded_from_history() {
    let temp = TempDir::new().unwrap();
    let runs = RunsRoot::new(temp.path());

    let done = EventStore::open(temp.path(), "run-done").await.unwrap();
    done.append(&started("run-done")).await.unwrap();
    done.append(&RunEvent::new(
        "run-done",
        EventBody::RunFinished(RunFinished {
            goal: "ship it".to_string(),
            status: None,
        }),
    ))
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;

    let blocked = EventStore::open(temp.path(), "run-blocked").await.unwrap();
    blocked.append(&started("run-blocked")).await.unwrap();
    blocked
        .append(
            &RunEvent::new(
                "run-blocked",
                EventBody::AgentStatus(AgentStatusUpdate {
                    status: AgentState::Blocked,
                    message: Some("approval".to_string()),
                }),
            )
            .in_stage("IMPLEMENT"),
        )
        .await
        .unwrap();

    // A run directory without events is not summarized
    EventStore::open(temp.path(), "run-empty").await.unwrap();

    let summaries = runs.summaries().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].run_id, "run-blocked");
    assert_eq!(summaries[0].status, RunState::Blocked);
    assert_eq!(summaries[1].run_id, "run-done");
    assert_eq!(summaries[1].status, RunState::Done);

    assert_eq!(
        runs.list_runs().await.unwrap(),
        vec!["run-blocked", "run-done", "run-empty"]
    );
}

#[tokio::test]
async fn test_tail_while_writing_matches_read_all() {
    let temp = TempDir::new().unwrap();
    let store = std::sync::Arc::new(EventStore::open(temp.path(), "run-1").await.unwrap());

    let writer = {
        let store = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            for i in 0..60 {
                store
                    .append(&stage("run-1", &format!("STAGE_{}", i)))
                    .await
                    .unwrap();
                if i % 7 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let mut seen = Vec::new();
    let mut cursor = 0;
    while !writer.is_finished() {
        let delta = store.tail(cursor).await.unwrap();
        assert!(!delta.reset);
        cursor = delta.cursor;
        seen.extend(delta.events);
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    let rest = store.tail(cursor).await.unwrap();
    seen.extend(rest.events);

    assert_eq!(seen, store.read_all().await.unwrap());
    assert_eq!(seen.len(), 60);
}

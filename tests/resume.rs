//! Bookmark resume and truncation tests.

use evtail::{
    Bookmark, EventLogClient, EventRecord, FileBookmarkStore, MemoryEventLog, ResumeOutcome,
    StartPosition, SubscriptionConfig, SubscriptionManager, SyntheticEvent, Tail, TailError,
    TailEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

fn setup() -> (Arc<MemoryEventLog>, SubscriptionManager) {
    let log = Arc::new(MemoryEventLog::new());
    log.create_channel("Application");
    let manager = SubscriptionManager::new(EventLogClient::new(log.clone())).unwrap();
    (log, manager)
}

fn append(log: &MemoryEventLog, count: u16) {
    for id in 0..count {
        log.append("Application", SyntheticEvent::new("p", id)).unwrap();
    }
}

fn next_record(tail: &Tail) -> EventRecord {
    match tail.recv_timeout(WAIT) {
        Ok(TailEvent::Record(record)) => *record,
        other => panic!("expected a record, got {:?}", other),
    }
}

/// Replay the channel from the start and return the bookmark after the
/// `n`th record.
fn bookmark_after(manager: &SubscriptionManager, n: usize) -> Bookmark {
    let tail = manager
        .subscribe(SubscriptionConfig::channel("Application").with_start(StartPosition::OldestRecord))
        .unwrap();
    let mut bookmark = None;
    for _ in 0..n {
        bookmark = next_record(&tail).bookmark;
    }
    manager.close(tail.id).unwrap();
    bookmark.unwrap()
}

fn resume(manager: &SubscriptionManager, bookmark: Bookmark) -> Tail {
    manager
        .subscribe(
            SubscriptionConfig::channel("Application")
                .with_start(StartPosition::AfterBookmark(bookmark)),
        )
        .unwrap()
}

#[test]
fn test_resume_starts_after_bookmarked_record() {
    let (log, manager) = setup();
    append(&log, 5);

    let bookmark = bookmark_after(&manager, 5);
    append(&log, 2);

    let tail = resume(&manager, bookmark);
    assert_eq!(tail.resume(), ResumeOutcome::Resumed);
    assert_eq!(next_record(&tail).record_id, 6);
    assert_eq!(next_record(&tail).record_id, 7);
}

#[test]
fn test_resume_at_head_waits_for_new_records() {
    let (log, manager) = setup();
    append(&log, 3);
    let bookmark = bookmark_after(&manager, 3);

    let tail = resume(&manager, bookmark.clone());
    assert!(tail.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(tail.last_bookmark(), Some(bookmark));

    append(&log, 1);
    assert_eq!(next_record(&tail).record_id, 4);
}

#[test]
fn test_bookmarks_advance_per_record() {
    let (log, manager) = setup();
    append(&log, 3);

    let tail = manager
        .subscribe(SubscriptionConfig::channel("Application").with_start(StartPosition::OldestRecord))
        .unwrap();
    let bookmarks: Vec<Bookmark> = (0..3)
        .map(|_| next_record(&tail).bookmark.unwrap())
        .collect();

    assert_ne!(bookmarks[0], bookmarks[1]);
    assert_ne!(bookmarks[1], bookmarks[2]);
    assert!(bookmarks[2].as_xml().contains("RecordId='3'"));
    assert_eq!(tail.last_bookmark(), Some(bookmarks[2].clone()));
}

#[test]
fn test_truncated_bookmark_clamps_to_oldest() {
    let (log, manager) = setup();
    append(&log, 10);
    let bookmark = bookmark_after(&manager, 3);

    log.truncate_before("Application", 7).unwrap();

    let tail = resume(&manager, bookmark);
    assert_eq!(tail.resume(), ResumeOutcome::Clamped);
    match tail.recv_timeout(WAIT) {
        Ok(TailEvent::Notice(TailError::TruncatedClamped { channel })) => {
            assert_eq!(channel, "Application")
        }
        other => panic!("expected a clamp notice, got {:?}", other),
    }

    let first = next_record(&tail);
    assert!(first.record_id >= 7);
    assert_eq!(first.record_id, 7);
    assert!(!tail.is_dead());
}

#[test]
fn test_retention_eviction_clamps() {
    let (log, manager) = setup();
    append(&log, 4);
    let bookmark = bookmark_after(&manager, 1);

    log.set_retention("Application", Some(2)).unwrap();

    let tail = resume(&manager, bookmark);
    assert_eq!(tail.resume(), ResumeOutcome::Clamped);
    assert!(matches!(tail.recv_timeout(WAIT), Ok(TailEvent::Notice(_))));
    assert_eq!(next_record(&tail).record_id, 3);
    assert_eq!(next_record(&tail).record_id, 4);
}

#[test]
fn test_cleared_log_clamps_to_new_records() {
    let (log, manager) = setup();
    append(&log, 3);
    let bookmark = bookmark_after(&manager, 1);

    log.clear("Application").unwrap();
    let tail = resume(&manager, bookmark);
    assert_eq!(tail.resume(), ResumeOutcome::Clamped);
    assert!(matches!(tail.recv_timeout(WAIT), Ok(TailEvent::Notice(_))));

    append(&log, 1);
    assert_eq!(next_record(&tail).record_id, 4);
}

#[test]
fn test_restart_from_persisted_bookmark() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bookmarks.json");
    let (log, manager) = setup();

    // First run: process three records, persisting after each.
    {
        let store = FileBookmarkStore::open(&path).unwrap();
        let tail = manager
            .subscribe(SubscriptionConfig::channel("Application"))
            .unwrap();
        append(&log, 3);
        for _ in 0..3 {
            let record = next_record(&tail);
            store
                .save("Application", record.bookmark.as_ref().unwrap())
                .unwrap();
        }
        manager.close(tail.id).unwrap();
    }

    // Records written while nothing was tailing.
    append(&log, 2);

    // Second run picks up exactly where the first stopped.
    let store = FileBookmarkStore::open(&path).unwrap();
    let start = store
        .load("Application")
        .map_or(StartPosition::FutureEvents, StartPosition::AfterBookmark);
    let tail = manager
        .subscribe(SubscriptionConfig::channel("Application").with_start(start))
        .unwrap();

    assert_eq!(tail.resume(), ResumeOutcome::Resumed);
    assert_eq!(next_record(&tail).record_id, 4);
    assert_eq!(next_record(&tail).record_id, 5);
    assert!(tail.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn test_malformed_bookmark_rejected() {
    let (_log, manager) = setup();
    let result = manager.subscribe(
        SubscriptionConfig::channel("Application")
            .with_start(StartPosition::AfterBookmark(Bookmark::from_xml("not a bookmark"))),
    );
    assert!(matches!(result, Err(TailError::Fatal { .. })));
    assert_eq!(manager.subscription_count(), 0);
}

//! Session log lifecycle: start → append* → finalize, plus the index.

use fableforge::session_log::{GenerationLogger, LogEntry, SessionLogError, SessionStatus};

#[test]
fn finalize_counts_every_append() {
    let dir = tempfile::tempdir().unwrap();
    let logger = GenerationLogger::new(dir.path());
    logger.start_session("A Robot Gains Emotions").unwrap();

    for i in 0..7 {
        logger
            .append(
                LogEntry::new("chapter_generation", format!("chapter {i}"))
                    .with_exchange("prompt", "response")
                    .with_duration_ms(120)
                    .with_token_usage(Some(100), Some(400)),
            )
            .unwrap();
    }
    let summary = logger.finalize(SessionStatus::Completed).unwrap();

    assert_eq!(summary.total_entries, 7);
    assert_eq!(summary.entries_by_step_type["chapter_generation"], 7);
    assert_eq!(summary.status, SessionStatus::Completed);
}

#[test]
fn document_round_trips_through_the_index() {
    let dir = tempfile::tempdir().unwrap();
    let logger = GenerationLogger::new(dir.path());
    let session_id = logger.start_session("the drowned archive").unwrap();

    logger
        .append(
            LogEntry::new("concept_expansion", "concept expansion")
                .with_exchange("expand this", "{\"theme\": \"memory\"}"),
        )
        .unwrap();
    logger.finalize(SessionStatus::Completed).unwrap();

    let document = logger.load_session(&session_id).unwrap().unwrap();
    assert_eq!(document.session_info.session_id, session_id);
    assert_eq!(document.entries.len(), 1);
    assert_eq!(document.entries[0].prompt, "expand this");
    assert_eq!(document.entries[0].token_usage.prompt_tokens, 2);
    assert!(document.summary.is_some());

    let file_name = document
        .session_info
        .log_file
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();
    assert!(file_name.starts_with("the_drowned_archive_"));
    assert!(file_name.ends_with(&format!("{session_id}.json")));
}

#[test]
fn sessions_index_tracks_multiple_runs() {
    let dir = tempfile::tempdir().unwrap();
    let logger = GenerationLogger::new(dir.path());

    let first = logger.start_session("first book").unwrap();
    logger.finalize(SessionStatus::Failed).unwrap();
    let second = logger.start_session("second book").unwrap();
    logger.finalize(SessionStatus::Completed).unwrap();

    let sessions = logger.list_sessions().unwrap();
    assert_eq!(sessions.len(), 2);
    let statuses: Vec<(String, SessionStatus)> = sessions
        .iter()
        .map(|s| (s.session_id.clone(), s.status))
        .collect();
    assert!(statuses.contains(&(first, SessionStatus::Failed)));
    assert!(statuses.contains(&(second, SessionStatus::Completed)));
}

#[test]
fn append_without_session_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let logger = GenerationLogger::new(dir.path());
    let err = logger
        .append(LogEntry::new("general", "orphan"))
        .unwrap_err();
    assert!(matches!(err, SessionLogError::NoActiveSession));
}

#[test]
fn finalize_without_session_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let logger = GenerationLogger::new(dir.path());
    assert!(logger.finalize(SessionStatus::Completed).is_err());
}

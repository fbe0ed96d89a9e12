#![forbid(unsafe_code)]

use tl_storage::{ArtifactStore, CONTENT_FILE, PROGRESS_FILE, ResumeOutcome, StoreError};
use std::io::Write as _;
use std::path::PathBuf;
use tl_core::model::ArtifactType;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("tl_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

const TEN_MIB: u64 = 10 * 1024 * 1024;

#[test]
fn session_streams_appends_and_finalizes() {
    let dir = temp_dir("session_streams_appends_and_finalizes");
    let store = ArtifactStore::new(&dir, TEN_MIB);

    let mut session = store
        .create_session("task-000001", "art-000001", ArtifactType::Analysis)
        .expect("create session");
    store.append(&mut session, b"hello ").expect("append");
    let offset = store.append(&mut session, b"world").expect("append");
    assert_eq!(offset, 11);

    let source = dir.join("notes.txt");
    std::fs::write(&source, "original notes").expect("write source");
    let report = store
        .mirror_originals(&session, &[source, dir.join("missing.txt")])
        .expect("mirror");
    assert_eq!(report.copied.len(), 1);
    assert_eq!(report.missing.len(), 1);

    let reference = store.finalize(session).expect("finalize");
    assert_eq!(reference.task_id, "task-000001");
    assert_eq!(reference.artifact_id, "art-000001");
    assert_eq!(reference.artifact_type, ArtifactType::Analysis);
    assert_eq!(reference.size_bytes, 11);
    assert_eq!(
        reference.digest,
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );

    let artifact_dir = dir.join("artifacts/task-000001/art-000001");
    assert!(artifact_dir.join(CONTENT_FILE).exists());
    assert!(!artifact_dir.join("content.md.partial").exists());
    assert!(!artifact_dir.join(PROGRESS_FILE).exists());
    assert!(artifact_dir.join("files/notes.txt").exists());

    let bytes = store.read("task-000001", "art-000001").expect("read");
    assert_eq!(bytes, b"hello world");

    let err = store
        .create_session("task-000001", "art-000001", ArtifactType::Analysis)
        .expect_err("finalized ids cannot be reopened");
    match err {
        StoreError::InvalidInput(msg) => assert_eq!(msg, "artifact is already finalized"),
        other => panic!("expected InvalidInput, got {other:?}"),
    }
}

#[test]
fn read_hides_unfinalized_and_missing_artifacts() {
    let dir = temp_dir("read_hides_unfinalized_and_missing_artifacts");
    let store = ArtifactStore::new(&dir, TEN_MIB);

    let mut session = store
        .create_session("task-000001", "art-000001", ArtifactType::Code)
        .expect("create session");
    store.append(&mut session, b"partial").expect("append");

    let err = store
        .read("task-000001", "art-000001")
        .expect_err("staging is invisible");
    match err {
        StoreError::ArtifactNotFinalized => {}
        other => panic!("expected ArtifactNotFinalized, got {other:?}"),
    }

    let err = store
        .read("task-000001", "art-000099")
        .expect_err("missing artifact");
    match err {
        StoreError::UnknownArtifact => {}
        other => panic!("expected UnknownArtifact, got {other:?}"),
    }
}

#[test]
fn oversize_append_fails_and_leaves_staging_intact() {
    let dir = temp_dir("oversize_append_fails_and_leaves_staging_intact");
    let store = ArtifactStore::new(&dir, 8);

    let mut session = store
        .create_session("task-000001", "art-000001", ArtifactType::General)
        .expect("create session");
    store.append(&mut session, b"12345").expect("small append");

    let err = store
        .append(&mut session, b"67890")
        .expect_err("over the limit");
    match err {
        StoreError::ArtifactTooLarge { size, max } => {
            assert_eq!(size, 10);
            assert_eq!(max, 8);
        }
        other => panic!("expected ArtifactTooLarge, got {other:?}"),
    }
    assert_eq!(session.offset(), 5, "rejected append writes nothing");

    store.append(&mut session, b"678").expect("fitting append");
    let reference = store.finalize(session).expect("finalize");
    assert_eq!(reference.size_bytes, 8);
}

#[test]
fn resume_reopens_at_the_last_checkpoint() {
    let dir = temp_dir("resume_reopens_at_the_last_checkpoint");
    let store = ArtifactStore::new(&dir, TEN_MIB);

    {
        let mut session = store
            .create_session("task-000001", "art-000001", ArtifactType::Documentation)
            .expect("create session");
        store.append(&mut session, b"hello").expect("append");
        // Session dropped without finalize, as after a crash.
    }

    let outcome = store.resume("task-000001", "art-000001").expect("resume");
    let mut session = match outcome {
        ResumeOutcome::Resumed(session) => session,
        other => panic!("expected Resumed, got {other:?}"),
    };
    assert_eq!(session.offset(), 5);
    assert_eq!(session.artifact_type(), ArtifactType::Documentation);

    store.append(&mut session, b" world").expect("append");
    let reference = store.finalize(session).expect("finalize");
    assert_eq!(reference.size_bytes, 11);
    let bytes = store.read("task-000001", "art-000001").expect("read");
    assert_eq!(bytes, b"hello world");
}

#[test]
fn resume_truncates_bytes_past_the_checkpoint() {
    let dir = temp_dir("resume_truncates_bytes_past_the_checkpoint");
    let store = ArtifactStore::new(&dir, TEN_MIB);

    {
        let mut session = store
            .create_session("task-000001", "art-000001", ArtifactType::Code)
            .expect("create session");
        store.append(&mut session, b"confirmed").expect("append");
    }

    // A write that died before its progress update: bytes on disk past the
    // recorded offset.
    let staging = dir.join("artifacts/task-000001/art-000001/content.md.partial");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&staging)
        .expect("open staging");
    file.write_all(b" torn").expect("append torn bytes");
    drop(file);

    let outcome = store.resume("task-000001", "art-000001").expect("resume");
    let session = match outcome {
        ResumeOutcome::Resumed(session) => session,
        other => panic!("expected Resumed, got {other:?}"),
    };
    assert_eq!(session.offset(), 9);

    let reference = store.finalize(session).expect("finalize");
    assert_eq!(reference.size_bytes, 9);
    let bytes = store.read("task-000001", "art-000001").expect("read");
    assert_eq!(bytes, b"confirmed");
}

#[test]
fn resume_discards_sessions_with_corrupt_progress() {
    let dir = temp_dir("resume_discards_sessions_with_corrupt_progress");
    let store = ArtifactStore::new(&dir, TEN_MIB);

    {
        let mut session = store
            .create_session("task-000001", "art-000001", ArtifactType::Test)
            .expect("create session");
        store.append(&mut session, b"doomed").expect("append");
    }

    let artifact_dir = dir.join("artifacts/task-000001/art-000001");
    std::fs::write(artifact_dir.join(PROGRESS_FILE), "{ not json").expect("corrupt progress");

    let err = store
        .resume("task-000001", "art-000001")
        .expect_err("corrupt progress reports loss");
    match err {
        StoreError::ArtifactSessionLost { reason } => {
            assert!(reason.contains("art-000001"), "reason names the artifact: {reason}");
        }
        other => panic!("expected ArtifactSessionLost, got {other:?}"),
    }
    assert!(!artifact_dir.exists(), "the lost session is discarded");

    let outcome = store.resume("task-000001", "art-000001").expect("resume again");
    match outcome {
        ResumeOutcome::NothingToResume => {}
        other => panic!("expected NothingToResume, got {other:?}"),
    }
}

#[test]
fn resume_recognizes_finalized_artifacts() {
    let dir = temp_dir("resume_recognizes_finalized_artifacts");
    let store = ArtifactStore::new(&dir, TEN_MIB);

    let mut session = store
        .create_session("task-000001", "art-000001", ArtifactType::Design)
        .expect("create session");
    store.append(&mut session, b"final").expect("append");
    store.finalize(session).expect("finalize");

    let outcome = store.resume("task-000001", "art-000001").expect("resume");
    match outcome {
        ResumeOutcome::AlreadyFinalized { size_bytes, .. } => assert_eq!(size_bytes, 5),
        other => panic!("expected AlreadyFinalized, got {other:?}"),
    }
}

#[test]
fn list_sessions_and_purge_staging() {
    let dir = temp_dir("list_sessions_and_purge_staging");
    let store = ArtifactStore::new(&dir, TEN_MIB);

    let mut finished = store
        .create_session("task-000001", "art-000001", ArtifactType::Analysis)
        .expect("session one");
    store.append(&mut finished, b"done").expect("append");
    store.finalize(finished).expect("finalize");

    let mut hanging_a = store
        .create_session("task-000002", "art-000002", ArtifactType::Code)
        .expect("session two");
    store.append(&mut hanging_a, b"aa").expect("append");
    let mut hanging_b = store
        .create_session("task-000001", "art-000003", ArtifactType::Code)
        .expect("session three");
    store.append(&mut hanging_b, b"bbb").expect("append");

    let sessions = store.list_sessions().expect("list");
    let keys: Vec<(&str, &str)> = sessions
        .iter()
        .map(|s| (s.task_id.as_str(), s.artifact_id.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![("task-000001", "art-000003"), ("task-000002", "art-000002")],
        "finalized artifacts are not sessions; order is deterministic"
    );
    assert_eq!(sessions[0].offset, 3);

    let removed = store.purge_stale_staging(0).expect("purge staging");
    assert_eq!(removed.len(), 2);
    assert!(store.list_sessions().expect("list").is_empty());
    store
        .read("task-000001", "art-000001")
        .expect("finalized artifact survives the sweep");

    assert!(store.purge("task-000001").expect("purge task"));
    let err = store
        .read("task-000001", "art-000001")
        .expect_err("purged with the task");
    match err {
        StoreError::UnknownArtifact => {}
        other => panic!("expected UnknownArtifact, got {other:?}"),
    }
    assert!(!store.purge("task-000099").expect("purge unknown"));
}

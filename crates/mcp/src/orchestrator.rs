#![forbid(unsafe_code)]

use crate::config::{self, Config};
use crate::maintenance::MaintenanceCoordinator;
use crate::shutdown::ShutdownCoordinator;
use crate::specialists::SpecialistRegistry;
use crate::support::oplog::OperationLog;
use crate::support::time::now_ms;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tl_storage::{ArtifactStore, ResumeOutcome, SqliteStore, StoreError, StoreLimits};

/// Everything a tool handler can touch, opened once per process against
/// one storage directory.
pub(crate) struct OrchestratorCore {
    pub(crate) store: SqliteStore,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) specialists: SpecialistRegistry,
    pub(crate) config: Config,
    pub(crate) oplog: OperationLog,
    pub(crate) shutdown: ShutdownCoordinator,
    pub(crate) maintenance: MaintenanceCoordinator,
    pub(crate) storage_dir: PathBuf,
    pub(crate) started_at_ms: i64,
    /// What startup restore found, echoed by initialize_session.
    pub(crate) restore_report: Value,
    pub(crate) config_notes: Vec<String>,
}

impl OrchestratorCore {
    pub(crate) fn open(storage_dir: &Path) -> Result<Self, StoreError> {
        let loaded = config::load(storage_dir);
        let config = loaded.config;
        let mut notes = loaded.notes;
        if let Some(url) = &config.database_url
            && Path::new(url) != storage_dir
        {
            notes.push(format!(
                "database.url `{url}` ignored; storage directory pinned to {}",
                storage_dir.display()
            ));
        }

        let limits = StoreLimits {
            max_depth: config.max_depth,
            max_subtasks: config.max_subtasks,
        };
        let mut store = SqliteStore::open(storage_dir, limits)?;
        let artifacts = ArtifactStore::new(storage_dir, config.artifact_max_bytes);
        let specialists = SpecialistRegistry::load(config.specialists_file.as_deref());
        let oplog = OperationLog::new(storage_dir, config.log_level);

        let restore_report = restore_startup_state(&mut store, &artifacts, storage_dir, &oplog)?;
        oplog.info(
            "startup",
            &json!({
                "storage_dir": storage_dir.display().to_string(),
                "schema_version": store.schema_version()?,
                "log_level": config.log_level.as_str(),
                "restore": restore_report,
            }),
        );

        Ok(Self {
            store,
            artifacts,
            specialists,
            config,
            oplog,
            shutdown: ShutdownCoordinator::new(),
            maintenance: MaintenanceCoordinator::new(),
            storage_dir: storage_dir.to_path_buf(),
            started_at_ms: now_ms(),
            restore_report,
            config_notes: notes,
        })
    }

    /// Path of a finalized artifact relative to the storage directory,
    /// the form recorded in the database.
    pub(crate) fn relative_artifact_path(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.storage_dir)
            .unwrap_or(absolute)
            .to_string_lossy()
            .into_owned()
    }
}

/// Replays persisted startup state: reads the snapshot when one exists,
/// reopens interrupted artifact sessions at their checkpoints, and
/// clears a maintenance flag left behind by an interrupted shutdown
/// once the on-disk state proves readable.
fn restore_startup_state(
    store: &mut SqliteStore,
    artifacts: &ArtifactStore,
    storage_dir: &Path,
    oplog: &OperationLog,
) -> Result<Value, StoreError> {
    let mut report = json!({ "snapshot": "absent" });

    let snapshot = match tl_storage::read_snapshot(storage_dir) {
        Ok(found) => found,
        Err(StoreError::CorruptSnapshot { detail }) => {
            report = json!({ "snapshot": "corrupt", "detail": detail });
            None
        }
        Err(err) => return Err(err),
    };

    if let Some(snapshot) = snapshot {
        let mut sessions = Vec::new();
        for artifact in &snapshot.artifacts {
            let entry = match artifacts.resume(&artifact.task_id, &artifact.artifact_id) {
                Ok(ResumeOutcome::Resumed(session)) => json!({
                    "task_id": artifact.task_id,
                    "artifact_id": artifact.artifact_id,
                    "state": "resumed",
                    "offset": session.offset(),
                }),
                Ok(ResumeOutcome::AlreadyFinalized { size_bytes, .. }) => json!({
                    "task_id": artifact.task_id,
                    "artifact_id": artifact.artifact_id,
                    "state": "finalized",
                    "size_bytes": size_bytes,
                }),
                Ok(ResumeOutcome::NothingToResume) => json!({
                    "task_id": artifact.task_id,
                    "artifact_id": artifact.artifact_id,
                    "state": "missing",
                }),
                Err(err) => {
                    oplog.info(
                        "restore_error",
                        &json!({
                            "task_id": artifact.task_id,
                            "artifact_id": artifact.artifact_id,
                            "detail": err.to_string(),
                        }),
                    );
                    json!({
                        "task_id": artifact.task_id,
                        "artifact_id": artifact.artifact_id,
                        "state": "lost",
                    })
                }
            };
            sessions.push(entry);
        }
        report = json!({
            "snapshot": "restored",
            "written_at_ms": snapshot.written_at_ms,
            "active_tasks": snapshot.active_tasks,
            "ready_tasks": snapshot.ready_tasks,
            "artifact_sessions": sessions,
        });
    }

    // An interrupted shutdown can leave the maintenance flag set. Clear
    // it only when no half-written snapshot remains and the snapshot
    // itself was readable.
    if store.maintenance_mode()? {
        let snapshot_readable =
            report.get("snapshot").and_then(Value::as_str) != Some("corrupt");
        if snapshot_readable && !tl_storage::snapshot_tmp_exists(storage_dir) {
            store.set_maintenance_mode(false)?;
            if let Some(fields) = report.as_object_mut() {
                fields.insert("maintenance_mode".to_string(), json!("cleared"));
            }
        } else if let Some(fields) = report.as_object_mut() {
            fields.insert("maintenance_mode".to_string(), json!("still_set"));
        }
    }

    Ok(report)
}

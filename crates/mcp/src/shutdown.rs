#![forbid(unsafe_code)]

//! Phased shutdown: quiesce, snapshot, drain, stop. Each phase advances
//! a progress percentage that `shutdown_status` reports during and after
//! the run. Once stopped, only `shutdown_status` and `get_status` answer.

use crate::support::Deadline;
use crate::support::errors::ToolError;
use crate::support::oplog::OperationLog;
use crate::support::time::{now_ms, now_rfc3339};
use serde_json::{Value, json};
use std::path::Path;
use tl_core::model::TaskStatus;
use tl_storage::{
    ArtifactStore, QueryTasksRequest, SNAPSHOT_VERSION, Snapshot, SnapshotArtifact, SqliteStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownPhase {
    Idle,
    Quiescing,
    Snapshotting,
    Draining,
    Stopped,
}

impl ShutdownPhase {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Quiescing => "quiescing",
            Self::Snapshotting => "snapshotting",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

pub(crate) struct ShutdownCoordinator {
    phase: ShutdownPhase,
    percent: u8,
    partial: bool,
    started_at_ms: Option<i64>,
    finished_at_ms: Option<i64>,
    history: Vec<Value>,
    snapshot_summary: Option<Value>,
}

impl ShutdownCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            phase: ShutdownPhase::Idle,
            percent: 0,
            partial: false,
            started_at_ms: None,
            finished_at_ms: None,
            history: Vec::new(),
            snapshot_summary: None,
        }
    }

    pub(crate) fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    /// True when the tool must be refused while shutdown is underway or
    /// finished. Status tools keep answering.
    pub(crate) fn refuses(&self, tool: &str) -> bool {
        self.phase != ShutdownPhase::Idle
            && !matches!(tool, "shutdown_status" | "get_status")
    }

    fn enter(&mut self, phase: ShutdownPhase, percent: u8, oplog: &OperationLog) {
        self.phase = phase;
        self.percent = percent;
        self.history.push(json!({
            "phase": phase.as_str(),
            "percent": percent,
            "at": now_rfc3339(),
        }));
        oplog.debug(
            "shutdown_phase",
            &json!({ "phase": phase.as_str(), "percent": percent }),
        );
    }

    /// Runs the whole sequence synchronously. An expired budget stops at
    /// the phase boundary that observed it; whatever was already
    /// persisted stays persisted.
    pub(crate) fn prepare(
        &mut self,
        store: &mut SqliteStore,
        artifacts: &ArtifactStore,
        storage_dir: &Path,
        oplog: &OperationLog,
        timeout_seconds: Option<u64>,
    ) -> Result<Value, ToolError> {
        if self.phase != ShutdownPhase::Idle {
            return Err(ToolError::new(
                "shutdown_in_progress",
                "shutdown has already been prepared",
            ));
        }
        let deadline =
            timeout_seconds.map(|seconds| Deadline::new("shutdown", seconds.saturating_mul(1_000)));
        self.started_at_ms = Some(now_ms());

        self.enter(ShutdownPhase::Quiescing, 0, oplog);
        let in_flight = store.query_tasks(&QueryTasksRequest {
            statuses: vec![TaskStatus::Active, TaskStatus::InProgress],
            ..QueryTasksRequest::default()
        })?;
        self.percent = 20;

        if self.expired(&deadline, oplog) {
            return Ok(self.stop(oplog));
        }

        self.enter(ShutdownPhase::Snapshotting, 20, oplog);
        store.set_maintenance_mode(true)?;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            written_at_ms: now_ms(),
            schema_version: store.schema_version()?,
            active_tasks: in_flight
                .tasks
                .iter()
                .map(|task| task.task_id.clone())
                .collect(),
            ready_tasks: store
                .ready_tasks(None, None, tl_storage::MAX_QUERY_LIMIT)?
                .iter()
                .map(|task| task.task_id.clone())
                .collect(),
            artifacts: artifacts
                .list_sessions()?
                .into_iter()
                .map(SnapshotArtifact::from)
                .collect(),
            counts_by_status: store
                .counts_by_status()?
                .into_iter()
                .map(|entry| (entry.status, entry.count))
                .collect(),
        };
        let path = tl_storage::write_snapshot(storage_dir, &snapshot)?;
        store.set_maintenance_mode(false)?;
        self.snapshot_summary = Some(json!({
            "path": path.display().to_string(),
            "active_tasks": snapshot.active_tasks.len(),
            "ready_tasks": snapshot.ready_tasks.len(),
            "artifact_sessions": snapshot.artifacts.len(),
        }));
        self.percent = 70;

        if self.expired(&deadline, oplog) {
            return Ok(self.stop(oplog));
        }

        self.enter(ShutdownPhase::Draining, 70, oplog);
        store.checkpoint()?;
        self.percent = 95;

        Ok(self.stop(oplog))
    }

    fn expired(&mut self, deadline: &Option<Deadline>, oplog: &OperationLog) -> bool {
        if deadline.as_ref().is_some_and(Deadline::expired) {
            self.partial = true;
            self.history.push(json!({
                "note": "timeout budget exceeded",
                "at": now_rfc3339(),
            }));
            oplog.info("shutdown_timeout", &json!({ "phase": self.phase.as_str() }));
            return true;
        }
        false
    }

    fn stop(&mut self, oplog: &OperationLog) -> Value {
        self.enter(ShutdownPhase::Stopped, self.percent.max(95), oplog);
        self.percent = 100;
        self.finished_at_ms = Some(now_ms());
        self.progress()
    }

    /// Current phase and history without the readiness probe.
    pub(crate) fn progress(&self) -> Value {
        json!({
            "phase": self.phase.as_str(),
            "percent": self.percent,
            "partial": self.partial,
            "started_at_ms": self.started_at_ms,
            "finished_at_ms": self.finished_at_ms,
            "history": self.history,
            "snapshot": self.snapshot_summary.clone().unwrap_or(Value::Null),
        })
    }

    /// Progress plus, once stopped, the on-disk readiness probe a
    /// restarting process would evaluate.
    pub(crate) fn status(
        &self,
        store: &SqliteStore,
        artifacts: &ArtifactStore,
        storage_dir: &Path,
    ) -> Result<Value, ToolError> {
        let mut status = self.progress();
        let readiness = if self.phase == ShutdownPhase::Stopped {
            restart_readiness(store, artifacts, storage_dir)?
        } else {
            Value::Null
        };
        if let Some(fields) = status.as_object_mut() {
            fields.insert("restart_readiness".to_string(), readiness);
        }
        Ok(status)
    }
}

/// Checks a would-be successor process can pick up where this one left
/// off: snapshot present and readable, schema in agreement, no torn
/// snapshot write, maintenance flag clear, staged sessions still on
/// disk, no lock held by another live process.
fn restart_readiness(
    store: &SqliteStore,
    artifacts: &ArtifactStore,
    storage_dir: &Path,
) -> Result<Value, ToolError> {
    let (snapshot_present, snapshot_readable, schema_match, sessions_intact) =
        match tl_storage::read_snapshot(storage_dir) {
            Ok(Some(snapshot)) => {
                let schema_match = snapshot.schema_version == store.schema_version()?;
                let sessions_intact = snapshot.artifacts.iter().all(|artifact| {
                    artifacts
                        .root()
                        .join(&artifact.task_id)
                        .join(&artifact.artifact_id)
                        .exists()
                });
                (true, true, schema_match, sessions_intact)
            }
            Ok(None) => (false, true, false, true),
            Err(_) => (true, false, false, true),
        };
    let no_partial_write = !tl_storage::snapshot_tmp_exists(storage_dir);
    let maintenance_clear = !store.maintenance_mode()?;
    // The lock we hold ourselves does not block a successor; only a
    // different live pid would.
    let no_foreign_lock = match tl_storage::lock_owner(storage_dir)? {
        Some(pid) => pid == std::process::id(),
        None => true,
    };
    let ready = snapshot_present
        && snapshot_readable
        && schema_match
        && sessions_intact
        && no_partial_write
        && maintenance_clear
        && no_foreign_lock;
    Ok(json!({
        "ready": ready,
        "snapshot_present": snapshot_present,
        "snapshot_readable": snapshot_readable,
        "schema_version_match": schema_match,
        "artifact_sessions_intact": sessions_intact,
        "no_partial_snapshot": no_partial_write,
        "maintenance_mode_clear": maintenance_clear,
        "no_foreign_lock": no_foreign_lock,
    }))
}

#![forbid(unsafe_code)]

//! Shutdown snapshot: a JSON image of what was in flight when the process
//! quiesced. Written via temp-and-rename so a crash mid-write leaves the
//! previous snapshot intact; the leftover `.tmp` is the signal that a
//! shutdown died between phases.

use crate::artifacts::InFlightArtifact;
use crate::store::StoreError;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const SNAPSHOT_VERSION: i64 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub version: i64,
    pub written_at_ms: i64,
    pub schema_version: i64,
    /// Tasks that were active or in_progress at quiesce time.
    pub active_tasks: Vec<String>,
    /// The scheduler's ready set at quiesce time, in scheduling order.
    pub ready_tasks: Vec<String>,
    pub artifacts: Vec<SnapshotArtifact>,
    pub counts_by_status: BTreeMap<String, i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotArtifact {
    pub task_id: String,
    pub artifact_id: String,
    pub artifact_type: String,
    pub offset: u64,
    pub seq: i64,
}

impl From<InFlightArtifact> for SnapshotArtifact {
    fn from(value: InFlightArtifact) -> Self {
        Self {
            task_id: value.task_id,
            artifact_id: value.artifact_id,
            artifact_type: value.artifact_type,
            offset: value.offset,
            seq: value.seq,
        }
    }
}

pub fn write_snapshot(storage_dir: &Path, snapshot: &Snapshot) -> Result<PathBuf, StoreError> {
    let path = storage_dir.join(SNAPSHOT_FILE);
    let text = render(snapshot).to_string();
    let tmp = tmp_path(storage_dir);
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

/// `None` when no snapshot exists. A file that exists but does not parse
/// is reported as corrupt, never silently ignored.
pub fn read_snapshot(storage_dir: &Path) -> Result<Option<Snapshot>, StoreError> {
    let text = match std::fs::read_to_string(storage_dir.join(SNAPSHOT_FILE)) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value: Value = serde_json::from_str(&text)
        .map_err(|err| corrupt(format!("not valid json: {err}")))?;
    parse(&value).map(Some)
}

/// A leftover temp file means a prior shutdown died mid-snapshot.
pub fn snapshot_tmp_exists(storage_dir: &Path) -> bool {
    tmp_path(storage_dir).exists()
}

fn tmp_path(storage_dir: &Path) -> PathBuf {
    storage_dir.join(SNAPSHOT_FILE).with_extension("json.tmp")
}

fn render(snapshot: &Snapshot) -> Value {
    let artifacts = snapshot
        .artifacts
        .iter()
        .map(|artifact| {
            json!({
                "task_id": artifact.task_id,
                "artifact_id": artifact.artifact_id,
                "artifact_type": artifact.artifact_type,
                "offset": artifact.offset,
                "seq": artifact.seq,
            })
        })
        .collect::<Vec<_>>();
    json!({
        "version": snapshot.version,
        "written_at_ms": snapshot.written_at_ms,
        "schema_version": snapshot.schema_version,
        "active_tasks": snapshot.active_tasks,
        "ready_tasks": snapshot.ready_tasks,
        "artifacts": artifacts,
        "counts_by_status": snapshot.counts_by_status,
    })
}

fn parse(value: &Value) -> Result<Snapshot, StoreError> {
    let version = require_i64(value, "version")?;
    if version > SNAPSHOT_VERSION {
        return Err(corrupt(format!(
            "version {version} is newer than supported {SNAPSHOT_VERSION}"
        )));
    }
    let mut artifacts = Vec::new();
    let raw_artifacts = value
        .get("artifacts")
        .and_then(Value::as_array)
        .ok_or_else(|| corrupt("missing or invalid artifacts"))?;
    for entry in raw_artifacts {
        artifacts.push(SnapshotArtifact {
            task_id: require_string(entry, "task_id")?,
            artifact_id: require_string(entry, "artifact_id")?,
            artifact_type: require_string(entry, "artifact_type")?,
            offset: require_i64(entry, "offset")?.max(0) as u64,
            seq: require_i64(entry, "seq")?,
        });
    }
    // Absent counts read as empty: snapshots predating the field stay
    // loadable.
    let mut counts_by_status = BTreeMap::new();
    if let Some(raw) = value.get("counts_by_status").and_then(Value::as_object) {
        for (status, count) in raw {
            let Some(count) = count.as_i64() else {
                return Err(corrupt(format!("non-integer count for {status}")));
            };
            counts_by_status.insert(status.clone(), count);
        }
    }
    Ok(Snapshot {
        version,
        written_at_ms: require_i64(value, "written_at_ms")?,
        schema_version: require_i64(value, "schema_version")?,
        active_tasks: require_string_array(value, "active_tasks")?,
        ready_tasks: require_string_array(value, "ready_tasks")?,
        artifacts,
        counts_by_status,
    })
}

fn corrupt(detail: impl Into<String>) -> StoreError {
    StoreError::CorruptSnapshot {
        detail: detail.into(),
    }
}

fn require_i64(value: &Value, key: &str) -> Result<i64, StoreError> {
    value
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| corrupt(format!("missing or invalid {key}")))
}

fn require_string(value: &Value, key: &str) -> Result<String, StoreError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| corrupt(format!("missing or invalid {key}")))
}

fn require_string_array(value: &Value, key: &str) -> Result<Vec<String>, StoreError> {
    let raw = value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| corrupt(format!("missing or invalid {key}")))?;
    let mut out = Vec::with_capacity(raw.len());
    for item in raw {
        let Some(text) = item.as_str() else {
            return Err(corrupt(format!("non-string entry in {key}")));
        };
        out.push(text.to_string());
    }
    Ok(out)
}

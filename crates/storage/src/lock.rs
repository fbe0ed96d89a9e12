#![forbid(unsafe_code)]

//! Single-writer guard for a storage directory. The lock is a small JSON
//! file next to the database recording the owning pid and acquisition
//! time; holding the struct holds the lock, dropping it removes the file.

use crate::store::StoreError;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "state.db.lock";

/// A lock this old whose owner cannot be confirmed alive is presumed
/// abandoned and reclaimed.
pub const LOCK_STALE_AFTER_MS: i64 = 60_000;

#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Claims the directory for this process. A live foreign owner wins
    /// regardless of age; a dead owner's lock is reclaimed immediately;
    /// when liveness cannot be probed the age rule decides. A lock we
    /// already own is rewritten in place.
    pub fn acquire(storage_dir: &Path, now_ms: i64) -> Result<Self, StoreError> {
        let path = storage_dir.join(LOCK_FILE);
        if let Some((pid, acquired_at_ms)) = read_lock(&path)?
            && pid != std::process::id()
        {
            let age_ms = now_ms.saturating_sub(acquired_at_ms);
            let holds = match pid_alive(pid) {
                Some(alive) => alive,
                None => age_ms < LOCK_STALE_AFTER_MS,
            };
            if holds {
                return Err(StoreError::LockHeld { pid, age_ms });
            }
        }
        write_lock(&path, std::process::id(), now_ms)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Pid recorded in the directory's lock file, if any. Readiness probes
/// use this to tell our own lock from a foreign one.
pub fn lock_owner(storage_dir: &Path) -> Result<Option<u32>, StoreError> {
    Ok(read_lock(&storage_dir.join(LOCK_FILE))?.map(|(pid, _)| pid))
}

/// `(pid, acquired_at_ms)` when the file exists and parses. A malformed
/// lock is treated as absent so a torn write cannot wedge the store.
fn read_lock(path: &Path) -> Result<Option<(u32, i64)>, StoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let Ok(value) = serde_json::from_str::<Value>(&text) else {
        return Ok(None);
    };
    let pid = value
        .get("pid")
        .and_then(Value::as_u64)
        .and_then(|raw| u32::try_from(raw).ok());
    let acquired = value.get("acquired_at_ms").and_then(Value::as_i64);
    match (pid, acquired) {
        (Some(pid), Some(acquired)) => Ok(Some((pid, acquired))),
        _ => Ok(None),
    }
}

fn write_lock(path: &Path, pid: u32, acquired_at_ms: i64) -> Result<(), StoreError> {
    let tmp = path.with_extension("lock.tmp");
    let text = serde_json::json!({
        "pid": pid,
        "acquired_at_ms": acquired_at_ms,
    })
    .to_string();
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Best-effort liveness probe. `None` where the platform offers no cheap
/// answer.
fn pid_alive(pid: u32) -> Option<bool> {
    if cfg!(target_os = "linux") {
        Some(Path::new("/proc").join(pid.to_string()).exists())
    } else {
        None
    }
}

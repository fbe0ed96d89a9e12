#![forbid(unsafe_code)]

//! Streamed, resumable artifact storage. Artifact bytes live outside the
//! state database under `artifacts/<task_id>/<artifact_id>/` so a partially
//! written artifact can never corrupt task state.
//!
//! Staging protocol: appends go to `content.md.partial`; a `progress.json`
//! sidecar records the confirmed byte offset and a sequence number after
//! every append. `finalize` writes a `COMPLETE` marker, syncs the staging
//! file, then renames it to `content.md`. The canonical name is the only
//! visibility signal readers trust.

use crate::store::{StoreError, now_ms};
use serde_json::{Value, json};
use sha2::Digest as _;
use std::fmt::Write as _;
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use tl_core::model::ArtifactType;

pub const CONTENT_FILE: &str = "content.md";
pub const PROGRESS_FILE: &str = "progress.json";
pub const STAGING_SUFFIX: &str = ".partial";

const ARTIFACTS_DIR: &str = "artifacts";
const COMPLETE_MARKER: &str = "COMPLETE";
const MIRROR_DIR: &str = "files";

#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    max_size: u64,
}

/// What a finalized artifact looks like to the rest of the system. The
/// state store records these fields; the bytes stay on disk.
#[derive(Clone, Debug)]
pub struct ArtifactReference {
    pub artifact_id: String,
    pub task_id: String,
    pub artifact_type: ArtifactType,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub digest: String,
}

/// An open staging session. Holding the session holds the write handle;
/// nothing becomes visible to readers until `finalize`.
#[derive(Debug)]
pub struct ArtifactSession {
    task_id: String,
    artifact_id: String,
    artifact_type: ArtifactType,
    dir: PathBuf,
    file: std::fs::File,
    offset: u64,
    seq: i64,
}

impl ArtifactSession {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    /// Confirmed byte offset (bytes written and checkpointed so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// A staging session observed on disk, as captured in shutdown snapshots.
#[derive(Clone, Debug)]
pub struct InFlightArtifact {
    pub task_id: String,
    pub artifact_id: String,
    pub artifact_type: String,
    pub offset: u64,
    pub seq: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, Default)]
pub struct MirrorReport {
    pub copied: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

#[derive(Debug)]
pub enum ResumeOutcome {
    Resumed(ArtifactSession),
    /// The canonical file already exists (or only the rename was missing
    /// and has been completed); there is nothing left to write.
    AlreadyFinalized {
        file_path: PathBuf,
        size_bytes: u64,
    },
    NothingToResume,
}

impl ArtifactStore {
    pub fn new(storage_dir: impl AsRef<Path>, max_size: u64) -> Self {
        Self {
            root: storage_dir.as_ref().join(ARTIFACTS_DIR),
            max_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn artifact_dir(&self, task_id: &str, artifact_id: &str) -> PathBuf {
        self.root.join(task_id).join(artifact_id)
    }

    /// Establishes a staging directory for a freshly minted artifact id
    /// and returns the write handle. Refuses ids that already finalized.
    pub fn create_session(
        &self,
        task_id: &str,
        artifact_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<ArtifactSession, StoreError> {
        let dir = self.artifact_dir(task_id, artifact_id);
        if dir.join(CONTENT_FILE).exists() {
            return Err(StoreError::InvalidInput("artifact is already finalized"));
        }
        std::fs::create_dir_all(&dir)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(staging_file()))?;
        let session = ArtifactSession {
            task_id: task_id.to_string(),
            artifact_id: artifact_id.to_string(),
            artifact_type,
            dir,
            file,
            offset: 0,
            seq: 0,
        };
        write_progress(&session, now_ms())?;
        Ok(session)
    }

    /// Appends bytes and checkpoints the progress record. Exceeding the
    /// size limit fails without writing and leaves the staging state
    /// intact for inspection.
    pub fn append(&self, session: &mut ArtifactSession, bytes: &[u8]) -> Result<u64, StoreError> {
        let projected = session.offset.saturating_add(bytes.len() as u64);
        if projected > self.max_size {
            return Err(StoreError::ArtifactTooLarge {
                size: projected,
                max: self.max_size,
            });
        }
        session.file.write_all(bytes)?;
        session.offset = projected;
        session.seq += 1;
        write_progress(session, now_ms())?;
        Ok(session.offset)
    }

    /// Copies the listed source files into the artifact's `files/`
    /// subdirectory. Unreadable sources are reported, not fatal.
    pub fn mirror_originals(
        &self,
        session: &ArtifactSession,
        paths: &[PathBuf],
    ) -> Result<MirrorReport, StoreError> {
        let mirror_dir = session.dir.join(MIRROR_DIR);
        std::fs::create_dir_all(&mirror_dir)?;
        let mut report = MirrorReport::default();
        for source in paths {
            let Some(name) = source.file_name() else {
                report.missing.push(source.clone());
                continue;
            };
            match std::fs::copy(source, mirror_dir.join(name)) {
                Ok(_) => report.copied.push(source.clone()),
                Err(_) => report.missing.push(source.clone()),
            }
        }
        Ok(report)
    }

    /// Marker, sync, rename. After the rename the artifact is visible and
    /// immutable; the progress sidecar and marker are cleaned up.
    pub fn finalize(&self, mut session: ArtifactSession) -> Result<ArtifactReference, StoreError> {
        session.file.flush()?;
        std::fs::write(session.dir.join(COMPLETE_MARKER), b"")?;
        session.file.sync_all()?;
        let target = session.dir.join(CONTENT_FILE);
        std::fs::rename(session.dir.join(staging_file()), &target)?;
        let _ = std::fs::remove_file(session.dir.join(PROGRESS_FILE));
        let _ = std::fs::remove_file(session.dir.join(COMPLETE_MARKER));
        let size_bytes = std::fs::metadata(&target)?.len();
        let digest = sha256_file_hex(&target)?;
        Ok(ArtifactReference {
            artifact_id: session.artifact_id,
            task_id: session.task_id,
            artifact_type: session.artifact_type,
            file_path: target,
            size_bytes,
            digest,
        })
    }

    /// Reopens an interrupted session at its last checkpoint. Bytes past
    /// the checkpoint (an append that never reached the progress record)
    /// are truncated away. A staging directory whose progress record is
    /// unreadable, or whose staging file is shorter than the checkpoint,
    /// is discarded and reported as lost.
    pub fn resume(&self, task_id: &str, artifact_id: &str) -> Result<ResumeOutcome, StoreError> {
        let dir = self.artifact_dir(task_id, artifact_id);
        let target = dir.join(CONTENT_FILE);
        let staging = dir.join(staging_file());

        if target.exists() {
            let size_bytes = std::fs::metadata(&target)?.len();
            return Ok(ResumeOutcome::AlreadyFinalized {
                file_path: target,
                size_bytes,
            });
        }
        if !staging.exists() {
            return Ok(ResumeOutcome::NothingToResume);
        }
        if dir.join(COMPLETE_MARKER).exists() {
            // Interrupted between marker and rename: the bytes were already
            // synced, so finish the rename.
            std::fs::rename(&staging, &target)?;
            let _ = std::fs::remove_file(dir.join(PROGRESS_FILE));
            let _ = std::fs::remove_file(dir.join(COMPLETE_MARKER));
            let size_bytes = std::fs::metadata(&target)?.len();
            return Ok(ResumeOutcome::AlreadyFinalized {
                file_path: target,
                size_bytes,
            });
        }

        let Some(progress) = read_progress(&dir) else {
            std::fs::remove_dir_all(&dir)?;
            return Err(StoreError::ArtifactSessionLost {
                reason: format!("progress record for {artifact_id} is unreadable"),
            });
        };
        let Some(artifact_type) = ArtifactType::parse(&progress.artifact_type) else {
            std::fs::remove_dir_all(&dir)?;
            return Err(StoreError::ArtifactSessionLost {
                reason: format!(
                    "progress record for {artifact_id} names unknown type {}",
                    progress.artifact_type
                ),
            });
        };
        let len = std::fs::metadata(&staging)?.len();
        if len < progress.offset {
            std::fs::remove_dir_all(&dir)?;
            return Err(StoreError::ArtifactSessionLost {
                reason: format!(
                    "staging file shorter than checkpoint ({len} < {})",
                    progress.offset
                ),
            });
        }

        let mut file = std::fs::OpenOptions::new().write(true).open(&staging)?;
        file.set_len(progress.offset)?;
        file.seek(SeekFrom::Start(progress.offset))?;
        Ok(ResumeOutcome::Resumed(ArtifactSession {
            task_id: task_id.to_string(),
            artifact_id: artifact_id.to_string(),
            artifact_type,
            dir,
            file,
            offset: progress.offset,
            seq: progress.seq,
        }))
    }

    /// Reads a finalized artifact. Staging-only sessions are not visible.
    pub fn read(&self, task_id: &str, artifact_id: &str) -> Result<Vec<u8>, StoreError> {
        let dir = self.artifact_dir(task_id, artifact_id);
        let target = dir.join(CONTENT_FILE);
        if target.exists() {
            return Ok(std::fs::read(target)?);
        }
        if dir.join(staging_file()).exists() {
            return Err(StoreError::ArtifactNotFinalized);
        }
        Err(StoreError::UnknownArtifact)
    }

    /// Recomputes the digest of a finalized artifact from disk. Callers
    /// re-attaching an artifact whose database row was lost use this to
    /// rebuild the reference.
    pub fn digest_file(&self, path: &Path) -> Result<String, StoreError> {
        Ok(sha256_file_hex(path)?)
    }

    /// Every staging session currently on disk with a readable progress
    /// record, sorted for deterministic snapshots.
    pub fn list_sessions(&self) -> Result<Vec<InFlightArtifact>, StoreError> {
        let mut out = Vec::new();
        let Ok(task_dirs) = std::fs::read_dir(&self.root) else {
            return Ok(out);
        };
        for task_entry in task_dirs.flatten() {
            if !task_entry.path().is_dir() {
                continue;
            }
            let Ok(artifact_dirs) = std::fs::read_dir(task_entry.path()) else {
                continue;
            };
            for artifact_entry in artifact_dirs.flatten() {
                let dir = artifact_entry.path();
                if dir.join(CONTENT_FILE).exists() || !dir.join(staging_file()).exists() {
                    continue;
                }
                let Some(progress) = read_progress(&dir) else {
                    continue;
                };
                out.push(InFlightArtifact {
                    task_id: task_entry.file_name().to_string_lossy().into_owned(),
                    artifact_id: artifact_entry.file_name().to_string_lossy().into_owned(),
                    artifact_type: progress.artifact_type,
                    offset: progress.offset,
                    seq: progress.seq,
                    updated_at_ms: progress.updated_at_ms,
                });
            }
        }
        out.sort_by(|a, b| {
            (a.task_id.as_str(), a.artifact_id.as_str())
                .cmp(&(b.task_id.as_str(), b.artifact_id.as_str()))
        });
        Ok(out)
    }

    /// Removes every artifact directory of the task, finalized or not.
    pub fn purge(&self, task_id: &str) -> Result<bool, StoreError> {
        let dir = self.root.join(task_id);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(dir)?;
        Ok(true)
    }

    /// Removes staging directories whose last checkpoint is at least
    /// `older_than_ms` old, plus any with an unreadable progress record.
    /// Finalized artifacts are never touched. Returns the removed
    /// `(task_id, artifact_id)` pairs.
    pub fn purge_stale_staging(
        &self,
        older_than_ms: i64,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let now = now_ms();
        let mut removed = Vec::new();
        let Ok(task_dirs) = std::fs::read_dir(&self.root) else {
            return Ok(removed);
        };
        for task_entry in task_dirs.flatten() {
            if !task_entry.path().is_dir() {
                continue;
            }
            let Ok(artifact_dirs) = std::fs::read_dir(task_entry.path()) else {
                continue;
            };
            for artifact_entry in artifact_dirs.flatten() {
                let dir = artifact_entry.path();
                if dir.join(CONTENT_FILE).exists() || !dir.join(staging_file()).exists() {
                    continue;
                }
                let stale = match read_progress(&dir) {
                    Some(progress) => now.saturating_sub(progress.updated_at_ms) >= older_than_ms,
                    None => true,
                };
                if stale {
                    std::fs::remove_dir_all(&dir)?;
                    removed.push((
                        task_entry.file_name().to_string_lossy().into_owned(),
                        artifact_entry.file_name().to_string_lossy().into_owned(),
                    ));
                }
            }
        }
        removed.sort();
        Ok(removed)
    }
}

fn staging_file() -> String {
    format!("{CONTENT_FILE}{STAGING_SUFFIX}")
}

struct Progress {
    artifact_type: String,
    offset: u64,
    seq: i64,
    updated_at_ms: i64,
}

fn read_progress(dir: &Path) -> Option<Progress> {
    let text = std::fs::read_to_string(dir.join(PROGRESS_FILE)).ok()?;
    let value: Value = serde_json::from_str(&text).ok()?;
    Some(Progress {
        artifact_type: value.get("artifact_type")?.as_str()?.to_string(),
        offset: value.get("offset")?.as_u64()?,
        seq: value.get("seq")?.as_i64()?,
        updated_at_ms: value.get("updated_at_ms")?.as_i64()?,
    })
}

fn write_progress(session: &ArtifactSession, now_ms: i64) -> Result<(), StoreError> {
    let path = session.dir.join(PROGRESS_FILE);
    let tmp = path.with_extension("json.tmp");
    let text = json!({
        "artifact_type": session.artifact_type.as_str(),
        "offset": session.offset,
        "seq": session.seq,
        "updated_at_ms": now_ms,
    })
    .to_string();
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

fn sha256_file_hex(path: &Path) -> Result<String, std::io::Error> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = sha2::Sha256::new();

    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    Ok(out)
}

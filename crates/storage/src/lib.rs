#![forbid(unsafe_code)]

mod artifacts;
mod lock;
mod snapshot;
mod store;

pub use artifacts::{
    ArtifactReference, ArtifactSession, ArtifactStore, InFlightArtifact, MirrorReport,
    ResumeOutcome, CONTENT_FILE, PROGRESS_FILE, STAGING_SUFFIX,
};
pub use lock::{lock_owner, StateLock, LOCK_FILE, LOCK_STALE_AFTER_MS};
pub use snapshot::{
    read_snapshot, snapshot_tmp_exists, write_snapshot, Snapshot, SnapshotArtifact, SNAPSHOT_FILE,
    SNAPSHOT_VERSION,
};
pub use store::*;

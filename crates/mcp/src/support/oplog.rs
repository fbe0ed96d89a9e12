#![forbid(unsafe_code)]

use super::time::now_ms;
use serde_json::{Value, json};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub(crate) const OPLOG_FILE: &str = "events.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum LogLevel {
    Off,
    Info,
    Debug,
}

impl LogLevel {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "off" => Some(Self::Off),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Append-only JSON-lines log of dispatched operations. Writes are best
/// effort; an unwritable log never fails a tool call.
pub(crate) struct OperationLog {
    path: PathBuf,
    level: LogLevel,
}

impl OperationLog {
    pub(crate) fn new(storage_dir: &Path, level: LogLevel) -> Self {
        Self {
            path: storage_dir.join(OPLOG_FILE),
            level,
        }
    }

    pub(crate) fn level(&self) -> LogLevel {
        self.level
    }

    /// One line per dispatched tool call plus notable lifecycle moments.
    pub(crate) fn info(&self, kind: &str, fields: &Value) {
        if self.level >= LogLevel::Info {
            self.append(kind, fields);
        }
    }

    /// Inner steps of multi-phase operations.
    pub(crate) fn debug(&self, kind: &str, fields: &Value) {
        if self.level >= LogLevel::Debug {
            self.append(kind, fields);
        }
    }

    fn append(&self, kind: &str, fields: &Value) {
        let mut line = json!({ "ts_ms": now_ms(), "kind": kind });
        if let (Some(record), Some(extra)) = (line.as_object_mut(), fields.as_object()) {
            for (key, value) in extra {
                record.insert(key.clone(), value.clone());
            }
        }
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }
}

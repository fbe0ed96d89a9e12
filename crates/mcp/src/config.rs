#![forbid(unsafe_code)]

//! Layered configuration: compiled defaults, then `taskloom.yaml` in the
//! storage directory, then `TASKLOOM_*` environment variables. Later
//! layers win per key. Settings that fail to parse are ignored with a
//! note rather than failing startup.

use crate::support::oplog::LogLevel;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tl_storage::StaleThresholds;

pub(crate) const CONFIG_FILE: &str = "taskloom.yaml";
pub(crate) const ENV_PREFIX: &str = "TASKLOOM_";

/// Deadline classes for multi-phase operations, in milliseconds.
pub(crate) const PLANNING_DEADLINE_MS: u64 = 30_000;
pub(crate) const QUERY_DEADLINE_MS: u64 = 20_000;

/// Page size when `query_tasks` is called without a limit.
pub(crate) const DEFAULT_QUERY_LIMIT: usize = 100;

/// Cleanup thresholds applied by the maintenance coordinator.
pub(crate) const STAGING_PURGE_AFTER_MS: i64 = 24 * 3_600_000;
pub(crate) const ARCHIVE_TERMINAL_AFTER_MS: i64 = 7 * 24 * 3_600_000;
pub(crate) const EVENT_RETENTION_PER_TASK: usize = 20;

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) max_subtasks: usize,
    pub(crate) max_depth: usize,
    pub(crate) default_timeout_seconds: u64,
    pub(crate) artifact_max_bytes: u64,
    pub(crate) specialists_file: Option<PathBuf>,
    pub(crate) staleness: StaleThresholds,
    pub(crate) log_level: LogLevel,
    /// Advisory: the storage directory is pinned before the file inside
    /// it is read, so a disagreeing value only produces a note.
    pub(crate) database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_subtasks: 50,
            max_depth: 5,
            default_timeout_seconds: 3_600,
            artifact_max_bytes: 10 * 1024 * 1024,
            specialists_file: None,
            staleness: default_staleness(),
            log_level: LogLevel::Info,
            database_url: None,
        }
    }
}

fn default_staleness() -> StaleThresholds {
    StaleThresholds {
        hours_by_specialist: vec![
            ("researcher".to_string(), 24.0),
            ("architect".to_string(), 48.0),
            ("implementer".to_string(), 72.0),
            ("documenter".to_string(), 36.0),
            ("tester".to_string(), 24.0),
            ("reviewer".to_string(), 12.0),
            ("debugger".to_string(), 6.0),
        ],
        default_hours: 48.0,
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    database: RawDatabase,
    #[serde(default)]
    tasks: RawTasks,
    #[serde(default)]
    artifacts: RawArtifacts,
    #[serde(default)]
    specialists: RawSpecialists,
    #[serde(default)]
    staleness: BTreeMap<String, f64>,
    #[serde(default)]
    logging: RawLogging,
}

#[derive(Debug, Default, Deserialize)]
struct RawDatabase {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTasks {
    #[serde(default)]
    max_subtasks: Option<usize>,
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    default_timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawArtifacts {
    #[serde(default)]
    max_size_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSpecialists {
    #[serde(default)]
    file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    #[serde(default)]
    level: Option<String>,
}

pub(crate) struct LoadedConfig {
    pub(crate) config: Config,
    /// Human-readable notes about ignored or malformed settings.
    pub(crate) notes: Vec<String>,
}

pub(crate) fn load(storage_dir: &Path) -> LoadedConfig {
    let mut config = Config::default();
    let mut notes = Vec::new();
    apply_file(&mut config, &mut notes, &storage_dir.join(CONFIG_FILE));
    apply_env(&mut config, &mut notes, std::env::vars());
    LoadedConfig { config, notes }
}

fn apply_file(config: &mut Config, notes: &mut Vec<String>, path: &Path) {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return;
    };
    let parsed: RawConfig = match serde_yaml::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            notes.push(format!("{CONFIG_FILE} ignored: {err}"));
            return;
        }
    };
    if let Some(url) = parsed.database.url {
        config.database_url = Some(url);
    }
    if let Some(value) = parsed.tasks.max_subtasks {
        config.max_subtasks = value;
    }
    if let Some(value) = parsed.tasks.max_depth {
        config.max_depth = value;
    }
    if let Some(value) = parsed.tasks.default_timeout_seconds {
        config.default_timeout_seconds = value;
    }
    if let Some(value) = parsed.artifacts.max_size_bytes {
        config.artifact_max_bytes = value;
    }
    if let Some(file) = parsed.specialists.file {
        config.specialists_file = Some(PathBuf::from(file));
    }
    for (key, hours) in parsed.staleness {
        match key.strip_suffix("_hours") {
            Some("default") => config.staleness.default_hours = hours,
            Some(role) => set_staleness(&mut config.staleness, role, hours),
            None => notes.push(format!(
                "staleness key `{key}` ignored (expected `<specialist>_hours`)"
            )),
        }
    }
    if let Some(level_raw) = parsed.logging.level {
        match LogLevel::parse(&level_raw) {
            Some(level) => config.log_level = level,
            None => notes.push(format!(
                "logging.level `{level_raw}` ignored (off, info or debug)"
            )),
        }
    }
}

fn set_staleness(thresholds: &mut StaleThresholds, role: &str, hours: f64) {
    if let Some(entry) = thresholds
        .hours_by_specialist
        .iter_mut()
        .find(|(name, _)| name == role)
    {
        entry.1 = hours;
    } else {
        thresholds.hours_by_specialist.push((role.to_string(), hours));
    }
}

fn apply_env(
    config: &mut Config,
    notes: &mut Vec<String>,
    vars: impl Iterator<Item = (String, String)>,
) {
    for (key, value) in vars {
        let Some(flat) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let flat = flat.to_ascii_lowercase();
        match flat.as_str() {
            "database_url" => config.database_url = Some(value),
            "tasks_max_subtasks" => apply_usize(&mut config.max_subtasks, &flat, &value, notes),
            "tasks_max_depth" => apply_usize(&mut config.max_depth, &flat, &value, notes),
            "tasks_default_timeout_seconds" => {
                apply_u64(&mut config.default_timeout_seconds, &flat, &value, notes)
            }
            "artifacts_max_size_bytes" => {
                apply_u64(&mut config.artifact_max_bytes, &flat, &value, notes)
            }
            "specialists_file" => config.specialists_file = Some(PathBuf::from(value)),
            "logging_level" => match LogLevel::parse(&value) {
                Some(level) => config.log_level = level,
                None => notes.push(format!(
                    "env {ENV_PREFIX}LOGGING_LEVEL `{value}` ignored (off, info or debug)"
                )),
            },
            other => {
                if let Some(role) = other
                    .strip_prefix("staleness_")
                    .and_then(|rest| rest.strip_suffix("_hours"))
                {
                    match coerce(&value).as_f64() {
                        Some(hours) if role == "default" => {
                            config.staleness.default_hours = hours
                        }
                        Some(hours) => set_staleness(&mut config.staleness, role, hours),
                        None => notes.push(format!(
                            "env {}{} ignored (`{value}` is not a number)",
                            ENV_PREFIX,
                            other.to_ascii_uppercase()
                        )),
                    }
                } else {
                    notes.push(format!(
                        "env {}{} ignored (unknown key)",
                        ENV_PREFIX,
                        other.to_ascii_uppercase()
                    ));
                }
            }
        }
    }
}

/// Environment values arrive as plain strings; read them the way a YAML
/// scalar would, trying bool, then integer, then float, before keeping
/// the raw string.
fn coerce(value: &str) -> Value {
    let trimmed = value.trim();
    if let Ok(flag) = trimmed.parse::<bool>() {
        return Value::Bool(flag);
    }
    if let Ok(number) = trimmed.parse::<i64>() {
        return json!(number);
    }
    if let Ok(number) = trimmed.parse::<f64>() {
        return json!(number);
    }
    Value::String(trimmed.to_string())
}

fn apply_usize(slot: &mut usize, key: &str, value: &str, notes: &mut Vec<String>) {
    match coerce(value).as_u64() {
        Some(parsed) => *slot = parsed as usize,
        None => notes.push(format!(
            "env {}{} ignored (`{value}` is not an integer)",
            ENV_PREFIX,
            key.to_ascii_uppercase()
        )),
    }
}

fn apply_u64(slot: &mut u64, key: &str, value: &str, notes: &mut Vec<String>) {
    match coerce(value).as_u64() {
        Some(parsed) => *slot = parsed,
        None => notes.push(format!(
            "env {}{} ignored (`{value}` is not an integer)",
            ENV_PREFIX,
            key.to_ascii_uppercase()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_limits() {
        let config = Config::default();
        assert_eq!(config.max_subtasks, 50);
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.artifact_max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.staleness.hours_for("debugger"), 6.0);
        assert_eq!(config.staleness.hours_for("unheard_of"), 48.0);
    }

    #[test]
    fn yaml_layer_overrides_defaults_and_keeps_the_rest() {
        let mut config = Config::default();
        let mut notes = Vec::new();
        let parsed: RawConfig = serde_yaml::from_str(
            "tasks:\n  max_depth: 3\nstaleness:\n  researcher_hours: 2.5\n  bogus: 1\nlogging:\n  level: debug\n",
        )
        .expect("parses");
        // Route through the same application code as apply_file.
        if let Some(value) = parsed.tasks.max_depth {
            config.max_depth = value;
        }
        for (key, hours) in parsed.staleness {
            match key.strip_suffix("_hours") {
                Some("default") => config.staleness.default_hours = hours,
                Some(role) => set_staleness(&mut config.staleness, role, hours),
                None => notes.push(key),
            }
        }
        if let Some(level_raw) = parsed.logging.level {
            config.log_level = LogLevel::parse(&level_raw).expect("valid level");
        }
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.max_subtasks, 50);
        assert_eq!(config.staleness.hours_for("researcher"), 2.5);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(notes, vec!["bogus".to_string()]);
    }

    #[test]
    fn env_layer_flattens_and_coerces() {
        let mut config = Config::default();
        let mut notes = Vec::new();
        let vars = vec![
            ("TASKLOOM_TASKS_MAX_SUBTASKS".to_string(), "10".to_string()),
            ("TASKLOOM_STALENESS_TESTER_HOURS".to_string(), "0.5".to_string()),
            ("TASKLOOM_LOGGING_LEVEL".to_string(), "off".to_string()),
            ("TASKLOOM_TASKS_MAX_DEPTH".to_string(), "deep".to_string()),
            ("TASKLOOM_SOMETHING_ELSE".to_string(), "1".to_string()),
            ("UNRELATED".to_string(), "1".to_string()),
        ];
        apply_env(&mut config, &mut notes, vars.into_iter());
        assert_eq!(config.max_subtasks, 10);
        assert_eq!(config.staleness.hours_for("tester"), 0.5);
        assert_eq!(config.log_level, LogLevel::Off);
        assert_eq!(config.max_depth, 5);
        assert_eq!(notes.len(), 2, "bad depth and unknown key: {notes:?}");
    }

    #[test]
    fn coercion_tries_bool_then_integer_then_float() {
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("42"), json!(42));
        assert_eq!(coerce(" 1.5 "), json!(1.5));
        assert_eq!(coerce("ten"), Value::String("ten".to_string()));
    }
}

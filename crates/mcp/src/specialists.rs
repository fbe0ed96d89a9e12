#![forbid(unsafe_code)]

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tl_core::model::Task;

const BUILTIN_PROFILES: &str = include_str!("specialists.yaml");

pub(crate) const FALLBACK_SPECIALIST: &str = "default";

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SpecialistProfile {
    pub(crate) role: String,
    pub(crate) expertise: Vec<String>,
    pub(crate) approach: Vec<String>,
    pub(crate) output_format: String,
}

pub(crate) struct SpecialistRegistry {
    profiles: BTreeMap<String, SpecialistProfile>,
    load_note: Option<String>,
}

impl SpecialistRegistry {
    /// Builtin profiles overlaid with the configured profile file when
    /// one is present and parseable. A broken override keeps the
    /// builtins and surfaces a note instead of failing startup.
    pub(crate) fn load(override_file: Option<&Path>) -> Self {
        let mut profiles = parse_profiles(BUILTIN_PROFILES).unwrap_or_default();
        debug_assert!(
            profiles.contains_key(FALLBACK_SPECIALIST),
            "builtin profiles must include the fallback"
        );
        let mut load_note = None;
        if let Some(path) = override_file {
            match read_profiles(path) {
                Ok(overrides) => {
                    for (name, profile) in overrides {
                        profiles.insert(name, profile);
                    }
                }
                Err(err) => {
                    load_note = Some(format!(
                        "specialist file {} ignored: {err}",
                        path.display()
                    ));
                }
            }
        }
        Self { profiles, load_note }
    }

    pub(crate) fn load_note(&self) -> Option<&str> {
        self.load_note.as_deref()
    }

    pub(crate) fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// The profile for a specialist, falling back to `default` for
    /// unknown names. The flag reports whether the fallback was used.
    pub(crate) fn resolve(&self, specialist: &str) -> (Option<&SpecialistProfile>, bool) {
        if let Some(profile) = self.profiles.get(specialist) {
            return (Some(profile), false);
        }
        (self.profiles.get(FALLBACK_SPECIALIST), true)
    }
}

fn parse_profiles(raw: &str) -> Result<BTreeMap<String, SpecialistProfile>, serde_yaml::Error> {
    serde_yaml::from_str(raw)
}

fn read_profiles(path: &Path) -> Result<BTreeMap<String, SpecialistProfile>, String> {
    let raw = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
    parse_profiles(&raw).map_err(|err| err.to_string())
}

/// Deterministic prompt context: profile sections in a fixed order,
/// then the task itself. Drivers paste this in front of the work.
pub(crate) fn context_for(profile: &SpecialistProfile, task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Specialist: {}", profile.role);
    let _ = writeln!(out);
    let _ = writeln!(out, "### Expertise");
    for item in &profile.expertise {
        let _ = writeln!(out, "- {item}");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "### Approach");
    for (step, instruction) in profile.approach.iter().enumerate() {
        let _ = writeln!(out, "{}. {instruction}", step + 1);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "### Expected output");
    let _ = writeln!(out, "{}", profile.output_format.trim_end());
    let _ = writeln!(out);
    let _ = writeln!(out, "### Task");
    let _ = writeln!(out, "- id: {}", task.task_id);
    let _ = writeln!(out, "- title: {}", task.title);
    let _ = writeln!(
        out,
        "- type: {} ({})",
        task.task_type.as_str(),
        task.complexity.as_str()
    );
    if let Some(effort) = &task.estimated_effort {
        let _ = writeln!(out, "- estimated effort: {effort}");
    }
    if !task.description.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", task.description.trim_end());
    }
    if let Some(raw) = &task.context_json
        && let Ok(context) = serde_json::from_str::<serde_json::Value>(raw)
        && context.as_object().is_some_and(|map| !map.is_empty())
    {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Stored context");
        let pretty = serde_json::to_string_pretty(&context).unwrap_or_else(|_| raw.clone());
        let _ = writeln!(out, "{pretty}");
    }
    out
}

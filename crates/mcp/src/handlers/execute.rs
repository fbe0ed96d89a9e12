#![forbid(unsafe_code)]

use serde_json::{Value, json};
use std::path::PathBuf;
use tl_core::events::EVENT_SPECIALIST_FALLBACK;
use tl_core::model::{ArtifactType, NextAction};
use tl_storage::{
    ArtifactAttachment, ArtifactReference, CompleteTaskRequest, ResumeOutcome, StoreError,
};

use crate::config::QUERY_DEADLINE_MS;
use crate::handlers::{parse_artifact_type, parse_next_action};
use crate::orchestrator::OrchestratorCore;
use crate::specialists::{self, FALLBACK_SPECIALIST};
use crate::support::{
    Args, Deadline, ToolError, optional_string, optional_string_list, require_string, success,
    triggered_by,
};
use crate::views::{artifact_reference_json, completion_json, dependency_report_json, task_json};

pub(crate) fn execute_task(core: &mut OrchestratorCore, args: &Args) -> Result<Value, ToolError> {
    let task_id = require_string(args, "task_id")?;
    let caller = triggered_by(args)?;
    let deadline = Deadline::new("execute_task", QUERY_DEADLINE_MS);

    let task = core.store.begin(&task_id, &caller)?;
    let (profile, fallback) = core.specialists.resolve(&task.specialist_type);
    if fallback {
        core.store.record_event(
            &task_id,
            EVENT_SPECIALIST_FALLBACK,
            &caller,
            Some(&json!({
                "requested": task.specialist_type,
                "used": FALLBACK_SPECIALIST,
            })),
        )?;
    }
    let Some(profile) = profile else {
        return Err(ToolError::internal("specialist roster has no default profile"));
    };
    let context = specialists::context_for(profile, &task);
    let dependencies = core.store.check_dependencies(&task_id)?;
    deadline.check()?;

    let used = if fallback {
        FALLBACK_SPECIALIST
    } else {
        task.specialist_type.as_str()
    };
    Ok(success(
        json!({
            "task": task_json(&task),
            "specialist": {
                "requested": task.specialist_type,
                "used": used,
                "fallback": fallback,
            },
            "context": context,
            "dependencies": dependency_report_json(&dependencies),
        }),
        format!("task {task_id} is active"),
    ))
}

pub(crate) fn complete_task(core: &mut OrchestratorCore, args: &Args) -> Result<Value, ToolError> {
    let task_id = require_string(args, "task_id")?;
    let caller = triggered_by(args)?;
    // Resolve the task before any staging I/O happens for a bad id.
    core.store.get_task(&task_id, false, false)?;

    let result = optional_string(args, "result")?;
    let summary = optional_string(args, "summary")?;
    let detailed_work = optional_string(args, "detailed_work")?;
    let artifact_type = match optional_string(args, "artifact_type")? {
        Some(raw) => parse_artifact_type(&raw)?,
        None => ArtifactType::General,
    };
    let file_paths: Vec<PathBuf> = optional_string_list(args, "file_paths")?
        .unwrap_or_default()
        .into_iter()
        .map(PathBuf::from)
        .collect();
    if !file_paths.is_empty() && detailed_work.is_none() {
        return Err(ToolError::invalid("file_paths requires detailed_work"));
    }
    let next_action = match optional_string(args, "next_action")? {
        Some(raw) => parse_next_action(&raw)?,
        None => NextAction::Complete,
    };

    let stored = match &detailed_work {
        Some(content) => Some(store_detailed_work(
            core,
            &task_id,
            content.as_bytes(),
            artifact_type,
            &file_paths,
        )?),
        None => None,
    };
    let attachments: Vec<ArtifactAttachment> = stored
        .as_ref()
        .map(|work| {
            vec![ArtifactAttachment {
                artifact_id: work.reference.artifact_id.clone(),
                artifact_type: work.reference.artifact_type.as_str().to_string(),
                file_path: work.relative.clone(),
                size_bytes: work.reference.size_bytes as i64,
                digest: work.reference.digest.clone(),
            }]
        })
        .unwrap_or_default();

    let (mut data, message) = match next_action {
        NextAction::Complete | NextAction::Continue => {
            let outcome = core.store.complete(CompleteTaskRequest {
                task_id: task_id.clone(),
                result,
                summary,
                artifacts: attachments,
                triggered_by: caller,
            })?;
            let message = if outcome.newly_ready.is_empty() {
                format!("completed {task_id}")
            } else {
                format!(
                    "completed {task_id}; {} task(s) became ready",
                    outcome.newly_ready.len()
                )
            };
            (completion_json(&outcome), message)
        }
        NextAction::NeedsRevision => {
            let reason = summary
                .clone()
                .or_else(|| result.clone())
                .unwrap_or_else(|| "revision requested".to_string());
            let task = core.store.request_revision(
                &task_id,
                &reason,
                result.as_deref(),
                &attachments,
                &caller,
            )?;
            (
                json!({ "task": task_json(&task) }),
                format!("revision requested for {task_id}"),
            )
        }
        NextAction::Blocked => {
            let reason = summary
                .clone()
                .or_else(|| result.clone())
                .unwrap_or_else(|| "reported blocked".to_string());
            let task = core.store.park_blocked(
                &task_id,
                &reason,
                result.as_deref(),
                &attachments,
                &caller,
            )?;
            (
                json!({ "task": task_json(&task) }),
                format!("parked {task_id} as blocked"),
            )
        }
    };

    if let Some(work) = &stored {
        data["artifact"] = artifact_reference_json(&work.reference, &work.relative);
        if let Some(mirror) = &work.mirror {
            data["mirrored_files"] = mirror.clone();
        }
        if let Some(note) = &work.resume_note {
            data["resume_note"] = Value::String(note.clone());
        }
    }
    data["next_action"] = Value::String(next_action.as_str().to_string());
    Ok(success(data, message))
}

struct StoredWork {
    reference: ArtifactReference,
    relative: String,
    mirror: Option<Value>,
    resume_note: Option<String>,
}

/// Streams detailed work through the staging area. A prior interrupted
/// session for the task is picked up when its staged bytes are a prefix
/// of the resent content; otherwise a fresh artifact is started and the
/// stale staging is left for the maintenance sweep.
fn store_detailed_work(
    core: &mut OrchestratorCore,
    task_id: &str,
    content: &[u8],
    artifact_type: ArtifactType,
    file_paths: &[PathBuf],
) -> Result<StoredWork, ToolError> {
    let in_flight = core
        .artifacts
        .list_sessions()?
        .into_iter()
        .filter(|session| session.task_id == task_id)
        .max_by_key(|session| (session.updated_at_ms, session.seq));

    let mut resume_note = None;
    let session = match &in_flight {
        Some(staged) => match core.artifacts.resume(task_id, &staged.artifact_id) {
            Ok(ResumeOutcome::Resumed(mut session)) => {
                let offset = session.offset();
                if offset as usize <= content.len() {
                    core.artifacts
                        .append(&mut session, &content[offset as usize..])?;
                    if offset > 0 {
                        resume_note = Some(format!(
                            "resumed staged artifact {} at byte {offset}",
                            session.artifact_id()
                        ));
                    }
                    Some(session)
                } else {
                    resume_note = Some(format!(
                        "staged {offset} bytes exceed the resent content; started a fresh artifact"
                    ));
                    None
                }
            }
            Ok(ResumeOutcome::AlreadyFinalized {
                file_path,
                size_bytes,
            }) => {
                // A crash after finalize's rename left the canonical file
                // without the task row ever seeing it. Reattach as-is.
                let digest = core.artifacts.digest_file(&file_path)?;
                let reference = ArtifactReference {
                    artifact_id: staged.artifact_id.clone(),
                    task_id: task_id.to_string(),
                    artifact_type: ArtifactType::parse(&staged.artifact_type)
                        .unwrap_or(artifact_type),
                    file_path,
                    size_bytes,
                    digest,
                };
                let relative = core.relative_artifact_path(&reference.file_path);
                return Ok(StoredWork {
                    relative,
                    reference,
                    mirror: None,
                    resume_note: Some(
                        "artifact was already finalized; reattached".to_string(),
                    ),
                });
            }
            Ok(ResumeOutcome::NothingToResume) => None,
            Err(StoreError::ArtifactSessionLost { .. }) => {
                resume_note = Some(
                    "previous artifact session lost its progress record; started a fresh artifact"
                        .to_string(),
                );
                None
            }
            Err(err) => return Err(err.into()),
        },
        None => None,
    };

    let session = match session {
        Some(session) => session,
        None => {
            let artifact_id = core.store.next_artifact_id()?;
            let mut fresh = core
                .artifacts
                .create_session(task_id, &artifact_id, artifact_type)?;
            core.artifacts.append(&mut fresh, content)?;
            fresh
        }
    };

    let mirror = if file_paths.is_empty() {
        None
    } else {
        let report = core.artifacts.mirror_originals(&session, file_paths)?;
        Some(json!({
            "copied": report
                .copied
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>(),
            "missing": report
                .missing
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>(),
        }))
    };
    let reference = core.artifacts.finalize(session)?;
    let relative = core.relative_artifact_path(&reference.file_path);
    Ok(StoredWork {
        reference,
        relative,
        mirror,
        resume_note,
    })
}

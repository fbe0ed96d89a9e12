#![forbid(unsafe_code)]

use serde_json::Value;

use crate::handlers::unknown_value;
use crate::maintenance::{
    self, MAINTENANCE_ACTIONS, MAINTENANCE_SCOPES, MaintenanceAction, MaintenanceScope,
    VALIDATION_LEVELS, ValidationLevel,
};
use crate::orchestrator::OrchestratorCore;
use crate::support::{Args, ToolError, optional_string, require_string, success};

pub(crate) fn maintenance_coordinator(
    core: &mut OrchestratorCore,
    args: &Args,
) -> Result<Value, ToolError> {
    let action_raw = require_string(args, "action")?;
    let action = MaintenanceAction::parse(&action_raw)
        .ok_or_else(|| unknown_value("action", &action_raw, MAINTENANCE_ACTIONS))?;
    let scope = match optional_string(args, "scope")? {
        Some(raw) => MaintenanceScope::parse(&raw)
            .ok_or_else(|| unknown_value("scope", &raw, MAINTENANCE_SCOPES))?,
        None => MaintenanceScope::CurrentSession,
    };
    let level = match optional_string(args, "validation_level")? {
        Some(raw) => ValidationLevel::parse(&raw)
            .ok_or_else(|| unknown_value("validation_level", &raw, VALIDATION_LEVELS))?,
        None => ValidationLevel::Basic,
    };

    let target = match optional_string(args, "target_task_id")? {
        Some(task_id) => {
            if scope != MaintenanceScope::SpecificSubtask {
                return Err(ToolError::invalid(
                    "target_task_id only applies to specific_subtask scope",
                ));
            }
            Some(core.store.get_task(&task_id, false, false)?.task)
        }
        None => {
            if scope == MaintenanceScope::SpecificSubtask {
                return Err(ToolError::invalid(
                    "specific_subtask scope requires target_task_id",
                ));
            }
            None
        }
    };

    let report = maintenance::run(core, action, scope, level, target)?;
    Ok(success(report, format!("{} finished", action.as_str())))
}

#![forbid(unsafe_code)]

use super::errors::ToolError;
use serde_json::{Map, Value};

pub(crate) type Args = Map<String, Value>;

pub(crate) fn require_string(args: &Args, key: &str) -> Result<String, ToolError> {
    match args.get(key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(text.clone()),
        Some(Value::String(_)) => Err(ToolError::invalid(format!("`{key}` must not be empty"))),
        Some(_) => Err(ToolError::invalid(format!("`{key}` must be a string"))),
        None => Err(ToolError::invalid(format!("`{key}` is required"))),
    }
}

pub(crate) fn optional_string(args: &Args, key: &str) -> Result<Option<String>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(ToolError::invalid(format!("`{key}` must be a string"))),
    }
}

pub(crate) fn optional_bool(args: &Args, key: &str) -> Result<Option<bool>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(*flag)),
        Some(_) => Err(ToolError::invalid(format!("`{key}` must be a boolean"))),
    }
}

pub(crate) fn optional_i64(args: &Args, key: &str) -> Result<Option<i64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_i64()
            .map(Some)
            .ok_or_else(|| ToolError::invalid(format!("`{key}` must be an integer"))),
        Some(_) => Err(ToolError::invalid(format!("`{key}` must be an integer"))),
    }
}

pub(crate) fn optional_u64(args: &Args, key: &str) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_u64()
            .map(Some)
            .ok_or_else(|| ToolError::invalid(format!("`{key}` must be a non-negative integer"))),
        Some(_) => Err(ToolError::invalid(format!("`{key}` must be a non-negative integer"))),
    }
}

pub(crate) fn optional_usize(args: &Args, key: &str) -> Result<Option<usize>, ToolError> {
    Ok(optional_u64(args, key)?.map(|value| value as usize))
}

pub(crate) fn optional_object(args: &Args, key: &str) -> Result<Option<Map<String, Value>>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(_) => Err(ToolError::invalid(format!("`{key}` must be an object"))),
    }
}

pub(crate) fn optional_array(args: &Args, key: &str) -> Result<Option<Vec<Value>>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.clone())),
        Some(_) => Err(ToolError::invalid(format!("`{key}` must be an array"))),
    }
}

pub(crate) fn optional_string_list(args: &Args, key: &str) -> Result<Option<Vec<String>>, ToolError> {
    let Some(items) = optional_array(args, key)? else {
        return Ok(None);
    };
    let mut list = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(text) => list.push(text),
            _ => return Err(ToolError::invalid(format!("`{key}` must contain only strings"))),
        }
    }
    Ok(Some(list))
}

/// The caller identity recorded on events, defaulting to `system`.
pub(crate) fn triggered_by(args: &Args) -> Result<String, ToolError> {
    Ok(optional_string(args, "triggered_by")?.unwrap_or_else(|| "system".to_string()))
}

#![forbid(unsafe_code)]

pub(crate) mod args;
pub(crate) mod deadline;
pub(crate) mod envelope;
pub(crate) mod errors;
pub(crate) mod jsonrpc;
pub(crate) mod oplog;
pub(crate) mod time;

pub(crate) use args::*;
pub(crate) use deadline::Deadline;
pub(crate) use envelope::success;
pub(crate) use errors::ToolError;
pub(crate) use jsonrpc::*;
pub(crate) use oplog::{LogLevel, OperationLog};

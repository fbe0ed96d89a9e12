#![forbid(unsafe_code)]

pub(in crate::store) mod attributes;
mod create;
mod delete;
mod get;
mod move_task;
mod query;
mod update;

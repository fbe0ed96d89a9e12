#![forbid(unsafe_code)]

pub mod events;
pub mod graph;
pub mod hierarchy;
pub mod ids;
pub mod lifecycle;
pub mod model;

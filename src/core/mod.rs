//! Core pipeline logic: types, parsing, resolution, planning, execution.

pub mod executor;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod sqlgen;
pub mod state;
pub mod types;

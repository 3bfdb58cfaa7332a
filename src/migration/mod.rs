//! Migration Module
//!
//! Turns the difference between two database states into reviewable SQL.

pub mod planner;

pub use planner::{has_executable_lines, MigrationPlanner, PlanRequest};

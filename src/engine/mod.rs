//! Execution engine glue for tierform
//!
//! The engine orchestrates:
//! 1. Planning - Load declarations and state, build the graph, plan
//! 2. Diffing - Render the plan grouped by resource type
//! 3. Executing - Apply through the simulated provider with progress

pub mod differ;
pub mod executor;
pub mod planner;

pub use differ::display_plan;
pub use executor::{confirm_proceed, execute, exit_code};
pub use planner::{SavedPlan, Workspace, parse_targets};

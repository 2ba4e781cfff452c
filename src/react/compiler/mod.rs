//! DAG 策略（plan → execute → join → replan）

pub mod executor;
pub mod graph;
pub mod joiner;
pub mod plan_parser;
pub mod planner;

pub use executor::LlmCompilerExecutor;
pub use graph::{ExhaustedPlan, JoinerResult, Task, TaskGraph, JOIN_ACTION};
pub use joiner::Joiner;
pub use plan_parser::{parse_plan, ParsedPlan};
pub use planner::{CompilerPlanner, PlannerOutput};

//! 核心层：步骤日志、错误分类、恢复引擎、运行协调器、运行服务与任务调度

pub mod coordinator;
pub mod error;
pub mod recovery;
pub mod service;
pub mod state;
pub mod task_scheduler;

pub use coordinator::{RunCoordinator, RunStatusStopPredicate, AGENT_RUN_TASK};
pub use error::{AgentError, ErrorKind, RunError};
pub use recovery::{RecoveryEngine, RecoveryError};
pub use service::RunService;
pub use state::{
    AgentState, AgentStep, Continuation, ExecutionPhase, Finish, FinishOutcome, Observation, Pause,
    StepPayload, Thought, ToolResult,
};
pub use task_scheduler::{Task, TaskHandler, TaskScheduler};

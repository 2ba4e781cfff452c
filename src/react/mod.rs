//! 执行策略：顺序 ReAct、单批并行工具调用、DAG（LLMCompiler）
//!
//! 三种策略实现同一个 AgentExecutor 契约，由配置项 engine.strategy 选择。

pub mod compiler;
pub mod executor;
pub mod react_agent;
pub mod tool_calling;

use std::sync::Arc;

use crate::config::{EngineConfig, Strategy};
use crate::llm::LlmClient;
use crate::tools::ToolWorker;

pub use compiler::LlmCompilerExecutor;
pub use executor::{
    dispatch, lift_pause, resolve_next_step, AgentExecutor, NoStopPredicate, StopPredicate, StopReason,
};
pub use react_agent::{parse_react_output, ReActExecutor, ReActOutput};
pub use tool_calling::ToolCallingExecutor;

/// 按配置构造执行策略
pub fn build_executor(
    config: &EngineConfig,
    llm: Arc<dyn LlmClient>,
    worker: Arc<ToolWorker>,
) -> Arc<dyn AgentExecutor> {
    match config.strategy {
        Strategy::React => Arc::new(ReActExecutor::new(llm, worker)),
        Strategy::ToolCalling => Arc::new(ToolCallingExecutor::new(llm, worker)),
        Strategy::LlmCompiler => Arc::new(LlmCompilerExecutor::new(llm, worker, config.max_replan)),
    }
}

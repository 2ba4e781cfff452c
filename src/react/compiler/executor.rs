//! DAG 执行器：plan → 分波执行就绪任务 → join → 结束或重规划
//!
//! 任务图随每一步的 payload 传递；Observation 携带的任务图已写回本批结果。
//! Joiner 要求重规划且已达到 max_replan 时返回 ReplanLimitExceeded。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::state::{
    AgentState, AgentStep, Continuation, Finish, Observation, StepPayload, Thought,
};
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::react::compiler::graph::{ExhaustedPlan, TaskGraph};
use crate::react::compiler::joiner::Joiner;
use crate::react::compiler::planner::{CompilerPlanner, PlannerOutput};
use crate::react::executor::{dispatch, lift_pause, AgentExecutor};
use crate::tools::ToolWorker;

pub struct LlmCompilerExecutor {
    planner: CompilerPlanner,
    joiner: Joiner,
    worker: Arc<ToolWorker>,
    max_replan: u32,
}

impl LlmCompilerExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, worker: Arc<ToolWorker>, max_replan: u32) -> Self {
        Self {
            planner: CompilerPlanner::new(Arc::clone(&llm)),
            joiner: Joiner::new(llm),
            worker,
            max_replan,
        }
    }

    async fn plan(
        &self,
        state: &AgentState,
        history: &[ExhaustedPlan],
        last_index: u32,
    ) -> Result<AgentStep, AgentError> {
        let output = self
            .planner
            .plan(state.input(), state.function_tools(), history, last_index)
            .await?;
        match output {
            PlannerOutput::Answer(answer) => Ok(AgentStep::finish(Finish::response(answer))),
            PlannerOutput::Plan { thought, graph } => first_wave(thought, graph),
        }
    }

    async fn observe(&self, state: &AgentState, observation: &Observation) -> Result<AgentStep, AgentError> {
        let mut graph = task_graph(observation.payload.as_ref())?.clone();
        let ready = graph.find_ready_tasks();
        if !ready.is_empty() {
            let tool_calls = graph.build_tool_call_batch(&ready)?;
            tracing::debug!(ready = ?ready, "releasing next wave");
            return Ok(AgentStep::continuation(Continuation {
                content: String::new(),
                tool_calls,
                payload: Some(StepPayload::TaskGraph(graph)),
            }));
        }

        graph.question = state.input().to_string();
        let verdict = self.joiner.join(&graph).await?;
        graph.joiner_result = Some(verdict.clone());

        if !verdict.is_replan {
            tracing::info!(replans = graph.replan_count(), "joiner finished");
            return Ok(AgentStep::finish(
                Finish::response(verdict.answer).with_payload(Some(StepPayload::TaskGraph(graph))),
            ));
        }

        if graph.replan_count() >= self.max_replan as usize {
            return Err(AgentError::ReplanLimitExceeded(self.max_replan));
        }
        tracing::info!(replan = graph.replan_count() + 1, reason = %verdict.answer, "replanning");
        let mut history = graph.history.clone();
        let thought = if verdict.thought.trim().is_empty() {
            verdict.answer.clone()
        } else {
            verdict.thought.clone()
        };
        history.push(ExhaustedPlan {
            scratchpad: graph.scratchpad(),
            thought,
        });
        self.plan(state, &history, graph.max_index()).await
    }
}

/// 新计划的第一批：所有无依赖任务
fn first_wave(thought: String, graph: TaskGraph) -> Result<AgentStep, AgentError> {
    let ready = graph.find_ready_tasks();
    let tool_calls = graph.build_tool_call_batch(&ready)?;
    Ok(AgentStep::continuation(Continuation {
        content: thought,
        tool_calls,
        payload: Some(StepPayload::TaskGraph(graph)),
    }))
}

fn task_graph(payload: Option<&StepPayload>) -> Result<&TaskGraph, AgentError> {
    payload
        .and_then(StepPayload::task_graph)
        .ok_or_else(|| AgentError::IllegalState("step carries no task graph".to_string()))
}

/// 把结果写回 Observation 携带的任务图
fn merge_into_payload(mut observation: Observation) -> Observation {
    if let Some(StepPayload::TaskGraph(graph)) = observation.payload.as_mut() {
        graph.merge_results(&observation.results);
    }
    observation
}

#[async_trait]
impl AgentExecutor for LlmCompilerExecutor {
    fn name(&self) -> &'static str {
        "llm_compiler"
    }

    async fn next_step(&self, state: &AgentState) -> Result<Option<AgentStep>, AgentError> {
        match state.last_step() {
            None => Ok(Some(self.plan(state, &[], 0).await?)),
            Some(AgentStep::Observation(observation)) => {
                Ok(Some(self.observe(state, observation).await?))
            }
            Some(AgentStep::Thought(Thought::Pause(pause))) => {
                task_graph(pause.payload.as_ref())?;
                Ok(lift_pause(pause).map(|o| AgentStep::observation(merge_into_payload(o))))
            }
            Some(AgentStep::Thought(Thought::Continuation(continuation))) => {
                task_graph(continuation.payload.as_ref())?;
                let step = match dispatch(&self.worker, continuation).await? {
                    AgentStep::Observation(o) => AgentStep::observation(merge_into_payload(o)),
                    other => other,
                };
                Ok(Some(step))
            }
            Some(AgentStep::Thought(Thought::Finish(_))) => Ok(None),
        }
    }
}

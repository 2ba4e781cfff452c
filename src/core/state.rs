//! 步骤日志：AgentState / AgentStep
//!
//! 一次运行的全部进展以只追加的 AgentStep 序列表示；执行器只看 `last_step()` 决定下一步。
//! push_step 在追加时校验序列形状：Observation 不连续、Continuation 不连续、Finish 之后不可再追加、
//! Pause 之后只能是 Observation 或 Finish。

use serde::{Deserialize, Serialize};

use crate::core::error::{AgentError, RunError};
use crate::llm::{FunctionTool, ToolCall};
use crate::react::compiler::TaskGraph;

/// 随步骤携带的策略状态（DAG 策略携带任务图）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    TaskGraph(TaskGraph),
}

impl StepPayload {
    pub fn task_graph(&self) -> Option<&TaskGraph> {
        match self {
            StepPayload::TaskGraph(graph) => Some(graph),
        }
    }
}

/// 单个工具调用的结果（调用 id → 内容）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
}

impl ToolResult {
    pub fn new(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// 请求立即调用一批工具
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Continuation {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub payload: Option<StepPayload>,
}

/// 挂起点：同一批调用，部分结果需由外部提交
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Pause {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub completed: Vec<ToolResult>,
    pub payload: Option<StepPayload>,
}

impl Pause {
    /// 每个调用 id 是否都已有结果
    pub fn is_satisfied(&self) -> bool {
        self.tool_calls
            .iter()
            .all(|call| self.completed.iter().any(|r| r.tool_call_id == call.id))
    }

    /// 按调用顺序排列已完成结果
    pub fn ordered_results(&self) -> Vec<ToolResult> {
        order_by_calls(&self.tool_calls, &self.completed)
    }
}

/// 终止结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "response", rename_all = "snake_case")]
pub enum FinishOutcome {
    Response(String),
    Failed,
    Cancelled,
    Expired,
}

/// 终止步骤
#[derive(Clone, Debug, PartialEq)]
pub struct Finish {
    pub outcome: FinishOutcome,
    pub error: Option<RunError>,
    pub payload: Option<StepPayload>,
}

impl Finish {
    pub fn response(response: impl Into<String>) -> Self {
        Self {
            outcome: FinishOutcome::Response(response.into()),
            error: None,
            payload: None,
        }
    }

    pub fn failed(error: RunError) -> Self {
        Self {
            outcome: FinishOutcome::Failed,
            error: Some(error),
            payload: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            outcome: FinishOutcome::Cancelled,
            error: None,
            payload: None,
        }
    }

    pub fn expired() -> Self {
        Self {
            outcome: FinishOutcome::Expired,
            error: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Option<StepPayload>) -> Self {
        self.payload = payload;
        self
    }

    pub fn response_text(&self) -> Option<&str> {
        match &self.outcome {
            FinishOutcome::Response(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FinishOutcome::Response(_))
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == FinishOutcome::Cancelled
    }

    pub fn is_expired(&self) -> bool {
        self.outcome == FinishOutcome::Expired
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == FinishOutcome::Failed
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Thought {
    Continuation(Continuation),
    Pause(Pause),
    Finish(Finish),
}

/// 工具结果集合
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Observation {
    pub results: Vec<ToolResult>,
    pub payload: Option<StepPayload>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AgentStep {
    Thought(Thought),
    Observation(Observation),
}

impl AgentStep {
    pub fn continuation(c: Continuation) -> Self {
        AgentStep::Thought(Thought::Continuation(c))
    }

    pub fn pause(p: Pause) -> Self {
        AgentStep::Thought(Thought::Pause(p))
    }

    pub fn finish(f: Finish) -> Self {
        AgentStep::Thought(Thought::Finish(f))
    }

    pub fn observation(o: Observation) -> Self {
        AgentStep::Observation(o)
    }

    pub fn payload(&self) -> Option<&StepPayload> {
        match self {
            AgentStep::Thought(Thought::Continuation(c)) => c.payload.as_ref(),
            AgentStep::Thought(Thought::Pause(p)) => p.payload.as_ref(),
            AgentStep::Thought(Thought::Finish(f)) => f.payload.as_ref(),
            AgentStep::Observation(o) => o.payload.as_ref(),
        }
    }

    pub fn as_finish(&self) -> Option<&Finish> {
        match self {
            AgentStep::Thought(Thought::Finish(f)) => Some(f),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AgentStep::Thought(Thought::Continuation(_)) => "continuation",
            AgentStep::Thought(Thought::Pause(_)) => "pause",
            AgentStep::Thought(Thought::Finish(_)) => "finish",
            AgentStep::Observation(_) => "observation",
        }
    }
}

/// 由最后一步推导出的执行阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionPhase {
    Start,
    Thinking,
    Suspended,
    Observing,
    Finished,
}

/// 一次运行的执行上下文
#[derive(Clone, Debug, PartialEq)]
pub struct AgentState {
    input: String,
    function_tools: Vec<FunctionTool>,
    steps: Vec<AgentStep>,
}

impl AgentState {
    pub fn new(input: impl Into<String>, function_tools: Vec<FunctionTool>) -> Self {
        Self {
            input: input.into(),
            function_tools,
            steps: Vec::new(),
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn function_tools(&self) -> &[FunctionTool] {
        &self.function_tools
    }

    pub fn has_function_tool(&self, name: &str) -> bool {
        self.function_tools.iter().any(|t| t.name == name)
    }

    pub fn steps(&self) -> &[AgentStep] {
        &self.steps
    }

    pub fn last_step(&self) -> Option<&AgentStep> {
        self.steps.last()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.last_step(), Some(AgentStep::Thought(Thought::Finish(_))))
    }

    pub fn phase(&self) -> ExecutionPhase {
        match self.last_step() {
            None => ExecutionPhase::Start,
            Some(AgentStep::Observation(_)) => ExecutionPhase::Observing,
            Some(AgentStep::Thought(Thought::Continuation(_))) => ExecutionPhase::Thinking,
            Some(AgentStep::Thought(Thought::Pause(_))) => ExecutionPhase::Suspended,
            Some(AgentStep::Thought(Thought::Finish(_))) => ExecutionPhase::Finished,
        }
    }

    /// 追加一步；违反序列形状时返回 IllegalState，状态保持不变
    pub fn push_step(&mut self, step: AgentStep) -> Result<(), AgentError> {
        let allowed = match (self.last_step(), &step) {
            (Some(AgentStep::Thought(Thought::Finish(_))), _) => false,
            (Some(AgentStep::Observation(_)), AgentStep::Observation(_)) => false,
            (
                Some(AgentStep::Thought(Thought::Continuation(_))),
                AgentStep::Thought(Thought::Continuation(_)),
            ) => false,
            (Some(AgentStep::Thought(Thought::Pause(_))), AgentStep::Observation(_))
            | (Some(AgentStep::Thought(Thought::Pause(_))), AgentStep::Thought(Thought::Finish(_))) => {
                true
            }
            (Some(AgentStep::Thought(Thought::Pause(_))), _) => false,
            (
                Some(AgentStep::Thought(Thought::Continuation(_))),
                AgentStep::Thought(Thought::Pause(_)),
            ) => true,
            (_, AgentStep::Thought(Thought::Pause(_))) => false,
            _ => true,
        };
        if !allowed {
            return Err(AgentError::IllegalState(format!(
                "cannot append {} after {}",
                step.label(),
                self.last_step().map(AgentStep::label).unwrap_or("start")
            )));
        }
        self.steps.push(step);
        Ok(())
    }
}

/// 将结果按调用顺序排列；没有对应调用的结果被丢弃
pub fn order_by_calls(calls: &[ToolCall], results: &[ToolResult]) -> Vec<ToolResult> {
    calls
        .iter()
        .filter_map(|call| results.iter().find(|r| r.tool_call_id == call.id).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "echo", "{}")
    }

    #[test]
    fn test_phase_follows_last_step() {
        let mut state = AgentState::new("hi", vec![]);
        assert_eq!(state.phase(), ExecutionPhase::Start);

        state
            .push_step(AgentStep::continuation(Continuation {
                tool_calls: vec![call("a")],
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(state.phase(), ExecutionPhase::Thinking);

        state.push_step(AgentStep::observation(Observation::default())).unwrap();
        assert_eq!(state.phase(), ExecutionPhase::Observing);

        state.push_step(AgentStep::finish(Finish::response("done"))).unwrap();
        assert_eq!(state.phase(), ExecutionPhase::Finished);
        assert!(state.is_finished());
    }

    #[test]
    fn test_push_rejects_malformed_sequences() {
        let mut state = AgentState::new("hi", vec![]);
        assert!(state.push_step(AgentStep::pause(Pause::default())).is_err());

        state.push_step(AgentStep::continuation(Continuation::default())).unwrap();
        assert!(state
            .push_step(AgentStep::continuation(Continuation::default()))
            .is_err());

        state.push_step(AgentStep::pause(Pause::default())).unwrap();
        assert!(state
            .push_step(AgentStep::continuation(Continuation::default()))
            .is_err());

        state.push_step(AgentStep::observation(Observation::default())).unwrap();
        assert!(state.push_step(AgentStep::observation(Observation::default())).is_err());

        state.push_step(AgentStep::finish(Finish::cancelled())).unwrap();
        assert!(state.push_step(AgentStep::observation(Observation::default())).is_err());
        assert_eq!(state.steps().len(), 4);
    }

    #[test]
    fn test_pause_satisfaction_and_order() {
        let pause = Pause {
            tool_calls: vec![call("a"), call("b")],
            completed: vec![ToolResult::new("b", "2")],
            ..Default::default()
        };
        assert!(!pause.is_satisfied());

        let pause = Pause {
            completed: vec![ToolResult::new("b", "2"), ToolResult::new("a", "1")],
            ..pause
        };
        assert!(pause.is_satisfied());
        let ordered = pause.ordered_results();
        assert_eq!(ordered[0].tool_call_id, "a");
        assert_eq!(ordered[1].tool_call_id, "b");
    }

    #[test]
    fn test_finish_flags() {
        assert!(Finish::response("ok").is_success());
        assert_eq!(Finish::response("ok").response_text(), Some("ok"));
        assert!(Finish::cancelled().is_cancelled());
        assert!(Finish::expired().is_expired());
        let failed = Finish::failed(RunError::new(crate::core::error::ErrorKind::Server, "boom"));
        assert!(failed.is_failed());
        assert!(failed.response_text().is_none());
    }
}

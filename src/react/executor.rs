//! 执行器公共部分：AgentExecutor trait、StopPredicate 与各策略共用的状态转移
//!
//! 一次 tick 由 resolve_next_step 驱动：已结束则不再推进；先查询 StopPredicate（外部取消/过期），
//! 再交给具体策略按最后一步产生新步骤，并追加到 AgentState。

use async_trait::async_trait;

use crate::core::state::{AgentState, AgentStep, Continuation, Finish, Observation, Pause};
use crate::core::AgentError;
use crate::tools::ToolWorker;

/// 外部要求停止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    Expired,
}

/// 每个 tick 开始前查询的停止条件（读外部运行状态，而非内存状态）
#[async_trait]
pub trait StopPredicate: Send + Sync {
    async fn should_stop(&self, state: &AgentState) -> Option<StopReason>;
}

/// 从不停止
pub struct NoStopPredicate;

#[async_trait]
impl StopPredicate for NoStopPredicate {
    async fn should_stop(&self, _state: &AgentState) -> Option<StopReason> {
        None
    }
}

/// 执行策略：根据最后一步决定下一步；None 表示保持挂起
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn next_step(&self, state: &AgentState) -> Result<Option<AgentStep>, AgentError>;
}

/// 推进一个 tick，新步骤会被追加到 state 并返回
pub async fn resolve_next_step(
    executor: &dyn AgentExecutor,
    state: &mut AgentState,
    stop: &dyn StopPredicate,
) -> Result<Option<AgentStep>, AgentError> {
    if state.is_finished() {
        return Ok(None);
    }

    let step = match stop.should_stop(state).await {
        Some(reason) => {
            tracing::info!(strategy = executor.name(), ?reason, "stop requested");
            let payload = state.last_step().and_then(AgentStep::payload).cloned();
            let finish = match reason {
                StopReason::Cancelled => Finish::cancelled(),
                StopReason::Expired => Finish::expired(),
            };
            Some(AgentStep::finish(finish.with_payload(payload)))
        }
        None => executor.next_step(state).await?,
    };

    if let Some(step) = &step {
        state.push_step(step.clone())?;
    }
    Ok(step)
}

/// 挂起点的全部调用都有结果时，按调用顺序提升为 Observation
pub fn lift_pause(pause: &Pause) -> Option<Observation> {
    if !pause.is_satisfied() {
        return None;
    }
    Some(Observation {
        results: pause.ordered_results(),
        payload: pause.payload.clone(),
    })
}

/// 交给 Worker 执行；每个调用都有结果则为 Observation，否则为等待外部结果的 Pause
pub async fn dispatch(worker: &ToolWorker, continuation: &Continuation) -> Result<AgentStep, AgentError> {
    let observation = worker.invoke(continuation).await?;
    let resolved = continuation
        .tool_calls
        .iter()
        .filter(|call| observation.results.iter().any(|r| r.tool_call_id == call.id))
        .count();

    if resolved == continuation.tool_calls.len() {
        return Ok(AgentStep::observation(observation));
    }
    tracing::info!(
        pending = continuation.tool_calls.len() - resolved,
        "waiting for submitted tool outputs"
    );
    Ok(AgentStep::pause(Pause {
        content: continuation.content.clone(),
        tool_calls: continuation.tool_calls.clone(),
        completed: observation.results,
        payload: continuation.payload.clone(),
    }))
}

//! 恢复引擎：由持久化步骤记录重建 AgentState
//!
//! 按 seq 顺序回放记录：
//! - 已完成的 tool_calls 记录 → Continuation + Observation
//! - 进行中的 tool_calls 记录 → Continuation + Pause（必须是最后一条，且运行处于 queued）
//! - 取消 / 过期 / 失败的 tool_calls 记录 → Continuation + Finish（必须是最后一条，运行状态一致）
//! - message_creation 记录：最后一条且运行已完成时为 Finish(response)，否则作为下一条 Continuation 的文本
//!
//! 任何前置条件不满足都返回 RecoveryError，调用方不得使用部分重建的状态。

use std::collections::HashMap;

use thiserror::Error;

use crate::core::error::{ErrorKind, RunError};
use crate::core::state::{AgentState, AgentStep, Continuation, Finish, Observation, Pause, ToolResult};
use crate::llm::{FunctionTool, ToolCall};
use crate::store::{Run, RunStatus, RunStepRecord, RunStepStatus, StepRecordKind};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecoveryError {
    #[error("step #{seq} with status {status:?} must be the last record")]
    NotLast { seq: u64, status: RunStepStatus },

    #[error("step #{seq} with status {step:?} does not match run status {run:?}")]
    StatusMismatch {
        seq: u64,
        step: RunStepStatus,
        run: RunStatus,
    },

    #[error("message {0} referenced by a step is missing")]
    MissingMessage(String),

    #[error("completed step #{seq} has no output for call {call_id}")]
    MissingOutput { seq: u64, call_id: String },

    #[error("trailing message step #{seq} on a run in status {run:?}")]
    DanglingMessage { seq: u64, run: RunStatus },

    #[error("malformed step sequence: {0}")]
    Malformed(String),
}

/// 回放持久化记录的恢复引擎（纯函数，无 I/O）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 由运行、工具集、按 seq 升序的记录与消息文本（message_id → content）重建状态
    pub fn recover(
        &self,
        run: &Run,
        function_tools: Vec<FunctionTool>,
        records: &[RunStepRecord],
        messages: &HashMap<String, String>,
    ) -> Result<AgentState, RecoveryError> {
        let mut state = AgentState::new(run.input.clone(), function_tools);
        let mut pending_content: Option<String> = None;

        for (i, record) in records.iter().enumerate() {
            let is_last = i + 1 == records.len();
            match &record.kind {
                StepRecordKind::MessageCreation { message_id } => {
                    let text = messages
                        .get(message_id)
                        .cloned()
                        .ok_or_else(|| RecoveryError::MissingMessage(message_id.clone()))?;
                    if !is_last {
                        pending_content = Some(text);
                        continue;
                    }
                    if run.status != RunStatus::Completed {
                        return Err(RecoveryError::DanglingMessage {
                            seq: record.seq,
                            run: run.status,
                        });
                    }
                    push(
                        &mut state,
                        AgentStep::finish(Finish::response(text).with_payload(record.payload.clone())),
                    )?;
                }
                StepRecordKind::ToolCalls { tool_calls } => {
                    let continuation = Continuation {
                        content: pending_content.take().unwrap_or_default(),
                        tool_calls: tool_calls
                            .iter()
                            .map(|c| ToolCall::new(c.id.clone(), c.name.clone(), c.arguments.clone()))
                            .collect(),
                        payload: record.payload.clone(),
                    };
                    let outputs: Vec<ToolResult> = tool_calls
                        .iter()
                        .filter_map(|c| c.output.as_ref().map(|o| ToolResult::new(c.id.clone(), o.clone())))
                        .collect();

                    let next = match record.status {
                        RunStepStatus::Completed => {
                            if let Some(missing) = tool_calls.iter().find(|c| c.output.is_none()) {
                                return Err(RecoveryError::MissingOutput {
                                    seq: record.seq,
                                    call_id: missing.id.clone(),
                                });
                            }
                            AgentStep::observation(Observation {
                                results: outputs,
                                payload: record.payload.clone(),
                            })
                        }
                        RunStepStatus::InProgress => {
                            require_last(record, is_last)?;
                            require_status(record, run, RunStatus::Queued)?;
                            AgentStep::pause(Pause {
                                content: continuation.content.clone(),
                                tool_calls: continuation.tool_calls.clone(),
                                completed: outputs,
                                payload: record.payload.clone(),
                            })
                        }
                        RunStepStatus::Cancelled => {
                            require_last(record, is_last)?;
                            require_status(record, run, RunStatus::Cancelled)?;
                            AgentStep::finish(Finish::cancelled().with_payload(record.payload.clone()))
                        }
                        RunStepStatus::Expired => {
                            require_last(record, is_last)?;
                            require_status(record, run, RunStatus::Expired)?;
                            AgentStep::finish(Finish::expired().with_payload(record.payload.clone()))
                        }
                        RunStepStatus::Failed => {
                            require_last(record, is_last)?;
                            require_status(record, run, RunStatus::Failed)?;
                            let error = record
                                .last_error
                                .clone()
                                .or_else(|| run.last_error.clone())
                                .unwrap_or_else(|| RunError::new(ErrorKind::Unknown, "unknown failure"));
                            AgentStep::finish(Finish::failed(error).with_payload(record.payload.clone()))
                        }
                    };
                    // 不含调用也无前置消息的终止记录只代表结束本身
                    let marker = continuation.tool_calls.is_empty()
                        && continuation.content.is_empty()
                        && !matches!(record.status, RunStepStatus::Completed | RunStepStatus::InProgress);
                    if !marker {
                        push(&mut state, AgentStep::continuation(continuation))?;
                    }
                    push(&mut state, next)?;
                }
            }
        }

        tracing::debug!(run_id = %run.id, records = records.len(), steps = state.steps().len(), "state recovered");
        Ok(state)
    }
}

fn push(state: &mut AgentState, step: AgentStep) -> Result<(), RecoveryError> {
    state
        .push_step(step)
        .map_err(|e| RecoveryError::Malformed(e.to_string()))
}

fn require_last(record: &RunStepRecord, is_last: bool) -> Result<(), RecoveryError> {
    if is_last {
        Ok(())
    } else {
        Err(RecoveryError::NotLast {
            seq: record.seq,
            status: record.status,
        })
    }
}

fn require_status(record: &RunStepRecord, run: &Run, expected: RunStatus) -> Result<(), RecoveryError> {
    if run.status == expected {
        Ok(())
    } else {
        Err(RecoveryError::StatusMismatch {
            seq: record.seq,
            step: record.status,
            run: run.status,
        })
    }
}

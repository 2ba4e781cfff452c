//! 计划文本解析
//!
//! 每行形如 `N. action_name({"arg": "..."})`；依赖由参数中的 `$N` / `${N}` 占位符推出。
//! `join` 依赖此前所有任务并结束本次解析；缺少 join 时自动补上。不合法的行跳过并记录 warn。

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::llm::ToolCall;
use crate::react::compiler::graph::{placeholder_regex, Task, JOIN_ACTION};

const END_OF_PLAN: &str = "<END_OF_PLAN>";

static ACTION_RE: OnceLock<Regex> = OnceLock::new();
static THOUGHT_RE: OnceLock<Regex> = OnceLock::new();

fn action_regex() -> &'static Regex {
    ACTION_RE.get_or_init(|| Regex::new(r"^\s*(\d+)\.\s*([A-Za-z_][\w\-]*)\s*\(([^)]*)\)").unwrap())
}

fn thought_regex() -> &'static Regex {
    THOUGHT_RE.get_or_init(|| Regex::new(r"Thought:\s*(.+)").unwrap())
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedPlan {
    pub thought: Option<String>,
    pub tasks: Vec<Task>,
}

impl ParsedPlan {
    /// 是否包含除 join 外的真实任务
    pub fn has_actions(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_join())
    }
}

/// 解析计划文本；没有解析出任何任务时返回空的 tasks
pub fn parse_plan(text: &str) -> ParsedPlan {
    let text = match text.find(END_OF_PLAN) {
        Some(idx) => &text[..idx],
        None => text,
    };

    let thought = thought_regex()
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty());

    let mut tasks: Vec<Task> = Vec::new();
    let mut saw_join = false;
    for line in text.lines() {
        let Some(caps) = action_regex().captures(line) else {
            continue;
        };
        let Ok(index) = caps[1].parse::<u32>() else {
            tracing::warn!(line, "plan line index out of range, skipped");
            continue;
        };
        if tasks.last().is_some_and(|t| t.index >= index) {
            tracing::warn!(line, "plan index not strictly increasing, skipped");
            continue;
        }
        let name = caps[2].to_string();
        let arguments = caps[3].trim().to_string();

        if name == JOIN_ACTION {
            let dependencies = tasks.iter().map(|t| t.index).collect();
            tasks.push(Task::new(
                index,
                ToolCall::new(ToolCall::next_id(), JOIN_ACTION, ""),
                dependencies,
            ));
            saw_join = true;
            break;
        }

        let dependencies: BTreeSet<u32> = placeholder_regex()
            .captures_iter(&arguments)
            .filter_map(|c| c[1].parse::<u32>().ok())
            .collect();
        if dependencies.iter().any(|d| *d >= index) {
            tracing::warn!(line, "plan line depends on a later task, skipped");
            continue;
        }
        tasks.push(Task::new(
            index,
            ToolCall::new(ToolCall::next_id(), name, arguments),
            dependencies.into_iter().collect(),
        ));
    }

    if !saw_join && !tasks.is_empty() {
        let index = tasks.last().map(|t| t.index + 1).unwrap_or(1);
        let dependencies = tasks.iter().map(|t| t.index).collect();
        tasks.push(Task::new(
            index,
            ToolCall::new(ToolCall::next_id(), JOIN_ACTION, ""),
            dependencies,
        ));
    }

    ParsedPlan { thought, tasks }
}

/// 使任务序号从 `after + 1` 之后继续；序号已经更大时原样返回。
/// 依赖与参数中的占位符同步平移；指向计划之外序号的依赖被丢弃，占位符保持原样。
pub fn continue_numbering(tasks: Vec<Task>, after: u32) -> Vec<Task> {
    let Some(min) = tasks.iter().map(|t| t.index).min() else {
        return tasks;
    };
    if min > after {
        return tasks;
    }
    let offset = after + 1 - min;
    let own: HashSet<u32> = tasks.iter().map(|t| t.index).collect();
    tasks
        .into_iter()
        .map(|mut task| {
            task.index += offset;
            task.dependencies = task
                .dependencies
                .iter()
                .filter(|d| own.contains(d))
                .map(|d| d + offset)
                .collect();
            task.tool_call.arguments = placeholder_regex()
                .replace_all(&task.tool_call.arguments, |caps: &Captures| {
                    match caps[1].parse::<u32>() {
                        Ok(n) if own.contains(&n) => caps[0].replace(&caps[1], &(n + offset).to_string()),
                        _ => caps[0].to_string(),
                    }
                })
                .into_owned();
            task
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_four_line_plan() {
        let plan = parse_plan(
            "1. search({\"query\": \"A\"})\n\
             2. search({\"query\": \"B\"})\n\
             3. calc({\"expr\": \"$1 + $2\"})\n\
             4. join()\n\
             <END_OF_PLAN>",
        );
        assert_eq!(plan.tasks.len(), 4);
        assert_eq!(plan.tasks[2].dependencies, vec![1, 2]);
        assert_eq!(plan.tasks[3].dependencies, vec![1, 2, 3]);
        assert!(plan.tasks[3].is_join());
        assert_eq!(plan.tasks[0].tool_call.arguments, "{\"query\": \"A\"}");
    }

    #[test]
    fn test_parse_appends_missing_join() {
        let plan = parse_plan("1. search({\"query\": \"A\"})\n2. search({\"query\": \"${1}\"})");
        assert_eq!(plan.tasks.len(), 3);
        assert_eq!(plan.tasks[1].dependencies, vec![1]);
        let join = &plan.tasks[2];
        assert!(join.is_join());
        assert_eq!(join.index, 3);
        assert_eq!(join.dependencies, vec![1, 2]);
    }

    #[test]
    fn test_parse_skips_malformed_lines_and_stops_at_join() {
        let plan = parse_plan(
            "Thought: look both up\n\
             1. search({\"query\": \"A\"})\n\
             this line is noise\n\
             2. calc({\"expr\": \"$3\"})\n\
             3. join()\n\
             4. search({\"query\": \"late\"})",
        );
        assert_eq!(plan.thought.as_deref(), Some("look both up"));
        let indices: Vec<u32> = plan.tasks.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert_eq!(plan.tasks[1].dependencies, vec![1]);
    }

    #[test]
    fn test_parse_clips_after_end_marker() {
        let plan = parse_plan("1. search({})\n<END_OF_PLAN>\n2. search({})");
        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.tasks[1].is_join());
    }

    #[test]
    fn test_parse_without_tasks() {
        let plan = parse_plan("I can answer this directly: 42");
        assert!(plan.tasks.is_empty());
        assert!(!plan.has_actions());
    }

    #[test]
    fn test_continue_numbering_shifts_indices_and_placeholders() {
        let plan = parse_plan("1. search({\"q\": \"C\"})\n2. calc({\"expr\": \"$1 * ${1}\"})\n3. join()");
        let tasks = continue_numbering(plan.tasks, 4);
        let indices: Vec<u32> = tasks.iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![5, 6, 7]);
        assert_eq!(tasks[1].dependencies, vec![5]);
        assert_eq!(tasks[1].tool_call.arguments, "{\"expr\": \"$5 * ${5}\"}");
        assert_eq!(tasks[2].dependencies, vec![5, 6]);
    }

    #[test]
    fn test_continue_numbering_drops_foreign_dependencies() {
        let plan = parse_plan("3. search({})\n4. calc({\"expr\": \"$1 + $3\"})");
        assert_eq!(plan.tasks[1].dependencies, vec![1, 3]);

        let tasks = continue_numbering(plan.tasks, 4);
        assert_eq!(tasks[1].index, 6);
        assert_eq!(tasks[1].dependencies, vec![5]);
        assert_eq!(tasks[1].tool_call.arguments, "{\"expr\": \"$1 + $5\"}");
        assert_eq!(tasks[2].dependencies, vec![5, 6]);
    }

    #[test]
    fn test_continue_numbering_keeps_already_continued_plan() {
        let plan = parse_plan("5. search({})\n6. join()");
        let tasks = continue_numbering(plan.tasks.clone(), 4);
        assert_eq!(tasks, plan.tasks);
    }
}

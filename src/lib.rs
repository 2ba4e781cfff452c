//! Hive - 可恢复的 Agent 执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 步骤日志、错误、恢复、运行协调器、运行服务、任务调度
//! - **llm**: 消息模型、LlmClient 抽象与 Mock
//! - **observability**: 日志初始化
//! - **react**: 执行策略（ReAct / 并行工具调用 / DAG）
//! - **store**: 运行与步骤记录的持久化接口及内存实现
//! - **tools**: 工具注册表、执行器与并发 Worker

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod react;
pub mod store;
pub mod tools;

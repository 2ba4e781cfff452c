//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__STRATEGY=react`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub tools: ToolsSection,
    pub scheduler: SchedulerSection,
}

/// 执行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// 顺序 ReAct
    React,
    /// 单批并行工具调用
    ToolCalling,
    /// DAG：plan → execute → join → replan
    #[default]
    LlmCompiler,
}

/// [engine] 段
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub strategy: Strategy,
    /// DAG 策略最多重规划次数
    #[serde(default = "default_max_replan")]
    pub max_replan: u32,
    /// 单次处理内最多推进的步数
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_replan() -> u32 {
    6
}

fn default_max_steps() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_replan: default_max_replan(),
            max_steps: default_max_steps(),
        }
    }
}

/// [tools] 段：Worker 并发上限与单次调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// [scheduler] 段
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// 消费者数量
    #[serde(default = "default_consumers")]
    pub consumers: usize,
}

fn default_consumers() -> usize {
    4
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            consumers: default_consumers(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

//! LLM 层：消息模型、客户端抽象与 Mock 实现

pub mod message;
pub mod mock;
pub mod traits;

pub use message::{FunctionTool, Message, Role, ToolCall};
pub use mock::MockLlmClient;
pub use traits::{LlmClient, LlmError};

pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod worker;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use schema::parameters_schema_for;
pub use worker::ToolWorker;

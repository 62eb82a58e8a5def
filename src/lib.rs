//! CaMeL core: capability-mediated sandboxing for a planner/executor agent
//! loop. Untrusted data retrieved through [`qllm`] is tracked with a
//! [`capability::Capability`] label as it flows through a restricted
//! Python-subset interpreter, and the [`policy`] engine denies state-changing
//! tool calls whose inputs are tainted by that untrusted data.

pub mod capability;
pub mod config;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod interpreter;
pub mod ir;
pub mod logging;
pub mod model;
pub mod parser;
pub mod policy;
pub mod qllm;
pub mod run;
pub mod tooling;
pub mod trace;
pub mod value;
pub mod whitelist;

pub use capability::{Capability, SourceId};
pub use env::Environment;
pub use error::{CamelError, CamelResult, Issue, IssueStage};
pub use interpreter::{Interpreter, RunOutcome};
pub use ir::Program;
pub use model::{ChatMessage, ModelClient, ModelResponse, Usage};
pub use policy::EvalMode;
pub use run::{run_agent_loop, LastToolError, RunInputs, RunResult, ToolMeta};
pub use tooling::{AbortSignal, ToolDescriptor, ToolExecutor, ToolRegistry, ToolResult};
pub use value::{Dict, Value};

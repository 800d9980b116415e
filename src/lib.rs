pub mod action_schema;
pub mod config;
pub mod desktop;
pub mod error;
pub mod geometry;
pub mod grounding;
pub mod http;
pub mod logging;
pub mod orchestrator;
pub mod plan;
pub mod planner;
pub mod prompts;
pub mod vision;

pub use action_schema::{Action, ActionKind, PointerTarget, ScrollDirection};
pub use error::{AgentError, AgentResult};
pub use orchestrator::{EngineState, ExecutionOutcome, ExecutionReport, FailureCause, InterruptHandle, Orchestrator};
pub use plan::{validate_plan, Plan};

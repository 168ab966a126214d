// Execution Module
// Dependency ordering, variable scoping, step dispatch and suite orchestration

pub mod events;
pub mod executor;
pub mod graph;
pub mod registry;
pub mod runner;
pub mod scope;
pub mod strategies;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::{ExecutionMode, Orchestrator, OrchestratorConfig};
pub use graph::{DependencyGraph, ExecutionPlan, GraphError, GraphErrorKind, NodeState};
pub use registry::{ExportRegistry, NodeInfo};
pub use runner::run_steps;
pub use scope::{ScopeSnapshot, VariableScope, VariableSource};
pub use strategies::{StepContext, StepDispatcher, StepStrategy, SuiteCatalog};

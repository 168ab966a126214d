// Flowtest Engine Library
// Dependency-aware orchestration of declarative API test suites

pub mod collaborators;
pub mod config;
pub mod error;
pub mod execution;
pub mod expression;
pub mod interpolation;
pub mod loader;
pub mod model;
pub mod value;

// Re-export commonly used types
pub use error::{
    ConfigError, EngineError, EngineResult, InterpolationError, LoadError, OrchestratorError,
    StepError, TransportError,
};

pub use config::EngineConfig;
pub use loader::SuiteLoader;

// Re-export collaborator types
pub use collaborators::{
    Collaborators, ConsoleInputProvider, HttpTransport, InputProvider, ReqwestTransport,
    ReqwestTransportFactory, TransportFactory,
};

// Re-export execution types
pub use execution::{
    progress_channel, DependencyGraph, EventSender, ExecutionEvent, ExecutionMode, ExportRegistry,
    Orchestrator, OrchestratorConfig, ProgressReceiver, ProgressSender, VariableScope,
    VariableSource,
};

pub use expression::{ExpressionEngine, SandboxLimits};
pub use interpolation::Interpolator;

// Re-export model types
pub use model::{
    ExecutionStatus, RunResult, RunStats, StepResult, Suite, SuiteResult,
};
pub use value::VariableMap;

// Data Models
// Suite documents and execution results

pub mod results;
pub mod suite;

pub use results::{
    AssertionResult, DependencyResult, ExecutionStatus, FailedSuite, HttpResult, RequestDetails,
    ResponseDetails, RunResult, RunStats, StepResult, SuiteResult,
};
pub use suite::{
    CallSpec, DelaySpec, Dependency, ImportSpec, InputSpec, InputType, IterateSpec, Priority,
    RequestSpec, ScenarioBlock, ScenarioSpec, Step, Suite,
};

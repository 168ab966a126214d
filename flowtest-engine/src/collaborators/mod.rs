// Collaborators Module
// Pluggable HTTP transport, assertion, capture, script and input services used by steps

pub mod assertions;
pub mod capture;
pub mod input;
pub mod scripts;
pub mod transport;

// Re-export key types
pub use assertions::DefaultAssertionEvaluator;
pub use capture::ExpressionCaptureEvaluator;
pub use input::ConsoleInputProvider;
pub use scripts::ExpressionScriptRunner;
pub use transport::{ReqwestTransport, ReqwestTransportFactory};

use crate::error::{StepError, TransportError};
use crate::model::{AssertionResult, HttpResult, InputSpec, RequestSpec};
use crate::value::VariableMap;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

/// Sends one interpolated request
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute a request; transport failures are reported in the result, not raised
    async fn execute_request(&self, step_name: &str, request: &RequestSpec) -> HttpResult;
}

/// Creates a transport for one in-flight suite
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Arc<dyn HttpTransport>, TransportError>;
}

/// Checks a step's `assert` block against a response
pub trait AssertionEvaluator: Send + Sync {
    fn validate_assertions(&self, spec: &Value, result: &HttpResult) -> Vec<AssertionResult>;
}

/// Extracts variables from a response
pub trait CaptureEvaluator: Send + Sync {
    /// `spec` maps variable names to capture expressions
    fn capture_variables(
        &self,
        spec: &VariableMap,
        result: &HttpResult,
        variables: &VariableMap,
    ) -> Result<VariableMap, StepError>;
}

/// Variables set and request changes produced by a script
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    pub variables: VariableMap,
    /// Present when the script modified the request
    pub request: Option<RequestSpec>,
}

/// Runs pre and post request scripts in a sandbox
pub trait ScriptRunner: Send + Sync {
    /// `variables` is a read-only snapshot; `request` is the request about to be
    /// sent, absent for post-request scripts
    fn run_script(
        &self,
        script: &str,
        variables: &VariableMap,
        request: Option<&RequestSpec>,
    ) -> Result<ScriptOutcome, StepError>;
}

/// Supplies values for input steps
#[async_trait::async_trait]
pub trait InputProvider: Send + Sync {
    /// Whether prompts block on a user
    fn is_interactive(&self) -> bool;

    async fn prompt(&self, spec: &InputSpec) -> Result<Value, StepError>;
}

/// The set of collaborators a run works with
#[derive(Clone)]
pub struct Collaborators {
    pub transports: Arc<dyn TransportFactory>,
    pub assertions: Arc<dyn AssertionEvaluator>,
    pub captures: Arc<dyn CaptureEvaluator>,
    pub scripts: Arc<dyn ScriptRunner>,
    pub input: Arc<dyn InputProvider>,
}

impl Collaborators {
    /// Default implementations around a transport factory
    pub fn new(transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            transports,
            assertions: Arc::new(DefaultAssertionEvaluator::new()),
            captures: Arc::new(ExpressionCaptureEvaluator::default()),
            scripts: Arc::new(ExpressionScriptRunner::default()),
            input: Arc::new(ConsoleInputProvider::non_interactive()),
        }
    }

    pub fn with_assertions(mut self, assertions: Arc<dyn AssertionEvaluator>) -> Self {
        self.assertions = assertions;
        self
    }

    pub fn with_captures(mut self, captures: Arc<dyn CaptureEvaluator>) -> Self {
        self.captures = captures;
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptRunner>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_input(mut self, input: Arc<dyn InputProvider>) -> Self {
        self.input = input;
        self
    }
}

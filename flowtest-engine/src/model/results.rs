// Result Models
// Step, suite and run outcomes handed to reporting

use crate::value::VariableMap;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a step or suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Skipped,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionStatus::Failure)
    }
}

// =============================================================================
// HTTP exchange
// =============================================================================

/// Request as actually sent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDetails {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Response as received
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseDetails {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, or the raw text as a string
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub size_bytes: usize,
}

/// Result of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResult {
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_details: Option<RequestDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_details: Option<ResponseDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl HttpResult {
    pub fn success(request: RequestDetails, response: ResponseDetails, duration_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Success,
            duration_ms,
            request_details: Some(request),
            response_details: Some(response),
            error_message: None,
        }
    }

    pub fn failure(request: RequestDetails, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            duration_ms,
            request_details: Some(request),
            response_details: None,
            error_message: Some(message.into()),
        }
    }

    /// Response view used by captures, scenarios and assertions
    ///
    /// `{ status_code, headers, body, duration_ms }`, with nulls when no
    /// response was received.
    pub fn response_context(&self) -> Value {
        let mut context = VariableMap::new();
        match &self.response_details {
            Some(response) => {
                context.insert("status_code".into(), Value::from(response.status_code));
                context.insert(
                    "headers".into(),
                    Value::Object(
                        response
                            .headers
                            .iter()
                            .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
                            .collect(),
                    ),
                );
                context.insert("body".into(), response.body.clone());
            }
            None => {
                context.insert("status_code".into(), Value::Null);
                context.insert("headers".into(), Value::Object(VariableMap::new()));
                context.insert("body".into(), Value::Null);
            }
        }
        context.insert("duration_ms".into(), Value::from(self.duration_ms));
        Value::Object(context)
    }
}

/// Outcome of one assertion check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub field: String,
    pub operator: String,
    pub expected: Value,
    pub actual: Value,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Step and suite results
// =============================================================================

/// Outcome of a step, including nested iterations, calls and scenarios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseDetails>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionResult>,
    #[serde(default, skip_serializing_if = "VariableMap::is_empty")]
    pub captured: VariableMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StepResult>,
}

impl StepResult {
    pub fn new(name: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            name: name.into(),
            step_id: None,
            status,
            duration_ms: 0,
            request: None,
            response: None,
            assertions: Vec::new(),
            captured: VariableMap::new(),
            error_message: None,
            children: Vec::new(),
        }
    }

    pub fn success(name: impl Into<String>) -> Self {
        Self::new(name, ExecutionStatus::Success)
    }

    pub fn failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::new(name, ExecutionStatus::Failure);
        result.error_message = Some(message.into());
        result
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::new(name, ExecutionStatus::Skipped);
        result.error_message = Some(reason.into());
        result
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_step_id(mut self, step_id: Option<String>) -> Self {
        self.step_id = step_id;
        self
    }
}

/// Outcome of a suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub node_id: String,
    pub suite_name: String,
    pub status: ExecutionStatus,
    pub steps: Vec<StepResult>,
    pub duration_ms: u64,
    #[serde(default)]
    pub exports: VariableMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Served from the dependency cache instead of running
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
}

impl SuiteResult {
    pub fn new(node_id: impl Into<String>, suite_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            suite_name: suite_name.into(),
            status: ExecutionStatus::Success,
            steps: Vec::new(),
            duration_ms: 0,
            exports: VariableMap::new(),
            warnings: Vec::new(),
            error_message: None,
            cached: false,
            source_path: None,
        }
    }

    pub fn failed(
        node_id: impl Into<String>,
        suite_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(node_id, suite_name);
        result.status = ExecutionStatus::Failure;
        result.error_message = Some(message.into());
        result
    }

    pub fn skipped(
        node_id: impl Into<String>,
        suite_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(node_id, suite_name);
        result.status = ExecutionStatus::Skipped;
        result.error_message = Some(reason.into());
        result
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_failure()).count()
    }
}

/// Cached outcome of a resolved dependency node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyResult {
    pub node_id: String,
    pub suite_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub exports: VariableMap,
}

impl From<&SuiteResult> for DependencyResult {
    fn from(result: &SuiteResult) -> Self {
        Self {
            node_id: result.node_id.clone(),
            suite_name: result.suite_name.clone(),
            success: result.status.is_success(),
            duration_ms: result.duration_ms,
            exports: result.exports.clone(),
        }
    }
}

// =============================================================================
// Run aggregate
// =============================================================================

/// Running totals reported after every suite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub discovered: usize,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunStats {
    pub fn new(discovered: usize) -> Self {
        Self {
            discovered,
            ..Default::default()
        }
    }

    /// Count a finished suite
    pub fn record(&mut self, status: ExecutionStatus) {
        match status {
            ExecutionStatus::Success => {
                self.completed += 1;
                self.successful += 1;
            }
            ExecutionStatus::Failure => {
                self.completed += 1;
                self.failed += 1;
            }
            ExecutionStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Summary line for a failed suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedSuite {
    pub node_id: String,
    pub suite_name: String,
    pub message: String,
}

/// Aggregate handed to reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub stats: RunStats,
    pub suites: Vec<SuiteResult>,
    pub failed_suites: Vec<FailedSuite>,
}

impl RunResult {
    /// Build the aggregate from ordered suite results
    pub fn from_suites(
        started_at: DateTime<Utc>,
        duration_ms: u64,
        stats: RunStats,
        suites: Vec<SuiteResult>,
    ) -> Self {
        let failed_suites: Vec<FailedSuite> = suites
            .iter()
            .filter(|s| s.status.is_failure())
            .map(|s| FailedSuite {
                node_id: s.node_id.clone(),
                suite_name: s.suite_name.clone(),
                message: s.error_message.clone().unwrap_or_else(|| {
                    let failed = s.failed_steps();
                    format!("{} step(s) failed", failed)
                }),
            })
            .collect();

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            duration_ms,
            success: failed_suites.is_empty(),
            stats,
            suites,
            failed_suites,
        }
    }

    pub fn suite(&self, node_id: &str) -> Option<&SuiteResult> {
        self.suites.iter().find(|s| s.node_id == node_id)
    }
}

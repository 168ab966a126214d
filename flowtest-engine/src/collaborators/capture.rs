// Response Capture
// Extracts variables from responses with sandboxed expressions

use crate::collaborators::CaptureEvaluator;
use crate::error::StepError;
use crate::expression::{ExpressionEngine, SandboxLimits};
use crate::model::HttpResult;
use crate::value::VariableMap;

use serde_json::Value;

/// Capture evaluator over the expression sandbox
///
/// Expressions see the current variables plus the response fields
/// `status_code`, `headers`, `body` and `duration_ms` (also grouped under
/// `response`). A leading `$.` is shorthand for `body.`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionCaptureEvaluator {
    engine: ExpressionEngine,
}

impl ExpressionCaptureEvaluator {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            engine: ExpressionEngine::with_limits(limits),
        }
    }

    /// Variables visible to capture expressions
    pub fn context(result: &HttpResult, variables: &VariableMap) -> VariableMap {
        let mut context = variables.clone();
        let response = result.response_context();
        if let Value::Object(fields) = &response {
            for (name, value) in fields {
                context.insert(name.clone(), value.clone());
            }
        }
        context.insert("response".into(), response);
        context
    }
}

fn normalize(expression: &str) -> String {
    let expression = expression.trim();
    if expression == "$" {
        "body".to_string()
    } else if let Some(rest) = expression.strip_prefix("$.") {
        format!("body.{}", rest)
    } else if let Some(rest) = expression.strip_prefix("$[") {
        format!("body[{}", rest)
    } else {
        expression.to_string()
    }
}

impl CaptureEvaluator for ExpressionCaptureEvaluator {
    fn capture_variables(
        &self,
        spec: &VariableMap,
        result: &HttpResult,
        variables: &VariableMap,
    ) -> Result<VariableMap, StepError> {
        let context = Self::context(result, variables);
        let mut captured = VariableMap::new();

        for (name, expression) in spec {
            let value = match expression {
                Value::String(source) => self
                    .engine
                    .evaluate(&normalize(source), &context)
                    .map_err(|err| StepError::Capture {
                        name: name.clone(),
                        message: err.message,
                    })?,
                literal => literal.clone(),
            };
            captured.insert(name.clone(), value);
        }

        Ok(captured)
    }
}

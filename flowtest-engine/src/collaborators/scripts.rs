// Script Runner
// Sandboxed pre/post-request scripts with a controlled variable setter

use crate::collaborators::{ScriptOutcome, ScriptRunner};
use crate::error::StepError;
use crate::expression::{ExpressionEngine, SandboxLimits};
use crate::model::RequestSpec;
use crate::value::{split_path, VariableMap};

use serde_json::Value;
use tracing::debug;

const REQUEST_PREFIX: &str = "request.";

/// Runs scripts written in the expression language
///
/// Statements are separated by newlines or `;`. `set('name', value)` is the
/// only way to produce output; names starting with `request.` update the
/// outgoing request (`set('request.headers.Authorization', 'Bearer ' + token)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionScriptRunner {
    engine: ExpressionEngine,
}

impl ExpressionScriptRunner {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            engine: ExpressionEngine::with_limits(limits),
        }
    }
}

/// Assign `value` at `segments`, creating intermediate objects
fn set_path(target: &mut Value, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(VariableMap::new());
    }
    if let Value::Object(map) = target {
        let slot = map.entry(first.clone()).or_insert(Value::Null);
        set_path(slot, rest, value);
    }
}

impl ScriptRunner for ExpressionScriptRunner {
    fn run_script(
        &self,
        script: &str,
        variables: &VariableMap,
        request: Option<&RequestSpec>,
    ) -> Result<ScriptOutcome, StepError> {
        let mut context = variables.clone();
        let mut request_value = match request {
            Some(request) => Some(
                serde_json::to_value(request).map_err(|e| StepError::Script(e.to_string()))?,
            ),
            None => None,
        };
        if let Some(value) = &request_value {
            context.insert("request".into(), value.clone());
        }

        let output = self
            .engine
            .run_script(script, &context)
            .map_err(|err| StepError::Script(err.message))?;

        let mut outcome = ScriptOutcome::default();
        let mut request_modified = false;
        for (name, value) in output.assignments {
            match (name.strip_prefix(REQUEST_PREFIX), request_value.as_mut()) {
                (Some(path), Some(target)) => {
                    set_path(target, &split_path(path), value);
                    request_modified = true;
                }
                _ => {
                    outcome.variables.insert(name, value);
                }
            }
        }

        if request_modified {
            if let Some(value) = request_value {
                let modified: RequestSpec = serde_json::from_value(value)
                    .map_err(|e| StepError::Script(format!("invalid request change: {}", e)))?;
                outcome.request = Some(modified);
            }
        }

        debug!(
            variables = outcome.variables.len(),
            request_modified, "script finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn vars() -> VariableMap {
        json!({"token": "abc123", "count": 2})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_script_sets_variables() {
        let runner = ExpressionScriptRunner::default();
        let outcome = runner
            .run_script(
                "set('next', count + 1)\nset('label', upper(token)); set('flag', count > 1)",
                &vars(),
                None,
            )
            .unwrap();
        assert_eq!(outcome.variables["next"], json!(3));
        assert_eq!(outcome.variables["label"], json!("ABC123"));
        assert_eq!(outcome.variables["flag"], json!(true));
        assert!(outcome.request.is_none());
    }

    #[test]
    fn test_script_modifies_request() {
        let runner = ExpressionScriptRunner::default();
        let request = RequestSpec::get("/profile");
        let outcome = runner
            .run_script(
                "set('request.headers.Authorization', 'Bearer ' + token); set('request.url', request.url + '?v=2')",
                &vars(),
                Some(&request),
            )
            .unwrap();
        let modified = outcome.request.unwrap();
        assert_eq!(modified.headers["Authorization"], json!("Bearer abc123"));
        assert_eq!(modified.url, "/profile?v=2");
        assert!(outcome.variables.is_empty());
    }

    #[test]
    fn test_script_errors_and_limits() {
        let runner = ExpressionScriptRunner::default();
        assert!(matches!(
            runner.run_script("set('x', 1 / 0)", &vars(), None),
            Err(StepError::Script(_))
        ));

        let limited = ExpressionScriptRunner::new(
            SandboxLimits::default()
                .with_timeout(Duration::from_secs(5))
                .with_max_steps(10),
        );
        let long = (0..50).map(|i| format!("set('v{}', {})", i, i)).collect::<Vec<_>>().join(";");
        assert!(limited.run_script(&long, &vars(), None).is_err());
    }

    #[test]
    fn test_set_path_creates_objects() {
        let mut value = json!({"a": 1});
        set_path(&mut value, &["b".into(), "c".into()], json!(true));
        assert_eq!(value, json!({"a": 1, "b": {"c": true}}));
    }
}

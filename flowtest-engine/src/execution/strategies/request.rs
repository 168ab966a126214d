// Request Strategy
// Plain HTTP request steps: scripts, send, capture, assert

use super::{StepContext, StepDispatcher, StepStrategy};
use crate::execution::scope::VariableSource;
use crate::model::{ExecutionStatus, HttpResult, Step, StepResult};

use serde_json::Value;
use tracing::{debug, warn};

/// Fallback strategy for every step
#[derive(Debug, Default)]
pub struct RequestStrategy;

/// Result of the request phase of a step
pub struct RequestOutcome {
    pub result: StepResult,
    pub http: Option<HttpResult>,
}

/// Run the request part of a step
///
/// Interpolate the request, run the pre-request script, send, capture,
/// assert, then run the post-request script. A step without a request only
/// applies its variables and succeeds.
pub async fn perform_request(step: &Step, ctx: &mut StepContext) -> RequestOutcome {
    let mut result = StepResult::success(&step.name);

    let Some(template) = &step.request else {
        return RequestOutcome { result, http: None };
    };

    let mut request = match serde_json::to_value(template) {
        Ok(raw) => match serde_json::from_value(ctx.interpolate(&raw)) {
            Ok(request) => request,
            Err(err) => {
                return RequestOutcome {
                    result: StepResult::failure(
                        &step.name,
                        format!("request did not interpolate to a valid request: {}", err),
                    ),
                    http: None,
                }
            }
        },
        Err(err) => {
            return RequestOutcome {
                result: StepResult::failure(&step.name, err.to_string()),
                http: None,
            }
        }
    };

    if let Some(script) = &step.pre_request_script {
        let snapshot = ctx.scope.all_variables();
        match ctx
            .collaborators
            .scripts
            .run_script(script, &snapshot, Some(&request))
        {
            Ok(outcome) => {
                ctx.scope.set_runtime_variables(outcome.variables);
                if let Some(modified) = outcome.request {
                    request = modified;
                }
            }
            Err(err) => {
                return RequestOutcome {
                    result: StepResult::failure(&step.name, format!("pre-request {}", err)),
                    http: None,
                }
            }
        }
    }

    let http = ctx.transport.execute_request(&step.name, &request).await;
    result.duration_ms = http.duration_ms;
    result.request = http.request_details.clone();
    result.response = http.response_details.clone();

    if http.status.is_failure() {
        result.status = ExecutionStatus::Failure;
        result.error_message = http.error_message.clone();
        warn!(step = %step.name, error = ?http.error_message, "request failed");
        return RequestOutcome {
            result,
            http: Some(http),
        };
    }

    if !step.capture.is_empty() {
        let snapshot = ctx.scope.all_variables();
        match ctx
            .collaborators
            .captures
            .capture_variables(&step.capture, &http, &snapshot)
        {
            Ok(captured) => {
                ctx.record_captures(&captured);
                result.captured = captured;
            }
            Err(err) => {
                result.status = ExecutionStatus::Failure;
                result.error_message = Some(err.to_string());
            }
        }
    }

    if let Some(spec) = &step.assertions {
        let spec = ctx.interpolate(spec);
        apply_assertions(&mut result, &spec, &http, ctx);
    }

    if let Some(script) = &step.post_request_script {
        let mut snapshot = ctx.scope.all_variables();
        snapshot.insert("response".into(), http.response_context());
        match ctx.collaborators.scripts.run_script(script, &snapshot, None) {
            Ok(outcome) => {
                ctx.record_captures(&outcome.variables);
                result.captured.extend(outcome.variables);
            }
            Err(err) => {
                result.status = ExecutionStatus::Failure;
                result
                    .error_message
                    .get_or_insert_with(|| format!("post-request {}", err));
            }
        }
    }

    RequestOutcome {
        result,
        http: Some(http),
    }
}

/// Validate assertions and fold them into a step result
pub fn apply_assertions(result: &mut StepResult, spec: &Value, http: &HttpResult, ctx: &StepContext) {
    let assertions = ctx.collaborators.assertions.validate_assertions(spec, http);
    let failed: Vec<String> = assertions
        .iter()
        .filter(|a| !a.passed)
        .map(|a| {
            a.message
                .clone()
                .unwrap_or_else(|| format!("{} {} failed", a.field, a.operator))
        })
        .collect();

    if !failed.is_empty() {
        debug!(failed = failed.len(), "assertions failed");
        result.status = ExecutionStatus::Failure;
        result
            .error_message
            .get_or_insert_with(|| format!("assertion failed: {}", failed.join("; ")));
    }
    result.assertions.extend(assertions);
}

#[async_trait::async_trait]
impl StepStrategy for RequestStrategy {
    fn name(&self) -> &'static str {
        "request"
    }

    fn can_handle(&self, _step: &Step) -> bool {
        true
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut StepContext,
        _dispatcher: &StepDispatcher,
    ) -> StepResult {
        perform_request(step, ctx).await.result
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::model::RequestSpec;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_request_capture_and_assert() {
        let transport = Arc::new(
            MockTransport::new().respond("POST", "/login", 200, json!({"token": "abc123"})),
        );
        let mut ctx = context(transport.clone());
        ctx.scope.set_suite_variable("user", json!("ada"));

        let step = Step::new("login")
            .with_request(RequestSpec::new("POST", "/login").with_body(json!({"name": "{{user}}"})))
            .with_capture("token", "body.token")
            .with_assertions(json!({"status_code": 200, "body.token": {"exists": true}}));

        let result = perform_request(&step, &mut ctx).await.result;
        assert!(result.status.is_success(), "{:?}", result.error_message);
        assert_eq!(result.captured["token"], json!("abc123"));
        assert_eq!(result.assertions.len(), 2);
        assert_eq!(ctx.scope.resolve("token"), Some(json!("abc123")));
        assert_eq!(ctx.captured["token"], json!("abc123"));

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].body, Some(json!({"name": "ada"})));
    }

    #[tokio::test]
    async fn test_failed_assertion_fails_step() {
        let transport = Arc::new(MockTransport::new().respond("GET", "/health", 503, json!({})));
        let mut ctx = context(transport);
        let step = Step::new("health")
            .with_request(RequestSpec::get("/health"))
            .with_assertions(json!({"status_code": 200}));

        let result = perform_request(&step, &mut ctx).await.result;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.error_message.unwrap().contains("assertion failed"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_a_failed_step() {
        let mut ctx = context(Arc::new(MockTransport::new()));
        let step = Step::new("nowhere").with_request(RequestSpec::get("/missing"));
        let result = perform_request(&step, &mut ctx).await.result;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.error_message.unwrap().contains("no route"));
    }

    #[tokio::test]
    async fn test_scripts_modify_request_and_set_variables() {
        let transport = Arc::new(
            MockTransport::new().respond("GET", "/me", 200, json!({"id": 3})),
        );
        let mut ctx = context(transport.clone());
        ctx.scope.set_suite_variable("token", json!("t0k"));

        let mut step = Step::new("me").with_request(RequestSpec::get("/me"));
        step.pre_request_script =
            Some("set('request.headers.Authorization', 'Bearer ' + token)".into());
        step.post_request_script = Some("set('user_id', response.body.id * 10)".into());

        let result = perform_request(&step, &mut ctx).await.result;
        assert!(result.status.is_success(), "{:?}", result.error_message);
        assert_eq!(
            transport.sent.lock().unwrap()[0].headers["Authorization"],
            json!("Bearer t0k")
        );
        assert_eq!(ctx.scope.resolve("user_id"), Some(json!(30)));
    }
}

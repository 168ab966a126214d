// Iteration Strategy
// Repeats a step over a collection or a count, re-dispatching each generated step

use super::{StepContext, StepDispatcher, StepStrategy};
use crate::model::{ExecutionStatus, IterateSpec, Step, StepResult};
use crate::value::{ValueExt, VariableMap};

use serde_json::Value;
use tracing::debug;

/// Upper bound on `count` iterations
pub const MAX_ITERATIONS: u64 = 10_000;

#[derive(Debug, Default)]
pub struct IterationStrategy;

/// Items to iterate over, after interpolation
fn resolve_items(spec: &IterateSpec, ctx: &StepContext) -> Result<Vec<Value>, String> {
    if let Some(over) = &spec.over {
        return match ctx.interpolate(over) {
            Value::Array(items) => Ok(items),
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| {
                    let mut entry = VariableMap::new();
                    entry.insert("key".into(), Value::String(key));
                    entry.insert("value".into(), value);
                    Value::Object(entry)
                })
                .collect()),
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Array(items)) => Ok(items),
                _ => Err(format!("'{}' is not a list", s)),
            },
            other => Err(format!("cannot iterate over {}", other.type_name())),
        };
    }

    if let Some(count) = &spec.count {
        let resolved = ctx.interpolate(count);
        return match resolved.to_number_lenient() {
            Some(n) if n > MAX_ITERATIONS as f64 => Err(format!(
                "iteration count {} exceeds the limit of {}",
                resolved, MAX_ITERATIONS
            )),
            Some(n) if n >= 0.0 => Ok((0..n as u64).map(Value::from).collect()),
            _ => Err(format!("invalid iteration count {}", resolved)),
        };
    }

    Err("iterate needs 'over' or 'count'".into())
}

#[async_trait::async_trait]
impl StepStrategy for IterationStrategy {
    fn name(&self) -> &'static str {
        "iteration"
    }

    fn can_handle(&self, step: &Step) -> bool {
        step.iterate.is_some()
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut StepContext,
        dispatcher: &StepDispatcher,
    ) -> StepResult {
        let Some(spec) = &step.iterate else {
            return StepResult::failure(&step.name, "step has no iterate block");
        };

        let items = match resolve_items(spec, ctx) {
            Ok(items) => items,
            Err(message) => return StepResult::failure(&step.name, message),
        };
        debug!(step = %step.name, iterations = items.len(), "iterating step");

        let continue_on_failure = step.continue_on_failure || ctx.continue_on_failure;
        let mut result = StepResult::success(&step.name);

        for (index, item) in items.into_iter().enumerate() {
            ctx.scope.set_runtime_variable(spec.item.clone(), item);
            ctx.scope
                .set_runtime_variable(spec.index_as.clone(), Value::from(index));

            let mut generated = step.clone();
            generated.iterate = None;
            generated.name = format!("{} [{}]", step.name, index);

            let child = dispatcher.dispatch(&generated, ctx).await;
            result.captured.extend(child.captured.clone());
            let failed = child.status.is_failure();
            result.children.push(child);

            if failed {
                result.status = ExecutionStatus::Failure;
                if result.error_message.is_none() {
                    result.error_message = Some(format!("iteration {} failed", index));
                }
                if !continue_on_failure {
                    break;
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::execution::scope::VariableSource;
    use crate::model::RequestSpec;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_iterate_over_list() {
        let transport = Arc::new(
            MockTransport::new()
                .respond("GET", "/users/1", 200, json!({"name": "a"}))
                .respond("GET", "/users/2", 200, json!({"name": "b"})),
        );
        let mut ctx = context(transport.clone());
        ctx.scope.set_suite_variable("ids", json!([1, 2]));

        let step = Step::new("users")
            .with_iterate(IterateSpec::over(json!("{{ids}}")).with_alias("id"))
            .with_request(RequestSpec::get("/users/{{id}}"))
            .with_capture("last_name", "body.name");

        let result = StepDispatcher::new().dispatch(&step, &mut ctx).await;
        assert!(result.status.is_success(), "{:?}", result.error_message);
        assert_eq!(result.children.len(), 2);
        assert_eq!(result.children[1].name, "users [1]");
        assert_eq!(transport.sent_urls(), vec!["/users/1", "/users/2"]);
        assert_eq!(ctx.scope.resolve("last_name"), Some(json!("b")));
        assert_eq!(ctx.scope.resolve("index"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_iterate_count_stops_on_failure() {
        let transport = Arc::new(MockTransport::new().respond("GET", "/page/0", 200, json!({})));
        let mut ctx = context(transport.clone());
        let mut iterate = IterateSpec::default();
        iterate.count = Some(json!(3));
        iterate.item = "page".into();
        iterate.index_as = "i".into();

        let step = Step::new("pages")
            .with_iterate(iterate)
            .with_request(RequestSpec::get("/page/{{page}}"));
        let result = StepDispatcher::new().dispatch(&step, &mut ctx).await;

        assert_eq!(result.status, ExecutionStatus::Failure);
        assert_eq!(result.children.len(), 2);
        assert_eq!(transport.sent_urls(), vec!["/page/0", "/page/1"]);

        let mut ctx = context(transport.clone());
        let result = StepDispatcher::new()
            .dispatch(&step.clone().continue_on_failure(), &mut ctx)
            .await;
        assert_eq!(result.children.len(), 3);
    }

    #[tokio::test]
    async fn test_iterate_count_is_bounded() {
        let transport = Arc::new(MockTransport::new());
        let mut ctx = context(transport.clone());
        let mut iterate = IterateSpec::default();
        iterate.count = Some(json!(1e12));

        let step = Step::new("flood")
            .with_iterate(iterate)
            .with_request(RequestSpec::get("/x"));
        let result = StepDispatcher::new().dispatch(&step, &mut ctx).await;

        assert!(result.status.is_failure());
        assert!(result.error_message.unwrap().contains("exceeds the limit"));
        assert!(transport.sent_urls().is_empty());
    }

    #[tokio::test]
    async fn test_iterate_rejects_scalars() {
        let mut ctx = context(Arc::new(MockTransport::new()));
        let step = Step::new("bad").with_iterate(IterateSpec::over(json!(5)));
        let result = StepDispatcher::new().dispatch(&step, &mut ctx).await;
        assert!(result.status.is_failure());
        assert!(result.error_message.unwrap().contains("cannot iterate"));
    }
}

// Scenario Strategy
// Conditional branches evaluated against the step's response

use super::request::{apply_assertions, perform_request};
use super::{StepContext, StepDispatcher, StepStrategy};
use crate::collaborators::ExpressionCaptureEvaluator;
use crate::execution::scope::VariableSource;
use crate::model::{ExecutionStatus, HttpResult, ScenarioBlock, Step, StepResult};
use crate::value::ValueExt;

use serde_json::Value;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ScenarioStrategy;

fn branch_name(index: usize, name: Option<&str>, taken: bool) -> String {
    let label = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("scenario {}", index + 1));
    format!("{} ({})", label, if taken { "then" } else { "else" })
}

/// Apply a taken branch; returns the branch result
async fn apply_block(
    name: String,
    block: &ScenarioBlock,
    http: Option<&HttpResult>,
    ctx: &mut StepContext,
) -> StepResult {
    let mut result = StepResult::success(name);

    if !block.variables.is_empty() {
        let resolved = ctx.interpolate_map(&block.variables);
        ctx.scope.set_runtime_variables(resolved);
    }

    if let Some(input) = &block.input {
        match ctx.collaborators.input.prompt(input).await {
            Ok(value) => {
                ctx.scope
                    .set_runtime_variable(input.variable.clone(), value.clone());
                result.captured.insert(input.variable.clone(), value);
            }
            Err(err) => return StepResult::failure(&result.name, err.to_string()),
        }
    }

    if let Some(http) = http {
        if !block.capture.is_empty() {
            let snapshot = ctx.scope.all_variables();
            match ctx
                .collaborators
                .captures
                .capture_variables(&block.capture, http, &snapshot)
            {
                Ok(captured) => {
                    ctx.record_captures(&captured);
                    result.captured.extend(captured);
                }
                Err(err) => {
                    result.status = ExecutionStatus::Failure;
                    result.error_message = Some(err.to_string());
                }
            }
        }

        if let Some(spec) = &block.assertions {
            let spec = ctx.interpolate(spec);
            apply_assertions(&mut result, &spec, http, ctx);
        }
    }

    result
}

#[async_trait::async_trait]
impl StepStrategy for ScenarioStrategy {
    fn name(&self) -> &'static str {
        "scenario"
    }

    fn can_handle(&self, step: &Step) -> bool {
        step.scenarios.as_ref().is_some_and(|s| !s.is_empty())
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut StepContext,
        _dispatcher: &StepDispatcher,
    ) -> StepResult {
        let outcome = perform_request(step, ctx).await;
        let mut result = outcome.result;
        if result.status.is_failure() {
            return result;
        }

        let http = outcome.http;
        let empty = HttpResult::failure(Default::default(), "no request", 0);
        let response_source = http.as_ref().unwrap_or(&empty);

        for (index, scenario) in step.scenarios.iter().flatten().enumerate() {
            let condition = ctx
                .interpolate(&Value::String(scenario.condition.clone()))
                .as_display_string();
            let variables =
                ExpressionCaptureEvaluator::context(response_source, &ctx.scope.all_variables());

            let taken = match ctx.engine.evaluate_condition(&condition, &variables) {
                Ok(taken) => taken,
                Err(err) => {
                    result.status = ExecutionStatus::Failure;
                    result.error_message = Some(format!(
                        "scenario condition '{}' failed: {}",
                        scenario.condition, err
                    ));
                    return result;
                }
            };
            debug!(step = %step.name, condition = %condition, taken, "scenario evaluated");

            let block = if taken {
                scenario.then.as_ref()
            } else {
                scenario.otherwise.as_ref()
            };
            let Some(block) = block else {
                continue;
            };

            let name = branch_name(index, scenario.name.as_deref(), taken);
            let branch = apply_block(name, block, http.as_ref(), ctx).await;
            result.captured.extend(branch.captured.clone());
            if branch.status.is_failure() {
                result.status = ExecutionStatus::Failure;
                if result.error_message.is_none() {
                    result.error_message = branch.error_message.clone();
                }
            }
            result.children.push(branch);
        }

        result
    }
}

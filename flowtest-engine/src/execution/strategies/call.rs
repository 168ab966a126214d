// Call Strategy
// Runs the steps of another suite inline and propagates its captures back

use super::{StepContext, StepDispatcher, StepStrategy, MAX_CALL_DEPTH};
use crate::execution::runner::run_steps;
use crate::model::{CallSpec, ExecutionStatus, Step, StepResult, Suite};

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct CallStrategy;

/// Steps of the called suite selected by `call.step`
fn select_steps(suite: &Suite, call: &CallSpec) -> Result<Vec<Step>, String> {
    let Some(wanted) = &call.step else {
        return Ok(suite.steps.clone());
    };
    let selected: Vec<Step> = suite
        .steps
        .iter()
        .filter(|s| s.id.as_deref() == Some(wanted.as_str()) || s.name == *wanted)
        .cloned()
        .collect();
    if selected.is_empty() {
        Err(format!("suite '{}' has no step '{}'", call.test, wanted))
    } else {
        Ok(selected)
    }
}

/// Reasons a call may not start
fn check_call_stack(ctx: &StepContext, target: &str) -> Result<(), String> {
    if ctx.node_id == target || ctx.call_stack.iter().any(|id| id == target) {
        let mut chain: Vec<&str> = std::iter::once(ctx.node_id.as_str())
            .chain(ctx.call_stack.iter().map(String::as_str))
            .collect();
        chain.dedup();
        chain.push(target);
        return Err(format!("circular call: {}", chain.join(" -> ")));
    }
    if ctx.call_stack.len() >= MAX_CALL_DEPTH {
        return Err(format!(
            "call depth limit of {} reached calling '{}'",
            MAX_CALL_DEPTH, target
        ));
    }
    Ok(())
}

#[async_trait::async_trait]
impl StepStrategy for CallStrategy {
    fn name(&self) -> &'static str {
        "call"
    }

    fn can_handle(&self, step: &Step) -> bool {
        step.call.is_some()
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut StepContext,
        dispatcher: &StepDispatcher,
    ) -> StepResult {
        let Some(call) = &step.call else {
            return StepResult::failure(&step.name, "step has no call");
        };

        let catalog = Arc::clone(&ctx.catalog);
        let Some(target) = catalog.get(&call.test) else {
            return StepResult::failure(&step.name, format!("unknown suite '{}'", call.test));
        };
        if let Err(message) = check_call_stack(ctx, &call.test) {
            warn!(step = %step.name, target = %call.test, "{}", message);
            return StepResult::failure(&step.name, message);
        }
        let steps = match select_steps(target, call) {
            Ok(steps) => steps,
            Err(message) => return StepResult::failure(&step.name, message),
        };

        let call_variables = ctx.interpolate_map(&call.variables);
        let snapshot = call.isolate_context.then(|| ctx.scope.create_snapshot());

        if call.isolate_context {
            // Caller runtime values would shadow the target's own variables
            ctx.scope.clear_runtime_variables();
            ctx.scope
                .set_suite_variables(&target.variables, &ctx.interpolator);
        } else {
            let missing = target
                .variables
                .iter()
                .filter(|(name, _)| !ctx.scope.has_local(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            ctx.scope.set_suite_variables(&missing, &ctx.interpolator);
        }
        ctx.scope.set_runtime_variables(call_variables);

        let previous_transport = match &target.base_url {
            Some(base_url) => match ctx
                .collaborators
                .transports
                .create(Some(base_url), ctx.http_timeout)
            {
                Ok(transport) => Some(std::mem::replace(&mut ctx.transport, transport)),
                Err(err) => {
                    if let Some(snapshot) = snapshot {
                        snapshot.restore(&mut ctx.scope);
                    }
                    return StepResult::failure(&step.name, err.to_string());
                }
            },
            None => None,
        };

        debug!(
            step = %step.name,
            target = %call.test,
            steps = steps.len(),
            isolated = call.isolate_context,
            "calling suite"
        );

        ctx.call_stack.push(call.test.clone());
        let events = ctx.events.take();
        let caller_captured = std::mem::take(&mut ctx.captured);

        let children = run_steps(&steps, ctx, dispatcher).await;

        let called_captured = std::mem::replace(&mut ctx.captured, caller_captured);
        ctx.events = events;
        ctx.call_stack.pop();
        if let Some(transport) = previous_transport {
            ctx.transport = transport;
        }
        if let Some(snapshot) = snapshot {
            snapshot.restore(&mut ctx.scope);
        }

        let alias = call.alias_name();
        let propagated = called_captured
            .into_iter()
            .map(|(name, value)| (format!("{}.{}", alias, name), value))
            .collect::<Vec<(String, Value)>>();

        let mut result = StepResult::success(&step.name);
        for (name, value) in propagated {
            ctx.scope.set_runtime_variable(name.clone(), value.clone());
            ctx.captured.insert(name.clone(), value.clone());
            result.captured.insert(name, value);
        }

        let failed: Vec<&str> = children
            .iter()
            .filter(|c| c.status.is_failure())
            .map(|c| c.name.as_str())
            .collect();
        if !failed.is_empty() {
            result.status = ExecutionStatus::Failure;
            result.error_message = Some(format!(
                "call to '{}' failed at: {}",
                call.test,
                failed.join(", ")
            ));
        }
        result.children = children;
        result
    }
}

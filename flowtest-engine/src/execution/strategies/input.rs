// Input Strategy
// Prompts for a value and stores it in the runtime scope

use super::{StepContext, StepDispatcher, StepStrategy};
use crate::model::{InputType, Step, StepResult};

use serde_json::Value;

#[derive(Debug, Default)]
pub struct InputStrategy;

#[async_trait::async_trait]
impl StepStrategy for InputStrategy {
    fn name(&self) -> &'static str {
        "input"
    }

    fn can_handle(&self, step: &Step) -> bool {
        step.input.is_some()
    }

    async fn execute(
        &self,
        step: &Step,
        ctx: &mut StepContext,
        _dispatcher: &StepDispatcher,
    ) -> StepResult {
        let Some(spec) = &step.input else {
            return StepResult::failure(&step.name, "step has no input");
        };

        let mut spec = spec.clone();
        spec.prompt = ctx
            .interpolator
            .interpolate_str(&spec.prompt, &ctx.scope);

        match ctx.collaborators.input.prompt(&spec).await {
            Ok(value) => {
                ctx.scope
                    .set_runtime_variable(spec.variable.clone(), value.clone());
                ctx.captured.insert(spec.variable.clone(), value.clone());

                let mut result = StepResult::success(&step.name);
                let shown = match spec.input_type {
                    InputType::Password => Value::String("********".into()),
                    _ => value,
                };
                result.captured.insert(spec.variable, shown);
                result
            }
            Err(err) => StepResult::failure(&step.name, err.to_string()),
        }
    }
}

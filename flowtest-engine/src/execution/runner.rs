// Step Runner
// Runs a suite's steps in order, skipping the rest after an unrecovered failure

use crate::execution::events::{EventSender, ExecutionEvent};
use crate::execution::strategies::{StepContext, StepDispatcher};
use crate::model::{Step, StepResult};

use std::time::Duration;

use tracing::{info, warn};

/// Run steps sequentially through the dispatcher
///
/// A failed step stops the remaining steps, which are recorded as skipped,
/// unless the step or the run allows continuing.
pub async fn run_steps(
    steps: &[Step],
    ctx: &mut StepContext,
    dispatcher: &StepDispatcher,
) -> Vec<StepResult> {
    let mut results = Vec::with_capacity(steps.len());
    let mut halted_by: Option<String> = None;

    for (index, step) in steps.iter().enumerate() {
        if let Some(failed) = &halted_by {
            let reason = format!("skipped after '{}' failed", failed);
            ctx.events.send_event(ExecutionEvent::step_skipped(
                &ctx.node_id,
                &step.name,
                index,
                &reason,
            ));
            results.push(StepResult::skipped(&step.name, reason).with_step_id(step.id.clone()));
            continue;
        }

        ctx.events
            .send_event(ExecutionEvent::step_started(&ctx.node_id, &step.name, index));

        let result = dispatcher.dispatch(step, ctx).await;

        ctx.events.send_event(ExecutionEvent::step_completed(
            &ctx.node_id,
            &step.name,
            index,
            result.status,
            Duration::from_millis(result.duration_ms),
        ));

        if result.status.is_failure() {
            warn!(
                node_id = %ctx.node_id,
                step = %step.name,
                error = ?result.error_message,
                "step failed"
            );
            if !(step.continue_on_failure || ctx.continue_on_failure) {
                halted_by = Some(step.name.clone());
            }
        } else {
            info!(node_id = %ctx.node_id, step = %step.name, "step passed");
        }

        results.push(result);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::progress_channel;
    use crate::execution::strategies::testing::*;
    use crate::model::{ExecutionStatus, RequestSpec};
    use serde_json::json;
    use std::sync::Arc;

    fn steps() -> Vec<Step> {
        vec![
            Step::new("ok").with_request(RequestSpec::get("/ok")),
            Step::new("broken").with_request(RequestSpec::get("/broken")),
            Step::new("after").with_request(RequestSpec::get("/ok")),
        ]
    }

    fn transport() -> Arc<MockTransport> {
        Arc::new(MockTransport::new().respond("GET", "/ok", 200, json!({})))
    }

    #[tokio::test]
    async fn test_failure_skips_remaining_steps() {
        let transport = transport();
        let (tx, mut rx) = progress_channel();
        let mut ctx = context(transport.clone()).with_events(Some(tx));

        let results = run_steps(&steps(), &mut ctx, &StepDispatcher::new()).await;
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExecutionStatus::Success,
                ExecutionStatus::Failure,
                ExecutionStatus::Skipped
            ]
        );
        assert_eq!(transport.sent_urls().len(), 2);

        drop(ctx);
        let mut skipped = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, ExecutionEvent::StepSkipped { .. }) {
                skipped += 1;
            }
        }
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_continue_on_failure() {
        let mut tolerant = steps();
        tolerant[1].continue_on_failure = true;
        let mut ctx = context(transport());
        let results = run_steps(&tolerant, &mut ctx, &StepDispatcher::new()).await;
        assert_eq!(results[2].status, ExecutionStatus::Success);

        let mut ctx = context(transport()).with_continue_on_failure(true);
        let results = run_steps(&steps(), &mut ctx, &StepDispatcher::new()).await;
        assert_eq!(results[2].status, ExecutionStatus::Success);
    }
}

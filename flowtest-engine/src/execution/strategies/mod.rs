// Step Strategies
// Dispatches each step to the most specific handler: iteration, call, scenario, input, request

pub mod call;
pub mod input;
pub mod iteration;
pub mod request;
pub mod scenario;

pub use call::CallStrategy;
pub use input::InputStrategy;
pub use iteration::IterationStrategy;
pub use request::RequestStrategy;
pub use scenario::ScenarioStrategy;

use crate::collaborators::{Collaborators, HttpTransport};
use crate::execution::events::ProgressSender;
use crate::execution::scope::VariableScope;
use crate::expression::ExpressionEngine;
use crate::interpolation::Interpolator;
use crate::model::{DelaySpec, StepResult, Suite};
use crate::value::{ValueExt, VariableMap};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

/// Maximum nesting of sub-suite calls
pub const MAX_CALL_DEPTH: usize = 10;

/// Suites addressable by `call`, keyed by node id
pub type SuiteCatalog = HashMap<String, Suite>;

/// Mutable state threaded through the steps of one suite
pub struct StepContext {
    pub node_id: String,
    pub scope: VariableScope,
    pub interpolator: Arc<Interpolator>,
    pub transport: Arc<dyn HttpTransport>,
    pub collaborators: Collaborators,
    pub catalog: Arc<SuiteCatalog>,
    pub engine: ExpressionEngine,
    /// Timeout for transports created for called suites
    pub http_timeout: Duration,
    /// Run-level continue-on-failure
    pub continue_on_failure: bool,
    /// Node ids of the suites currently being called, outermost first
    pub call_stack: Vec<String>,
    /// Union of variables captured by the suite's steps
    pub captured: VariableMap,
    pub events: Option<ProgressSender>,
}

impl StepContext {
    pub fn new(
        node_id: impl Into<String>,
        scope: VariableScope,
        interpolator: Arc<Interpolator>,
        transport: Arc<dyn HttpTransport>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            scope,
            interpolator,
            transport,
            collaborators,
            catalog: Arc::new(SuiteCatalog::new()),
            engine: ExpressionEngine::default(),
            http_timeout: Duration::from_secs(30),
            continue_on_failure: false,
            call_stack: Vec::new(),
            captured: VariableMap::new(),
            events: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<SuiteCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_engine(mut self, engine: ExpressionEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }

    pub fn with_events(mut self, events: Option<ProgressSender>) -> Self {
        self.events = events;
        self
    }

    /// Interpolate against the current scope
    pub fn interpolate(&self, value: &Value) -> Value {
        self.interpolator.interpolate(value, &self.scope)
    }

    /// Interpolate every value of a map against the current scope
    pub fn interpolate_map(&self, map: &VariableMap) -> VariableMap {
        self.interpolator.interpolate_map(map, &self.scope)
    }

    /// Store captured values in the runtime layer and the export union
    pub fn record_captures(&mut self, captured: &VariableMap) {
        for (name, value) in captured {
            self.scope.set_runtime_variable(name.clone(), value.clone());
            self.captured.insert(name.clone(), value.clone());
        }
    }
}

/// A handler for one kind of step
#[async_trait::async_trait]
pub trait StepStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, step: &crate::model::Step) -> bool;

    async fn execute(
        &self,
        step: &crate::model::Step,
        ctx: &mut StepContext,
        dispatcher: &StepDispatcher,
    ) -> StepResult;
}

/// Ordered strategy list; the first match wins
pub struct StepDispatcher {
    strategies: Vec<Box<dyn StepStrategy>>,
}

impl Default for StepDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StepDispatcher {
    /// iteration > call > scenario > input > request
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(IterationStrategy),
                Box::new(CallStrategy),
                Box::new(ScenarioStrategy),
                Box::new(InputStrategy),
                Box::new(RequestStrategy),
            ],
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Strategy chosen for a step
    pub fn select(&self, step: &crate::model::Step) -> Option<&dyn StepStrategy> {
        self.strategies
            .iter()
            .find(|s| s.can_handle(step))
            .map(|s| s.as_ref())
    }

    /// Apply the step's delay and variables, then run its strategy
    pub fn dispatch<'a>(
        &'a self,
        step: &'a crate::model::Step,
        ctx: &'a mut StepContext,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let start = Instant::now();

            // Iteration applies these per generated step
            if step.iterate.is_none() {
                if let Some(delay) = &step.delay {
                    apply_delay(delay, ctx).await;
                }
                if !step.variables.is_empty() {
                    let resolved = ctx.interpolate_map(&step.variables);
                    ctx.scope.set_runtime_variables(resolved);
                }
            }

            let Some(strategy) = self.select(step) else {
                return StepResult::failure(&step.name, "no strategy can execute this step");
            };
            debug!(step = %step.name, strategy = strategy.name(), "dispatching step");

            let mut result = strategy.execute(step, ctx, self).await;
            if result.step_id.is_none() {
                result.step_id = step.id.clone();
            }
            if result.duration_ms == 0 {
                result.duration_ms = start.elapsed().as_millis() as u64;
            }
            result
        })
    }
}

/// Resolve a delay specification to milliseconds
pub fn delay_millis(delay: &DelaySpec, ctx: &StepContext) -> Option<u64> {
    match delay {
        DelaySpec::Fixed(ms) => Some(*ms),
        DelaySpec::Range { min, max } => {
            if min >= max {
                Some(*min)
            } else {
                Some(rand::thread_rng().gen_range(*min..=*max))
            }
        }
        DelaySpec::Template(template) => {
            let resolved = ctx.interpolate(&Value::String(template.clone()));
            match resolved.to_number_lenient() {
                Some(ms) if ms >= 0.0 => Some(ms as u64),
                _ => {
                    warn!(delay = %template, "delay did not resolve to a number of milliseconds");
                    None
                }
            }
        }
    }
}

async fn apply_delay(delay: &DelaySpec, ctx: &StepContext) {
    if let Some(ms) = delay_millis(delay, ctx) {
        debug!(delay_ms = ms, "delaying step");
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::collaborators::TransportFactory;
    use crate::error::TransportError;
    use crate::execution::registry::ExportRegistry;
    use crate::model::{HttpResult, RequestDetails, RequestSpec, ResponseDetails};

    use std::sync::Mutex;

    /// Canned responses keyed by `"METHOD url"`; records every request sent
    #[derive(Default)]
    pub struct MockTransport {
        pub base_url: Option<String>,
        responses: HashMap<String, (u16, Value)>,
        pub sent: Mutex<Vec<RequestSpec>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, method: &str, url: &str, status: u16, body: Value) -> Self {
            self.responses
                .insert(format!("{} {}", method, url), (status, body));
            self
        }

        pub fn sent_urls(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.url.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl HttpTransport for MockTransport {
        async fn execute_request(&self, _step_name: &str, request: &RequestSpec) -> HttpResult {
            self.sent.lock().unwrap().push(request.clone());
            let details = RequestDetails {
                method: request.method.to_uppercase(),
                url: request.url.clone(),
                headers: request
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_display_string()))
                    .collect(),
                body: request.body.clone(),
            };
            let key = format!("{} {}", details.method, request.url);
            match self.responses.get(&key) {
                Some((status, body)) => HttpResult::success(
                    details,
                    ResponseDetails {
                        status_code: *status,
                        headers: Default::default(),
                        body: body.clone(),
                        size_bytes: 0,
                    },
                    1,
                ),
                None => HttpResult::failure(details, format!("no route for {}", key), 1),
            }
        }
    }

    /// Hands out one shared mock and counts requests across suites
    pub struct MockFactory {
        pub transport: Arc<MockTransport>,
        pub created: Mutex<Vec<Option<String>>>,
    }

    impl MockFactory {
        pub fn new(transport: MockTransport) -> Self {
            Self {
                transport: Arc::new(transport),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    impl TransportFactory for MockFactory {
        fn create(
            &self,
            base_url: Option<&str>,
            _timeout: Duration,
        ) -> Result<Arc<dyn HttpTransport>, TransportError> {
            self.created
                .lock()
                .unwrap()
                .push(base_url.map(str::to_string));
            Ok(self.transport.clone())
        }
    }

    pub fn context(transport: Arc<MockTransport>) -> StepContext {
        let factory = Arc::new(MockFactory {
            transport: transport.clone(),
            created: Mutex::new(Vec::new()),
        });
        StepContext::new(
            "suite",
            VariableScope::new(Arc::new(ExportRegistry::new())),
            Arc::new(Interpolator::new()),
            transport,
            Collaborators::new(factory),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::execution::scope::VariableSource;
    use crate::model::{CallSpec, InputSpec, IterateSpec, RequestSpec, ScenarioSpec, Step};
    use serde_json::json;

    #[test]
    fn test_dispatch_order() {
        let dispatcher = StepDispatcher::new();
        assert_eq!(
            dispatcher.strategy_names(),
            vec!["iteration", "call", "scenario", "input", "request"]
        );

        let all = Step::new("all")
            .with_request(RequestSpec::get("/x"))
            .with_input(InputSpec::new("?", "v"))
            .with_scenarios(vec![ScenarioSpec::default()])
            .with_call(CallSpec::new("other"))
            .with_iterate(IterateSpec::over(json!([1])));
        assert_eq!(dispatcher.select(&all).unwrap().name(), "iteration");

        let mut call = all.clone();
        call.iterate = None;
        assert_eq!(dispatcher.select(&call).unwrap().name(), "call");

        let mut scenario = call.clone();
        scenario.call = None;
        assert_eq!(dispatcher.select(&scenario).unwrap().name(), "scenario");

        let mut input = scenario.clone();
        input.scenarios = None;
        assert_eq!(dispatcher.select(&input).unwrap().name(), "input");

        let mut request = input.clone();
        request.input = None;
        assert_eq!(dispatcher.select(&request).unwrap().name(), "request");

        assert_eq!(dispatcher.select(&Step::new("bare")).unwrap().name(), "request");
    }

    #[tokio::test]
    async fn test_step_variables_are_interpolated_into_runtime() {
        let transport = Arc::new(MockTransport::new().respond("GET", "/users/7", 200, json!({})));
        let mut ctx = context(transport.clone());
        ctx.scope.set_suite_variable("base_id", json!(7));

        let step = Step::new("get user")
            .with_variable("user_id", json!("{{base_id}}"))
            .with_request(RequestSpec::get("/users/{{user_id}}"));
        let result = StepDispatcher::new().dispatch(&step, &mut ctx).await;

        assert!(result.status.is_success(), "{:?}", result.error_message);
        assert_eq!(ctx.scope.resolve("user_id"), Some(json!(7)));
        assert_eq!(transport.sent_urls(), vec!["/users/7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_range_delay_with_equal_bounds_sleeps_exactly() {
        let transport = Arc::new(MockTransport::new());
        let mut ctx = context(transport);
        let step = Step::new("wait").with_delay(DelaySpec::Range { min: 100, max: 100 });

        for _ in 0..5 {
            let before = tokio::time::Instant::now();
            StepDispatcher::new().dispatch(&step, &mut ctx).await;
            assert_eq!(before.elapsed(), Duration::from_millis(100));
        }
    }

    #[test]
    fn test_delay_millis() {
        let mut ctx = context(Arc::new(MockTransport::new()));
        ctx.scope.set_suite_variable("pause", json!(250));

        assert_eq!(delay_millis(&DelaySpec::Fixed(40), &ctx), Some(40));
        assert_eq!(
            delay_millis(&DelaySpec::Template("{{pause}}".into()), &ctx),
            Some(250)
        );
        assert_eq!(delay_millis(&DelaySpec::Template("soon".into()), &ctx), None);
        for _ in 0..20 {
            let ms = delay_millis(&DelaySpec::Range { min: 10, max: 20 }, &ctx).unwrap();
            assert!((10..=20).contains(&ms));
        }
    }
}

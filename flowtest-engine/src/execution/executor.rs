// Suite Orchestrator
// Orders suites by dependency, runs them sequentially or in parallel batches and aggregates results

use crate::collaborators::Collaborators;
use crate::error::OrchestratorError;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::{DependencyGraph, NodeState};
use crate::execution::registry::ExportRegistry;
use crate::execution::runner::run_steps;
use crate::execution::scope::VariableScope;
use crate::execution::strategies::{StepContext, StepDispatcher, SuiteCatalog};
use crate::expression::{ExpressionEngine, SandboxLimits};
use crate::interpolation::Interpolator;
use crate::model::{
    DependencyResult, ExecutionStatus, RunResult, RunStats, Suite, SuiteResult,
};
use crate::value::{ValueExt, VariableMap};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// How suites are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub mode: ExecutionMode,
    /// Maximum suites per parallel batch
    pub max_parallel: usize,
    /// Stop the run when a required suite fails
    pub fail_fast_on_required: bool,
    /// Keep running a suite's steps after a failed step
    pub continue_on_failure: bool,
    /// Timeout handed to every transport
    pub http_timeout: Duration,
    /// Limits for capture expressions and scenario conditions
    pub script_limits: SandboxLimits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            max_parallel: 4,
            fail_fast_on_required: true,
            continue_on_failure: false,
            http_timeout: Duration::from_secs(30),
            script_limits: SandboxLimits::default(),
        }
    }
}

/// Results and totals accumulated over a run
struct Tally<'a, F: FnMut(&RunStats)> {
    stats: RunStats,
    suites: Vec<SuiteResult>,
    on_stats: &'a mut F,
}

impl<'a, F: FnMut(&RunStats)> Tally<'a, F> {
    fn record(&mut self, result: SuiteResult) {
        self.stats.record(result.status);
        (self.on_stats)(&self.stats);
        self.suites.push(result);
    }
}

/// Runs suites against the dependency graph
pub struct Orchestrator {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    interpolator: Arc<Interpolator>,
    globals: VariableMap,
    environment: Arc<VariableMap>,
    events: Option<ProgressSender>,
    dispatcher: StepDispatcher,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            config: OrchestratorConfig::default(),
            collaborators,
            interpolator: Arc::new(Interpolator::new()),
            globals: VariableMap::new(),
            environment: Arc::new(VariableMap::new()),
            events: None,
            dispatcher: StepDispatcher::new(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_interpolator(mut self, interpolator: Interpolator) -> Self {
        self.interpolator = Arc::new(interpolator);
        self
    }

    pub fn with_globals(mut self, globals: VariableMap) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_environment(mut self, environment: VariableMap) -> Self {
        self.environment = Arc::new(environment);
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute suites and aggregate their results
    ///
    /// `on_stats` receives the running totals after every suite. The only
    /// error is a configuration conflict detected before anything runs; suite
    /// and step failures are reported in the result.
    pub async fn execute_tests<F>(
        &self,
        suites: Vec<Suite>,
        mut on_stats: F,
    ) -> Result<RunResult, OrchestratorError>
    where
        F: FnMut(&RunStats),
    {
        let mode = self.effective_mode(&suites)?;
        let started_at = Utc::now();
        let start = Instant::now();

        info!(suites = suites.len(), mode = ?mode, "starting run");
        self.events
            .send_event(ExecutionEvent::run_started(suites.len()));

        let registry = Arc::new(ExportRegistry::new());
        for suite in &suites {
            registry.register_node(
                &suite.node_id,
                &suite.suite_name,
                &suite.all_export_names(),
                suite.source_path.clone(),
            );
        }

        let mut graph = DependencyGraph::build(&suites);
        let plan = graph.resolve_order();

        let mut catalog = SuiteCatalog::new();
        for suite in &suites {
            catalog
                .entry(suite.node_id.clone())
                .or_insert_with(|| suite.clone());
        }
        let catalog = Arc::new(catalog);

        let base_scope = VariableScope::new(Arc::clone(&registry))
            .with_globals(self.globals.clone())
            .with_environment(Arc::clone(&self.environment));

        let mut tally = Tally {
            stats: RunStats::new(suites.len()),
            suites: Vec::with_capacity(suites.len()),
            on_stats: &mut on_stats,
        };

        for (index, graph_error) in &plan.blocked {
            let suite = &suites[*index];
            graph.mark_failed(
                &suite.node_id,
                DependencyResult::from(&SuiteResult::failed(
                    &suite.node_id,
                    &suite.suite_name,
                    &graph_error.message,
                )),
            );
        }

        let batches = match mode {
            ExecutionMode::Sequential => plan.order.iter().map(|&i| vec![i]).collect(),
            ExecutionMode::Parallel => {
                let batches = graph.parallel_batches(&plan.order, self.config.max_parallel);
                if self.config.fail_fast_on_required {
                    split_after_required(batches, &suites)
                } else {
                    batches
                }
            }
        };

        let mut halted_by: Option<String> = None;
        for batch in batches {
            let mut runnable = Vec::with_capacity(batch.len());
            for index in batch {
                let suite = &suites[index];
                if let Some(failed) = &halted_by {
                    let reason = format!("run halted after required suite '{}' failed", failed);
                    tally.record(self.skip(suite, reason, &mut graph));
                    continue;
                }
                match self.admit(suite, &mut graph, &base_scope, &catalog).await {
                    Some(result) => tally.record(result),
                    None => {
                        graph.mark_executing(&suite.node_id);
                        runnable.push(index);
                    }
                }
            }

            let outcomes = join_all(
                runnable
                    .iter()
                    .map(|&i| self.run_suite(&suites[i], base_scope.fork(), &catalog)),
            )
            .await;

            for (index, result) in runnable.into_iter().zip(outcomes) {
                let suite = &suites[index];
                let outcome = DependencyResult::from(&result);
                if result.status.is_success() {
                    graph.mark_resolved(&suite.node_id, outcome);
                } else {
                    graph.mark_failed(&suite.node_id, outcome);
                    if suite.required && self.config.fail_fast_on_required && halted_by.is_none() {
                        error!(node_id = %suite.node_id, "required suite failed, halting run");
                        self.events.send_event(ExecutionEvent::error(
                            format!("required suite '{}' failed, halting run", suite.node_id),
                            Some(suite.node_id.clone()),
                        ));
                        halted_by = Some(suite.node_id.clone());
                    }
                }
                tally.record(result);
            }
        }

        for (index, graph_error) in plan.blocked {
            let suite = &suites[index];
            self.events.send_event(ExecutionEvent::error(
                graph_error.message.clone(),
                Some(suite.node_id.clone()),
            ));
            let mut result =
                SuiteResult::failed(&suite.node_id, &suite.suite_name, graph_error.message);
            result.source_path = suite.source_path.clone();
            tally.record(result);
        }

        let duration = start.elapsed();
        let stats = tally.stats;
        let result = RunResult::from_suites(
            started_at,
            duration.as_millis() as u64,
            stats,
            tally.suites,
        );

        info!(
            success = result.success,
            successful = stats.successful,
            failed = stats.failed,
            skipped = stats.skipped,
            "run completed"
        );
        self.events
            .send_event(ExecutionEvent::run_completed(result.success, stats, duration));

        Ok(result)
    }

    /// Parallel runs with interactive input are refused when prompts would
    /// block, and downgraded to sequential otherwise
    fn effective_mode(&self, suites: &[Suite]) -> Result<ExecutionMode, OrchestratorError> {
        if self.config.mode != ExecutionMode::Parallel {
            return Ok(self.config.mode);
        }

        let with_input: Vec<String> = suites
            .iter()
            .filter(|s| s.has_input_steps())
            .map(|s| s.node_id.clone())
            .collect();
        if with_input.is_empty() {
            return Ok(ExecutionMode::Parallel);
        }

        if self.collaborators.input.is_interactive() {
            return Err(OrchestratorError::InteractiveInParallel { suites: with_input });
        }

        warn!(
            suites = ?with_input,
            "input steps cannot run in parallel, falling back to sequential mode"
        );
        self.events.send_event(ExecutionEvent::warning(
            "input steps found, running sequentially",
            None,
        ));
        Ok(ExecutionMode::Sequential)
    }

    fn skip(&self, suite: &Suite, reason: String, graph: &mut DependencyGraph) -> SuiteResult {
        let result = self.skipped(suite, reason);
        graph.mark_failed(&suite.node_id, DependencyResult::from(&result));
        result
    }

    /// Skipped result without touching the node's recorded outcome
    fn skipped(&self, suite: &Suite, reason: String) -> SuiteResult {
        info!(node_id = %suite.node_id, reason = %reason, "suite skipped");
        self.events
            .send_event(ExecutionEvent::suite_skipped(&suite.node_id, &reason));
        let mut result = SuiteResult::skipped(&suite.node_id, &suite.suite_name, reason);
        result.source_path = suite.source_path.clone();
        result
    }

    /// Cache check and dependency pass
    ///
    /// Returns a finished result when the suite must not run: served from
    /// cache, or skipped because a required dependency did not succeed.
    async fn admit(
        &self,
        suite: &Suite,
        graph: &mut DependencyGraph,
        base_scope: &VariableScope,
        catalog: &Arc<SuiteCatalog>,
    ) -> Option<SuiteResult> {
        let registry = base_scope.registry();

        if let Some(cached) = graph.get_cached_result(&suite.node_id) {
            debug!(node_id = %suite.node_id, "serving suite from cache");
            self.events
                .send_event(ExecutionEvent::suite_cached(&suite.node_id));
            for (name, value) in &cached.exports {
                registry.set_exported_variable(&suite.node_id, name, value.clone());
            }
            let mut result = SuiteResult::new(&suite.node_id, &suite.suite_name);
            result.exports = cached.exports.clone();
            result.cached = true;
            result.source_path = suite.source_path.clone();
            return Some(result);
        }

        // A node runs at most once per run, even when its first run failed
        if matches!(graph.state(&suite.node_id), Some(NodeState::Failed)) {
            let reason = format!("suite '{}' already failed earlier in this run", suite.node_id);
            return Some(self.skipped(suite, reason));
        }

        for dependency in graph.dependencies(&suite.node_id).to_vec() {
            let dep_id = dependency.node_id.as_str();
            match graph.state(dep_id) {
                Some(NodeState::Resolved) if dependency.cache => {
                    if let Some(cached) = graph.get_cached_result(dep_id) {
                        debug!(node_id = %suite.node_id, dependency = dep_id, "reusing cached dependency");
                        for (name, value) in &cached.exports {
                            registry.set_exported_variable(dep_id, name, value.clone());
                        }
                    }
                }
                Some(NodeState::Resolved) => {
                    let Some(dep_suite) = catalog.get(dep_id) else {
                        continue;
                    };
                    info!(node_id = %suite.node_id, dependency = dep_id, "re-running uncached dependency");
                    let rerun = self.run_suite(dep_suite, base_scope.fork(), catalog).await;
                    let outcome = DependencyResult::from(&rerun);
                    if rerun.status.is_success() {
                        graph.mark_resolved(dep_id, outcome);
                    } else {
                        graph.mark_failed(dep_id, outcome);
                        if dependency.required {
                            let reason = format!("required dependency '{}' failed on re-run", dep_id);
                            return Some(self.skip(suite, reason, graph));
                        }
                    }
                }
                Some(NodeState::Failed) if dependency.required => {
                    let reason = format!("required dependency '{}' did not succeed", dep_id);
                    return Some(self.skip(suite, reason, graph));
                }
                Some(NodeState::Failed) => {
                    warn!(node_id = %suite.node_id, dependency = dep_id, "optional dependency did not succeed");
                }
                _ => {
                    debug!(node_id = %suite.node_id, dependency = dep_id, "optional dependency has not run");
                }
            }
        }

        None
    }

    /// Run one suite in its own scope and transport
    async fn run_suite(
        &self,
        suite: &Suite,
        mut scope: VariableScope,
        catalog: &Arc<SuiteCatalog>,
    ) -> SuiteResult {
        let start = Instant::now();
        let node_id = suite.node_id.as_str();
        info!(node_id, suite = %suite.suite_name, steps = suite.steps.len(), "suite started");
        self.events.send_event(ExecutionEvent::suite_started(
            node_id,
            &suite.suite_name,
            suite.steps.len(),
        ));

        let mut result = SuiteResult::new(node_id, &suite.suite_name);
        result.source_path = suite.source_path.clone();

        scope.clear_all_non_global_variables();
        for import in &suite.imports {
            let mut values = VariableMap::new();
            if let Some(from) = &import.from {
                match catalog.get(from) {
                    Some(source) => {
                        values.extend(self.interpolator.interpolate_map(&source.variables, &scope))
                    }
                    None => result.warnings.push(format!(
                        "import '{}' refers to unknown suite '{}'",
                        import.name, from
                    )),
                }
                values.extend(scope.registry().exports_for(from));
            }
            values.extend(self.interpolator.interpolate_map(&import.variables, &scope));
            scope.add_imported_flow(import.name.clone(), values);
        }
        scope.set_suite_variables(&suite.variables, &self.interpolator);

        let transport = match self
            .collaborators
            .transports
            .create(suite.base_url.as_deref(), self.config.http_timeout)
        {
            Ok(transport) => transport,
            Err(err) => {
                error!(node_id, error = %err, "could not create transport");
                result.status = ExecutionStatus::Failure;
                result.error_message = Some(err.to_string());
                result.duration_ms = start.elapsed().as_millis() as u64;
                self.complete(&result);
                return result;
            }
        };

        let mut ctx = StepContext::new(
            node_id,
            scope,
            Arc::clone(&self.interpolator),
            transport,
            self.collaborators.clone(),
        )
        .with_catalog(Arc::clone(catalog))
        .with_engine(ExpressionEngine::with_limits(self.config.script_limits))
        .with_http_timeout(self.config.http_timeout)
        .with_continue_on_failure(self.config.continue_on_failure)
        .with_events(self.events.clone());

        result.steps = run_steps(&suite.steps, &mut ctx, &self.dispatcher).await;
        if result.failed_steps() > 0 {
            result.status = ExecutionStatus::Failure;
        }

        let mut available = ctx.captured.clone();
        available.extend(ctx.scope.runtime_variables().clone());

        let registry = ctx.scope.registry();
        for name in suite.all_export_names() {
            match available.get(&name) {
                Some(value) => {
                    registry.set_exported_variable(node_id, &name, value.clone());
                    self.events.send_event(ExecutionEvent::variable_exported(
                        node_id,
                        &name,
                        value.as_display_string(),
                    ));
                    result.exports.insert(name, value.clone());
                }
                None if suite.exports.contains(&name) => {
                    warn!(node_id, export = %name, "declared export was never set");
                    result
                        .warnings
                        .push(format!("export '{}' was declared but never set", name));
                }
                None => {}
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        self.complete(&result);
        result
    }

    fn complete(&self, result: &SuiteResult) {
        info!(
            node_id = %result.node_id,
            status = ?result.status,
            duration_ms = result.duration_ms,
            "suite completed"
        );
        self.events.send_event(ExecutionEvent::suite_completed(
            &result.node_id,
            &result.suite_name,
            result.status,
            Duration::from_millis(result.duration_ms),
        ));
    }
}

/// End a parallel batch after every required suite
///
/// Fail-fast is decided between batches, so nothing ordered after a required
/// suite may share its batch.
fn split_after_required(batches: Vec<Vec<usize>>, suites: &[Suite]) -> Vec<Vec<usize>> {
    let mut split = Vec::with_capacity(batches.len());
    for batch in batches {
        let mut current = Vec::with_capacity(batch.len());
        for index in batch {
            current.push(index);
            if suites[index].required {
                split.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            split.push(current);
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ConsoleInputProvider;
    use crate::execution::events::progress_channel;
    use crate::execution::strategies::testing::{MockFactory, MockTransport};
    use crate::model::{Dependency, InputSpec, RequestSpec, Step};
    use serde_json::json;

    fn auth_suite() -> Suite {
        Suite::new("auth", "Authenticate")
            .with_exports(["token"])
            .with_step(
                Step::new("login")
                    .with_request(RequestSpec::new("POST", "/auth"))
                    .with_capture("token", "body.token"),
            )
    }

    fn profile_suite() -> Suite {
        Suite::new("profile", "Profile")
            .with_dependency(Dependency::new("auth"))
            .with_step(
                Step::new("me").with_request(
                    RequestSpec::get("/profile").with_header("Authorization", "{{auth.token}}"),
                ),
            )
    }

    fn mock() -> MockTransport {
        MockTransport::new()
            .respond("POST", "/auth", 200, json!({"token": "abc123"}))
            .respond("GET", "/profile", 200, json!({"name": "ada"}))
            .respond("GET", "/ok", 200, json!({}))
    }

    fn orchestrator(factory: Arc<MockFactory>) -> Orchestrator {
        Orchestrator::new(Collaborators::new(factory))
    }

    fn count(factory: &MockFactory, url: &str) -> usize {
        factory
            .transport
            .sent_urls()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    #[tokio::test]
    async fn test_dependency_exports_reach_dependents() {
        let factory = Arc::new(MockFactory::new(mock()));
        let result = orchestrator(factory.clone())
            .execute_tests(vec![profile_suite(), auth_suite()], |_| {})
            .await
            .unwrap();

        let order: Vec<&str> = result.suites.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(order, vec!["auth", "profile"]);
        assert!(result.success);
        assert_eq!(result.suite("auth").unwrap().exports["token"], json!("abc123"));

        let sent = factory.transport.sent.lock().unwrap();
        assert_eq!(sent[1].headers["Authorization"], json!("abc123"));
    }

    #[tokio::test]
    async fn test_cached_dependency_runs_once() {
        let factory = Arc::new(MockFactory::new(mock()));
        let settings = Suite::new("settings", "Settings")
            .with_dependency(Dependency::new("auth"))
            .with_step(Step::new("ok").with_request(RequestSpec::get("/ok")));

        let result = orchestrator(factory.clone())
            .execute_tests(
                vec![auth_suite(), profile_suite(), settings, auth_suite()],
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(count(&factory, "/auth"), 1);
        assert_eq!(result.suites.len(), 4);
        let cached = &result.suites[1];
        assert_eq!(cached.node_id, "auth");
        assert!(cached.cached);
        assert_eq!(cached.exports, result.suites[0].exports);
        assert_eq!(result.stats.successful, 4);
    }

    #[tokio::test]
    async fn test_uncached_dependency_is_rerun() {
        let factory = Arc::new(MockFactory::new(mock()));
        let mut profile = profile_suite();
        profile.depends = vec![Dependency::new("auth").uncached()];

        let result = orchestrator(factory.clone())
            .execute_tests(vec![auth_suite(), profile], |_| {})
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(count(&factory, "/auth"), 2);
    }

    #[tokio::test]
    async fn test_missing_exports_warn_without_failing() {
        let factory = Arc::new(MockFactory::new(mock()));
        let suite = auth_suite()
            .with_exports(["token", "refresh"])
            .with_optional_exports(["expires"]);

        let result = orchestrator(factory)
            .execute_tests(vec![suite], |_| {})
            .await
            .unwrap();

        let suite = &result.suites[0];
        assert_eq!(suite.status, ExecutionStatus::Success);
        assert_eq!(suite.warnings.len(), 1);
        assert!(suite.warnings[0].contains("refresh"));
    }

    #[tokio::test]
    async fn test_fail_fast_on_required_suite() {
        let factory = Arc::new(MockFactory::new(mock()));
        let smoke = Suite::new("smoke", "Smoke")
            .with_required(true)
            .with_step(Step::new("down").with_request(RequestSpec::get("/down")));
        let later = |id: &str| {
            Suite::new(id, id).with_step(Step::new("ok").with_request(RequestSpec::get("/ok")))
        };

        let mut updates = Vec::new();
        let result = orchestrator(factory.clone())
            .execute_tests(vec![smoke, later("a"), later("b")], |stats| {
                updates.push(*stats)
            })
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.skipped, 2);
        assert_eq!(count(&factory, "/ok"), 0);
        assert_eq!(updates.len(), 3);
        assert_eq!(result.failed_suites[0].node_id, "smoke");
    }

    #[tokio::test]
    async fn test_parallel_fail_fast_stops_suites_in_the_same_batch() {
        let factory = Arc::new(MockFactory::new(mock()));
        let smoke = Suite::new("smoke", "Smoke")
            .with_required(true)
            .with_step(Step::new("down").with_request(RequestSpec::get("/down")));
        let a = Suite::new("a", "A").with_step(Step::new("ok").with_request(RequestSpec::get("/ok")));
        let config = OrchestratorConfig {
            mode: ExecutionMode::Parallel,
            max_parallel: 4,
            ..Default::default()
        };

        let result = orchestrator(factory.clone())
            .with_config(config)
            .execute_tests(vec![smoke, a], |_| {})
            .await
            .unwrap();

        assert_eq!(count(&factory, "/ok"), 0);
        assert_eq!(result.stats.failed, 1);
        assert_eq!(result.stats.skipped, 1);
        assert_eq!(result.suite("a").unwrap().status, ExecutionStatus::Skipped);
    }

    #[test]
    fn test_split_after_required() {
        let suite = |id: &str, required: bool| Suite::new(id, id).with_required(required);
        let suites = vec![
            suite("a", false),
            suite("smoke", true),
            suite("b", false),
            suite("c", false),
        ];
        assert_eq!(
            split_after_required(vec![vec![0, 1, 2], vec![3]], &suites),
            vec![vec![0, 1], vec![2], vec![3]]
        );
        assert_eq!(
            split_after_required(vec![vec![1]], &suites),
            vec![vec![1]]
        );
    }

    #[tokio::test]
    async fn test_failed_duplicate_is_not_rerun() {
        let factory = Arc::new(MockFactory::new(mock()));
        let smoke = Suite::new("smoke", "Smoke")
            .with_step(Step::new("down").with_request(RequestSpec::get("/down")));

        let result = orchestrator(factory.clone())
            .execute_tests(vec![smoke.clone(), smoke], |_| {})
            .await
            .unwrap();

        assert_eq!(count(&factory, "/down"), 1);
        assert_eq!(result.suites.len(), 2);
        assert_eq!(result.suites[0].status, ExecutionStatus::Failure);
        assert_eq!(result.suites[1].status, ExecutionStatus::Skipped);
        assert!(result.suites[1]
            .error_message
            .as_deref()
            .unwrap()
            .contains("already failed"));
        assert_eq!(result.stats.failed, 1);
    }

    #[tokio::test]
    async fn test_cycle_blocked_suites_stay_failed_after_halt() {
        let factory = Arc::new(MockFactory::new(mock()));
        let smoke = Suite::new("smoke", "Smoke")
            .with_required(true)
            .with_step(Step::new("down").with_request(RequestSpec::get("/down")));
        let a = Suite::new("a", "A").with_dependency(Dependency::new("b"));
        let b = Suite::new("b", "B").with_dependency(Dependency::new("a"));

        let result = orchestrator(factory)
            .execute_tests(vec![smoke, a, b], |_| {})
            .await
            .unwrap();

        assert_eq!(result.suite("a").unwrap().status, ExecutionStatus::Failure);
        assert_eq!(result.suite("b").unwrap().status, ExecutionStatus::Failure);
        assert_eq!(result.stats.failed, 3);
        assert_eq!(result.stats.skipped, 0);
    }

    #[tokio::test]
    async fn test_failed_required_dependency_skips_dependents() {
        let factory = Arc::new(MockFactory::new(MockTransport::new()));
        let config = OrchestratorConfig {
            fail_fast_on_required: false,
            ..Default::default()
        };
        let (tx, mut rx) = progress_channel();

        let result = orchestrator(factory)
            .with_config(config)
            .with_progress(tx)
            .execute_tests(vec![auth_suite(), profile_suite()], |_| {})
            .await
            .unwrap();

        assert_eq!(result.suites[1].status, ExecutionStatus::Skipped);
        assert!(result.suites[1]
            .error_message
            .as_deref()
            .unwrap()
            .contains("'auth'"));

        let mut skipped = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ExecutionEvent::SuiteSkipped { node_id, .. } = event {
                skipped.push(node_id);
            }
        }
        assert_eq!(skipped, vec!["profile"]);
    }

    #[tokio::test]
    async fn test_cycles_become_failed_results() {
        let factory = Arc::new(MockFactory::new(mock()));
        let a = Suite::new("a", "A").with_dependency(Dependency::new("b"));
        let b = Suite::new("b", "B").with_dependency(Dependency::new("a"));
        let c = Suite::new("c", "C").with_step(Step::new("ok").with_request(RequestSpec::get("/ok")));

        let result = orchestrator(factory)
            .execute_tests(vec![a, b, c], |_| {})
            .await
            .unwrap();

        assert_eq!(result.suite("c").unwrap().status, ExecutionStatus::Success);
        let a = result.suite("a").unwrap();
        assert_eq!(a.status, ExecutionStatus::Failure);
        assert!(a.error_message.as_deref().unwrap().contains("circular dependency"));
        assert_eq!(result.stats.failed, 2);
    }

    #[tokio::test]
    async fn test_interactive_input_conflicts_with_parallel_mode() {
        let asks = Suite::new("asks", "Asks").with_step(
            Step::new("otp").with_input(InputSpec::new("OTP?", "otp").with_ci_default(json!("1"))),
        );
        let config = OrchestratorConfig {
            mode: ExecutionMode::Parallel,
            ..Default::default()
        };

        let interactive = Collaborators::new(Arc::new(MockFactory::new(mock()))).with_input(
            Arc::new(ConsoleInputProvider::new(true, Duration::from_secs(1))),
        );
        let err = Orchestrator::new(interactive)
            .with_config(config.clone())
            .execute_tests(vec![asks.clone()], |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InteractiveInParallel { .. }));

        let result = orchestrator(Arc::new(MockFactory::new(mock())))
            .with_config(config)
            .execute_tests(vec![asks], |_| {})
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_parallel_batches_give_each_suite_a_transport() {
        let factory = Arc::new(MockFactory::new(mock()));
        let plain = |id: &str| {
            Suite::new(id, id).with_step(Step::new("ok").with_request(RequestSpec::get("/ok")))
        };
        let config = OrchestratorConfig {
            mode: ExecutionMode::Parallel,
            max_parallel: 2,
            ..Default::default()
        };

        let result = orchestrator(factory.clone())
            .with_config(config)
            .execute_tests(
                vec![auth_suite(), plain("x"), plain("y"), profile_suite()],
                |_| {},
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(factory.created.lock().unwrap().len(), 4);
        assert_eq!(count(&factory, "/ok"), 2);
        let sent = factory.transport.sent.lock().unwrap();
        let profile = sent.iter().find(|r| r.url == "/profile").unwrap();
        assert_eq!(profile.headers["Authorization"], json!("abc123"));
    }

    #[tokio::test]
    async fn test_globals_and_imports_are_visible() {
        let factory = Arc::new(MockFactory::new(
            MockTransport::new().respond("GET", "/v2/items", 200, json!([])),
        ));
        let shared = Suite::new("shared", "Shared").with_variable("prefix", json!("/v2"));
        let mut items = Suite::new("items", "Items")
            .with_step(Step::new("list").with_request(RequestSpec::get("{{common.prefix}}/{{resource}}")));
        items.imports.push(crate::model::ImportSpec {
            name: "common".into(),
            from: Some("shared".into()),
            variables: VariableMap::new(),
        });

        let mut globals = VariableMap::new();
        globals.insert("resource".into(), json!("items"));
        let result = orchestrator(factory.clone())
            .with_globals(globals)
            .execute_tests(vec![shared, items], |_| {})
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.failed_suites);
        assert_eq!(factory.transport.sent_urls(), vec!["/v2/items"]);
    }
}

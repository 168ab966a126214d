// Variable Scope
// Hierarchical per-run variable storage: runtime > suite > imported > global > environment

use crate::execution::registry::ExportRegistry;
use crate::interpolation::Interpolator;
use crate::value::{get_path, split_path, VariableMap};

use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

/// Read access to variables, used by interpolation strategies
pub trait VariableSource {
    /// Resolve a dotted path; `None` when nothing matches
    fn resolve(&self, path: &str) -> Option<Value>;

    /// Flattened view of every visible variable, lowest precedence first
    fn all_variables(&self) -> VariableMap;

    /// Environment variable visible to `$env.NAME`
    fn environment_variable(&self, name: &str) -> Option<Value> {
        std::env::var(name).ok().map(Value::String)
    }
}

impl VariableSource for VariableMap {
    fn resolve(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.get(path) {
            return Some(value.clone());
        }
        let segments = split_path(path);
        let (first, rest) = segments.split_first()?;
        get_path(self.get(first)?, rest).cloned()
    }

    fn all_variables(&self) -> VariableMap {
        self.clone()
    }
}

/// Deep copy of the mutable scope layers
#[derive(Debug, Clone)]
pub struct ScopeSnapshot {
    runtime: VariableMap,
    suite: VariableMap,
    imported: VariableMap,
    global: VariableMap,
}

impl ScopeSnapshot {
    /// Put the captured state back, discarding everything set since
    pub fn restore(self, scope: &mut VariableScope) {
        scope.runtime = self.runtime;
        scope.suite = self.suite;
        scope.imported = self.imported;
        scope.global = self.global;
    }
}

/// Variable store for one suite run
///
/// Runtime, suite and imported layers are cleared on every suite switch;
/// globals and the environment live for the whole run.
#[derive(Debug, Clone)]
pub struct VariableScope {
    runtime: VariableMap,
    suite: VariableMap,
    /// Namespace name to object of imported values
    imported: VariableMap,
    global: VariableMap,
    environment: Arc<VariableMap>,
    registry: Arc<ExportRegistry>,
}

impl VariableScope {
    pub fn new(registry: Arc<ExportRegistry>) -> Self {
        Self {
            runtime: VariableMap::new(),
            suite: VariableMap::new(),
            imported: VariableMap::new(),
            global: VariableMap::new(),
            environment: Arc::new(VariableMap::new()),
            registry,
        }
    }

    pub fn with_globals(mut self, globals: VariableMap) -> Self {
        self.global = globals;
        self
    }

    pub fn with_environment(mut self, environment: Arc<VariableMap>) -> Self {
        self.environment = environment;
        self
    }

    /// Capture process environment variables
    ///
    /// With a prefix, only matching names are exposed and the prefix is
    /// stripped (`FLOWTEST_API_URL` becomes `API_URL`).
    pub fn capture_environment(prefix: Option<&str>) -> VariableMap {
        let mut vars: Vec<(String, String)> = std::env::vars()
            .filter_map(|(name, value)| match prefix {
                Some(prefix) => name
                    .strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.to_string(), value)),
                None => Some((name, value)),
            })
            .collect();
        vars.sort();
        vars.into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect()
    }

    pub fn registry(&self) -> &Arc<ExportRegistry> {
        &self.registry
    }

    /// Fresh scope sharing globals, environment and registry but no suite state
    pub fn fork(&self) -> Self {
        Self {
            runtime: VariableMap::new(),
            suite: VariableMap::new(),
            imported: VariableMap::new(),
            global: self.global.clone(),
            environment: Arc::clone(&self.environment),
            registry: Arc::clone(&self.registry),
        }
    }

    // =========================================================================
    // Writers
    // =========================================================================

    /// Interpolate each value against the current state, then merge into the
    /// suite layer; later entries may reference earlier ones
    pub fn set_suite_variables(&mut self, variables: &VariableMap, interpolator: &Interpolator) {
        for (name, value) in variables {
            let resolved = interpolator.interpolate(value, self);
            self.suite.insert(name.clone(), resolved);
        }
    }

    pub fn set_suite_variable(&mut self, name: impl Into<String>, value: Value) {
        self.suite.insert(name.into(), value);
    }

    /// Merge into the runtime layer without interpolation
    pub fn set_runtime_variables(&mut self, variables: VariableMap) {
        for (name, value) in variables {
            self.set_runtime_variable(name, value);
        }
    }

    pub fn set_runtime_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        trace!(variable = %name, "set runtime variable");
        self.runtime.insert(name, value);
    }

    pub fn set_global_variables(&mut self, variables: VariableMap) {
        self.global.extend(variables);
    }

    pub fn set_global_variable(&mut self, name: impl Into<String>, value: Value) {
        self.global.insert(name.into(), value);
    }

    /// Register a namespace of imported values (`{{name.key}}`)
    pub fn add_imported_flow(&mut self, name: impl Into<String>, variables: VariableMap) {
        let name = name.into();
        match self.imported.get_mut(&name) {
            Some(Value::Object(existing)) => existing.extend(variables),
            _ => {
                self.imported.insert(name, Value::Object(variables));
            }
        }
    }

    /// Drop captured and step-set values, keeping declared suite variables
    pub fn clear_runtime_variables(&mut self) {
        self.runtime.clear();
    }

    /// Reset runtime, suite and imported layers
    pub fn clear_all_non_global_variables(&mut self) {
        self.runtime.clear();
        self.suite.clear();
        self.imported.clear();
    }

    // =========================================================================
    // Readers
    // =========================================================================

    pub fn runtime_variables(&self) -> &VariableMap {
        &self.runtime
    }

    pub fn suite_variables(&self) -> &VariableMap {
        &self.suite
    }

    pub fn global_variables(&self) -> &VariableMap {
        &self.global
    }

    /// Whether `name` is defined in the runtime, suite or imported layer
    pub fn has_local(&self, name: &str) -> bool {
        self.runtime.contains_key(name)
            || self.suite.contains_key(name)
            || self.imported.contains_key(name)
    }

    pub fn create_snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot {
            runtime: self.runtime.clone(),
            suite: self.suite.clone(),
            imported: self.imported.clone(),
            global: self.global.clone(),
        }
    }

    fn layers(&self) -> [&VariableMap; 5] {
        [
            &self.runtime,
            &self.suite,
            &self.imported,
            &self.global,
            self.environment.as_ref(),
        ]
    }

    /// Fall through to the registry when the base name is a known node.
    /// The longest registered prefix wins, so an export named `user.id`
    /// shadows traversal into an export named `user`.
    fn resolve_exported(&self, segments: &[String]) -> Option<Value> {
        let base = segments.first()?;
        if !self.registry.has_node(base) {
            return None;
        }
        (2..=segments.len()).rev().find_map(|split| {
            let key = segments[..split].join(".");
            let value = self.registry.get_exported_variable(&key)?;
            get_path(&value, &segments[split..]).cloned()
        })
    }
}

impl VariableSource for VariableScope {
    fn resolve(&self, path: &str) -> Option<Value> {
        if let Some(value) = self.runtime.get(path) {
            return Some(value.clone());
        }

        let segments = split_path(path);
        let (base, rest) = segments.split_first()?;

        let local = self
            .layers()
            .into_iter()
            .find_map(|layer| layer.get(base))
            .and_then(|value| get_path(value, rest).cloned());

        local.or_else(|| self.resolve_exported(&segments))
    }

    /// Only the captured, prefix-filtered environment is visible
    fn environment_variable(&self, name: &str) -> Option<Value> {
        self.environment.get(name).cloned()
    }

    fn all_variables(&self) -> VariableMap {
        let mut merged = VariableMap::new();

        for node_id in self.registry.registered_nodes() {
            let exports = self.registry.exports_for(&node_id);
            if !exports.is_empty() {
                merged.insert(node_id, Value::Object(exports));
            }
        }

        for layer in self.layers().into_iter().rev() {
            for (name, value) in layer {
                merged.insert(name.clone(), value.clone());
            }
        }

        merged
    }
}

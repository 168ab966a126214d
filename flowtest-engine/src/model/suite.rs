// Suite Models
// Declarative test-suite documents: suites, dependencies and steps

use crate::value::VariableMap;

use std::fmt;
use std::path::PathBuf;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =============================================================================
// Suite
// =============================================================================

/// A test suite loaded from a `*.flow.yml` document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Suite {
    /// Unique node id used for dependencies and export namespacing
    #[serde(default)]
    pub node_id: String,
    /// Human readable name
    #[serde(default)]
    pub suite_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Base URL prepended to relative request URLs
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    /// A failing required suite halts the run under fail-fast
    #[serde(default)]
    pub required: bool,
    /// Suite-local variables, interpolated when the suite starts
    #[serde(default)]
    pub variables: VariableMap,
    #[serde(default)]
    pub depends: Vec<Dependency>,
    /// Names that must be exported; a missing one produces a warning
    #[serde(default)]
    pub exports: Vec<String>,
    /// Names exported when present; a missing one is silent
    #[serde(default)]
    pub exports_optional: Vec<String>,
    #[serde(default)]
    pub imports: Vec<ImportSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// File this suite was loaded from
    #[serde(default, skip_deserializing)]
    pub source_path: Option<PathBuf>,
}

impl Suite {
    pub fn new(node_id: impl Into<String>, suite_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            suite_name: suite_name.into(),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.depends.push(dependency);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_exports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exports.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_optional_exports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exports_optional
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Whether any step or scenario branch prompts for input
    pub fn has_input_steps(&self) -> bool {
        self.steps.iter().any(Step::is_input)
    }

    /// Export names in declaration order, required first
    pub fn all_export_names(&self) -> Vec<String> {
        let mut names = self.exports.clone();
        for name in &self.exports_optional {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// Discovery priority; higher priorities are ordered first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

// =============================================================================
// Dependencies and imports
// =============================================================================

/// A declared dependency on another suite
///
/// Accepts either a bare node id (`- auth`) or a mapping
/// (`- { node_id: auth, required: false, cache: false }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub node_id: String,
    /// Required dependencies constrain ordering and gate execution
    pub required: bool,
    /// Cached results are reused instead of re-running the dependency
    pub cache: bool,
}

impl Dependency {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            required: true,
            cache: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn uncached(mut self) -> Self {
        self.cache = false;
        self
    }
}

impl<'de> Deserialize<'de> for Dependency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DependencyVisitor;

        impl<'de> Visitor<'de> for DependencyVisitor {
            type Value = Dependency;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a node id or a mapping with a 'node_id' key")
            }

            fn visit_str<E>(self, value: &str) -> Result<Dependency, E>
            where
                E: de::Error,
            {
                Ok(Dependency::new(value))
            }

            fn visit_map<M>(self, mut map: M) -> Result<Dependency, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut node_id: Option<String> = None;
                let mut dependency = Dependency::new("");

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "node_id" | "test" | "path" => node_id = Some(map.next_value()?),
                        "required" => dependency.required = map.next_value()?,
                        "cache" => dependency.cache = map.next_value()?,
                        _ => {
                            map.next_value::<de::IgnoredAny>()?;
                        }
                    }
                }

                dependency.node_id = node_id.ok_or_else(|| de::Error::missing_field("node_id"))?;
                Ok(dependency)
            }
        }

        deserializer.deserialize_any(DependencyVisitor)
    }
}

/// A reusable flow imported as a namespace of variables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSpec {
    /// Namespace the values are visible under (`{{name.key}}`)
    pub name: String,
    /// Node id of a loaded suite whose variables are imported
    #[serde(default)]
    pub from: Option<String>,
    /// Inline values, overriding imported suite variables
    #[serde(default)]
    pub variables: VariableMap,
}

// =============================================================================
// Steps
// =============================================================================

/// A single step of a suite
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub request: Option<RequestSpec>,
    /// Assertion spec handed to the assertion evaluator
    #[serde(default, rename = "assert")]
    pub assertions: Option<Value>,
    /// Variable name to capture expression
    #[serde(default)]
    pub capture: VariableMap,
    /// Runtime variables set before the step runs
    #[serde(default)]
    pub variables: VariableMap,
    #[serde(default)]
    pub delay: Option<DelaySpec>,
    #[serde(default)]
    pub pre_request_script: Option<String>,
    #[serde(default)]
    pub post_request_script: Option<String>,
    #[serde(default)]
    pub continue_on_failure: bool,
    #[serde(default)]
    pub iterate: Option<IterateSpec>,
    #[serde(default)]
    pub call: Option<CallSpec>,
    #[serde(default)]
    pub scenarios: Option<Vec<ScenarioSpec>>,
    #[serde(default)]
    pub input: Option<InputSpec>,
}

impl Step {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_request(mut self, request: RequestSpec) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_assertions(mut self, assertions: Value) -> Self {
        self.assertions = Some(assertions);
        self
    }

    pub fn with_capture(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.capture
            .insert(name.into(), Value::String(expression.into()));
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn with_delay(mut self, delay: DelaySpec) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_call(mut self, call: CallSpec) -> Self {
        self.call = Some(call);
        self
    }

    pub fn with_iterate(mut self, iterate: IterateSpec) -> Self {
        self.iterate = Some(iterate);
        self
    }

    pub fn with_input(mut self, input: InputSpec) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_scenarios(mut self, scenarios: Vec<ScenarioSpec>) -> Self {
        self.scenarios = Some(scenarios);
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.input.is_some()
            || self
                .scenarios
                .iter()
                .flatten()
                .flat_map(|s| [&s.then, &s.otherwise])
                .flatten()
                .any(|block| block.input.is_some())
    }

    /// Identifier used in logs and call lookups
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// HTTP request description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: VariableMap,
    /// Query string parameters
    #[serde(default)]
    pub params: VariableMap,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestSpec {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into(), Value::String(value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Delay before a step runs
///
/// A fixed number of milliseconds, an interpolated string such as
/// `"{{wait_ms}}"`, or a random range `{ min, max }` (inclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelaySpec {
    Fixed(u64),
    Range { min: u64, max: u64 },
    Template(String),
}

/// Repeat a step for every element of a collection or a numeric range
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterateSpec {
    /// Array, or a template resolving to one
    #[serde(default)]
    pub over: Option<Value>,
    /// Number of repetitions when `over` is absent
    #[serde(default)]
    pub count: Option<Value>,
    /// Variable holding the current element
    #[serde(default = "default_item_name", rename = "as")]
    pub item: String,
    /// Variable holding the zero-based index
    #[serde(default = "default_index_name")]
    pub index_as: String,
}

fn default_item_name() -> String {
    "item".to_string()
}

fn default_index_name() -> String {
    "index".to_string()
}

impl IterateSpec {
    pub fn over(value: Value) -> Self {
        Self {
            over: Some(value),
            item: default_item_name(),
            index_as: default_index_name(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, item: impl Into<String>) -> Self {
        self.item = item.into();
        self
    }
}

/// Invoke the steps of another suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSpec {
    /// Node id of the called suite
    pub test: String,
    /// Run only the step with this id or name
    #[serde(default)]
    pub step: Option<String>,
    /// Variables supplied to the called suite; always win over its own
    #[serde(default)]
    pub variables: VariableMap,
    /// Snapshot and restore the caller's scope around the call
    #[serde(default = "default_true")]
    pub isolate_context: bool,
    /// Prefix for variables propagated back to the caller; defaults to `test`
    #[serde(default)]
    pub alias: Option<String>,
}

fn default_true() -> bool {
    true
}

impl CallSpec {
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            step: None,
            variables: VariableMap::new(),
            isolate_context: true,
            alias: None,
        }
    }

    pub fn shared_context(mut self) -> Self {
        self.isolate_context = false;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn alias_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.test)
    }
}

/// Conditional branch evaluated after the step's request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioSpec {
    #[serde(default)]
    pub name: Option<String>,
    /// Expression evaluated against the response and current variables
    pub condition: String,
    #[serde(default)]
    pub then: Option<ScenarioBlock>,
    #[serde(default, rename = "else")]
    pub otherwise: Option<ScenarioBlock>,
}

/// Actions applied when a scenario branch is taken
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioBlock {
    #[serde(default, rename = "assert")]
    pub assertions: Option<Value>,
    #[serde(default)]
    pub capture: VariableMap,
    #[serde(default)]
    pub variables: VariableMap,
    #[serde(default)]
    pub input: Option<InputSpec>,
}

/// Prompt for a value and store it in a runtime variable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSpec {
    pub prompt: String,
    pub variable: String,
    #[serde(default, rename = "type")]
    pub input_type: InputType,
    #[serde(default)]
    pub default: Option<Value>,
    /// Value used when running non-interactively
    #[serde(default)]
    pub ci_default: Option<Value>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl InputSpec {
    pub fn new(prompt: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            variable: variable.into(),
            ..Default::default()
        }
    }

    pub fn with_ci_default(mut self, value: Value) -> Self {
        self.ci_default = Some(value);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Text,
    Password,
    Number,
    Boolean,
}

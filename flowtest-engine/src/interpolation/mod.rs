// Interpolation Engine
// Resolves `{{expr}}` placeholders in nested data through prioritized strategies

pub mod faker;
pub mod strategies;

pub use faker::FakeDataGenerator;
pub use strategies::{
    EnvironmentStrategy, ExpressionStrategy, FakerStrategy, InterpolationStrategy,
    ResolveOutcome, VariableStrategy,
};

use crate::execution::scope::VariableSource;
use crate::expression::SandboxLimits;
use crate::value::{ValueExt, VariableMap};
use strategies::EXPR_PREFIX;

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

/// Substituted for a placeholder that refers back to itself
pub const CIRCULAR_REFERENCE: &str = "[Circular Reference]";

/// Default bound on nested re-interpolation
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// A balanced `{{ }}` pair located in a template
#[derive(Debug, Clone, PartialEq)]
struct Placeholder {
    /// Byte offset of the opening `{{`
    start: usize,
    /// Byte offset just past the closing `}}`
    end: usize,
    inner: String,
    nested: bool,
}

/// Scan left to right for balanced `{{ }}` pairs
fn find_placeholders(template: &str) -> Vec<Placeholder> {
    let bytes = template.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i + 1 < bytes.len() {
        if !(bytes[i] == b'{' && bytes[i + 1] == b'{') {
            i += 1;
            continue;
        }

        let start = i;
        let mut depth = 1;
        let mut nested = false;
        let mut j = i + 2;
        while j + 1 < bytes.len() && depth > 0 {
            if bytes[j] == b'{' && bytes[j + 1] == b'{' {
                depth += 1;
                nested = true;
                j += 2;
            } else if bytes[j] == b'}' && bytes[j + 1] == b'}' {
                depth -= 1;
                j += 2;
            } else {
                j += 1;
            }
        }

        if depth != 0 {
            // Unbalanced: the rest of the string is literal text
            break;
        }

        found.push(Placeholder {
            start,
            end: j,
            inner: template[start + 2..j - 2].to_string(),
            nested,
        });
        i = j;
    }

    found
}

/// Per-call state: expressions currently being expanded
struct Expansion {
    visited: HashSet<String>,
    quiet: bool,
}

/// Structural placeholder interpolation
///
/// Strategies are kept sorted by ascending priority; the first one that can
/// handle an expression and resolves it wins.
pub struct Interpolator {
    strategies: Vec<Box<dyn InterpolationStrategy>>,
    max_depth: usize,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpolator {
    /// Default strategies: environment, faker, expression, variable
    pub fn new() -> Self {
        Self::with_options(DEFAULT_MAX_DEPTH, None, SandboxLimits::default())
    }

    pub fn with_options(max_depth: usize, faker_seed: Option<u64>, limits: SandboxLimits) -> Self {
        Self::empty(max_depth)
            .with_strategy(Box::new(EnvironmentStrategy))
            .with_strategy(Box::new(FakerStrategy::new(faker_seed)))
            .with_strategy(Box::new(ExpressionStrategy::new(limits)))
            .with_strategy(Box::new(VariableStrategy))
    }

    /// No strategies registered
    pub fn empty(max_depth: usize) -> Self {
        Self {
            strategies: Vec::new(),
            max_depth,
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn InterpolationStrategy>) -> Self {
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.priority());
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Interpolate a string, array or object, preserving its shape
    pub fn interpolate(&self, template: &Value, variables: &dyn VariableSource) -> Value {
        self.run(template, variables, false)
    }

    /// Like [`interpolate`](Self::interpolate) but without warnings for
    /// unresolved placeholders
    pub fn interpolate_quiet(&self, template: &Value, variables: &dyn VariableSource) -> Value {
        self.run(template, variables, true)
    }

    /// Interpolate a string template into text
    pub fn interpolate_str(&self, template: &str, variables: &dyn VariableSource) -> String {
        self.interpolate(&Value::String(template.to_string()), variables)
            .as_display_string()
    }

    /// Interpolate every value of a map
    pub fn interpolate_map(&self, map: &VariableMap, variables: &dyn VariableSource) -> VariableMap {
        match self.interpolate(&Value::Object(map.clone()), variables) {
            Value::Object(resolved) => resolved,
            _ => map.clone(),
        }
    }

    fn run(&self, template: &Value, variables: &dyn VariableSource, quiet: bool) -> Value {
        let mut expansion = Expansion {
            visited: HashSet::new(),
            quiet,
        };
        self.interpolate_value(template, variables, 0, &mut expansion)
    }

    fn interpolate_value(
        &self,
        value: &Value,
        variables: &dyn VariableSource,
        depth: usize,
        expansion: &mut Expansion,
    ) -> Value {
        match value {
            Value::String(s) => self.interpolate_string(s, variables, depth, expansion),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.interpolate_value(item, variables, depth, expansion))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            self.interpolate_value(v, variables, depth, expansion),
                        )
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn interpolate_string(
        &self,
        template: &str,
        variables: &dyn VariableSource,
        depth: usize,
        expansion: &mut Expansion,
    ) -> Value {
        if depth > self.max_depth {
            warn!(
                template,
                max_depth = self.max_depth,
                "interpolation depth exceeded, leaving template unchanged"
            );
            return Value::String(template.to_string());
        }

        let placeholders = find_placeholders(template);
        if placeholders.is_empty() {
            return Value::String(template.to_string());
        }

        // Exactly one placeholder spanning the whole string keeps the raw type
        if let [only] = placeholders.as_slice() {
            if only.start == 0 && only.end == template.len() {
                return self
                    .resolve_placeholder(only, variables, depth, expansion)
                    .unwrap_or_else(|| Value::String(template.to_string()));
            }
        }

        let mut output = String::with_capacity(template.len());
        let mut cursor = 0;
        for placeholder in &placeholders {
            output.push_str(&template[cursor..placeholder.start]);
            let original = &template[placeholder.start..placeholder.end];
            match self.resolve_placeholder(placeholder, variables, depth, expansion) {
                Some(value) => output.push_str(&value.as_display_string()),
                None => output.push_str(original),
            }
            cursor = placeholder.end;
        }
        output.push_str(&template[cursor..]);

        Value::String(output)
    }

    fn resolve_placeholder(
        &self,
        placeholder: &Placeholder,
        variables: &dyn VariableSource,
        depth: usize,
        expansion: &mut Expansion,
    ) -> Option<Value> {
        let mut expression = placeholder.inner.trim().to_string();

        if placeholder.nested {
            if !expression.starts_with(EXPR_PREFIX) {
                return None;
            }
            // Inner references of a sandboxed expression are substituted as text first
            expression = self
                .interpolate_string(&expression, variables, depth + 1, expansion)
                .as_display_string();
        }

        if expansion.visited.contains(&expression) {
            warn!(expression = %expression, "circular reference in interpolation");
            return Some(Value::String(CIRCULAR_REFERENCE.to_string()));
        }

        expansion.visited.insert(expression.clone());
        let resolved = self
            .resolve_expression(&expression, variables, expansion.quiet)
            .map(|value| match value {
                Value::String(ref s) if s.contains("{{") => {
                    self.interpolate_string(s, variables, depth + 1, expansion)
                }
                other => other,
            });
        expansion.visited.remove(&expression);

        resolved
    }

    fn resolve_expression(
        &self,
        expression: &str,
        variables: &dyn VariableSource,
        quiet: bool,
    ) -> Option<Value> {
        for strategy in &self.strategies {
            if !strategy.can_handle(expression) {
                continue;
            }
            match strategy.resolve(expression, variables) {
                Ok(ResolveOutcome::Resolved(value)) => {
                    debug!(expression, strategy = strategy.name(), "resolved placeholder");
                    return Some(value);
                }
                Ok(ResolveOutcome::NotHandled) => continue,
                Err(err) => {
                    warn!(expression, strategy = strategy.name(), error = %err, "interpolation failed");
                    return None;
                }
            }
        }

        if !quiet {
            warn!(expression, "unresolved variable, leaving placeholder");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> VariableMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_find_placeholders() {
        let found = find_placeholders("a {{x}} b {{ y.z }}");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].inner, "x");
        assert_eq!(found[1].inner, " y.z ");
        assert!(!found[0].nested);

        let nested = find_placeholders("{{$expr: {{n}} + 1}}");
        assert_eq!(nested.len(), 1);
        assert!(nested[0].nested);

        assert!(find_placeholders("{{open").is_empty());
    }

    #[test]
    fn test_single_placeholder_keeps_type() {
        let interpolator = Interpolator::new();
        let v = vars(json!({"count": 3, "user": {"id": 1}, "flags": [true], "ok": false}));

        assert_eq!(interpolator.interpolate(&json!("{{count}}"), &v), json!(3));
        assert_eq!(interpolator.interpolate(&json!("{{user}}"), &v), json!({"id": 1}));
        assert_eq!(interpolator.interpolate(&json!("{{flags}}"), &v), json!([true]));
        assert_eq!(interpolator.interpolate(&json!("{{ ok }}"), &v), json!(false));
        assert_eq!(interpolator.interpolate(&json!("n={{count}}"), &v), json!("n=3"));
    }

    #[test]
    fn test_structural_interpolation() {
        let interpolator = Interpolator::new();
        let v = vars(json!({"id": 7, "name": "ada"}));
        let template = json!({
            "path": "/users/{{id}}",
            "tags": ["{{name}}", 1, null],
            "nested": {"id": "{{id}}"},
        });
        assert_eq!(
            interpolator.interpolate(&template, &v),
            json!({
                "path": "/users/7",
                "tags": ["ada", 1, null],
                "nested": {"id": 7},
            })
        );
    }

    #[test]
    fn test_unresolved_placeholder_left_intact() {
        let interpolator = Interpolator::new();
        let v = vars(json!({"a": 1}));
        assert_eq!(
            interpolator.interpolate(&json!("x {{missing}} {{a}}"), &v),
            json!("x {{missing}} 1")
        );
        assert_eq!(
            interpolator.interpolate_quiet(&json!("{{missing}}"), &v),
            json!("{{missing}}")
        );
    }

    #[test]
    fn test_self_recursive_template_terminates() {
        let interpolator = Interpolator::new();
        let v = vars(json!({"a": "{{a}}", "b": "x{{c}}", "c": "y{{b}}"}));

        assert_eq!(
            interpolator.interpolate(&json!("{{a}}"), &v),
            json!(CIRCULAR_REFERENCE)
        );
        let mutual = interpolator.interpolate(&json!("{{b}}"), &v);
        assert_eq!(mutual, json!(format!("xy{}", CIRCULAR_REFERENCE)));
    }

    #[test]
    fn test_depth_bound() {
        let interpolator = Interpolator::with_options(2, None, SandboxLimits::default());
        let v = vars(json!({"l1": "{{l2}}", "l2": "{{l3}}", "l3": "{{l4}}", "l4": "end"}));
        // l1 -> l2 -> l3 hits the bound; the deepest template is returned unchanged
        assert_eq!(interpolator.interpolate(&json!("{{l1}}"), &v), json!("{{l4}}"));

        let deep = Interpolator::new();
        assert_eq!(deep.interpolate(&json!("{{l1}}"), &v), json!("end"));
    }

    #[test]
    fn test_nested_placeholders_only_for_expressions() {
        let interpolator = Interpolator::new();
        let v = vars(json!({"n": 4, "key": "n"}));
        assert_eq!(
            interpolator.interpolate(&json!("{{$expr: {{n}} + 1}}"), &v),
            json!(5)
        );
        assert_eq!(
            interpolator.interpolate(&json!("{{ {{key}} }}"), &v),
            json!("{{ {{key}} }}")
        );
    }

    #[test]
    fn test_strategy_order_and_errors() {
        std::env::set_var("FLOWTEST_INTERP_TEST", "from-env");
        let interpolator = Interpolator::with_options(10, Some(3), SandboxLimits::default());
        assert_eq!(
            interpolator.strategy_names(),
            vec!["environment", "faker", "expression", "variable"]
        );

        let v = vars(json!({}));
        assert_eq!(
            interpolator.interpolate_str("{{$env.FLOWTEST_INTERP_TEST}}", &v),
            "from-env"
        );
        // Unknown generator aborts resolution and keeps the placeholder
        assert_eq!(
            interpolator.interpolate_str("{{$faker.vehicle.model}}", &v),
            "{{$faker.vehicle.model}}"
        );
        assert!(interpolator
            .interpolate_str("{{$faker.internet.email}}", &v)
            .contains('@'));
    }

    #[test]
    fn test_seeded_faker_is_deterministic_across_interpolators() {
        let a = Interpolator::with_options(10, Some(99), SandboxLimits::default());
        let b = Interpolator::with_options(10, Some(99), SandboxLimits::default());
        let v = vars(json!({}));
        assert_eq!(
            a.interpolate_str("{{$faker.person.fullName}}", &v),
            b.interpolate_str("{{$faker.person.fullName}}", &v)
        );
    }
}

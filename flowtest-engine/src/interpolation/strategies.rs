// Interpolation Strategies
// Pluggable resolvers for placeholder expressions, tried in ascending priority

use crate::error::InterpolationError;
use crate::execution::scope::VariableSource;
use crate::expression::{ExpressionEngine, SandboxLimits};
use crate::interpolation::faker::FakeDataGenerator;

use serde_json::Value;

/// Result of a strategy that claimed an expression
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(Value),
    /// The strategy matched syntactically but has no value; the next one is tried
    NotHandled,
}

/// A named, prioritized resolver for `{{...}}` expressions
pub trait InterpolationStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Lower values are tried first
    fn priority(&self) -> u32;

    fn can_handle(&self, expression: &str) -> bool;

    fn resolve(
        &self,
        expression: &str,
        variables: &dyn VariableSource,
    ) -> Result<ResolveOutcome, InterpolationError>;
}

// =============================================================================
// Environment
// =============================================================================

/// `$env.NAME` reads the environment exposed by the variable source
#[derive(Debug, Default)]
pub struct EnvironmentStrategy;

const ENV_PREFIX: &str = "$env.";

impl InterpolationStrategy for EnvironmentStrategy {
    fn name(&self) -> &str {
        "environment"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn can_handle(&self, expression: &str) -> bool {
        expression.starts_with(ENV_PREFIX)
    }

    fn resolve(
        &self,
        expression: &str,
        variables: &dyn VariableSource,
    ) -> Result<ResolveOutcome, InterpolationError> {
        let name = expression[ENV_PREFIX.len()..].trim();
        Ok(match variables.environment_variable(name) {
            Some(value) => ResolveOutcome::Resolved(value),
            None => ResolveOutcome::NotHandled,
        })
    }
}

// =============================================================================
// Synthetic data
// =============================================================================

/// `$faker.category.method` generates synthetic data
#[derive(Debug)]
pub struct FakerStrategy {
    generator: FakeDataGenerator,
}

const FAKER_PREFIX: &str = "$faker.";

impl FakerStrategy {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            generator: FakeDataGenerator::new(seed),
        }
    }
}

impl InterpolationStrategy for FakerStrategy {
    fn name(&self) -> &str {
        "faker"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn can_handle(&self, expression: &str) -> bool {
        expression.starts_with(FAKER_PREFIX)
    }

    fn resolve(
        &self,
        expression: &str,
        _variables: &dyn VariableSource,
    ) -> Result<ResolveOutcome, InterpolationError> {
        self.generator
            .generate(&expression[FAKER_PREFIX.len()..])
            .map(ResolveOutcome::Resolved)
    }
}

// =============================================================================
// Sandboxed expressions
// =============================================================================

/// `$expr: <expression>` evaluates in the expression sandbox against a
/// snapshot of every visible variable
#[derive(Debug, Default)]
pub struct ExpressionStrategy {
    engine: ExpressionEngine,
}

pub const EXPR_PREFIX: &str = "$expr:";

impl ExpressionStrategy {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            engine: ExpressionEngine::with_limits(limits),
        }
    }
}

impl InterpolationStrategy for ExpressionStrategy {
    fn name(&self) -> &str {
        "expression"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn can_handle(&self, expression: &str) -> bool {
        expression.starts_with(EXPR_PREFIX)
    }

    fn resolve(
        &self,
        expression: &str,
        variables: &dyn VariableSource,
    ) -> Result<ResolveOutcome, InterpolationError> {
        let source = expression[EXPR_PREFIX.len()..].trim();
        self.engine
            .evaluate(source, &variables.all_variables())
            .map(ResolveOutcome::Resolved)
            .map_err(|err| InterpolationError::Expression {
                expression: source.to_string(),
                message: err.message,
            })
    }
}

// =============================================================================
// Variables
// =============================================================================

/// Fallback: scoped variable and dot-path lookup
#[derive(Debug, Default)]
pub struct VariableStrategy;

impl InterpolationStrategy for VariableStrategy {
    fn name(&self) -> &str {
        "variable"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn can_handle(&self, _expression: &str) -> bool {
        true
    }

    fn resolve(
        &self,
        expression: &str,
        variables: &dyn VariableSource,
    ) -> Result<ResolveOutcome, InterpolationError> {
        Ok(match variables.resolve(expression) {
            Some(value) => ResolveOutcome::Resolved(value),
            None => ResolveOutcome::NotHandled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::VariableMap;
    use serde_json::json;

    fn vars() -> VariableMap {
        json!({"count": 4, "user": {"name": "ada"}})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_environment_strategy() {
        std::env::set_var("FLOWTEST_STRATEGY_TEST", "on");
        let strategy = EnvironmentStrategy;
        assert!(strategy.can_handle("$env.FLOWTEST_STRATEGY_TEST"));
        assert!(!strategy.can_handle("env.X"));
        assert_eq!(
            strategy.resolve("$env.FLOWTEST_STRATEGY_TEST", &vars()).unwrap(),
            ResolveOutcome::Resolved(json!("on"))
        );
        assert_eq!(
            strategy.resolve("$env.FLOWTEST_DEFINITELY_UNSET", &vars()).unwrap(),
            ResolveOutcome::NotHandled
        );
    }

    #[test]
    fn test_expression_strategy() {
        let strategy = ExpressionStrategy::default();
        assert_eq!(
            strategy.resolve("$expr: count * 2", &vars()).unwrap(),
            ResolveOutcome::Resolved(json!(8))
        );
        assert!(matches!(
            strategy.resolve("$expr: count +", &vars()),
            Err(InterpolationError::Expression { .. })
        ));
    }

    #[test]
    fn test_faker_strategy() {
        let strategy = FakerStrategy::new(Some(1));
        let ResolveOutcome::Resolved(value) = strategy.resolve("$faker.string.uuid", &vars()).unwrap()
        else {
            panic!("expected a value");
        };
        assert!(value.is_string());
    }

    #[test]
    fn test_variable_strategy() {
        let strategy = VariableStrategy;
        assert_eq!(
            strategy.resolve("user.name", &vars()).unwrap(),
            ResolveOutcome::Resolved(json!("ada"))
        );
        assert_eq!(
            strategy.resolve("user.age", &vars()).unwrap(),
            ResolveOutcome::NotHandled
        );
    }
}

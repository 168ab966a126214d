// Expression Evaluator
// Evaluates expression ASTs against a read-only variable snapshot under sandbox limits

use crate::expression::functions::{BuiltinFunctions, NAMESPACES};
use crate::expression::parser::{BinaryOp, Expr, ExprParser, ParseExprError, UnaryOp};
use crate::value::{get_path, loosely_equal, number_value, split_path, ValueExt, VariableMap};

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Evaluation error
#[derive(Debug, Clone)]
pub struct EvalError {
    pub message: String,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation error: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<ParseExprError> for EvalError {
    fn from(err: ParseExprError) -> Self {
        Self::new(err.to_string())
    }
}

/// Resource limits applied to every evaluation
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    /// Wall-clock budget for one expression or script
    pub timeout: Duration,
    /// Maximum number of AST nodes visited
    pub max_steps: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_steps: 100_000,
        }
    }
}

impl SandboxLimits {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// Tree-walking evaluator
///
/// Reads go to values assigned through `set` first, then to the snapshot.
/// The snapshot itself is never mutated.
pub struct Evaluator<'a> {
    variables: &'a VariableMap,
    assigned: RefCell<VariableMap>,
    allow_set: bool,
    functions: BuiltinFunctions,
    limits: SandboxLimits,
    steps: Cell<u64>,
    deadline: Instant,
}

impl<'a> Evaluator<'a> {
    pub fn new(variables: &'a VariableMap) -> Self {
        let limits = SandboxLimits::default();
        Self {
            variables,
            assigned: RefCell::new(VariableMap::new()),
            allow_set: false,
            functions: BuiltinFunctions::new(),
            limits,
            steps: Cell::new(0),
            deadline: Instant::now() + limits.timeout,
        }
    }

    pub fn with_limits(mut self, limits: SandboxLimits) -> Self {
        self.limits = limits;
        self.deadline = Instant::now() + limits.timeout;
        self
    }

    /// Enable the `set(name, value)` setter
    pub fn with_setter(mut self) -> Self {
        self.allow_set = true;
        self
    }

    /// Values assigned through `set`, in assignment order
    pub fn into_assignments(self) -> VariableMap {
        self.assigned.into_inner()
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.tick()?;

        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(number_value(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Identifier(name) => Ok(self.lookup(name)),

            Expr::Call { name, args } => self.eval_call(name, args),

            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.eval_index(&object, &index)
            }

            Expr::Member { object, property } => {
                let object = self.eval(object)?;
                self.eval_member(&object, property)
            }

            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => value
                        .to_number_lenient()
                        .map(|n| number_value(-n))
                        .ok_or_else(|| EvalError::new("cannot negate non-number")),
                }
            }

            Expr::Binary { op, left, right } => match op {
                // Short-circuit, returning the deciding operand
                BinaryOp::And => {
                    let left = self.eval(left)?;
                    if !left.is_truthy() {
                        return Ok(left);
                    }
                    self.eval(right)
                }
                BinaryOp::Or => {
                    let left = self.eval(left)?;
                    if left.is_truthy() {
                        return Ok(left);
                    }
                    self.eval(right)
                }
                _ => {
                    let left = self.eval(left)?;
                    let right = self.eval(right)?;
                    self.eval_binary(*op, &left, &right)
                }
            },

            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }

            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),

            Expr::Object(pairs) => {
                let mut map = VariableMap::new();
                for (key, value) in pairs {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    fn tick(&self) -> Result<(), EvalError> {
        let steps = self.steps.get() + 1;
        self.steps.set(steps);
        if steps > self.limits.max_steps {
            return Err(EvalError::new(format!(
                "evaluation step budget of {} exhausted",
                self.limits.max_steps
            )));
        }
        if steps % 64 == 0 && Instant::now() > self.deadline {
            return Err(EvalError::new(format!(
                "evaluation timed out after {}ms",
                self.limits.timeout.as_millis()
            )));
        }
        Ok(())
    }

    /// Unknown names evaluate to null
    fn lookup(&self, name: &str) -> Value {
        if let Some(value) = self.assigned.borrow().get(name) {
            return value.clone();
        }
        self.variables.get(name).cloned().unwrap_or(Value::Null)
    }

    fn is_bound(&self, name: &str) -> bool {
        self.assigned.borrow().contains_key(name) || self.variables.contains_key(name)
    }

    fn eval_call(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        // `Math.floor(x)` parses as a method call on `Math`; drop the namespace receiver
        let args = match args.first() {
            Some(Expr::Identifier(receiver))
                if NAMESPACES.contains(&receiver.as_str()) && !self.is_bound(receiver) =>
            {
                &args[1..]
            }
            _ => args,
        };

        let values = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<Result<Vec<_>, _>>()?;

        match name {
            "set" => self.call_set(values),
            "get" => {
                let path = values
                    .first()
                    .map(ValueExt::as_display_string)
                    .ok_or_else(|| EvalError::new("get() requires 1 argument"))?;
                Ok(self.lookup_path(&path))
            }
            _ => self.functions.call(name, values),
        }
    }

    fn call_set(&self, values: Vec<Value>) -> Result<Value, EvalError> {
        if !self.allow_set {
            return Err(EvalError::new("set() is only available in scripts"));
        }
        let mut values = values.into_iter();
        let (Some(name), Some(value), None) = (values.next(), values.next(), values.next()) else {
            return Err(EvalError::new("set() requires 2 arguments"));
        };
        let Value::String(name) = name else {
            return Err(EvalError::new("set() requires a string variable name"));
        };
        self.assigned.borrow_mut().insert(name, value.clone());
        Ok(value)
    }

    fn lookup_path(&self, path: &str) -> Value {
        let segments = split_path(path);
        let Some((first, rest)) = segments.split_first() else {
            return Value::Null;
        };
        let root = self.lookup(first);
        get_path(&root, rest).cloned().unwrap_or(Value::Null)
    }

    fn eval_index(&self, object: &Value, index: &Value) -> Result<Value, EvalError> {
        match (object, index) {
            (Value::Array(items), Value::Number(n)) => {
                let i = n.as_f64().unwrap_or(-1.0);
                if i < 0.0 {
                    return Ok(Value::Null);
                }
                Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
            }
            (Value::Object(map), key) => Ok(map
                .get(&key.as_display_string())
                .cloned()
                .unwrap_or(Value::Null)),
            (Value::String(s), Value::Number(n)) => Ok(n
                .as_u64()
                .and_then(|i| s.chars().nth(i as usize))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null)),
            (Value::Null, _) => Ok(Value::Null),
            _ => Err(EvalError::new(format!(
                "cannot index {} with {}",
                object.type_name(),
                index.type_name()
            ))),
        }
    }

    fn eval_member(&self, object: &Value, property: &str) -> Result<Value, EvalError> {
        match object {
            Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
            Value::Array(items) if property == "length" => Ok(Value::from(items.len())),
            Value::String(s) if property == "length" => Ok(Value::from(s.chars().count())),
            Value::Null => Ok(Value::Null),
            _ => Err(EvalError::new(format!(
                "cannot access property '{}' on {}",
                property,
                object.type_name()
            ))),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match op {
            BinaryOp::Add => self.eval_add(left, right),
            BinaryOp::Sub => self.numeric(left, right, op, |a, b| Ok(a - b)),
            BinaryOp::Mul => self.numeric(left, right, op, |a, b| Ok(a * b)),
            BinaryOp::Div => self.numeric(left, right, op, |a, b| {
                if b == 0.0 {
                    Err(EvalError::new("division by zero"))
                } else {
                    Ok(a / b)
                }
            }),
            BinaryOp::Mod => self.numeric(left, right, op, |a, b| {
                if b == 0.0 {
                    Err(EvalError::new("modulo by zero"))
                } else {
                    Ok(a % b)
                }
            }),
            BinaryOp::Eq => Ok(Value::Bool(loosely_equal(left, right))),
            BinaryOp::Ne => Ok(Value::Bool(!loosely_equal(left, right))),
            BinaryOp::Lt => self.compare(left, right, Ordering::is_lt),
            BinaryOp::Le => self.compare(left, right, Ordering::is_le),
            BinaryOp::Gt => self.compare(left, right, Ordering::is_gt),
            BinaryOp::Ge => self.compare(left, right, Ordering::is_ge),
            BinaryOp::And | BinaryOp::Or => Err(EvalError::new("logical operator out of place")),
        }
    }

    fn eval_add(&self, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match (left, right) {
            (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
                "{}{}",
                left.as_display_string(),
                right.as_display_string()
            ))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => self.numeric(left, right, BinaryOp::Add, |a, b| Ok(a + b)),
        }
    }

    fn numeric(
        &self,
        left: &Value,
        right: &Value,
        op: BinaryOp,
        apply: impl FnOnce(f64, f64) -> Result<f64, EvalError>,
    ) -> Result<Value, EvalError> {
        match (left.to_number_lenient(), right.to_number_lenient()) {
            (Some(a), Some(b)) => apply(a, b).map(number_value),
            _ => Err(EvalError::new(format!(
                "operator '{}' requires numbers, got {} and {}",
                op,
                left.type_name(),
                right.type_name()
            ))),
        }
    }

    fn compare(
        &self,
        left: &Value,
        right: &Value,
        test: fn(Ordering) -> bool,
    ) -> Result<Value, EvalError> {
        let ordering = match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => match (left.to_number_lenient(), right.to_number_lenient()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        };
        ordering
            .map(|o| Value::Bool(test(o)))
            .ok_or_else(|| {
                EvalError::new(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                ))
            })
    }
}

/// Outcome of running a script
#[derive(Debug, Clone, Default)]
pub struct ScriptOutput {
    /// Variables set through `set(name, value)`
    pub assignments: VariableMap,
    /// Value of the last statement
    pub result: Value,
}

/// High-level entry point for the sandboxed expression language
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEngine {
    limits: SandboxLimits,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Evaluate one expression against a variable snapshot
    pub fn evaluate(&self, source: &str, variables: &VariableMap) -> Result<Value, EvalError> {
        let ast = ExprParser::parse_str(source)?;
        Evaluator::new(variables)
            .with_limits(self.limits)
            .eval(&ast)
    }

    /// Evaluate an expression for its truthiness
    pub fn evaluate_condition(
        &self,
        source: &str,
        variables: &VariableMap,
    ) -> Result<bool, EvalError> {
        self.evaluate(source, variables).map(|v| v.is_truthy())
    }

    /// Run a script of `;`/newline separated statements with the setter enabled
    pub fn run_script(&self, source: &str, variables: &VariableMap) -> Result<ScriptOutput, EvalError> {
        let statements = ExprParser::parse_program(source)?;
        let evaluator = Evaluator::new(variables)
            .with_limits(self.limits)
            .with_setter();

        let mut result = Value::Null;
        for statement in &statements {
            result = evaluator.eval(statement)?;
        }

        Ok(ScriptOutput {
            assignments: evaluator.into_assignments(),
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> VariableMap {
        json!({
            "status_code": 200,
            "body": {"id": 7, "items": [{"name": "a"}, {"name": "b"}], "token": "eyJhbGci"},
            "headers": {"content-type": "application/json"},
            "name": "flow",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn eval(source: &str) -> Value {
        ExpressionEngine::new().evaluate(source, &vars()).unwrap()
    }

    #[test]
    fn test_eval_paths() {
        assert_eq!(eval("body.id"), json!(7));
        assert_eq!(eval("body.items[1].name"), json!("b"));
        assert_eq!(eval("headers['content-type']"), json!("application/json"));
        assert_eq!(eval("body.items.length"), json!(2));
        assert_eq!(eval("body.missing.deeper"), Value::Null);
        assert_eq!(eval("undefined_name"), Value::Null);
    }

    #[test]
    fn test_eval_arithmetic_keeps_integers() {
        assert_eq!(eval("1 + 2 * 3"), json!(7));
        assert_eq!(eval("7 / 2"), json!(3.5));
        assert_eq!(eval("-body.id"), json!(-7));
        assert_eq!(eval("'id-' + body.id"), json!("id-7"));
    }

    #[test]
    fn test_eval_comparison_and_logic() {
        assert_eq!(eval("status_code >= 200 && status_code < 300"), json!(true));
        assert_eq!(eval("status_code == '200'"), json!(true));
        assert_eq!(eval("name || 'fallback'"), json!("flow"));
        assert_eq!(eval("missing || 'fallback'"), json!("fallback"));
        assert_eq!(eval("'a' < 'b'"), json!(true));
        assert_eq!(eval("status_code == 200 ? 'ok' : 'bad'"), json!("ok"));
    }

    #[test]
    fn test_eval_method_and_namespace_calls() {
        assert_eq!(eval("body.token.startsWith('eyJ')"), json!(true));
        assert_eq!(eval("Math.max(1, body.id)"), json!(7));
        assert_eq!(eval("JSON.stringify([1])"), json!("[1]"));
        assert_eq!(eval("length(body.items)"), json!(2));
    }

    #[test]
    fn test_eval_errors() {
        let engine = ExpressionEngine::new();
        assert!(engine.evaluate("1 / 0", &vars()).is_err());
        assert!(engine.evaluate("'a' - 1", &vars()).is_err());
        assert!(engine.evaluate("readFile('/etc/passwd')", &vars()).is_err());
        assert!(engine.evaluate("set('x', 1)", &vars()).is_err());
        assert!(engine.evaluate("1 +", &vars()).is_err());
    }

    #[test]
    fn test_step_budget() {
        let engine = ExpressionEngine::with_limits(SandboxLimits::default().with_max_steps(5));
        let err = engine
            .evaluate("1 + 1 + 1 + 1 + 1 + 1", &vars())
            .unwrap_err();
        assert!(err.message.contains("budget"));
    }

    #[test]
    fn test_timeout() {
        let engine = ExpressionEngine::with_limits(
            SandboxLimits::default()
                .with_timeout(Duration::ZERO)
                .with_max_steps(u64::MAX),
        );
        let long = vec!["1"; 200].join(" + ");
        let err = engine.evaluate(&long, &vars()).unwrap_err();
        assert!(err.message.contains("timed out"));
    }

    #[test]
    fn test_run_script_setter() {
        let output = ExpressionEngine::new()
            .run_script(
                "set('user_id', body.id)\nset('next', user_id + 1); set('request.headers.X-Id', 'abc')",
                &vars(),
            )
            .unwrap();
        assert_eq!(output.assignments["user_id"], json!(7));
        assert_eq!(output.assignments["next"], json!(8));
        assert_eq!(output.assignments["request.headers.X-Id"], json!("abc"));
        assert_eq!(output.result, json!("abc"));
    }

    #[test]
    fn test_get_reads_dotted_paths() {
        assert_eq!(eval("get('body.items[0].name')"), json!("a"));
    }
}

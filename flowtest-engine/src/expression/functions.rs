// Built-in Functions
// Allow-listed math, string, JSON, date and utility functions for the sandbox

use crate::expression::evaluator::EvalError;
use crate::value::{loosely_equal, number_value, ValueExt};

use std::fmt::Write;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Registry of sandbox functions
///
/// Names are matched case-insensitively, so `toUpperCase` and `touppercase`
/// resolve to the same function. Nothing here touches the filesystem,
/// processes or the network.
#[derive(Debug, Default)]
pub struct BuiltinFunctions;

/// Namespaces accepted as call receivers (`Math.floor(x)`, `JSON.stringify(x)`)
pub const NAMESPACES: &[&str] = &["Math", "JSON", "Date", "String", "Number"];

impl BuiltinFunctions {
    pub fn new() -> Self {
        Self
    }

    /// Whether `name` is on the allow-list
    pub fn is_known(&self, name: &str) -> bool {
        self.call(name, Vec::new()).map_or_else(
            |err| !err.message.starts_with("unknown function"),
            |_| true,
        )
    }

    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match name.to_lowercase().as_str() {
            // Math
            "abs" => self.unary_math(&args, "abs", f64::abs),
            "floor" => self.unary_math(&args, "floor", f64::floor),
            "ceil" => self.unary_math(&args, "ceil", f64::ceil),
            "round" => self.unary_math(&args, "round", f64::round),
            "sqrt" => self.unary_math(&args, "sqrt", f64::sqrt),
            "pow" => {
                let (base, exponent) = self.two_numbers(&args, "pow")?;
                Ok(number_value(base.powf(exponent)))
            }
            "min" => self.fold_numbers(&args, "min", f64::min),
            "max" => self.fold_numbers(&args, "max", f64::max),

            // Strings
            "contains" | "includes" => self.fn_contains(args),
            "startswith" => {
                let (s, prefix) = self.two_strings(&args, "startsWith")?;
                Ok(Value::Bool(s.starts_with(&prefix)))
            }
            "endswith" => {
                let (s, suffix) = self.two_strings(&args, "endsWith")?;
                Ok(Value::Bool(s.ends_with(&suffix)))
            }
            "lower" | "tolowercase" => {
                self.require_args(&args, 1, "lower")?;
                Ok(Value::String(args[0].as_display_string().to_lowercase()))
            }
            "upper" | "touppercase" => {
                self.require_args(&args, 1, "upper")?;
                Ok(Value::String(args[0].as_display_string().to_uppercase()))
            }
            "trim" => {
                self.require_args(&args, 1, "trim")?;
                Ok(Value::String(args[0].as_display_string().trim().to_string()))
            }
            "replace" => {
                self.require_args(&args, 3, "replace")?;
                let s = args[0].as_display_string();
                Ok(Value::String(s.replace(
                    &args[1].as_display_string(),
                    &args[2].as_display_string(),
                )))
            }
            "split" => {
                let (s, delimiter) = self.two_strings(&args, "split")?;
                Ok(Value::Array(
                    s.split(delimiter.as_str())
                        .map(|p| Value::String(p.to_string()))
                        .collect(),
                ))
            }
            "join" => self.fn_join(args),
            "substring" | "substr" => self.fn_substring(args),
            "indexof" => {
                let (s, needle) = self.two_strings(&args, "indexOf")?;
                Ok(match s.find(&needle) {
                    Some(byte) => Value::from(s[..byte].chars().count() as i64),
                    None => Value::from(-1),
                })
            }
            "concat" => Ok(Value::String(
                args.iter().map(ValueExt::as_display_string).collect(),
            )),
            "format" => self.fn_format(args),

            // JSON
            "tojson" | "stringify" => {
                self.require_args(&args, 1, "toJson")?;
                Ok(Value::String(args[0].to_string()))
            }
            "parsejson" | "parse" => {
                self.require_args(&args, 1, "parseJson")?;
                serde_json::from_str(&args[0].as_display_string())
                    .map_err(|e| EvalError::new(format!("parseJson() failed: {}", e)))
            }
            "keys" => match args.first() {
                Some(Value::Object(map)) => Ok(Value::Array(
                    map.keys().cloned().map(Value::String).collect(),
                )),
                _ => Err(EvalError::new("keys() requires an object")),
            },
            "values" => match args.first() {
                Some(Value::Object(map)) => Ok(Value::Array(map.values().cloned().collect())),
                _ => Err(EvalError::new("values() requires an object")),
            },

            // Dates
            "now" => Ok(Value::String(
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            "timestamp" => Ok(Value::from(Utc::now().timestamp_millis())),
            "formatdate" => {
                self.require_args(&args, 1, "formatDate")?;
                let pattern = args[0].as_display_string();
                let mut formatted = String::new();
                write!(formatted, "{}", Utc::now().format(&pattern))
                    .map_err(|_| EvalError::new(format!("invalid date format: {}", pattern)))?;
                Ok(Value::String(formatted))
            }

            // Conversion and utility
            "number" | "tonumber" | "parsefloat" | "parseint" => {
                self.require_args(&args, 1, "number")?;
                args[0]
                    .to_number_lenient()
                    .map(number_value)
                    .ok_or_else(|| EvalError::new("number() argument is not numeric"))
            }
            "string" | "tostring" => {
                self.require_args(&args, 1, "string")?;
                Ok(Value::String(args[0].as_display_string()))
            }
            "boolean" => {
                self.require_args(&args, 1, "boolean")?;
                Ok(Value::Bool(args[0].is_truthy()))
            }
            "typeof" => {
                self.require_args(&args, 1, "typeof")?;
                Ok(Value::String(args[0].type_name().to_string()))
            }
            "eq" => {
                self.require_args(&args, 2, "eq")?;
                Ok(Value::Bool(loosely_equal(&args[0], &args[1])))
            }
            "ne" => {
                self.require_args(&args, 2, "ne")?;
                Ok(Value::Bool(!loosely_equal(&args[0], &args[1])))
            }
            "not" => {
                self.require_args(&args, 1, "not")?;
                Ok(Value::Bool(!args[0].is_truthy()))
            }
            "coalesce" => Ok(args
                .into_iter()
                .find(|v| !matches!(v, Value::Null) && v.as_str() != Some(""))
                .unwrap_or(Value::Null)),
            "iif" => {
                self.require_args(&args, 3, "iif")?;
                let mut args = args;
                let otherwise = args.pop().unwrap_or(Value::Null);
                let then = args.pop().unwrap_or(Value::Null);
                Ok(if args[0].is_truthy() { then } else { otherwise })
            }
            "length" => {
                self.require_args(&args, 1, "length")?;
                match &args[0] {
                    Value::String(s) => Ok(Value::from(s.chars().count())),
                    Value::Array(items) => Ok(Value::from(items.len())),
                    Value::Object(map) => Ok(Value::from(map.len())),
                    Value::Null => Ok(Value::from(0)),
                    _ => Err(EvalError::new("length() requires string, array, or object")),
                }
            }

            _ => Err(EvalError::new(format!("unknown function: {}", name))),
        }
    }

    // =========================================================================
    // String helpers
    // =========================================================================

    fn fn_contains(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        self.require_args(&args, 2, "contains")?;
        match (&args[0], &args[1]) {
            (Value::Array(items), needle) => {
                Ok(Value::Bool(items.iter().any(|item| loosely_equal(item, needle))))
            }
            (Value::Object(map), key) => Ok(Value::Bool(map.contains_key(&key.as_display_string()))),
            (Value::Null, _) => Ok(Value::Bool(false)),
            (haystack, needle) => Ok(Value::Bool(
                haystack
                    .as_display_string()
                    .contains(&needle.as_display_string()),
            )),
        }
    }

    fn fn_join(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.is_empty() || args.len() > 2 {
            return Err(EvalError::new("join() requires 1 or 2 arguments"));
        }
        let separator = args
            .get(1)
            .map(ValueExt::as_display_string)
            .unwrap_or_else(|| ",".to_string());
        match &args[0] {
            Value::Array(items) => Ok(Value::String(
                items
                    .iter()
                    .map(ValueExt::as_display_string)
                    .collect::<Vec<_>>()
                    .join(&separator),
            )),
            _ => Err(EvalError::new("join() requires array as first argument")),
        }
    }

    fn fn_substring(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        if args.len() < 2 || args.len() > 3 {
            return Err(EvalError::new("substring() requires 2 or 3 arguments"));
        }
        let chars: Vec<char> = args[0].as_display_string().chars().collect();
        let start = self.index_arg(&args[1], chars.len())?;
        let end = match args.get(2) {
            Some(end) => self.index_arg(end, chars.len())?,
            None => chars.len(),
        };
        if start >= end {
            return Ok(Value::String(String::new()));
        }
        Ok(Value::String(chars[start..end].iter().collect()))
    }

    /// `format('{0}-{1}', a, b)`
    fn fn_format(&self, args: Vec<Value>) -> Result<Value, EvalError> {
        let Some((template, rest)) = args.split_first() else {
            return Err(EvalError::new("format() requires at least 1 argument"));
        };
        let mut result = template.as_display_string();
        for (i, arg) in rest.iter().enumerate() {
            result = result.replace(&format!("{{{}}}", i), &arg.as_display_string());
        }
        Ok(Value::String(result))
    }

    // =========================================================================
    // Argument helpers
    // =========================================================================

    fn require_args(&self, args: &[Value], count: usize, name: &str) -> Result<(), EvalError> {
        if args.len() != count {
            return Err(EvalError::new(format!(
                "{}() requires {} argument(s), got {}",
                name,
                count,
                args.len()
            )));
        }
        Ok(())
    }

    fn unary_math(&self, args: &[Value], name: &str, op: fn(f64) -> f64) -> Result<Value, EvalError> {
        self.require_args(args, 1, name)?;
        let n = args[0]
            .to_number_lenient()
            .ok_or_else(|| EvalError::new(format!("{}() requires a number", name)))?;
        Ok(number_value(op(n)))
    }

    fn fold_numbers(&self, args: &[Value], name: &str, op: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
        // A single array argument is spread: max([1, 2, 3])
        let items: &[Value] = match args {
            [Value::Array(items)] => items,
            _ => args,
        };
        let mut numbers = items.iter().map(|v| {
            v.to_number_lenient()
                .ok_or_else(|| EvalError::new(format!("{}() requires numbers", name)))
        });
        let first = numbers
            .next()
            .ok_or_else(|| EvalError::new(format!("{}() requires at least 1 argument", name)))??;
        let result = numbers.try_fold(first, |acc, n| n.map(|n| op(acc, n)))?;
        Ok(number_value(result))
    }

    fn two_numbers(&self, args: &[Value], name: &str) -> Result<(f64, f64), EvalError> {
        self.require_args(args, 2, name)?;
        match (args[0].to_number_lenient(), args[1].to_number_lenient()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(EvalError::new(format!("{}() requires numbers", name))),
        }
    }

    fn two_strings(&self, args: &[Value], name: &str) -> Result<(String, String), EvalError> {
        self.require_args(args, 2, name)?;
        Ok((args[0].as_display_string(), args[1].as_display_string()))
    }

    /// Clamp an index argument to `0..=len`; negative values count from the end
    fn index_arg(&self, value: &Value, len: usize) -> Result<usize, EvalError> {
        let n = value
            .to_number_lenient()
            .ok_or_else(|| EvalError::new("index must be a number"))? as i64;
        let index = if n < 0 { len as i64 + n } else { n };
        Ok(index.clamp(0, len as i64) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Vec<Value>) -> Value {
        BuiltinFunctions::new().call(name, args).unwrap()
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(call("floor", vec![json!(2.7)]), json!(2));
        assert_eq!(call("ABS", vec![json!(-3)]), json!(3));
        assert_eq!(call("pow", vec![json!(2), json!(10)]), json!(1024));
        assert_eq!(call("max", vec![json!(1), json!(9), json!(4)]), json!(9));
        assert_eq!(call("min", vec![json!([5, 2, 8])]), json!(2));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(call("toUpperCase", vec![json!("abc")]), json!("ABC"));
        assert_eq!(call("startsWith", vec![json!("Bearer x"), json!("Bearer")]), json!(true));
        assert_eq!(call("split", vec![json!("a,b"), json!(",")]), json!(["a", "b"]));
        assert_eq!(call("join", vec![json!(["a", 1]), json!("-")]), json!("a-1"));
        assert_eq!(call("substring", vec![json!("abcdef"), json!(1), json!(3)]), json!("bc"));
        assert_eq!(call("substring", vec![json!("abcdef"), json!(-2)]), json!("ef"));
        assert_eq!(call("indexOf", vec![json!("hello"), json!("l")]), json!(2));
        assert_eq!(call("format", vec![json!("{0}/{1}"), json!("a"), json!(2)]), json!("a/2"));
    }

    #[test]
    fn test_contains_variants() {
        assert_eq!(call("contains", vec![json!([1, 2]), json!("2")]), json!(true));
        assert_eq!(call("contains", vec![json!({"id": 1}), json!("id")]), json!(true));
        assert_eq!(call("includes", vec![json!("token"), json!("ok")]), json!(true));
        assert_eq!(call("contains", vec![Value::Null, json!("x")]), json!(false));
    }

    #[test]
    fn test_json_functions() {
        assert_eq!(call("toJson", vec![json!({"a": 1})]), json!("{\"a\":1}"));
        assert_eq!(call("parseJson", vec![json!("[1,2]")]), json!([1, 2]));
        assert!(BuiltinFunctions::new()
            .call("parseJson", vec![json!("{bad")])
            .is_err());
        assert_eq!(call("keys", vec![json!({"a": 1, "b": 2})]), json!(["a", "b"]));
    }

    #[test]
    fn test_date_functions() {
        let now = call("now", vec![]);
        assert!(now.as_str().unwrap().ends_with('Z'));
        assert!(call("timestamp", vec![]).as_i64().unwrap() > 1_600_000_000_000);
        assert_eq!(call("formatDate", vec![json!("%Y")]).as_str().unwrap().len(), 4);
    }

    #[test]
    fn test_utility_functions() {
        assert_eq!(call("coalesce", vec![Value::Null, json!(""), json!("x")]), json!("x"));
        assert_eq!(call("iif", vec![json!(false), json!(1), json!(2)]), json!(2));
        assert_eq!(call("length", vec![json!("héllo")]), json!(5));
        assert_eq!(call("number", vec![json!("42")]), json!(42));
        assert_eq!(call("typeof", vec![json!([1])]), json!("array"));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        let functions = BuiltinFunctions::new();
        let err = functions.call("exec", vec![json!("rm -rf /")]).unwrap_err();
        assert!(err.message.contains("unknown function"));
        assert!(functions.call("trim", vec![]).is_err());
        assert!(!functions.is_known("readFile"));
        assert!(functions.is_known("trim"));
    }
}

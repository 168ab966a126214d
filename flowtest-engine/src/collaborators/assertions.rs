// Response Assertions
// Evaluates a step's `assert` block against the HTTP result

use crate::collaborators::AssertionEvaluator;
use crate::model::{AssertionResult, HttpResult};
use crate::value::{get_path, loosely_equal, split_path, ValueExt};

use regex::Regex;
use serde_json::Value;

/// Operators understood in an `assert` block
pub const OPERATORS: &[&str] = &[
    "equals",
    "not_equals",
    "contains",
    "exists",
    "greater_than",
    "less_than",
    "regex",
    "type",
    "length",
];

/// Default assertion evaluator
///
/// ```yaml
/// assert:
///   status_code: 200
///   headers.content-type: { contains: json }
///   body.items: { length: 2 }
///   response_time_ms: { less_than: 500 }
/// ```
///
/// A bare value means `equals`. A list of such maps is also accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAssertionEvaluator;

impl DefaultAssertionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Resolve an assertion field against the response
    fn actual_value(field: &str, result: &HttpResult) -> Value {
        let response = result.response_details.as_ref();
        match field {
            "status_code" | "status" => response
                .map(|r| Value::from(r.status_code))
                .unwrap_or(Value::Null),
            "response_time_ms" | "duration_ms" => Value::from(result.duration_ms),
            _ => {
                if let Some(name) = field.strip_prefix("headers.") {
                    return response
                        .and_then(|r| {
                            r.headers
                                .iter()
                                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                                .map(|(_, v)| Value::String(v.clone()))
                        })
                        .unwrap_or(Value::Null);
                }
                let context = result.response_context();
                get_path(&context, &split_path(field))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
        }
    }

    fn check(field: &str, operator: &str, expected: &Value, result: &HttpResult) -> AssertionResult {
        let actual = Self::actual_value(field, result);

        let outcome: Result<bool, String> = match operator {
            "equals" => Ok(loosely_equal(&actual, expected)),
            "not_equals" => Ok(!loosely_equal(&actual, expected)),
            "contains" => Ok(contains(&actual, expected)),
            "exists" => Ok(!actual.is_null() == expected.is_truthy()),
            "greater_than" | "less_than" => {
                match (actual.to_number_lenient(), expected.to_number_lenient()) {
                    (Some(a), Some(e)) if operator == "greater_than" => Ok(a > e),
                    (Some(a), Some(e)) => Ok(a < e),
                    _ => Err(format!(
                        "cannot compare {} with {}",
                        actual.type_name(),
                        expected.type_name()
                    )),
                }
            }
            "regex" => Regex::new(&expected.as_display_string())
                .map(|re| re.is_match(&actual.as_display_string()))
                .map_err(|e| format!("invalid regex: {}", e)),
            "type" => Ok(type_matches(&actual, &expected.as_display_string())),
            "length" => match (length_of(&actual), expected.to_number_lenient()) {
                (Some(len), Some(e)) => Ok(len as f64 == e),
                _ => Err(format!("{} has no length", actual.type_name())),
            },
            other => Err(format!("unknown operator '{}'", other)),
        };

        let (passed, message) = match outcome {
            Ok(true) => (true, None),
            Ok(false) => (
                false,
                Some(format!(
                    "expected {} {} {}, got {}",
                    field, operator, expected, actual
                )),
            ),
            Err(message) => (false, Some(message)),
        };

        AssertionResult {
            field: field.to_string(),
            operator: operator.to_string(),
            expected: expected.clone(),
            actual,
            passed,
            message,
        }
    }

    fn check_field(field: &str, spec: &Value, result: &HttpResult, out: &mut Vec<AssertionResult>) {
        match spec {
            Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| OPERATORS.contains(&k.as_str())) => {
                for (operator, expected) in ops {
                    out.push(Self::check(field, operator, expected, result));
                }
            }
            expected => out.push(Self::check(field, "equals", expected, result)),
        }
    }
}

impl AssertionEvaluator for DefaultAssertionEvaluator {
    fn validate_assertions(&self, spec: &Value, result: &HttpResult) -> Vec<AssertionResult> {
        let mut results = Vec::new();
        let blocks: Vec<&Value> = match spec {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        for block in blocks {
            if let Value::Object(fields) = block {
                for (field, expected) in fields {
                    Self::check_field(field, expected, result, &mut results);
                }
            }
        }
        results
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        Value::Object(map) => map.contains_key(&expected.as_display_string()),
        Value::Null => false,
        other => other
            .as_display_string()
            .contains(&expected.as_display_string()),
    }
}

fn type_matches(actual: &Value, expected: &str) -> bool {
    match expected.to_lowercase().as_str() {
        "integer" | "int" => actual.as_i64().is_some() || actual.as_u64().is_some(),
        "bool" => actual.is_boolean(),
        "list" => actual.is_array(),
        "dict" | "map" => actual.is_object(),
        "str" => actual.is_string(),
        other => actual.type_name() == other,
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::String(s) => Some(s.chars().count()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RequestDetails, ResponseDetails};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn response(status_code: u16, body: Value) -> HttpResult {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json; charset=utf-8".to_string());
        HttpResult::success(
            RequestDetails::default(),
            ResponseDetails {
                status_code,
                headers,
                body,
                size_bytes: 0,
            },
            42,
        )
    }

    fn evaluate(spec: Value, result: &HttpResult) -> Vec<AssertionResult> {
        DefaultAssertionEvaluator::new().validate_assertions(&spec, result)
    }

    #[test]
    fn test_bare_values_mean_equals() {
        let result = response(200, json!({"id": 7}));
        let results = evaluate(json!({"status_code": 200, "body.id": "7"}), &result);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passed && r.operator == "equals"));
    }

    #[test]
    fn test_operators() {
        let result = response(201, json!({"items": [1, 2, 3], "name": "flowtest", "token": "abc123"}));
        let results = evaluate(
            json!({
                "status_code": {"greater_than": 199, "less_than": 300, "not_equals": 200},
                "headers.content-type": {"contains": "json"},
                "body.items": {"length": 3, "contains": 2, "type": "array"},
                "body.token": {"regex": "^[a-z]+\\d+$", "exists": true},
                "body.missing": {"exists": false},
                "response_time_ms": {"less_than": 1000},
            }),
            &result,
        );
        for r in &results {
            assert!(r.passed, "{} {} failed: {:?}", r.field, r.operator, r.message);
        }
        assert_eq!(results.len(), 11);
    }

    #[test]
    fn test_failures_carry_messages() {
        let result = response(404, json!({}));
        let results = evaluate(json!([{"status_code": 200}, {"body.id": {"exists": true}}]), &result);
        assert_eq!(results.len(), 2);
        assert!(!results[0].passed);
        assert_eq!(results[0].actual, json!(404));
        assert!(results[0].message.as_ref().unwrap().contains("status_code"));
        assert!(!results[1].passed);
    }

    #[test]
    fn test_object_value_compared_structurally() {
        let result = response(200, json!({"user": {"id": 1, "name": "ada"}}));
        let results = evaluate(json!({"body.user": {"id": 1, "name": "ada"}}), &result);
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }

    #[test]
    fn test_invalid_regex_fails() {
        let result = response(200, json!({"name": "x"}));
        let results = evaluate(json!({"body.name": {"regex": "("}}), &result);
        assert!(!results[0].passed);
        assert!(results[0].message.as_ref().unwrap().contains("invalid regex"));
    }
}

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::compliance::domain::RuleOperator;

/// Walk a dot-delimited path through the payload. Missing keys yield `None`.
pub(crate) fn field_value<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// Canonical text of a field: absent/null is empty, objects are their JSON text.
pub(crate) fn canonical_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Number(number)) => number.to_string(),
        Some(other) => other.to_string(),
    }
}

fn field_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(text)) => parse_number(text),
        _ => f64::NAN,
    }
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().any(|byte| byte.is_ascii_digit()) {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

fn list_contains(list: &str, candidate: &str) -> bool {
    list.split(',').map(str::trim).any(|item| item == candidate)
}

/// True when the field value violates the rule. NaN comparisons never fire.
pub(crate) fn violates(operator: RuleOperator, value: Option<&Value>, expected: &str) -> bool {
    let text = canonical_string(value);

    match operator {
        RuleOperator::Equals => text == expected,
        RuleOperator::NotEquals => text != expected,
        RuleOperator::GreaterThan => field_number(value) > parse_number(expected),
        RuleOperator::LessThan => field_number(value) < parse_number(expected),
        RuleOperator::GreaterThanOrEquals => field_number(value) >= parse_number(expected),
        RuleOperator::LessThanOrEquals => field_number(value) <= parse_number(expected),
        RuleOperator::Contains => text.contains(expected),
        RuleOperator::NotContains => !text.contains(expected),
        RuleOperator::In => list_contains(expected, &text),
        RuleOperator::NotIn => !list_contains(expected, &text),
        RuleOperator::Regex => match Regex::new(expected) {
            Ok(pattern) => pattern.is_match(&text),
            Err(err) => {
                warn!(pattern = expected, error = %err, "skipping rule with malformed regex");
                false
            }
        },
        RuleOperator::Required => matches!(value, None | Some(Value::Null)) || text.trim().is_empty(),
    }
}

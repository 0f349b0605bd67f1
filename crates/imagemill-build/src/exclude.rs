use imagemill_core::Exclusion;
use serde_yaml::Value;

use crate::config_set::ConfigSet;
use crate::template::value_text;

/// Whether any exclusion condition fully matches the config set.
///
/// Conditions are OR'd; keys within one condition are AND'd. A key the
/// config set does not define never matches.
pub fn is_excluded(set: &ConfigSet, excludes: &[Exclusion]) -> bool {
    excludes.iter().any(|condition| {
        condition.iter().all(|(key, expected)| {
            set.lookup(key)
                .is_some_and(|actual| values_match(&actual, expected))
        })
    })
}

/// Scalars compare by their rendered text, so `8` matches `"8"`.
fn values_match(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    is_scalar(actual) && is_scalar(expected) && value_text(actual) == value_text(expected)
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

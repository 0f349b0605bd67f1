use std::collections::BTreeMap;

use imagemill_core::Axis;
use serde_yaml::{Mapping, Value};

/// One concrete assignment of every axis to a single value.
pub type Combination = BTreeMap<String, Value>;

/// Expand variable axes into every combination of their values.
///
/// The number of combinations is the product of each axis's cardinality.
/// No axes yield a single empty combination; an axis declared as an empty
/// list yields none at all.
pub fn expand(variables: &BTreeMap<String, Axis>) -> Vec<Combination> {
    let axes: Vec<(&String, &Axis)> = variables.iter().collect();
    let mut combinations = Vec::with_capacity(cardinality(variables));
    let mut current = Combination::new();
    backtrack(&axes, &mut current, &mut combinations);
    tracing::trace!(count = combinations.len(), "expanded variable matrix");
    combinations
}

/// Expected number of combinations, without expanding.
pub fn cardinality(variables: &BTreeMap<String, Axis>) -> usize {
    variables.values().map(Axis::cardinality).product()
}

fn backtrack(axes: &[(&String, &Axis)], current: &mut Combination, out: &mut Vec<Combination>) {
    let Some(((name, axis), rest)) = axes.split_first() else {
        out.push(current.clone());
        return;
    };

    match axis {
        Axis::List(values) => {
            for value in values {
                current.insert((*name).clone(), value.clone());
                backtrack(rest, current, out);
            }
        }
        Axis::Alternatives(entries) => {
            for (key, value) in entries {
                let mut branch = Mapping::new();
                branch.insert(key.clone(), value.clone());
                current.insert((*name).clone(), Value::Mapping(branch));
                backtrack(rest, current, out);
            }
        }
        Axis::Scalar(value) => {
            current.insert((*name).clone(), value.clone());
            backtrack(rest, current, out);
        }
    }
    current.remove(*name);
}

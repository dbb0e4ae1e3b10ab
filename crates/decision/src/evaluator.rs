//! Matches transition conditions against the properties of a trigger event.

use thunder_core::snapshot::{Context, ContextValue};
use thunder_core::types::{ComparisonType, FilterOperator, Filters, PropertyFilter, StateTransitionCondition};

/// Picks the first condition whose filters match `properties`. A condition
/// without filters always matches.
pub fn select_transition<'r>(
    conditions: &'r [StateTransitionCondition],
    properties: &Context,
) -> Option<&'r StateTransitionCondition> {
    conditions.iter().find(|condition| match &condition.filters {
        Some(filters) => filters_match(filters, properties),
        None => true,
    })
}

pub fn filters_match(filters: &Filters, properties: &Context) -> bool {
    if filters.filter.is_empty() {
        return true;
    }
    match filters.operator {
        FilterOperator::And => filters.filter.iter().all(|f| filter_matches(f, properties)),
        FilterOperator::Or => filters.filter.iter().any(|f| filter_matches(f, properties)),
    }
}

/// A filter over a missing property only matches `NOT_EQUALS`.
fn filter_matches(filter: &PropertyFilter, properties: &Context) -> bool {
    let Some(actual) = properties.get(&filter.property_name) else {
        return filter.comparison_type == ComparisonType::NotEquals;
    };
    let expected = &filter.comparison_value;

    match filter.comparison_type {
        ComparisonType::Equals => values_equal(actual, expected),
        ComparisonType::NotEquals => !values_equal(actual, expected),
        ComparisonType::GreaterThan => compare(actual, expected, |a, b| a > b),
        ComparisonType::GreaterThanEquals => compare(actual, expected, |a, b| a >= b),
        ComparisonType::LessThan => compare(actual, expected, |a, b| a < b),
        ComparisonType::LessThanEquals => compare(actual, expected, |a, b| a <= b),
        ComparisonType::Contains => match (actual, expected.as_key()) {
            (ContextValue::String(haystack), Some(needle)) => haystack.contains(&needle),
            (ContextValue::Map(map), Some(key)) => map.contains_key(&key),
            _ => false,
        },
    }
}

/// Numbers compare numerically across int/float; everything else by value.
fn values_equal(actual: &ContextValue, expected: &ContextValue) -> bool {
    match (actual, expected) {
        (ContextValue::Int(_) | ContextValue::Float(_), ContextValue::Int(_) | ContextValue::Float(_)) => {
            actual.as_f64() == expected.as_f64()
        }
        _ => actual == expected,
    }
}

fn compare(actual: &ContextValue, expected: &ContextValue, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

use crate::common::value::Value;
use crate::filter::FilterOp;
use std::cmp::Ordering;

/// Equality with in-list semantics: the actual value equals the operand, or
/// the actual value is an array containing an element equal to the operand.
/// A missing value matches only a null operand.
fn eq_matches(actual: Option<&Value>, operand: &Value) -> bool {
    match actual {
        None => operand.is_null(),
        Some(value) => {
            if value == operand {
                return true;
            }
            match value {
                Value::Array(items) => items.iter().any(|item| item == operand),
                _ => false,
            }
        }
    }
}

/// Ordered comparison per the total order. Missing values never match, and
/// type mismatches resolve by the order rather than erroring.
fn cmp_matches(actual: Option<&Value>, operand: &Value, accept: fn(Ordering) -> bool) -> bool {
    match actual {
        None => false,
        Some(value) => accept(value.cmp(operand)),
    }
}

/// Evaluates one filter operator against the value found at the clause's
/// path (`None` when the path did not resolve).
pub(crate) fn op_matches(op: &FilterOp, actual: Option<&Value>) -> bool {
    match op {
        FilterOp::Eq(operand) => eq_matches(actual, operand),
        FilterOp::Ne(operand) => !eq_matches(actual, operand),
        FilterOp::Gt(operand) => cmp_matches(actual, operand, Ordering::is_gt),
        FilterOp::Gte(operand) => cmp_matches(actual, operand, Ordering::is_ge),
        FilterOp::Lt(operand) => cmp_matches(actual, operand, Ordering::is_lt),
        FilterOp::Lte(operand) => cmp_matches(actual, operand, Ordering::is_le),
        FilterOp::In(operands) => operands.iter().any(|operand| eq_matches(actual, operand)),
        FilterOp::Nin(operands) => !operands.iter().any(|operand| eq_matches(actual, operand)),
    }
}

//! Evaluation of parsed predicate expressions against workload attributes

use super::parser::{Ast, CmpOp, Expr, Operand};
use crate::models::{AttributeValue, WorkloadAttributes};
use std::cmp::Ordering;

static ABSENT: AttributeValue = AttributeValue::Absent;

fn resolve<'a>(operand: &'a Operand, attrs: &'a WorkloadAttributes) -> &'a AttributeValue {
    match operand {
        Operand::Attribute(name) => attrs.get(name).unwrap_or(&ABSENT),
        Operand::Literal(value) => value,
    }
}

/// Same-typed equality; values of different types are never equal
fn values_equal(a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::String(x), AttributeValue::String(y)) => x == y,
        (AttributeValue::Number(x), AttributeValue::Number(y)) => x == y,
        (AttributeValue::Bool(x), AttributeValue::Bool(y)) => x == y,
        (AttributeValue::Absent, AttributeValue::Absent) => true,
        _ => false,
    }
}

fn ordering(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::Number(x), AttributeValue::Number(y)) => x.partial_cmp(y),
        (AttributeValue::String(x), AttributeValue::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare(a: &AttributeValue, op: CmpOp, b: &AttributeValue) -> bool {
    match op {
        CmpOp::Eq => values_equal(a, b),
        CmpOp::Ne => !values_equal(a, b),
        CmpOp::Lt => ordering(a, b) == Some(Ordering::Less),
        CmpOp::Le => matches!(ordering(a, b), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => ordering(a, b) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(ordering(a, b), Some(Ordering::Greater | Ordering::Equal)),
    }
}

pub(super) fn eval_expr(expr: &Expr, attrs: &WorkloadAttributes) -> bool {
    match expr {
        Expr::Compare { lhs, op, rhs } => compare(resolve(lhs, attrs), *op, resolve(rhs, attrs)),
        Expr::In { operand, values } => {
            let value = resolve(operand, attrs);
            values.iter().any(|candidate| values_equal(value, candidate))
        }
        Expr::Exists(name) => attrs.get(name).is_some_and(|v| !v.is_absent()),
        Expr::Truthy(operand) => matches!(resolve(operand, attrs), AttributeValue::Bool(true)),
        Expr::And(left, right) => eval_expr(left, attrs) && eval_expr(right, attrs),
        Expr::Or(left, right) => eval_expr(left, attrs) || eval_expr(right, attrs),
        Expr::Not(inner) => !eval_expr(inner, attrs),
    }
}

/// Evaluate the score clause; non-numeric values yield no score
pub(super) fn eval_score(ast: &Ast, attrs: &WorkloadAttributes) -> Option<f64> {
    ast.score
        .as_ref()
        .and_then(|operand| resolve(operand, attrs).as_number())
        .filter(|score| score.is_finite())
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn attrs(pairs: &[(&str, AttributeValue)]) -> WorkloadAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval(expression: &str, attributes: &WorkloadAttributes) -> bool {
        eval_expr(&parse(expression).unwrap().condition, attributes)
    }

    #[test]
    fn test_unknown_attribute_is_absent() {
        let empty = WorkloadAttributes::new();
        assert!(eval("region == absent", &empty));
        assert!(eval("!exists(region)", &empty));
        assert!(!eval("region == \"us-east\"", &empty));
        assert!(eval("region != \"us-east\"", &empty));
    }

    #[test]
    fn test_mixed_types_never_equal() {
        let a = attrs(&[("replicas", AttributeValue::from("3"))]);
        assert!(!eval("replicas == 3", &a));
        assert!(!eval("replicas > 2", &a));
        assert!(eval("replicas == \"3\"", &a));
    }

    #[test]
    fn test_ordering_on_numbers_and_strings() {
        let a = attrs(&[
            ("cpu", AttributeValue::Number(4.0)),
            ("zone", AttributeValue::from("b")),
        ]);
        assert!(eval("cpu >= 4 and cpu <= 4 and cpu > 3.5 and cpu < 8", &a));
        assert!(eval("zone > \"a\" and zone < \"c\"", &a));
        assert!(!eval("zone > 1", &a));
    }

    #[test]
    fn test_truthy_requires_boolean_true() {
        let a = attrs(&[
            ("gpu", AttributeValue::Bool(true)),
            ("spot", AttributeValue::Bool(false)),
            ("name", AttributeValue::from("true")),
        ]);
        assert!(eval("gpu", &a));
        assert!(!eval("spot", &a));
        assert!(!eval("name", &a));
        assert!(eval("gpu and not spot", &a));
    }

    #[test]
    fn test_in_list_membership() {
        let a = attrs(&[("tier", AttributeValue::from("silver"))]);
        assert!(eval("tier in [\"gold\", \"silver\"]", &a));
        assert!(!eval("tier in [\"gold\"]", &a));
    }

    #[test]
    fn test_score_from_literal_and_attribute() {
        let a = attrs(&[
            ("priority", AttributeValue::Number(7.0)),
            ("label", AttributeValue::from("x")),
        ]);

        let literal = parse("true score 2.5").unwrap();
        assert_eq!(eval_score(&literal, &a), Some(2.5));

        let attribute = parse("true score priority").unwrap();
        assert_eq!(eval_score(&attribute, &a), Some(7.0));

        let non_numeric = parse("true score label").unwrap();
        assert_eq!(eval_score(&non_numeric, &a), None);
    }
}

//! Operator semantics shared by the tree walker and compiled rules.
//!
//! Both evaluation paths call into these helpers so a compiled rule can
//! never disagree with the interpreter on a value or on a fault.

use std::cmp::Ordering;

use super::error::{EvalError, EvalResult};
use crate::lang::{BinaryOp, UnaryOp, Value, ValueType};

/// Read a value as a condition outcome.
pub fn truthy(value: &Value) -> EvalResult<bool> {
    match value {
        Value::Boolean(flag) => Ok(*flag),
        other => Err(EvalError::type_mismatch(ValueType::Boolean, other)),
    }
}

/// Equality with integer/float promotion.
pub fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Long(a), Value::Double(b)) => (*a as f64) == *b,
        (Value::Double(a), Value::Long(b)) => *a == (*b as f64),
        _ => left == right,
    }
}

/// Ordering of two values; `Ok(None)` when either side is null.
pub fn compare(left: &Value, right: &Value) -> EvalResult<Option<Ordering>> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(None),
        (Value::Long(a), Value::Long(b)) => Ok(Some(a.cmp(b))),
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            (None, _) => Err(EvalError::type_mismatch(ValueType::Double, a)),
            (_, None) => Err(EvalError::type_mismatch(ValueType::Double, b)),
        },
    }
}

/// Apply a comparison operator (`==` through `>=`).
pub fn comparison(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let outcome = match op {
        BinaryOp::Eq => equals(left, right),
        BinaryOp::Ne => !equals(left, right),
        _ => match compare(left, right)? {
            None => false,
            Some(ordering) => match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Ge => ordering != Ordering::Less,
                _ => false,
            },
        },
    };
    Ok(Value::Boolean(outcome))
}

/// Apply an arithmetic operator.
pub fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let symbol = op.symbol();
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Err(EvalError::NullOperand {
            operator: symbol.to_string(),
        }),
        (Value::Long(a), Value::Long(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
                _ => None,
            };
            result.map(Value::Long).ok_or_else(|| EvalError::Overflow {
                operator: symbol.to_string(),
            })
        }
        (Value::String(a), Value::String(b)) if op == BinaryOp::Add => {
            Ok(Value::String(format!("{}{}", a, b)))
        }
        (a, b) => {
            let x = a
                .as_f64()
                .ok_or_else(|| EvalError::type_mismatch(ValueType::Double, a))?;
            let y = b
                .as_f64()
                .ok_or_else(|| EvalError::type_mismatch(ValueType::Double, b))?;
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && y == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Rem => x % y,
                _ => f64::NAN,
            };
            Ok(Value::Double(result))
        }
    }
}

/// Apply a prefix operator.
pub fn unary(op: UnaryOp, operand: &Value) -> EvalResult<Value> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Boolean(!truthy(value)?)),
        (_, Value::Null) => Err(EvalError::NullOperand {
            operator: if op == UnaryOp::Negate { "-" } else { "+" }.to_string(),
        }),
        (UnaryOp::Negate, Value::Long(num)) => {
            num.checked_neg()
                .map(Value::Long)
                .ok_or_else(|| EvalError::Overflow {
                    operator: "-".to_string(),
                })
        }
        (UnaryOp::Negate, Value::Double(num)) => Ok(Value::Double(-num)),
        (UnaryOp::Plus, value @ (Value::Long(_) | Value::Double(_))) => Ok(value.clone()),
        (_, other) => Err(EvalError::type_mismatch(ValueType::Double, other)),
    }
}

/// Dispatch any non short-circuit binary operator.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    if op.is_comparison() {
        comparison(op, left, right)
    } else if op.is_arithmetic() {
        arithmetic(op, left, right)
    } else {
        // and/or reach here only with both sides already evaluated
        let (a, b) = (truthy(left)?, truthy(right)?);
        Ok(Value::Boolean(if op == BinaryOp::And { a && b } else { a || b }))
    }
}

/// `object.field` on a map; null objects propagate null.
pub fn field_access(object: &Value, field: &str) -> EvalResult<Value> {
    match object {
        Value::Map(entries) => Ok(entries.get(field).cloned().unwrap_or_default()),
        Value::Null => Ok(Value::Null),
        other => Err(EvalError::type_mismatch(ValueType::Map, other)),
    }
}

/// `object[index]` on a list or map.
pub fn index(object: &Value, index: &Value) -> EvalResult<Value> {
    match (object, index) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::List(items), Value::Long(idx)) => usize::try_from(*idx)
            .ok()
            .and_then(|pos| items.get(pos))
            .cloned()
            .ok_or(EvalError::IndexOutOfBounds {
                index: *idx,
                len: items.len(),
            }),
        (Value::List(_), other) => Err(EvalError::type_mismatch(ValueType::Long, other)),
        (Value::Map(entries), Value::String(key)) => {
            Ok(entries.get(key).cloned().unwrap_or_default())
        }
        (Value::Map(_), other) => Err(EvalError::type_mismatch(ValueType::String, other)),
        (other, _) => Err(EvalError::type_mismatch(ValueType::List, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_is_checked() {
        assert_eq!(
            arithmetic(BinaryOp::Add, &Value::Long(i64::MAX), &Value::Long(1)),
            Err(EvalError::Overflow {
                operator: "+".into()
            })
        );
        assert_eq!(
            arithmetic(BinaryOp::Rem, &Value::Long(3), &Value::Long(0)),
            Err(EvalError::DivisionByZero)
        );
        assert_eq!(
            arithmetic(BinaryOp::Div, &Value::Long(7), &Value::Long(2)),
            Ok(Value::Long(3))
        );
    }

    #[test]
    fn mixed_numbers_promote() {
        assert_eq!(
            arithmetic(BinaryOp::Mul, &Value::Long(2), &Value::Double(1.5)),
            Ok(Value::Double(3.0))
        );
        assert!(equals(&Value::Long(2), &Value::Double(2.0)));
    }

    #[test]
    fn null_comparisons_are_false_and_arithmetic_faults() {
        assert_eq!(
            comparison(BinaryOp::Lt, &Value::Null, &Value::Long(1)),
            Ok(Value::Boolean(false))
        );
        assert_eq!(
            comparison(BinaryOp::Ne, &Value::Null, &Value::Long(1)),
            Ok(Value::Boolean(true))
        );
        assert!(matches!(
            arithmetic(BinaryOp::Sub, &Value::Null, &Value::Long(1)),
            Err(EvalError::NullOperand { .. })
        ));
    }

    #[test]
    fn indexing() {
        let list = Value::List(vec![Value::Long(1), Value::Long(2)]);
        assert_eq!(index(&list, &Value::Long(1)), Ok(Value::Long(2)));
        assert_eq!(
            index(&list, &Value::Long(-1)),
            Err(EvalError::IndexOutOfBounds { index: -1, len: 2 })
        );
        assert_eq!(field_access(&Value::Null, "x"), Ok(Value::Null));
    }
}

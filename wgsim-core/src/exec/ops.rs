//! Operator semantics over runtime values.
//!
//! Scalars of mixed kinds promote float over `u32` over `i32`, so abstract
//! literals combine with typed operands. Vectors operate componentwise and
//! broadcast scalars; matrices support the linear-algebra products.

use crate::ast::{BinaryOp, UnaryOp};
use crate::bail_mismatch;
use crate::error::{ExecError, ExecResult};
use crate::exec::value::Value;
use std::cmp::Ordering;

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> ExecResult<Value> {
    match (left, right) {
        (Value::Matrix(_), _) | (_, Value::Matrix(_)) => matrix_binary(op, left, right),
        (Value::Vector(l), Value::Vector(r)) => {
            if l.len() != r.len() {
                return Err(ExecError::VectorLength {
                    left: l.len(),
                    right: r.len(),
                    line: 0,
                });
            }
            let items = l
                .iter()
                .zip(r)
                .map(|(a, b)| scalar_binary(op, a, b))
                .collect::<ExecResult<_>>()?;
            Ok(Value::Vector(items))
        }
        (Value::Vector(l), scalar) => Ok(Value::Vector(
            l.iter().map(|a| scalar_binary(op, a, scalar)).collect::<ExecResult<_>>()?,
        )),
        (scalar, Value::Vector(r)) => Ok(Value::Vector(
            r.iter().map(|b| scalar_binary(op, scalar, b)).collect::<ExecResult<_>>()?,
        )),
        _ => scalar_binary(op, left, right),
    }
}

#[derive(Clone, Copy)]
enum Promoted {
    Bool(bool, bool),
    I32(i32, i32),
    U32(u32, u32),
    F32(f32, f32),
}

fn promote(left: &Value, right: &Value) -> ExecResult<Promoted> {
    Ok(match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Promoted::Bool(*a, *b),
        (Value::F32(_), _) | (_, Value::F32(_)) => Promoted::F32(left.as_f32()?, right.as_f32()?),
        (Value::U32(_), _) | (_, Value::U32(_)) => Promoted::U32(left.as_u32()?, right.as_u32()?),
        (Value::I32(_), _) | (_, Value::I32(_)) => Promoted::I32(left.as_i32()?, right.as_i32()?),
        _ => bail_mismatch!(
            "operands {} and {} are not scalars",
            left.type_name(),
            right.type_name()
        ),
    })
}

fn scalar_binary(op: BinaryOp, left: &Value, right: &Value) -> ExecResult<Value> {
    use BinaryOp::*;

    // Shift amounts are always unsigned and never promote the shifted value.
    if matches!(op, ShiftLeft | ShiftRight) {
        let amount = right.as_u32()? & 31;
        return Ok(match (left, op) {
            (Value::I32(v), ShiftLeft) => Value::I32(v.wrapping_shl(amount)),
            (Value::I32(v), _) => Value::I32(v.wrapping_shr(amount)),
            (Value::U32(v), ShiftLeft) => Value::U32(v.wrapping_shl(amount)),
            (Value::U32(v), _) => Value::U32(v.wrapping_shr(amount)),
            (other, _) => bail_mismatch!("cannot shift {}", other.type_name()),
        });
    }

    let result = match promote(left, right)? {
        Promoted::Bool(a, b) => match op {
            Equal => Value::Bool(a == b),
            NotEqual => Value::Bool(a != b),
            LogicalAnd | BitAnd => Value::Bool(a & b),
            LogicalOr | BitOr => Value::Bool(a | b),
            BitXor => Value::Bool(a ^ b),
            _ => bail_mismatch!("operator '{}' does not apply to bool", op.symbol()),
        },
        Promoted::I32(a, b) => match op {
            Add => Value::I32(a.wrapping_add(b)),
            Subtract => Value::I32(a.wrapping_sub(b)),
            Multiply => Value::I32(a.wrapping_mul(b)),
            // Integer division by zero yields the dividend, remainder zero.
            Divide => Value::I32(if b == 0 { a } else { a.wrapping_div(b) }),
            Modulo => Value::I32(if b == 0 { 0 } else { a.wrapping_rem(b) }),
            BitAnd => Value::I32(a & b),
            BitOr => Value::I32(a | b),
            BitXor => Value::I32(a ^ b),
            _ => compare(op, a.partial_cmp(&b))?,
        },
        Promoted::U32(a, b) => match op {
            Add => Value::U32(a.wrapping_add(b)),
            Subtract => Value::U32(a.wrapping_sub(b)),
            Multiply => Value::U32(a.wrapping_mul(b)),
            Divide => Value::U32(if b == 0 { a } else { a / b }),
            Modulo => Value::U32(if b == 0 { 0 } else { a % b }),
            BitAnd => Value::U32(a & b),
            BitOr => Value::U32(a | b),
            BitXor => Value::U32(a ^ b),
            _ => compare(op, a.partial_cmp(&b))?,
        },
        Promoted::F32(a, b) => match op {
            Add => Value::F32(a + b),
            Subtract => Value::F32(a - b),
            Multiply => Value::F32(a * b),
            Divide => Value::F32(a / b),
            Modulo => Value::F32(a % b),
            BitAnd | BitOr | BitXor => bail_mismatch!("operator '{}' does not apply to f32", op.symbol()),
            _ => compare(op, a.partial_cmp(&b))?,
        },
    };
    Ok(result)
}

fn compare(op: BinaryOp, ordering: Option<Ordering>) -> ExecResult<Value> {
    let result = match (op, ordering) {
        (BinaryOp::LogicalAnd | BinaryOp::LogicalOr, _) => {
            bail_mismatch!("operator '{}' needs bool operands", op.symbol())
        }
        (_, None) => op == BinaryOp::NotEqual,
        (BinaryOp::Equal, Some(o)) => o == Ordering::Equal,
        (BinaryOp::NotEqual, Some(o)) => o != Ordering::Equal,
        (BinaryOp::Less, Some(o)) => o == Ordering::Less,
        (BinaryOp::LessEqual, Some(o)) => o != Ordering::Greater,
        (BinaryOp::Greater, Some(o)) => o == Ordering::Greater,
        (BinaryOp::GreaterEqual, Some(o)) => o != Ordering::Less,
        _ => bail_mismatch!("unsupported operator '{}'", op.symbol()),
    };
    Ok(Value::Bool(result))
}

fn matrix_binary(op: BinaryOp, left: &Value, right: &Value) -> ExecResult<Value> {
    match (op, left, right) {
        (BinaryOp::Multiply, Value::Matrix(m), Value::Vector(v)) => {
            let v = floats(v)?;
            if v.len() != m.len() {
                return Err(ExecError::VectorLength {
                    left: m.len(),
                    right: v.len(),
                    line: 0,
                });
            }
            let rows = m.first().map_or(0, Vec::len);
            let out = (0..rows)
                .map(|r| Value::F32(m.iter().zip(&v).map(|(col, x)| col[r] * x).sum()))
                .collect();
            Ok(Value::Vector(out))
        }
        (BinaryOp::Multiply, Value::Vector(v), Value::Matrix(m)) => {
            let v = floats(v)?;
            let out = m
                .iter()
                .map(|col| {
                    if col.len() != v.len() {
                        return Err(ExecError::VectorLength {
                            left: v.len(),
                            right: col.len(),
                            line: 0,
                        });
                    }
                    Ok(Value::F32(col.iter().zip(&v).map(|(a, b)| a * b).sum()))
                })
                .collect::<ExecResult<_>>()?;
            Ok(Value::Vector(out))
        }
        (BinaryOp::Multiply, Value::Matrix(a), Value::Matrix(b)) => {
            let rows = a.first().map_or(0, Vec::len);
            if a.len() != b.first().map_or(0, Vec::len) {
                bail_mismatch!("matrix shapes do not compose");
            }
            let cols = b
                .iter()
                .map(|bcol| {
                    (0..rows)
                        .map(|r| a.iter().zip(bcol).map(|(acol, x)| acol[r] * x).sum())
                        .collect()
                })
                .collect();
            Ok(Value::Matrix(cols))
        }
        (BinaryOp::Add | BinaryOp::Subtract, Value::Matrix(a), Value::Matrix(b)) => {
            if a.len() != b.len() {
                bail_mismatch!("matrix shapes differ");
            }
            let sign = if op == BinaryOp::Add { 1.0 } else { -1.0 };
            let cols = a
                .iter()
                .zip(b)
                .map(|(x, y)| x.iter().zip(y).map(|(p, q)| p + sign * q).collect())
                .collect();
            Ok(Value::Matrix(cols))
        }
        (BinaryOp::Multiply, Value::Matrix(m), s) | (BinaryOp::Multiply, s, Value::Matrix(m)) if s.is_scalar() => {
            let s = s.as_f32()?;
            Ok(Value::Matrix(
                m.iter().map(|col| col.iter().map(|x| x * s).collect()).collect(),
            ))
        }
        (BinaryOp::Equal | BinaryOp::NotEqual, Value::Matrix(a), Value::Matrix(b)) => {
            Ok(Value::Bool((a == b) == (op == BinaryOp::Equal)))
        }
        _ => bail_mismatch!(
            "operator '{}' does not apply to {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ),
    }
}

fn floats(values: &[Value]) -> ExecResult<Vec<f32>> {
    values.iter().map(Value::as_f32).collect()
}

pub fn unary(op: UnaryOp, value: &Value) -> ExecResult<Value> {
    if let Value::Matrix(m) = value {
        if op == UnaryOp::Negate {
            return Ok(Value::Matrix(m.iter().map(|c| c.iter().map(|x| -x).collect()).collect()));
        }
    }
    value.map(|v| {
        Ok(match (op, v) {
            (UnaryOp::Negate, Value::I32(x)) => Value::I32(x.wrapping_neg()),
            (UnaryOp::Negate, Value::U32(x)) => Value::U32(x.wrapping_neg()),
            (UnaryOp::Negate, Value::F32(x)) => Value::F32(-x),
            (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
            (UnaryOp::Complement, Value::I32(x)) => Value::I32(!x),
            (UnaryOp::Complement, Value::U32(x)) => Value::U32(!x),
            (op, v) => bail_mismatch!("operator '{}' does not apply to {}", op.symbol(), v.type_name()),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fvec(values: &[f32]) -> Value {
        Value::Vector(values.iter().map(|v| Value::F32(*v)).collect())
    }

    #[test]
    fn test_mixed_scalar_promotion() {
        assert_eq!(binary(BinaryOp::Multiply, &Value::F32(1.5), &Value::I32(2)).unwrap(), Value::F32(3.0));
        assert_eq!(binary(BinaryOp::Add, &Value::U32(1), &Value::I32(2)).unwrap(), Value::U32(3));
        assert_eq!(binary(BinaryOp::Less, &Value::I32(-1), &Value::I32(2)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_integer_edge_cases() {
        assert_eq!(binary(BinaryOp::Divide, &Value::I32(7), &Value::I32(0)).unwrap(), Value::I32(7));
        assert_eq!(binary(BinaryOp::Modulo, &Value::U32(7), &Value::U32(0)).unwrap(), Value::U32(0));
        assert_eq!(
            binary(BinaryOp::Add, &Value::I32(i32::MAX), &Value::I32(1)).unwrap(),
            Value::I32(i32::MIN)
        );
        assert_eq!(binary(BinaryOp::ShiftLeft, &Value::U32(1), &Value::I32(33)).unwrap(), Value::U32(2));
        assert_eq!(binary(BinaryOp::BitXor, &Value::U32(6), &Value::U32(3)).unwrap(), Value::U32(5));
    }

    #[test]
    fn test_vector_broadcast_and_length_check() {
        assert_eq!(
            binary(BinaryOp::Multiply, &fvec(&[1.0, 2.0]), &Value::F32(3.0)).unwrap(),
            fvec(&[3.0, 6.0])
        );
        assert!(matches!(
            binary(BinaryOp::Add, &fvec(&[1.0, 2.0]), &fvec(&[1.0, 2.0, 3.0])),
            Err(ExecError::VectorLength { left: 2, right: 3, .. })
        ));
    }

    #[test]
    fn test_matrix_products() {
        // Columns (1,2) and (3,4): [[1,3],[2,4]] in row form.
        let m = Value::Matrix(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(binary(BinaryOp::Multiply, &m, &fvec(&[1.0, 1.0])).unwrap(), fvec(&[4.0, 6.0]));
        assert_eq!(binary(BinaryOp::Multiply, &fvec(&[1.0, 1.0]), &m).unwrap(), fvec(&[3.0, 7.0]));
        let identity = Value::Matrix(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(binary(BinaryOp::Multiply, &m, &identity).unwrap(), m);
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(UnaryOp::Negate, &fvec(&[1.0, -2.0])).unwrap(), fvec(&[-1.0, 2.0]));
        assert_eq!(unary(UnaryOp::Complement, &Value::U32(0)).unwrap(), Value::U32(u32::MAX));
        assert!(unary(UnaryOp::Not, &Value::F32(1.0)).is_err());
    }
}

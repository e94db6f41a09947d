//! Constant folding for WGSL const-expressions.
//!
//! Evaluates expressions built from literals, `const`/`override` names,
//! operators, scalar conversions and a few pure built-ins. Used for array
//! counts, attribute arguments (`@workgroup_size`, `@binding`, ...) and
//! `const_assert`. Anything it cannot evaluate folds to `None`; folding never
//! raises an error.

use crate::ast::{BinaryOp, ExprKind, Expression, Literal, TypeKind, UnaryOp};
use std::collections::HashMap;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ConstValue {
    pub fn as_f64(self) -> f64 {
        match self {
            ConstValue::Bool(b) => b as i64 as f64,
            ConstValue::Int(i) => i as f64,
            ConstValue::Float(f) => f,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            ConstValue::Bool(b) => b as i64,
            ConstValue::Int(i) => i,
            ConstValue::Float(f) => f as i64,
        }
    }

    pub fn as_u32(self) -> Option<u32> {
        u32::try_from(self.as_i64()).ok()
    }

    pub fn as_bool(self) -> bool {
        match self {
            ConstValue::Bool(b) => b,
            ConstValue::Int(i) => i != 0,
            ConstValue::Float(f) => f != 0.0,
        }
    }
}

/// Folds expressions against a table of named constant initializers.
pub struct ConstantFolder<'a> {
    constants: &'a HashMap<String, Expression>,
    depth: usize,
}

impl<'a> ConstantFolder<'a> {
    pub fn new(constants: &'a HashMap<String, Expression>) -> Self {
        ConstantFolder { constants, depth: 0 }
    }

    pub fn fold(&mut self, expr: &Expression) -> Option<ConstValue> {
        if self.depth > MAX_DEPTH {
            return None;
        }
        self.depth += 1;
        let result = self.fold_inner(expr);
        self.depth -= 1;
        result
    }

    pub fn fold_u32(&mut self, expr: &Expression) -> Option<u32> {
        self.fold(expr).and_then(ConstValue::as_u32)
    }

    fn fold_inner(&mut self, expr: &Expression) -> Option<ConstValue> {
        match &expr.kind {
            ExprKind::Literal(lit) => Some(fold_literal(*lit)),
            ExprKind::Variable(name) => {
                let value = self.constants.get(name)?;
                self.fold(value)
            }
            ExprKind::Group(inner) => self.fold(inner),
            ExprKind::Unary(op, operand) => {
                let value = self.fold(operand)?;
                fold_unary(*op, value)
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.fold(lhs)?;
                // Short-circuit forms only need the left side when it decides.
                match (op, lhs) {
                    (BinaryOp::LogicalAnd, ConstValue::Bool(false)) => return Some(ConstValue::Bool(false)),
                    (BinaryOp::LogicalOr, ConstValue::Bool(true)) => return Some(ConstValue::Bool(true)),
                    _ => {}
                }
                let rhs = self.fold(rhs)?;
                fold_binary(*op, lhs, rhs)
            }
            ExprKind::Construct { ty, args } if args.len() == 1 => {
                let TypeKind::Named(name) = &ty.kind else {
                    return None;
                };
                let value = self.fold(&args[0])?;
                convert(name, value)
            }
            ExprKind::Call { name, args } => {
                let values = args.iter().map(|a| self.fold(a)).collect::<Option<Vec<_>>>()?;
                fold_call(name, &values)
            }
            _ => None,
        }
    }
}

fn fold_literal(lit: Literal) -> ConstValue {
    match lit {
        Literal::Bool(b) => ConstValue::Bool(b),
        Literal::Int { value, .. } => ConstValue::Int(value),
        Literal::Float { value, .. } => ConstValue::Float(value),
    }
}

fn convert(name: &str, value: ConstValue) -> Option<ConstValue> {
    match name {
        "i32" => Some(ConstValue::Int(value.as_i64() as i32 as i64)),
        "u32" => Some(ConstValue::Int(value.as_i64() as u32 as i64)),
        "f32" | "f16" => Some(ConstValue::Float(value.as_f64())),
        "bool" => Some(ConstValue::Bool(value.as_bool())),
        _ => None,
    }
}

fn fold_unary(op: UnaryOp, value: ConstValue) -> Option<ConstValue> {
    match (op, value) {
        (UnaryOp::Negate, ConstValue::Int(i)) => Some(ConstValue::Int(-i)),
        (UnaryOp::Negate, ConstValue::Float(f)) => Some(ConstValue::Float(-f)),
        (UnaryOp::Not, ConstValue::Bool(b)) => Some(ConstValue::Bool(!b)),
        (UnaryOp::Complement, ConstValue::Int(i)) => Some(ConstValue::Int(!i)),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, lhs: ConstValue, rhs: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;

    if let (Bool(a), Bool(b)) = (lhs, rhs) {
        return match op {
            BinaryOp::LogicalAnd | BinaryOp::BitAnd => Some(Bool(a && b)),
            BinaryOp::LogicalOr | BinaryOp::BitOr => Some(Bool(a || b)),
            BinaryOp::Equal => Some(Bool(a == b)),
            BinaryOp::NotEqual | BinaryOp::BitXor => Some(Bool(a != b)),
            _ => None,
        };
    }

    if let (Int(a), Int(b)) = (lhs, rhs) {
        return match op {
            BinaryOp::Add => Some(Int(a.wrapping_add(b))),
            BinaryOp::Subtract => Some(Int(a.wrapping_sub(b))),
            BinaryOp::Multiply => Some(Int(a.wrapping_mul(b))),
            BinaryOp::Divide => a.checked_div(b).map(Int),
            BinaryOp::Modulo => a.checked_rem(b).map(Int),
            BinaryOp::BitAnd => Some(Int(a & b)),
            BinaryOp::BitOr => Some(Int(a | b)),
            BinaryOp::BitXor => Some(Int(a ^ b)),
            BinaryOp::ShiftLeft => Some(Int(a.checked_shl(b as u32)?)),
            BinaryOp::ShiftRight => Some(Int(a.checked_shr(b as u32)?)),
            BinaryOp::Equal => Some(Bool(a == b)),
            BinaryOp::NotEqual => Some(Bool(a != b)),
            BinaryOp::Less => Some(Bool(a < b)),
            BinaryOp::LessEqual => Some(Bool(a <= b)),
            BinaryOp::Greater => Some(Bool(a > b)),
            BinaryOp::GreaterEqual => Some(Bool(a >= b)),
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => None,
        };
    }

    if matches!(lhs, Bool(_)) || matches!(rhs, Bool(_)) {
        return None;
    }

    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    match op {
        BinaryOp::Add => Some(Float(a + b)),
        BinaryOp::Subtract => Some(Float(a - b)),
        BinaryOp::Multiply => Some(Float(a * b)),
        BinaryOp::Divide => Some(Float(a / b)),
        BinaryOp::Modulo => Some(Float(a % b)),
        BinaryOp::Equal => Some(Bool(a == b)),
        BinaryOp::NotEqual => Some(Bool(a != b)),
        BinaryOp::Less => Some(Bool(a < b)),
        BinaryOp::LessEqual => Some(Bool(a <= b)),
        BinaryOp::Greater => Some(Bool(a > b)),
        BinaryOp::GreaterEqual => Some(Bool(a >= b)),
        _ => None,
    }
}

fn fold_call(name: &str, args: &[ConstValue]) -> Option<ConstValue> {
    let all_int = args.iter().all(|a| matches!(a, ConstValue::Int(_)));
    match (name, args) {
        ("min", [a, b]) if all_int => Some(ConstValue::Int(a.as_i64().min(b.as_i64()))),
        ("max", [a, b]) if all_int => Some(ConstValue::Int(a.as_i64().max(b.as_i64()))),
        ("min", [a, b]) => Some(ConstValue::Float(a.as_f64().min(b.as_f64()))),
        ("max", [a, b]) => Some(ConstValue::Float(a.as_f64().max(b.as_f64()))),
        ("abs", [ConstValue::Int(a)]) => Some(ConstValue::Int(a.abs())),
        ("abs", [a]) => Some(ConstValue::Float(a.as_f64().abs())),
        ("clamp", [x, lo, hi]) if all_int => Some(ConstValue::Int(x.as_i64().clamp(lo.as_i64(), hi.as_i64()))),
        ("clamp", [x, lo, hi]) => Some(ConstValue::Float(x.as_f64().max(lo.as_f64()).min(hi.as_f64()))),
        ("select", [f, t, cond]) => Some(if cond.as_bool() { *t } else { *f }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn fold_src(constants: &[(&str, &str)], expr: &str) -> Option<ConstValue> {
        let mut table = HashMap::new();
        for (name, src) in constants {
            let mut parser = Parser::new(tokenize(src).unwrap());
            table.insert(name.to_string(), parser.parse_standalone_expression().unwrap());
        }
        let mut parser = Parser::new(tokenize(expr).unwrap());
        let expr = parser.parse_standalone_expression().unwrap();
        ConstantFolder::new(&table).fold(&expr)
    }

    #[test]
    fn test_fold_integer_arithmetic() {
        assert_eq!(fold_src(&[], "2 + 3 * 4"), Some(ConstValue::Int(14)));
        assert_eq!(fold_src(&[], "(2 + 3) * 4"), Some(ConstValue::Int(20)));
        assert_eq!(fold_src(&[], "1 << 4"), Some(ConstValue::Int(16)));
    }

    #[test]
    fn test_fold_through_constants() {
        let constants = [("N", "4"), ("M", "N * 2u")];
        assert_eq!(fold_src(&constants, "M + 1").and_then(ConstValue::as_u32), Some(9));
    }

    #[test]
    fn test_fold_float_and_comparison() {
        assert_eq!(fold_src(&[], "1.5 * 2.0"), Some(ConstValue::Float(3.0)));
        assert_eq!(fold_src(&[], "3 > 2"), Some(ConstValue::Bool(true)));
        assert_eq!(fold_src(&[], "!(1 == 1)"), Some(ConstValue::Bool(false)));
    }

    #[test]
    fn test_fold_conversions_and_builtins() {
        assert_eq!(fold_src(&[], "u32(3.7)"), Some(ConstValue::Int(3)));
        assert_eq!(fold_src(&[], "max(3, 8)"), Some(ConstValue::Int(8)));
        assert_eq!(fold_src(&[], "select(1, 2, true)"), Some(ConstValue::Int(2)));
    }

    #[test]
    fn test_unknown_names_do_not_fold() {
        assert_eq!(fold_src(&[], "UNKNOWN + 1"), None);
        assert_eq!(fold_src(&[], "1 / 0"), None);
    }

    #[test]
    fn test_self_reference_terminates() {
        assert_eq!(fold_src(&[("A", "A + 1")], "A"), None);
    }
}

// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compile-time evaluation of builtin operators.
//!
//! `fold` is pure: given operator inputs where unknown values appear as
//! variables, it returns the literal result when one is decidable and `None`
//! otherwise. Numeric semantics match the target runtime: i64 division and
//! modulo truncate toward zero, floats are IEEE-754 doubles, min/max/abs/pow
//! come from the host numeric library, and string concatenation is plain
//! left-to-right. Short-circuit and/or can decide with a single known
//! operand, in which case the other operand itself may be returned.

use log::debug;

use freshet_ir::{
    is_copy, is_short_circuitable, Arg, BuiltinOp, CompVal, Opcode, SubOp, Value,
};

use crate::congruent_set::CongruentSet;

/// Try to evaluate `op` over `inputs`. Unknown operator/arity combinations
/// fold to `None`, never an error.
pub fn fold(op: BuiltinOp, inputs: &[Arg]) -> Option<Arg> {
    if is_short_circuitable(op) {
        return fold_short_circuit(op, inputs);
    }
    if is_copy(op) {
        // A copy is no reduction.
        return None;
    }

    if !inputs.iter().all(|a| a.is_const()) {
        return None;
    }
    if inputs.iter().all(|a| a.is_imm_int()) {
        fold_int(op, inputs)
    } else if inputs.iter().all(|a| a.is_imm_float()) {
        fold_float(op, inputs)
    } else if inputs.iter().all(|a| a.is_imm_string()) {
        fold_string(op, inputs)
    } else if inputs.iter().all(|a| a.is_imm_bool()) {
        fold_bool(op, inputs)
    } else {
        fold_mixed(op, inputs)
    }
}

/// And/or over two operands where knowing one side may suffice. When the
/// known side does not decide, the unknown operand itself is the result
/// (`and(true, x) = x`), which may be a variable.
fn fold_short_circuit(op: BuiltinOp, inputs: &[Arg]) -> Option<Arg> {
    if inputs.len() != 2 {
        return None;
    }
    let consts: Vec<bool> = inputs
        .iter()
        .filter(|a| a.is_const())
        .map(|a| a.bool_lit())
        .collect();
    let unknown = inputs.iter().find(|a| !a.is_const());

    match (op, consts.as_slice()) {
        (BuiltinOp::And, [a, b]) => Some(Arg::Bool(*a && *b)),
        (BuiltinOp::Or, [a, b]) => Some(Arg::Bool(*a || *b)),
        (BuiltinOp::And, [false]) => Some(Arg::Bool(false)),
        (BuiltinOp::And, [true]) => unknown.cloned(),
        (BuiltinOp::Or, [true]) => Some(Arg::Bool(true)),
        (BuiltinOp::Or, [false]) => unknown.cloned(),
        _ => None,
    }
}

fn fold_int(op: BuiltinOp, inputs: &[Arg]) -> Option<Arg> {
    use BuiltinOp::*;
    if let [a] = inputs {
        let a = a.int_lit();
        return match op {
            CopyInt => Some(Arg::Int(a)),
            AbsInt => Some(Arg::Int(a.wrapping_abs())),
            NegateInt => Some(Arg::Int(0i64.wrapping_sub(a))),
            IntToFloat => Some(Arg::Float(a as f64)),
            IntToStr => Some(Arg::str_lit(&a.to_string())),
            _ => None,
        };
    }
    let [a, b] = inputs else { return None };
    let (a, b) = (a.int_lit(), b.int_lit());
    match op {
        PlusInt => Some(Arg::Int(a.wrapping_add(b))),
        MinusInt => Some(Arg::Int(a.wrapping_sub(b))),
        MultInt => Some(Arg::Int(a.wrapping_mul(b))),
        // Truncating toward zero, like the target runtime. Division by zero
        // is left for the runtime to report.
        DivInt => (b != 0).then(|| Arg::Int(a.wrapping_div(b))),
        ModInt => (b != 0).then(|| Arg::Int(a.wrapping_rem(b))),
        EqInt => Some(Arg::Bool(a == b)),
        NeqInt => Some(Arg::Bool(a != b)),
        GtInt => Some(Arg::Bool(a > b)),
        GteInt => Some(Arg::Bool(a >= b)),
        LtInt => Some(Arg::Bool(a < b)),
        LteInt => Some(Arg::Bool(a <= b)),
        MaxInt => Some(Arg::Int(a.max(b))),
        MinInt => Some(Arg::Int(a.min(b))),
        PowInt => Some(Arg::Float((a as f64).powf(b as f64))),
        _ => None,
    }
}

fn fold_float(op: BuiltinOp, inputs: &[Arg]) -> Option<Arg> {
    use BuiltinOp::*;
    if let [a] = inputs {
        let a = a.float_lit();
        return match op {
            CopyFloat => Some(Arg::Float(a)),
            AbsFloat => Some(Arg::Float(a.abs())),
            Exp => Some(Arg::Float(a.exp())),
            Log => Some(Arg::Float(a.ln())),
            Sqrt => Some(Arg::Float(a.sqrt())),
            Round => Some(Arg::Float(a.round_ties_even())),
            Ceil => Some(Arg::Float(a.ceil())),
            Floor => Some(Arg::Float(a.floor())),
            FloatToInt => Some(Arg::Int(a.floor() as i64)),
            FloatToStr => Some(Arg::str_lit(&a.to_string())),
            IsNan => Some(Arg::Bool(a.is_nan())),
            _ => None,
        };
    }
    let [a, b] = inputs else { return None };
    let (a, b) = (a.float_lit(), b.float_lit());
    match op {
        PlusFloat => Some(Arg::Float(a + b)),
        MinusFloat => Some(Arg::Float(a - b)),
        MultFloat => Some(Arg::Float(a * b)),
        EqFloat => Some(Arg::Bool(a == b)),
        NeqFloat => Some(Arg::Bool(a != b)),
        GtFloat => Some(Arg::Bool(a > b)),
        GteFloat => Some(Arg::Bool(a >= b)),
        LtFloat => Some(Arg::Bool(a < b)),
        LteFloat => Some(Arg::Bool(a <= b)),
        MaxFloat => Some(Arg::Float(a.max(b))),
        MinFloat => Some(Arg::Float(a.min(b))),
        PowFloat => Some(Arg::Float(a.powf(b))),
        _ => None,
    }
}

fn fold_string(op: BuiltinOp, inputs: &[Arg]) -> Option<Arg> {
    use BuiltinOp::*;
    if op == Strcat {
        // Strcat takes any number of arguments, concatenated left to right
        // with no normalization.
        let mut out = String::new();
        for a in inputs {
            out.push_str(a.str_lit_value());
        }
        return Some(Arg::str_lit(&out));
    }
    if let [a] = inputs {
        return match op {
            CopyString => Some(a.clone()),
            ParseFloat => a.str_lit_value().trim().parse::<f64>().ok().map(Arg::Float),
            _ => None,
        };
    }
    let [a, b] = inputs else { return None };
    match op {
        EqString => Some(Arg::Bool(a.str_lit_value() == b.str_lit_value())),
        NeqString => Some(Arg::Bool(a.str_lit_value() != b.str_lit_value())),
        _ => None,
    }
}

fn fold_bool(op: BuiltinOp, inputs: &[Arg]) -> Option<Arg> {
    match (op, inputs) {
        (BuiltinOp::Not, [a]) => Some(Arg::Bool(!a.bool_lit())),
        // And/or went through the short-circuit path.
        _ => None,
    }
}

fn fold_mixed(op: BuiltinOp, inputs: &[Arg]) -> Option<Arg> {
    use BuiltinOp::*;
    match (op, inputs) {
        (Substring, [s, start, len]) => {
            let s = s.str_lit_value();
            let start = usize::try_from(start.int_lit()).ok()?;
            let len = usize::try_from(len.int_lit()).ok()?;
            if start > s.len() {
                return None;
            }
            let end = (start + len).min(s.len());
            if !s.is_char_boundary(start) || !s.is_char_boundary(end) {
                return None;
            }
            Some(Arg::str_lit(&s[start..end]))
        }
        (ParseInt, [s, base]) => {
            let base = base.int_lit();
            if !(2..=36).contains(&base) {
                return None;
            }
            i64::from_str_radix(s.str_lit_value().trim(), base as u32)
                .ok()
                .map(Arg::Int)
        }
        _ => None,
    }
}

/// Fold a builtin-op computed value using congruence information: future
/// inputs are resolved to their statically-known stored constants first.
/// A successful fold of an async op yields the assign-shaped value that
/// stores the result; a local op folds to the result directly.
pub fn try_fold_cv(sets: &CongruentSet, cv: &CompVal) -> Option<Value> {
    let SubOp::Op(op) = cv.subop else { return None };
    let future_result = match cv.op {
        Opcode::LocalOp => false,
        Opcode::AsyncOp => true,
        _ => return None,
    };

    let mut inputs = Vec::with_capacity(cv.inputs.len());
    for input in &cv.inputs {
        let arg = input.as_arg()?;
        if future_result {
            // Replace futures with their known stored values where possible.
            inputs.push(sets.known_future_value(arg).unwrap_or_else(|| arg.clone()));
        } else {
            inputs.push(arg.clone());
        }
    }

    let result = fold(op, &inputs)?;
    debug!("constant fold: {} => {}", cv, result);
    if future_result && result.is_const() {
        let store = CompVal::assign(&result.future_type(), Value::Arg(result), false)?;
        Some(Value::Cv(store))
    } else {
        Some(Value::Arg(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshet_ir::{ScalarKind, Type, Var};

    #[test]
    fn int_arithmetic() {
        assert_eq!(
            fold(BuiltinOp::PlusInt, &[Arg::Int(3), Arg::Int(4)]),
            Some(Arg::Int(7))
        );
        // Division truncates toward zero.
        assert_eq!(
            fold(BuiltinOp::DivInt, &[Arg::Int(7), Arg::Int(2)]),
            Some(Arg::Int(3))
        );
        assert_eq!(
            fold(BuiltinOp::DivInt, &[Arg::Int(-7), Arg::Int(2)]),
            Some(Arg::Int(-3))
        );
        assert_eq!(
            fold(BuiltinOp::ModInt, &[Arg::Int(-7), Arg::Int(2)]),
            Some(Arg::Int(-1))
        );
        assert_eq!(fold(BuiltinOp::DivInt, &[Arg::Int(7), Arg::Int(0)]), None);
    }

    #[test]
    fn float_comparisons() {
        assert_eq!(
            fold(BuiltinOp::GtFloat, &[Arg::Float(1.0), Arg::Float(2.0)]),
            Some(Arg::Bool(false))
        );
        assert_eq!(
            fold(BuiltinOp::MinFloat, &[Arg::Float(1.0), Arg::Float(2.0)]),
            Some(Arg::Float(1.0))
        );
    }

    #[test]
    fn strings() {
        assert_eq!(
            fold(BuiltinOp::Strcat, &[Arg::str_lit("ab"), Arg::str_lit("cd")]),
            Some(Arg::str_lit("abcd"))
        );
        assert_eq!(
            fold(
                BuiltinOp::Substring,
                &[Arg::str_lit("hello"), Arg::Int(1), Arg::Int(3)]
            ),
            Some(Arg::str_lit("ell"))
        );
        assert_eq!(
            fold(BuiltinOp::ParseInt, &[Arg::str_lit("ff"), Arg::Int(16)]),
            Some(Arg::Int(255))
        );
        assert_eq!(
            fold(BuiltinOp::ParseInt, &[Arg::str_lit("xyz"), Arg::Int(10)]),
            None
        );
    }

    #[test]
    fn short_circuit_with_unknown_operand() {
        let x = Arg::Var(Var::named("x", Type::ScalarValue(ScalarKind::Bool)));
        assert_eq!(
            fold(BuiltinOp::And, &[Arg::Bool(false), x.clone()]),
            Some(Arg::Bool(false))
        );
        // and(true, x) = x itself, not a folded literal.
        assert_eq!(
            fold(BuiltinOp::And, &[Arg::Bool(true), x.clone()]),
            Some(x.clone())
        );
        assert_eq!(
            fold(BuiltinOp::Or, &[x.clone(), Arg::Bool(true)]),
            Some(Arg::Bool(true))
        );
        assert_eq!(fold(BuiltinOp::Or, &[Arg::Bool(false), x.clone()]), Some(x));
    }

    #[test]
    fn unknown_combinations_are_not_errors() {
        assert_eq!(fold(BuiltinOp::PlusInt, &[Arg::Int(1)]), None);
        assert_eq!(
            fold(BuiltinOp::PlusInt, &[Arg::Int(1), Arg::Float(2.0)]),
            None
        );
        let v = Arg::Var(Var::named("v", Type::ScalarValue(ScalarKind::Int)));
        assert_eq!(fold(BuiltinOp::PlusInt, &[Arg::Int(1), v]), None);
    }

    #[test]
    fn copies_do_not_fold() {
        assert_eq!(fold(BuiltinOp::CopyInt, &[Arg::Int(3)]), None);
    }
}

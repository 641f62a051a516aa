// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Add/subtract algebra over congruence information.
//!
//! Expressions of the shape `var + constant` are normalized so chains
//! combine: if `x = y + c1` and `y = z + c2` then `x = z + (c1+c2)`, and a
//! net constant of zero collapses to a plain copy. Useful mainly for making
//! adjacent array indices meet. Constant folding proper is not handled here.

use log::trace;

use freshet_ir::{Arg, BuiltinOp, CompVal, CvRef, Opcode, SubOp, Value, Var};

use crate::congruent_set::CongruentSet;

/// Derived computed values equal to `cv` (a canonicalized builtin op) that
/// follow from add/subtract normalization. Empty when the shape does not
/// apply.
pub fn derive(values: &CongruentSet, cv: &CompVal) -> Vec<CvRef> {
    let SubOp::Op(subop) = cv.subop else {
        return vec![];
    };
    if !matches!(cv.op, Opcode::LocalOp | Opcode::AsyncOp)
        || !matches!(subop, BuiltinOp::PlusInt | BuiltinOp::MinusInt)
        || cv.inputs.len() != 2
    {
        return vec![];
    }
    let (Value::Arg(in1), Value::Arg(in2)) = (cv.input(0), cv.input(1)) else {
        return vec![];
    };

    let Some((var, constant)) = canonical_add(subop, in1, in2) else {
        return vec![];
    };
    trace!("algebra: {} normalizes to {} + {}", cv, var, constant);

    let mut derived = Vec::new();
    for congruent in values.congruent_values(&Value::Arg(Arg::Var(var.clone()))) {
        let Value::Cv(other) = congruent else { continue };
        if let Some(new_cv) = combine(cv.op, &var, constant, other.as_ref()) {
            trace!("algebra: derived {}", new_cv.as_ref());
            derived.push(new_cv);
        }
    }
    derived
}

/// If `other` (a value of the variable operand) is itself `z + c2`, build
/// the combined expression.
fn combine(op: Opcode, _var: &Var, constant: i64, other: &CompVal) -> Option<CvRef> {
    if other.op != op {
        return None;
    }
    let SubOp::Op(other_subop) = other.subop else {
        return None;
    };
    if !matches!(other_subop, BuiltinOp::PlusInt | BuiltinOp::MinusInt) || other.inputs.len() != 2 {
        return None;
    }
    let (Value::Arg(a), Value::Arg(b)) = (other.input(0), other.input(1)) else {
        return None;
    };
    let (inner_var, inner_const) = canonical_add(other_subop, a, b)?;

    let total = constant.checked_add(inner_const)?;
    if total == 0 {
        // The additions cancel.
        Some(CompVal::copy_of(Arg::Var(inner_var)))
    } else {
        let mut inputs = vec![Value::Arg(Arg::Var(inner_var)), Value::Arg(Arg::Int(total))];
        inputs.sort();
        Some(CompVal::intern(op, SubOp::Op(BuiltinOp::PlusInt), inputs))
    }
}

/// Normalize `a op b` with exactly one variable operand into `var + c`.
fn canonical_add(subop: BuiltinOp, in1: &Arg, in2: &Arg) -> Option<(Var, i64)> {
    match (in1, in2) {
        (Arg::Var(v), Arg::Int(c)) => {
            let c = if subop == BuiltinOp::MinusInt {
                c.checked_neg()?
            } else {
                *c
            };
            Some((v.clone(), c))
        }
        (Arg::Int(c), Arg::Var(v)) => {
            if subop == BuiltinOp::MinusInt {
                // Negated variable; not handled.
                return None;
            }
            Some((v.clone(), *c))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptOptions;
    use freshet_ir::{CongruenceKind, ScalarKind, Type};

    fn int_val(name: &str) -> Var {
        Var::named(name, Type::ScalarValue(ScalarKind::Int))
    }

    fn plus(a: Value, b: Value) -> CvRef {
        let mut inputs = vec![a, b];
        inputs.sort();
        CompVal::intern(Opcode::LocalOp, SubOp::Op(BuiltinOp::PlusInt), inputs)
    }

    #[test]
    fn chains_combine() {
        let mut values = CongruentSet::new(CongruenceKind::Value);
        let opts = OptOptions::default();
        let (y, z) = (int_val("y"), int_val("z"));

        // y = z + 2
        let y_val = plus(Value::Arg(Arg::Var(z.clone())), Value::Arg(Arg::Int(2)));
        let canon = values.canonicalize(y_val, None, &opts);
        let loc = values.find_canonical(&Value::Arg(Arg::Var(y.clone())));
        values.add_to_set(canon, &loc);

        // x = y + 3 should also be z + 5.
        let x_val = plus(Value::Arg(Arg::Var(y.clone())), Value::Arg(Arg::Int(3)));
        let derived = derive(&values, x_val.as_ref());
        assert_eq!(derived.len(), 1);
        let expected = plus(Value::Arg(Arg::Var(z)), Value::Arg(Arg::Int(5)));
        assert_eq!(derived[0], expected);
    }

    #[test]
    fn cancellation_becomes_copy() {
        let mut values = CongruentSet::new(CongruenceKind::Value);
        let opts = OptOptions::default();
        let (y, z) = (int_val("y"), int_val("z"));

        // y = z - 3 (var minus const).
        let y_val = CompVal::intern(
            Opcode::LocalOp,
            SubOp::Op(BuiltinOp::MinusInt),
            vec![Value::Arg(Arg::Var(z.clone())), Value::Arg(Arg::Int(3))],
        );
        let canon = values.canonicalize(y_val, None, &opts);
        let loc = values.find_canonical(&Value::Arg(Arg::Var(y.clone())));
        values.add_to_set(canon, &loc);

        // x = y + 3 cancels to a copy of z.
        let x_val = plus(Value::Arg(Arg::Var(y)), Value::Arg(Arg::Int(3)));
        let derived = derive(&values, x_val.as_ref());
        assert_eq!(derived, vec![CompVal::copy_of(Arg::Var(z))]);
    }

    #[test]
    fn non_matching_shapes_derive_nothing() {
        let values = CongruentSet::new(CongruenceKind::Value);
        let cv = plus(Value::Arg(Arg::Int(1)), Value::Arg(Arg::Int(2)));
        assert!(derive(&values, cv.as_ref()).is_empty());
    }
}

// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Builtin operators and their static metadata.
//!
//! The metadata table is constructed once at first use and is read-only
//! afterwards; all classification queries go through it.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;

use crate::types::ScalarKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuiltinOp {
    PlusInt,
    MinusInt,
    MultInt,
    DivInt,
    ModInt,
    NegateInt,
    AbsInt,
    MaxInt,
    MinInt,
    PowInt,
    EqInt,
    NeqInt,
    GtInt,
    GteInt,
    LtInt,
    LteInt,
    PlusFloat,
    MinusFloat,
    MultFloat,
    EqFloat,
    NeqFloat,
    GtFloat,
    GteFloat,
    LtFloat,
    LteFloat,
    MaxFloat,
    MinFloat,
    PowFloat,
    AbsFloat,
    Exp,
    Log,
    Sqrt,
    Round,
    Ceil,
    Floor,
    IsNan,
    FloatToInt,
    IntToFloat,
    IntToStr,
    FloatToStr,
    ParseInt,
    ParseFloat,
    Strcat,
    Substring,
    EqString,
    NeqString,
    Not,
    And,
    Or,
    CopyInt,
    CopyFloat,
    CopyString,
    CopyBool,
}

impl fmt::Display for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct OpProfile {
    commutative: bool,
    short_circuit: bool,
    copy: bool,
    /// Heavy math dispatched to worker contexts when made immediate.
    worker_only: bool,
}

static OP_PROFILES: Lazy<BTreeMap<BuiltinOp, OpProfile>> = Lazy::new(|| {
    use BuiltinOp::*;
    let mut table = BTreeMap::new();
    let mut put = |ops: &[BuiltinOp], profile: OpProfile| {
        for op in ops {
            table.insert(*op, profile);
        }
    };
    put(
        &[
            PlusInt, MultInt, MaxInt, MinInt, EqInt, NeqInt, PlusFloat, MultFloat, MaxFloat,
            MinFloat, EqFloat, NeqFloat, EqString, NeqString,
        ],
        OpProfile {
            commutative: true,
            ..OpProfile::default()
        },
    );
    put(
        &[And, Or],
        OpProfile {
            commutative: true,
            short_circuit: true,
            ..OpProfile::default()
        },
    );
    put(
        &[CopyInt, CopyFloat, CopyString, CopyBool],
        OpProfile {
            copy: true,
            ..OpProfile::default()
        },
    );
    put(
        &[PowFloat, Exp, Log, Sqrt],
        OpProfile {
            worker_only: true,
            ..OpProfile::default()
        },
    );
    table
});

fn profile(op: BuiltinOp) -> OpProfile {
    OP_PROFILES.get(&op).copied().unwrap_or_default()
}

/// Whether argument order is irrelevant; callers canonicalize the argument
/// order of commutative operators before building computed values.
pub fn is_commutative(op: BuiltinOp) -> bool {
    profile(op).commutative
}

/// Whether one known argument can decide the result.
pub fn is_short_circuitable(op: BuiltinOp) -> bool {
    profile(op).short_circuit
}

/// Whether the operator just forwards its single input.
pub fn is_copy(op: BuiltinOp) -> bool {
    profile(op).copy
}

/// Whether the immediate form should run on a worker context.
pub fn is_worker_only(op: BuiltinOp) -> bool {
    profile(op).worker_only
}

/// The copy operator for a scalar kind.
pub fn copy_op(kind: ScalarKind) -> BuiltinOp {
    match kind {
        ScalarKind::Int => BuiltinOp::CopyInt,
        ScalarKind::Float => BuiltinOp::CopyFloat,
        ScalarKind::String => BuiltinOp::CopyString,
        ScalarKind::Bool => BuiltinOp::CopyBool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles() {
        assert!(is_commutative(BuiltinOp::PlusInt));
        assert!(!is_commutative(BuiltinOp::MinusInt));
        assert!(is_short_circuitable(BuiltinOp::And));
        assert!(!is_short_circuitable(BuiltinOp::Not));
        assert!(is_copy(BuiltinOp::CopyFloat));
        assert!(is_worker_only(BuiltinOp::Sqrt));
    }
}

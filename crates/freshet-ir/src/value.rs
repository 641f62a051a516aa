// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Computed values: canonical structural descriptions of expressions.
//!
//! For each value computed by an instruction there is a canonical
//! `CompVal` describing it; two locations holding equal computed values are
//! congruent. This is the key type of the value-numbering optimization.
//! Computed values are hash-consed and never mutated; substituting inputs
//! produces a new one.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use internment::Intern;
use itertools::Itertools;

use crate::arg::Arg;
use crate::opcode::Opcode;
use crate::ops::BuiltinOp;
use crate::types::Type;
use crate::var::{Ident, Var};

/// Hash-consed reference to a computed value.
pub type CvRef = Intern<CompVal>;

/// The two congruence relations tracked by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CongruenceKind {
    /// Locations hold the same value; reads are interchangeable.
    Value,
    /// Locations are aliases; reads AND writes are interchangeable.
    Alias,
}

impl fmt::Display for CongruenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CongruenceKind::Value => write!(f, "value"),
            CongruenceKind::Alias => write!(f, "alias"),
        }
    }
}

/// Disambiguates computed values within one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubOp {
    None,
    Op(BuiltinOp),
    CopyOf,
    AliasOf,
    /// Direct alias handle of an array member.
    ArrayElemAlias,
    /// Copy of an array member.
    ArrayElemCopy,
    /// Value of a scalar array member.
    ArrayElemValScalar,
    /// Value of an array member that is a reference.
    ArrayElemValRef,
    /// Auto-created nested datum in an array.
    ArrayNested,
    /// Reference to an auto-created nested datum.
    ArrayNestedRef,
    /// Value of a struct field that is a reference.
    StructFieldValRef,
    /// Auto-created nested datum in a struct.
    StructNested,
    /// Future holding a container's size.
    ContainerSizeFuture,
}

/// An input of a computed value: a concrete argument or, recursively,
/// another computed value (used while an expression has no storage location
/// of its own yet).
#[derive(Clone)]
pub enum Value {
    Arg(Arg),
    Cv(CvRef),
}

impl Value {
    pub fn is_arg(&self) -> bool {
        matches!(self, Value::Arg(_))
    }

    pub fn is_cv(&self) -> bool {
        matches!(self, Value::Cv(_))
    }

    pub fn as_arg(&self) -> Option<&Arg> {
        match self {
            Value::Arg(a) => Some(a),
            Value::Cv(_) => None,
        }
    }

    pub fn arg(&self) -> &Arg {
        match self {
            Value::Arg(a) => a,
            Value::Cv(cv) => panic!("value {} where an arg was expected", cv.as_ref()),
        }
    }

    pub fn cv(&self) -> CvRef {
        match self {
            Value::Cv(cv) => *cv,
            Value::Arg(a) => panic!("value {} where a computed value was expected", a),
        }
    }

    pub fn as_cv(&self) -> Option<CvRef> {
        match self {
            Value::Cv(cv) => Some(*cv),
            Value::Arg(_) => None,
        }
    }

    /// Whether the value is (or wraps) a constant literal.
    pub fn is_const(&self) -> bool {
        matches!(self, Value::Arg(a) if a.is_const())
    }
}

impl From<Arg> for Value {
    fn from(a: Arg) -> Value {
        Value::Arg(a)
    }
}

impl From<Var> for Value {
    fn from(v: Var) -> Value {
        Value::Arg(Arg::Var(v))
    }
}

impl From<CvRef> for Value {
    fn from(cv: CvRef) -> Value {
        Value::Cv(cv)
    }
}

// Comparison and hashing go through the interned data so the impls agree
// with structural equality of the underlying expressions.

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Arg(a), Value::Arg(b)) => a == b,
            (Value::Cv(a), Value::Cv(b)) => a.as_ref() == b.as_ref(),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Arg(a) => {
                0u8.hash(state);
                a.hash(state);
            }
            Value::Cv(cv) => {
                1u8.hash(state);
                cv.as_ref().hash(state);
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Arg(a), Value::Arg(b)) => a.cmp(b),
            (Value::Cv(a), Value::Cv(b)) => a.as_ref().cmp(b.as_ref()),
            (Value::Arg(_), Value::Cv(_)) => Ordering::Less,
            (Value::Cv(_), Value::Arg(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Arg(a) => write!(f, "{:?}", a),
            Value::Cv(cv) => write!(f, "{}", cv.as_ref()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A computed value: opcode, sub-opcode, and an ordered input list. Input
/// order matters; commutative operators must be argument-sorted by the
/// caller before construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompVal {
    pub op: Opcode,
    pub subop: SubOp,
    pub inputs: Vec<Value>,
}

impl CompVal {
    pub fn intern(op: Opcode, subop: SubOp, inputs: Vec<Value>) -> CvRef {
        Intern::new(CompVal { op, subop, inputs })
    }

    pub fn input(&self, i: usize) -> &Value {
        &self.inputs[i]
    }

    /// Make a copy with a different input list.
    pub fn substitute_inputs(&self, inputs: Vec<Value>) -> CvRef {
        CompVal::intern(self.op, self.subop, inputs)
    }

    pub fn copy_of(src: Arg) -> CvRef {
        CompVal::intern(Opcode::Synthetic, SubOp::CopyOf, vec![src.into()])
    }

    pub fn alias_of(src: Arg) -> CvRef {
        CompVal::intern(Opcode::Synthetic, SubOp::AliasOf, vec![src.into()])
    }

    /// Canonical computed value for retrieving the contents of `src`;
    /// `None` if the type cannot be fetched.
    pub fn retrieve(src: &Var, recursive: bool) -> Option<CvRef> {
        let op = Opcode::retrieve_opcode(src.ty(), recursive)?;
        Some(CompVal::intern(op, SubOp::None, vec![src.clone().into()]))
    }

    /// Canonical computed value for assigning `src` into a datum of type
    /// `dst`; `None` if the type cannot be assigned in one step.
    pub fn assign(dst: &Type, src: Value, recursive: bool) -> Option<CvRef> {
        let op = Opcode::assign_opcode(dst, recursive)?;
        Some(CompVal::intern(op, SubOp::None, vec![src]))
    }

    pub fn builtin_op(op: Opcode, subop: BuiltinOp, inputs: Vec<Value>) -> CvRef {
        debug_assert!(matches!(op, Opcode::LocalOp | Opcode::AsyncOp));
        CompVal::intern(op, SubOp::Op(subop), inputs)
    }

    pub fn array_elem_alias(arr: &Var, ix: Value) -> CvRef {
        CompVal::intern(
            Opcode::Synthetic,
            SubOp::ArrayElemAlias,
            vec![arr.clone().into(), ix],
        )
    }

    pub fn array_elem_copy(arr: &Var, ix: Value) -> CvRef {
        CompVal::intern(
            Opcode::Synthetic,
            SubOp::ArrayElemCopy,
            vec![arr.clone().into(), ix],
        )
    }

    /// Value of an array member; sub-opcode distinguishes scalar members
    /// from members that are references, since only the latter alias.
    pub fn array_elem_val(arr: &Var, ix: Value) -> CvRef {
        CompVal::intern(
            Opcode::Synthetic,
            Self::array_val_subop(arr.ty()),
            vec![arr.clone().into(), ix],
        )
    }

    fn array_val_subop(arr_ty: &Type) -> SubOp {
        match arr_ty.elem_type() {
            Some(Type::Ref(_)) => SubOp::ArrayElemValRef,
            _ => SubOp::ArrayElemValScalar,
        }
    }

    pub fn struct_field_alias(st: &Var, field: Ident) -> CvRef {
        CompVal::intern(
            Opcode::StructCreateAlias,
            SubOp::None,
            vec![st.clone().into(), Arg::Str(field).into()],
        )
    }

    pub fn struct_field_copy(st: &Var, field: Ident) -> CvRef {
        CompVal::intern(
            Opcode::StructCopyOut,
            SubOp::None,
            vec![st.clone().into(), Arg::Str(field).into()],
        )
    }

    /// Value of a struct field; fields holding references alias their
    /// referent, everything else is a plain value.
    pub fn struct_field_val(st: &Var, field: Ident) -> CvRef {
        let is_ref = st
            .ty()
            .struct_shape()
            .and_then(|shape| shape.field_type(field).cloned())
            .map(|ty| ty.is_ref())
            .unwrap_or(false);
        let (op, subop) = if is_ref {
            (Opcode::Synthetic, SubOp::StructFieldValRef)
        } else {
            (Opcode::StructRetrieveSub, SubOp::None)
        };
        CompVal::intern(op, subop, vec![st.clone().into(), Arg::Str(field).into()])
    }

    pub fn container_size(arr: &Var, is_async: bool) -> CvRef {
        if is_async {
            CompVal::intern(
                Opcode::Synthetic,
                SubOp::ContainerSizeFuture,
                vec![arr.clone().into()],
            )
        } else {
            CompVal::intern(Opcode::ContainerSize, SubOp::None, vec![arr.clone().into()])
        }
    }

    pub fn arr_contains(arr: &Var, key: Value) -> CvRef {
        CompVal::intern(
            Opcode::ArrContains,
            SubOp::None,
            vec![arr.clone().into(), key],
        )
    }

    pub fn is_copy(&self) -> bool {
        self.op == Opcode::Synthetic && self.subop == SubOp::CopyOf
    }

    pub fn is_alias(&self) -> bool {
        self.op == Opcode::Synthetic && self.subop == SubOp::AliasOf
    }

    pub fn is_array_member_alias(&self) -> bool {
        self.op == Opcode::Synthetic && self.subop == SubOp::ArrayElemAlias
    }

    pub fn is_array_member_val_ref(&self) -> bool {
        self.op == Opcode::Synthetic
            && matches!(self.subop, SubOp::ArrayNested | SubOp::ArrayElemValRef)
    }

    /// Whether this represents a member handle of an array (rather than the
    /// member's value).
    pub fn is_array_member(&self) -> bool {
        self.op == Opcode::Synthetic
            && matches!(
                self.subop,
                SubOp::ArrayNestedRef | SubOp::ArrayElemCopy | SubOp::ArrayElemAlias
            )
    }

    pub fn is_struct_field_alias(&self) -> bool {
        self.op == Opcode::StructCreateAlias
    }

    pub fn is_struct_field_val_ref(&self) -> bool {
        self.op == Opcode::Synthetic && self.subop == SubOp::StructFieldValRef
    }

    pub fn is_retrieve(&self, include_recursive: bool) -> bool {
        self.op.is_retrieve(include_recursive)
    }

    /// Convert an array member handle into the member-value computed value
    /// it dereferences to.
    pub fn deref_array_member(&self) -> CvRef {
        assert!(self.is_array_member(), "not an array member: {}", self);
        let subop = match self.subop {
            SubOp::ArrayNestedRef => SubOp::ArrayNested,
            SubOp::ArrayElemCopy | SubOp::ArrayElemAlias => {
                let arr = self.input(0).arg().var();
                Self::array_val_subop(arr.ty())
            }
            _ => unreachable!(),
        };
        CompVal::intern(Opcode::Synthetic, subop, self.inputs.clone())
    }

    /// The equivalence flavor this computed value declares: handles created
    /// by loads-through-reference and member-alias shapes are `Alias`
    /// (writes through either location are interchangeable); everything
    /// else is `Value`.
    pub fn congruence_kind(&self) -> CongruenceKind {
        if self.is_alias()
            || self.op == Opcode::LoadRef
            || self.is_array_member_alias()
            || self.is_array_member_val_ref()
            || self.is_struct_field_alias()
            || self.is_struct_field_val_ref()
        {
            CongruenceKind::Alias
        } else {
            CongruenceKind::Value
        }
    }
}

impl fmt::Display for CompVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inputs = self.inputs.iter().map(|v| v.to_string()).join(", ");
        match self.subop {
            SubOp::None => write!(f, "{:?}[{}]", self.op, inputs),
            subop => write!(f, "{:?}.{:?}[{}]", self.op, subop, inputs),
        }
    }
}

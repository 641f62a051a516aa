// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Freshet type lattice.
//!
//! Every scalar kind exists twice: as a shared-store future that tasks block
//! on, and as an immediate value local to the executing context. Containers
//! (arrays, structs) are futures whose members may themselves be futures;
//! `Ref` is a future holding a reference to another datum.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use internment::Intern;

use crate::var::Ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    Int,
    Float,
    String,
    Bool,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::String => "string",
            ScalarKind::Bool => "bool",
        };
        write!(f, "{}", s)
    }
}

/// Interned field list of a struct type. Interning keeps `Type` cheaply
/// copyable and comparable even for deeply nested shapes.
#[derive(Clone, Copy)]
pub struct StructShape(Intern<Vec<(Ident, Type)>>);

impl StructShape {
    pub fn new(fields: Vec<(Ident, Type)>) -> Self {
        StructShape(Intern::new(fields))
    }

    pub fn fields(&self) -> &[(Ident, Type)] {
        self.0.as_ref()
    }

    pub fn field_type(&self, field: Ident) -> Option<&Type> {
        self.fields()
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, ty)| ty)
    }
}

impl PartialEq for StructShape {
    fn eq(&self, other: &Self) -> bool {
        self.fields() == other.fields()
    }
}

impl Eq for StructShape {}

impl Hash for StructShape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fields().hash(state);
    }
}

impl PartialOrd for StructShape {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StructShape {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fields().cmp(other.fields())
    }
}

impl fmt::Debug for StructShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StructShape").field(&self.fields()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    /// Single-assignment future holding a scalar.
    ScalarFuture(ScalarKind),
    /// Immediate scalar value in the current execution context.
    ScalarValue(ScalarKind),
    /// Future holding a reference to another datum.
    Ref(Box<Type>),
    /// Shared-store array future; elements have the given type.
    Array(Box<Type>),
    /// Local array value.
    ArrayValue(Box<Type>),
    /// Shared-store struct future.
    Struct(StructShape),
    /// Local struct value.
    StructValue(StructShape),
}

impl Type {
    pub fn int() -> Type {
        Type::ScalarFuture(ScalarKind::Int)
    }

    pub fn int_val() -> Type {
        Type::ScalarValue(ScalarKind::Int)
    }

    pub fn is_future(&self) -> bool {
        matches!(
            self,
            Type::ScalarFuture(_) | Type::Ref(_) | Type::Array(_) | Type::Struct(_)
        )
    }

    pub fn is_value(&self) -> bool {
        !self.is_future()
    }

    pub fn is_scalar_future(&self) -> bool {
        matches!(self, Type::ScalarFuture(_))
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, Type::Ref(_))
    }

    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Type::Array(_) | Type::ArrayValue(_) | Type::Struct(_) | Type::StructValue(_)
        )
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Type::ScalarFuture(k) | Type::ScalarValue(k) => Some(*k),
            _ => None,
        }
    }

    /// Type of the datum read out of a future of this type.
    pub fn retrieved(&self) -> Option<Type> {
        match self {
            Type::ScalarFuture(k) => Some(Type::ScalarValue(*k)),
            Type::Ref(inner) => Some((**inner).clone()),
            Type::Array(elem) => Some(Type::ArrayValue(elem.clone())),
            Type::Struct(shape) => Some(Type::StructValue(*shape)),
            _ => None,
        }
    }

    pub fn elem_type(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) | Type::ArrayValue(elem) => Some(elem),
            _ => None,
        }
    }

    pub fn struct_shape(&self) -> Option<StructShape> {
        match self {
            Type::Struct(shape) | Type::StructValue(shape) => Some(*shape),
            _ => None,
        }
    }

    /// Whether data of this type may be referenced from inside an
    /// asynchronously dispatched child task. Futures live in the shared
    /// store and pass freely; scalar values are copied into the task
    /// environment; local aggregates are handles into worker-local memory
    /// and must not cross the boundary.
    pub fn passable(&self) -> bool {
        match self {
            Type::ScalarFuture(_) | Type::Ref(_) | Type::Array(_) | Type::Struct(_) => true,
            Type::ScalarValue(_) => true,
            Type::ArrayValue(_) | Type::StructValue(_) => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::ScalarFuture(k) => write!(f, "{}", k),
            Type::ScalarValue(k) => write!(f, "{}.val", k),
            Type::Ref(inner) => write!(f, "ref<{}>", inner),
            Type::Array(elem) => write!(f, "array<{}>", elem),
            Type::ArrayValue(elem) => write!(f, "array.val<{}>", elem),
            Type::Struct(_) => write!(f, "struct"),
            Type::StructValue(_) => write!(f, "struct.val"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieved_types() {
        assert_eq!(
            Type::ScalarFuture(ScalarKind::Int).retrieved(),
            Some(Type::ScalarValue(ScalarKind::Int))
        );
        let arr = Type::Array(Box::new(Type::ScalarFuture(ScalarKind::Float)));
        assert_eq!(
            arr.retrieved(),
            Some(Type::ArrayValue(Box::new(Type::ScalarFuture(
                ScalarKind::Float
            ))))
        );
        assert_eq!(Type::ScalarValue(ScalarKind::Int).retrieved(), None);
    }

    #[test]
    fn passability() {
        assert!(Type::ScalarFuture(ScalarKind::Int).passable());
        assert!(Type::ScalarValue(ScalarKind::String).passable());
        assert!(!Type::ArrayValue(Box::new(Type::int())).passable());
    }
}

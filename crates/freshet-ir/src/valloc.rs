// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Value-location facts.
//!
//! A `ValLoc` is the unit of information an instruction establishes: the
//! computed value it produced, the location holding it, and what is known
//! about the location's closedness. Instructions build these once per
//! analysis and never mutate them.

use std::fmt;

use crate::arg::Arg;
use crate::types::Type;
use crate::value::{CompVal, CvRef, Value};
use crate::var::Var;

/// How much of a location is known to be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Closedness {
    /// No more writes may be assumed to have happened.
    Open,
    /// The location received its single write.
    Closed,
    /// Closed, and every transitive member is closed too.
    RecursivelyClosed,
}

impl Closedness {
    pub fn is_closed(self) -> bool {
        self != Closedness::Open
    }

    pub fn is_recursive(self) -> bool {
        self == Closedness::RecursivelyClosed
    }

    /// Weakest of two facts; used when joining branches.
    pub fn meet(self, other: Closedness) -> Closedness {
        self.min(other)
    }
}

/// What kind of write the fact corresponds to, if any. Assignments to a
/// location close it; assignments of a value merely name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssignKind {
    NotAssign,
    ToLocation,
    ToValue,
}

/// A computed value paired with the location holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValLoc {
    pub value: CvRef,
    pub location: Arg,
    pub closedness: Closedness,
    pub is_value_copy: bool,
    pub assign: AssignKind,
}

impl ValLoc {
    pub fn new(value: CvRef, location: Arg, closedness: Closedness, assign: AssignKind) -> ValLoc {
        ValLoc {
            value,
            location,
            closedness,
            is_value_copy: false,
            assign,
        }
    }

    /// `dst` holds a copy of `src`'s value.
    pub fn copy_of(dst: &Var, src: Arg, closedness: Closedness) -> ValLoc {
        ValLoc {
            value: CompVal::copy_of(src),
            location: Arg::Var(dst.clone()),
            closedness,
            is_value_copy: true,
            assign: AssignKind::NotAssign,
        }
    }

    /// `dst` is an alias handle for `src`.
    pub fn alias_of(dst: &Var, src: Arg) -> ValLoc {
        ValLoc {
            value: CompVal::alias_of(src),
            location: Arg::Var(dst.clone()),
            closedness: Closedness::Open,
            is_value_copy: false,
            assign: AssignKind::NotAssign,
        }
    }

    /// `dst` was assigned the value `src`, closing it.
    pub fn assign(dst: &Var, src: Value, recursive: bool) -> Option<ValLoc> {
        let value = CompVal::assign(dst.ty(), src, recursive)?;
        let closedness = if recursive {
            Closedness::RecursivelyClosed
        } else {
            Closedness::Closed
        };
        Some(ValLoc::new(
            value,
            Arg::Var(dst.clone()),
            closedness,
            AssignKind::ToLocation,
        ))
    }

    /// `dst` holds the retrieved contents of `src`. Immediate values are
    /// always closed once produced.
    pub fn retrieve(dst: &Var, src: &Var, recursive: bool) -> Option<ValLoc> {
        let value = CompVal::retrieve(src, recursive)?;
        let closedness = if dst.ty().is_value() {
            Closedness::Closed
        } else {
            Closedness::Open
        };
        Some(ValLoc::new(
            value,
            Arg::Var(dst.clone()),
            closedness,
            AssignKind::ToValue,
        ))
    }

    pub fn kind(&self) -> crate::value::CongruenceKind {
        self.value.as_ref().congruence_kind()
    }

    pub fn location_type(&self) -> Type {
        self.location.value_type()
    }
}

impl fmt::Display for ValLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {} ({:?})",
            self.value.as_ref(),
            self.location,
            self.closedness
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarKind;

    #[test]
    fn closedness_meet() {
        assert_eq!(
            Closedness::Closed.meet(Closedness::RecursivelyClosed),
            Closedness::Closed
        );
        assert_eq!(Closedness::Closed.meet(Closedness::Open), Closedness::Open);
    }

    #[test]
    fn assign_closes() {
        let x = Var::named("x", Type::ScalarFuture(ScalarKind::Int));
        let vl = ValLoc::assign(&x, Value::Arg(Arg::Int(3)), false).unwrap();
        assert_eq!(vl.closedness, Closedness::Closed);
        assert_eq!(vl.assign, AssignKind::ToLocation);
        assert_eq!(vl.location, Arg::Var(x));
    }
}

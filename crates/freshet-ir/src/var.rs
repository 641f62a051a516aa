// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Variables and identifiers.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use internment::Intern;

use crate::types::Type;

/// Interned identifier. Comparison and hashing go through the string data so
/// identifiers behave like plain names in ordered containers.
#[derive(Clone, Copy)]
pub struct Ident(Intern<String>);

impl Ident {
    pub fn new(name: &str) -> Ident {
        Ident(Intern::new(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl PartialEq for Ident {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Ident {}

impl Hash for Ident {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl PartialOrd for Ident {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ident {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Three-valued logic for facts that may be statically unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ternary {
    True,
    False,
    Maybe,
}

/// Storage class of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Storage {
    /// Directly allocated datum.
    Stack,
    /// Handle aliasing storage owned by another variable.
    Alias,
    /// Process-wide shared constant.
    GlobalConst,
}

/// A named storage location. Names are unique within a function, so identity,
/// ordering, and hashing use the name alone.
#[derive(Clone)]
pub struct Var {
    name: Ident,
    ty: Type,
    storage: Storage,
    /// Whether the variable is mapped to externally visible state (e.g. a
    /// file); mapped variables are never substituted under value congruence.
    mapped: Ternary,
}

impl Var {
    pub fn new(name: Ident, ty: Type, storage: Storage) -> Var {
        Var {
            name,
            ty,
            storage,
            mapped: Ternary::False,
        }
    }

    pub fn named(name: &str, ty: Type) -> Var {
        Var::new(Ident::new(name), ty, Storage::Stack)
    }

    pub fn mapped(name: &str, ty: Type) -> Var {
        Var {
            name: Ident::new(name),
            ty,
            storage: Storage::Stack,
            mapped: Ternary::True,
        }
    }

    pub fn name(&self) -> Ident {
        self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn storage(&self) -> Storage {
        self.storage
    }

    pub fn is_mapped(&self) -> Ternary {
        self.mapped
    }

    pub fn can_pass_to_child_task(&self) -> bool {
        self.ty.passable()
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Var {}

impl Hash for Var {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Var {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Var {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.ty)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Optimizer failure modes.
//!
//! A contradiction means the input IR claims two different constants (or two
//! distinct direct locations) hold the same value - either invalid input or
//! a latent compiler bug upstream. It is recoverable at function granularity:
//! the function is emitted unoptimized and compilation continues. Contract
//! violations inside the optimizer itself are panics, not errors.

use std::error::Error;
use std::fmt;

use freshet_ir::{CongruenceKind, Value};

/// Two congruence sets that must stay distinct were asked to merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contradiction {
    pub kind: CongruenceKind,
    pub left: Value,
    pub right: Value,
}

impl Contradiction {
    pub fn new(kind: CongruenceKind, left: Value, right: Value) -> Contradiction {
        Contradiction { kind, left, right }
    }
}

impl fmt::Display for Contradiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "contradictory {} congruence between {} and {}",
            self.kind, self.left, self.right
        )
    }
}

impl Error for Contradiction {}

pub type OptResult<T> = Result<T, Contradiction>;

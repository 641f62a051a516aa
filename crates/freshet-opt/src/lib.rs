// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Value-numbering / congruence-closure optimizer for Freshet.
//!
//! The pass tracks, per program point, which locations hold equal or aliased
//! values and which futures are provably closed, and uses both to fold
//! constants, eliminate redundant computation, and convert blocking waits
//! into synchronous code. Two scope-nested equivalence relations are
//! maintained over a recursive value language; conditional branches are
//! joined by a unifier that only keeps facts holding on every branch.

pub mod algebra;
pub mod closedness;
pub mod congruences;
pub mod congruent_set;
pub mod const_fold;
mod error;
mod options;
pub mod pipeline;
pub mod scoped_union_find;
pub mod unify;
pub mod value_numbering;

pub use error::{Contradiction, OptResult};
pub use options::OptOptions;
pub use pipeline::{FunctionProcessor, OptPipeline};
pub use value_numbering::ValueNumbering;

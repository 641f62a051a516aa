// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Intermediate representation for the Freshet middle end.
//!
//! Freshet programs are graphs of single-assignment futures and tasks that
//! block until their inputs are closed. This crate defines the data model the
//! optimizer works on: types, variables, arguments, opcodes, computed values,
//! the facts instructions establish, and the block/continuation tree. It does
//! NOT contain the front end or the code generator - those consume and
//! produce this IR from their own crates.

mod arg;
mod instruction;
mod opcode;
mod ops;
mod tree;
mod types;
mod valloc;
mod value;
mod var;

pub use arg::Arg;
pub use instruction::{ImmediateReq, Instruction, RenameMode};
pub use opcode::Opcode;
pub use ops::{copy_op, is_commutative, is_copy, is_short_circuitable, is_worker_only, BuiltinOp};
pub use tree::{
    Block, Conditional, Continuation, ExecTarget, Function, GlobalConstants, Program, RangeLoop,
    Statement, TempCounter, WaitStmt,
};
pub use types::{ScalarKind, StructShape, Type};
pub use valloc::{AssignKind, Closedness, ValLoc};
pub use value::{CompVal, CongruenceKind, CvRef, SubOp, Value};
pub use var::{Ident, Storage, Ternary, Var};

// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! The block/continuation tree of a function.
//!
//! A block is a sequence of statements followed by continuations. Statements
//! execute in program order; a statement is either an instruction or a
//! synchronous conditional. Continuations are the suspended parts of the
//! block: wait-statements that run their body once their futures close, and
//! loops.

use std::collections::BTreeMap;
use std::fmt;

use crate::arg::Arg;
use crate::instruction::Instruction;
use crate::types::Type;
use crate::var::{Ident, Storage, Var};

/// Execution context of a dispatched body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecTarget {
    /// Run inline in the current context.
    Here,
    /// Dispatch to a control context.
    Control,
    /// Dispatch to a worker context.
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub vars: Vec<Var>,
    pub statements: Vec<Statement>,
    pub continuations: Vec<Continuation>,
}

impl Block {
    pub fn new() -> Block {
        Block::default()
    }

    pub fn push(&mut self, inst: Instruction) {
        self.statements.push(Statement::Instruction(inst));
    }

    pub fn declare(&mut self, var: Var) -> Var {
        self.vars.push(var.clone());
        var
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Instruction(Instruction),
    Conditional(Conditional),
}

/// A synchronous conditional. Branches are mutually exclusive; the set is
/// exhaustive when an else/default branch is present, which is what allows
/// facts holding on every branch to survive the join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditional {
    If {
        cond: Arg,
        then_block: Block,
        else_block: Option<Block>,
    },
    Switch {
        subject: Arg,
        cases: Vec<(i64, Block)>,
        default: Option<Block>,
    },
}

impl Conditional {
    pub fn branches(&self) -> Vec<&Block> {
        match self {
            Conditional::If {
                then_block,
                else_block,
                ..
            } => {
                let mut blocks = vec![then_block];
                blocks.extend(else_block.iter());
                blocks
            }
            Conditional::Switch { cases, default, .. } => {
                let mut blocks: Vec<&Block> = cases.iter().map(|(_, b)| b).collect();
                blocks.extend(default.iter());
                blocks
            }
        }
    }

    pub fn branches_mut(&mut self) -> Vec<&mut Block> {
        match self {
            Conditional::If {
                then_block,
                else_block,
                ..
            } => {
                let mut blocks = vec![then_block];
                blocks.extend(else_block.iter_mut());
                blocks
            }
            Conditional::Switch { cases, default, .. } => {
                let mut blocks: Vec<&mut Block> = cases.iter_mut().map(|(_, b)| b).collect();
                blocks.extend(default.iter_mut());
                blocks
            }
        }
    }

    /// Whether the branches cover every control-flow possibility.
    pub fn is_exhaustive(&self) -> bool {
        match self {
            Conditional::If { else_block, .. } => else_block.is_some(),
            Conditional::Switch { default, .. } => default.is_some(),
        }
    }

    /// The variable or constant the conditional dispatches on.
    pub fn subject(&self) -> &Arg {
        match self {
            Conditional::If { cond, .. } => cond,
            Conditional::Switch { subject, .. } => subject,
        }
    }

    /// Given the statically-known value of the subject, the branch that will
    /// run: `Some(Some(block_index))` into `branches()`, or `Some(None)` when
    /// the conditional runs no branch at all (a non-exhaustive miss).
    pub fn predict(&self, subject_value: &Arg) -> Option<Option<usize>> {
        match self {
            Conditional::If {
                else_block: None, ..
            } => match subject_value {
                Arg::Bool(true) => Some(Some(0)),
                Arg::Bool(false) => Some(None),
                _ => None,
            },
            Conditional::If {
                else_block: Some(_),
                ..
            } => match subject_value {
                Arg::Bool(true) => Some(Some(0)),
                Arg::Bool(false) => Some(Some(1)),
                _ => None,
            },
            Conditional::Switch { cases, default, .. } => {
                let Arg::Int(v) = subject_value else {
                    return None;
                };
                match cases.iter().position(|(label, _)| label == v) {
                    Some(ix) => Some(Some(ix)),
                    None if default.is_some() => Some(Some(cases.len())),
                    None => Some(None),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    Wait(WaitStmt),
    RangeLoop(RangeLoop),
}

impl Continuation {
    pub fn get_blocks(&mut self) -> Vec<&mut Block> {
        match self {
            Continuation::Wait(w) => vec![&mut w.block],
            Continuation::RangeLoop(l) => vec![&mut l.block],
        }
    }

    /// Whether the body is dispatched asynchronously (and so is a
    /// task-passability boundary).
    pub fn is_async(&self) -> bool {
        match self {
            Continuation::Wait(w) => w.target != ExecTarget::Here,
            Continuation::RangeLoop(l) => l.parallel,
        }
    }

    /// Whether locals of the enclosing block stay visible in the body.
    pub fn inherits_parent_vars(&self) -> bool {
        !self.is_async()
    }
}

/// Run `block` once every variable in `wait_vars` is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitStmt {
    pub wait_vars: Vec<Var>,
    /// Wait for recursive closedness of container inputs.
    pub recursive: bool,
    pub target: ExecTarget,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeLoop {
    pub counter: Var,
    pub start: Arg,
    pub end: Arg,
    pub step: Arg,
    pub parallel: bool,
    pub block: Block,
}

/// Allocator for optimizer-created temporaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempCounter {
    next: u64,
}

impl TempCounter {
    pub fn new() -> TempCounter {
        TempCounter::default()
    }

    pub fn fresh(&mut self, prefix: &str, ty: Type) -> Var {
        let name = format!("__{}_{}", prefix, self.next);
        self.next += 1;
        Var::named(&name, ty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: Ident,
    pub inputs: Vec<Var>,
    pub outputs: Vec<Var>,
    pub body: Block,
    pub temps: TempCounter,
}

impl Function {
    pub fn new(name: &str, inputs: Vec<Var>, outputs: Vec<Var>, body: Block) -> Function {
        Function {
            name: Ident::new(name),
            inputs,
            outputs,
            body,
            temps: TempCounter::new(),
        }
    }
}

/// Process-wide pool of shared constant futures. Canonicalization redirects
/// assign-constant computed values here so each literal is stored once.
#[derive(Debug, Clone, Default)]
pub struct GlobalConstants {
    by_val: BTreeMap<Arg, Var>,
    next: u64,
}

impl GlobalConstants {
    pub fn new() -> GlobalConstants {
        GlobalConstants::default()
    }

    pub fn get_or_create(&mut self, val: &Arg) -> Var {
        assert!(val.is_const(), "global constant from non-constant {}", val);
        if let Some(existing) = self.by_val.get(val) {
            return existing.clone();
        }
        let name = format!("__gc_{}", self.next);
        self.next += 1;
        let var = Var::new(Ident::new(&name), val.future_type(), Storage::GlobalConst);
        self.by_val.insert(val.clone(), var.clone());
        var
    }

    pub fn lookup_by_val(&self, val: &Arg) -> Option<&Var> {
        self.by_val.get(val)
    }

    pub fn value_of(&self, var: &Var) -> Option<&Arg> {
        self.by_val.iter().find(|(_, v)| *v == var).map(|(a, _)| a)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arg, &Var)> {
        self.by_val.iter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub consts: GlobalConstants,
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Instruction(inst) => write!(f, "{}", inst),
            Statement::Conditional(Conditional::If { cond, .. }) => write!(f, "if {}", cond),
            Statement::Conditional(Conditional::Switch { subject, .. }) => {
                write!(f, "switch {}", subject)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScalarKind;

    #[test]
    fn predict_if() {
        let cond = Conditional::If {
            cond: Arg::Var(Var::named("c", Type::ScalarValue(ScalarKind::Bool))),
            then_block: Block::new(),
            else_block: Some(Block::new()),
        };
        assert_eq!(cond.predict(&Arg::Bool(true)), Some(Some(0)));
        assert_eq!(cond.predict(&Arg::Bool(false)), Some(Some(1)));
        assert_eq!(cond.predict(&Arg::Int(1)), None);
    }

    #[test]
    fn predict_switch() {
        let mk = || Block::new();
        let cond = Conditional::Switch {
            subject: Arg::Var(Var::named("s", Type::ScalarValue(ScalarKind::Int))),
            cases: vec![(1, mk()), (2, mk())],
            default: None,
        };
        assert_eq!(cond.predict(&Arg::Int(2)), Some(Some(1)));
        assert_eq!(cond.predict(&Arg::Int(9)), Some(None));
    }

    #[test]
    fn shared_constants_are_shared() {
        let mut consts = GlobalConstants::new();
        let a = consts.get_or_create(&Arg::Int(42));
        let b = consts.get_or_create(&Arg::Int(42));
        let c = consts.get_or_create(&Arg::Int(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.storage(), Storage::GlobalConst);
    }
}

// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Instructions and the analysis interface they expose.
//!
//! Every instruction can report the facts it establishes (`results`), the
//! alias pairs it creates (`aliases`), the futures it blocks on
//! (`required_closed_inputs`), and can rename its operands under either
//! congruence relation (`rename`). Blocking instructions additionally
//! implement the make-immediate protocol used once their inputs are proven
//! closed.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::arg::Arg;
use crate::ops::{self, BuiltinOp};
use crate::tree::TempCounter;
use crate::valloc::{Closedness, ValLoc};
use crate::value::{CompVal, Value};
use crate::var::{Ident, Var};

/// Which congruence relation a rename goes through. `Value` renames read
/// operands; `Reference` renames storage locations being written or aliased
/// and must only substitute alias-congruent locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameMode {
    Value,
    Reference,
}

/// Request produced by `try_make_immediate`: the futures whose values must
/// be fetched before the immediate form can be emitted.
#[derive(Debug, Clone)]
pub struct ImmediateReq {
    pub fetch: Vec<Var>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Comment(String),
    /// Assign a value into a future, closing it.
    Store {
        dst: Var,
        src: Arg,
        recursive: bool,
    },
    /// Retrieve the contents of a closed future.
    Load {
        dst: Var,
        src: Var,
        recursive: bool,
    },
    /// Create an alias handle for an existing datum.
    CopyRef { dst: Var, src: Var },
    /// Builtin operation on immediate values.
    LocalOp {
        op: BuiltinOp,
        dst: Option<Var>,
        args: Vec<Arg>,
    },
    /// Builtin operation dispatched as a task blocking on its future inputs.
    AsyncOp {
        op: BuiltinOp,
        dst: Option<Var>,
        args: Vec<Arg>,
    },
    /// Immediate lookup of a member of a local array value.
    ArrRetrieve { dst: Var, arr: Var, ix: Arg },
    /// Asynchronous copy of an array member into a fresh future.
    ArrCopyOut { dst: Var, arr: Var, ix: Var },
    /// Immediate store of a member value at a known index.
    ArrStore { arr: Var, ix: Arg, member: Arg },
    /// Store of a member value at an index that is still a future.
    ArrStoreFuture { arr: Var, ix: Var, member: Arg },
    /// Alias handle for an array member.
    ArrCreateAlias { dst: Var, arr: Var, ix: Arg },
    /// Immediate membership test.
    ArrContains { dst: Var, arr: Var, key: Arg },
    /// Immediate size of a local container value.
    ContainerSize { dst: Var, arr: Var },
    /// Alias handle for a struct field.
    StructCreateAlias { dst: Var, st: Var, field: Ident },
    /// Immediate lookup of a field of a local struct value.
    StructRetrieveSub { dst: Var, st: Var, field: Ident },
    /// Asynchronous copy of a struct field into a fresh future.
    StructCopyOut { dst: Var, st: Var, field: Ident },
    /// Immediate store of a value into a struct field.
    StructStoreSub { st: Var, field: Ident, src: Arg },
}

impl Instruction {
    /// Variables this instruction writes or modifies.
    pub fn outputs(&self) -> Vec<&Var> {
        use Instruction::*;
        match self {
            Comment(_) => vec![],
            Store { dst, .. } | Load { dst, .. } | CopyRef { dst, .. } => vec![dst],
            LocalOp { dst, .. } | AsyncOp { dst, .. } => dst.iter().collect(),
            ArrRetrieve { dst, .. }
            | ArrCopyOut { dst, .. }
            | ArrCreateAlias { dst, .. }
            | ArrContains { dst, .. }
            | ContainerSize { dst, .. }
            | StructCreateAlias { dst, .. }
            | StructRetrieveSub { dst, .. }
            | StructCopyOut { dst, .. } => vec![dst],
            ArrStore { arr, .. } | ArrStoreFuture { arr, .. } => vec![arr],
            StructStoreSub { st, .. } => vec![st],
        }
    }

    /// Arguments this instruction reads.
    pub fn inputs(&self) -> Vec<&Arg> {
        use Instruction::*;
        match self {
            Comment(_) => vec![],
            Store { src, .. } => vec![src],
            Load { .. } | CopyRef { .. } | ContainerSize { .. } => vec![],
            LocalOp { args, .. } | AsyncOp { args, .. } => args.iter().collect(),
            ArrRetrieve { ix, .. } => vec![ix],
            ArrCopyOut { .. } => vec![],
            ArrStore { ix, member, .. } => vec![ix, member],
            ArrStoreFuture { member, .. } => vec![member],
            ArrCreateAlias { ix, .. } => vec![ix],
            ArrContains { key, .. } => vec![key],
            StructCreateAlias { .. } | StructRetrieveSub { .. } | StructCopyOut { .. } => vec![],
            StructStoreSub { src, .. } => vec![src],
        }
    }

    /// Futures this instruction blocks on before it can run.
    pub fn required_closed_inputs(&self) -> Vec<&Var> {
        use Instruction::*;
        match self {
            Load { src, .. } => vec![src],
            AsyncOp { args, .. } => args
                .iter()
                .filter_map(|a| match a {
                    Arg::Var(v) if v.ty().is_future() => Some(v),
                    _ => None,
                })
                .collect(),
            ArrCopyOut { ix, .. } => vec![ix],
            ArrStoreFuture { ix, .. } => vec![ix],
            _ => vec![],
        }
    }

    pub fn is_blocking(&self) -> bool {
        !self.required_closed_inputs().is_empty()
    }

    /// The facts this instruction establishes.
    pub fn results(&self) -> Vec<ValLoc> {
        use Instruction::*;
        match self {
            Comment(_) => vec![],

            Store {
                dst,
                src,
                recursive,
            } => {
                let mut facts = Vec::new();
                if let Some(vl) = ValLoc::assign(dst, Value::Arg(src.clone()), *recursive) {
                    facts.push(vl);
                }
                // The converse fact: retrieving dst yields src.
                if let Some(cv) = CompVal::retrieve(dst, *recursive) {
                    facts.push(ValLoc::new(
                        cv,
                        src.clone(),
                        Closedness::Closed,
                        crate::valloc::AssignKind::ToValue,
                    ));
                }
                facts
            }

            Load {
                dst,
                src,
                recursive,
            } => {
                let mut facts = Vec::new();
                if let Some(vl) = ValLoc::retrieve(dst, src, *recursive) {
                    facts.push(vl);
                }
                // The load blocked until src was closed; record the converse
                // assignment fact so stores and loads meet in one set.
                if let Some(cv) = CompVal::assign(src.ty(), dst.clone().into(), *recursive) {
                    let closedness = if *recursive {
                        Closedness::RecursivelyClosed
                    } else {
                        Closedness::Closed
                    };
                    facts.push(ValLoc::new(
                        cv,
                        Arg::Var(src.clone()),
                        closedness,
                        crate::valloc::AssignKind::NotAssign,
                    ));
                }
                facts
            }

            CopyRef { dst, src } => vec![ValLoc::alias_of(dst, Arg::Var(src.clone()))],

            LocalOp { op, dst, args } => {
                let Some(dst) = dst else { return vec![] };
                if ops::is_copy(*op) {
                    return vec![ValLoc::copy_of(dst, args[0].clone(), Closedness::Closed)];
                }
                let cv = CompVal::builtin_op(
                    crate::opcode::Opcode::LocalOp,
                    *op,
                    Self::cv_inputs(*op, args),
                );
                vec![ValLoc::new(
                    cv,
                    Arg::Var(dst.clone()),
                    Closedness::Closed,
                    crate::valloc::AssignKind::NotAssign,
                )]
            }

            AsyncOp { op, dst, args } => {
                let Some(dst) = dst else { return vec![] };
                if ops::is_copy(*op) {
                    return vec![ValLoc::copy_of(dst, args[0].clone(), Closedness::Open)];
                }
                let cv = CompVal::builtin_op(
                    crate::opcode::Opcode::AsyncOp,
                    *op,
                    Self::cv_inputs(*op, args),
                );
                vec![ValLoc::new(
                    cv,
                    Arg::Var(dst.clone()),
                    Closedness::Open,
                    crate::valloc::AssignKind::NotAssign,
                )]
            }

            ArrRetrieve { dst, arr, ix } => vec![ValLoc::new(
                CompVal::array_elem_val(arr, Value::Arg(ix.clone())),
                Arg::Var(dst.clone()),
                Closedness::Closed,
                crate::valloc::AssignKind::NotAssign,
            )],

            ArrCopyOut { dst, arr, ix } => vec![ValLoc::new(
                CompVal::array_elem_copy(arr, Value::Arg(Arg::Var(ix.clone()))),
                Arg::Var(dst.clone()),
                Closedness::Open,
                crate::valloc::AssignKind::NotAssign,
            )],

            ArrStore { arr, ix, member } => vec![ValLoc::new(
                CompVal::array_elem_val(arr, Value::Arg(ix.clone())),
                member.clone(),
                Closedness::Closed,
                crate::valloc::AssignKind::NotAssign,
            )],

            ArrStoreFuture { arr, ix, member } => vec![ValLoc::new(
                CompVal::array_elem_val(arr, Value::Arg(Arg::Var(ix.clone()))),
                member.clone(),
                Closedness::Closed,
                crate::valloc::AssignKind::NotAssign,
            )],

            ArrCreateAlias { dst, arr, ix } => vec![ValLoc::new(
                CompVal::array_elem_alias(arr, Value::Arg(ix.clone())),
                Arg::Var(dst.clone()),
                Closedness::Open,
                crate::valloc::AssignKind::NotAssign,
            )],

            ArrContains { dst, arr, key } => vec![ValLoc::new(
                CompVal::arr_contains(arr, Value::Arg(key.clone())),
                Arg::Var(dst.clone()),
                Closedness::Closed,
                crate::valloc::AssignKind::NotAssign,
            )],

            ContainerSize { dst, arr } => vec![ValLoc::new(
                CompVal::container_size(arr, false),
                Arg::Var(dst.clone()),
                Closedness::Closed,
                crate::valloc::AssignKind::NotAssign,
            )],

            StructCreateAlias { dst, st, field } => vec![ValLoc::new(
                CompVal::struct_field_alias(st, *field),
                Arg::Var(dst.clone()),
                Closedness::Open,
                crate::valloc::AssignKind::NotAssign,
            )],

            StructRetrieveSub { dst, st, field } => vec![ValLoc::new(
                CompVal::struct_field_val(st, *field),
                Arg::Var(dst.clone()),
                Closedness::Closed,
                crate::valloc::AssignKind::NotAssign,
            )],

            StructCopyOut { dst, st, field } => vec![ValLoc::new(
                CompVal::struct_field_copy(st, *field),
                Arg::Var(dst.clone()),
                Closedness::Open,
                crate::valloc::AssignKind::NotAssign,
            )],

            StructStoreSub { st, field, src } => vec![ValLoc::new(
                CompVal::struct_field_val(st, *field),
                src.clone(),
                Closedness::Closed,
                crate::valloc::AssignKind::NotAssign,
            )],
        }
    }

    /// Inputs of a builtin-op computed value, argument-sorted when the
    /// operator is commutative so structurally equal expressions meet.
    fn cv_inputs(op: BuiltinOp, args: &[Arg]) -> Vec<Value> {
        let mut inputs: Vec<Value> = args.iter().cloned().map(Value::Arg).collect();
        if ops::is_commutative(op) {
            inputs.sort();
        }
        inputs
    }

    /// Alias pairs this instruction creates directly.
    pub fn aliases(&self) -> Vec<(&Var, &Var)> {
        match self {
            Instruction::CopyRef { dst, src } => vec![(dst, src)],
            _ => vec![],
        }
    }

    /// Rename operands through `map`, which returns the replacement for a
    /// variable or `None` to leave it alone. `Reference` mode touches only
    /// locations being written or aliased; `Value` mode touches only reads.
    pub fn rename(&mut self, mode: RenameMode, map: &dyn Fn(&Var) -> Option<Arg>) {
        use Instruction::*;

        let rename_var = |v: &mut Var| {
            if let Some(Arg::Var(replacement)) = map(v) {
                *v = replacement;
            }
        };
        let rename_arg = |a: &mut Arg| {
            if let Arg::Var(v) = a {
                if let Some(replacement) = map(v) {
                    *a = replacement;
                }
            }
        };

        match (mode, self) {
            (RenameMode::Reference, Store { dst, .. }) => rename_var(dst),
            (RenameMode::Value, Store { src, .. }) => rename_arg(src),

            (RenameMode::Reference, Load { dst, .. }) => rename_var(dst),
            (RenameMode::Value, Load { src, .. }) => rename_var(src),

            // Both sides of an alias copy are reference operands: the copy
            // makes writes through dst reach src's storage.
            (RenameMode::Reference, CopyRef { dst, src }) => {
                rename_var(dst);
                rename_var(src);
            }
            (RenameMode::Value, CopyRef { .. }) => {}

            (RenameMode::Reference, LocalOp { dst, .. }) | (RenameMode::Reference, AsyncOp { dst, .. }) => {
                if let Some(dst) = dst {
                    rename_var(dst);
                }
            }
            (RenameMode::Value, LocalOp { args, .. }) | (RenameMode::Value, AsyncOp { args, .. }) => {
                for a in args {
                    rename_arg(a);
                }
            }

            (RenameMode::Reference, ArrRetrieve { dst, .. }) => rename_var(dst),
            (RenameMode::Value, ArrRetrieve { arr, ix, .. }) => {
                rename_var(arr);
                rename_arg(ix);
            }

            (RenameMode::Reference, ArrCopyOut { dst, .. }) => rename_var(dst),
            (RenameMode::Value, ArrCopyOut { arr, ix, .. }) => {
                rename_var(arr);
                rename_var(ix);
            }

            (RenameMode::Reference, ArrStore { arr, .. }) => rename_var(arr),
            (RenameMode::Value, ArrStore { ix, member, .. }) => {
                rename_arg(ix);
                rename_arg(member);
            }

            (RenameMode::Reference, ArrStoreFuture { arr, .. }) => rename_var(arr),
            (RenameMode::Value, ArrStoreFuture { ix, member, .. }) => {
                rename_var(ix);
                rename_arg(member);
            }

            (RenameMode::Reference, ArrCreateAlias { dst, arr, .. }) => {
                rename_var(dst);
                rename_var(arr);
            }
            (RenameMode::Value, ArrCreateAlias { ix, .. }) => rename_arg(ix),

            (RenameMode::Reference, ArrContains { dst, .. }) => rename_var(dst),
            (RenameMode::Value, ArrContains { arr, key, .. }) => {
                rename_var(arr);
                rename_arg(key);
            }

            (RenameMode::Reference, ContainerSize { dst, .. }) => rename_var(dst),
            (RenameMode::Value, ContainerSize { arr, .. }) => rename_var(arr),

            (RenameMode::Reference, StructCreateAlias { dst, st, .. }) => {
                rename_var(dst);
                rename_var(st);
            }
            (RenameMode::Value, StructCreateAlias { .. }) => {}

            (RenameMode::Reference, StructRetrieveSub { dst, .. }) => rename_var(dst),
            (RenameMode::Value, StructRetrieveSub { st, .. }) => rename_var(st),

            (RenameMode::Reference, StructCopyOut { dst, .. }) => rename_var(dst),
            (RenameMode::Value, StructCopyOut { st, .. }) => rename_var(st),

            (RenameMode::Reference, StructStoreSub { st, .. }) => rename_var(st),
            (RenameMode::Value, StructStoreSub { src, .. }) => rename_arg(src),

            (_, Comment(_)) => {}
        }
    }

    /// If every blocking input is closed, report which futures to fetch so
    /// the instruction can run in immediate form.
    pub fn try_make_immediate(&self, is_closed: &dyn Fn(&Var) -> bool) -> Option<ImmediateReq> {
        use Instruction::*;
        match self {
            AsyncOp { dst: Some(_), .. } | ArrStoreFuture { .. } => {
                let blocking = self.required_closed_inputs();
                if !blocking.iter().all(|v| is_closed(v)) {
                    return None;
                }
                Some(ImmediateReq {
                    fetch: blocking.into_iter().cloned().collect(),
                })
            }
            _ => None,
        }
    }

    /// Emit the immediate form, given the fetched value for each requested
    /// future. The caller has already emitted the fetch loads.
    pub fn make_immediate(
        &self,
        fetched: &BTreeMap<Var, Arg>,
        temps: &mut TempCounter,
    ) -> Vec<Instruction> {
        use Instruction::*;
        match self {
            AsyncOp {
                op,
                dst: Some(dst),
                args,
            } => {
                let imm_args: Vec<Arg> = args
                    .iter()
                    .map(|a| match a {
                        Arg::Var(v) => fetched.get(v).cloned().unwrap_or_else(|| a.clone()),
                        other => other.clone(),
                    })
                    .collect();
                let result_ty = dst
                    .ty()
                    .retrieved()
                    .expect("async op destination must be retrievable");
                let result = temps.fresh("optv", result_ty);
                vec![
                    LocalOp {
                        op: *op,
                        dst: Some(result.clone()),
                        args: imm_args,
                    },
                    Store {
                        dst: dst.clone(),
                        src: Arg::Var(result),
                        recursive: false,
                    },
                ]
            }
            ArrStoreFuture { arr, ix, member } => {
                let ix_val = fetched
                    .get(ix)
                    .cloned()
                    .expect("index value must have been fetched");
                vec![ArrStore {
                    arr: arr.clone(),
                    ix: ix_val,
                    member: member.clone(),
                }]
            }
            other => panic!("make_immediate on non-blocking instruction {}", other),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            Comment(text) => write!(f, "# {}", text),
            Store {
                dst,
                src,
                recursive,
            } => write!(
                f,
                "store{} {} <- {}",
                if *recursive { "_rec" } else { "" },
                dst,
                src
            ),
            Load {
                dst,
                src,
                recursive,
            } => write!(
                f,
                "load{} {} <- {}",
                if *recursive { "_rec" } else { "" },
                dst,
                src
            ),
            CopyRef { dst, src } => write!(f, "copy_ref {} <- {}", dst, src),
            LocalOp { op, dst, args } | AsyncOp { op, dst, args } => {
                let prefix = if matches!(self, LocalOp { .. }) {
                    "local"
                } else {
                    "async"
                };
                let args = args.iter().map(|a| a.to_string()).join(", ");
                match dst {
                    Some(dst) => write!(f, "{} {} <- {}({})", prefix, dst, op, args),
                    None => write!(f, "{} {}({})", prefix, op, args),
                }
            }
            ArrRetrieve { dst, arr, ix } => write!(f, "arr_retrieve {} <- {}[{}]", dst, arr, ix),
            ArrCopyOut { dst, arr, ix } => write!(f, "arr_copy_out {} <- {}[{}]", dst, arr, ix),
            ArrStore { arr, ix, member } => write!(f, "arr_store {}[{}] <- {}", arr, ix, member),
            ArrStoreFuture { arr, ix, member } => {
                write!(f, "arr_store_future {}[{}] <- {}", arr, ix, member)
            }
            ArrCreateAlias { dst, arr, ix } => {
                write!(f, "arr_create_alias {} <- {}[{}]", dst, arr, ix)
            }
            ArrContains { dst, arr, key } => {
                write!(f, "arr_contains {} <- {} in {}", dst, key, arr)
            }
            ContainerSize { dst, arr } => write!(f, "container_size {} <- {}", dst, arr),
            StructCreateAlias { dst, st, field } => {
                write!(f, "struct_create_alias {} <- {}.{}", dst, st, field)
            }
            StructRetrieveSub { dst, st, field } => {
                write!(f, "struct_retrieve {} <- {}.{}", dst, st, field)
            }
            StructCopyOut { dst, st, field } => {
                write!(f, "struct_copy_out {} <- {}.{}", dst, st, field)
            }
            StructStoreSub { st, field, src } => {
                write!(f, "struct_store {}.{} <- {}", st, field, src)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ScalarKind, Type};
    use crate::valloc::AssignKind;

    fn int_future(name: &str) -> Var {
        Var::named(name, Type::ScalarFuture(ScalarKind::Int))
    }

    #[test]
    fn store_establishes_both_directions() {
        let x = int_future("x");
        let inst = Instruction::Store {
            dst: x.clone(),
            src: Arg::Int(3),
            recursive: false,
        };
        let results = inst.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].assign, AssignKind::ToLocation);
        assert_eq!(results[0].closedness, Closedness::Closed);
        assert!(results[1].value.as_ref().is_retrieve(false));
        assert_eq!(results[1].location, Arg::Int(3));
    }

    #[test]
    fn commutative_args_are_sorted() {
        let x = int_future("x");
        let y = int_future("y");
        let a = Instruction::AsyncOp {
            op: BuiltinOp::PlusInt,
            dst: Some(int_future("t1")),
            args: vec![Arg::Var(y.clone()), Arg::Var(x.clone())],
        };
        let b = Instruction::AsyncOp {
            op: BuiltinOp::PlusInt,
            dst: Some(int_future("t2")),
            args: vec![Arg::Var(x), Arg::Var(y)],
        };
        assert_eq!(a.results()[0].value, b.results()[0].value);
    }

    #[test]
    fn value_rename_leaves_outputs_alone() {
        let x = int_future("x");
        let y = int_future("y");
        let z = int_future("z");
        let mut inst = Instruction::AsyncOp {
            op: BuiltinOp::PlusInt,
            dst: Some(x.clone()),
            args: vec![Arg::Var(y.clone()), Arg::Int(1)],
        };
        inst.rename(RenameMode::Value, &|v| {
            (*v == y).then(|| Arg::Var(z.clone()))
        });
        match &inst {
            Instruction::AsyncOp { dst, args, .. } => {
                assert_eq!(dst.as_ref().unwrap(), &x);
                assert_eq!(args[0], Arg::Var(z.clone()));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn make_immediate_for_async_op() {
        let a = int_future("a");
        let b = int_future("b");
        let c = int_future("c");
        let inst = Instruction::AsyncOp {
            op: BuiltinOp::PlusInt,
            dst: Some(c.clone()),
            args: vec![Arg::Var(a.clone()), Arg::Var(b.clone())],
        };
        let req = inst.try_make_immediate(&|_| true).unwrap();
        assert_eq!(req.fetch, vec![a.clone(), b.clone()]);

        let mut temps = TempCounter::new();
        let mut fetched = BTreeMap::new();
        let av = Var::named("av", Type::ScalarValue(ScalarKind::Int));
        let bv = Var::named("bv", Type::ScalarValue(ScalarKind::Int));
        fetched.insert(a, Arg::Var(av));
        fetched.insert(b, Arg::Var(bv));
        let imm = inst.make_immediate(&fetched, &mut temps);
        assert_eq!(imm.len(), 2);
        assert!(matches!(imm[0], Instruction::LocalOp { .. }));
        assert!(matches!(imm[1], Instruction::Store { .. }));
    }
}

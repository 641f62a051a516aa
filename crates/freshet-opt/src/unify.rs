// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Joining the facts of conditional branches.
//!
//! Given the parent state and the exited per-branch states of a conditional,
//! compute which facts hold unconditionally afterwards. Closedness survives
//! when every branch established it. A computed value survives when every
//! branch knows a location for it: identical locations promote directly;
//! differing locations get one fresh unifying location written at the end of
//! each branch. Newly unified locations can make further candidates agree,
//! so the whole step runs to a bounded fixpoint. Branches that are not
//! jointly exhaustive guarantee nothing.

use std::collections::BTreeMap;

use log::{debug, trace};

use freshet_ir::{
    copy_op, Arg, AssignKind, Block, Closedness, CompVal, CvRef, GlobalConstants, Instruction,
    ScalarKind, Statement, Storage, TempCounter, Type, ValLoc, Value, Var,
};

use crate::congruences::{Congruences, ScopeSnapshot};
use crate::error::OptResult;

/// Unify branch facts into `state` (the parent scope). Synthesized merge
/// assignments are appended to the branch blocks; the unifying variables
/// created are returned so the caller can declare them in the parent block.
pub fn unify_branches(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    branch_blocks: &mut [&mut Block],
    snapshots: &[ScopeSnapshot],
    exhaustive: bool,
    temps: &mut TempCounter,
) -> OptResult<Vec<Var>> {
    if !exhaustive || snapshots.is_empty() {
        // Facts from a non-exhaustive branch set hold on no path in
        // particular; nothing is guaranteed after the conditional.
        return Ok(vec![]);
    }
    assert_eq!(branch_blocks.len(), snapshots.len());

    unify_closedness(state, snapshots);

    let fuel = state.opts().unify_fuel;
    let mut created = Vec::new();
    // Per-branch substitution: branch-canonical location -> unifying var.
    let mut subs: Vec<BTreeMap<Arg, Arg>> = vec![BTreeMap::new(); snapshots.len()];
    // One unifying location per distinct tuple of per-branch locations.
    let mut reuse: BTreeMap<Vec<Arg>, Var> = BTreeMap::new();

    for round in 0..fuel {
        let progress = unify_values_round(
            state,
            consts,
            branch_blocks,
            snapshots,
            temps,
            &mut subs,
            &mut reuse,
            &mut created,
        )?;
        if !progress {
            break;
        }
        if round + 1 == fuel {
            debug!("branch unifier hit its iteration bound ({})", fuel);
        }
    }
    Ok(created)
}

/// A location is closed after the conditional iff every branch closed it
/// (new information only; already-closed parents stay as they were).
fn unify_closedness(state: &mut Congruences, snapshots: &[ScopeSnapshot]) {
    let (first, rest) = snapshots.split_first().unwrap();

    let mut candidates: Vec<(Var, bool)> = first
        .closed
        .recursively_closed()
        .iter()
        .map(|v| (v.clone(), true))
        .collect();
    candidates.extend(first.closed.closed().iter().map(|v| (v.clone(), false)));

    for (var, recursive) in candidates {
        if declared_in_branches(snapshots, &var) || state.is_closed(&var) && !recursive {
            continue;
        }
        let everywhere_rec = recursive
            && rest
                .iter()
                .all(|s| state.closed.is_recursively_closed_with(&s.closed, &var));
        let everywhere = rest
            .iter()
            .all(|s| state.closed.is_closed_with(&s.closed, &var));
        if everywhere_rec {
            state.mark_closed(&var, true);
        } else if everywhere && !state.is_closed(&var) {
            state.mark_closed(&var, false);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn unify_values_round(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    branch_blocks: &mut [&mut Block],
    snapshots: &[ScopeSnapshot],
    temps: &mut TempCounter,
    subs: &mut [BTreeMap<Arg, Arg>],
    reuse: &mut BTreeMap<Vec<Arg>, Var>,
    created: &mut Vec<Var>,
) -> OptResult<bool> {
    // Index each branch's available values under per-branch normalization,
    // so locations already unified in earlier rounds compare equal.
    let mut indexes: Vec<BTreeMap<Value, Arg>> = Vec::with_capacity(snapshots.len());
    for (i, snap) in snapshots.iter().enumerate() {
        let mut index = BTreeMap::new();
        for cv in snap.values.available_cvs() {
            let Some(Value::Arg(loc)) = state.values.canonical_with(&snap.values, &Value::Cv(cv))
            else {
                continue;
            };
            let normalized = normalize_cv(cv.as_ref(), &subs[i]);
            index.insert(Value::Cv(normalized), loc);
        }
        indexes.push(index);
    }

    let (first_index, other_indexes) = indexes.split_first().unwrap();
    let mut progress = false;

    'candidates: for (key, first_loc) in first_index {
        let cv = &key.cv();
        // New information only: skip values the parent already knows.
        if state.values.try_canonical(key).is_some() {
            continue;
        }

        let mut locs = vec![first_loc.clone()];
        for index in other_indexes {
            match index.get(key) {
                Some(loc) => locs.push(loc.clone()),
                None => continue 'candidates,
            }
        }

        let closedness = common_closedness(state, snapshots, &locs);
        let identical = locs.iter().all(|l| l == &locs[0]);
        if identical && !loc_is_branch_local(snapshots, &locs[0]) {
            trace!("promoting {} at {} from all branches", cv.as_ref(), locs[0]);
            let fact = ValLoc::new(*cv, locs[0].clone(), closedness, AssignKind::NotAssign);
            state.update(consts, &fact)?;
            progress = true;
            continue;
        }

        // Locations differ: funnel every branch into one location. A merge
        // assignment appended by an earlier run of this unifier is reused,
        // keeping the whole step idempotent across walks.
        if let Some(existing) = existing_unifier(branch_blocks, &locs) {
            for (i, loc) in locs.iter().enumerate() {
                subs[i].insert(loc.clone(), Arg::Var(existing.clone()));
            }
            let fact = ValLoc::new(
                *cv,
                Arg::Var(existing),
                closedness.meet(Closedness::Closed),
                AssignKind::NotAssign,
            );
            state.update(consts, &fact)?;
            progress = true;
            continue;
        }
        let Some(unifier) = unifying_var(reuse, temps, &locs, cv) else {
            continue;
        };
        let fresh = !created.contains(&unifier);
        if fresh {
            trace!(
                "unifying {} via {} (branch locations {:?})",
                cv.as_ref(),
                unifier,
                locs
            );
            for (i, loc) in locs.iter().enumerate() {
                branch_blocks[i].push(merge_assignment(&unifier, loc));
                subs[i].insert(loc.clone(), Arg::Var(unifier.clone()));
            }
            created.push(unifier.clone());
        }
        let fact = ValLoc::new(
            *cv,
            Arg::Var(unifier),
            closedness.meet(Closedness::Closed),
            AssignKind::NotAssign,
        );
        state.update(consts, &fact)?;
        progress = true;
    }
    Ok(progress)
}

/// Weakest closedness of the value's location across all branches.
fn common_closedness(
    state: &mut Congruences,
    snapshots: &[ScopeSnapshot],
    locs: &[Arg],
) -> Closedness {
    let mut result = Closedness::RecursivelyClosed;
    for (snap, loc) in snapshots.iter().zip(locs) {
        let branch = match loc {
            Arg::Var(v) if v.ty().is_future() => {
                if state.closed.is_recursively_closed_with(&snap.closed, v) {
                    Closedness::RecursivelyClosed
                } else if state.closed.is_closed_with(&snap.closed, v) {
                    Closedness::Closed
                } else {
                    Closedness::Open
                }
            }
            // Constants and immediate values are always closed.
            _ => Closedness::Closed,
        };
        result = result.meet(branch);
    }
    result
}

fn declared_in_branches(snapshots: &[ScopeSnapshot], var: &Var) -> bool {
    snapshots.iter().any(|s| s.values.declared().contains(var))
}

fn loc_is_branch_local(snapshots: &[ScopeSnapshot], loc: &Arg) -> bool {
    match loc {
        Arg::Var(v) => declared_in_branches(snapshots, v),
        _ => false,
    }
}

/// A unifying location synthesized by a previous run: every branch already
/// ends with a merge assignment from its location into the same variable.
fn existing_unifier(branch_blocks: &[&mut Block], locs: &[Arg]) -> Option<Var> {
    let mut unifier: Option<Var> = None;
    for (block, loc) in branch_blocks.iter().zip(locs) {
        let found = block.statements.iter().rev().find_map(|stmt| {
            let Statement::Instruction(inst) = stmt else {
                return None;
            };
            merge_assignment_target(inst, loc)
        })?;
        match &unifier {
            None => unifier = Some(found),
            Some(u) if *u == found => {}
            Some(_) => return None,
        }
    }
    unifier.filter(|u| u.name().as_str().starts_with("__unif"))
}

/// If `inst` is a merge assignment reading `loc`, its destination.
fn merge_assignment_target(inst: &Instruction, loc: &Arg) -> Option<Var> {
    match inst {
        Instruction::AsyncOp {
            op,
            dst: Some(dst),
            args,
        }
        | Instruction::LocalOp {
            op,
            dst: Some(dst),
            args,
        } if freshet_ir::is_copy(*op) && args.len() == 1 && &args[0] == loc => Some(dst.clone()),
        Instruction::CopyRef { dst, src } if Arg::Var(src.clone()) == *loc => Some(dst.clone()),
        _ => None,
    }
}

/// The unifying location for a tuple of per-branch locations, reused across
/// candidates that resolve to the same tuple. `None` when the location type
/// is one we cannot synthesize a merge assignment for.
fn unifying_var(
    reuse: &mut BTreeMap<Vec<Arg>, Var>,
    temps: &mut TempCounter,
    locs: &[Arg],
    cv: &CvRef,
) -> Option<Var> {
    if let Some(existing) = reuse.get(locs) {
        return Some(existing.clone());
    }
    let ty = merge_type(locs)?;
    let unifier = match cv.as_ref().congruence_kind() {
        freshet_ir::CongruenceKind::Alias => {
            let fresh = temps.fresh("unif", ty);
            Var::new(fresh.name(), fresh.ty().clone(), Storage::Alias)
        }
        freshet_ir::CongruenceKind::Value => temps.fresh("unif", ty),
    };
    reuse.insert(locs.to_vec(), unifier.clone());
    Some(unifier)
}

/// Type of the unifying location; all branch locations must agree on it.
fn merge_type(locs: &[Arg]) -> Option<Type> {
    let ty = locs[0].value_type();
    if !locs.iter().all(|l| l.value_type() == ty) {
        return None;
    }
    match &ty {
        Type::ScalarFuture(_) | Type::ScalarValue(_) => Some(ty),
        Type::Ref(_) => Some(ty),
        // No single-instruction merge assignment for aggregates.
        _ => None,
    }
}

/// The assignment appended to a branch to funnel its location into the
/// unifier: an alias copy for reference-like locations, a value copy
/// otherwise.
fn merge_assignment(unifier: &Var, loc: &Arg) -> Instruction {
    match (unifier.ty(), loc) {
        (Type::Ref(_), Arg::Var(src)) => Instruction::CopyRef {
            dst: unifier.clone(),
            src: src.clone(),
        },
        _ if unifier.storage() == Storage::Alias => Instruction::CopyRef {
            dst: unifier.clone(),
            src: loc.var().clone(),
        },
        (Type::ScalarFuture(kind), _) => Instruction::AsyncOp {
            op: copy_op(*kind),
            dst: Some(unifier.clone()),
            args: vec![loc.clone()],
        },
        (Type::ScalarValue(kind), _) => Instruction::LocalOp {
            op: copy_op(*kind),
            dst: Some(unifier.clone()),
            args: vec![loc.clone()],
        },
        _ => {
            let kind = loc.const_kind().unwrap_or(ScalarKind::Int);
            Instruction::LocalOp {
                op: copy_op(kind),
                dst: Some(unifier.clone()),
                args: vec![loc.clone()],
            }
        }
    }
}

/// Rewrite a computed value's arguments through a substitution, at any
/// depth, re-sorting commutative inputs afterwards.
fn normalize_cv(cv: &CompVal, sub: &BTreeMap<Arg, Arg>) -> CvRef {
    let mut inputs: Vec<Value> = cv
        .inputs
        .iter()
        .map(|input| match input {
            Value::Arg(a) => Value::Arg(sub.get(a).cloned().unwrap_or_else(|| a.clone())),
            Value::Cv(nested) => Value::Cv(normalize_cv(nested.as_ref(), sub)),
        })
        .collect();
    if let freshet_ir::SubOp::Op(op) = cv.subop {
        if freshet_ir::is_commutative(op) {
            inputs.sort();
        }
    }
    cv.substitute_inputs(inputs)
}

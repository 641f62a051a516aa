// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! The value-numbering pass.
//!
//! Two walks over each function's block tree. The first threads a
//! `Congruences` state downward in program order, collecting facts and
//! joining conditional branches through the unifier (which may append merge
//! assignments to branch blocks). The second re-threads a fresh state and
//! rewrites: operands go through the reference and then the value
//! replacement maps, instructions whose value is already available become
//! copies or stores, blocking operations with provably closed inputs switch
//! to immediate form, and statically decided conditionals and no-op waits
//! dissolve into their enclosing block.
//!
//! A contradiction anywhere aborts the pass for the current function only;
//! it is emitted exactly as received.

use std::collections::BTreeMap;

use log::debug;

use freshet_ir::{
    is_copy, is_worker_only, Arg, Block, Conditional, Continuation, ExecTarget, Function,
    GlobalConstants, Instruction, RenameMode, Statement, TempCounter, Value, Var, WaitStmt,
};

use crate::congruences::Congruences;
use crate::error::OptResult;
use crate::options::OptOptions;
use crate::pipeline::FunctionProcessor;
use crate::unify::unify_branches;

pub struct ValueNumbering {
    opts: OptOptions,
}

impl ValueNumbering {
    pub fn new(opts: OptOptions) -> Box<ValueNumbering> {
        Box::new(ValueNumbering { opts })
    }

    fn run(&self, fun: &mut Function, consts: &mut GlobalConstants) -> OptResult<()> {
        let mut state = Congruences::new(self.opts.clone());
        state.declare_vars(&fun.inputs);
        state.declare_vars(&fun.outputs);
        analyze_block(&mut state, consts, &mut fun.body, &mut fun.temps)?;
        state.print_trace_info();
        state.validate();

        let mut state = Congruences::new(self.opts.clone());
        state.declare_vars(&fun.inputs);
        state.declare_vars(&fun.outputs);
        rewrite_block(
            &mut state,
            consts,
            &mut fun.body,
            &mut fun.temps,
            ExecTarget::Control,
        )?;
        state.validate();
        Ok(())
    }
}

impl FunctionProcessor for ValueNumbering {
    fn name(&self) -> String {
        "value_numbering".to_string()
    }

    fn process(&self, fun: &mut Function, consts: &mut GlobalConstants) {
        let saved_body = fun.body.clone();
        let saved_temps = fun.temps.clone();
        if let Err(contradiction) = self.run(fun, consts) {
            // Function-scoped recovery: emit the function as received.
            debug!(
                "value numbering aborted for {}: {}",
                fun.name, contradiction
            );
            fun.body = saved_body;
            fun.temps = saved_temps;
        }
    }
}

// ---------------------------------------------------------------------------
// Walk one: analysis.

fn analyze_block(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    block: &mut Block,
    temps: &mut TempCounter,
) -> OptResult<()> {
    let Block {
        vars,
        statements,
        continuations,
    } = block;
    state.declare_vars(vars);

    for (idx, stmt) in statements.iter_mut().enumerate() {
        match stmt {
            Statement::Instruction(inst) => state.update_instruction(consts, inst, idx)?,
            Statement::Conditional(cond) => {
                let created = analyze_conditional(state, consts, cond, temps)?;
                vars.extend(created);
            }
        }
    }
    for cont in continuations.iter_mut() {
        analyze_continuation(state, consts, cont, temps)?;
    }
    Ok(())
}

fn analyze_conditional(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    cond: &mut Conditional,
    temps: &mut TempCounter,
) -> OptResult<Vec<Var>> {
    let exhaustive = cond.is_exhaustive();
    let mut snapshots = Vec::new();
    let mut branches = cond.branches_mut();
    for branch in branches.iter_mut() {
        state.enter_scope(true);
        analyze_block(state, consts, branch, temps)?;
        snapshots.push(state.exit_scope());
    }
    let created = unify_branches(state, consts, &mut branches, &snapshots, exhaustive, temps)?;
    state.declare_vars(&created);
    Ok(created)
}

fn analyze_continuation(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    cont: &mut Continuation,
    temps: &mut TempCounter,
) -> OptResult<()> {
    state.enter_scope(cont.inherits_parent_vars());
    match cont {
        Continuation::Wait(w) => {
            // Inside the body the waited-on futures are closed.
            for v in &w.wait_vars {
                state.mark_closed(v, w.recursive);
            }
            analyze_block(state, consts, &mut w.block, temps)?;
        }
        Continuation::RangeLoop(l) => {
            analyze_block(state, consts, &mut l.block, temps)?;
        }
    }
    state.exit_scope();
    Ok(())
}

// ---------------------------------------------------------------------------
// Walk two: rewriting.

enum Simplified {
    Instructions {
        insts: Vec<Instruction>,
        new_vars: Vec<Var>,
    },
    Dispatch {
        wait: WaitStmt,
    },
}

fn rewrite_block(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    block: &mut Block,
    temps: &mut TempCounter,
    ctx: ExecTarget,
) -> OptResult<()> {
    let Block {
        vars,
        statements,
        continuations,
    } = block;
    state.declare_vars(vars);

    let mut out: Vec<Statement> = Vec::with_capacity(statements.len());
    let mut hoisted: Vec<Continuation> = Vec::new();

    for (idx, stmt) in statements.drain(..).enumerate() {
        match stmt {
            Statement::Instruction(mut inst) => {
                // References first, then values; the two relations must not
                // be conflated.
                inst.rename(RenameMode::Reference, &|v| state.alias_replacement(v));
                inst.rename(RenameMode::Value, &|v| state.value_replacement(v));
                match try_simplify(state, consts, &inst, temps, ctx)? {
                    Some(Simplified::Instructions { insts, new_vars }) => {
                        state.declare_vars(&new_vars);
                        vars.extend(new_vars);
                        for new_inst in insts {
                            state.update_instruction(consts, &new_inst, idx)?;
                            out.push(Statement::Instruction(new_inst));
                        }
                    }
                    Some(Simplified::Dispatch { wait }) => {
                        // The dispatched body runs asynchronously; only the
                        // original (non-closing) facts survive here.
                        state.update_instruction(consts, &inst, idx)?;
                        hoisted.push(Continuation::Wait(wait));
                    }
                    None => {
                        state.update_instruction(consts, &inst, idx)?;
                        out.push(Statement::Instruction(inst));
                    }
                }
            }
            Statement::Conditional(cond) => {
                rewrite_conditional(
                    state,
                    consts,
                    cond,
                    temps,
                    ctx,
                    vars,
                    &mut out,
                    &mut hoisted,
                )?;
            }
        }
    }
    *statements = out;

    let pending = std::mem::take(continuations);
    for mut cont in pending {
        let dissolve = match &cont {
            Continuation::Wait(w) => {
                w.target == ExecTarget::Here && w.wait_vars.iter().all(|v| state.is_closed(v))
            }
            _ => false,
        };
        if dissolve {
            let Continuation::Wait(mut w) = cont else {
                unreachable!()
            };
            debug!("dissolving no-op wait");
            rewrite_block(state, consts, &mut w.block, temps, ctx)?;
            vars.append(&mut w.block.vars);
            statements.append(&mut w.block.statements);
            continuations.append(&mut w.block.continuations);
            continue;
        }

        let body_ctx = match &cont {
            Continuation::Wait(w) => {
                if w.target == ExecTarget::Here {
                    ctx
                } else {
                    w.target
                }
            }
            Continuation::RangeLoop(l) => {
                if l.parallel {
                    ExecTarget::Control
                } else {
                    ctx
                }
            }
        };
        state.enter_scope(cont.inherits_parent_vars());
        match &mut cont {
            Continuation::Wait(w) => {
                for v in &w.wait_vars {
                    state.mark_closed(v, w.recursive);
                }
                rewrite_block(state, consts, &mut w.block, temps, body_ctx)?;
            }
            Continuation::RangeLoop(l) => {
                rewrite_block(state, consts, &mut l.block, temps, body_ctx)?;
            }
        }
        state.exit_scope();
        continuations.push(cont);
    }
    continuations.append(&mut hoisted);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn rewrite_conditional(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    cond: Conditional,
    temps: &mut TempCounter,
    ctx: ExecTarget,
    vars: &mut Vec<Var>,
    out: &mut Vec<Statement>,
    hoisted: &mut Vec<Continuation>,
) -> OptResult<()> {
    // A conditional whose subject is statically known collapses to the
    // branch that will run.
    if let Some(value) = state.known_value(cond.subject()) {
        if let Some(choice) = cond.predict(&value) {
            debug!("conditional decided statically: {:?}", value);
            if let Some(ix) = choice {
                let mut branch = take_branch(cond, ix);
                rewrite_block(state, consts, &mut branch, temps, ctx)?;
                vars.append(&mut branch.vars);
                out.extend(branch.statements.drain(..));
                hoisted.append(&mut branch.continuations);
            }
            return Ok(());
        }
    }

    let mut cond = cond;
    let exhaustive = cond.is_exhaustive();
    let mut snapshots = Vec::new();
    {
        let mut branches = cond.branches_mut();
        for branch in branches.iter_mut() {
            state.enter_scope(true);
            rewrite_block(state, consts, branch, temps, ctx)?;
            snapshots.push(state.exit_scope());
        }
        let created = unify_branches(state, consts, &mut branches, &snapshots, exhaustive, temps)?;
        state.declare_vars(&created);
        vars.extend(created);
    }
    out.push(Statement::Conditional(cond));
    Ok(())
}

fn take_branch(cond: Conditional, ix: usize) -> Block {
    match cond {
        Conditional::If {
            then_block,
            else_block,
            ..
        } => {
            if ix == 0 {
                then_block
            } else {
                else_block.expect("predicted a missing else branch")
            }
        }
        Conditional::Switch {
            mut cases, default, ..
        } => {
            if ix < cases.len() {
                cases.swap_remove(ix).1
            } else {
                default.expect("predicted a missing default branch")
            }
        }
    }
}

/// Try to replace one (renamed) instruction with something cheaper: a copy
/// or store when its computed value is already available, or the immediate
/// form when its blocking inputs are provably closed.
fn try_simplify(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    inst: &Instruction,
    temps: &mut TempCounter,
    ctx: ExecTarget,
) -> OptResult<Option<Simplified>> {
    if let Some(insts) = try_replace_computed(state, consts, inst) {
        return Ok(Some(Simplified::Instructions {
            insts,
            new_vars: vec![],
        }));
    }

    if !state.opts().make_immediate {
        return Ok(None);
    }
    let Some(req) = inst.try_make_immediate(&|v| state.is_closed(v)) else {
        return Ok(None);
    };

    let mut insts = Vec::new();
    let mut new_vars = Vec::new();
    let mut fetched = BTreeMap::new();
    for future in req.fetch {
        let Some(val_ty) = future.ty().retrieved() else {
            return Ok(None);
        };
        let fetch_var = temps.fresh("fetch", val_ty);
        insts.push(Instruction::Load {
            dst: fetch_var.clone(),
            src: future.clone(),
            recursive: false,
        });
        new_vars.push(fetch_var.clone());
        fetched.insert(future, Arg::Var(fetch_var));
    }
    let before = insts.len();
    insts.extend(inst.make_immediate(&fetched, temps));
    for imm in &insts[before..] {
        for output in imm.outputs() {
            if !new_vars.contains(output) && output.name().as_str().starts_with("__optv") {
                new_vars.push(output.clone());
            }
        }
    }
    debug!("switched to immediate form: {}", inst);

    let heavy = matches!(inst, Instruction::AsyncOp { op, .. } if is_worker_only(*op));
    if heavy && ctx == ExecTarget::Control {
        // The immediate form must run on a worker; dispatch it.
        let mut block = Block::new();
        block.vars = new_vars;
        block.statements = insts.into_iter().map(Statement::Instruction).collect();
        let wait = WaitStmt {
            wait_vars: vec![],
            recursive: false,
            target: ExecTarget::Worker,
            block,
        };
        return Ok(Some(Simplified::Dispatch { wait }));
    }
    Ok(Some(Simplified::Instructions { insts, new_vars }))
}

/// If the instruction's computed value already has a canonical location (or
/// folds to a constant), produce the cheaper equivalent.
fn try_replace_computed(
    state: &mut Congruences,
    consts: &mut GlobalConstants,
    inst: &Instruction,
) -> Option<Vec<Instruction>> {
    match inst {
        Instruction::Comment(_)
        | Instruction::Store { .. }
        | Instruction::CopyRef { .. } => return None,
        Instruction::LocalOp { op, .. } | Instruction::AsyncOp { op, .. } if is_copy(*op) => {
            return None
        }
        _ => {}
    }
    let outputs = inst.outputs();
    let [dst] = outputs.as_slice() else {
        return None;
    };
    let dst = (*dst).clone();

    let fact = inst
        .results()
        .into_iter()
        .find(|vl| vl.location == Arg::Var(dst.clone()))?;
    let alias_flavored = fact.kind() == freshet_ir::CongruenceKind::Alias;

    let opts = state.opts().clone();
    let canon = state.values.canonicalize(fact.value, Some(consts), &opts);

    let available = match &canon {
        Value::Arg(a) => Some(a.clone()),
        Value::Cv(cv) => match state.values.try_canonical(&canon) {
            Some(Value::Arg(a)) => Some(a),
            _ => {
                // A fold may have produced the assign shape directly.
                if cv.as_ref().op.is_assign(true) && dst.ty().is_future() {
                    match cv.as_ref().input(0) {
                        Value::Arg(c) if c.is_const() => {
                            return Some(vec![Instruction::Store {
                                dst,
                                src: c.clone(),
                                recursive: cv.as_ref().op.is_recursive_assign(),
                            }]);
                        }
                        _ => None,
                    }
                } else {
                    None
                }
            }
        },
    };

    let src = available?;
    if src == Arg::Var(dst.clone()) {
        return None;
    }
    if let Arg::Var(v) = &src {
        if !state.values.is_accessible(v) {
            return None;
        }
    }
    let replacement = copy_instruction(&dst, src, alias_flavored)?;
    debug!("replacing {} with {}", inst, replacement);
    Some(vec![replacement])
}

/// The cheapest instruction making `dst` hold `src`'s value (or alias it).
fn copy_instruction(dst: &Var, src: Arg, alias_flavored: bool) -> Option<Instruction> {
    if alias_flavored {
        let Arg::Var(src) = src else { return None };
        return Some(Instruction::CopyRef {
            dst: dst.clone(),
            src,
        });
    }
    if dst.ty().is_future() {
        if src.is_const() {
            return Some(Instruction::Store {
                dst: dst.clone(),
                src,
                recursive: false,
            });
        }
        let kind = dst.ty().scalar_kind()?;
        return Some(Instruction::AsyncOp {
            op: freshet_ir::copy_op(kind),
            dst: Some(dst.clone()),
            args: vec![src],
        });
    }
    let kind = dst.ty().scalar_kind()?;
    Some(Instruction::LocalOp {
        op: freshet_ir::copy_op(kind),
        dst: Some(dst.clone()),
        args: vec![src],
    })
}

// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests for the value-numbering pass over whole functions.

use freshet_ir::{
    Arg, Block, BuiltinOp, Conditional, Continuation, ExecTarget, Function, GlobalConstants,
    Instruction, Program, ScalarKind, Statement, Type, Var, WaitStmt,
};
use freshet_opt::{OptOptions, OptPipeline};

fn int_future(name: &str) -> Var {
    Var::named(name, Type::ScalarFuture(ScalarKind::Int))
}

fn int_value(name: &str) -> Var {
    Var::named(name, Type::ScalarValue(ScalarKind::Int))
}

fn float_future(name: &str) -> Var {
    Var::named(name, Type::ScalarFuture(ScalarKind::Float))
}

fn bool_value(name: &str) -> Var {
    Var::named(name, Type::ScalarValue(ScalarKind::Bool))
}

fn run_with(fun: Function, opts: OptOptions) -> (Function, GlobalConstants) {
    let mut program = Program {
        functions: vec![fun],
        consts: GlobalConstants::new(),
    };
    OptPipeline::standard(opts).run(&mut program);
    let fun = program.functions.pop().unwrap();
    (fun, program.consts)
}

fn run(fun: Function) -> (Function, GlobalConstants) {
    run_with(fun, OptOptions::default())
}

fn instructions(block: &Block) -> Vec<&Instruction> {
    block
        .statements
        .iter()
        .filter_map(|s| match s {
            Statement::Instruction(inst) => Some(inst),
            _ => None,
        })
        .collect()
}

fn store(dst: &Var, value: i64) -> Instruction {
    Instruction::Store {
        dst: dst.clone(),
        src: Arg::Int(value),
        recursive: false,
    }
}

fn async_plus(dst: &Var, a: Arg, b: Arg) -> Instruction {
    Instruction::AsyncOp {
        op: BuiltinOp::PlusInt,
        dst: Some(dst.clone()),
        args: vec![a, b],
    }
}

#[test]
fn async_op_over_stored_constants_becomes_store() {
    let (x, y, z) = (int_future("x"), int_future("y"), int_future("z"));
    let mut body = Block::new();
    body.vars = vec![x.clone(), y.clone(), z.clone()];
    body.push(store(&x, 3));
    body.push(store(&y, 4));
    body.push(async_plus(&z, Arg::Var(x.clone()), Arg::Var(y.clone())));

    let (fun, consts) = run(Function::new("f", vec![], vec![], body));

    let insts = instructions(&fun.body);
    assert_eq!(insts.len(), 3);
    assert_eq!(
        insts[2],
        &Instruction::Store {
            dst: z,
            src: Arg::Int(7),
            recursive: false,
        }
    );
    // The folded result went through the shared constant pool.
    assert!(consts.lookup_by_val(&Arg::Int(7)).is_some());
}

#[test]
fn redundant_computation_becomes_copy() {
    let (x, y) = (int_future("x"), int_future("y"));
    let (t1, t2) = (int_future("t1"), int_future("t2"));
    let mut body = Block::new();
    body.vars = vec![t1.clone(), t2.clone()];
    body.push(async_plus(&t1, Arg::Var(x.clone()), Arg::Var(y.clone())));
    // Same value, commutated argument order.
    body.push(async_plus(&t2, Arg::Var(y.clone()), Arg::Var(x.clone())));

    let (fun, _) = run(Function::new("f", vec![x, y], vec![], body));

    let insts = instructions(&fun.body);
    assert_eq!(insts.len(), 2);
    assert!(matches!(insts[0], Instruction::AsyncOp { op: BuiltinOp::PlusInt, .. }));
    assert_eq!(
        insts[1],
        &Instruction::AsyncOp {
            op: BuiltinOp::CopyInt,
            dst: Some(t2),
            args: vec![Arg::Var(t1)],
        }
    );

    // The rewritten function is a fixed point of the pass.
    let rewritten = fun.body.clone();
    let (again, _) = run(fun);
    assert_eq!(again.body, rewritten);
}

#[test]
fn exhaustive_branches_unify_through_a_fresh_location() {
    let x = int_future("x");
    let c = bool_value("c");
    let (t1, t2, t3) = (int_future("t1"), int_future("t2"), int_future("t3"));

    let mut then_block = Block::new();
    then_block.vars = vec![t1.clone()];
    then_block.push(async_plus(&t1, Arg::Var(x.clone()), Arg::Int(1)));

    let mut else_block = Block::new();
    else_block.vars = vec![t2.clone()];
    else_block.push(async_plus(&t2, Arg::Var(x.clone()), Arg::Int(1)));

    let mut body = Block::new();
    body.vars = vec![t3.clone()];
    body.statements.push(Statement::Conditional(Conditional::If {
        cond: Arg::Var(c.clone()),
        then_block,
        else_block: Some(else_block),
    }));
    body.push(async_plus(&t3, Arg::Var(x.clone()), Arg::Int(1)));

    let (fun, _) = run(Function::new("f", vec![x, c], vec![], body));

    // Each branch gained exactly one merge assignment into the same fresh
    // unifying location.
    let Statement::Conditional(Conditional::If {
        then_block,
        else_block,
        ..
    }) = &fun.body.statements[0]
    else {
        panic!("conditional disappeared");
    };
    let then_insts = instructions(then_block);
    let else_insts = instructions(else_block.as_ref().unwrap());
    assert_eq!(then_insts.len(), 2);
    assert_eq!(else_insts.len(), 2);

    let unifier_of = |inst: &Instruction, from: &Var| match inst {
        Instruction::AsyncOp {
            op: BuiltinOp::CopyInt,
            dst: Some(dst),
            args,
        } if args == &vec![Arg::Var(from.clone())] => dst.clone(),
        other => panic!("expected merge copy from {}, got {}", from, other),
    };
    let u_then = unifier_of(then_insts[1], &t1);
    let u_else = unifier_of(else_insts[1], &t2);
    assert_eq!(u_then, u_else);
    assert!(u_then.name().as_str().starts_with("__unif"));
    assert!(fun.body.vars.contains(&u_then));

    // After the conditional the expression is available in the unifier.
    let insts = instructions(&fun.body);
    assert_eq!(
        insts[0],
        &Instruction::AsyncOp {
            op: BuiltinOp::CopyInt,
            dst: Some(t3),
            args: vec![Arg::Var(u_then)],
        }
    );
}

#[test]
fn exhausted_unifier_fuel_costs_optimizations_not_correctness() {
    let x = int_future("x");
    let c = bool_value("c");
    let (t1, t2, t3) = (int_future("t1"), int_future("t2"), int_future("t3"));

    let mut then_block = Block::new();
    then_block.vars = vec![t1.clone()];
    then_block.push(async_plus(&t1, Arg::Var(x.clone()), Arg::Int(1)));
    let mut else_block = Block::new();
    else_block.vars = vec![t2.clone()];
    else_block.push(async_plus(&t2, Arg::Var(x.clone()), Arg::Int(1)));

    let mut body = Block::new();
    body.vars = vec![t3.clone()];
    body.statements.push(Statement::Conditional(Conditional::If {
        cond: Arg::Var(c.clone()),
        then_block,
        else_block: Some(else_block),
    }));
    body.push(async_plus(&t3, Arg::Var(x.clone()), Arg::Int(1)));

    let opts = OptOptions {
        unify_fuel: 0,
        ..OptOptions::default()
    };
    let (fun, _) = run_with(Function::new("f", vec![x.clone(), c], vec![], body), opts);

    // No merge assignments were synthesized and the expression after the
    // conditional is recomputed; the output is merely less optimized.
    let Statement::Conditional(Conditional::If {
        then_block,
        else_block,
        ..
    }) = &fun.body.statements[0]
    else {
        panic!("conditional disappeared");
    };
    assert_eq!(instructions(then_block).len(), 1);
    assert_eq!(instructions(else_block.as_ref().unwrap()).len(), 1);
    let insts = instructions(&fun.body);
    assert_eq!(
        insts[0],
        &Instruction::AsyncOp {
            op: BuiltinOp::PlusInt,
            dst: Some(t3),
            args: vec![Arg::Var(x), Arg::Int(1)],
        }
    );
}

#[test]
fn non_exhaustive_branch_promotes_nothing() {
    let x = int_future("x");
    let c = bool_value("c");
    let (t1, t3) = (int_future("t1"), int_future("t3"));

    let mut then_block = Block::new();
    then_block.vars = vec![t1.clone()];
    then_block.push(async_plus(&t1, Arg::Var(x.clone()), Arg::Int(1)));

    let mut body = Block::new();
    body.vars = vec![t3.clone()];
    body.statements.push(Statement::Conditional(Conditional::If {
        cond: Arg::Var(c.clone()),
        then_block,
        else_block: None,
    }));
    body.push(async_plus(&t3, Arg::Var(x.clone()), Arg::Int(1)));

    let (fun, _) = run(Function::new("f", vec![x.clone(), c], vec![], body));

    let Statement::Conditional(Conditional::If { then_block, .. }) = &fun.body.statements[0]
    else {
        panic!("conditional disappeared");
    };
    // No merge assignment was appended.
    assert_eq!(instructions(then_block).len(), 1);
    // And the expression after the conditional was recomputed, not copied.
    let insts = instructions(&fun.body);
    assert_eq!(
        insts[0],
        &Instruction::AsyncOp {
            op: BuiltinOp::PlusInt,
            dst: Some(t3),
            args: vec![Arg::Var(x), Arg::Int(1)],
        }
    );
}

#[test]
fn statically_decided_conditional_collapses() {
    let cb = bool_value("cb");
    let t = int_future("t");

    let mut then_block = Block::new();
    then_block.push(store(&t, 1));
    let mut else_block = Block::new();
    else_block.push(store(&t, 2));

    let mut body = Block::new();
    body.vars = vec![cb.clone(), t.clone()];
    body.push(Instruction::LocalOp {
        op: BuiltinOp::CopyBool,
        dst: Some(cb.clone()),
        args: vec![Arg::Bool(true)],
    });
    body.statements.push(Statement::Conditional(Conditional::If {
        cond: Arg::Var(cb),
        then_block,
        else_block: Some(else_block),
    }));

    let (fun, _) = run(Function::new("f", vec![], vec![], body));

    // The conditional is gone; only the taken branch's store remains.
    assert!(fun
        .body
        .statements
        .iter()
        .all(|s| matches!(s, Statement::Instruction(_))));
    let insts = instructions(&fun.body);
    assert_eq!(insts.len(), 2);
    assert_eq!(insts[1], &store(&t, 1));
}

#[test]
fn contradiction_aborts_the_function_only() {
    let x = int_future("x");
    let mut body = Block::new();
    body.vars = vec![x.clone()];
    body.push(store(&x, 5));
    body.push(store(&x, 7));

    let original = body.clone();
    let (fun, _) = run(Function::new("f", vec![], vec![], body));

    // Emitted exactly as received.
    assert_eq!(fun.body, original);
}

#[test]
fn blocking_op_in_wait_switches_to_immediate_form() {
    let (x, y, z) = (int_future("x"), int_future("y"), int_future("z"));

    let mut wait_body = Block::new();
    wait_body.push(async_plus(&z, Arg::Var(x.clone()), Arg::Var(y.clone())));

    let mut body = Block::new();
    body.vars = vec![z.clone()];
    body.continuations.push(Continuation::Wait(WaitStmt {
        wait_vars: vec![x.clone(), y.clone()],
        recursive: false,
        target: ExecTarget::Here,
        block: wait_body,
    }));

    let (fun, _) = run(Function::new("f", vec![x.clone(), y.clone()], vec![], body));

    // The wait remains (its inputs are not closed outside), but the body
    // now fetches both values and computes synchronously.
    assert_eq!(fun.body.continuations.len(), 1);
    let Continuation::Wait(wait) = &fun.body.continuations[0] else {
        panic!("wait disappeared");
    };
    let insts = instructions(&wait.block);
    assert_eq!(insts.len(), 4);
    assert!(
        matches!(insts[0], Instruction::Load { src, .. } if *src == x),
        "expected a fetch of x, got {}",
        insts[0]
    );
    assert!(matches!(insts[1], Instruction::Load { src, .. } if *src == y));
    assert!(matches!(
        insts[2],
        Instruction::LocalOp {
            op: BuiltinOp::PlusInt,
            dst: Some(_),
            ..
        }
    ));
    assert!(matches!(insts[3], Instruction::Store { dst, .. } if *dst == z));
}

#[test]
fn heavy_immediate_form_is_dispatched_to_a_worker() {
    let (x, y) = (float_future("x"), float_future("y"));

    let mut wait_body = Block::new();
    wait_body.push(Instruction::AsyncOp {
        op: BuiltinOp::Sqrt,
        dst: Some(y.clone()),
        args: vec![Arg::Var(x.clone())],
    });

    let mut body = Block::new();
    body.continuations.push(Continuation::Wait(WaitStmt {
        wait_vars: vec![x.clone()],
        recursive: false,
        target: ExecTarget::Here,
        block: wait_body,
    }));

    let (fun, _) = run(Function::new("f", vec![x], vec![y], body));

    let Continuation::Wait(outer) = &fun.body.continuations[0] else {
        panic!("outer wait disappeared");
    };
    // The immediate form landed in a worker-targeted wait.
    assert!(instructions(&outer.block).is_empty());
    assert_eq!(outer.block.continuations.len(), 1);
    let Continuation::Wait(dispatch) = &outer.block.continuations[0] else {
        panic!("expected a dispatch continuation");
    };
    assert_eq!(dispatch.target, ExecTarget::Worker);
    assert!(dispatch.wait_vars.is_empty());
    let insts = instructions(&dispatch.block);
    assert_eq!(insts.len(), 3);
    assert!(matches!(insts[0], Instruction::Load { .. }));
    assert!(matches!(
        insts[1],
        Instruction::LocalOp {
            op: BuiltinOp::Sqrt,
            ..
        }
    ));
    assert!(matches!(insts[2], Instruction::Store { .. }));
}

#[test]
fn no_op_wait_dissolves_into_the_block() {
    let x = int_future("x");
    let v = int_value("v");

    let mut wait_body = Block::new();
    wait_body.vars = vec![v.clone()];
    wait_body.push(Instruction::Load {
        dst: v.clone(),
        src: x.clone(),
        recursive: false,
    });

    let mut body = Block::new();
    body.vars = vec![x.clone()];
    body.push(store(&x, 3));
    body.continuations.push(Continuation::Wait(WaitStmt {
        wait_vars: vec![x.clone()],
        recursive: false,
        target: ExecTarget::Here,
        block: wait_body,
    }));

    let (fun, _) = run(Function::new("f", vec![], vec![], body));

    assert!(fun.body.continuations.is_empty());
    let insts = instructions(&fun.body);
    assert_eq!(insts.len(), 2);
    // The load of a known constant became a local copy.
    assert_eq!(
        insts[1],
        &Instruction::LocalOp {
            op: BuiltinOp::CopyInt,
            dst: Some(v),
            args: vec![Arg::Int(3)],
        }
    );
    assert!(fun.body.vars.contains(&int_value("v")));
}

#[test]
fn unpassable_replacement_stays_out_of_dispatched_bodies() {
    let elem = Type::ScalarFuture(ScalarKind::Int);
    let arr = Var::named("arr", Type::Array(Box::new(elem.clone())));
    let av1 = Var::named("av1", Type::ArrayValue(Box::new(elem.clone())));
    let av2 = Var::named("av2", Type::ArrayValue(Box::new(elem.clone())));
    let e = int_future("e");

    let build = |target: ExecTarget| {
        let mut inner = Block::new();
        inner.vars = vec![e.clone()];
        inner.push(Instruction::ArrRetrieve {
            dst: e.clone(),
            arr: av2.clone(),
            ix: Arg::Int(0),
        });
        let mut body = Block::new();
        body.vars = vec![av1.clone(), av2.clone()];
        body.push(Instruction::Load {
            dst: av1.clone(),
            src: arr.clone(),
            recursive: false,
        });
        body.push(Instruction::Load {
            dst: av2.clone(),
            src: arr.clone(),
            recursive: false,
        });
        body.continuations.push(Continuation::Wait(WaitStmt {
            wait_vars: vec![],
            recursive: false,
            target,
            block: inner,
        }));
        Function::new("f", vec![arr.clone()], vec![], body)
    };

    // Dispatched to a worker: av1 is congruent to av2 but cannot cross the
    // task boundary, so the operand must not be renamed.
    let (fun, _) = run(build(ExecTarget::Worker));
    let Continuation::Wait(wait) = &fun.body.continuations[0] else {
        panic!("wait disappeared");
    };
    let insts = instructions(&wait.block);
    assert!(
        matches!(insts[0], Instruction::ArrRetrieve { arr, .. } if *arr == av2),
        "unpassable replacement leaked into a dispatched body"
    );

    // Same shape run inline: the rename is fine there (the wait dissolves
    // because it has nothing to wait for).
    let (fun, _) = run(build(ExecTarget::Here));
    assert!(fun.body.continuations.is_empty());
    let insts = instructions(&fun.body);
    assert!(
        matches!(insts.last().unwrap(), Instruction::ArrRetrieve { arr, .. } if *arr == av1)
    );
}

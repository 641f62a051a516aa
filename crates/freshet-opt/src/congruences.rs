// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! The per-scope state the optimizer threads through a function.
//!
//! `Congruences` composes the two congruence sets - alias and value - with
//! the closedness tracker. Alias information always feeds into value
//! information (aliasing is the strictly finer relation), never the other
//! way. A contradiction while updating aborts optimization of the current
//! function only; the caller emits it unoptimized and moves on.

use log::trace;

use freshet_ir::{
    Arg, CompVal, CongruenceKind, GlobalConstants, Instruction, ValLoc, Value, Var,
};

use crate::algebra;
use crate::closedness::{ClosedScope, ClosedTracker};
use crate::congruent_set::{CongruentScope, CongruentSet};
use crate::error::OptResult;
use crate::options::OptOptions;

/// The facts a child scope left behind when it was exited. Consulted by the
/// branch unifier; never written.
#[derive(Debug, Clone)]
pub struct ScopeSnapshot {
    pub values: CongruentScope,
    pub aliases: CongruentScope,
    pub closed: ClosedScope,
}

#[derive(Debug, Clone)]
pub struct Congruences {
    pub(crate) values: CongruentSet,
    pub(crate) aliases: CongruentSet,
    pub(crate) closed: ClosedTracker,
    opts: OptOptions,
}

impl Congruences {
    pub fn new(opts: OptOptions) -> Congruences {
        Congruences {
            values: CongruentSet::new(CongruenceKind::Value),
            aliases: CongruentSet::new(CongruenceKind::Alias),
            closed: ClosedTracker::new(),
            opts,
        }
    }

    pub fn opts(&self) -> &OptOptions {
        &self.opts
    }

    /// Enter a nested scope. When `inherits_parent_vars` is false (an
    /// asynchronously dispatched body), locations that cannot cross the
    /// task boundary stop being eligible replacements inside the child.
    pub fn enter_scope(&mut self, inherits_parent_vars: bool) {
        self.values.push_scope(inherits_parent_vars);
        self.aliases.push_scope(inherits_parent_vars);
        self.closed.push_scope();
    }

    pub fn exit_scope(&mut self) -> ScopeSnapshot {
        ScopeSnapshot {
            values: self.values.pop_scope(),
            aliases: self.aliases.pop_scope(),
            closed: self.closed.pop_scope(),
        }
    }

    pub fn declare_vars(&mut self, vars: &[Var]) {
        self.values.var_declarations(vars);
        self.aliases.var_declarations(vars);
    }

    /// Apply every fact established by one instruction, in order.
    pub fn update_instruction(
        &mut self,
        consts: &mut GlobalConstants,
        inst: &Instruction,
        stmt_index: usize,
    ) -> OptResult<()> {
        trace!("update[{}]: {}", stmt_index, inst);
        for (a, b) in inst.aliases() {
            let pair = ValLoc::alias_of(a, Arg::Var(b.clone()));
            self.update(consts, &pair)?;
        }
        for vl in inst.results() {
            self.update(consts, &vl)?;
        }
        Ok(())
    }

    /// Apply one value-location fact: alias set first for alias-flavored
    /// values, closedness on the alias-canonical location, then the value
    /// set (through full canonicalization) regardless of flavor.
    pub fn update(&mut self, consts: &mut GlobalConstants, vl: &ValLoc) -> OptResult<()> {
        if vl.kind() == CongruenceKind::Alias {
            let canon = self.aliases.canonicalize(vl.value, None, &self.opts);
            self.aliases
                .record(canon, &vl.location, None, &self.opts)?;
        }

        if vl.closedness.is_closed() {
            if let Arg::Var(_) = &vl.location {
                let rep = self.alias_rep_var(&vl.location);
                if rep.ty().is_future() {
                    self.closed.mark_closed(
                        &rep,
                        vl.closedness.is_recursive(),
                        self.opts.reordering_frozen,
                    );
                }
            }
        }

        let canon = self.values.canonicalize(vl.value, Some(&mut *consts), &self.opts);
        self.values
            .record(canon.clone(), &vl.location, Some(&mut *consts), &self.opts)?;

        self.record_assign_inverse(consts, &canon, &vl.location)?;

        if self.opts.algebra {
            self.apply_algebra(consts, &canon, &vl.location)?;
        }
        Ok(())
    }

    /// An assign-shaped value with a known stored argument also tells us
    /// what retrieving the location yields; record the converse so stores
    /// and retrieves meet in one set.
    fn record_assign_inverse(
        &mut self,
        consts: &mut GlobalConstants,
        canon: &Value,
        location: &Arg,
    ) -> OptResult<()> {
        let Value::Cv(cv) = canon else { return Ok(()) };
        if !cv.as_ref().op.is_assign(true) || cv.as_ref().inputs.len() != 1 {
            return Ok(());
        }
        let Value::Arg(stored) = cv.as_ref().input(0) else {
            return Ok(());
        };
        let loc_canon = self.values.find_canonical(&Value::Arg(location.clone()));
        let Value::Arg(Arg::Var(loc_var)) = &loc_canon else {
            return Ok(());
        };
        let recursive = cv.as_ref().op.is_recursive_assign();
        let Some(retrieve) = CompVal::retrieve(loc_var, recursive) else {
            return Ok(());
        };
        let canon_retrieve = self.values.canonicalize(retrieve, Some(&mut *consts), &self.opts);
        self.values
            .record(canon_retrieve, stored, Some(&mut *consts), &self.opts)
    }

    fn apply_algebra(
        &mut self,
        consts: &mut GlobalConstants,
        canon: &Value,
        location: &Arg,
    ) -> OptResult<()> {
        let Value::Cv(cv) = canon else { return Ok(()) };
        for derived in algebra::derive(&self.values, cv.as_ref()) {
            let derived_canon = self.values.canonicalize(derived, Some(&mut *consts), &self.opts);
            if derived_canon == *canon {
                continue;
            }
            // The location holds the derived expression too. If neither has
            // a location yet, remember the equivalence for later.
            if location.is_var() || self.values.try_canonical(&derived_canon).is_some() {
                self.values
                    .record(derived_canon, location, Some(&mut *consts), &self.opts)?;
            } else {
                self.values.register_equiv(canon.clone(), derived_canon);
            }
        }
        Ok(())
    }

    /// Canonical alias representative of a location, used to key closedness
    /// so that closing one member of an alias set closes all of them.
    pub fn alias_rep_var(&self, location: &Arg) -> Var {
        let canon = self.aliases.peek_canonical(&Value::Arg(location.clone()));
        match canon {
            Value::Arg(Arg::Var(v)) => v,
            _ => location.var().clone(),
        }
    }

    pub fn is_closed(&self, var: &Var) -> bool {
        let rep = self.alias_rep_var(&Arg::Var(var.clone()));
        self.closed.is_closed(&rep)
    }

    pub fn is_recursively_closed(&self, var: &Var) -> bool {
        let rep = self.alias_rep_var(&Arg::Var(var.clone()));
        self.closed.is_recursively_closed(&rep)
    }

    pub fn mark_closed(&mut self, var: &Var, recursive: bool) {
        let rep = self.alias_rep_var(&Arg::Var(var.clone()));
        self.closed
            .mark_closed(&rep, recursive, self.opts.reordering_frozen);
    }

    pub fn set_dependency(&mut self, to: &Var, from: &Var) {
        self.closed
            .set_dependency(to, from, self.opts.reordering_frozen);
    }

    /// The canonical value of "read the current value of `location`", if
    /// known: used to replace a blocking read with an already-available
    /// value.
    pub fn find_retrieve_result(&self, var: &Var, recursive: bool) -> Option<Value> {
        let canon = self.values.peek_canonical(&Value::Arg(Arg::Var(var.clone())));
        match canon {
            Value::Arg(a) if a.is_const() => Some(Value::Arg(a)),
            Value::Arg(Arg::Var(canon_var)) => {
                let cv = CompVal::retrieve(&canon_var, recursive)?;
                self.values.try_canonical(&Value::Cv(cv))
            }
            _ => None,
        }
    }

    /// The statically-known constant a subject evaluates to, for branch
    /// prediction: either the value itself, or the stored constant of the
    /// future it names.
    pub fn known_value(&self, arg: &Arg) -> Option<Arg> {
        match arg {
            a if a.is_const() => Some(a.clone()),
            Arg::Var(v) if v.ty().is_future() => match self.find_retrieve_result(v, false)? {
                Value::Arg(a) if a.is_const() => Some(a),
                _ => None,
            },
            Arg::Var(v) => {
                let canon = self.values.peek_canonical(&Value::Arg(Arg::Var(v.clone())));
                match canon {
                    Value::Arg(a) if a.is_const() => Some(a),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn value_replacement(&self, var: &Var) -> Option<Arg> {
        self.values.replacement_for(var)
    }

    pub fn alias_replacement(&self, var: &Var) -> Option<Arg> {
        self.aliases.replacement_for(var)
    }

    pub fn validate(&self) {
        self.values.validate();
        self.aliases.validate();
    }

    pub fn print_trace_info(&self) {
        self.values.print_trace_info();
        self.aliases.print_trace_info();
    }
}

// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Congruence sets for one equivalence relation.
//!
//! A `CongruentSet` maps arguments and computed values to a canonical
//! representative, for either value-congruence or alias-congruence. All
//! structures are scoped: new information lands in the innermost scope only,
//! and lookups walk outward. A component index records which computed values
//! mention each argument, so that when an argument's set gains a new
//! canonical, every containing computed value is re-canonicalized - queued,
//! never recursed, since one merge can cascade through an unbounded chain of
//! dependent values.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use itertools::Itertools;
use log::trace;

use freshet_ir::{
    Arg, CompVal, CongruenceKind, CvRef, GlobalConstants, Storage, Ternary, Value, Var,
};

use crate::const_fold;
use crate::error::{Contradiction, OptResult};
use crate::options::OptOptions;
use crate::scoped_union_find::{PoppedFrame, ScopedUnionFind};

#[derive(Debug, Clone, Default)]
struct ScopeData {
    /// For every argument appearing inside a computed value: the values
    /// that mention it.
    component_index: BTreeMap<Arg, BTreeSet<Value>>,
    /// Unpassable variables declared in this scope.
    unpassable_decls: BTreeSet<Var>,
    /// All variables declared in this scope.
    declared: BTreeSet<Var>,
    /// Whether unpassable variables of the parent are visible here.
    inherits_parent_vars: bool,
    /// Values proven equal before either has a storage location.
    equiv: BTreeMap<Value, BTreeSet<Value>>,
}

/// State of one exited scope, still consultable as a read-only overlay.
#[derive(Debug, Clone)]
pub struct CongruentScope {
    frame: PoppedFrame<Value>,
    data: ScopeData,
}

impl CongruentScope {
    /// Computed values that gained a canonical in this scope.
    pub fn available_cvs(&self) -> Vec<CvRef> {
        self.frame
            .keys()
            .filter_map(|v| v.as_cv())
            .collect()
    }

    /// Variables declared inside this scope (not meaningful to a parent).
    pub fn declared(&self) -> &BTreeSet<Var> {
        &self.data.declared
    }
}

#[derive(Debug, Clone)]
pub struct CongruentSet {
    kind: CongruenceKind,
    uf: ScopedUnionFind<Value>,
    scopes: Vec<ScopeData>,
    /// Merges discovered while re-canonicalizing; drained iteratively.
    merge_queue: VecDeque<(Value, Value)>,
    /// Arguments whose containing computed values need re-canonicalizing.
    recanon_queue: VecDeque<Arg>,
}

impl CongruentSet {
    pub fn new(kind: CongruenceKind) -> CongruentSet {
        CongruentSet {
            kind,
            uf: ScopedUnionFind::new(),
            scopes: vec![ScopeData {
                inherits_parent_vars: true,
                ..ScopeData::default()
            }],
            merge_queue: VecDeque::new(),
            recanon_queue: VecDeque::new(),
        }
    }

    pub fn kind(&self) -> CongruenceKind {
        self.kind
    }

    pub fn push_scope(&mut self, inherits_parent_vars: bool) {
        self.uf.push_scope();
        self.scopes.push(ScopeData {
            inherits_parent_vars,
            ..ScopeData::default()
        });
    }

    pub fn pop_scope(&mut self) -> CongruentScope {
        assert!(self.merge_queue.is_empty() && self.recanon_queue.is_empty());
        let frame = self.uf.pop_scope();
        let data = self.scopes.pop().expect("cannot pop the root scope");
        CongruentScope { frame, data }
    }

    /// Record declarations so passability of replacements can be judged.
    pub fn var_declarations(&mut self, vars: &[Var]) {
        let top = self.scopes.last_mut().unwrap();
        for var in vars {
            top.declared.insert(var.clone());
            if !var.can_pass_to_child_task() {
                top.unpassable_decls.insert(var.clone());
            }
        }
    }

    /// Canonical representative of `value`. A bare argument with no entry
    /// becomes a singleton set in the current scope.
    pub fn find_canonical(&mut self, value: &Value) -> Value {
        if value.is_arg() {
            self.uf.ensure(value);
        }
        self.uf.lookup(value)
    }

    /// Canonical representative without creating entries; unknown values
    /// are their own canonical.
    pub fn peek_canonical(&self, value: &Value) -> Value {
        self.uf.lookup(value)
    }

    /// Canonical representative if one is recorded; no entries are created.
    pub fn try_canonical(&self, value: &Value) -> Option<Value> {
        if self.uf.contains(value) {
            Some(self.uf.lookup(value))
        } else {
            None
        }
    }

    /// Canonical representative seen from an exited scope.
    pub fn canonical_with(&self, overlay: &CongruentScope, value: &Value) -> Option<Value> {
        if overlay.frame.get(value).is_some() || self.uf.contains(value) {
            Some(self.uf.lookup_with(&overlay.frame, value))
        } else {
            None
        }
    }

    /// All values congruent to `value`, including itself.
    pub fn congruent_values(&self, value: &Value) -> BTreeSet<Value> {
        self.uf.members(&self.uf.lookup(value))
    }

    /// Computed values available (canonicalized) in the innermost scope.
    pub fn available_cvs_top_scope(&self) -> Vec<CvRef> {
        self.uf
            .keys_in_top_scope()
            .into_iter()
            .filter_map(|v| v.as_cv())
            .collect()
    }

    /// Register that two expressions are equal even though neither may have
    /// a storage location yet. When either lands in a set, the other
    /// follows.
    pub fn register_equiv(&mut self, a: Value, b: Value) {
        let top = self.scopes.last_mut().unwrap();
        top.equiv.entry(a.clone()).or_default().insert(b.clone());
        top.equiv.entry(b).or_default().insert(a);
    }

    fn equivalents(&self, value: &Value) -> BTreeSet<Value> {
        let mut result = BTreeSet::new();
        for scope in self.scopes.iter().rev() {
            if let Some(set) = scope.equiv.get(value) {
                result.extend(set.iter().cloned());
            }
        }
        result
    }

    /// The statically-known stored value of a future, if any: follows the
    /// argument to its canonical and looks up the retrieve fact.
    pub fn known_future_value(&self, arg: &Arg) -> Option<Arg> {
        if arg.is_const() {
            return Some(arg.clone());
        }
        let canon = self.uf.lookup(&Value::Arg(arg.clone()));
        match canon {
            Value::Arg(Arg::Var(v)) => {
                let cv = CompVal::retrieve(&v, false)?;
                match self.try_canonical(&Value::Cv(cv))? {
                    Value::Arg(a) if a.is_const() => Some(a),
                    _ => None,
                }
            }
            Value::Arg(a) if a.is_const() => Some(a),
            _ => None,
        }
    }

    /// Whether `var` can actually be referenced in the current scope,
    /// accounting for passability boundaries between its declaration and
    /// here.
    pub fn is_accessible(&self, var: &Var) -> bool {
        if var.can_pass_to_child_task() {
            return true;
        }
        let mut all_passed = true;
        for scope in self.scopes.iter().rev() {
            if scope.unpassable_decls.contains(var) {
                return all_passed;
            }
            all_passed = all_passed && scope.inherits_parent_vars;
        }
        trace!("no declaration found for {}", var);
        all_passed
    }

    /// Replacement for `var` during operand rewriting, or `None` when the
    /// variable must stay: unknown, mapped (value congruence only), its own
    /// canonical, or congruent only to inaccessible locations.
    pub fn replacement_for(&self, var: &Var) -> Option<Arg> {
        if self.kind == CongruenceKind::Value && var.is_mapped() != Ternary::False {
            // Mapped variables are externally visible; referential
            // transparency does not apply.
            return None;
        }
        let key = Value::Arg(Arg::Var(var.clone()));
        let canon = self.try_canonical(&key)?;
        let Value::Arg(replacement) = canon else {
            return None;
        };
        if replacement == Arg::Var(var.clone()) {
            return None;
        }
        if let Arg::Var(v) = &replacement {
            if !self.is_accessible(v) {
                trace!("{} => {} ({}): inaccessible", var, v, self.kind);
                return None;
            }
        }
        Some(replacement)
    }

    /// Canonicalize a computed value in this scope: substitute canonical
    /// inputs, unwrap copy/alias wrappers, resolve dereferences through
    /// known member handles, then (value flavor only) constant-fold or
    /// redirect assigned constants to the shared pool. Idempotent.
    pub fn canonicalize(
        &mut self,
        cv: CvRef,
        mut consts: Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> Value {
        self.canonicalize_inner(cv, true, &mut consts, opts)
    }

    fn canonicalize_inner(
        &mut self,
        cv: CvRef,
        add_index: bool,
        consts: &mut Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> Value {
        let substituted = self.canonicalize_inputs(cv, add_index, consts, opts);
        self.canonicalize_shape(substituted, consts, opts)
    }

    fn canonicalize_inputs(
        &mut self,
        cv: CvRef,
        add_index: bool,
        consts: &mut Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> CvRef {
        let mut inputs = Vec::with_capacity(cv.as_ref().inputs.len());
        for input in &cv.as_ref().inputs {
            match input {
                Value::Arg(a) => {
                    let canon = self.find_canonical(&Value::Arg(a.clone()));
                    debug_assert!(canon.is_arg(), "canonical of an arg must be an arg");
                    inputs.push(canon);
                }
                Value::Cv(nested) => {
                    inputs.push(self.canonicalize_inner(*nested, add_index, consts, opts));
                }
            }
        }
        if let freshet_ir::SubOp::Op(op) = cv.as_ref().subop {
            if freshet_ir::is_commutative(op) {
                inputs.sort();
            }
        }
        let new_cv = cv.as_ref().substitute_inputs(inputs);
        if add_index && self.try_canonical(&Value::Cv(new_cv)).is_none() {
            self.index_components(new_cv);
        }
        new_cv
    }

    /// Record every argument mentioned (at any depth) by `cv`.
    fn index_components(&mut self, cv: CvRef) {
        fn collect_args(cv: &CompVal, out: &mut BTreeSet<Arg>) {
            for input in &cv.inputs {
                match input {
                    Value::Arg(a) => {
                        out.insert(a.clone());
                    }
                    Value::Cv(nested) => collect_args(nested.as_ref(), out),
                }
            }
        }
        let mut args = BTreeSet::new();
        collect_args(cv.as_ref(), &mut args);
        let top = self.scopes.last_mut().unwrap();
        for arg in args {
            trace!("add component: {} => {}", arg, cv.as_ref());
            top.component_index
                .entry(arg)
                .or_default()
                .insert(Value::Cv(cv));
        }
    }

    fn canonicalize_shape(
        &mut self,
        cv: CvRef,
        consts: &mut Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> Value {
        // Copy/alias wrappers are transparent.
        if cv.as_ref().is_copy() || cv.as_ref().is_alias() {
            return cv.as_ref().input(0).clone();
        }

        // A retrieve through a location congruent to a member handle is the
        // member access itself.
        let cv = self.try_resolve_deref(cv);

        // Constant folding applies to value congruence only; alias sets
        // relate storage, not contents.
        if opts.constant_fold && self.kind == CongruenceKind::Value {
            if let Some(folded) = const_fold::try_fold_cv(self, cv.as_ref()) {
                return folded;
            }
        }

        // Redirect an assigned constant to one shared location per literal.
        if opts.shared_constants && cv.as_ref().op.is_assign(true) {
            if let Some(consts) = consts.as_deref_mut() {
                if let Value::Arg(assigned) = cv.as_ref().input(0) {
                    if assigned.is_const() {
                        let shared = consts.get_or_create(assigned);
                        return Value::Arg(Arg::Var(shared));
                    }
                }
            }
        }

        Value::Cv(cv)
    }

    fn try_resolve_deref(&self, cv: CvRef) -> CvRef {
        if !cv.as_ref().is_retrieve(false) || cv.as_ref().inputs.len() != 1 {
            return cv;
        }
        let src = cv.as_ref().input(0).clone();
        for congruent in self.congruent_values(&src) {
            if let Value::Cv(member) = congruent {
                if member.as_ref().is_array_member() {
                    return member.as_ref().deref_array_member();
                }
            }
        }
        cv
    }

    /// Record that `value` belongs to the set represented by `canonical`.
    /// Values registered as equivalent to `value` follow it into the set.
    pub fn add_to_set(&mut self, value: Value, canonical: &Value) {
        trace!("add {} to {} ({})", value, canonical, self.kind);
        let affected = self.uf.merge(canonical, &value);
        if affected.is_empty() {
            return;
        }
        for equivalent in self.equivalents(&value) {
            match self.try_canonical(&equivalent) {
                Some(existing) if existing != *canonical => {
                    self.merge_queue.push_back((existing, canonical.clone()));
                }
                _ => {
                    self.uf.merge(canonical, &equivalent);
                }
            }
        }
        if let Value::Cv(cv) = value {
            self.check_for_recanonicalization(canonical, cv);
        }
    }

    /// A new entry may let other values be simplified: learning a future's
    /// constant value, or a member handle that dereferences can both make
    /// containing computed values collapse.
    fn check_for_recanonicalization(&mut self, canonical: &Value, cv: CvRef) {
        if cv.as_ref().is_retrieve(true) && canonical.is_const() {
            if let Value::Arg(future) = cv.as_ref().input(0) {
                trace!("enqueue future with known value {}", future);
                self.recanon_queue.push_back(future.clone());
            }
        } else if cv.as_ref().is_array_member() {
            if let Value::Arg(member_ref) = cv.as_ref().input(0) {
                trace!("enqueue array member ref {}", member_ref);
                self.recanon_queue.push_back(member_ref.clone());
            }
        }
    }

    /// Merge the sets of `new` and `existing` because they were proven to
    /// hold the same value. Refuses with a contradiction when two distinct
    /// constants (value congruence) or two distinct direct locations (alias
    /// congruence) would be identified.
    pub fn merge(
        &mut self,
        new: &Value,
        existing: &Value,
        mut consts: Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> OptResult<()> {
        let a = self.find_canonical(new);
        let b = self.find_canonical(existing);
        if a == b {
            return Ok(());
        }
        self.merge_canonical(a, b)?;
        self.process_queues(&mut consts, opts)
    }

    /// One merge step. Queues any cascading work; the caller drains it.
    fn merge_canonical(&mut self, a: Value, b: Value) -> OptResult<()> {
        self.check_contradiction(&a, &b)?;

        let (winner, loser) = if self.beats(&a, &b) { (a, b) } else { (b, a) };
        trace!("merging {} into {} ({})", loser, winner, self.kind);
        assert!(
            winner.is_arg() || !loser.is_arg(),
            "congruence set replaced arg {} with non-arg {}",
            loser,
            winner
        );

        // Computed values mentioning the loser are no longer canonical.
        if let Value::Arg(lost) = &loser {
            self.recanon_queue.push_back(lost.clone());
        }
        self.uf.merge(&winner, &loser);
        Ok(())
    }

    fn check_contradiction(&self, a: &Value, b: &Value) -> OptResult<()> {
        let (Value::Arg(left), Value::Arg(right)) = (a, b) else {
            return Ok(());
        };
        if left == right {
            return Ok(());
        }
        match self.kind {
            CongruenceKind::Value => {
                if left.is_const() && right.is_const() {
                    return Err(Contradiction::new(self.kind, a.clone(), b.clone()));
                }
            }
            CongruenceKind::Alias => {
                let direct = |arg: &Arg| match arg {
                    Arg::Var(v) => v.storage() != Storage::Alias,
                    _ => true,
                };
                if direct(left) && direct(right) {
                    return Err(Contradiction::new(self.kind, a.clone(), b.clone()));
                }
            }
        }
        Ok(())
    }

    /// Total preference order for canonical representatives: constant
    /// literal first, then shared global constant, then direct (non-alias)
    /// storage, unmapped, and accessible in that order of importance; ties
    /// keep the existing winner.
    fn beats(&self, a: &Value, b: &Value) -> bool {
        self.rank(a) > self.rank(b)
    }

    fn rank(&self, value: &Value) -> (u8, u8, u8, u8) {
        let Value::Arg(arg) = value else {
            return (0, 0, 0, 0);
        };
        match arg {
            Arg::Var(v) => (
                if v.storage() == Storage::GlobalConst { 2 } else { 1 },
                (v.storage() != Storage::Alias) as u8,
                (v.is_mapped() == Ternary::False) as u8,
                self.is_accessible(v) as u8,
            ),
            _ => (3, 1, 1, 1),
        }
    }

    /// Drain the merge and recanonicalization queues until both are empty.
    /// Work queues rather than recursion: a single triggering merge can
    /// cascade through arbitrarily long chains of dependent values.
    fn process_queues(
        &mut self,
        consts: &mut Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> OptResult<()> {
        loop {
            while let Some((old_set, new_set)) = self.merge_queue.pop_front() {
                let a = self.find_canonical(&old_set);
                let b = self.find_canonical(&new_set);
                if a != b {
                    self.merge_canonical(a, b)?;
                }
            }
            while let Some(component) = self.recanon_queue.pop_front() {
                self.update_canonical_components(component, consts, opts)?;
            }
            if self.merge_queue.is_empty() && self.recanon_queue.is_empty() {
                return Ok(());
            }
        }
    }

    /// Re-canonicalize every computed value that mentions `old_component`.
    /// If the updated value already belongs to a different set, the merge is
    /// queued rather than performed here.
    fn update_canonical_components(
        &mut self,
        old_component: Arg,
        consts: &mut Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> OptResult<()> {
        let new_component = match self.find_canonical(&Value::Arg(old_component.clone())) {
            Value::Arg(a) => a,
            other => panic!("canonical of arg {} is non-arg {}", old_component, other),
        };

        let containing: Vec<CvRef> = self
            .scopes
            .iter()
            .flat_map(|scope| {
                scope
                    .component_index
                    .get(&old_component)
                    .into_iter()
                    .flatten()
                    .filter_map(|v| v.as_cv())
            })
            .collect();

        for outer in containing {
            let substituted =
                replace_component(outer.as_ref(), &old_component, &new_component);
            let updated = self.canonicalize_shape_entry(substituted, consts, opts);
            let unchanged = matches!(&updated, Value::Cv(cv) if *cv == outer);
            if unchanged {
                continue;
            }
            trace!(
                "substituted {} for {} in {}",
                new_component,
                old_component,
                outer.as_ref()
            );
            if let Value::Cv(updated_cv) = &updated {
                self.index_components(*updated_cv);
            }
            let Some(existing) = self.try_canonical(&Value::Cv(outer)) else {
                trace!("could not update {}", outer.as_ref());
                continue;
            };
            match self.try_canonical(&updated) {
                Some(other) if other != existing => {
                    trace!(
                        "recanonicalizing {} caused merge of {} into {}",
                        old_component,
                        existing,
                        other
                    );
                    self.merge_queue.push_back((existing, other));
                }
                Some(_) => {}
                None if updated.is_arg() => {
                    // The value collapsed to an argument (e.g. folded to a
                    // constant); let the merge pick the stronger canonical.
                    self.merge_queue.push_back((existing, updated));
                }
                None => {
                    self.add_to_set(updated, &existing);
                }
            }
        }
        Ok(())
    }

    /// Shape-level canonicalization for an already input-substituted value;
    /// commutative inputs are re-sorted first.
    fn canonicalize_shape_entry(
        &mut self,
        cv: CvRef,
        consts: &mut Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> Value {
        let cv = if let freshet_ir::SubOp::Op(op) = cv.as_ref().subop {
            if freshet_ir::is_commutative(op) {
                let mut inputs = cv.as_ref().inputs.clone();
                inputs.sort();
                cv.as_ref().substitute_inputs(inputs)
            } else {
                cv
            }
        } else {
            cv
        };
        self.canonicalize_shape(cv, consts, opts)
    }

    /// Record that `location` holds `value` (already canonicalized in this
    /// set). Depending on what is already known this adds a set member or
    /// merges two sets.
    pub fn record(
        &mut self,
        value: Value,
        location: &Arg,
        mut consts: Option<&mut GlobalConstants>,
        opts: &OptOptions,
    ) -> OptResult<()> {
        let loc_canon = self.find_canonical(&Value::Arg(location.clone()));
        match self.try_canonical(&value) {
            Some(existing) if existing != loc_canon => {
                // The value bridges two sets; the location is the newcomer,
                // so on preference ties the value's set keeps its canonical.
                self.merge(&loc_canon, &existing, consts.as_deref_mut(), opts)
            }
            Some(_) => Ok(()),
            None if value.is_arg() => {
                self.merge(&loc_canon, &value, consts.as_deref_mut(), opts)
            }
            None => {
                self.add_to_set(value, &loc_canon);
                self.process_queues(&mut consts, opts)
            }
        }
    }

    /// Invariant check: every recorded entry resolves to a fixed point and
    /// no queued work is pending.
    pub fn validate(&self) {
        assert!(self.merge_queue.is_empty(), "unprocessed merges");
        assert!(
            self.recanon_queue.is_empty(),
            "unprocessed recanonicalizations"
        );
        for (member, canon) in self.uf.entries() {
            let resolved = self.uf.lookup(&canon);
            assert!(
                resolved == canon,
                "entry {} -> {} is not a fixed point (resolves to {})",
                member,
                canon,
                resolved
            );
        }
    }

    /// Dump the sets when tracing is on.
    pub fn print_trace_info(&self) {
        if log::log_enabled!(log::Level::Trace) {
            for (member, canon) in self.uf.entries() {
                trace!("{} cong. class {} => {}", self.kind, member, canon);
            }
            for (depth, scope) in self.scopes.iter().rev().enumerate() {
                if !scope.component_index.is_empty() {
                    let components = scope
                        .component_index
                        .iter()
                        .map(|(arg, cvs)| format!("{} in {} value(s)", arg, cvs.len()))
                        .join(", ");
                    trace!("components#{}: {}", depth, components);
                }
            }
        }
    }
}

/// Replace `old` with `new` in every input position, at any depth.
fn replace_component(cv: &CompVal, old: &Arg, new: &Arg) -> CvRef {
    let inputs = cv
        .inputs
        .iter()
        .map(|input| match input {
            Value::Arg(a) if a == old => Value::Arg(new.clone()),
            Value::Arg(a) => Value::Arg(a.clone()),
            Value::Cv(nested) => Value::Cv(replace_component(nested.as_ref(), old, new)),
        })
        .collect();
    cv.substitute_inputs(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshet_ir::{BuiltinOp, Opcode, ScalarKind, Type};

    fn value_set() -> CongruentSet {
        CongruentSet::new(CongruenceKind::Value)
    }

    fn opts() -> OptOptions {
        OptOptions::default()
    }

    fn int_future(name: &str) -> Var {
        Var::named(name, Type::ScalarFuture(ScalarKind::Int))
    }

    fn int_val(name: &str) -> Var {
        Var::named(name, Type::ScalarValue(ScalarKind::Int))
    }

    fn arg(v: &Var) -> Value {
        Value::Arg(Arg::Var(v.clone()))
    }

    #[test]
    fn transitivity() {
        let mut set = value_set();
        let o = opts();
        let a = arg(&int_val("a"));
        let b = arg(&int_val("b"));
        let c = arg(&int_val("c"));
        set.merge(&a, &b, None, &o).unwrap();
        set.merge(&b, &c, None, &o).unwrap();
        assert_eq!(set.find_canonical(&a), set.find_canonical(&c));
        set.validate();
    }

    #[test]
    fn constant_contradiction() {
        let mut set = value_set();
        let o = opts();
        let x = arg(&int_val("x"));
        set.merge(&Value::Arg(Arg::Int(5)), &x, None, &o).unwrap();
        let err = set
            .merge(&Value::Arg(Arg::Int(7)), &x, None, &o)
            .unwrap_err();
        assert_eq!(err.kind, CongruenceKind::Value);
    }

    #[test]
    fn equal_constants_do_not_contradict() {
        let mut set = value_set();
        let o = opts();
        let x = arg(&int_val("x"));
        set.merge(&Value::Arg(Arg::Int(5)), &x, None, &o).unwrap();
        set.merge(&Value::Arg(Arg::Int(5)), &x, None, &o).unwrap();
        assert_eq!(set.find_canonical(&x), Value::Arg(Arg::Int(5)));
    }

    #[test]
    fn alias_contradiction_for_direct_locations() {
        let mut set = CongruentSet::new(CongruenceKind::Alias);
        let o = opts();
        let a = arg(&int_future("a"));
        let b = arg(&int_future("b"));
        assert!(set.merge(&a, &b, None, &o).is_err());
    }

    #[test]
    fn alias_handles_merge_fine() {
        let mut set = CongruentSet::new(CongruenceKind::Alias);
        let o = opts();
        let direct = arg(&int_future("d"));
        let handle = arg(&Var::new(
            freshet_ir::Ident::new("h"),
            Type::ScalarFuture(ScalarKind::Int),
            Storage::Alias,
        ));
        set.merge(&handle, &direct, None, &o).unwrap();
        // The direct location wins the canonical spot.
        assert_eq!(set.find_canonical(&handle), direct);
    }

    #[test]
    fn constants_win_canonical() {
        let mut set = value_set();
        let o = opts();
        let x = arg(&int_val("x"));
        set.merge(&x, &Value::Arg(Arg::Int(3)), None, &o).unwrap();
        assert_eq!(set.find_canonical(&x), Value::Arg(Arg::Int(3)));
    }

    #[test]
    fn scoping_does_not_leak() {
        let mut set = value_set();
        let o = opts();
        let x = arg(&int_val("x"));
        let y = arg(&int_val("y"));

        set.push_scope(true);
        set.merge(&x, &y, None, &o).unwrap();
        assert_eq!(set.find_canonical(&x), set.find_canonical(&y));
        set.pop_scope();

        assert_ne!(set.find_canonical(&x), set.find_canonical(&y));
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let mut set = value_set();
        let o = opts();
        let x = int_val("x");
        let cv = CompVal::builtin_op(
            Opcode::LocalOp,
            BuiltinOp::PlusInt,
            vec![arg(&x), Value::Arg(Arg::Int(1))],
        );
        let once = set.canonicalize(cv, None, &o);
        let twice = match &once {
            Value::Cv(c) => set.canonicalize(*c, None, &o),
            other => other.clone(),
        };
        assert_eq!(once, twice);
    }

    #[test]
    fn copy_unwraps() {
        let mut set = value_set();
        let o = opts();
        let x = int_val("x");
        let cv = CompVal::copy_of(Arg::Var(x.clone()));
        assert_eq!(set.canonicalize(cv, None, &o), arg(&x));
    }

    #[test]
    fn component_cascade_folds_through_merges() {
        let mut set = value_set();
        let o = opts();
        let x = int_val("x");
        let t = int_val("t");

        // t := x + 1, with x unknown.
        let cv = CompVal::builtin_op(
            Opcode::LocalOp,
            BuiltinOp::PlusInt,
            vec![Value::Arg(Arg::Int(1)), arg(&x)],
        );
        let canon = set.canonicalize(cv, None, &o);
        let loc = set.find_canonical(&arg(&t));
        set.add_to_set(canon, &loc);

        // Now x turns out to be 2; the containing computed value collapses
        // to the constant 3 and t follows.
        set.merge(&Value::Arg(Arg::Int(2)), &arg(&x), None, &o)
            .unwrap();
        assert_eq!(set.find_canonical(&arg(&t)), Value::Arg(Arg::Int(3)));
        set.validate();
    }

    #[test]
    fn mapped_vars_are_never_replaced() {
        let mut set = value_set();
        let o = opts();
        let m = Var::mapped("m", Type::ScalarFuture(ScalarKind::Int));
        let x = int_future("x");
        set.merge(&arg(&m), &arg(&x), None, &o).unwrap();
        assert_eq!(set.replacement_for(&m), None);
    }

    #[test]
    fn validate_passes_after_cascade() {
        let mut set = value_set();
        let o = opts();
        let a = int_val("a");
        let b = int_val("b");
        let t1 = int_val("t1");
        let t2 = int_val("t2");

        let cv_a = CompVal::builtin_op(Opcode::LocalOp, BuiltinOp::PlusInt, {
            let mut v = vec![Value::Arg(Arg::Int(1)), arg(&a)];
            v.sort();
            v
        });
        let cv_b = CompVal::builtin_op(Opcode::LocalOp, BuiltinOp::PlusInt, {
            let mut v = vec![Value::Arg(Arg::Int(1)), arg(&b)];
            v.sort();
            v
        });
        let ca = set.canonicalize(cv_a, None, &o);
        let la = set.find_canonical(&arg(&t1));
        set.add_to_set(ca, &la);
        let cb = set.canonicalize(cv_b, None, &o);
        let lb = set.find_canonical(&arg(&t2));
        set.add_to_set(cb, &lb);

        // Learning a = b must cascade: a+1 and b+1 become one set, so t1 and
        // t2 end up congruent.
        set.merge(&arg(&a), &arg(&b), None, &o).unwrap();
        assert_eq!(set.find_canonical(&arg(&t1)), set.find_canonical(&arg(&t2)));
        set.validate();
    }
}

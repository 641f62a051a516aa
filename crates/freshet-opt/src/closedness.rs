// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tracking which futures are provably closed.
//!
//! Closedness facts are scoped like congruence facts and monotonic within a
//! scope: single-assignment discipline means a closed future never reopens.
//! Dependency edges record deferred inference - "when this future closes,
//! that one is closed too" - and are consumed by a worklist walk the moment
//! the trigger closes. Dependency inference relies on program order staying
//! fixed, so the edge APIs assert that instruction reordering is frozen.

use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use freshet_ir::Var;

#[derive(Debug, Clone, Default)]
pub struct ClosedScope {
    closed: BTreeSet<Var>,
    recursively_closed: BTreeSet<Var>,
}

impl ClosedScope {
    pub fn closed(&self) -> &BTreeSet<Var> {
        &self.closed
    }

    pub fn recursively_closed(&self) -> &BTreeSet<Var> {
        &self.recursively_closed
    }
}

#[derive(Debug, Clone)]
pub struct ClosedTracker {
    scopes: Vec<ClosedScope>,
    /// trigger -> futures inferred closed when the trigger closes. Edges are
    /// consumed when they fire.
    dependencies: BTreeMap<Var, BTreeSet<Var>>,
}

impl ClosedTracker {
    pub fn new() -> ClosedTracker {
        ClosedTracker {
            scopes: vec![ClosedScope::default()],
            dependencies: BTreeMap::new(),
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(ClosedScope::default());
    }

    pub fn pop_scope(&mut self) -> ClosedScope {
        assert!(self.scopes.len() > 1, "cannot pop the root scope");
        self.scopes.pop().unwrap()
    }

    pub fn is_closed(&self, var: &Var) -> bool {
        self.scopes
            .iter()
            .rev()
            .any(|s| s.closed.contains(var) || s.recursively_closed.contains(var))
    }

    pub fn is_recursively_closed(&self, var: &Var) -> bool {
        self.scopes
            .iter()
            .rev()
            .any(|s| s.recursively_closed.contains(var))
    }

    /// Like `is_closed`, additionally consulting an exited scope.
    pub fn is_closed_with(&self, overlay: &ClosedScope, var: &Var) -> bool {
        overlay.closed.contains(var)
            || overlay.recursively_closed.contains(var)
            || self.is_closed(var)
    }

    pub fn is_recursively_closed_with(&self, overlay: &ClosedScope, var: &Var) -> bool {
        overlay.recursively_closed.contains(var) || self.is_recursively_closed(var)
    }

    /// Mark `var` closed in the current scope, then walk the dependency
    /// graph: every edge triggered by a newly-closed future is removed and
    /// its target marked closed as well, until the worklist drains.
    /// `reordering_frozen` gates the inference part: it is only sound while
    /// program order is fixed for the rest of compilation.
    pub fn mark_closed(&mut self, var: &Var, recursive: bool, reordering_frozen: bool) {
        let mut worklist = vec![(var.clone(), recursive)];
        while let Some((v, rec)) = worklist.pop() {
            let newly = self.record_closed(&v, rec);
            if !newly {
                continue;
            }
            trace!("{} now closed (recursive: {})", v, rec);
            if let Some(inferred) = self.dependencies.remove(&v) {
                assert!(
                    reordering_frozen,
                    "closedness dependency inference after reordering was permitted"
                );
                for target in inferred {
                    worklist.push((target, false));
                }
            }
        }
    }

    /// Returns whether the fact is new in this scope stack. Monotonic: a
    /// second mark never clears anything, recursive marks only add.
    fn record_closed(&mut self, var: &Var, recursive: bool) -> bool {
        if recursive {
            if self.is_recursively_closed(var) {
                return false;
            }
            let top = self.scopes.last_mut().unwrap();
            top.recursively_closed.insert(var.clone());
            top.closed.insert(var.clone());
            true
        } else {
            if self.is_closed(var) {
                return false;
            }
            self.scopes.last_mut().unwrap().closed.insert(var.clone());
            true
        }
    }

    /// Record that closing `from` implies `to` is closed as well. Must not
    /// be called once reordering is permitted.
    pub fn set_dependency(&mut self, to: &Var, from: &Var, reordering_frozen: bool) {
        assert!(
            reordering_frozen,
            "closedness dependency recorded after reordering was permitted"
        );
        if self.is_closed(from) {
            // The trigger already fired.
            self.mark_closed(to, false, reordering_frozen);
            return;
        }
        self.dependencies
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
    }
}

impl Default for ClosedTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshet_ir::{ScalarKind, Type};

    fn var(name: &str) -> Var {
        Var::named(name, Type::ScalarFuture(ScalarKind::Int))
    }

    #[test]
    fn monotonic_within_scope() {
        let mut tracker = ClosedTracker::new();
        let x = var("x");
        tracker.mark_closed(&x, true, true);
        assert!(tracker.is_closed(&x));
        assert!(tracker.is_recursively_closed(&x));
        // A weaker second mark never clears the stronger fact.
        tracker.mark_closed(&x, false, true);
        assert!(tracker.is_recursively_closed(&x));
    }

    #[test]
    fn visible_in_descendant_scopes() {
        let mut tracker = ClosedTracker::new();
        let x = var("x");
        tracker.mark_closed(&x, false, true);
        tracker.push_scope();
        assert!(tracker.is_closed(&x));
        tracker.pop_scope();
        assert!(tracker.is_closed(&x));
    }

    #[test]
    fn child_facts_do_not_leak() {
        let mut tracker = ClosedTracker::new();
        let x = var("x");
        tracker.push_scope();
        tracker.mark_closed(&x, false, true);
        assert!(tracker.is_closed(&x));
        let scope = tracker.pop_scope();
        assert!(!tracker.is_closed(&x));
        assert!(tracker.is_closed_with(&scope, &x));
    }

    #[test]
    fn dependency_chain_closes_transitively() {
        let mut tracker = ClosedTracker::new();
        let (a, b, c) = (var("a"), var("b"), var("c"));
        // Closing c infers b, closing b infers a.
        tracker.set_dependency(&b, &c, true);
        tracker.set_dependency(&a, &b, true);
        tracker.mark_closed(&c, false, true);
        assert!(tracker.is_closed(&a));
        assert!(tracker.is_closed(&b));
        assert!(tracker.is_closed(&c));
    }

    #[test]
    fn dependency_on_already_closed_trigger() {
        let mut tracker = ClosedTracker::new();
        let (a, b) = (var("a"), var("b"));
        tracker.mark_closed(&b, false, true);
        tracker.set_dependency(&a, &b, true);
        assert!(tracker.is_closed(&a));
    }

    #[test]
    #[should_panic(expected = "after reordering was permitted")]
    fn dependency_api_requires_frozen_order() {
        let mut tracker = ClosedTracker::new();
        let (a, b) = (var("a"), var("b"));
        tracker.set_dependency(&a, &b, false);
    }
}

// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Options for the value-numbering optimizer. Usually configured from the
/// compiler's toml config; defaults enable everything.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptOptions {
    /// Evaluate operators over statically-known constants.
    pub constant_fold: bool,
    /// Redirect assigned constants to one shared global location per value.
    pub shared_constants: bool,
    /// Derive canonical add/subtract chains (helps adjacent array indices).
    pub algebra: bool,
    /// Switch blocking operations to immediate form when inputs are closed.
    pub make_immediate: bool,
    /// Iteration bound for the branch unifier's fixpoint. Exhausting it
    /// costs optimizations, never correctness.
    pub unify_fuel: usize,
    /// Whether instruction reordering is disabled for the rest of
    /// compilation. Closedness inference through dependency edges relies on
    /// program order and is only legal while this holds.
    pub reordering_frozen: bool,
}

impl Default for OptOptions {
    fn default() -> Self {
        Self {
            constant_fold: true,
            shared_constants: true,
            algebra: true,
            make_immediate: true,
            unify_fuel: 20,
            reordering_frozen: true,
        }
    }
}

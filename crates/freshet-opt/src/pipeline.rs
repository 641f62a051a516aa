// Copyright (c) Freshet Contributors
// SPDX-License-Identifier: Apache-2.0

//! The function-processor pipeline.
//!
//! Processors transform one function at a time. Functions are independent:
//! each gets its own analysis state, so an outer driver may hand them to the
//! pipeline in any order (or in parallel, with the constant pool sharded).

use log::debug;

use freshet_ir::{Function, GlobalConstants, Program};

use crate::options::OptOptions;
use crate::value_numbering::ValueNumbering;

/// A transformation applied per function. Failures inside a processor are
/// function-scoped: the processor leaves the function as received and the
/// pipeline moves on.
pub trait FunctionProcessor {
    /// A name for this processor, suitable as a log tag.
    fn name(&self) -> String;

    fn process(&self, fun: &mut Function, consts: &mut GlobalConstants);
}

/// A processing pipeline for the functions of a program.
#[derive(Default)]
pub struct OptPipeline {
    processors: Vec<Box<dyn FunctionProcessor>>,
}

impl OptPipeline {
    pub fn new() -> OptPipeline {
        OptPipeline::default()
    }

    pub fn add_processor(&mut self, processor: Box<dyn FunctionProcessor>) {
        self.processors.push(processor);
    }

    /// The standard middle-end pipeline.
    pub fn standard(opts: OptOptions) -> OptPipeline {
        let mut pipeline = OptPipeline::new();
        pipeline.add_processor(ValueNumbering::new(opts));
        pipeline
    }

    pub fn run(&self, program: &mut Program) {
        let Program { functions, consts } = program;
        for processor in &self.processors {
            for fun in functions.iter_mut() {
                debug!("running {} on {}", processor.name(), fun.name);
                processor.process(fun, consts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_runs() {
        let mut program = Program::default();
        OptPipeline::standard(OptOptions::default()).run(&mut program);
    }
}

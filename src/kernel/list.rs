//! Ordered kernel steps run as one unit over an arena of buffers.
//!
//! Each step names its inputs and outputs by [`BufferId`], so a later step
//! can read what an earlier one wrote. Steps run strictly in insertion
//! order; the lanes inside each step still run in parallel.

use tracing::debug;

use super::{Kernel, KernelReport, LaneBinding};
use crate::buffer::{Buffer, BufferArena, BufferId};
use crate::error::{EngineError, Result};
use crate::graph::Value;

/// One argument of a step.
#[derive(Clone, Debug)]
pub enum StepInput {
    /// One record per lane, read from the arena.
    Buffer(BufferId),
    /// The same value for every lane.
    Value(Value),
}

struct Step {
    kernel: Kernel,
    inputs: Vec<StepInput>,
    outputs: Vec<BufferId>,
}

#[derive(Default)]
pub struct OperationList {
    steps: Vec<Step>,
}

impl OperationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. A buffer may not be both read and written by the
    /// same step, and each output is written at most once.
    pub fn add(
        &mut self,
        kernel: Kernel,
        inputs: Vec<StepInput>,
        outputs: Vec<BufferId>,
    ) -> Result<&mut Self> {
        let expected = kernel.executable().signature().parameters.len();
        if inputs.len() != expected {
            return Err(EngineError::argument(format!(
                "step {} has {} input(s), its kernel takes {}",
                self.steps.len(),
                inputs.len(),
                expected
            )));
        }
        for (i, out) in outputs.iter().enumerate() {
            let read = inputs
                .iter()
                .any(|input| matches!(input, StepInput::Buffer(id) if id == out));
            if read || outputs[..i].contains(out) {
                return Err(EngineError::argument(format!(
                    "step {} output {} aliases another binding of the same step",
                    self.steps.len(),
                    i
                )));
            }
        }
        self.steps.push(Step {
            kernel,
            inputs,
            outputs,
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order. The first failing step stops the list;
    /// buffers written by earlier steps keep their results.
    pub fn run(&self, arena: &mut BufferArena) -> Result<Vec<KernelReport>> {
        let mut reports = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let report = Self::run_step(step, arena).inspect_err(|e| {
                debug!(step = index, error = %e, "operation list stopped");
            })?;
            reports.push(report);
        }
        debug!(steps = reports.len(), "operation list complete");
        Ok(reports)
    }

    fn run_step(step: &Step, arena: &mut BufferArena) -> Result<KernelReport> {
        let mut taken: Vec<Buffer> = Vec::with_capacity(step.outputs.len());
        for &id in &step.outputs {
            match arena.check_out(id) {
                Ok(buffer) => taken.push(buffer),
                Err(e) => {
                    for (&id, buffer) in step.outputs.iter().zip(taken) {
                        arena.check_in(id, buffer);
                    }
                    return Err(e);
                }
            }
        }

        let result = Self::bind(step, arena).and_then(|bindings| {
            let mut outputs: Vec<&mut Buffer> = taken.iter_mut().collect();
            step.kernel.run(&bindings, &mut outputs)
        });

        for (&id, buffer) in step.outputs.iter().zip(taken) {
            arena.check_in(id, buffer);
        }
        result
    }

    fn bind<'a>(step: &'a Step, arena: &'a BufferArena) -> Result<Vec<LaneBinding<'a>>> {
        step.inputs
            .iter()
            .map(|input| match input {
                StepInput::Buffer(id) => Ok(LaneBinding::Varying(arena.get(*id)?.view())),
                StepInput::Value(v) => Ok(LaneBinding::Invariant(v.clone())),
            })
            .collect()
    }
}

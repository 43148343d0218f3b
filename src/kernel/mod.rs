//! Batch execution of one executable across many independent lanes.
//!
//! Each lane reads one record from every lane-varying buffer plus the
//! shared lane-invariant values, and writes one record into every output
//! buffer. Lanes share no state, so they run on the rayon pool in any
//! order. A lane whose result is undefined gets the sentinel instead of
//! aborting the batch; backend and session errors still propagate.
//!
//! Inputs and outputs are buffer views, so a batch can run over a record
//! range or a reshaped region of a larger buffer in place.

mod list;

#[cfg(test)]
mod tests;

pub use list::{OperationList, StepInput};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::{Executable, LaneBatch, LaneInput};
use crate::buffer::{Buffer, BufferView, BufferViewMut};
use crate::error::{EngineError, Result};
use crate::graph::Value;

/// Placeholder written to every element of an undefined lane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sentinel {
    pub value: f64,
    /// Also treat lanes with a NaN or infinite element as undefined.
    pub on_non_finite: bool,
}

impl Sentinel {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            on_non_finite: false,
        }
    }

    /// A "nothing hit" distance for ray-style domains.
    pub fn far() -> Self {
        Self::new(f64::MAX)
    }

    pub fn with_non_finite(mut self, on: bool) -> Self {
        self.on_non_finite = on;
        self
    }

    fn rejects(&self, record: &[f64]) -> bool {
        self.on_non_finite && record.iter().any(|x| !x.is_finite())
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::new(f64::NAN)
    }
}

/// How one argument of the executable is fed to the lanes.
#[derive(Clone, Debug)]
pub enum LaneBinding<'a> {
    /// One record per lane.
    Varying(BufferView<'a>),
    /// The same value for every lane.
    Invariant(Value),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct KernelReport {
    pub lanes: usize,
    pub undefined: usize,
}

impl KernelReport {
    pub fn defined(&self) -> usize {
        self.lanes - self.undefined
    }
}

pub struct Kernel {
    executable: Arc<Executable>,
    sentinel: Sentinel,
}

impl Kernel {
    pub fn new(executable: Arc<Executable>, sentinel: Sentinel) -> Self {
        Self {
            executable,
            sentinel,
        }
    }

    pub fn executable(&self) -> &Arc<Executable> {
        &self.executable
    }

    pub fn sentinel(&self) -> Sentinel {
        self.sentinel
    }

    /// Lane count of a binding set: the record count shared by every
    /// varying buffer, else the record count of the outputs.
    fn lane_count(bindings: &[LaneBinding<'_>], outputs: &[BufferViewMut<'_>]) -> Result<usize> {
        let mut lanes: Option<usize> = None;
        for (i, binding) in bindings.iter().enumerate() {
            if let LaneBinding::Varying(buffer) = binding {
                match lanes {
                    None => lanes = Some(buffer.count()),
                    Some(n) if n != buffer.count() => {
                        return Err(EngineError::argument(format!(
                            "binding {} holds {} record(s), other varying bindings hold {}",
                            i,
                            buffer.count(),
                            n
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        match lanes {
            Some(n) => Ok(n),
            None => outputs.first().map(|b| b.count()).ok_or_else(|| {
                EngineError::argument("a batch needs a varying binding or an output buffer")
            }),
        }
    }

    /// Check the output buffers against the signature. Either one buffer
    /// per output, or a single buffer holding every output of a lane
    /// back to back.
    fn output_layout(&self, outputs: &[BufferViewMut<'_>], lanes: usize) -> Result<Vec<usize>> {
        let signature = self.executable.signature();
        let sizes: Vec<usize> = signature.outputs.iter().map(|s| s.size()).collect();
        let layout = if outputs.len() == 1 && outputs[0].record_len() == signature.output_len() {
            vec![signature.output_len()]
        } else if outputs.len() == sizes.len() {
            for (i, (buffer, size)) in outputs.iter().zip(&sizes).enumerate() {
                if buffer.record_len() != *size {
                    return Err(EngineError::argument(format!(
                        "output buffer {} has {}-element records, output {} needs {}",
                        i,
                        buffer.record_len(),
                        signature.outputs[i],
                        size
                    )));
                }
            }
            sizes
        } else {
            return Err(EngineError::argument(format!(
                "expected {} output buffer(s), got {}",
                sizes.len(),
                outputs.len()
            )));
        };
        for (i, buffer) in outputs.iter().enumerate() {
            if buffer.count() != lanes {
                return Err(EngineError::argument(format!(
                    "output buffer {} holds {} record(s) for {} lane(s)",
                    i,
                    buffer.count(),
                    lanes
                )));
            }
        }
        Ok(layout)
    }

    /// Run over whole output buffers.
    pub fn run(
        &self,
        bindings: &[LaneBinding<'_>],
        outputs: &mut [&mut Buffer],
    ) -> Result<KernelReport> {
        let mut views: Vec<BufferViewMut<'_>> = outputs.iter_mut().map(|b| b.view_mut()).collect();
        self.run_views(bindings, &mut views)
    }

    /// Run writing lane `i` into record `i` of every output view.
    pub fn run_views(
        &self,
        bindings: &[LaneBinding<'_>],
        outputs: &mut [BufferViewMut<'_>],
    ) -> Result<KernelReport> {
        let signature = self.executable.signature();
        let lanes = Self::lane_count(bindings, outputs)?;
        let layout = self.output_layout(outputs, lanes)?;

        let inputs = bindings
            .iter()
            .map(|b| match b {
                LaneBinding::Varying(view) => LaneInput::Varying(view.as_slice()),
                LaneBinding::Invariant(value) => LaneInput::Invariant(value),
            })
            .collect();
        let batch = LaneBatch::new(signature, inputs, lanes)?;
        let results = self.executable.invoke_lanes(&batch)?;

        let mut undefined = 0;
        for lane in 0..lanes {
            let record = results.lane(lane);
            let defined = results.defined[lane] && !self.sentinel.rejects(record);
            if !defined {
                undefined += 1;
            }
            let mut offset = 0;
            for (buffer, &len) in outputs.iter_mut().zip(&layout) {
                let slot = buffer.get_mut(lane)?;
                if defined {
                    slot.copy_from_slice(&record[offset..offset + len]);
                } else {
                    slot.fill(self.sentinel.value);
                }
                offset += len;
            }
        }

        if undefined > 0 {
            warn!(
                backend = self.executable.backend(),
                lanes,
                undefined,
                sentinel = self.sentinel.value,
                "undefined lanes replaced by sentinel"
            );
        }
        debug!(backend = self.executable.backend(), lanes, "kernel batch complete");
        Ok(KernelReport { lanes, undefined })
    }
}

//! Operator resolution: pick a runtime kernel for every node and size the
//! shared scratch buffer.
//!
//! - `table`: the runtime's kernel capability table
//! - Root module: lookup, deduplication, scratch sizing

pub mod table;

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::ir::{DType, Graph, KernelAssignment, OperatorNode};

pub use table::{Constraint, KernelDescriptor, ScratchRule, KERNELS};

/// A kernel class the generated engine must instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelRef {
    pub class_name: &'static str,
    pub source: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKernels {
    /// Deduplicated in first-use order; a node's `kernel_id` indexes this list.
    pub kernels: Vec<KernelRef>,
    /// Deduplicated kernel source modules, first-use order.
    pub sources: Vec<&'static str>,
    /// Max over nodes: scratch space is reused by each op in turn.
    pub scratch_buffer_size: usize,
}

impl ResolvedKernels {
    pub fn class_names(&self) -> Vec<&'static str> {
        self.kernels.iter().map(|k| k.class_name).collect()
    }
}

/// Resolve every node of `graph`, annotating each with its kernel.
pub fn resolve_kernels(graph: &mut Graph, config: &ModelConfig) -> Result<ResolvedKernels> {
    let mut kernels: Vec<KernelRef> = Vec::new();
    let mut sources: Vec<&'static str> = Vec::new();
    let mut scratch_buffer_size = 0;
    let mut assignments = Vec::with_capacity(graph.ops.len());

    for (index, op) in graph.ops.iter().enumerate() {
        let dtype = node_dtype(graph, index, op)?;
        let desc = KERNELS
            .iter()
            .find(|d| d.kind == op.kind && d.dtype == dtype && satisfies(d.constraint, graph, op, config))
            .ok_or_else(|| Error::UnresolvedOperator {
                index,
                name: op.name.clone(),
                op_type: op.kind.to_string(),
                dtype,
            })?;

        let kernel = KernelRef {
            class_name: desc.class_name,
            source: desc.source,
        };
        let kernel_id = match kernels.iter().position(|k| *k == kernel) {
            Some(id) => id,
            None => {
                kernels.push(kernel);
                kernels.len() - 1
            }
        };
        if !sources.contains(&desc.source) {
            sources.push(desc.source);
        }

        let scratch = scratch_size(desc.scratch, graph, index, op)?;
        scratch_buffer_size = scratch_buffer_size.max(scratch);
        log::debug!(
            "op #{index} '{}' ({}) -> {} [kernel {kernel_id}, scratch {scratch}]",
            op.name,
            op.kind,
            desc.class_name
        );

        assignments.push(KernelAssignment {
            kernel_id,
            class_name: desc.class_name,
            source: desc.source,
        });
    }

    for (op, assignment) in graph.ops.iter_mut().zip(assignments) {
        op.kernel = Some(assignment);
    }

    Ok(ResolvedKernels {
        kernels,
        sources,
        scratch_buffer_size,
    })
}

/// A node runs in the element type of its first output.
fn node_dtype(graph: &Graph, index: usize, op: &OperatorNode) -> Result<DType> {
    op.outputs
        .first()
        .map(|&id| graph.tensor(id).dtype)
        .ok_or_else(|| Error::malformed(format!("op #{index} '{}'", op.name), "has no outputs"))
}

fn satisfies(constraint: Constraint, graph: &Graph, op: &OperatorNode, config: &ModelConfig) -> bool {
    match constraint {
        Constraint::Any => true,
        Constraint::Quantized => config.is_quantized(),
        Constraint::ChannelsMultipleOf(n) => op
            .outputs
            .first()
            .and_then(|&id| graph.tensor(id).shape.last().copied())
            .is_some_and(|c| c % n == 0),
        Constraint::UnitDilation => op
            .arg_ints("dilations")
            .map_or(true, |d| d.iter().all(|&v| v == 1)),
    }
}

fn scratch_size(rule: ScratchRule, graph: &Graph, index: usize, op: &OperatorNode) -> Result<usize> {
    let entity = || format!("op #{index} '{}'", op.name);
    let input = |i: usize| {
        op.inputs
            .get(i)
            .map(|&id| graph.tensor(id))
            .ok_or_else(|| Error::malformed(entity(), format!("missing input {i}")))
    };
    let output = || {
        op.outputs
            .first()
            .map(|&id| graph.tensor(id))
            .ok_or_else(|| Error::malformed(entity(), "has no outputs"))
    };

    let size = match rule {
        ScratchRule::None => Some(0),
        ScratchRule::Im2col { accumulate } => {
            let (inp, filter, out) = (input(0)?, input(1)?, output()?);
            let [in_shape, w_shape, out_shape] = [&inp.shape, &filter.shape, &out.shape];
            if in_shape.len() != 4 || w_shape.len() != 4 || out_shape.len() != 4 {
                return Err(Error::malformed(
                    entity(),
                    format!(
                        "{} expects 4D tensors (input={}, filter={}, output={})",
                        op.kind,
                        in_shape.len(),
                        w_shape.len(),
                        out_shape.len()
                    ),
                ));
            }
            // NHWC activations, [Co, Kh, Kw, Ci] filters
            let [kh, kw, ci] = [w_shape[1], w_shape[2], w_shape[3]];
            let [oh, ow, co] = [out_shape[1], out_shape[2], out_shape[3]];
            let patches = [oh, ow, kh, kw, ci]
                .into_iter()
                .try_fold(inp.dtype.size(), usize::checked_mul);
            if accumulate {
                patches.and_then(|p| p.checked_add(co.checked_mul(4)?))
            } else {
                patches
            }
        }
        ScratchRule::Accumulator => output()?.shape.last().copied().unwrap_or(1).checked_mul(4),
        ScratchRule::TransposeRhs => input(1)?.checked_byte_size(),
        ScratchRule::Staging => input(0)?.shape.last().copied().unwrap_or(1).checked_mul(4),
        ScratchRule::OutputF32 => output()?.checked_num_elements().and_then(|n| n.checked_mul(4)),
    };
    size.ok_or_else(|| Error::malformed(entity(), "scratch buffer size overflows"))
}

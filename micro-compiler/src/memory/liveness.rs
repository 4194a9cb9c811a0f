//! Tensor lifetime analysis over the (already ordered) op list.

use crate::error::{Error, Result};
use crate::ir::{Graph, TensorId, TensorKind};

/// Inclusive range of op indices during which a tensor's buffer must stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime {
    pub start: usize,
    pub end: usize,
}

impl Lifetime {
    pub fn overlaps(&self, other: &Lifetime) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Lifetimes indexed by `TensorId`. Constants and tensors nothing touches get `None`.
pub fn compute_lifetimes(graph: &Graph) -> Result<Vec<Option<Lifetime>>> {
    let n = graph.tensors.len();
    let mut producer: Vec<Option<usize>> = vec![None; n];
    let mut first_use: Vec<Option<usize>> = vec![None; n];
    let mut last_use: Vec<Option<usize>> = vec![None; n];

    for (op_idx, op) in graph.ops.iter().enumerate() {
        for &id in &op.outputs {
            let tensor = graph.tensor(id);
            if matches!(tensor.kind, TensorKind::Input | TensorKind::Constant { .. }) {
                return Err(Error::malformed(
                    format!("tensor '{}'", tensor.name),
                    format!("written by op #{op_idx} '{}' but is not an activation", op.name),
                ));
            }
            if let Some(prev) = producer[id] {
                return Err(Error::malformed(
                    format!("tensor '{}'", tensor.name),
                    format!("produced by both op #{prev} and op #{op_idx}"),
                ));
            }
            producer[id] = Some(op_idx);
        }
        for &id in &op.inputs {
            first_use[id] = Some(first_use[id].map_or(op_idx, |u| u.min(op_idx)));
            last_use[id] = Some(last_use[id].map_or(op_idx, |u| u.max(op_idx)));
        }
    }

    let last_op = graph.ops.len().saturating_sub(1);
    let is_graph_output = |id: TensorId| {
        graph.outputs.contains(&id) || graph.tensor(id).kind == TensorKind::Output
    };

    let mut lifetimes = vec![None; n];
    for tensor in &graph.tensors {
        let id = tensor.id;
        let start = match tensor.kind {
            TensorKind::Constant { .. } => continue,
            TensorKind::Input => 0,
            TensorKind::Output | TensorKind::Intermediate => match producer[id] {
                Some(p) => p,
                None if first_use[id].is_some() || is_graph_output(id) => {
                    return Err(Error::malformed(
                        format!("tensor '{}'", tensor.name),
                        "consumed or exported but never produced",
                    ));
                }
                None => continue,
            },
        };

        if let Some(first) = first_use[id] {
            if first < start {
                return Err(Error::malformed(
                    format!("tensor '{}'", tensor.name),
                    format!("inverted lifetime: consumed by op #{first} before produced by op #{start}"),
                ));
            }
        }

        let mut end = last_use[id].unwrap_or(start);
        if is_graph_output(id) {
            end = end.max(last_op);
        }
        lifetimes[id] = Some(Lifetime { start, end });
    }

    Ok(lifetimes)
}

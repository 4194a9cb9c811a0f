//! Model description loading.
//!
//! A model is a JSON description plus a raw weights file. Constant tensors are
//! byte ranges of that file; the loader keeps the weights alongside the graph
//! and never copies individual tensors.

pub mod json;

use std::fs;
use std::path::Path;

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::ir::{DType, Graph, OpKind, OperatorNode, QuantParams, TensorId, TensorKind};

use json::{convert_args, ModelDescription, Role};

/// A graph paired with the weights payload its constant tensors point into.
#[derive(Debug)]
pub struct LoadedModel {
    pub graph: Graph,
    pub weights: Vec<u8>,
}

/// Read a description file and the weights file it names.
pub fn load_model(path: &Path, config: &ModelConfig) -> Result<LoadedModel> {
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let desc: ModelDescription = serde_json::from_str(&text).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let weights = match &desc.weights {
        Some(file) => {
            let weights_path = path.parent().unwrap_or(Path::new(".")).join(file);
            fs::read(&weights_path).map_err(|e| Error::io(&weights_path, e))?
        }
        None => Vec::new(),
    };
    log::debug!(
        "loaded '{}' from {}: {} tensors, {} ops, {} weight bytes",
        desc.name,
        path.display(),
        desc.tensors.len(),
        desc.ops.len(),
        weights.len()
    );

    let graph = lower(desc, weights.len(), config)?;
    Ok(LoadedModel { graph, weights })
}

/// Build the IR graph from a parsed description.
///
/// `weights_len` bounds the constant ranges.
pub fn lower(desc: ModelDescription, weights_len: usize, config: &ModelConfig) -> Result<Graph> {
    let default_dtype = config.effective_dtype();
    let mut graph = Graph::new(desc.name);
    graph.dtype = Some(default_dtype);
    graph.args = convert_args("model", &desc.args)?;

    for t in &desc.tensors {
        let entity = || format!("tensor '{}'", t.name);
        let dtype = match &t.dtype {
            Some(s) => DType::parse(s)
                .ok_or_else(|| Error::malformed(entity(), format!("unknown dtype '{s}'")))?,
            None => default_dtype,
        };
        let byte_size = t
            .shape
            .iter()
            .try_fold(dtype.size(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| Error::malformed(entity(), "byte size overflows"))?;
        let kind = match t.role {
            Role::Input => TensorKind::Input,
            Role::Output => TensorKind::Output,
            Role::Intermediate => TensorKind::Intermediate,
            Role::Constant => {
                let offset = t
                    .offset
                    .ok_or_else(|| Error::malformed(entity(), "constant without an offset"))?;
                let len = t.len.unwrap_or(byte_size);
                if len != byte_size {
                    return Err(Error::malformed(
                        entity(),
                        format!("weights range of {len} bytes for a {byte_size}-byte {dtype:?} tensor"),
                    ));
                }
                if offset.checked_add(len).map_or(true, |end| end > weights_len) {
                    return Err(Error::malformed(
                        entity(),
                        format!(
                            "range {offset}..{} outside the {weights_len}-byte weights payload",
                            offset.saturating_add(len)
                        ),
                    ));
                }
                TensorKind::Constant { offset, len }
            }
        };
        if t.role != Role::Constant && (t.offset.is_some() || t.len.is_some()) {
            return Err(Error::malformed(entity(), "only constants carry a weights range"));
        }

        let id = graph
            .add_tensor(t.name.clone(), t.shape.clone(), dtype, kind)
            .ok_or_else(|| Error::malformed(entity(), "declared twice"))?;
        graph.tensor_mut(id).quant = t.quant.map(|q| QuantParams {
            scale: q.scale,
            zero_point: q.zero_point,
        });
    }

    for op in &desc.ops {
        let owner = format!("op '{}'", op.name);
        let args = convert_args(&owner, &op.args)?;
        let resolve = |names: &[String]| -> Result<Vec<TensorId>> {
            names
                .iter()
                .map(|n| {
                    graph
                        .find(n)
                        .ok_or_else(|| Error::malformed(&owner, format!("references undeclared tensor '{n}'")))
                })
                .collect()
        };
        let inputs = resolve(&op.inputs)?;
        let outputs = resolve(&op.outputs)?;
        let kind = OpKind::parse(&op.op_type, &args);
        let mut node = OperatorNode::new(op.name.clone(), kind, inputs, outputs);
        node.args = args;
        graph.add_op(node);
    }

    graph.inputs = io_list(&graph, &desc.inputs, TensorKind::Input, "inputs")?;
    graph.outputs = io_list(&graph, &desc.outputs, TensorKind::Output, "outputs")?;

    Ok(graph)
}

/// Explicit list when given, otherwise every tensor with the matching role.
fn io_list(graph: &Graph, names: &[String], role: TensorKind, what: &str) -> Result<Vec<TensorId>> {
    if names.is_empty() {
        return Ok(graph
            .tensors
            .iter()
            .filter(|t| t.kind == role)
            .map(|t| t.id)
            .collect());
    }
    names
        .iter()
        .map(|n| {
            graph.find(n).ok_or_else(|| {
                Error::malformed(format!("graph {what}"), format!("undeclared tensor '{n}'"))
            })
        })
        .collect()
}

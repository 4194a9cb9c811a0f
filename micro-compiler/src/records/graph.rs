//! The runtime `Graph` record: per-op kernel ids and input wiring.

use crate::error::{Error, Result};
use crate::ir::{Graph, TensorId, TensorKind};
use crate::pack::{Field, FieldKind, Record, RecordSchema, ScalarKind, Value};
use crate::records::netdef::{dims_record, OUTPUT_SHAPE};

use FieldKind::{RecordList, Scalar, ScalarList};

/// Where an op input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoSource {
    /// `slot`-th output of op `op`.
    OpOutput { op: usize, slot: usize },
    /// Position in the graph input list.
    GraphInput(usize),
    /// Position in the net definition's constant list.
    Constant(usize),
}

impl IoSource {
    pub fn kind_code(self) -> u32 {
        match self {
            IoSource::OpOutput { .. } => 0,
            IoSource::GraphInput(_) => 1,
            IoSource::Constant(_) => 2,
        }
    }
}

pub static OP_IO_INFO: RecordSchema = RecordSchema {
    name: "OpIoInfo",
    fields: &[
        Field { name: "kind", kind: Scalar(ScalarKind::U32) },
        Field { name: "index", kind: Scalar(ScalarKind::U32) },
        Field { name: "slot", kind: Scalar(ScalarKind::U32) },
    ],
};

pub static OP_CONTEXT: RecordSchema = RecordSchema {
    name: "OpContext",
    fields: &[
        Field { name: "op_idx", kind: Scalar(ScalarKind::U32) },
        Field { name: "kernel_id", kind: Scalar(ScalarKind::U32) },
        Field { name: "inputs", kind: RecordList(&OP_IO_INFO) },
        Field { name: "output_resize_shapes", kind: RecordList(&OUTPUT_SHAPE) },
    ],
};

pub static GRAPH: RecordSchema = RecordSchema {
    name: "Graph",
    fields: &[
        Field { name: "op_contexts", kind: RecordList(&OP_CONTEXT) },
        Field { name: "input_infos", kind: ScalarList(ScalarKind::U32) },
        Field { name: "output_infos", kind: RecordList(&OP_IO_INFO) },
    ],
};

/// Marks a graph input no op reads.
pub const UNCONSUMED: u32 = u32::MAX;

/// Build the runtime graph record of a planned, resolved graph.
///
/// `input_infos[i]` is the first op reading graph input `i`; `output_infos`
/// names the producer of every graph output.
pub fn build_graph_record(graph: &Graph) -> Result<Record> {
    let sources = SourceMap::new(graph);

    let contexts = graph
        .ops
        .iter()
        .enumerate()
        .map(|(idx, op)| {
            let kernel = op.kernel.as_ref().ok_or_else(|| {
                Error::malformed(format!("op #{idx} '{}'", op.name), "has no kernel assigned")
            })?;
            let inputs = op
                .inputs
                .iter()
                .map(|&id| sources.lookup(graph, id).and_then(io_info))
                .collect::<Result<Vec<_>>>()?;
            let resize = op
                .outputs
                .iter()
                .map(|&id| dims_record(&graph.tensor(id).shape))
                .collect::<Result<Vec<_>>>()?;
            let record = Record::new(&OP_CONTEXT)
                .with("op_idx", to_u32(idx)?)?
                .with("kernel_id", to_u32(kernel.kernel_id)?)?
                .with("inputs", Value::List(inputs))?
                .with("output_resize_shapes", Value::List(resize))?;
            Ok(Value::Record(record))
        })
        .collect::<Result<Vec<_>>>()?;

    let input_infos = graph
        .inputs
        .iter()
        .map(|&id| {
            graph
                .ops
                .iter()
                .position(|op| op.inputs.contains(&id))
                .map_or(Ok(UNCONSUMED), to_u32)
        })
        .collect::<Result<Vec<_>>>()?;

    let output_infos = graph
        .outputs
        .iter()
        .map(|&id| sources.lookup(graph, id).and_then(io_info))
        .collect::<Result<Vec<_>>>()?;

    Record::new(&GRAPH)
        .with("op_contexts", Value::List(contexts))?
        .with("input_infos", Value::list(input_infos))?
        .with("output_infos", Value::List(output_infos))
}

fn io_info(source: IoSource) -> Result<Value> {
    let (index, slot) = match source {
        IoSource::OpOutput { op, slot } => (op, slot),
        IoSource::GraphInput(i) | IoSource::Constant(i) => (i, 0),
    };
    let record = Record::new(&OP_IO_INFO)
        .with("kind", source.kind_code())?
        .with("index", to_u32(index)?)?
        .with("slot", to_u32(slot)?)?;
    Ok(Value::Record(record))
}

/// Producer, graph-input position and constant position per tensor.
struct SourceMap {
    sources: Vec<Option<IoSource>>,
}

impl SourceMap {
    fn new(graph: &Graph) -> Self {
        let mut sources = vec![None; graph.tensors.len()];
        for (op, node) in graph.ops.iter().enumerate() {
            for (slot, &id) in node.outputs.iter().enumerate() {
                sources[id] = Some(IoSource::OpOutput { op, slot });
            }
        }
        for (pos, &id) in graph.inputs.iter().enumerate() {
            sources[id] = Some(IoSource::GraphInput(pos));
        }
        for (pos, tensor) in graph.constants().enumerate() {
            sources[tensor.id] = Some(IoSource::Constant(pos));
        }
        Self { sources }
    }

    fn lookup(&self, graph: &Graph, id: TensorId) -> Result<IoSource> {
        self.sources[id].ok_or_else(|| {
            let tensor = graph.tensor(id);
            let reason = match tensor.kind {
                TensorKind::Input => "is an input missing from the graph input list",
                _ => "is neither produced, a graph input, nor a constant",
            };
            Error::malformed(format!("tensor '{}'", tensor.name), reason)
        })
    }
}

fn to_u32(v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::malformed("graph record", format!("{v} does not fit in u32")))
}

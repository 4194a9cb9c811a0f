//! The `NetDef` record: operator list, constants and I/O description.

use crate::error::{Error, Result};
use crate::ir::{ArgValue, Graph, OperatorNode, Tensor, TensorId, TensorKind};
use crate::pack::{ExcludePolicy, Field, FieldKind, Record, RecordSchema, ScalarKind, Value};

use FieldKind::{Bytes, RecordList, Scalar, ScalarList, Str, StrList};

pub static ARGUMENT: RecordSchema = RecordSchema {
    name: "Argument",
    fields: &[
        Field { name: "name", kind: Str },
        Field { name: "f", kind: Scalar(ScalarKind::F32) },
        Field { name: "i", kind: Scalar(ScalarKind::I64) },
        Field { name: "s", kind: Bytes },
        Field { name: "floats", kind: ScalarList(ScalarKind::F32) },
        Field { name: "ints", kind: ScalarList(ScalarKind::I64) },
        Field { name: "strings", kind: StrList },
    ],
};

pub static OUTPUT_SHAPE: RecordSchema = RecordSchema {
    name: "OutputShape",
    fields: &[Field { name: "dims", kind: ScalarList(ScalarKind::I64) }],
};

pub static CONST_TENSOR: RecordSchema = RecordSchema {
    name: "ConstTensor",
    fields: &[
        Field { name: "dims", kind: ScalarList(ScalarKind::I64) },
        Field { name: "data_type", kind: Scalar(ScalarKind::U32) },
        Field { name: "offset", kind: Scalar(ScalarKind::I32) },
        Field { name: "data_size", kind: Scalar(ScalarKind::I32) },
        Field { name: "name", kind: Str },
        Field { name: "scale", kind: Scalar(ScalarKind::F32) },
        Field { name: "zero_point", kind: Scalar(ScalarKind::I32) },
    ],
};

pub static IO_INFO: RecordSchema = RecordSchema {
    name: "IoInfo",
    fields: &[
        Field { name: "name", kind: Str },
        Field { name: "dims", kind: ScalarList(ScalarKind::I32) },
        Field { name: "data_type", kind: Scalar(ScalarKind::U32) },
        Field { name: "mem_offset", kind: Scalar(ScalarKind::I32) },
        Field { name: "scale", kind: Scalar(ScalarKind::F32) },
        Field { name: "zero_point", kind: Scalar(ScalarKind::I32) },
    ],
};

pub static OPERATOR_DEF: RecordSchema = RecordSchema {
    name: "OperatorDef",
    fields: &[
        Field { name: "input", kind: StrList },
        Field { name: "output", kind: StrList },
        Field { name: "name", kind: Str },
        Field { name: "type", kind: Str },
        Field { name: "node_id", kind: Scalar(ScalarKind::I32) },
        Field { name: "op_id", kind: Scalar(ScalarKind::I32) },
        Field { name: "padding", kind: Scalar(ScalarKind::I32) },
        Field { name: "arg", kind: RecordList(&ARGUMENT) },
        Field { name: "output_shape", kind: RecordList(&OUTPUT_SHAPE) },
        Field { name: "output_type", kind: ScalarList(ScalarKind::U32) },
        Field { name: "mem_offset", kind: ScalarList(ScalarKind::I32) },
        Field { name: "node_input", kind: ScalarList(ScalarKind::I32) },
        Field { name: "out_max_byte_size", kind: ScalarList(ScalarKind::I32) },
    ],
};

pub static NET_DEF: RecordSchema = RecordSchema {
    name: "NetDef",
    fields: &[
        Field { name: "name", kind: Str },
        Field { name: "op", kind: RecordList(&OPERATOR_DEF) },
        Field { name: "arg", kind: RecordList(&ARGUMENT) },
        Field { name: "tensors", kind: RecordList(&CONST_TENSOR) },
        Field { name: "data_offset", kind: Scalar(ScalarKind::I64) },
        Field { name: "data_size", kind: Scalar(ScalarKind::I64) },
        Field { name: "infer_order", kind: ScalarList(ScalarKind::I32) },
        Field { name: "input_info", kind: RecordList(&IO_INFO) },
        Field { name: "output_info", kind: RecordList(&IO_INFO) },
        Field { name: "data_type", kind: Scalar(ScalarKind::U32) },
    ],
};

/// Converter bookkeeping the runtime never reads.
pub fn net_def_excludes() -> ExcludePolicy {
    ExcludePolicy::none()
        .exclude(
            OPERATOR_DEF.name,
            &["node_id", "op_id", "padding", "node_input", "out_max_byte_size"],
        )
        .exclude(NET_DEF.name, &["name", "data_offset", "data_size", "infer_order"])
}

/// Build the `NetDef` of a planned graph.
pub fn build_net_def(graph: &Graph) -> Result<Record> {
    let ops = graph
        .ops
        .iter()
        .enumerate()
        .map(|(i, op)| operator_def(graph, i, op))
        .collect::<Result<Vec<_>>>()?;
    let tensors = graph
        .constants()
        .map(const_tensor)
        .collect::<Result<Vec<_>>>()?;
    let input_info = io_infos(graph, &graph.inputs)?;
    let output_info = io_infos(graph, &graph.outputs)?;
    let infer_order = (0..graph.ops.len())
        .map(|i| to_i32("op index", i))
        .collect::<Result<Vec<_>>>()?;
    let data_type = graph.dtype.map_or(0, |d| d.code());

    Record::new(&NET_DEF)
        .with("name", graph.name.as_str())?
        .with("op", Value::List(ops))?
        .with("arg", Value::List(arguments(&graph.args)?))?
        .with("tensors", Value::List(tensors))?
        .with("infer_order", Value::list(infer_order))?
        .with("input_info", Value::List(input_info))?
        .with("output_info", Value::List(output_info))?
        .with("data_type", data_type)
}

fn operator_def(graph: &Graph, index: usize, op: &OperatorNode) -> Result<Value> {
    let names = |ids: &[TensorId]| Value::list(ids.iter().map(|&id| graph.tensor(id).name.clone()));
    let outputs: Vec<&Tensor> = op.outputs.iter().map(|&id| graph.tensor(id)).collect();

    let shapes = outputs
        .iter()
        .map(|t| dims_record(&t.shape))
        .collect::<Result<Vec<_>>>()?;
    let mem_offsets = outputs
        .iter()
        .map(|t| match t.mem_offset {
            Some(offset) => to_i32("mem_offset", offset),
            None => Err(Error::malformed(
                format!("tensor '{}'", t.name),
                "has no planned offset",
            )),
        })
        .collect::<Result<Vec<_>>>()?;
    let max_sizes = outputs
        .iter()
        .map(|t| to_i32("out_max_byte_size", t.byte_size()))
        .collect::<Result<Vec<_>>>()?;

    let record = Record::new(&OPERATOR_DEF)
        .with("input", names(&op.inputs))?
        .with("output", names(&op.outputs))?
        .with("name", op.name.as_str())?
        .with("type", op.kind.type_name())?
        .with("op_id", to_i32("op index", index)?)?
        .with("arg", Value::List(arguments(&op.args)?))?
        .with("output_shape", Value::List(shapes))?
        .with("output_type", Value::list(outputs.iter().map(|t| t.dtype.code())))?
        .with("mem_offset", Value::list(mem_offsets))?
        .with("out_max_byte_size", Value::list(max_sizes))?;
    Ok(Value::Record(record))
}

/// `OutputShape` record; also used for the graph record's resize shapes.
pub(crate) fn dims_record(dims: &[usize]) -> Result<Value> {
    let dims = Value::list(dims.iter().map(|&d| d as i64));
    Ok(Value::Record(Record::new(&OUTPUT_SHAPE).with("dims", dims)?))
}

fn const_tensor(tensor: &Tensor) -> Result<Value> {
    let (scale, zero_point) = quant(tensor);
    let offset = match tensor.kind {
        TensorKind::Constant { offset, .. } => offset,
        _ => 0,
    };
    let record = Record::new(&CONST_TENSOR)
        .with("dims", Value::list(tensor.shape.iter().map(|&d| d as i64)))?
        .with("data_type", tensor.dtype.code())?
        .with("offset", to_i32("constant offset", offset)?)?
        .with("data_size", to_i32("constant size", tensor.num_elements())?)?
        .with("name", tensor.name.as_str())?
        .with("scale", scale)?
        .with("zero_point", zero_point)?;
    Ok(Value::Record(record))
}

fn io_infos(graph: &Graph, ids: &[TensorId]) -> Result<Vec<Value>> {
    ids.iter()
        .map(|&id| {
            let tensor = graph.tensor(id);
            let (scale, zero_point) = quant(tensor);
            let mem_offset = match tensor.mem_offset {
                Some(offset) => to_i32("mem_offset", offset)?,
                None => -1,
            };
            let dims = tensor
                .shape
                .iter()
                .map(|&d| to_i32("dim", d))
                .collect::<Result<Vec<_>>>()?;
            let record = Record::new(&IO_INFO)
                .with("name", tensor.name.as_str())?
                .with("dims", Value::list(dims))?
                .with("data_type", tensor.dtype.code())?
                .with("mem_offset", mem_offset)?
                .with("scale", scale)?
                .with("zero_point", zero_point)?;
            Ok(Value::Record(record))
        })
        .collect()
}

fn quant(tensor: &Tensor) -> (f32, i32) {
    tensor.quant.map_or((0.0, 0), |q| (q.scale, q.zero_point))
}

fn arguments<'a>(
    args: impl IntoIterator<Item = (&'a String, &'a ArgValue)>,
) -> Result<Vec<Value>> {
    args.into_iter()
        .map(|(name, value)| {
            let record = Record::new(&ARGUMENT).with("name", name.as_str())?;
            let record = match value {
                ArgValue::Int(v) => record.with("i", *v)?,
                ArgValue::Float(v) => record.with("f", *v)?,
                ArgValue::Str(s) => record.with("s", s.as_bytes().to_vec())?,
                ArgValue::Ints(v) => record.with("ints", Value::list(v.iter().copied()))?,
                ArgValue::Floats(v) => record.with("floats", Value::list(v.iter().copied()))?,
                ArgValue::Strs(v) => record.with("strings", Value::list(v.iter().cloned()))?,
            };
            Ok(Value::Record(record))
        })
        .collect()
}

/// Sizes and offsets are `i32` on the runtime side.
pub(crate) fn to_i32(what: &str, v: usize) -> Result<i32> {
    i32::try_from(v).map_err(|_| Error::malformed(what, format!("{v} does not fit in i32")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ir::{DType, OpKind};
    use crate::pack::{pack, unpack, PackOptions};

    pub(crate) fn planned_graph() -> Graph {
        let mut graph = Graph::new("tiny");
        graph.dtype = Some(DType::F32);
        let x = graph.add_tensor("x", vec![1, 4], DType::F32, TensorKind::Input).unwrap();
        let w = graph
            .add_tensor("w", vec![4, 2], DType::F32, TensorKind::Constant { offset: 0, len: 32 })
            .unwrap();
        let y = graph.add_tensor("y", vec![1, 2], DType::F32, TensorKind::Output).unwrap();
        graph.inputs.push(x);
        graph.outputs.push(y);
        graph.tensor_mut(x).mem_offset = Some(0);
        graph.tensor_mut(y).mem_offset = Some(16);
        graph.add_op(
            OperatorNode::new("fc", OpKind::FullyConnected, vec![x, w], vec![y])
                .with_arg("activation", ArgValue::Str("relu".into()))
                .with_arg("weight_dims", ArgValue::Ints(vec![4, 2])),
        );
        graph
    }

    fn list<'a>(record: &'a Record, field: &str) -> &'a [Value] {
        match record.get(field) {
            Some(Value::List(items)) => items,
            other => panic!("{field}: expected list, got {other:?}"),
        }
    }

    fn record<'a>(value: &'a Value) -> &'a Record {
        match value {
            Value::Record(r) => r,
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn net_def_describes_every_op_and_constant() {
        let net_def = build_net_def(&planned_graph()).unwrap();

        let ops = list(&net_def, "op");
        assert_eq!(ops.len(), 1);
        let fc = record(&ops[0]);
        assert_eq!(fc.get("type"), Some(&Value::Str("FullyConnected".into())));
        assert_eq!(fc.get("mem_offset"), Some(&Value::list([16i32])));
        assert_eq!(
            fc.get("input"),
            Some(&Value::list(["x", "w"]))
        );
        // args are name-sorted
        let args = list(fc, "arg");
        assert_eq!(record(&args[0]).get("name"), Some(&Value::Str("activation".into())));
        assert_eq!(record(&args[0]).get("s"), Some(&Value::Bytes(b"relu".to_vec())));
        assert_eq!(record(&args[1]).get("ints"), Some(&Value::list([4i64, 2])));

        let consts = list(&net_def, "tensors");
        assert_eq!(consts.len(), 1);
        assert_eq!(record(&consts[0]).get("data_size"), Some(&Value::I32(8)));
        assert_eq!(record(&consts[0]).get("data_type"), Some(&Value::U32(1)));

        let inputs = list(&net_def, "input_info");
        assert_eq!(record(&inputs[0]).get("dims"), Some(&Value::list([1i32, 4])));
        assert_eq!(net_def.get("data_type"), Some(&Value::U32(1)));
    }

    #[test]
    fn excluded_fields_do_not_change_the_bytes() {
        let graph = planned_graph();
        let policy = net_def_excludes();
        let options = PackOptions::default();

        let base = build_net_def(&graph).unwrap();
        let mut noisy = base.clone();
        noisy.set("name", Value::Str("a much longer model name".into())).unwrap();
        noisy.set("data_offset", Value::I64(1 << 40)).unwrap();
        noisy.set("infer_order", Value::list([9i32, 9, 9])).unwrap();

        assert_eq!(
            pack(&base, &policy, options).unwrap(),
            pack(&noisy, &policy, options).unwrap()
        );
        assert_ne!(
            pack(&base, &ExcludePolicy::none(), options).unwrap(),
            pack(&noisy, &ExcludePolicy::none(), options).unwrap()
        );

        let bytes = pack(&base, &policy, options).unwrap();
        let back = unpack(&bytes, &NET_DEF, &policy, options).unwrap();
        assert_eq!(back.get("name"), Some(&Value::Str(String::new())));
        assert_eq!(back.get("infer_order"), Some(&Value::List(vec![])));
        let fc = record(&list(&back, "op")[0]);
        assert_eq!(fc.get("op_id"), Some(&Value::I32(0)));
        assert_eq!(fc.get("out_max_byte_size"), Some(&Value::List(vec![])));
        assert_eq!(fc.get("mem_offset"), Some(&Value::list([16i32])));
        assert_eq!(back.get("tensors"), base.get("tensors"));
    }

    #[test]
    fn unplanned_outputs_are_rejected() {
        let mut graph = planned_graph();
        graph.tensor_mut(2).mem_offset = None;
        assert!(matches!(
            build_net_def(&graph),
            Err(Error::MalformedGraph { .. })
        ));
    }
}

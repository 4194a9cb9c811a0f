//! Operator nodes.
//! Every supported operator kind is a variant of [`OpKind`]; the kernel table
//! in `kernels` is keyed on it.

use std::collections::BTreeMap;
use std::fmt;

use crate::ir::graph::TensorId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    Conv2d,
    DepthwiseConv2d,
    Pooling(PoolingType),
    FullyConnected,
    MatMul,
    Eltwise(EltwiseType),
    Activation(ActivationType),
    BiasAdd,
    Softmax,
    Reshape,
    Squeeze,
    ExpandDims,
    Concat,
    Reduce,
    ArgMax,
    /// Kept so the resolver can report it with the node's identity.
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolingType {
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EltwiseType {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationType {
    Relu,
    Relu6,
    Sigmoid,
    Tanh,
}

impl OpKind {
    /// Parse an operator type string. Sub-variants come from the node's arguments.
    pub fn parse(op_type: &str, args: &BTreeMap<String, ArgValue>) -> Self {
        let sub = |key: &str| {
            args.get(key)
                .and_then(ArgValue::as_str)
                .map(str::to_ascii_lowercase)
        };

        match op_type.to_ascii_lowercase().as_str() {
            "conv2d" => OpKind::Conv2d,
            "depthwiseconv2d" => OpKind::DepthwiseConv2d,
            "pooling" => match sub("pooling_type").as_deref() {
                None | Some("max") => OpKind::Pooling(PoolingType::Max),
                Some("avg") => OpKind::Pooling(PoolingType::Avg),
                Some(other) => OpKind::Unknown(format!("Pooling({other})")),
            },
            "fullyconnected" => OpKind::FullyConnected,
            "matmul" => OpKind::MatMul,
            "eltwise" => match sub("type").as_deref() {
                None | Some("add") => OpKind::Eltwise(EltwiseType::Add),
                Some("sub") => OpKind::Eltwise(EltwiseType::Sub),
                Some("mul") => OpKind::Eltwise(EltwiseType::Mul),
                Some("div") => OpKind::Eltwise(EltwiseType::Div),
                Some("max") => OpKind::Eltwise(EltwiseType::Max),
                Some("min") => OpKind::Eltwise(EltwiseType::Min),
                Some(other) => OpKind::Unknown(format!("Eltwise({other})")),
            },
            "activation" => match sub("activation").as_deref() {
                None | Some("relu") => OpKind::Activation(ActivationType::Relu),
                Some("relu6") => OpKind::Activation(ActivationType::Relu6),
                Some("sigmoid") => OpKind::Activation(ActivationType::Sigmoid),
                Some("tanh") => OpKind::Activation(ActivationType::Tanh),
                Some(other) => OpKind::Unknown(format!("Activation({other})")),
            },
            "biasadd" => OpKind::BiasAdd,
            "softmax" => OpKind::Softmax,
            "reshape" => OpKind::Reshape,
            "squeeze" => OpKind::Squeeze,
            "expanddims" => OpKind::ExpandDims,
            "concat" => OpKind::Concat,
            "reduce" => OpKind::Reduce,
            "argmax" => OpKind::ArgMax,
            _ => OpKind::Unknown(op_type.to_string()),
        }
    }

    /// Type string stored in the packed net definition.
    pub fn type_name(&self) -> &str {
        match self {
            OpKind::Conv2d => "Conv2D",
            OpKind::DepthwiseConv2d => "DepthwiseConv2d",
            OpKind::Pooling(_) => "Pooling",
            OpKind::FullyConnected => "FullyConnected",
            OpKind::MatMul => "MatMul",
            OpKind::Eltwise(_) => "Eltwise",
            OpKind::Activation(_) => "Activation",
            OpKind::BiasAdd => "BiasAdd",
            OpKind::Softmax => "Softmax",
            OpKind::Reshape => "Reshape",
            OpKind::Squeeze => "Squeeze",
            OpKind::ExpandDims => "ExpandDims",
            OpKind::Concat => "Concat",
            OpKind::Reduce => "Reduce",
            OpKind::ArgMax => "ArgMax",
            OpKind::Unknown(name) => name,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Pooling(p) => write!(f, "Pooling({p:?})"),
            OpKind::Eltwise(e) => write!(f, "Eltwise({e:?})"),
            OpKind::Activation(a) => write!(f, "Activation({a:?})"),
            other => f.write_str(other.type_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strs(Vec<String>),
}

impl ArgValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            ArgValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Kernel chosen by the operator resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelAssignment {
    /// Index into the model's deduplicated kernel class list.
    pub kernel_id: usize,
    pub class_name: &'static str,
    pub source: &'static str,
}

#[derive(Debug, Clone)]
pub struct OperatorNode {
    pub name: String,
    pub kind: OpKind,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
    pub args: BTreeMap<String, ArgValue>,
    pub kernel: Option<KernelAssignment>,
}

impl OperatorNode {
    pub fn new(
        name: impl Into<String>,
        kind: OpKind,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            outputs,
            args: BTreeMap::new(),
            kernel: None,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    pub fn arg_int(&self, name: &str) -> Option<i64> {
        self.args.get(name).and_then(ArgValue::as_int)
    }

    pub fn arg_ints(&self, name: &str) -> Option<&[i64]> {
        self.args.get(name).and_then(ArgValue::as_ints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, ArgValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ArgValue::Str(v.to_string())))
            .collect()
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(OpKind::parse("CONV2D", &BTreeMap::new()), OpKind::Conv2d);
        assert_eq!(OpKind::parse("softmax", &BTreeMap::new()), OpKind::Softmax);
    }

    #[test]
    fn sub_variants_come_from_args() {
        assert_eq!(
            OpKind::parse("Pooling", &args(&[("pooling_type", "AVG")])),
            OpKind::Pooling(PoolingType::Avg)
        );
        assert_eq!(
            OpKind::parse("Eltwise", &BTreeMap::new()),
            OpKind::Eltwise(EltwiseType::Add)
        );
        assert_eq!(
            OpKind::parse("Activation", &args(&[("activation", "relu6")])),
            OpKind::Activation(ActivationType::Relu6)
        );
    }

    #[test]
    fn unknown_types_are_kept() {
        let kind = OpKind::parse("LSTM", &BTreeMap::new());
        assert_eq!(kind, OpKind::Unknown("LSTM".into()));
        assert_eq!(kind.type_name(), "LSTM");
        assert_eq!(
            OpKind::parse("Activation", &args(&[("activation", "gelu")])),
            OpKind::Unknown("Activation(gelu)".into())
        );
    }
}

//! Kernel capability table of the `micro_engine` runtime.
//!
//! Rows are checked in order; the first row whose kind, dtype and constraint
//! match a node wins, so specialized kernels come before reference ones.

use crate::ir::{ActivationType, DType, EltwiseType, OpKind, PoolingType};

use Constraint::{Any, ChannelsMultipleOf, Quantized, UnitDilation};
use DType::{F32, I8};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Any,
    /// Only when the model is compiled with `quantize_schema = "int8"`.
    Quantized,
    /// Last output dimension divisible by `n`.
    ChannelsMultipleOf(usize),
    /// `dilations` absent or all ones.
    UnitDilation,
}

/// How much transient memory a kernel needs while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchRule {
    None,
    /// im2col patch matrix, plus an i32 row of output channels when `accumulate`.
    Im2col { accumulate: bool },
    /// One i32 accumulator per output channel.
    Accumulator,
    /// Transposed copy of the right-hand operand.
    TransposeRhs,
    /// f32 staging row over the input's last dimension.
    Staging,
    /// f32 buffer over every output element.
    OutputF32,
}

#[derive(Debug)]
pub struct KernelDescriptor {
    pub kind: OpKind,
    pub dtype: DType,
    pub constraint: Constraint,
    pub class_name: &'static str,
    pub source: &'static str,
    pub scratch: ScratchRule,
}

const fn row(
    kind: OpKind,
    dtype: DType,
    constraint: Constraint,
    class_name: &'static str,
    source: &'static str,
    scratch: ScratchRule,
) -> KernelDescriptor {
    KernelDescriptor {
        kind,
        dtype,
        constraint,
        class_name,
        source,
        scratch,
    }
}

pub static KERNELS: [KernelDescriptor; 37] = [
    // Convolutions
    row(OpKind::Conv2d, F32, ChannelsMultipleOf(4), "Conv2dC4Op", "ops/nhwc/conv_2d_c4.rs", ScratchRule::Im2col { accumulate: false }),
    row(OpKind::Conv2d, F32, Any, "Conv2dRefOp", "ops/nhwc/conv_2d_ref.rs", ScratchRule::None),
    row(OpKind::Conv2d, I8, Quantized, "Conv2dS8Op", "ops/nhwc/cmsis_nn/conv_2d_s8.rs", ScratchRule::Im2col { accumulate: true }),
    row(OpKind::DepthwiseConv2d, F32, UnitDilation, "DepthwiseConv2dRefOp", "ops/nhwc/depthwise_conv_2d_ref.rs", ScratchRule::None),
    row(OpKind::DepthwiseConv2d, I8, Quantized, "DepthwiseConv2dS8Op", "ops/nhwc/cmsis_nn/depthwise_conv_2d_s8.rs", ScratchRule::Accumulator),
    // Pooling
    row(OpKind::Pooling(PoolingType::Max), F32, Any, "MaxPoolRefOp", "ops/nhwc/pooling_ref.rs", ScratchRule::None),
    row(OpKind::Pooling(PoolingType::Avg), F32, Any, "AvgPoolRefOp", "ops/nhwc/pooling_ref.rs", ScratchRule::None),
    row(OpKind::Pooling(PoolingType::Max), I8, Quantized, "MaxPoolS8Op", "ops/nhwc/cmsis_nn/pooling_s8.rs", ScratchRule::None),
    row(OpKind::Pooling(PoolingType::Avg), I8, Quantized, "AvgPoolS8Op", "ops/nhwc/cmsis_nn/pooling_s8.rs", ScratchRule::Accumulator),
    // Dense
    row(OpKind::FullyConnected, F32, Any, "FullyConnectedRefOp", "ops/fully_connected.rs", ScratchRule::None),
    row(OpKind::FullyConnected, I8, Quantized, "FullyConnectedS8Op", "ops/cmsis_nn/fully_connected_s8.rs", ScratchRule::Accumulator),
    row(OpKind::MatMul, F32, Any, "MatMulOp", "ops/matmul.rs", ScratchRule::TransposeRhs),
    row(OpKind::MatMul, I8, Quantized, "MatMulS8Op", "ops/cmsis_nn/matmul_s8.rs", ScratchRule::Accumulator),
    row(OpKind::BiasAdd, F32, Any, "BiasAddOp", "ops/bias_add.rs", ScratchRule::None),
    // Elementwise
    row(OpKind::Eltwise(EltwiseType::Add), F32, Any, "EltwiseOp", "ops/eltwise.rs", ScratchRule::None),
    row(OpKind::Eltwise(EltwiseType::Sub), F32, Any, "EltwiseOp", "ops/eltwise.rs", ScratchRule::None),
    row(OpKind::Eltwise(EltwiseType::Mul), F32, Any, "EltwiseOp", "ops/eltwise.rs", ScratchRule::None),
    row(OpKind::Eltwise(EltwiseType::Div), F32, Any, "EltwiseOp", "ops/eltwise.rs", ScratchRule::None),
    row(OpKind::Eltwise(EltwiseType::Max), F32, Any, "EltwiseOp", "ops/eltwise.rs", ScratchRule::None),
    row(OpKind::Eltwise(EltwiseType::Min), F32, Any, "EltwiseOp", "ops/eltwise.rs", ScratchRule::None),
    row(OpKind::Eltwise(EltwiseType::Add), I8, Quantized, "EltwiseS8Op", "ops/cmsis_nn/eltwise_s8.rs", ScratchRule::None),
    row(OpKind::Eltwise(EltwiseType::Mul), I8, Quantized, "EltwiseS8Op", "ops/cmsis_nn/eltwise_s8.rs", ScratchRule::None),
    row(OpKind::Activation(ActivationType::Relu), F32, Any, "ActivationOp", "ops/activation.rs", ScratchRule::None),
    row(OpKind::Activation(ActivationType::Relu6), F32, Any, "ActivationOp", "ops/activation.rs", ScratchRule::None),
    row(OpKind::Activation(ActivationType::Sigmoid), F32, Any, "ActivationOp", "ops/activation.rs", ScratchRule::None),
    row(OpKind::Activation(ActivationType::Tanh), F32, Any, "ActivationOp", "ops/activation.rs", ScratchRule::None),
    // Normalization / reductions
    row(OpKind::Softmax, F32, Any, "SoftmaxOp", "ops/softmax.rs", ScratchRule::None),
    row(OpKind::Softmax, I8, Quantized, "SoftmaxS8Op", "ops/cmsis_nn/softmax_s8.rs", ScratchRule::Staging),
    row(OpKind::Reduce, F32, Any, "ReduceOp", "ops/reduce.rs", ScratchRule::OutputF32),
    row(OpKind::ArgMax, F32, Any, "ArgMaxOp", "ops/argmax.rs", ScratchRule::None),
    // Shape-only kernels work on any element type
    row(OpKind::Reshape, F32, Any, "ReshapeOp", "ops/reshape.rs", ScratchRule::None),
    row(OpKind::Reshape, I8, Any, "ReshapeOp", "ops/reshape.rs", ScratchRule::None),
    row(OpKind::Squeeze, F32, Any, "SqueezeOp", "ops/squeeze.rs", ScratchRule::None),
    row(OpKind::Squeeze, I8, Any, "SqueezeOp", "ops/squeeze.rs", ScratchRule::None),
    row(OpKind::ExpandDims, F32, Any, "ExpandDimsOp", "ops/expand_dims.rs", ScratchRule::None),
    row(OpKind::ExpandDims, I8, Any, "ExpandDimsOp", "ops/expand_dims.rs", ScratchRule::None),
    row(OpKind::Concat, F32, Any, "ConcatOp", "ops/concat.rs", ScratchRule::None),
];

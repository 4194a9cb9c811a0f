pub mod graph;
pub mod op;

pub use graph::{DType, Graph, QuantParams, Tensor, TensorId, TensorKind};
pub use op::{ActivationType, ArgValue, EltwiseType, KernelAssignment, OpKind, OperatorNode, PoolingType};

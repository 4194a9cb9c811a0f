//! Core graph types shared by every compilation stage.

use std::collections::{BTreeMap, HashMap};

use crate::ir::op::{ArgValue, OperatorNode};

pub type TensorId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub id: TensorId,
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub kind: TensorKind,
    pub quant: Option<QuantParams>,
    /// Arena offset, filled by the memory planner.
    pub mem_offset: Option<usize>,
}

impl Tensor {
    /// `None` when the element count does not fit a `usize`.
    pub fn checked_num_elements(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    pub fn checked_byte_size(&self) -> Option<usize> {
        self.checked_num_elements()?.checked_mul(self.dtype.size())
    }

    /// Saturates on overflow; stages that size memory use the checked forms.
    pub fn num_elements(&self) -> usize {
        self.checked_num_elements().unwrap_or(usize::MAX)
    }

    pub fn byte_size(&self) -> usize {
        self.checked_byte_size().unwrap_or(usize::MAX)
    }

    /// Constants live in the weights payload, everything else in the tensor arena.
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, TensorKind::Constant { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    F32,
    F16,
    I32,
    I8,
    U8,
}

impl DType {
    pub fn size(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I8 | DType::U8 => 1,
        }
    }

    /// Wire code understood by the runtime. Fixed, never renumber.
    pub fn code(self) -> u32 {
        match self {
            DType::F32 => 1,
            DType::U8 => 2,
            DType::F16 => 3,
            DType::I32 => 4,
            DType::I8 => 8,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(DType::F32),
            2 => Some(DType::U8),
            3 => Some(DType::F16),
            4 => Some(DType::I32),
            8 => Some(DType::I8),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "f32" | "float" | "float32" => Some(DType::F32),
            "f16" | "half" | "float16" => Some(DType::F16),
            "i32" | "int32" => Some(DType::I32),
            "i8" | "int8" => Some(DType::I8),
            "u8" | "uint8" => Some(DType::U8),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorKind {
    /// Graph input - provided by caller
    Input,
    /// Graph output - returned to caller
    Output,
    /// Weights/biases - byte range of the weights payload
    Constant { offset: usize, len: usize },
    /// Intermediate activation - lives in the tensor arena
    Intermediate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

#[derive(Debug, Default)]
pub struct Graph {
    pub name: String,
    pub dtype: Option<DType>,
    pub tensors: Vec<Tensor>,
    pub ops: Vec<OperatorNode>,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
    pub args: BTreeMap<String, ArgValue>,
    by_name: HashMap<String, TensorId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        &self.tensors[id]
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut Tensor {
        &mut self.tensors[id]
    }

    pub fn find(&self, name: &str) -> Option<TensorId> {
        self.by_name.get(name).copied()
    }

    /// Declare a tensor. Returns `None` when the name is already taken.
    pub fn add_tensor(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        dtype: DType,
        kind: TensorKind,
    ) -> Option<TensorId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return None;
        }
        let id = self.tensors.len();
        self.by_name.insert(name.clone(), id);
        self.tensors.push(Tensor {
            id,
            name,
            shape,
            dtype,
            kind,
            quant: None,
            mem_offset: None,
        });
        Some(id)
    }

    pub fn add_op(&mut self, op: OperatorNode) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    /// Constant tensors in declaration order; their position is the const-tensor index.
    pub fn constants(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter().filter(|t| t.is_constant())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_uses_dtype_width() {
        let mut graph = Graph::new("m");
        let f = graph
            .add_tensor("f", vec![2, 3], DType::F32, TensorKind::Intermediate)
            .unwrap();
        let q = graph
            .add_tensor("q", vec![2, 3], DType::I8, TensorKind::Intermediate)
            .unwrap();
        assert_eq!(graph.tensor(f).byte_size(), 24);
        assert_eq!(graph.tensor(q).byte_size(), 6);
    }

    #[test]
    fn checked_sizes_report_overflow() {
        let mut graph = Graph::new("m");
        let huge = graph
            .add_tensor("huge", vec![1 << 40, 1 << 40], DType::F32, TensorKind::Input)
            .unwrap();
        let wide = graph
            .add_tensor("wide", vec![usize::MAX / 2], DType::F32, TensorKind::Input)
            .unwrap();
        assert_eq!(graph.tensor(huge).checked_num_elements(), None);
        assert_eq!(graph.tensor(wide).checked_num_elements(), Some(usize::MAX / 2));
        assert_eq!(graph.tensor(wide).checked_byte_size(), None);
        assert_eq!(graph.tensor(huge).byte_size(), usize::MAX);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut graph = Graph::new("m");
        assert!(graph
            .add_tensor("x", vec![1], DType::F32, TensorKind::Input)
            .is_some());
        assert!(graph
            .add_tensor("x", vec![1], DType::F32, TensorKind::Output)
            .is_none());
        assert_eq!(graph.find("x"), Some(0));
    }

    #[test]
    fn dtype_codes_round_trip() {
        for dtype in [DType::F32, DType::F16, DType::I32, DType::I8, DType::U8] {
            assert_eq!(DType::from_code(dtype.code()), Some(dtype));
        }
        assert_eq!(DType::parse("Int8"), Some(DType::I8));
        assert_eq!(DType::parse("bf16"), None);
    }
}

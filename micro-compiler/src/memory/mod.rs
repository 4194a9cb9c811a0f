//! Tensor arena planning.
//!
//! Activations share one arena. Tensors are visited by ascending lifetime
//! start (ties: declaration order, then larger first) and placed best-fit into
//! ranges freed by tensors whose lifetime already ended. The arena only grows
//! when no free range is large enough.

pub mod liveness;

use std::cmp::Reverse;

use crate::error::{Error, Result};
use crate::ir::{Graph, TensorId};
use crate::pack::align_up;

pub use liveness::{compute_lifetimes, Lifetime};

/// A reserved byte range of the tensor arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    pub offset: usize,
    pub size: usize,
}

impl MemoryBlock {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &MemoryBlock) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub tensor: TensorId,
    pub lifetime: Lifetime,
    pub block: MemoryBlock,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPlan {
    /// Arena size in bytes.
    pub total_size: usize,
    /// In allocation order.
    pub assignments: Vec<Assignment>,
}

/// Plan the tensor arena and write each tensor's `mem_offset`.
pub fn plan_memory(graph: &mut Graph, alignment: usize) -> Result<MemoryPlan> {
    for tensor in &graph.tensors {
        let entity = || format!("tensor '{}'", tensor.name);
        match tensor.checked_byte_size() {
            None => return Err(Error::malformed(entity(), "byte size overflows")),
            Some(0) => {
                return Err(Error::malformed(
                    entity(),
                    format!("zero byte size (shape {:?})", tensor.shape),
                ))
            }
            Some(size) if size.checked_add(alignment).is_none() => {
                return Err(Error::malformed(entity(), "byte size overflows"))
            }
            Some(_) => {}
        }
    }

    let lifetimes = compute_lifetimes(graph)?;

    let mut order: Vec<(TensorId, Lifetime, usize)> = lifetimes
        .iter()
        .enumerate()
        .filter_map(|(id, lt)| {
            lt.map(|lt| (id, lt, align_up(graph.tensor(id).byte_size(), alignment)))
        })
        .collect();
    order.sort_by_key(|&(id, lt, size)| (lt.start, id, Reverse(size)));

    let mut arena = Arena::default();
    let mut live: Vec<(Lifetime, MemoryBlock)> = Vec::new();
    let mut assignments = Vec::with_capacity(order.len());

    for (id, lifetime, size) in order {
        live.retain(|(lt, block)| {
            let expired = lt.end < lifetime.start;
            if expired {
                arena.release(*block);
            }
            !expired
        });

        let block = arena.allocate(size).ok_or_else(|| {
            Error::malformed(
                format!("tensor '{}'", graph.tensor(id).name),
                "tensor arena size overflows",
            )
        })?;
        log::debug!(
            "tensor '{}' [{}..={}] -> offset {} ({} bytes)",
            graph.tensor(id).name,
            lifetime.start,
            lifetime.end,
            block.offset,
            block.size
        );
        live.push((lifetime, block));
        graph.tensor_mut(id).mem_offset = Some(block.offset);
        assignments.push(Assignment {
            tensor: id,
            lifetime,
            block,
        });
    }

    Ok(MemoryPlan {
        total_size: arena.size,
        assignments,
    })
}

/// Free list sorted by offset, adjacent ranges coalesced.
#[derive(Debug, Default)]
struct Arena {
    size: usize,
    free: Vec<MemoryBlock>,
}

impl Arena {
    /// `None` when growing the arena would overflow.
    fn allocate(&mut self, size: usize) -> Option<MemoryBlock> {
        let best = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, b)| b.size >= size)
            .min_by_key(|(_, b)| (b.size, b.offset))
            .map(|(i, _)| i);

        if let Some(i) = best {
            let range = &mut self.free[i];
            let block = MemoryBlock {
                offset: range.offset,
                size,
            };
            range.offset += size;
            range.size -= size;
            if range.size == 0 {
                self.free.remove(i);
            }
            return Some(block);
        }

        // Extend a free range that touches the end of the arena instead of skipping it.
        let (offset, from_tail) = match self.free.last() {
            Some(tail) if tail.end() == self.size => (tail.offset, true),
            _ => (self.size, false),
        };
        self.size = offset.checked_add(size)?;
        if from_tail {
            self.free.pop();
        }
        Some(MemoryBlock { offset, size })
    }

    fn release(&mut self, block: MemoryBlock) {
        let idx = self.free.partition_point(|b| b.offset < block.offset);
        self.free.insert(idx, block);

        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].offset {
            self.free[idx].size += self.free[idx + 1].size;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].offset {
            self.free[idx - 1].size += self.free[idx].size;
            self.free.remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DType, OpKind, OperatorNode, TensorKind};

    fn bytes(graph: &mut Graph, name: &str, size: usize, kind: TensorKind) -> TensorId {
        graph.add_tensor(name, vec![size], DType::U8, kind).unwrap()
    }

    fn op(graph: &mut Graph, name: &str, inputs: Vec<TensorId>, output: TensorId) {
        graph.add_op(OperatorNode::new(
            name,
            OpKind::parse("Activation", &Default::default()),
            inputs,
            vec![output],
        ));
    }

    fn assert_no_conflicts(plan: &MemoryPlan) {
        for (i, a) in plan.assignments.iter().enumerate() {
            assert!(a.block.end() <= plan.total_size);
            for b in &plan.assignments[i + 1..] {
                if a.lifetime.overlaps(&b.lifetime) {
                    assert!(
                        !a.block.overlaps(&b.block),
                        "tensors {} and {} overlap: {:?} {:?}",
                        a.tensor,
                        b.tensor,
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn three_node_chain_reuses_the_input_block() {
        // input(100) -> opA -> t(50) -> opB -> output(100)
        let mut graph = Graph::new("chain");
        let input = bytes(&mut graph, "input", 100, TensorKind::Input);
        let mid = bytes(&mut graph, "mid", 50, TensorKind::Intermediate);
        let output = bytes(&mut graph, "output", 100, TensorKind::Output);
        op(&mut graph, "opA", vec![input], mid);
        op(&mut graph, "opB", vec![mid], output);

        let plan = plan_memory(&mut graph, 4).unwrap();
        assert!(plan.total_size <= 200, "total {}", plan.total_size);
        assert_eq!(plan.total_size, 152);
        assert_eq!(graph.tensor(output).mem_offset, graph.tensor(input).mem_offset);
        assert_no_conflicts(&plan);
    }

    #[test]
    fn zero_sized_tensor_is_malformed() {
        let mut graph = Graph::new("m");
        let input = bytes(&mut graph, "input", 16, TensorKind::Input);
        let empty = graph
            .add_tensor("empty", vec![4, 0], DType::F32, TensorKind::Output)
            .unwrap();
        op(&mut graph, "r", vec![input], empty);

        match plan_memory(&mut graph, 4) {
            Err(Error::MalformedGraph { entity, .. }) => assert_eq!(entity, "tensor 'empty'"),
            other => panic!("expected MalformedGraph, got {other:?}"),
        }
    }

    #[test]
    fn oversized_tensors_are_malformed() {
        let mut graph = Graph::new("m");
        let input = graph
            .add_tensor("input", vec![1 << 40, 1 << 40], DType::F32, TensorKind::Input)
            .unwrap();
        let out = bytes(&mut graph, "out", 8, TensorKind::Output);
        op(&mut graph, "r", vec![input], out);

        match plan_memory(&mut graph, 4) {
            Err(Error::MalformedGraph { entity, .. }) => assert_eq!(entity, "tensor 'input'"),
            other => panic!("expected MalformedGraph, got {other:?}"),
        }
    }

    #[test]
    fn arena_growth_overflow_is_malformed() {
        let mut graph = Graph::new("m");
        let half = usize::MAX / 2;
        let a = bytes(&mut graph, "a", half, TensorKind::Input);
        let b = bytes(&mut graph, "b", half, TensorKind::Input);
        let out = bytes(&mut graph, "out", 8, TensorKind::Output);
        op(&mut graph, "add", vec![a, b], out);

        match plan_memory(&mut graph, 4) {
            Err(Error::MalformedGraph { entity, .. }) => assert_eq!(entity, "tensor 'b'"),
            other => panic!("expected MalformedGraph, got {other:?}"),
        }
    }

    #[test]
    fn constants_are_not_planned() {
        let mut graph = Graph::new("m");
        let input = bytes(&mut graph, "input", 8, TensorKind::Input);
        let w = bytes(&mut graph, "w", 1024, TensorKind::Constant { offset: 0, len: 1024 });
        let out = bytes(&mut graph, "out", 8, TensorKind::Output);
        graph.add_op(OperatorNode::new("fc", OpKind::FullyConnected, vec![input, w], vec![out]));

        let plan = plan_memory(&mut graph, 4).unwrap();
        assert_eq!(plan.total_size, 16);
        assert_eq!(graph.tensor(w).mem_offset, None);
    }

    #[test]
    fn freed_neighbours_coalesce() {
        let mut arena = Arena::default();
        let a = arena.allocate(8).unwrap();
        let b = arena.allocate(8).unwrap();
        let c = arena.allocate(8).unwrap();
        arena.release(a);
        arena.release(c);
        arena.release(b);
        assert_eq!(arena.free, vec![MemoryBlock { offset: 0, size: 24 }]);
        // Best fit takes the smallest range that fits.
        let mut arena = Arena::default();
        let big = arena.allocate(32).unwrap();
        let _keep = arena.allocate(4).unwrap();
        let small = arena.allocate(8).unwrap();
        let _keep2 = arena.allocate(4).unwrap();
        arena.release(big);
        arena.release(small);
        assert_eq!(arena.allocate(8).unwrap().offset, small.offset);
    }

    #[test]
    fn growth_extends_a_free_tail() {
        let mut arena = Arena::default();
        let _a = arena.allocate(8).unwrap();
        let b = arena.allocate(8).unwrap();
        arena.release(b);
        let c = arena.allocate(16).unwrap();
        assert_eq!(c.offset, 8);
        assert_eq!(arena.size, 24);
    }

    /// Small deterministic generator for the property check.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: usize) -> usize {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 33) as usize) % bound
        }
    }

    #[test]
    fn random_graphs_never_overlap_and_never_exceed_the_sum() {
        let mut rng = Lcg(0x5eed);
        for case in 0..200 {
            let mut graph = Graph::new(format!("g{case}"));
            let mut available = vec![bytes(&mut graph, "in", 4 * (1 + rng.next(64)), TensorKind::Input)];
            graph.inputs.push(available[0]);

            let num_ops = 1 + rng.next(12);
            for i in 0..num_ops {
                let fan_in = 1 + rng.next(2);
                let inputs: Vec<_> = (0..fan_in)
                    .map(|_| available[rng.next(available.len())])
                    .collect();
                let kind = if i + 1 == num_ops {
                    TensorKind::Output
                } else {
                    TensorKind::Intermediate
                };
                let out = bytes(&mut graph, &format!("t{i}"), 4 * (1 + rng.next(64)), kind);
                op(&mut graph, &format!("op{i}"), inputs, out);
                available.push(out);
            }

            let sum: usize = graph.tensors.iter().map(|t| t.byte_size()).sum();
            let plan = plan_memory(&mut graph, 4).unwrap();
            assert!(plan.total_size <= sum, "case {case}: {} > {sum}", plan.total_size);
            assert_no_conflicts(&plan);

            let again = plan_memory(&mut graph, 4).unwrap();
            assert_eq!(plan, again, "case {case}: planning is not deterministic");
        }
    }
}

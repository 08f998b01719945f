use std::time::Instant;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model::{OpId, OpKind};
use crate::optimization::graph_optimizer::{OptimizationPass, PassResult};

/// Two chained transposes whose permutations cancel out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InversePair {
    pub first: OpId,
    pub second: OpId,
}

/// Removes `Transpose -> Transpose` chains that compose to the identity.
///
/// Consumers of the second transpose read the first transpose's input
/// directly; both operators and both intermediate tensors are deleted. Only
/// chains where the first output has a single consumer are eligible, and a
/// pair whose result is not consumed by anything is left in place.
pub struct InverseTransposeElimination {
    name: String,
}

impl Default for InverseTransposeElimination {
    fn default() -> Self {
        Self::new()
    }
}

impl InverseTransposeElimination {
    pub fn new() -> Self {
        Self {
            name: "InverseTransposeElimination".to_string(),
        }
    }

    /// First eligible pair in operator order
    pub fn find_pair(&self, graph: &Graph) -> Option<InversePair> {
        for op in graph.operators() {
            let first = match op.kind() {
                OpKind::Transpose(transpose) => transpose,
                _ => continue,
            };
            let middle = match op.output().and_then(|output| graph.get_tensor(output)) {
                Some(tensor) => tensor,
                None => continue,
            };
            let next = match middle.targets() {
                [only] => match graph.operator(*only) {
                    Ok(next) => next,
                    Err(_) => continue,
                },
                _ => continue,
            };
            let second = match next.kind() {
                OpKind::Transpose(transpose) => transpose,
                _ => continue,
            };
            if next.id() == op.id() || !first.is_inverse_of(second) {
                continue;
            }

            let consumers = match next.output().and_then(|output| graph.get_tensor(output)) {
                Some(result) => result.targets(),
                None => continue,
            };
            if consumers.is_empty() || consumers.contains(&op.id()) {
                continue;
            }

            return Some(InversePair {
                first: op.id(),
                second: next.id(),
            });
        }
        None
    }

    /// Bypass and delete both transposes of `pair`
    pub fn eliminate(&self, graph: &mut Graph, pair: InversePair) -> Result<()> {
        let first = graph.operator(pair.first)?;
        let source = first.input(0).ok_or_else(|| {
            Error::InvalidOperator(format!("Transpose {} has no input", pair.first))
        })?;
        let middle = first.output().ok_or_else(|| {
            Error::InvalidOperator(format!("Transpose {} has no output", pair.first))
        })?;
        let result = graph.operator(pair.second)?.output().ok_or_else(|| {
            Error::InvalidOperator(format!("Transpose {} has no output", pair.second))
        })?;

        let consumers = graph.tensor(result)?.targets().to_vec();
        for consumer in consumers {
            let positions: Vec<usize> = graph
                .operator(consumer)?
                .inputs()
                .iter()
                .enumerate()
                .filter(|(_, input)| **input == result)
                .map(|(index, _)| index)
                .collect();
            for index in positions {
                graph.rewire_input(consumer, index, source)?;
            }
        }

        graph.detach_operator(pair.second)?;
        graph.detach_operator(pair.first)?;
        graph.remove_tensor(result)?;
        graph.remove_tensor(middle)?;

        log::debug!(
            "eliminated inverse transposes {} and {}, tensor {} now feeds their consumers",
            pair.first,
            pair.second,
            source
        );
        Ok(())
    }
}

impl OptimizationPass for InverseTransposeElimination {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let start_time = Instant::now();

        // Rescan from the start after every rewrite
        let mut count = 0;
        while let Some(pair) = self.find_pair(graph) {
            self.eliminate(graph, pair)?;
            count += 1;
        }

        Ok(PassResult::new(&self.name, count, start_time.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, OpType, TensorId};
    use crate::ops::UnaryKind;
    use crate::runtime::CpuRuntime;
    use std::sync::Arc;

    fn graph() -> Graph {
        Graph::new(Arc::new(CpuRuntime::new()))
    }

    fn transposes(graph: &Graph) -> usize {
        graph
            .operators()
            .iter()
            .filter(|op| op.op_type() == OpType::Transpose)
            .count()
    }

    fn run(graph: &mut Graph) -> usize {
        InverseTransposeElimination::new()
            .run(graph)
            .unwrap()
            .optimizations_applied
    }

    #[test]
    fn test_inverse_pair_collapses_to_direct_edge() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3], DataType::Float32);
        let t1 = graph.add_transpose(x, vec![1, 0]).unwrap();
        let t2 = graph.add_transpose(t1, vec![1, 0]).unwrap();
        let y = graph.add_unary(UnaryKind::Relu, t2).unwrap();
        let relu = graph.tensor(y).unwrap().source().unwrap();
        assert!(graph.topo_sort());

        assert_eq!(run(&mut graph), 1);

        assert_eq!(transposes(&graph), 0);
        assert!(graph.get_tensor(t1).is_none());
        assert!(graph.get_tensor(t2).is_none());
        assert_eq!(graph.operator(relu).unwrap().inputs(), &[x]);
        assert_eq!(graph.tensor(x).unwrap().targets(), &[relu]);
        assert!(graph.operator(relu).unwrap().predecessors().is_empty());
        assert!(graph.is_sorted());
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_non_involutive_inverse_pair() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3, 4], DataType::Float32);
        let t1 = graph.add_transpose(x, vec![1, 2, 0]).unwrap();
        let t2 = graph.add_transpose(t1, vec![2, 0, 1]).unwrap();
        assert_eq!(graph.tensor(t2).unwrap().dims(), &[2, 3, 4]);
        graph.add_unary(UnaryKind::Abs, t2).unwrap();

        assert_eq!(run(&mut graph), 1);
        assert_eq!(transposes(&graph), 0);
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_non_inverse_pair_kept() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3, 4], DataType::Float32);
        let t1 = graph.add_transpose(x, vec![1, 0, 2]).unwrap();
        let t2 = graph.add_transpose(t1, vec![0, 2, 1]).unwrap();
        graph.add_unary(UnaryKind::Abs, t2).unwrap();

        assert_eq!(run(&mut graph), 0);
        assert_eq!(transposes(&graph), 2);
    }

    #[test]
    fn test_shared_intermediate_not_collapsed() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3], DataType::Float32);
        let t1 = graph.add_transpose(x, vec![1, 0]).unwrap();
        let t2 = graph.add_transpose(t1, vec![1, 0]).unwrap();
        graph.add_unary(UnaryKind::Relu, t2).unwrap();
        graph.add_unary(UnaryKind::Tanh, t1).unwrap();

        assert_eq!(run(&mut graph), 0);
        assert_eq!(transposes(&graph), 2);
    }

    #[test]
    fn test_unconsumed_result_kept() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3], DataType::Float32);
        let t1 = graph.add_transpose(x, vec![1, 0]).unwrap();
        graph.add_transpose(t1, vec![1, 0]).unwrap();

        assert_eq!(run(&mut graph), 0);
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_bypass_links_upstream_producer() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3], DataType::Float32);
        let p = graph.add_unary(UnaryKind::Sigmoid, x).unwrap();
        let t1 = graph.add_transpose(p, vec![1, 0]).unwrap();
        let t2 = graph.add_transpose(t1, vec![1, 0]).unwrap();
        let left = graph.add_unary(UnaryKind::Relu, t2).unwrap();
        let right = graph.add_unary(UnaryKind::Abs, t2).unwrap();

        let producer = graph.tensor(p).unwrap().source().unwrap();
        let consumers: Vec<OpId> = [left, right]
            .iter()
            .map(|&t: &TensorId| graph.tensor(t).unwrap().source().unwrap())
            .collect();

        assert_eq!(run(&mut graph), 1);

        assert_eq!(graph.operator(producer).unwrap().successors(), consumers.as_slice());
        for consumer in &consumers {
            assert_eq!(graph.operator(*consumer).unwrap().predecessors(), &[producer]);
            assert_eq!(graph.operator(*consumer).unwrap().inputs(), &[p]);
        }
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_chain_of_four_needs_two_rewrites() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 3], DataType::Float32);
        let mut current = x;
        for _ in 0..4 {
            current = graph.add_transpose(current, vec![1, 0]).unwrap();
        }
        graph.add_unary(UnaryKind::Relu, current).unwrap();

        assert_eq!(run(&mut graph), 2);
        assert_eq!(transposes(&graph), 0);
        assert_eq!(graph.tensors().len(), 2);
        graph.check_valid().unwrap();
    }
}

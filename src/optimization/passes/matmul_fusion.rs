use std::time::Instant;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model::{OpId, OpKind};
use crate::optimization::graph_optimizer::{OptimizationPass, PassResult};

/// A MatMul input produced by a transpose of the two trailing axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionCandidate {
    pub matmul: OpId,
    /// 0 for the left operand, 1 for the right one
    pub input_index: usize,
    pub transpose: OpId,
}

/// Folds trailing-axis transposes into the `trans_a`/`trans_b` flags of the
/// MatMul that consumes them.
pub struct TransposeMatMulFusion {
    name: String,
}

impl Default for TransposeMatMulFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl TransposeMatMulFusion {
    pub fn new() -> Self {
        Self {
            name: "TransposeMatMulFusion".to_string(),
        }
    }

    /// First MatMul input, in operator order, that can absorb its producer
    pub fn find_candidate(&self, graph: &Graph) -> Option<FusionCandidate> {
        for op in graph.operators() {
            if !matches!(op.kind(), OpKind::MatMul(_)) {
                continue;
            }
            for input_index in 0..2 {
                let source = match op
                    .input(input_index)
                    .and_then(|input| graph.get_tensor(input))
                    .and_then(|tensor| tensor.source())
                {
                    Some(source) => source,
                    None => continue,
                };
                let producer = match graph.operator(source) {
                    Ok(producer) => producer,
                    Err(_) => continue,
                };
                if let OpKind::Transpose(transpose) = producer.kind() {
                    if transpose.swaps_last_two() {
                        return Some(FusionCandidate {
                            matmul: op.id(),
                            input_index,
                            transpose: source,
                        });
                    }
                }
            }
        }
        None
    }

    /// Toggle the matching transpose flag and read the transpose's input
    /// directly. The transpose is deleted once nothing else consumes it.
    pub fn fuse(&self, graph: &mut Graph, candidate: FusionCandidate) -> Result<()> {
        let transpose = graph.operator(candidate.transpose)?;
        let original = transpose.input(0).ok_or_else(|| {
            Error::InvalidOperator(format!("Transpose {} has no input", candidate.transpose))
        })?;
        let intermediate = transpose.output().ok_or_else(|| {
            Error::InvalidOperator(format!("Transpose {} has no output", candidate.transpose))
        })?;

        match graph.operator_mut(candidate.matmul)?.kind_mut() {
            OpKind::MatMul(matmul) => match candidate.input_index {
                0 => matmul.set_trans_a(!matmul.trans_a()),
                1 => matmul.set_trans_b(!matmul.trans_b()),
                index => {
                    return Err(Error::InvalidOperator(format!(
                        "MatMul has no operand {}",
                        index
                    )))
                }
            },
            _ => {
                return Err(Error::InvalidOperator(format!(
                    "Operator {} is not a MatMul",
                    candidate.matmul
                )))
            }
        }
        graph.rewire_input(candidate.matmul, candidate.input_index, original)?;

        let removed = graph.tensor(intermediate)?.targets().is_empty();
        if removed {
            graph.detach_operator(candidate.transpose)?;
            graph.remove_tensor(intermediate)?;
        }

        log::debug!(
            "folded transpose {} into operand {} of {}{}",
            candidate.transpose,
            candidate.input_index,
            candidate.matmul,
            if removed { "" } else { " (transpose kept for other consumers)" }
        );
        Ok(())
    }
}

impl OptimizationPass for TransposeMatMulFusion {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, graph: &mut Graph) -> Result<PassResult> {
        let start_time = Instant::now();

        let mut count = 0;
        while let Some(candidate) = self.find_candidate(graph) {
            self.fuse(graph, candidate)?;
            count += 1;
        }

        Ok(PassResult::new(&self.name, count, start_time.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, OpType, TensorId};
    use crate::ops::{MatMul, UnaryKind};
    use crate::runtime::CpuRuntime;
    use std::sync::Arc;

    fn graph() -> Graph {
        Graph::new(Arc::new(CpuRuntime::new()))
    }

    fn run(graph: &mut Graph) -> usize {
        TransposeMatMulFusion::new()
            .run(graph)
            .unwrap()
            .optimizations_applied
    }

    fn matmul_of(graph: &Graph, output: TensorId) -> (OpId, MatMul) {
        let id = graph.tensor(output).unwrap().source().unwrap();
        match graph.operator(id).unwrap().kind() {
            OpKind::MatMul(matmul) => (id, matmul.clone()),
            other => panic!("expected MatMul, got {}", other),
        }
    }

    #[test]
    fn test_transpose_folded_into_trans_a() {
        let mut graph = graph();
        let a_prime = graph.add_tensor(vec![2, 4, 3], DataType::Float32);
        let b = graph.add_tensor(vec![2, 4, 5], DataType::Float32);
        let a = graph.add_transpose(a_prime, vec![0, 2, 1]).unwrap();
        let c = graph.add_matmul(a, b, false, false).unwrap();
        assert!(graph.topo_sort());

        assert_eq!(run(&mut graph), 1);

        let (id, matmul) = matmul_of(&graph, c);
        assert!(matmul.trans_a());
        assert!(!matmul.trans_b());
        assert_eq!(graph.operator(id).unwrap().inputs(), &[a_prime, b]);
        assert!(graph.get_tensor(a).is_none());
        assert_eq!(graph.operators().len(), 1);
        assert!(graph.is_sorted());
        graph.check_valid().unwrap();

        graph.shape_infer().unwrap();
        assert_eq!(graph.tensor(c).unwrap().dims(), &[2, 3, 5]);
    }

    #[test]
    fn test_transpose_folded_into_trans_b() {
        let mut graph = graph();
        let a = graph.add_tensor(vec![3, 4], DataType::Float32);
        let w = graph.add_tensor(vec![5, 4], DataType::Float32);
        let wt = graph.add_transpose(w, vec![1, 0]).unwrap();
        let c = graph.add_matmul(a, wt, false, false).unwrap();

        assert_eq!(run(&mut graph), 1);
        let (id, matmul) = matmul_of(&graph, c);
        assert!(matmul.trans_b());
        assert_eq!(graph.operator(id).unwrap().inputs(), &[a, w]);
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_other_permutations_not_eligible() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 4, 3], DataType::Float32);
        let b = graph.add_tensor(vec![4, 3, 5], DataType::Float32);
        // Moves the batch axis, so it cannot become a flag
        let a = graph.add_transpose(x, vec![1, 0, 2]).unwrap();
        graph.add_matmul(a, b, false, false).unwrap();

        assert_eq!(run(&mut graph), 0);
        assert_eq!(graph.operators().len(), 2);
    }

    #[test]
    fn test_shared_transpose_is_kept() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![4, 3], DataType::Float32);
        let b = graph.add_tensor(vec![4, 6], DataType::Float32);
        let xt = graph.add_transpose(x, vec![1, 0]).unwrap();
        let c = graph.add_matmul(xt, b, false, false).unwrap();
        let side = graph.add_unary(UnaryKind::Relu, xt).unwrap();

        assert_eq!(run(&mut graph), 1);

        let (id, matmul) = matmul_of(&graph, c);
        assert!(matmul.trans_a());
        assert_eq!(graph.operator(id).unwrap().inputs(), &[x, b]);
        let transpose = graph.tensor(xt).unwrap().source().unwrap();
        assert_eq!(graph.operator(transpose).unwrap().op_type(), OpType::Transpose);
        let relu = graph.tensor(side).unwrap().source().unwrap();
        assert_eq!(graph.tensor(xt).unwrap().targets(), &[relu]);
        assert_eq!(graph.operator(transpose).unwrap().successors(), &[relu]);
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_flag_is_toggled() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![3, 4], DataType::Float32);
        let b = graph.add_tensor(vec![4, 5], DataType::Float32);
        let xt = graph.add_transpose(x, vec![1, 0]).unwrap();
        // (x^T)^T x b
        let c = graph.add_matmul(xt, b, true, false).unwrap();
        assert_eq!(graph.tensor(c).unwrap().dims(), &[3, 5]);

        assert_eq!(run(&mut graph), 1);
        let (_, matmul) = matmul_of(&graph, c);
        assert!(!matmul.trans_a());
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_same_transpose_on_both_operands() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![3, 3], DataType::Float32);
        let xt = graph.add_transpose(x, vec![1, 0]).unwrap();
        let c = graph.add_matmul(xt, xt, false, false).unwrap();

        assert_eq!(run(&mut graph), 2);
        let (id, matmul) = matmul_of(&graph, c);
        assert!(matmul.trans_a() && matmul.trans_b());
        assert_eq!(graph.operator(id).unwrap().inputs(), &[x, x]);
        assert!(graph.get_tensor(xt).is_none());
        assert_eq!(graph.tensor(x).unwrap().targets(), &[id]);
        graph.check_valid().unwrap();
    }

    #[test]
    fn test_upstream_producer_relinked() {
        let mut graph = graph();
        let x = graph.add_tensor(vec![2, 4, 3], DataType::Float32);
        let y = graph.add_unary(UnaryKind::Tanh, x).unwrap();
        let yt = graph.add_transpose(y, vec![0, 2, 1]).unwrap();
        let b = graph.add_tensor(vec![2, 4, 2], DataType::Float32);
        let c = graph.add_matmul(yt, b, false, false).unwrap();
        let tanh = graph.tensor(y).unwrap().source().unwrap();

        assert_eq!(run(&mut graph), 1);
        let (id, _) = matmul_of(&graph, c);
        assert_eq!(graph.operator(tanh).unwrap().successors(), &[id]);
        assert_eq!(graph.operator(id).unwrap().predecessors(), &[tanh]);
        graph.check_valid().unwrap();
    }
}

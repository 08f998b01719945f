use std::collections::{HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model::{OpId, TensorId};

fn violation(message: String) -> Error {
    Error::InvariantViolation(message)
}

impl Graph {
    /// Structural sanity check.
    ///
    /// Every tensor must be produced or consumed, and every edge must point
    /// at tensors and operators owned by this graph. The predecessor and
    /// successor lists must agree with the tensor edges, and tensor
    /// identifiers must be unique.
    pub fn check_valid(&self) -> Result<()> {
        let op_ids: HashSet<OpId> = self.ops.iter().map(|op| op.id()).collect();

        let mut tensor_ids: HashSet<TensorId> = HashSet::with_capacity(self.tensors.len());
        for tensor in &self.tensors {
            if !tensor_ids.insert(tensor.fuid()) {
                return Err(violation(format!("Duplicate tensor identifier {}", tensor.fuid())));
            }
        }

        for tensor in &self.tensors {
            if tensor.source().is_none() && tensor.targets().is_empty() {
                return Err(violation(format!(
                    "Tensor {} has neither a source nor a target",
                    tensor.fuid()
                )));
            }
            for target in tensor.targets() {
                let consumer = self.operator(*target).map_err(|_| {
                    violation(format!(
                        "Tensor {} targets operator {} outside the graph",
                        tensor.fuid(),
                        target
                    ))
                })?;
                if !consumer.inputs().contains(&tensor.fuid()) {
                    return Err(violation(format!(
                        "Tensor {} targets operator {} which does not consume it",
                        tensor.fuid(),
                        target
                    )));
                }
            }
            if let Some(source) = tensor.source() {
                let producer = self.operator(source).map_err(|_| {
                    violation(format!(
                        "Tensor {} has source {} outside the graph",
                        tensor.fuid(),
                        source
                    ))
                })?;
                if !producer.outputs().contains(&tensor.fuid()) {
                    return Err(violation(format!(
                        "Tensor {} names {} as source but is not one of its outputs",
                        tensor.fuid(),
                        source
                    )));
                }
            }
        }

        for op in &self.ops {
            for tensor in op.inputs().iter().chain(op.outputs()) {
                if !tensor_ids.contains(tensor) {
                    return Err(violation(format!(
                        "Operator {} references tensor {} outside the graph",
                        op.id(),
                        tensor
                    )));
                }
            }
            for neighbour in op.predecessors().iter().chain(op.successors()) {
                if !op_ids.contains(neighbour) {
                    return Err(violation(format!(
                        "Operator {} links to operator {} outside the graph",
                        op.id(),
                        neighbour
                    )));
                }
            }

            let mut expected_predecessors = HashSet::new();
            for &input in op.inputs() {
                let tensor = self.tensor(input)?;
                if !tensor.targets().contains(&op.id()) {
                    return Err(violation(format!(
                        "Operator {} consumes tensor {} without being one of its targets",
                        op.id(),
                        input
                    )));
                }
                expected_predecessors.extend(tensor.source());
            }
            let mut expected_successors = HashSet::new();
            for &output in op.outputs() {
                let tensor = self.tensor(output)?;
                if tensor.source() != Some(op.id()) {
                    return Err(violation(format!(
                        "Operator {} produces tensor {} which names another source",
                        op.id(),
                        output
                    )));
                }
                expected_successors.extend(tensor.targets().iter().copied());
            }

            let predecessors: HashSet<OpId> = op.predecessors().iter().copied().collect();
            let successors: HashSet<OpId> = op.successors().iter().copied().collect();
            if predecessors != expected_predecessors || successors != expected_successors {
                return Err(violation(format!(
                    "Operator {} adjacency is out of date with its tensor edges",
                    op.id()
                )));
            }
        }

        Ok(())
    }

    /// Operator dependency graph: one node per operator and an edge from
    /// producer to consumer for every tensor they share.
    pub fn dependency_graph(&self) -> DiGraph<OpId, TensorId> {
        let mut graph = DiGraph::with_capacity(self.ops.len(), self.tensors.len());
        let nodes: HashMap<OpId, NodeIndex> = self
            .ops
            .iter()
            .map(|op| (op.id(), graph.add_node(op.id())))
            .collect();

        for op in &self.ops {
            for &input in op.inputs() {
                let source = self.get_tensor(input).and_then(|tensor| tensor.source());
                if let (Some(from), Some(&to)) =
                    (source.and_then(|s| nodes.get(&s)), nodes.get(&op.id()))
                {
                    graph.add_edge(*from, to, input);
                }
            }
        }
        graph
    }

    /// Groups of operators that depend on each other in a cycle
    pub fn find_cycles(&self) -> Vec<Vec<OpId>> {
        let graph = self.dependency_graph();
        tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || graph.contains_edge(component[0], component[0])
            })
            .map(|component| component.into_iter().map(|node| graph[node]).collect())
            .collect()
    }
}

//! Graph container: owns tensors and operators, keeps the producer/consumer
//! edges consistent and drives sorting, shape inference and memory planning.

mod builder;
mod validate;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::config::PlannerOptions;
use crate::error::{Error, Result};
use crate::memory::{Allocator, MemoryPlan, MemoryPlanner};
use crate::model::{DataBlob, DataType, OpId, Operator, Shape, Tensor, TensorId};
use crate::optimization::{GraphOptimizer, OptimizationStats};
use crate::runtime::Runtime;

/// A tensor-compute graph.
///
/// Tensors and operators live in insertion-ordered lists owned by the graph;
/// every cross-reference between them is an identifier. Predecessor and
/// successor lists on operators are derived from the tensor edges and only
/// change together with them.
#[derive(Debug)]
pub struct Graph {
    runtime: Arc<dyn Runtime>,
    tensors: Vec<Tensor>,
    ops: Vec<Operator>,
    sorted: bool,
    allocator: Allocator,
    options: PlannerOptions,
}

impl Graph {
    /// Create an empty graph with default options
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self::with_options(runtime, PlannerOptions::default())
    }

    /// Create an empty graph with the given options
    pub fn with_options(runtime: Arc<dyn Runtime>, options: PlannerOptions) -> Self {
        Self {
            allocator: Allocator::new(runtime.clone()),
            runtime,
            tensors: Vec::new(),
            ops: Vec::new(),
            sorted: false,
            options,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: PlannerOptions) {
        self.options = options;
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Tensors in insertion order
    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    /// Operators in insertion order, or topological order once sorted
    pub fn operators(&self) -> &[Operator] {
        &self.ops
    }

    /// Cleared by adding or removing operators; optimizer rewrites keep it
    /// since they only shortcut existing dependencies.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Look up a tensor by identifier
    pub fn get_tensor(&self, fuid: TensorId) -> Option<&Tensor> {
        self.tensors.iter().find(|tensor| tensor.fuid() == fuid)
    }

    pub fn tensor(&self, id: TensorId) -> Result<&Tensor> {
        self.get_tensor(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Tensor {} is not in the graph", id)))
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> Result<&mut Tensor> {
        self.tensors
            .iter_mut()
            .find(|tensor| tensor.fuid() == id)
            .ok_or_else(|| Error::InvalidGraph(format!("Tensor {} is not in the graph", id)))
    }

    pub fn operator(&self, id: OpId) -> Result<&Operator> {
        self.ops
            .iter()
            .find(|op| op.id() == id)
            .ok_or_else(|| Error::InvalidGraph(format!("Operator {} is not in the graph", id)))
    }

    pub(crate) fn operator_mut(&mut self, id: OpId) -> Result<&mut Operator> {
        self.ops
            .iter_mut()
            .find(|op| op.id() == id)
            .ok_or_else(|| Error::InvalidGraph(format!("Operator {} is not in the graph", id)))
    }

    /// Add a fresh tensor and return its identifier
    pub fn add_tensor(&mut self, shape: Shape, data_type: DataType) -> TensorId {
        let tensor = Tensor::new(shape, data_type);
        let id = tensor.fuid();
        self.tensors.push(tensor);
        id
    }

    /// Add an existing tensor, keeping its identifier
    pub fn insert_tensor(&mut self, tensor: Tensor) -> Result<TensorId> {
        let id = tensor.fuid();
        if self.get_tensor(id).is_some() {
            return Err(Error::InvariantViolation(format!(
                "Tensor {} is already in the graph",
                id
            )));
        }
        if tensor.source().is_some() || !tensor.targets().is_empty() {
            return Err(Error::InvalidGraph(format!(
                "Tensor {} still carries edges from another graph",
                id
            )));
        }
        self.tensors.push(tensor);
        Ok(id)
    }

    /// Insert an operator and derive its edges from the tensors it shares
    /// with the rest of the graph.
    pub fn add_operator_and_connect(&mut self, mut op: Operator) -> Result<OpId> {
        let id = op.id();
        if self.ops.iter().any(|existing| existing.id() == id) {
            return Err(Error::InvalidGraph(format!("Operator {} is already in the graph", id)));
        }
        if let Some(expected) = op.kind().num_inputs() {
            if op.inputs().len() != expected {
                return Err(Error::InvalidOperator(format!(
                    "{} requires {} inputs, got {}",
                    op.op_type(),
                    expected,
                    op.inputs().len()
                )));
            }
        }
        if op.outputs().len() != op.kind().num_outputs() {
            return Err(Error::InvalidOperator(format!(
                "{} produces {} outputs, got {}",
                op.op_type(),
                op.kind().num_outputs(),
                op.outputs().len()
            )));
        }
        for &tensor in op.inputs().iter().chain(op.outputs()) {
            self.tensor(tensor)?;
        }
        for &output in op.outputs() {
            if let Some(source) = self.tensor(output)?.source() {
                return Err(Error::InvalidGraph(format!(
                    "Tensor {} is already produced by operator {}",
                    output, source
                )));
            }
        }

        self.sorted = false;

        let inputs = op.inputs().to_vec();
        for input in inputs {
            let tensor = self.tensor_mut(input)?;
            tensor.add_target(id);
            if let Some(source) = tensor.source() {
                op.add_predecessor(source);
                self.operator_mut(source)?.add_successor(id);
            }
        }

        let outputs = op.outputs().to_vec();
        for output in outputs {
            let tensor = self.tensor_mut(output)?;
            tensor.set_source(Some(id));
            let targets = tensor.targets().to_vec();
            for target in targets {
                op.add_successor(target);
                if target == id {
                    op.add_predecessor(id);
                } else {
                    self.operator_mut(target)?.add_predecessor(id);
                }
            }
        }

        log::trace!("added {}", op);
        self.ops.push(op);
        Ok(id)
    }

    /// Remove an operator and scrub every reference to it
    pub fn remove_operator(&mut self, id: OpId) -> Result<Operator> {
        let op = self.detach_operator(id)?;
        self.sorted = false;
        Ok(op)
    }

    /// Remove a tensor that no operator produces or consumes any more
    pub fn remove_tensor(&mut self, id: TensorId) -> Result<Tensor> {
        let index = self
            .tensors
            .iter()
            .position(|tensor| tensor.fuid() == id)
            .ok_or_else(|| Error::InvalidGraph(format!("Tensor {} is not in the graph", id)))?;
        let tensor = &self.tensors[index];
        if tensor.source().is_some() || !tensor.targets().is_empty() {
            return Err(Error::InvalidGraph(format!(
                "Tensor {} is still connected to operators",
                id
            )));
        }
        Ok(self.tensors.remove(index))
    }

    /// Remove an operator without touching the sorted flag. Dropping a node
    /// from a topological order leaves a valid order behind.
    pub(crate) fn detach_operator(&mut self, id: OpId) -> Result<Operator> {
        let index = self
            .ops
            .iter()
            .position(|op| op.id() == id)
            .ok_or_else(|| Error::InvalidGraph(format!("Operator {} is not in the graph", id)))?;
        let op = self.ops.remove(index);

        for &input in op.inputs() {
            if let Ok(tensor) = self.tensor_mut(input) {
                tensor.remove_target(id);
            }
        }
        for &output in op.outputs() {
            if let Ok(tensor) = self.tensor_mut(output) {
                if tensor.source() == Some(id) {
                    tensor.set_source(None);
                }
            }
        }
        for &predecessor in op.predecessors() {
            if let Ok(other) = self.operator_mut(predecessor) {
                other.remove_successor(id);
            }
        }
        for &successor in op.successors() {
            if let Ok(other) = self.operator_mut(successor) {
                other.remove_predecessor(id);
            }
        }

        log::trace!("removed {}", op);
        Ok(op)
    }

    /// Point input `index` of `op_id` at `tensor`, keeping targets and the
    /// predecessor/successor cache in step.
    pub(crate) fn rewire_input(&mut self, op_id: OpId, index: usize, tensor: TensorId) -> Result<()> {
        self.tensor(tensor)?;
        let op = self.operator_mut(op_id)?;
        let old = op.input(index).ok_or_else(|| {
            Error::InvalidOperator(format!("Operator {} has no input {}", op_id, index))
        })?;
        op.set_input(index, tensor);
        let still_consumed = op.inputs().contains(&old);

        if !still_consumed {
            if let Ok(previous) = self.tensor_mut(old) {
                previous.remove_target(op_id);
            }
        }
        self.tensor_mut(tensor)?.add_target(op_id);
        self.relink_predecessors(op_id)
    }

    /// Recompute the predecessors of `op_id` from the sources of its inputs
    fn relink_predecessors(&mut self, op_id: OpId) -> Result<()> {
        let op = self.operator(op_id)?;
        let mut predecessors: Vec<OpId> = Vec::new();
        for &input in op.inputs() {
            if let Some(source) = self.tensor(input)?.source() {
                if !predecessors.contains(&source) {
                    predecessors.push(source);
                }
            }
        }
        let stale: Vec<OpId> = op
            .predecessors()
            .iter()
            .filter(|p| !predecessors.contains(p))
            .copied()
            .collect();

        for predecessor in stale {
            if let Ok(other) = self.operator_mut(predecessor) {
                other.remove_successor(op_id);
            }
        }
        for &predecessor in &predecessors {
            self.operator_mut(predecessor)?.add_successor(op_id);
        }
        self.operator_mut(op_id)?.set_predecessors(predecessors);
        Ok(())
    }

    /// Order operators so that every producer precedes its consumers.
    ///
    /// Each scan over the current list places every operator whose inputs
    /// are graph inputs or come from already placed operators, so operators
    /// without a mutual dependency keep their relative order. Returns
    /// `false` and leaves the list untouched when a scan places nothing,
    /// which means the graph has a cycle or a dangling dependency.
    pub fn topo_sort(&mut self) -> bool {
        if self.sorted {
            return true;
        }

        let sources: HashMap<TensorId, Option<OpId>> = self
            .tensors
            .iter()
            .map(|tensor| (tensor.fuid(), tensor.source()))
            .collect();

        let mut placed: HashSet<OpId> = HashSet::with_capacity(self.ops.len());
        let mut order: Vec<usize> = Vec::with_capacity(self.ops.len());

        while order.len() < self.ops.len() {
            let mut modified = false;
            for (index, op) in self.ops.iter().enumerate() {
                if placed.contains(&op.id()) {
                    continue;
                }
                let ready = op.inputs().iter().all(|input| {
                    match sources.get(input).copied().flatten() {
                        Some(source) => placed.contains(&source),
                        None => true,
                    }
                });
                if ready {
                    placed.insert(op.id());
                    order.push(index);
                    modified = true;
                }
            }
            if !modified {
                log::warn!(
                    "topological sort failed: {} of {} operators cannot be scheduled",
                    self.ops.len() - order.len(),
                    self.ops.len()
                );
                return false;
            }
        }

        let mut slots: Vec<Option<Operator>> =
            std::mem::take(&mut self.ops).into_iter().map(Some).collect();
        self.ops = order.into_iter().filter_map(|index| slots[index].take()).collect();
        self.sorted = true;
        log::debug!("sorted {} operators", self.ops.len());
        true
    }

    /// Recompute output shapes in topological order.
    pub fn shape_infer(&mut self) -> Result<()> {
        if !self.sorted {
            return Err(Error::PreconditionViolation(
                "Shape inference requires a topologically sorted graph".to_string(),
            ));
        }

        for index in 0..self.ops.len() {
            let op = &self.ops[index];
            let input_shapes = op
                .inputs()
                .iter()
                .map(|&input| self.tensor(input).map(|tensor| tensor.dims().to_vec()))
                .collect::<Result<Vec<Shape>>>()?;
            let dims: Vec<&[usize]> = input_shapes.iter().map(Vec::as_slice).collect();
            let shapes = op.kind().infer_shapes(&dims)?;

            if shapes.len() != op.outputs().len() {
                return Err(Error::InvariantViolation(format!(
                    "Operator {} inferred {} output shapes for {} outputs",
                    op,
                    shapes.len(),
                    op.outputs().len()
                )));
            }

            let outputs = op.outputs().to_vec();
            for (output, shape) in outputs.into_iter().zip(shapes) {
                let tensor = self.tensor_mut(output)?;
                if tensor.dims() != shape.as_slice() {
                    log::debug!("tensor {} reshaped {:?} -> {:?}", output, tensor.dims(), shape);
                    tensor.set_shape(shape);
                }
            }
        }
        Ok(())
    }

    /// Assign every tensor an offset in the arena, realize the arena once
    /// and bind each tensor's storage to it.
    pub fn data_malloc(&mut self) -> Result<MemoryPlan> {
        if !self.topo_sort() {
            return Err(Error::InvalidGraph(
                "Cannot plan memory for a graph without a topological order".to_string(),
            ));
        }
        if self.allocator.is_realized() {
            return Err(Error::PreconditionViolation(
                "Memory was already planned; reset the memory plan first".to_string(),
            ));
        }

        let strategy = self.options.memory_strategy;
        let allocations =
            MemoryPlanner::new(&self.tensors, &self.ops).plan(&mut self.allocator, strategy)?;

        let base = self.allocator.get_ptr()?;
        for (tensor, allocation) in self.tensors.iter_mut().zip(&allocations) {
            tensor.set_data_blob(DataBlob::new(self.runtime.clone(), base, allocation.offset));
        }
        self.allocator.info();

        let plan = MemoryPlan {
            strategy,
            allocations,
            peak_bytes: self.allocator.high_water_mark(),
        };
        log::info!(
            "planned {} tensors into {} bytes ({} strategy)",
            plan.allocations.len(),
            plan.peak_bytes,
            strategy
        );
        Ok(plan)
    }

    /// Drop storage bindings and start over with an empty allocator
    pub fn reset_memory_plan(&mut self) -> Result<()> {
        for tensor in &mut self.tensors {
            tensor.clear_data_blob();
        }
        let alignment = self.allocator.alignment();
        self.allocator = Allocator::with_alignment(self.runtime.clone(), alignment)?;
        Ok(())
    }

    /// Run the rewrite passes selected by the configured optimization level
    pub fn optimize(&mut self) -> Result<OptimizationStats> {
        let level = self.options.optimization_level;
        GraphOptimizer::new().optimize(self, level)
    }

    /// Full pipeline: optimize, sort, infer shapes and plan memory
    pub fn plan(&mut self) -> Result<MemoryPlan> {
        self.optimize()?;
        if !self.topo_sort() {
            return Err(Error::InvalidGraph(format!(
                "Graph cannot be scheduled; cyclic operators: {:?}",
                self.find_cycles()
            )));
        }
        self.shape_infer()?;
        self.data_malloc()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Tensors:")?;
        for tensor in &self.tensors {
            writeln!(f, "{}", tensor)?;
        }
        writeln!(f, "Graph operators:")?;
        for op in &self.ops {
            let ids = |list: &[OpId]| list.iter().map(|id| id.0).collect::<Vec<_>>();
            writeln!(
                f,
                "OP {}, pred {:?}, succ {:?}, {}",
                op.id(),
                ids(op.predecessors()),
                ids(op.successors()),
                op
            )?;
        }
        Ok(())
    }
}

use std::collections::HashMap;

use serde::Serialize;

use crate::config::MemoryStrategy;
use crate::error::{Error, Result};
use crate::memory::allocator::Allocator;
use crate::model::{Operator, Tensor, TensorId};

/// Placement of one tensor inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TensorAllocation {
    /// Tensor identifier
    pub tensor: TensorId,
    /// Offset from the arena base
    pub offset: usize,
    /// Size in bytes (before alignment rounding)
    pub bytes: usize,
}

/// Outcome of memory planning for a whole graph
#[derive(Debug, Clone, Serialize)]
pub struct MemoryPlan {
    /// Strategy the offsets were computed with
    pub strategy: MemoryStrategy,
    /// Allocations in graph tensor order
    pub allocations: Vec<TensorAllocation>,
    /// Size of the realized arena
    pub peak_bytes: usize,
}

impl MemoryPlan {
    /// Offset assigned to `tensor`, if it was planned
    pub fn offset_of(&self, tensor: TensorId) -> Option<usize> {
        self.allocations
            .iter()
            .find(|allocation| allocation.tensor == tensor)
            .map(|allocation| allocation.offset)
    }

    /// Sum of all tensor footprints, ignoring reuse
    pub fn total_tensor_bytes(&self) -> usize {
        self.allocations.iter().map(|allocation| allocation.bytes).sum()
    }

    /// Serialize the plan as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Computes tensor offsets with an [`Allocator`] for a sorted operator list
pub struct MemoryPlanner<'a> {
    tensors: &'a [Tensor],
    ops: &'a [Operator],
}

impl<'a> MemoryPlanner<'a> {
    /// `ops` must already be in topological order
    pub fn new(tensors: &'a [Tensor], ops: &'a [Operator]) -> Self {
        Self { tensors, ops }
    }

    /// Plan offsets for every tensor, returned in tensor order
    pub fn plan(
        &self,
        allocator: &mut Allocator,
        strategy: MemoryStrategy,
    ) -> Result<Vec<TensorAllocation>> {
        let offsets = match strategy {
            MemoryStrategy::Sequential => self.plan_sequential(allocator)?,
            MemoryStrategy::LifetimeReuse => self.plan_lifetime_reuse(allocator)?,
        };

        self.tensors
            .iter()
            .map(|tensor| {
                let offset = offsets.get(&tensor.fuid()).copied().ok_or_else(|| {
                    Error::InvariantViolation(format!(
                        "Tensor {} was not reached by memory planning",
                        tensor.fuid()
                    ))
                })?;
                Ok(TensorAllocation {
                    tensor: tensor.fuid(),
                    offset,
                    bytes: tensor.bytes(),
                })
            })
            .collect()
    }

    /// One range per tensor, held for the whole run
    fn plan_sequential(&self, allocator: &mut Allocator) -> Result<HashMap<TensorId, usize>> {
        let mut offsets = HashMap::with_capacity(self.tensors.len());
        for tensor in self.tensors {
            offsets.insert(tensor.fuid(), allocator.alloc(tensor.bytes())?);
        }
        Ok(offsets)
    }

    /// Release each intermediate tensor after its last consumer has run
    fn plan_lifetime_reuse(&self, allocator: &mut Allocator) -> Result<HashMap<TensorId, usize>> {
        let by_id: HashMap<TensorId, &Tensor> =
            self.tensors.iter().map(|tensor| (tensor.fuid(), tensor)).collect();
        let lookup = |id: TensorId| {
            by_id.get(&id).copied().ok_or_else(|| {
                Error::InvalidGraph(format!("Operator references unknown tensor {}", id))
            })
        };

        let mut offsets = HashMap::with_capacity(self.tensors.len());
        let mut remaining_uses: HashMap<TensorId, usize> = self
            .tensors
            .iter()
            .map(|tensor| (tensor.fuid(), tensor.targets().len()))
            .collect();

        // Graph inputs stay live for the whole run
        for tensor in self.tensors.iter().filter(|t| t.source().is_none()) {
            offsets.insert(tensor.fuid(), allocator.alloc(tensor.bytes())?);
        }

        for op in self.ops {
            for &output in op.outputs() {
                if !offsets.contains_key(&output) {
                    let tensor = lookup(output)?;
                    offsets.insert(output, allocator.alloc(tensor.bytes())?);
                }
            }

            let mut consumed: Vec<TensorId> = Vec::with_capacity(op.inputs().len());
            for &input in op.inputs() {
                if consumed.contains(&input) {
                    continue;
                }
                consumed.push(input);

                let tensor = lookup(input)?;
                let uses = remaining_uses.entry(input).or_insert(0);
                *uses = uses.saturating_sub(1);
                if *uses == 0 && tensor.source().is_some() {
                    let offset = offsets.get(&input).copied().ok_or_else(|| {
                        Error::InvariantViolation(format!(
                            "Tensor {} consumed by {} before it was produced",
                            input,
                            op.id()
                        ))
                    })?;
                    allocator.free(offset, tensor.bytes())?;
                    log::trace!("tensor {} released after {}", input, op.id());
                }
            }
        }

        Ok(offsets)
    }
}

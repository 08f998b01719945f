pub mod allocator;
pub mod planner;

pub use allocator::Allocator;

pub use planner::{MemoryPlan, MemoryPlanner, TensorAllocation};

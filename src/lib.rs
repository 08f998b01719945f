pub mod config;
pub mod error;
pub mod graph;
pub mod memory;
pub mod model;
pub mod ops;
pub mod optimization;
pub mod runtime;

// Re-export commonly used types
pub use config::{MemoryStrategy, OptimizationLevel, PlannerOptions};
pub use error::{Error, Result};
pub use graph::Graph;
pub use memory::{Allocator, MemoryPlan, MemoryPlanner, TensorAllocation};
pub use model::{DataBlob, DataType, OpId, OpKind, OpType, Operator, Shape, Tensor, TensorId};
pub use ops::{Binary, BinaryKind, Concat, MatMul, ShapeInference, Transpose, Unary, UnaryKind};
pub use optimization::graph_optimizer::{GraphOptimizer, OptimizationPass, OptimizationStats, PassResult};
pub use runtime::{CpuRuntime, Runtime};

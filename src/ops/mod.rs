pub mod activations;
pub mod concat;
pub mod transpose;

// Module files for math subdirectory
pub mod math {
    pub mod arithmetic;
    pub mod matmul;
}

pub use activations::{Unary, UnaryKind};
pub use concat::Concat;
pub use math::arithmetic::{Binary, BinaryKind};
pub use math::matmul::MatMul;
pub use transpose::Transpose;

use crate::error::{Error, Result};
use crate::model::{OpType, Shape};

/// Per-operator shape contract consumed by the graph
pub trait ShapeInference {
    /// Type tag of the operator
    fn op_type(&self) -> OpType;

    /// Expected number of inputs, `None` when the operator is variadic
    fn num_inputs(&self) -> Option<usize>;

    /// Number of outputs produced
    fn num_outputs(&self) -> usize {
        1
    }

    /// Infer output shapes from the current input shapes
    fn infer_shapes(&self, inputs: &[&[usize]]) -> Result<Vec<Shape>>;
}

/// Check the number of input shapes handed to an operator
pub(crate) fn expect_inputs(op: OpType, inputs: &[&[usize]], expected: usize) -> Result<()> {
    if inputs.len() != expected {
        return Err(Error::InvalidOperator(format!(
            "{} requires {} inputs, got {}",
            op,
            expected,
            inputs.len()
        )));
    }
    Ok(())
}

/// Broadcast two shapes according to numpy broadcasting rules.
///
/// Shapes are aligned on their trailing axis; a missing axis or a size-1
/// axis stretches to match the other side.
pub fn broadcast_shapes(shape1: &[usize], shape2: &[usize]) -> Result<Shape> {
    let result_rank = std::cmp::max(shape1.len(), shape2.len());
    let mut result_shape = Vec::with_capacity(result_rank);

    for i in 0..result_rank {
        let dim1 = dim_from_back(shape1, result_rank, i);
        let dim2 = dim_from_back(shape2, result_rank, i);

        let dim = match (dim1, dim2) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            (a, b) => {
                return Err(Error::ShapeMismatch(format!(
                    "Cannot broadcast shapes {:?} and {:?}: {} vs {} at index {}",
                    shape1, shape2, a, b, i
                )))
            }
        };
        result_shape.push(dim);
    }

    Ok(result_shape)
}

fn dim_from_back(shape: &[usize], result_rank: usize, i: usize) -> usize {
    let pad = result_rank - shape.len();
    if i >= pad {
        shape[i - pad]
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[2, 3], &[2, 3]).unwrap(), vec![2, 3]);
        assert_eq!(broadcast_shapes(&[4, 1, 3], &[5, 1]).unwrap(), vec![4, 5, 3]);
        assert_eq!(broadcast_shapes(&[], &[7]).unwrap(), vec![7]);
        assert_eq!(broadcast_shapes(&[1], &[]).unwrap(), vec![1]);
    }

    #[test]
    fn test_broadcast_incompatible() {
        let err = broadcast_shapes(&[2, 3], &[4, 3]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }
}

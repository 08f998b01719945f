use crate::error::{Error, Result};
use crate::model::{OpType, Shape};
use crate::ops::{broadcast_shapes, expect_inputs, ShapeInference};

/// Batched matrix multiplication with optional transposed operands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatMul {
    trans_a: bool,
    trans_b: bool,
}

impl MatMul {
    pub fn new(trans_a: bool, trans_b: bool) -> Self {
        Self { trans_a, trans_b }
    }

    pub fn trans_a(&self) -> bool {
        self.trans_a
    }

    pub fn trans_b(&self) -> bool {
        self.trans_b
    }

    pub fn set_trans_a(&mut self, trans_a: bool) {
        self.trans_a = trans_a;
    }

    pub fn set_trans_b(&mut self, trans_b: bool) {
        self.trans_b = trans_b;
    }
}

impl ShapeInference for MatMul {
    fn op_type(&self) -> OpType {
        OpType::MatMul
    }

    fn num_inputs(&self) -> Option<usize> {
        Some(2)
    }

    fn infer_shapes(&self, inputs: &[&[usize]]) -> Result<Vec<Shape>> {
        expect_inputs(OpType::MatMul, inputs, 2)?;
        Ok(vec![validate_matmul_shapes(inputs[0], inputs[1], self.trans_a, self.trans_b)?])
    }
}

/// Validate shapes for matrix multiplication and return the output shape
pub fn validate_matmul_shapes(
    a_shape: &[usize],
    b_shape: &[usize],
    trans_a: bool,
    trans_b: bool,
) -> Result<Shape> {
    let a_rank = a_shape.len();
    let b_rank = b_shape.len();

    if a_rank < 2 || b_rank < 2 {
        return Err(Error::ShapeMismatch(format!(
            "MatMul inputs must have at least rank 2, got {:?} and {:?}",
            a_shape, b_shape
        )));
    }

    let (m, k_a) = matrix_dims(&a_shape[a_rank - 2..], trans_a);
    let (k_b, n) = matrix_dims(&b_shape[b_rank - 2..], trans_b);

    if k_a != k_b {
        return Err(Error::ShapeMismatch(format!(
            "MatMul inner dimensions should match: {} vs {} (A={:?}, B={:?})",
            k_a, k_b, a_shape, b_shape
        )));
    }

    let mut output_shape = broadcast_shapes(&a_shape[..a_rank - 2], &b_shape[..b_rank - 2])?;
    output_shape.push(m);
    output_shape.push(n);

    Ok(output_shape)
}

/// (rows, cols) of the trailing matrix after the optional transpose
fn matrix_dims(trailing: &[usize], transposed: bool) -> (usize, usize) {
    if transposed {
        (trailing[1], trailing[0])
    } else {
        (trailing[0], trailing[1])
    }
}

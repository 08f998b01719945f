use crate::error::{Error, Result};
use crate::model::{OpType, Shape};
use crate::ops::{expect_inputs, ShapeInference};

/// Axis permutation: output axis `i` is input axis `permutation[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transpose {
    permutation: Vec<usize>,
}

impl Transpose {
    pub fn new(permutation: Vec<usize>) -> Self {
        Self { permutation }
    }

    /// Transpose swapping the two trailing axes of a rank-`rank` tensor
    pub fn swap_last_two(rank: usize) -> Self {
        let mut permutation: Vec<usize> = (0..rank).collect();
        if rank >= 2 {
            permutation.swap(rank - 2, rank - 1);
        }
        Self { permutation }
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    pub fn rank(&self) -> usize {
        self.permutation.len()
    }

    /// Whether applying `self` then `next` leaves every axis in place
    pub fn is_inverse_of(&self, next: &Transpose) -> bool {
        self.rank() == next.rank()
            && next
                .permutation
                .iter()
                .enumerate()
                .all(|(i, &axis)| self.permutation.get(axis) == Some(&i))
    }

    /// Whether the permutation swaps the last two axes and fixes all others
    pub fn swaps_last_two(&self) -> bool {
        let rank = self.rank();
        if rank < 2 {
            return false;
        }
        self.permutation[..rank - 2]
            .iter()
            .enumerate()
            .all(|(i, &axis)| axis == i)
            && self.permutation[rank - 2] == rank - 1
            && self.permutation[rank - 1] == rank - 2
    }

    fn validate(&self, rank: usize) -> Result<()> {
        if self.rank() != rank {
            return Err(Error::ShapeMismatch(format!(
                "Transpose permutation {:?} does not match input rank {}",
                self.permutation, rank
            )));
        }
        let mut seen = vec![false; rank];
        for &axis in &self.permutation {
            if axis >= rank || seen[axis] {
                return Err(Error::InvalidOperator(format!(
                    "Transpose permutation {:?} is not a permutation of 0..{}",
                    self.permutation, rank
                )));
            }
            seen[axis] = true;
        }
        Ok(())
    }
}

impl ShapeInference for Transpose {
    fn op_type(&self) -> OpType {
        OpType::Transpose
    }

    fn num_inputs(&self) -> Option<usize> {
        Some(1)
    }

    fn infer_shapes(&self, inputs: &[&[usize]]) -> Result<Vec<Shape>> {
        expect_inputs(OpType::Transpose, inputs, 1)?;
        let input = inputs[0];
        self.validate(input.len())?;
        Ok(vec![self.permutation.iter().map(|&axis| input[axis]).collect()])
    }
}

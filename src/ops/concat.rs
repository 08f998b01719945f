use crate::error::{Error, Result};
use crate::model::{OpType, Shape};
use crate::ops::ShapeInference;

/// Concatenation of same-rank inputs along one axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concat {
    axis: isize,
}

impl Concat {
    /// `axis` may be negative, counting from the last axis
    pub fn new(axis: isize) -> Self {
        Self { axis }
    }

    pub fn axis(&self) -> isize {
        self.axis
    }

    /// Normalize the axis against `rank`
    pub fn resolved_axis(&self, rank: usize) -> Result<usize> {
        let rank_i = rank as isize;
        let axis = if self.axis < 0 { self.axis + rank_i } else { self.axis };
        if axis < 0 || axis >= rank_i {
            return Err(Error::InvalidOperator(format!(
                "Concat axis {} out of range for rank {}",
                self.axis, rank
            )));
        }
        Ok(axis as usize)
    }
}

impl ShapeInference for Concat {
    fn op_type(&self) -> OpType {
        OpType::Concat
    }

    fn num_inputs(&self) -> Option<usize> {
        None
    }

    fn infer_shapes(&self, inputs: &[&[usize]]) -> Result<Vec<Shape>> {
        let first = inputs.first().ok_or_else(|| {
            Error::InvalidOperator("Concat requires at least one input".to_string())
        })?;
        let rank = first.len();
        let axis = self.resolved_axis(rank)?;

        let mut dims = first.to_vec();
        for other in &inputs[1..] {
            if other.len() != rank {
                return Err(Error::ShapeMismatch(format!(
                    "Concat requires all inputs to have the same rank: {:?} vs {:?}",
                    first, other
                )));
            }
            for d in (0..rank).filter(|&d| d != axis) {
                if other[d] != dims[d] {
                    return Err(Error::ShapeMismatch(format!(
                        "Concat inputs {:?} and {:?} differ on non-concat axis {}",
                        first, other, d
                    )));
                }
            }
            dims[axis] += other[axis];
        }

        Ok(vec![dims])
    }
}

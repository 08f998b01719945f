use crate::error::Result;
use crate::model::{OpType, Shape};
use crate::ops::{broadcast_shapes, expect_inputs, ShapeInference};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
}

/// Element-wise binary arithmetic with broadcasting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    kind: BinaryKind,
}

impl Binary {
    pub fn new(kind: BinaryKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> BinaryKind {
        self.kind
    }
}

impl ShapeInference for Binary {
    fn op_type(&self) -> OpType {
        match self.kind {
            BinaryKind::Add => OpType::Add,
            BinaryKind::Sub => OpType::Sub,
            BinaryKind::Mul => OpType::Mul,
            BinaryKind::Div => OpType::Div,
        }
    }

    fn num_inputs(&self) -> Option<usize> {
        Some(2)
    }

    fn infer_shapes(&self, inputs: &[&[usize]]) -> Result<Vec<Shape>> {
        expect_inputs(self.op_type(), inputs, 2)?;
        Ok(vec![broadcast_shapes(inputs[0], inputs[1])?])
    }
}

use crate::error::Result;
use crate::model::{OpType, Shape};
use crate::ops::{expect_inputs, ShapeInference};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Relu,
    Sigmoid,
    Tanh,
    Abs,
}

/// Shape-preserving element-wise function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unary {
    kind: UnaryKind,
}

impl Unary {
    pub fn new(kind: UnaryKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> UnaryKind {
        self.kind
    }
}

impl ShapeInference for Unary {
    fn op_type(&self) -> OpType {
        match self.kind {
            UnaryKind::Relu => OpType::Relu,
            UnaryKind::Sigmoid => OpType::Sigmoid,
            UnaryKind::Tanh => OpType::Tanh,
            UnaryKind::Abs => OpType::Abs,
        }
    }

    fn num_inputs(&self) -> Option<usize> {
        Some(1)
    }

    fn infer_shapes(&self, inputs: &[&[usize]]) -> Result<Vec<Shape>> {
        expect_inputs(self.op_type(), inputs, 1)?;
        Ok(vec![inputs[0].to_vec()])
    }
}

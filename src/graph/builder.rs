use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model::{OpId, OpKind, Operator, Shape, TensorId};
use crate::ops::{Binary, BinaryKind, Concat, MatMul, Transpose, Unary, UnaryKind};

impl Graph {
    /// Add an operator, checking its input shapes at construction.
    ///
    /// When `outputs` is `None` the output tensors are created with the
    /// inferred shapes and the element type of the first input. Given
    /// outputs must already be in the graph and match the inferred shapes.
    pub fn add_op(
        &mut self,
        kind: OpKind,
        inputs: &[TensorId],
        outputs: Option<Vec<TensorId>>,
    ) -> Result<OpId> {
        if let Some(expected) = kind.num_inputs() {
            if inputs.len() != expected {
                return Err(Error::InvalidOperator(format!(
                    "{} requires {} inputs, got {}",
                    kind.op_type(),
                    expected,
                    inputs.len()
                )));
            }
        }

        let input_shapes = inputs
            .iter()
            .map(|&input| self.tensor(input).map(|tensor| tensor.dims().to_vec()))
            .collect::<Result<Vec<Shape>>>()?;
        let dims: Vec<&[usize]> = input_shapes.iter().map(Vec::as_slice).collect();
        let shapes = kind.infer_shapes(&dims)?;

        let outputs = match outputs {
            Some(outputs) => {
                if outputs.len() != shapes.len() {
                    return Err(Error::InvalidOperator(format!(
                        "{} produces {} outputs, got {}",
                        kind.op_type(),
                        shapes.len(),
                        outputs.len()
                    )));
                }
                for (&output, shape) in outputs.iter().zip(&shapes) {
                    let tensor = self.tensor(output)?;
                    if tensor.dims() != shape.as_slice() {
                        return Err(Error::ShapeMismatch(format!(
                            "{} output {} has shape {:?}, expected {:?}",
                            kind.op_type(),
                            output,
                            tensor.dims(),
                            shape
                        )));
                    }
                }
                outputs
            }
            None => {
                let first = inputs.first().ok_or_else(|| {
                    Error::InvalidOperator(format!("{} has no inputs", kind.op_type()))
                })?;
                let data_type = self.tensor(*first)?.data_type();
                shapes
                    .into_iter()
                    .map(|shape| self.add_tensor(shape, data_type))
                    .collect()
            }
        };

        self.add_operator_and_connect(Operator::new(kind, inputs.to_vec(), outputs))
    }

    /// Add an operator with generated outputs and return its single output
    fn add_single_output(&mut self, kind: OpKind, inputs: &[TensorId]) -> Result<TensorId> {
        let id = self.add_op(kind, inputs, None)?;
        self.operator(id)?.output().ok_or_else(|| {
            Error::InvalidOperator(format!("Operator {} produced no output", id))
        })
    }

    /// Permute the axes of `input`
    pub fn add_transpose(&mut self, input: TensorId, permutation: Vec<usize>) -> Result<TensorId> {
        self.add_single_output(OpKind::Transpose(Transpose::new(permutation)), &[input])
    }

    /// Batched matrix product of `a` and `b`
    pub fn add_matmul(
        &mut self,
        a: TensorId,
        b: TensorId,
        trans_a: bool,
        trans_b: bool,
    ) -> Result<TensorId> {
        self.add_single_output(OpKind::MatMul(MatMul::new(trans_a, trans_b)), &[a, b])
    }

    /// Concatenate `inputs` along `axis`
    pub fn add_concat(&mut self, inputs: &[TensorId], axis: isize) -> Result<TensorId> {
        self.add_single_output(OpKind::Concat(Concat::new(axis)), inputs)
    }

    pub fn add_unary(&mut self, kind: UnaryKind, input: TensorId) -> Result<TensorId> {
        self.add_single_output(OpKind::Unary(Unary::new(kind)), &[input])
    }

    pub fn add_binary(&mut self, kind: BinaryKind, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.add_single_output(OpKind::Binary(Binary::new(kind)), &[a, b])
    }
}

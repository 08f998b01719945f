use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use strum::{Display, EnumIter, EnumString};

use crate::error::Result;
use crate::ops::{Binary, Concat, MatMul, ShapeInference, Transpose, Unary};
use crate::runtime::Runtime;

/// Shape of a tensor
pub type Shape = Vec<usize>;

// Identifiers are process-wide so a tensor keeps its identity when it is
// moved between graphs.
static NEXT_TENSOR_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_OP_ID: AtomicUsize = AtomicUsize::new(1);

/// Stable identifier of a tensor (survives rewrites)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TensorId(pub usize);

/// Identifier of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OpId(pub usize);

impl TensorId {
    fn generate() -> Self {
        TensorId(NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl OpId {
    fn generate() -> Self {
        OpId(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Element types a tensor can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString, EnumIter)]
pub enum DataType {
    Float32,
    Float64,
    Float16,
    BFloat16,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Bool,
}

impl DataType {
    /// Get the size of one element in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::Float32 => std::mem::size_of::<f32>(),
            DataType::Float64 => std::mem::size_of::<f64>(),
            DataType::Float16 => std::mem::size_of::<half::f16>(),
            DataType::BFloat16 => std::mem::size_of::<half::bf16>(),
            DataType::Int8 => std::mem::size_of::<i8>(),
            DataType::Int16 => std::mem::size_of::<i16>(),
            DataType::Int32 => std::mem::size_of::<i32>(),
            DataType::Int64 => std::mem::size_of::<i64>(),
            DataType::UInt8 => std::mem::size_of::<u8>(),
            DataType::UInt16 => std::mem::size_of::<u16>(),
            DataType::UInt32 => std::mem::size_of::<u32>(),
            DataType::UInt64 => std::mem::size_of::<u64>(),
            DataType::Bool => std::mem::size_of::<bool>(),
        }
    }

    /// Width of the widest supported element type
    pub fn max_width() -> usize {
        std::mem::size_of::<u64>()
    }
}

/// Storage bound to a tensor once memory planning has realized the arena
#[derive(Debug, Clone)]
pub struct DataBlob {
    runtime: Arc<dyn Runtime>,
    base: NonNull<u8>,
    offset: usize,
}

impl DataBlob {
    pub fn new(runtime: Arc<dyn Runtime>, base: NonNull<u8>, offset: usize) -> Self {
        Self { runtime, base, offset }
    }

    /// Runtime owning the arena this blob points into
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    /// Base pointer of the arena
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Byte offset of the tensor inside the arena
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Address of the tensor's first byte
    pub fn ptr(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.offset)
    }
}

/// A typed, shaped value in the graph.
///
/// `source` and `targets` are non-owning back-references into the graph's
/// operator list; they are maintained by [`crate::graph::Graph`].
#[derive(Debug, Clone)]
pub struct Tensor {
    fuid: TensorId,
    shape: Shape,
    data_type: DataType,
    source: Option<OpId>,
    targets: Vec<OpId>,
    data: Option<DataBlob>,
}

impl Tensor {
    /// Create a detached tensor with a fresh identifier
    pub fn new(shape: Shape, data_type: DataType) -> Self {
        Self {
            fuid: TensorId::generate(),
            shape,
            data_type,
            source: None,
            targets: Vec::new(),
            data: None,
        }
    }

    pub fn fuid(&self) -> TensorId {
        self.fuid
    }

    pub fn dims(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Number of elements
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Byte footprint (elements times element width)
    pub fn bytes(&self) -> usize {
        self.size() * self.data_type.size_in_bytes()
    }

    pub fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    pub fn source(&self) -> Option<OpId> {
        self.source
    }

    pub fn targets(&self) -> &[OpId] {
        &self.targets
    }

    pub fn data(&self) -> Option<&DataBlob> {
        self.data.as_ref()
    }

    pub fn set_data_blob(&mut self, blob: DataBlob) {
        self.data = Some(blob);
    }

    pub(crate) fn clear_data_blob(&mut self) {
        self.data = None;
    }

    pub(crate) fn set_source(&mut self, source: Option<OpId>) {
        self.source = source;
    }

    pub(crate) fn add_target(&mut self, op: OpId) {
        if !self.targets.contains(&op) {
            self.targets.push(op);
        }
    }

    pub(crate) fn remove_target(&mut self, op: OpId) {
        self.targets.retain(|&t| t != op);
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor {}, {:?}, {}", self.fuid, self.shape, self.data_type)?;
        match self.source {
            Some(op) => write!(f, ", source {}", op)?,
            None => write!(f, ", source None")?,
        }
        let targets: Vec<usize> = self.targets.iter().map(|t| t.0).collect();
        write!(f, ", targets {:?}", targets)?;
        if let Some(blob) = &self.data {
            write!(f, ", offset {}", blob.offset())?;
        }
        Ok(())
    }
}

/// Type tag of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
pub enum OpType {
    Transpose,
    MatMul,
    Concat,
    Relu,
    Sigmoid,
    Tanh,
    Abs,
    Add,
    Sub,
    Mul,
    Div,
}

/// Operator type together with its type-specific attributes
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    Transpose(Transpose),
    MatMul(MatMul),
    Concat(Concat),
    Unary(Unary),
    Binary(Binary),
}

impl OpKind {
    fn as_inference(&self) -> &dyn ShapeInference {
        match self {
            OpKind::Transpose(op) => op,
            OpKind::MatMul(op) => op,
            OpKind::Concat(op) => op,
            OpKind::Unary(op) => op,
            OpKind::Binary(op) => op,
        }
    }

    pub fn op_type(&self) -> OpType {
        self.as_inference().op_type()
    }

    /// Expected number of inputs, `None` when variadic
    pub fn num_inputs(&self) -> Option<usize> {
        self.as_inference().num_inputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.as_inference().num_outputs()
    }

    pub fn infer_shapes(&self, inputs: &[&[usize]]) -> Result<Vec<Shape>> {
        self.as_inference().infer_shapes(inputs)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Transpose(op) => write!(f, "Transpose(perm={:?})", op.permutation()),
            OpKind::MatMul(op) => write!(
                f,
                "MatMul([{},{}])",
                if op.trans_a() { "A^T" } else { "A" },
                if op.trans_b() { "B^T" } else { "B" }
            ),
            OpKind::Concat(op) => write!(f, "Concat(axis={})", op.axis()),
            OpKind::Unary(op) => write!(f, "{}", op.op_type()),
            OpKind::Binary(op) => write!(f, "{}", op.op_type()),
        }
    }
}

/// A node of the graph.
///
/// `predecessors` and `successors` are a cache over the tensor edges and are
/// only ever populated by the graph when operators are connected or rewired.
#[derive(Debug, Clone)]
pub struct Operator {
    guid: OpId,
    kind: OpKind,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    predecessors: Vec<OpId>,
    successors: Vec<OpId>,
}

impl Operator {
    /// Create a detached operator; edges are derived once it is added to a graph
    pub fn new(kind: OpKind, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Self {
            guid: OpId::generate(),
            kind,
            inputs,
            outputs,
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn id(&self) -> OpId {
        self.guid
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut OpKind {
        &mut self.kind
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Option<TensorId> {
        self.inputs.get(index).copied()
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// First output, if the operator has any
    pub fn output(&self) -> Option<TensorId> {
        self.outputs.first().copied()
    }

    pub fn predecessors(&self) -> &[OpId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[OpId] {
        &self.successors
    }

    pub(crate) fn set_input(&mut self, index: usize, tensor: TensorId) {
        self.inputs[index] = tensor;
    }

    pub(crate) fn set_predecessors(&mut self, predecessors: Vec<OpId>) {
        self.predecessors = predecessors;
    }

    pub(crate) fn add_predecessor(&mut self, op: OpId) {
        if !self.predecessors.contains(&op) {
            self.predecessors.push(op);
        }
    }

    pub(crate) fn remove_predecessor(&mut self, op: OpId) {
        self.predecessors.retain(|&p| p != op);
    }

    pub(crate) fn add_successor(&mut self, op: OpId) {
        if !self.successors.contains(&op) {
            self.successors.push(op);
        }
    }

    pub(crate) fn remove_successor(&mut self, op: OpId) {
        self.successors.retain(|&s| s != op);
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |list: &[TensorId]| list.iter().map(|t| t.0).collect::<Vec<_>>();
        write!(
            f,
            "{}[{}](input={:?}, output={:?})",
            self.kind,
            self.guid,
            ids(&self.inputs),
            ids(&self.outputs)
        )
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attrs::Conv2dAttrs;
use crate::error::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float16,
    Float32,
    Int32,
    Uint32,
    Int16,
    Int8,
    Uint8,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Int16 => "int16",
            DataType::Int8 => "int8",
            DataType::Uint8 => "uint8",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete tensor type: ordered dimension sizes plus element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub data_type: DataType,
    #[serde(default)]
    pub shape: Vec<u32>,
}

impl TensorType {
    pub fn new(shape: impl Into<Vec<u32>>, data_type: DataType) -> Self {
        Self {
            data_type,
            shape: shape.into(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor[{:?}, {}]", self.shape, self.data_type)
    }
}

/// One type slot of a call: either known or waiting to be inferred.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSlot {
    #[default]
    Unresolved,
    Tensor(TensorType),
}

impl TypeSlot {
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            TypeSlot::Tensor(ty) => Some(ty),
            TypeSlot::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, TypeSlot::Tensor(_))
    }
}

impl From<TensorType> for TypeSlot {
    fn from(ty: TensorType) -> Self {
        TypeSlot::Tensor(ty)
    }
}

impl From<Option<TensorType>> for TypeSlot {
    fn from(ty: Option<TensorType>) -> Self {
        ty.map_or(TypeSlot::Unresolved, TypeSlot::Tensor)
    }
}

impl fmt::Display for TypeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSlot::Tensor(ty) => ty.fmt(f),
            TypeSlot::Unresolved => f.write_str("?"),
        }
    }
}

/// Operator attributes attached to a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Attrs {
    None,
    EthosuConv2d(Conv2dAttrs),
}

impl Attrs {
    pub fn kind(&self) -> &'static str {
        match self {
            Attrs::None => "none",
            Attrs::EthosuConv2d(_) => Conv2dAttrs::TYPE_KEY,
        }
    }

    pub fn as_conv2d(&self) -> Option<&Conv2dAttrs> {
        match self {
            Attrs::EthosuConv2d(attrs) => Some(attrs),
            _ => None,
        }
    }
}

pub type NodeId = u32;

/// An operator application. Immutable once added to a [`Graph`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: &'static str,
    pub args: Vec<NodeId>,
    pub attrs: Attrs,
    pub label: Option<String>,
}

impl Call {
    pub fn display_name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.op.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Input { name: String, ty: TypeSlot },
    Call(Call),
}

/// Append-only node arena. Arguments always precede their consumers.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, name: impl Into<String>, ty: impl Into<TypeSlot>) -> NodeId {
        self.push(Node::Input {
            name: name.into(),
            ty: ty.into(),
        })
    }

    pub fn add_call(&mut self, call: Call) -> Result<NodeId, GraphError> {
        let next = self.nodes.len() as NodeId;
        if let Some(&bad) = call.args.iter().find(|&&arg| arg >= next) {
            return Err(GraphError::InvalidNodeReference {
                node: next,
                referenced: bad,
            });
        }
        Ok(self.push(Node::Call(call)))
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        (self.nodes.len() - 1) as NodeId
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn calls(&self) -> impl Iterator<Item = (NodeId, &Call)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| match node {
                Node::Call(call) => Some((idx as NodeId, call)),
                Node::Input { .. } => None,
            })
    }
}

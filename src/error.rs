use std::path::PathBuf;

use crate::graph::DataType;
use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("graph JSON could not be parsed: {source}")]
    Parse {
        #[from]
        source: JsonError,
    },
    #[error("inferred types could not be rendered as JSON: {source}")]
    Render {
        #[source]
        source: JsonError,
    },
    #[error("attribute `{field}` is required and has no default")]
    MissingRequiredField { field: &'static str },
    #[error("operator `{operator}` expects {expected} type slots, got {actual}")]
    ArityMismatch {
        operator: String,
        expected: usize,
        actual: usize,
    },
    #[error("expected {operator} {tensor} data type of {expected} but was {found}")]
    UnsupportedDType {
        operator: String,
        tensor: &'static str,
        expected: &'static str,
        found: DataType,
    },
    #[error("unsupported layout `{layout}`, expected 'NHWC' or 'NHCWB16'")]
    UnsupportedLayout { layout: String },
    #[error("invalid value `{value}` for `{field}`, expected one of {expected}")]
    InvalidEnumValue {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("invalid {axis} geometry: {reason}")]
    InvalidGeometry { axis: &'static str, reason: String },
    #[error("{slot} type conflict: existing {existing} is incompatible with inferred {inferred}")]
    ShapeConflict {
        slot: &'static str,
        existing: String,
        inferred: String,
    },
    #[error("{tensor} shape {shape:?} has rank {actual}, expected rank {expected} for {layout}")]
    InvalidRank {
        tensor: &'static str,
        layout: String,
        shape: Vec<u32>,
        expected: usize,
        actual: usize,
    },
    #[error("operator `{operator}` was given attributes of kind `{found}`")]
    AttrsMismatch {
        operator: String,
        found: &'static str,
    },
    #[error("operator `{requested}` is not registered. Registered: {available:?}")]
    UnknownOperator {
        requested: String,
        available: Vec<&'static str>,
    },
    #[error("node {node} references node {referenced} which does not precede it")]
    InvalidNodeReference { node: u32, referenced: u32 },
    #[error("operator `{operator}` takes {expected} arguments, got {actual}")]
    ArgumentCountMismatch {
        operator: String,
        expected: usize,
        actual: usize,
    },
    #[error("type inference stopped with unresolved calls {pending:?}")]
    InferenceIncomplete { pending: Vec<u32> },
    #[error("node {node} (`{operator}`): {source}")]
    Diagnostic {
        node: u32,
        operator: String,
        #[source]
        source: Box<GraphError>,
    },
}

impl GraphError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn diagnostic(node: u32, operator: impl Into<String>, source: GraphError) -> Self {
        GraphError::Diagnostic {
            node,
            operator: operator.into(),
            source: Box::new(source),
        }
    }

    /// Innermost error, looking through any `Diagnostic` wrapping.
    pub fn root(&self) -> &GraphError {
        match self {
            GraphError::Diagnostic { source, .. } => source.root(),
            other => other,
        }
    }
}

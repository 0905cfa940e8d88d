use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::GraphError;
use crate::graph::{Graph, NodeId, TensorType};
use crate::op::OperatorRegistry;

/// One entry of the `nodes` array in a JSON graph description.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSpec {
    Input {
        name: String,
        /// Omitted for slots that inference should fill in.
        #[serde(default, rename = "type")]
        ty: Option<TensorType>,
    },
    Call {
        op: String,
        #[serde(default)]
        args: Vec<NodeId>,
        #[serde(default)]
        attrs: serde_json::Value,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphSpec {
    pub nodes: Vec<NodeSpec>,
}

/// Build a graph, constructing every call through its registered operator.
pub fn build_graph(spec: &GraphSpec, registry: &OperatorRegistry) -> Result<Graph, GraphError> {
    let mut graph = Graph::new();
    for node in &spec.nodes {
        match node {
            NodeSpec::Input { name, ty } => {
                graph.add_input(name.clone(), ty.clone());
            }
            NodeSpec::Call { op, args, attrs } => {
                let index = graph.len() as NodeId;
                let descriptor = registry
                    .get(op)
                    .map_err(|err| GraphError::diagnostic(index, op.clone(), err))?;
                (descriptor.make)(&mut graph, args, attrs)
                    .map_err(|err| GraphError::diagnostic(index, op.clone(), err))?;
            }
        }
    }
    Ok(graph)
}

pub fn parse_graph_str(text: &str, registry: &OperatorRegistry) -> Result<Graph, GraphError> {
    let spec: GraphSpec = serde_json::from_str(text)?;
    build_graph(&spec, registry)
}

pub fn load_graph_from_path(
    path: impl AsRef<Path>,
    registry: &OperatorRegistry,
) -> Result<Graph, GraphError> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref).map_err(|err| GraphError::io(path_ref, err))?;
    parse_graph_str(&contents, registry)
}

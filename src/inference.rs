//! Graph-level type inference driver.
//!
//! Runs the registered relation of every call until no call makes progress. A call
//! that defers is retried on the next pass; any failure aborts the whole run.

use tracing::{debug, warn};

use crate::error::GraphError;
use crate::graph::{Call, Graph, Node, NodeId, TensorType, TypeSlot};
use crate::op::OperatorRegistry;
use crate::relation::{Resolution, SLOT_NAMES, TypeReporter};

#[derive(Debug, Clone)]
pub struct InferenceOptions {
    /// Upper bound on fixpoint iterations.
    pub max_passes: usize,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self { max_passes: 16 }
    }
}

#[derive(Debug)]
pub struct InferenceArtifacts {
    /// Type of every node, indexed by [`NodeId`].
    pub types: Vec<TypeSlot>,
    pub passes: usize,
}

impl InferenceArtifacts {
    pub fn type_of(&self, node: NodeId) -> Option<&TypeSlot> {
        self.types.get(node as usize)
    }

    /// Pretty-printed JSON array of every node's type.
    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string_pretty(&self.types).map_err(|source| GraphError::Render { source })
    }
}

pub struct TypeInference<'a> {
    graph: &'a Graph,
    registry: &'a OperatorRegistry,
    options: InferenceOptions,
}

impl<'a> TypeInference<'a> {
    pub fn new(
        graph: &'a Graph,
        registry: &'a OperatorRegistry,
        options: InferenceOptions,
    ) -> Self {
        Self {
            graph,
            registry,
            options,
        }
    }

    pub fn run(self) -> Result<InferenceArtifacts, GraphError> {
        let mut types: Vec<TypeSlot> = self
            .graph
            .nodes()
            .iter()
            .map(|node| match node {
                Node::Input { ty, .. } => ty.clone(),
                Node::Call(_) => TypeSlot::Unresolved,
            })
            .collect();

        let mut pending: Vec<(NodeId, &Call)> = self.graph.calls().collect();
        let mut passes = 0;
        while !pending.is_empty() && passes < self.options.max_passes {
            passes += 1;
            let before = pending.len();
            let mut deferred = Vec::new();
            for (node, call) in pending {
                match self.infer_call(node, call, &mut types) {
                    Ok(Resolution::Resolved) => {}
                    Ok(Resolution::Deferred) => deferred.push((node, call)),
                    Err(err) => {
                        return Err(GraphError::diagnostic(node, call.display_name(), err));
                    }
                }
            }
            debug!(
                pass = passes,
                resolved = before - deferred.len(),
                deferred = deferred.len(),
                "inference pass"
            );
            let stalled = deferred.len() == before;
            pending = deferred;
            if stalled {
                break;
            }
        }

        if !pending.is_empty() {
            let pending: Vec<NodeId> = pending.into_iter().map(|(node, _)| node).collect();
            warn!(?pending, passes, "type inference did not converge");
            return Err(GraphError::InferenceIncomplete { pending });
        }
        Ok(InferenceArtifacts { types, passes })
    }

    fn infer_call(
        &self,
        node: NodeId,
        call: &Call,
        types: &mut [TypeSlot],
    ) -> Result<Resolution, GraphError> {
        let relation = self.registry.relation(call.op)?;
        let targets: Vec<NodeId> = call
            .args
            .iter()
            .copied()
            .chain(std::iter::once(node))
            .collect();
        let slots: Vec<TypeSlot> = targets
            .iter()
            .map(|&target| types[target as usize].clone())
            .collect();

        let mut reporter = TypeReporter::new(&slots);
        let resolution = relation(&slots, &call.attrs, &mut reporter)?;
        if resolution == Resolution::Deferred {
            return Ok(resolution);
        }

        // Only staged slots are written back. A node bound to several slots must
        // receive one consistent type.
        let mut updates: Vec<(NodeId, TensorType)> = Vec::new();
        for (slot, ty) in reporter.into_assignments() {
            let Some(&target) = targets.get(slot) else {
                return Err(GraphError::ArityMismatch {
                    operator: call.op.to_string(),
                    expected: targets.len(),
                    actual: slot + 1,
                });
            };
            let known = updates
                .iter()
                .rev()
                .find(|(updated, _)| *updated == target)
                .map(|(_, ty)| ty)
                .or_else(|| types[target as usize].as_tensor());
            match known {
                Some(existing) if *existing == ty => {}
                Some(existing) => {
                    return Err(GraphError::ShapeConflict {
                        slot: SLOT_NAMES.get(slot).copied().unwrap_or("slot"),
                        existing: existing.to_string(),
                        inferred: ty.to_string(),
                    });
                }
                None => updates.push((target, ty)),
            }
        }
        for (target, ty) in updates {
            types[target as usize] = TypeSlot::Tensor(ty);
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::Conv2dAttrs;
    use crate::graph::{Attrs, DataType};
    use crate::op::{OpDescriptor, make_ethosu_conv2d};

    fn int8(shape: &[u32]) -> TypeSlot {
        TensorType::new(shape.to_vec(), DataType::Int8).into()
    }

    fn conv(graph: &mut Graph, ifm: NodeId, channels: u32, in_channels: u32) -> NodeId {
        let weight = graph.add_input("weight", int8(&[channels, 3, 3, in_channels]));
        let scale_bias = graph.add_input("scale_bias", TypeSlot::Unresolved);
        let lut = graph.add_input("lut", TypeSlot::Unresolved);
        let attrs = Conv2dAttrs::builder([3, 3], channels).build().unwrap();
        make_ethosu_conv2d(graph, ifm, weight, scale_bias, lut, attrs).unwrap()
    }

    #[test]
    fn resolves_single_convolution() {
        let mut graph = Graph::new();
        let ifm = graph.add_input("ifm", int8(&[1, 32, 32, 8]));
        let out = conv(&mut graph, ifm, 16, 8);
        let registry = OperatorRegistry::with_defaults();
        let artifacts = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap();
        assert_eq!(artifacts.type_of(out), Some(&int8(&[1, 30, 30, 16])));
        assert_eq!(
            artifacts.type_of(out - 2),
            Some(&TensorType::new(vec![16, 10], DataType::Uint8).into())
        );
        assert_eq!(artifacts.type_of(out - 1), Some(&TypeSlot::Unresolved));
        assert_eq!(artifacts.passes, 1);
    }

    #[test]
    fn resolves_chained_convolutions() {
        let mut graph = Graph::new();
        let ifm = graph.add_input("ifm", int8(&[1, 16, 16, 4]));
        let first = conv(&mut graph, ifm, 8, 4);
        let second = conv(&mut graph, first, 32, 8);
        let registry = OperatorRegistry::with_defaults();
        let artifacts = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap();
        assert_eq!(artifacts.type_of(first), Some(&int8(&[1, 14, 14, 8])));
        assert_eq!(artifacts.type_of(second), Some(&int8(&[1, 12, 12, 32])));
    }

    #[test]
    fn unresolvable_ifm_is_incomplete() {
        let mut graph = Graph::new();
        let ifm = graph.add_input("ifm", TypeSlot::Unresolved);
        let out = conv(&mut graph, ifm, 16, 8);
        let registry = OperatorRegistry::with_defaults();
        let err = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap_err();
        match err {
            GraphError::InferenceIncomplete { pending } => assert_eq!(pending, vec![out]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn failure_is_wrapped_with_node() {
        let mut graph = Graph::new();
        let ifm = graph.add_input(
            "ifm",
            TensorType::new(vec![1, 32, 32, 8], DataType::Float32),
        );
        let out = conv(&mut graph, ifm, 16, 8);
        let registry = OperatorRegistry::with_defaults();
        let err = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap_err();
        assert!(matches!(err, GraphError::Diagnostic { node, .. } if node == out));
        assert!(matches!(
            err.root(),
            GraphError::UnsupportedDType { tensor: "ifm", .. }
        ));
    }

    #[test]
    fn shared_scale_bias_conflict_is_reported() {
        let mut graph = Graph::new();
        let ifm = graph.add_input("ifm", int8(&[1, 8, 8, 4]));
        let weight_a = graph.add_input("weight_a", int8(&[8, 3, 3, 4]));
        let weight_b = graph.add_input("weight_b", int8(&[16, 3, 3, 4]));
        let scale_bias = graph.add_input("scale_bias", TypeSlot::Unresolved);
        let lut = graph.add_input("lut", TypeSlot::Unresolved);
        let a = Conv2dAttrs::builder([3, 3], 8).build().unwrap();
        let b = Conv2dAttrs::builder([3, 3], 16).build().unwrap();
        make_ethosu_conv2d(&mut graph, ifm, weight_a, scale_bias, lut, a).unwrap();
        let second = make_ethosu_conv2d(&mut graph, ifm, weight_b, scale_bias, lut, b).unwrap();
        let registry = OperatorRegistry::with_defaults();
        let err = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap_err();
        assert!(matches!(err, GraphError::Diagnostic { node, .. } if node == second));
        assert!(matches!(
            err.root(),
            GraphError::ShapeConflict {
                slot: "scale_bias",
                ..
            }
        ));
    }

    fn fill_first_rel(
        _types: &[TypeSlot],
        _attrs: &Attrs,
        reporter: &mut TypeReporter<'_>,
    ) -> Result<Resolution, GraphError> {
        reporter.assign(0, TensorType::new(vec![1, 8, 8, 4], DataType::Uint8))?;
        Ok(Resolution::Resolved)
    }

    fn unsupported_make(
        _graph: &mut Graph,
        _args: &[NodeId],
        _attrs: &serde_json::Value,
    ) -> Result<NodeId, GraphError> {
        Err(GraphError::UnknownOperator {
            requested: "test.fill_first".to_string(),
            available: vec![],
        })
    }

    #[test]
    fn deferred_call_is_retried_on_next_pass() {
        let mut registry = OperatorRegistry::with_defaults();
        registry.register(OpDescriptor {
            name: "test.fill_first",
            description: "Assigns a fixed type to its first argument.",
            num_inputs: 1,
            arguments: &[],
            support_level: 0,
            attrs_type_key: "none",
            attr_fields: &[],
            relation: fill_first_rel,
            make: unsupported_make,
        });

        let mut graph = Graph::new();
        let ifm = graph.add_input("ifm", TypeSlot::Unresolved);
        let out = conv(&mut graph, ifm, 8, 4);
        graph
            .add_call(Call {
                op: "test.fill_first",
                args: vec![ifm],
                attrs: Attrs::None,
                label: None,
            })
            .unwrap();

        let artifacts = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap();
        assert_eq!(artifacts.passes, 2);
        assert_eq!(
            artifacts.type_of(out),
            Some(&TensorType::new(vec![1, 6, 6, 8], DataType::Uint8).into())
        );
    }

    #[test]
    fn pass_limit_stops_iteration() {
        let mut graph = Graph::new();
        let ifm = graph.add_input("ifm", TypeSlot::Unresolved);
        conv(&mut graph, ifm, 8, 4);
        let registry = OperatorRegistry::with_defaults();
        let err = TypeInference::new(&graph, &registry, InferenceOptions { max_passes: 0 })
            .run()
            .unwrap_err();
        assert!(matches!(err, GraphError::InferenceIncomplete { .. }));
    }

    #[test]
    fn unknown_operator_is_diagnosed() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", int8(&[1]));
        graph
            .add_call(Call {
                op: "nn.relu",
                args: vec![x],
                attrs: Attrs::None,
                label: Some("relu0".to_string()),
            })
            .unwrap();
        let registry = OperatorRegistry::with_defaults();
        let err = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap_err();
        assert!(matches!(err, GraphError::Diagnostic { ref operator, .. } if operator == "relu0"));
        assert!(matches!(err.root(), GraphError::UnknownOperator { .. }));
    }

    #[test]
    fn node_bound_to_two_slots_keeps_resolved_type() {
        let mut graph = Graph::new();
        let ifm = graph.add_input("ifm", int8(&[1, 32, 32, 8]));
        let weight = graph.add_input("weight", int8(&[16, 3, 3, 8]));
        let none = graph.add_input("none", TypeSlot::Unresolved);
        let attrs = Conv2dAttrs::builder([3, 3], 16).build().unwrap();
        let out = make_ethosu_conv2d(&mut graph, ifm, weight, none, none, attrs).unwrap();
        let registry = OperatorRegistry::with_defaults();
        let artifacts = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap();
        assert_eq!(
            artifacts.type_of(none),
            Some(&TensorType::new(vec![16, 10], DataType::Uint8).into())
        );
        assert_eq!(artifacts.type_of(out), Some(&int8(&[1, 30, 30, 16])));
    }

    #[test]
    fn artifacts_render_as_json() {
        let mut graph = Graph::new();
        let ifm = graph.add_input("ifm", int8(&[1, 8, 8, 4]));
        let out = conv(&mut graph, ifm, 16, 4);
        let registry = OperatorRegistry::with_defaults();
        let artifacts = TypeInference::new(&graph, &registry, InferenceOptions::default())
            .run()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&artifacts.to_json().unwrap()).unwrap();
        let types = value.as_array().unwrap();
        assert_eq!(types.len(), graph.len());
        assert_eq!(types[3], serde_json::json!("unresolved"));
        assert_eq!(
            types[out as usize],
            serde_json::json!({"tensor": {"data_type": "int8", "shape": [1, 6, 6, 16]}})
        );
    }
}

use std::collections::HashMap;

use crate::attrs::{AttrFieldInfo, Conv2dAttrs, Conv2dAttrsBuilder};
use crate::error::GraphError;
use crate::graph::{Attrs, Call, Graph, NodeId};
use crate::relation::{RelationFn, ethosu_conv2d_rel};

pub const ETHOSU_CONV2D: &str = "contrib.ethosu.conv2d";

const ETHOSU_CONV2D_DOC: &str = "\
Arm(R) Ethos(TM)-U NPU 2D quantized convolution.

Matches the fixed-function quantized convolution of the NPU. The input feature map
(IFM) may be laid out as NHWC or NHCWB16; the weights are OHWI. Per-channel weight
scale and bias are packed into one 80-bit record per output channel, represented as
a (channels, 10) uint8 tensor.

- ifm: NHWC (1, ifm_height, ifm_width, ifm_channels)
       NHCWB16 (1, ifm_height, ifm_channels // 16, ifm_width, 16)
- weight: (ofm_channels, kernel_shape[0], kernel_shape[1], ifm_channels)
- scale_bias: (ofm_channels, 10)
- ofm: (1, ofm_height, ofm_width, ofm_channels)
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentInfo {
    pub name: &'static str,
    pub type_info: &'static str,
    pub description: &'static str,
}

const ETHOSU_CONV2D_ARGS: &[ArgumentInfo] = &[
    ArgumentInfo {
        name: "ifm",
        type_info: "Tensor",
        description: "The Input Feature Map tensor (IFM).",
    },
    ArgumentInfo {
        name: "weight",
        type_info: "Tensor",
        description: "The weight tensor.",
    },
    ArgumentInfo {
        name: "scale_bias",
        type_info: "Tensor",
        description: "The packed per-channel weight scale and bias tensor.",
    },
    ArgumentInfo {
        name: "lut",
        type_info: "Tensor",
        description: "The look-up table used when activation is 'LUT'.",
    },
];

/// Builds a call from argument nodes and a JSON attribute object.
pub type MakeFn = fn(&mut Graph, &[NodeId], &serde_json::Value) -> Result<NodeId, GraphError>;

/// Everything the host needs to know about one operator.
#[derive(Debug, Clone, Copy)]
pub struct OpDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub num_inputs: usize,
    pub arguments: &'static [ArgumentInfo],
    pub support_level: u32,
    pub attrs_type_key: &'static str,
    pub attr_fields: &'static [AttrFieldInfo],
    pub relation: RelationFn,
    pub make: MakeFn,
}

impl OpDescriptor {
    pub fn ethosu_conv2d() -> Self {
        Self {
            name: ETHOSU_CONV2D,
            description: ETHOSU_CONV2D_DOC,
            num_inputs: ETHOSU_CONV2D_ARGS.len(),
            arguments: ETHOSU_CONV2D_ARGS,
            support_level: 11,
            attrs_type_key: Conv2dAttrs::TYPE_KEY,
            attr_fields: Conv2dAttrs::fields(),
            relation: ethosu_conv2d_rel,
            make: make_ethosu_conv2d_from_json,
        }
    }
}

/// Add a `contrib.ethosu.conv2d` call consuming `ifm`, `weight`, `scale_bias` and `lut`.
pub fn make_ethosu_conv2d(
    graph: &mut Graph,
    ifm: NodeId,
    weight: NodeId,
    scale_bias: NodeId,
    lut: NodeId,
    attrs: Conv2dAttrs,
) -> Result<NodeId, GraphError> {
    graph.add_call(Call {
        op: ETHOSU_CONV2D,
        args: vec![ifm, weight, scale_bias, lut],
        attrs: Attrs::EthosuConv2d(attrs),
        label: None,
    })
}

fn make_ethosu_conv2d_from_json(
    graph: &mut Graph,
    args: &[NodeId],
    attrs: &serde_json::Value,
) -> Result<NodeId, GraphError> {
    let &[ifm, weight, scale_bias, lut] = args else {
        return Err(GraphError::ArgumentCountMismatch {
            operator: ETHOSU_CONV2D.to_string(),
            expected: ETHOSU_CONV2D_ARGS.len(),
            actual: args.len(),
        });
    };
    let builder: Conv2dAttrsBuilder = serde_json::from_value(attrs.clone())?;
    make_ethosu_conv2d(graph, ifm, weight, scale_bias, lut, builder.build()?)
}

/// Operator table, populated once and read-only afterwards.
pub struct OperatorRegistry {
    operators: HashMap<&'static str, OpDescriptor>,
}

impl OperatorRegistry {
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(OpDescriptor::ethosu_conv2d());
        registry
    }

    pub fn register(&mut self, descriptor: OpDescriptor) {
        self.operators.insert(descriptor.name, descriptor);
    }

    pub fn available_operators(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.operators.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn get(&self, name: &str) -> Result<&OpDescriptor, GraphError> {
        self.operators
            .get(name)
            .ok_or_else(|| GraphError::UnknownOperator {
                requested: name.to_string(),
                available: self.available_operators(),
            })
    }

    pub fn relation(&self, name: &str) -> Result<RelationFn, GraphError> {
        self.get(name).map(|descriptor| descriptor.relation)
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

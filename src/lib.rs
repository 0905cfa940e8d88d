pub mod attrs;
pub mod error;
pub mod graph;
pub mod inference;
pub mod loader;
pub mod op;
pub mod relation;
pub mod shape_inference;

pub use attrs::{
    Activation, AttrFieldInfo, Conv2dAttrs, Conv2dAttrsBuilder, RoundingMode, Upscale,
};
pub use error::GraphError;
pub use graph::{Attrs, Call, DataType, Graph, Node, NodeId, TensorType, TypeSlot};
pub use inference::{InferenceArtifacts, InferenceOptions, TypeInference};
pub use loader::{load_graph_from_path, parse_graph_str};
pub use op::{ETHOSU_CONV2D, OpDescriptor, OperatorRegistry, make_ethosu_conv2d};
pub use relation::{Resolution, TypeReporter, ethosu_conv2d_rel, solve};
pub use shape_inference::{
    KernelOutputOptions, Layout, infer_kernel_output_shape, upscaled_input_shape,
};

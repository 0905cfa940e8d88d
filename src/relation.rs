//! Type relation for `contrib.ethosu.conv2d`.
//!
//! A relation reads the five type slots of a call (ifm, weight, scale_bias, lut, ofm)
//! and stages the types it can infer in a [`TypeReporter`]. Staged types are written
//! back by [`solve`] only when the relation succeeds.

use tracing::{debug, trace};

use crate::attrs::Conv2dAttrs;
use crate::error::GraphError;
use crate::graph::{Attrs, DataType, TensorType, TypeSlot};
use crate::op::ETHOSU_CONV2D;
use crate::shape_inference::{KernelOutputOptions, infer_kernel_output_shape, upscaled_input_shape};

pub const IFM: usize = 0;
pub const WEIGHT: usize = 1;
pub const SCALE_BIAS: usize = 2;
pub const LUT: usize = 3;
pub const OFM: usize = 4;

/// Four inputs plus the output.
pub const NUM_TYPE_SLOTS: usize = 5;

pub const SLOT_NAMES: [&str; NUM_TYPE_SLOTS] = ["ifm", "weight", "scale_bias", "lut", "ofm"];

/// Width in bytes of one packed per-channel scale and bias record.
pub const SCALE_BIAS_RECORD_BYTES: u32 = 10;

/// Outcome of a relation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Every slot the relation is responsible for is now known.
    Resolved,
    /// Not enough is known yet; retry once producers are resolved.
    Deferred,
}

pub type RelationFn =
    fn(&[TypeSlot], &Attrs, &mut TypeReporter<'_>) -> Result<Resolution, GraphError>;

/// Stages slot assignments, unifying each one against what is already known.
#[derive(Debug)]
pub struct TypeReporter<'a> {
    types: &'a [TypeSlot],
    staged: Vec<(usize, TensorType)>,
}

impl<'a> TypeReporter<'a> {
    pub fn new(types: &'a [TypeSlot]) -> Self {
        Self {
            types,
            staged: Vec::new(),
        }
    }

    fn current(&self, index: usize) -> Option<&TensorType> {
        self.staged
            .iter()
            .rev()
            .find(|(staged, _)| *staged == index)
            .map(|(_, ty)| ty)
            .or_else(|| self.types.get(index).and_then(TypeSlot::as_tensor))
    }

    /// Mark slot `index` as `ty`. A conflicting known type is a `ShapeConflict`.
    pub fn assign(&mut self, index: usize, ty: TensorType) -> Result<(), GraphError> {
        match self.current(index) {
            Some(existing) if *existing == ty => Ok(()),
            Some(existing) => Err(GraphError::ShapeConflict {
                slot: SLOT_NAMES.get(index).copied().unwrap_or("slot"),
                existing: existing.to_string(),
                inferred: ty.to_string(),
            }),
            None => {
                trace!(slot = index, %ty, "staging type");
                self.staged.push((index, ty));
                Ok(())
            }
        }
    }

    pub fn assignments(&self) -> &[(usize, TensorType)] {
        &self.staged
    }

    pub fn into_assignments(self) -> Vec<(usize, TensorType)> {
        self.staged
    }
}

/// Run `relation` over `types` and write inferred types back on success.
///
/// On `Deferred` or on error `types` is left untouched.
pub fn solve(
    types: &mut [TypeSlot],
    attrs: &Attrs,
    relation: RelationFn,
) -> Result<Resolution, GraphError> {
    let mut reporter = TypeReporter::new(types);
    let resolution = relation(types, attrs, &mut reporter)?;
    if resolution == Resolution::Deferred {
        return Ok(resolution);
    }
    for (index, ty) in reporter.into_assignments() {
        types[index] = TypeSlot::Tensor(ty);
    }
    Ok(resolution)
}

fn check_dtype(
    tensor: &'static str,
    ty: &TensorType,
    allowed: &[DataType],
    expected: &'static str,
) -> Result<(), GraphError> {
    if allowed.contains(&ty.data_type) {
        return Ok(());
    }
    Err(GraphError::UnsupportedDType {
        operator: ETHOSU_CONV2D.to_string(),
        tensor,
        expected,
        found: ty.data_type,
    })
}

/// Type relation of the Ethos-U quantized 2D convolution.
pub fn ethosu_conv2d_rel(
    types: &[TypeSlot],
    attrs: &Attrs,
    reporter: &mut TypeReporter<'_>,
) -> Result<Resolution, GraphError> {
    if types.len() != NUM_TYPE_SLOTS {
        return Err(GraphError::ArityMismatch {
            operator: ETHOSU_CONV2D.to_string(),
            expected: NUM_TYPE_SLOTS,
            actual: types.len(),
        });
    }
    let (Some(ifm), Some(weight)) = (types[IFM].as_tensor(), types[WEIGHT].as_tensor()) else {
        debug!(op = ETHOSU_CONV2D, "ifm or weight unresolved, deferring");
        return Ok(Resolution::Deferred);
    };
    let params: &Conv2dAttrs = attrs.as_conv2d().ok_or_else(|| GraphError::AttrsMismatch {
        operator: ETHOSU_CONV2D.to_string(),
        found: attrs.kind(),
    })?;

    const QUANTIZED: &[DataType] = &[DataType::Uint8, DataType::Int8];
    check_dtype("ifm", ifm, QUANTIZED, "uint8 or int8")?;
    check_dtype("weight", weight, QUANTIZED, "uint8 or int8")?;
    if let Some(scale_bias) = types[SCALE_BIAS].as_tensor() {
        check_dtype("scale_bias", scale_bias, &[DataType::Uint8], "uint8")?;
    }

    let upscale = params.upscale()?;
    params.activation()?;
    params.rounding_mode()?;
    let ifm_layout = params.ifm_layout()?;
    let ofm_layout = params.ofm_layout()?;

    if weight.rank() != 4 {
        return Err(GraphError::InvalidRank {
            tensor: "weight",
            layout: "OHWI".to_string(),
            shape: weight.shape.clone(),
            expected: 4,
            actual: weight.rank(),
        });
    }

    reporter.assign(
        SCALE_BIAS,
        TensorType::new(
            vec![params.ofm_channels, SCALE_BIAS_RECORD_BYTES],
            DataType::Uint8,
        ),
    )?;

    // Input channels come from the weight itself; they are not checked against the ifm.
    let [kernel_h, kernel_w] = params.kernel_shape;
    reporter.assign(
        WEIGHT,
        TensorType::new(
            vec![params.ofm_channels, kernel_h, kernel_w, weight.shape[3]],
            weight.data_type,
        ),
    )?;

    let ifm_shape = if upscale.is_active() {
        upscaled_input_shape(&ifm.shape, ifm_layout)?
    } else {
        ifm.shape.clone()
    };
    let ofm_shape = infer_kernel_output_shape(
        &ifm_shape,
        &KernelOutputOptions {
            ifm_layout,
            ofm_layout,
            kernel_shape: params.kernel_shape,
            ofm_channels: params.ofm_channels,
            dilation: params.dilation,
            strides: params.strides,
            padding: params.padding,
        },
    )?;
    reporter.assign(OFM, TensorType::new(ofm_shape, ifm.data_type))?;

    debug!(op = ETHOSU_CONV2D, %upscale, ifm = %ifm, "resolved");
    Ok(Resolution::Resolved)
}

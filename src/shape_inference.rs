/// Layout-aware geometry for the Ethos-U convolution
use std::fmt;
use std::str::FromStr;

use crate::error::GraphError;

/// Spatial upscaling factor applied when an upscale mode is active.
pub const UPSCALE_FACTOR: u32 = 2;

/// Channel brick width of the NHCWB16 layout.
pub const BRICK_CHANNELS: u32 = 16;

/// Feature map memory layouts supported by the NPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// [batch, height, width, channels]
    Nhwc,
    /// [batch, height, channels / 16, width, 16]
    Nhcwb16,
}

impl Layout {
    pub fn as_str(self) -> &'static str {
        match self {
            Layout::Nhwc => "NHWC",
            Layout::Nhcwb16 => "NHCWB16",
        }
    }

    pub fn rank(self) -> usize {
        match self {
            Layout::Nhwc => 4,
            Layout::Nhcwb16 => 5,
        }
    }

    pub fn height_axis(self) -> usize {
        1
    }

    pub fn width_axis(self) -> usize {
        match self {
            Layout::Nhwc => 2,
            Layout::Nhcwb16 => 3,
        }
    }

    fn check_rank(self, tensor: &'static str, shape: &[u32]) -> Result<(), GraphError> {
        if shape.len() != self.rank() {
            return Err(GraphError::InvalidRank {
                tensor,
                layout: self.as_str().to_string(),
                shape: shape.to_vec(),
                expected: self.rank(),
                actual: shape.len(),
            });
        }
        Ok(())
    }
}

impl FromStr for Layout {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NHWC" => Ok(Layout::Nhwc),
            "NHCWB16" => Ok(Layout::Nhcwb16),
            other => Err(GraphError::UnsupportedLayout {
                layout: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the input feature map after 2x upscaling.
///
/// Only height and width are scaled; batch and channel axes (both channel axes for
/// NHCWB16) are left as they are.
pub fn upscaled_input_shape(shape: &[u32], layout: Layout) -> Result<Vec<u32>, GraphError> {
    layout.check_rank("ifm", shape)?;
    let mut upscaled = shape.to_vec();
    for axis in [layout.height_axis(), layout.width_axis()] {
        upscaled[axis] = shape[axis].checked_mul(UPSCALE_FACTOR).ok_or_else(|| {
            GraphError::InvalidGeometry {
                axis: if axis == layout.height_axis() {
                    "height"
                } else {
                    "width"
                },
                reason: format!("upscaled size of {} overflows", shape[axis]),
            }
        })?;
    }
    Ok(upscaled)
}

/// Parameters for kernel output shape inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelOutputOptions {
    pub ifm_layout: Layout,
    pub ofm_layout: Layout,
    /// (height, width)
    pub kernel_shape: [u32; 2],
    pub ofm_channels: u32,
    /// (height, width)
    pub dilation: [u32; 2],
    /// (height, width)
    pub strides: [u32; 2],
    /// (top, left, bottom, right)
    pub padding: [u32; 4],
}

/// Infer the output feature map shape of a kernel operation.
///
/// Per spatial axis:
/// `floor((in + pad_near + pad_far - ((kernel - 1) * dilation + 1)) / stride) + 1`
///
/// The input extent is read according to `ifm_layout` and the result is laid out
/// according to `ofm_layout`, with batch 1 and `ofm_channels` output channels.
/// For NHCWB16 output a partial brick of channels rounds up to a whole brick.
pub fn infer_kernel_output_shape(
    ifm_shape: &[u32],
    options: &KernelOutputOptions,
) -> Result<Vec<u32>, GraphError> {
    let ifm_layout = options.ifm_layout;
    ifm_layout.check_rank("ifm", ifm_shape)?;

    if options.ofm_channels == 0 {
        return Err(GraphError::InvalidGeometry {
            axis: "channels",
            reason: "ofm_channels must be > 0".to_string(),
        });
    }

    let [pad_top, pad_left, pad_bottom, pad_right] = options.padding;
    let output_h = output_extent(
        "height",
        ifm_shape[ifm_layout.height_axis()],
        pad_top,
        pad_bottom,
        options.kernel_shape[0],
        options.dilation[0],
        options.strides[0],
    )?;
    let output_w = output_extent(
        "width",
        ifm_shape[ifm_layout.width_axis()],
        pad_left,
        pad_right,
        options.kernel_shape[1],
        options.dilation[1],
        options.strides[1],
    )?;

    let channels = options.ofm_channels;
    let output_shape = match options.ofm_layout {
        Layout::Nhwc => vec![1, output_h, output_w, channels],
        Layout::Nhcwb16 => vec![
            1,
            output_h,
            channels.div_ceil(BRICK_CHANNELS),
            output_w,
            BRICK_CHANNELS,
        ],
    };
    Ok(output_shape)
}

fn output_extent(
    axis: &'static str,
    input: u32,
    pad_near: u32,
    pad_far: u32,
    kernel: u32,
    dilation: u32,
    stride: u32,
) -> Result<u32, GraphError> {
    let invalid = |reason: String| GraphError::InvalidGeometry { axis, reason };
    if kernel == 0 {
        return Err(invalid("kernel size must be > 0".to_string()));
    }
    if dilation == 0 {
        return Err(invalid("dilation must be > 0".to_string()));
    }
    if stride == 0 {
        return Err(invalid("stride must be > 0".to_string()));
    }

    let effective_kernel = (i64::from(kernel) - 1)
        .checked_mul(i64::from(dilation))
        .map(|extent| extent + 1)
        .ok_or_else(|| invalid(format!("kernel {kernel} with dilation {dilation} overflows")))?;
    let padded = i64::from(input) + i64::from(pad_near) + i64::from(pad_far);
    let output = (padded - effective_kernel).div_euclid(i64::from(stride)) + 1;

    if output <= 0 {
        return Err(invalid(format!(
            "padded input size {padded} is smaller than effective kernel size {effective_kernel}"
        )));
    }
    u32::try_from(output).map_err(|_| invalid(format!("output size {output} overflows")))
}

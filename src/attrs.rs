//! Attribute schema for `contrib.ethosu.conv2d`.
//!
//! Attributes are a plain struct built through [`Conv2dAttrsBuilder`], which fills in
//! defaults for every optional field. Mode fields keep the caller's string so that an
//! unknown value is reported by the type relation together with the node it belongs to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::shape_inference::Layout;

/// Activation applied to the output feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    None,
    Clip,
    Tanh,
    Sigmoid,
    Lut,
}

impl Activation {
    pub fn as_str(self) -> &'static str {
        match self {
            Activation::None => "NONE",
            Activation::Clip => "CLIP",
            Activation::Tanh => "TANH",
            Activation::Sigmoid => "SIGMOID",
            Activation::Lut => "LUT",
        }
    }
}

impl FromStr for Activation {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NONE" => Ok(Activation::None),
            "CLIP" => Ok(Activation::Clip),
            "TANH" => Ok(Activation::Tanh),
            "SIGMOID" => Ok(Activation::Sigmoid),
            "LUT" => Ok(Activation::Lut),
            other => Err(GraphError::InvalidEnumValue {
                field: "activation",
                value: other.to_string(),
                expected: "'NONE', 'CLIP', 'TANH', 'SIGMOID' or 'LUT'",
            }),
        }
    }
}

/// Rounding applied when requantizing into the output feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundingMode {
    /// TensorFlow Lite rounding.
    Tfl,
    /// Truncate towards zero.
    Truncate,
    /// Round to nearest, halves towards +infinity.
    Natural,
}

impl RoundingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundingMode::Tfl => "TFL",
            RoundingMode::Truncate => "TRUNCATE",
            RoundingMode::Natural => "NATURAL",
        }
    }
}

impl FromStr for RoundingMode {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "TFL" => Ok(RoundingMode::Tfl),
            "TRUNCATE" => Ok(RoundingMode::Truncate),
            "NATURAL" => Ok(RoundingMode::Natural),
            other => Err(GraphError::InvalidEnumValue {
                field: "rounding_mode",
                value: other.to_string(),
                expected: "'TFL', 'TRUNCATE' or 'NATURAL'",
            }),
        }
    }
}

/// 2x2 upscaling of the input feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Upscale {
    None,
    Nearest,
    Zeros,
}

impl Upscale {
    pub fn as_str(self) -> &'static str {
        match self {
            Upscale::None => "NONE",
            Upscale::Nearest => "NEAREST",
            Upscale::Zeros => "ZEROS",
        }
    }

    pub fn is_active(self) -> bool {
        self != Upscale::None
    }
}

impl FromStr for Upscale {
    type Err = GraphError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NONE" => Ok(Upscale::None),
            "NEAREST" => Ok(Upscale::Nearest),
            "ZEROS" => Ok(Upscale::Zeros),
            other => Err(GraphError::InvalidEnumValue {
                field: "upscale",
                value: other.to_string(),
                expected: "'NONE', 'ZEROS' or 'NEAREST'",
            }),
        }
    }
}

macro_rules! impl_display_via_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

impl_display_via_as_str!(Activation, RoundingMode, Upscale);

/// Introspection record for one attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrFieldInfo {
    pub name: &'static str,
    pub type_info: &'static str,
    pub description: &'static str,
    /// `None` marks a required field.
    pub default: Option<&'static str>,
}

const FIELDS: &[AttrFieldInfo] = &[
    AttrFieldInfo {
        name: "ifm_scale",
        type_info: "float64",
        description: "Quantization scale of the input feature map.",
        default: Some("1.0"),
    },
    AttrFieldInfo {
        name: "ifm_zero_point",
        type_info: "int",
        description: "Quantization zero point of the input feature map.",
        default: Some("0"),
    },
    AttrFieldInfo {
        name: "weight_zero_point",
        type_info: "int",
        description: "Quantization zero point of the weights.",
        default: Some("0"),
    },
    AttrFieldInfo {
        name: "ofm_scale",
        type_info: "float64",
        description: "Quantization scale of the output feature map.",
        default: Some("1.0"),
    },
    AttrFieldInfo {
        name: "ofm_zero_point",
        type_info: "int",
        description: "Quantization zero point of the output feature map.",
        default: Some("0"),
    },
    AttrFieldInfo {
        name: "kernel_shape",
        type_info: "(int, int)",
        description: "Kernel size as (height, width).",
        default: None,
    },
    AttrFieldInfo {
        name: "ofm_channels",
        type_info: "int",
        description: "Number of output feature map channels.",
        default: None,
    },
    AttrFieldInfo {
        name: "strides",
        type_info: "(int, int)",
        description: "Strides as (height, width).",
        default: Some("(1, 1)"),
    },
    AttrFieldInfo {
        name: "padding",
        type_info: "(int, int, int, int)",
        description: "Padding as (top, left, bottom, right).",
        default: Some("(0, 0, 0, 0)"),
    },
    AttrFieldInfo {
        name: "dilation",
        type_info: "(int, int)",
        description: "Dilation as (height, width).",
        default: Some("(1, 1)"),
    },
    AttrFieldInfo {
        name: "activation",
        type_info: "str",
        description: "Output activation: 'NONE', 'CLIP' (between clip_min and clip_max), \
                      'TANH', 'SIGMOID' or 'LUT' (look-up table input).",
        default: Some("NONE"),
    },
    AttrFieldInfo {
        name: "clip_min",
        type_info: "int",
        description: "Lower clip bound, used when activation is 'CLIP'.",
        default: Some("0"),
    },
    AttrFieldInfo {
        name: "clip_max",
        type_info: "int",
        description: "Upper clip bound, used when activation is 'CLIP'.",
        default: Some("0"),
    },
    AttrFieldInfo {
        name: "rounding_mode",
        type_info: "str",
        description: "Output rounding: 'TFL' (TensorFlow Lite), 'TRUNCATE' (towards zero) \
                      or 'NATURAL' (nearest, halves towards +infinity).",
        default: Some("TFL"),
    },
    AttrFieldInfo {
        name: "upscale",
        type_info: "str",
        description: "2x2 input upscaling: 'NONE', 'NEAREST' (nearest neighbour) or 'ZEROS' \
                      (zero insertion).",
        default: Some("NONE"),
    },
    AttrFieldInfo {
        name: "ifm_layout",
        type_info: "str",
        description: "Input feature map layout, 'NHWC' or 'NHCWB16'.",
        default: Some("NHWC"),
    },
    AttrFieldInfo {
        name: "ofm_layout",
        type_info: "str",
        description: "Output feature map layout, 'NHWC' or 'NHCWB16'.",
        default: Some("NHWC"),
    },
];

/// Attributes of one `contrib.ethosu.conv2d` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conv2dAttrs {
    pub ifm_scale: f64,
    pub ifm_zero_point: i32,
    pub weight_zero_point: i32,
    pub ofm_scale: f64,
    pub ofm_zero_point: i32,
    pub kernel_shape: [u32; 2],
    pub ofm_channels: u32,
    pub strides: [u32; 2],
    pub padding: [u32; 4],
    pub dilation: [u32; 2],
    pub activation: String,
    pub clip_min: i32,
    pub clip_max: i32,
    pub rounding_mode: String,
    pub upscale: String,
    pub ifm_layout: String,
    pub ofm_layout: String,
}

impl Conv2dAttrs {
    pub const TYPE_KEY: &'static str = "relay.attrs.EthosuConv2DAttrs";

    pub fn builder(kernel_shape: [u32; 2], ofm_channels: u32) -> Conv2dAttrsBuilder {
        Conv2dAttrsBuilder::default()
            .kernel_shape(kernel_shape)
            .ofm_channels(ofm_channels)
    }

    pub fn fields() -> &'static [AttrFieldInfo] {
        FIELDS
    }

    pub fn activation(&self) -> Result<Activation, GraphError> {
        self.activation.parse()
    }

    pub fn rounding_mode(&self) -> Result<RoundingMode, GraphError> {
        self.rounding_mode.parse()
    }

    pub fn upscale(&self) -> Result<Upscale, GraphError> {
        self.upscale.parse()
    }

    pub fn ifm_layout(&self) -> Result<Layout, GraphError> {
        self.ifm_layout.parse()
    }

    pub fn ofm_layout(&self) -> Result<Layout, GraphError> {
        self.ofm_layout.parse()
    }
}

/// Collects caller-supplied attribute values; [`build`](Self::build) applies defaults.
///
/// Deserializes from the JSON `attrs` object of a graph description, where every
/// field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Conv2dAttrsBuilder {
    ifm_scale: Option<f64>,
    ifm_zero_point: Option<i32>,
    weight_zero_point: Option<i32>,
    ofm_scale: Option<f64>,
    ofm_zero_point: Option<i32>,
    kernel_shape: Option<[u32; 2]>,
    ofm_channels: Option<u32>,
    strides: Option<[u32; 2]>,
    padding: Option<[u32; 4]>,
    dilation: Option<[u32; 2]>,
    activation: Option<String>,
    clip_min: Option<i32>,
    clip_max: Option<i32>,
    rounding_mode: Option<String>,
    upscale: Option<String>,
    ifm_layout: Option<String>,
    ofm_layout: Option<String>,
}

macro_rules! setters {
    ($($field:ident: $ty:ty),* $(,)?) => {
        $(pub fn $field(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        })*
    };
}

macro_rules! string_setters {
    ($($field:ident),* $(,)?) => {
        $(pub fn $field(mut self, value: impl Into<String>) -> Self {
            self.$field = Some(value.into());
            self
        })*
    };
}

impl Conv2dAttrsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    setters! {
        ifm_scale: f64,
        ifm_zero_point: i32,
        weight_zero_point: i32,
        ofm_scale: f64,
        ofm_zero_point: i32,
        kernel_shape: [u32; 2],
        ofm_channels: u32,
        strides: [u32; 2],
        padding: [u32; 4],
        dilation: [u32; 2],
        clip_min: i32,
        clip_max: i32,
    }

    string_setters!(activation, rounding_mode, upscale, ifm_layout, ofm_layout);

    /// Apply defaults. Only required fields are checked; cross-field and enum
    /// validation belongs to the type relation.
    pub fn build(self) -> Result<Conv2dAttrs, GraphError> {
        let kernel_shape = self.kernel_shape.ok_or(GraphError::MissingRequiredField {
            field: "kernel_shape",
        })?;
        let ofm_channels = self.ofm_channels.ok_or(GraphError::MissingRequiredField {
            field: "ofm_channels",
        })?;
        Ok(Conv2dAttrs {
            ifm_scale: self.ifm_scale.unwrap_or(1.0),
            ifm_zero_point: self.ifm_zero_point.unwrap_or(0),
            weight_zero_point: self.weight_zero_point.unwrap_or(0),
            ofm_scale: self.ofm_scale.unwrap_or(1.0),
            ofm_zero_point: self.ofm_zero_point.unwrap_or(0),
            kernel_shape,
            ofm_channels,
            strides: self.strides.unwrap_or([1, 1]),
            padding: self.padding.unwrap_or([0, 0, 0, 0]),
            dilation: self.dilation.unwrap_or([1, 1]),
            activation: self
                .activation
                .unwrap_or_else(|| Activation::None.as_str().to_string()),
            clip_min: self.clip_min.unwrap_or(0),
            clip_max: self.clip_max.unwrap_or(0),
            rounding_mode: self
                .rounding_mode
                .unwrap_or_else(|| RoundingMode::Tfl.as_str().to_string()),
            upscale: self
                .upscale
                .unwrap_or_else(|| Upscale::None.as_str().to_string()),
            ifm_layout: self
                .ifm_layout
                .unwrap_or_else(|| Layout::Nhwc.as_str().to_string()),
            ofm_layout: self
                .ofm_layout
                .unwrap_or_else(|| Layout::Nhwc.as_str().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_applies_defaults() {
        let attrs = Conv2dAttrs::builder([3, 3], 16).build().unwrap();
        assert_eq!(attrs.kernel_shape, [3, 3]);
        assert_eq!(attrs.ofm_channels, 16);
        assert_eq!(attrs.strides, [1, 1]);
        assert_eq!(attrs.padding, [0, 0, 0, 0]);
        assert_eq!(attrs.dilation, [1, 1]);
        assert_eq!(attrs.activation().unwrap(), Activation::None);
        assert_eq!(attrs.rounding_mode().unwrap(), RoundingMode::Tfl);
        assert_eq!(attrs.upscale().unwrap(), Upscale::None);
        assert_eq!(attrs.ifm_layout().unwrap(), Layout::Nhwc);
        assert_eq!(attrs.ofm_layout().unwrap(), Layout::Nhwc);
        assert_eq!(attrs.clip_min, 0);
        assert_eq!(attrs.clip_max, 0);
        assert_eq!(attrs.ifm_scale, 1.0);
        assert_eq!(attrs.ofm_zero_point, 0);
    }

    #[test]
    fn missing_kernel_shape_fails() {
        let err = Conv2dAttrsBuilder::new().ofm_channels(8).build().unwrap_err();
        assert!(matches!(
            err,
            GraphError::MissingRequiredField {
                field: "kernel_shape"
            }
        ));
    }

    #[test]
    fn missing_ofm_channels_fails() {
        let err = Conv2dAttrsBuilder::new()
            .kernel_shape([1, 1])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            GraphError::MissingRequiredField {
                field: "ofm_channels"
            }
        ));
    }

    #[test]
    fn build_keeps_unknown_mode_strings() {
        let attrs = Conv2dAttrs::builder([1, 1], 4)
            .upscale("HALF")
            .build()
            .unwrap();
        assert_eq!(attrs.upscale, "HALF");
        assert!(matches!(
            attrs.upscale(),
            Err(GraphError::InvalidEnumValue { field: "upscale", ref value, .. }) if value == "HALF"
        ));
    }

    #[test]
    fn clip_bounds_are_not_range_checked() {
        let attrs = Conv2dAttrs::builder([1, 1], 4)
            .activation("CLIP")
            .clip_min(100)
            .clip_max(-100)
            .build()
            .unwrap();
        assert_eq!(attrs.activation().unwrap(), Activation::Clip);
        assert_eq!((attrs.clip_min, attrs.clip_max), (100, -100));
    }

    #[test]
    fn builder_deserializes_from_json() {
        let json = serde_json::json!({
            "kernel_shape": [3, 2],
            "ofm_channels": 32,
            "padding": [1, 1, 1, 1],
            "upscale": "ZEROS",
            "ofm_layout": "NHCWB16"
        });
        let builder: Conv2dAttrsBuilder = serde_json::from_value(json).unwrap();
        let attrs = builder.build().unwrap();
        assert_eq!(attrs.kernel_shape, [3, 2]);
        assert_eq!(attrs.padding, [1, 1, 1, 1]);
        assert_eq!(attrs.upscale().unwrap(), Upscale::Zeros);
        assert_eq!(attrs.ofm_layout().unwrap(), Layout::Nhcwb16);
    }

    #[test]
    fn builder_rejects_unknown_json_fields() {
        let json = serde_json::json!({"kernel_shape": [1, 1], "ofm_channels": 1, "groups": 2});
        assert!(serde_json::from_value::<Conv2dAttrsBuilder>(json).is_err());
    }

    #[test]
    fn field_table_marks_required_fields() {
        let required: Vec<_> = Conv2dAttrs::fields()
            .iter()
            .filter(|field| field.default.is_none())
            .map(|field| field.name)
            .collect();
        assert_eq!(required, vec!["kernel_shape", "ofm_channels"]);
        assert_eq!(Conv2dAttrs::fields().len(), 17);
    }

    #[test]
    fn mode_enums_parse_their_tags() {
        for mode in [
            Activation::None,
            Activation::Clip,
            Activation::Tanh,
            Activation::Sigmoid,
            Activation::Lut,
        ] {
            assert_eq!(mode.as_str().parse::<Activation>().unwrap(), mode);
        }
        assert!("tfl".parse::<RoundingMode>().is_err());
        assert_eq!("NATURAL".parse::<RoundingMode>().unwrap(), RoundingMode::Natural);
        assert!(Upscale::Nearest.is_active());
        assert!(!Upscale::None.is_active());
    }
}

use serde::{Deserialize, Serialize};

/// Axis along which a nominally two-dimensional analysis treats the data as
/// statistically homogeneous.
///
/// The historical scripts disagreed on whether this was axis 0 or axis 2
/// depending on the field group, so the choice is explicit configuration
/// rather than something inferred from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpanAxis {
    Leading,
    #[default]
    Trailing,
}

impl SpanAxis {
    pub fn index(self) -> usize {
        match self {
            SpanAxis::Leading => 0,
            SpanAxis::Trailing => 2,
        }
    }
}

/// Configuration surface consumed by the pipeline, supplied by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Root name shared by the snapshot files of one field (`fluid`, `body`, ...)
    pub field_root: String,
    /// Coordinate normalization divisor (grid points per characteristic length)
    pub length_scale: f64,
    /// Extension tag of the grid family; files end with `.p{ext}`
    pub file_extension: String,

    pub time_average: bool,
    pub span_average: bool,
    /// Number of convection/oscillation cycles spanned by the whole sequence
    pub phase_periods: usize,

    /// Iso-level at which the body boundary is extracted
    pub contour_level: f64,
    /// Grid refinement ratio in the y-direction, used as the gradient step
    /// for the second spline coordinate
    pub stretch: f64,

    pub span_axis: SpanAxis,
    /// Skip unreadable files with a warning instead of aborting the sequence
    pub tolerant: bool,
    /// Bytes the reduction engine may spend on an in-memory stack before
    /// degrading to the streaming fallback
    pub memory_budget: usize,
}

impl FlowConfig {
    pub fn new(field_root: impl Into<String>, length_scale: f64) -> Self {
        Self {
            field_root: field_root.into(),
            length_scale,
            ..Self::default()
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            field_root: "fluid".to_string(),
            length_scale: 1.0,
            file_extension: "vti".to_string(),
            time_average: false,
            span_average: false,
            phase_periods: 1,
            contour_level: 1.0,
            stretch: 4.0,
            span_axis: SpanAxis::default(),
            tolerant: false,
            memory_budget: 16 << 30,
        }
    }
}

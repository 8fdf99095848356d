use std::path::PathBuf;

use thiserror::Error;

use crate::formats::ParseError;

/// Everything that can go wrong between discovering snapshot files and
/// handing derived arrays to a plotting layer.
///
/// Sequence-level and shape errors are fatal and carry enough context to name
/// the offending root/extension/file. Per-file corruption is recoverable when
/// scanning in tolerant mode.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no files matching {root}*.p{ext} in {dir}")]
    EmptySequence {
        root: String,
        ext: String,
        dir: PathBuf,
    },

    #[error("snapshot {index} has shape {got:?}, expected {expected:?} (from the first file of the sequence)")]
    ShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("estimated {required} bytes for {what} exceeds the {budget} byte memory budget")]
    ResourceExhaustion {
        what: String,
        required: usize,
        budget: usize,
    },

    #[error("corrupt snapshot {path}: {source}")]
    CorruptSnapshot {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("no iso-contour found at level {level}")]
    NoBoundaryFound { level: f64 },

    #[error("contour of {len} points is too short to spline (need at least 4)")]
    DegenerateContour { len: usize },

    #[error("phase average needs at least one full cycle ({snaps} snapshots over {periods} periods)")]
    TooFewSnapshots { snaps: usize, periods: usize },

    #[error("extension '{ext}' does not name a supported grid family (vti, vtr)")]
    UnknownFormat { ext: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact {path} is not a valid field dump: {reason}")]
    BadArtifact { path: PathBuf, reason: String },
}

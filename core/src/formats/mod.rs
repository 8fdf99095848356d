//! Readers for the two structured-grid XML families the solver writes.
//!
//! Format dispatch is an explicit registry keyed by the extension tag; the
//! concrete reader is picked once when a sequence is constructed, never by
//! re-checking the tag per file.

pub mod vti;
pub mod vtr;

mod util;
mod xml;

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::RawSnapshot;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("missing element <{0}>")]
    MissingElement(String),

    #[error("missing attribute {attribute} on <{element}>")]
    MissingAttribute { element: String, attribute: String },

    #[error("bad {attribute} value '{value}'")]
    BadAttribute { attribute: String, value: String },

    #[error("unsupported data encoding '{0}', only ascii is read")]
    UnsupportedEncoding(String),

    #[error("array {name} has {got} values, expected {expected}")]
    WrongValueCount {
        name: String,
        got: usize,
        expected: usize,
    },

    #[error("unreadable value '{0}' in data array")]
    BadValue(String),

    #[error("piece file {0} could not be read: {1}")]
    PieceIo(String, std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tag naming one of the two supported grid families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridFormat {
    /// Image-grid variant: implicit uniform spacing, topology from the
    /// global extent.
    Vti,
    /// Rectilinear variant: explicit per-axis coordinate arrays.
    Vtr,
}

impl GridFormat {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "vti" => Some(Self::Vti),
            "vtr" => Some(Self::Vtr),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Vti => "vti",
            Self::Vtr => "vtr",
        }
    }
}

/// A grid family's file reader: path in, raw canonical-order tensor out.
///
/// Coordinates come out already normalized by `length_scale`.
pub trait GridReader: Send + Sync {
    fn format(&self) -> GridFormat;
    fn read(&self, path: &Path, length_scale: f64) -> Result<RawSnapshot, ParseError>;
}

static REGISTRY: Lazy<HashMap<GridFormat, &'static dyn GridReader>> = Lazy::new(|| {
    let mut map: HashMap<GridFormat, &'static dyn GridReader> = HashMap::new();
    map.insert(GridFormat::Vti, &vti::ImageGridReader);
    map.insert(GridFormat::Vtr, &vtr::RectilinearGridReader);
    map
});

/// Looks the reader up by extension tag (`"vti"`, `"vtr"`). `None` for tags
/// outside the two supported families.
pub fn reader_for(tag: &str) -> Option<&'static dyn GridReader> {
    GridFormat::from_tag(tag).and_then(|f| REGISTRY.get(&f).copied())
}

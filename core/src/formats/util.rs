//! Pieces shared by the two grid families: extent math, ASCII array
//! decoding, piece collection across parallel headers, and final assembly
//! into the canonical component order.

use std::path::Path;

use ndarray::{Array3, Array4, Axis};

use super::xml::Element;
use super::ParseError;
use crate::snapshot::RawSnapshot;

/// Inclusive VTK point extent, `x1 x2 y1 y2 z1 z2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Extent {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl Extent {
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let nums: Vec<i64> = value
            .split_whitespace()
            .map(|t| t.parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ParseError::BadAttribute {
                attribute: "Extent".to_string(),
                value: value.to_string(),
            })?;
        if nums.len() != 6 {
            return Err(ParseError::BadAttribute {
                attribute: "Extent".to_string(),
                value: value.to_string(),
            });
        }
        Ok(Self {
            min: [nums[0], nums[2], nums[4]],
            max: [nums[1], nums[3], nums[5]],
        })
    }

    pub fn points(&self) -> [usize; 3] {
        [
            (self.max[0] - self.min[0] + 1) as usize,
            (self.max[1] - self.min[1] + 1) as usize,
            (self.max[2] - self.min[2] + 1) as usize,
        ]
    }

    pub fn num_points(&self) -> usize {
        let [nx, ny, nz] = self.points();
        nx * ny * nz
    }

    /// Point offset of this extent inside `whole`.
    pub fn offset_in(&self, whole: &Extent) -> [usize; 3] {
        [
            (self.min[0] - whole.min[0]) as usize,
            (self.min[1] - whole.min[1]) as usize,
            (self.min[2] - whole.min[2]) as usize,
        ]
    }
}

/// Point data of one piece, flat in VTK order (x fastest).
#[derive(Debug)]
pub(crate) struct PieceData {
    pub extent: Extent,
    pub velocity: Vec<f64>,
    pub velocity_components: usize,
    pub scalar: Vec<f64>,
    /// Per-axis coordinate arrays, rectilinear family only.
    pub coordinates: Option<[Vec<f64>; 3]>,
}

pub(crate) fn parse_floats(text: &str, name: &str, expected: usize) -> Result<Vec<f64>, ParseError> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| ParseError::BadValue(t.to_string()))
        })
        .collect::<Result<_, _>>()?;
    if values.len() != expected {
        return Err(ParseError::WrongValueCount {
            name: name.to_string(),
            got: values.len(),
            expected,
        });
    }
    Ok(values)
}

fn require_ascii(array: &Element) -> Result<(), ParseError> {
    match array.attr("format") {
        None | Some("ascii") => Ok(()),
        Some(other) => Err(ParseError::UnsupportedEncoding(other.to_string())),
    }
}

fn components_of(array: &Element) -> Result<usize, ParseError> {
    match array.attr("NumberOfComponents") {
        None => Ok(1),
        Some(v) => v.parse::<usize>().map_err(|_| ParseError::BadAttribute {
            attribute: "NumberOfComponents".to_string(),
            value: v.to_string(),
        }),
    }
}

/// Resolves the velocity and scalar arrays of one `<PointData>` block, going
/// by its `Vectors`/`Scalars` attributes first and the conventional field
/// names second.
fn resolve_fields<'a>(
    point_data: &'a Element,
) -> Result<(&'a Element, &'a Element), ParseError> {
    let by_name = |wanted: Option<&str>, fallback: &str| -> Option<&'a Element> {
        point_data
            .children_named("DataArray")
            .find(|a| a.attr("Name") == wanted.or(Some(fallback)))
    };

    let velocity = by_name(point_data.attr("Vectors"), "Velocity")
        .ok_or_else(|| ParseError::MissingElement("DataArray Name=\"Velocity\"".to_string()))?;
    let scalar = by_name(point_data.attr("Scalars"), "Pressure")
        .ok_or_else(|| ParseError::MissingElement("DataArray Name=\"Pressure\"".to_string()))?;
    Ok((velocity, scalar))
}

fn read_inline_piece(piece: &Element, want_coordinates: bool) -> Result<PieceData, ParseError> {
    let extent = Extent::parse(piece.require_attr("Extent")?)?;
    let n = extent.num_points();

    let point_data = piece.require_child("PointData")?;
    let (velocity_el, scalar_el) = resolve_fields(point_data)?;
    require_ascii(velocity_el)?;
    require_ascii(scalar_el)?;

    let velocity_components = components_of(velocity_el)?;
    let velocity = parse_floats(&velocity_el.text, "Velocity", n * velocity_components)?;
    let scalar = parse_floats(&scalar_el.text, "Pressure", n)?;

    let coordinates = if want_coordinates {
        let coords_el = piece.require_child("Coordinates")?;
        let arrays: Vec<&Element> = coords_el.children_named("DataArray").collect();
        if arrays.len() != 3 {
            return Err(ParseError::MissingElement(
                "three coordinate DataArrays".to_string(),
            ));
        }
        let [nx, ny, nz] = extent.points();
        let mut out: Vec<Vec<f64>> = Vec::with_capacity(3);
        for (el, len) in arrays.iter().zip([nx, ny, nz]) {
            require_ascii(el)?;
            out.push(parse_floats(
                &el.text,
                el.attr("Name").unwrap_or("coordinate"),
                len,
            )?);
        }
        let mut it = out.into_iter();
        Some([
            it.next().expect("three arrays"),
            it.next().expect("three arrays"),
            it.next().expect("three arrays"),
        ])
    } else {
        None
    };

    Ok(PieceData {
        extent,
        velocity,
        velocity_components,
        scalar,
        coordinates,
    })
}

/// Collects piece point data below `grid`, following `Source` references of a
/// parallel header into the piece files next to `path`.
pub(crate) fn collect_pieces(
    grid: &Element,
    path: &Path,
    serial_grid_name: &str,
    want_coordinates: bool,
) -> Result<Vec<PieceData>, ParseError> {
    let mut pieces = Vec::new();
    for piece in grid.children_named("Piece") {
        match piece.attr("Source") {
            Some(source) => {
                let piece_path = path.parent().unwrap_or_else(|| Path::new(".")).join(source);
                let xml = std::fs::read_to_string(&piece_path)
                    .map_err(|e| ParseError::PieceIo(source.to_string(), e))?;
                let root = Element::parse(&xml)?;
                let serial = root.require_child(serial_grid_name)?;
                for inner in serial.children_named("Piece") {
                    pieces.push(read_inline_piece(inner, want_coordinates)?);
                }
            }
            None => pieces.push(read_inline_piece(piece, want_coordinates)?),
        }
    }
    if pieces.is_empty() {
        return Err(ParseError::MissingElement("Piece".to_string()));
    }
    Ok(pieces)
}

/// Scatters flat piece data into global `(nx, ny, nz)` arrays.
pub(crate) fn scatter_fields(
    whole: &Extent,
    pieces: &[PieceData],
) -> (Vec<Array3<f64>>, Array3<f64>, usize) {
    let [nx, ny, nz] = whole.points();
    let ncomp = pieces[0].velocity_components;

    let mut velocity: Vec<Array3<f64>> = (0..ncomp).map(|_| Array3::zeros((nx, ny, nz))).collect();
    let mut scalar = Array3::zeros((nx, ny, nz));

    for piece in pieces {
        let [pnx, pny, pnz] = piece.extent.points();
        let [ox, oy, oz] = piece.extent.offset_in(whole);
        for k in 0..pnz {
            for j in 0..pny {
                for i in 0..pnx {
                    let flat = i + pnx * (j + pny * k);
                    let idx = [i + ox, j + oy, k + oz];
                    for (c, comp) in velocity.iter_mut().enumerate() {
                        comp[idx] = piece.velocity[flat * ncomp + c];
                    }
                    scalar[idx] = piece.scalar[flat];
                }
            }
        }
    }

    (velocity, scalar, ncomp)
}

/// Stacks named fields into the positional canonical order. A two-component
/// velocity yields the 2-D layout without Z and W.
pub(crate) fn build_snapshot(
    coords: Vec<Array3<f64>>,
    velocity: Vec<Array3<f64>>,
    scalar: Array3<f64>,
) -> RawSnapshot {
    debug_assert_eq!(coords.len(), velocity.len());
    let dim = scalar.raw_dim();
    let c = coords.len() + velocity.len() + 1;

    let mut data = Array4::zeros((c, dim[0], dim[1], dim[2]));
    for (slot, field) in coords.iter().chain(velocity.iter()).enumerate() {
        data.index_axis_mut(Axis(0), slot).assign(field);
    }
    data.index_axis_mut(Axis(0), c - 1).assign(&scalar);
    RawSnapshot::new(data)
}

//! Image-grid family: uniform spacing, topology derived from the global
//! extent, coordinates generated rather than stored.

use std::path::Path;

use ndarray::Array3;
use tracing::instrument;

use super::util::{build_snapshot, collect_pieces, scatter_fields, Extent};
use super::xml::Element;
use super::{GridFormat, GridReader, ParseError};
use crate::snapshot::RawSnapshot;

pub struct ImageGridReader;

impl GridReader for ImageGridReader {
    fn format(&self) -> GridFormat {
        GridFormat::Vti
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    fn read(&self, path: &Path, length_scale: f64) -> Result<RawSnapshot, ParseError> {
        let xml = std::fs::read_to_string(path)?;
        let root = Element::parse(&xml)?;
        let grid = root
            .child("PImageData")
            .or_else(|| root.child("ImageData"))
            .ok_or_else(|| ParseError::MissingElement("PImageData".to_string()))?;

        let whole = Extent::parse(grid.require_attr("WholeExtent")?)?;
        let origin = parse_triple(grid.attr("Origin").unwrap_or("0 0 0"), "Origin")?;
        let spacing = parse_triple(grid.attr("Spacing").unwrap_or("1 1 1"), "Spacing")?;

        let pieces = collect_pieces(grid, path, "ImageData", false)?;
        let (velocity, scalar, ncomp) = scatter_fields(&whole, &pieces);
        let coords = generate_grid(&whole, origin, spacing, length_scale, ncomp);
        Ok(build_snapshot(coords, velocity, scalar))
    }
}

fn parse_triple(value: &str, attribute: &str) -> Result<[f64; 3], ParseError> {
    let nums: Vec<f64> = value
        .split_whitespace()
        .map(|t| t.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ParseError::BadAttribute {
            attribute: attribute.to_string(),
            value: value.to_string(),
        })?;
    if nums.len() != 3 {
        return Err(ParseError::BadAttribute {
            attribute: attribute.to_string(),
            value: value.to_string(),
        });
    }
    Ok([nums[0], nums[1], nums[2]])
}

/// Materializes the implicit uniform grid, normalized by `length_scale`.
/// A two-component velocity means the 2-D layout: only X and Y are produced.
fn generate_grid(
    whole: &Extent,
    origin: [f64; 3],
    spacing: [f64; 3],
    length_scale: f64,
    velocity_components: usize,
) -> Vec<Array3<f64>> {
    let [nx, ny, nz] = whole.points();
    let ndim = if velocity_components == 2 { 2 } else { 3 };

    (0..ndim)
        .map(|axis| {
            Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
                let along = [i, j, k][axis] as i64 + whole.min[axis];
                (origin[axis] + along as f64 * spacing[axis]) / length_scale
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SERIAL_3D: &str = r#"<?xml version="1.0"?>
<VTKFile type="ImageData" version="0.1" byte_order="LittleEndian">
  <ImageData WholeExtent="0 1 0 1 0 1" Origin="0 0 0" Spacing="0.5 0.5 0.5">
    <Piece Extent="0 1 0 1 0 1">
      <PointData Vectors="Velocity" Scalars="Pressure">
        <DataArray type="Float64" Name="Velocity" NumberOfComponents="3" format="ascii">
          1 0 0  2 0 0  3 0 0  4 0 0
          5 0 0  6 0 0  7 0 0  8 0 0
        </DataArray>
        <DataArray type="Float64" Name="Pressure" format="ascii">
          10 20 30 40 50 60 70 80
        </DataArray>
      </PointData>
    </Piece>
  </ImageData>
</VTKFile>"#;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_serial_image_grid() {
        let f = write_temp(SERIAL_3D);
        let snap = ImageGridReader.read(f.path(), 2.0).unwrap();

        assert_eq!(snap.shape(), &[7, 2, 2, 2]);

        // VTK flat order is x fastest: U at (1, 0, 0) is the second tuple.
        assert_eq!(snap.field(3)[[1, 0, 0]], 2.0);
        assert_eq!(snap.field(3)[[0, 1, 0]], 3.0);
        assert_eq!(snap.field(3)[[0, 0, 1]], 5.0);
        assert_eq!(snap.field(6)[[1, 1, 1]], 80.0);

        // coordinates generated from origin/spacing, normalized by length_scale
        assert_eq!(snap.field(0)[[0, 0, 0]], 0.0);
        assert_eq!(snap.field(0)[[1, 0, 0]], 0.25);
        assert_eq!(snap.field(2)[[0, 0, 1]], 0.25);
    }

    #[test]
    fn parallel_header_follows_piece_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fluid.0.vti"), SERIAL_3D).unwrap();
        let header = r#"<?xml version="1.0"?>
<VTKFile type="PImageData" version="0.1" byte_order="LittleEndian">
  <PImageData WholeExtent="0 1 0 1 0 1" GhostLevel="0" Origin="0 0 0" Spacing="0.5 0.5 0.5">
    <PPointData Vectors="Velocity" Scalars="Pressure">
      <PDataArray type="Float64" Name="Velocity" NumberOfComponents="3"/>
      <PDataArray type="Float64" Name="Pressure"/>
    </PPointData>
    <Piece Extent="0 1 0 1 0 1" Source="fluid.0.vti"/>
  </PImageData>
</VTKFile>"#;
        let path = dir.path().join("fluid.pvti");
        std::fs::write(&path, header).unwrap();

        let snap = ImageGridReader.read(&path, 1.0).unwrap();
        assert_eq!(snap.shape(), &[7, 2, 2, 2]);
        assert_eq!(snap.field(3)[[1, 0, 0]], 2.0);
    }

    #[test]
    fn two_component_velocity_gives_planar_layout() {
        let xml = r#"<VTKFile type="ImageData">
  <ImageData WholeExtent="0 1 0 1 0 0" Origin="0 0 0" Spacing="1 1 1">
    <Piece Extent="0 1 0 1 0 0">
      <PointData Vectors="Velocity" Scalars="Pressure">
        <DataArray Name="Velocity" NumberOfComponents="2" format="ascii">
          1 2  3 4  5 6  7 8
        </DataArray>
        <DataArray Name="Pressure" format="ascii">0 0 0 0</DataArray>
      </PointData>
    </Piece>
  </ImageData>
</VTKFile>"#;
        let f = write_temp(xml);
        let snap = ImageGridReader.read(f.path(), 1.0).unwrap();
        assert_eq!(snap.shape(), &[5, 2, 2, 1]);
        assert!(snap.is_planar());
        assert_eq!(snap.field(2)[[1, 0, 0]], 3.0);
        assert_eq!(snap.field(3)[[1, 0, 0]], 4.0);
    }

    #[test]
    fn binary_encoding_is_rejected() {
        let xml = r#"<VTKFile type="ImageData">
  <ImageData WholeExtent="0 0 0 0 0 0">
    <Piece Extent="0 0 0 0 0 0">
      <PointData>
        <DataArray Name="Velocity" NumberOfComponents="3" format="binary">AAAA</DataArray>
        <DataArray Name="Pressure" format="ascii">0</DataArray>
      </PointData>
    </Piece>
  </ImageData>
</VTKFile>"#;
        let f = write_temp(xml);
        let err = ImageGridReader.read(f.path(), 1.0).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedEncoding(e) if e == "binary"));
    }
}

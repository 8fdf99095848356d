//! Rectilinear family: explicit per-axis coordinate arrays carried by each
//! piece, stretched grids allowed.

use std::path::Path;

use ndarray::Array3;
use tracing::instrument;

use super::util::{build_snapshot, collect_pieces, scatter_fields, Extent, PieceData};
use super::xml::Element;
use super::{GridFormat, GridReader, ParseError};
use crate::snapshot::RawSnapshot;

pub struct RectilinearGridReader;

impl GridReader for RectilinearGridReader {
    fn format(&self) -> GridFormat {
        GridFormat::Vtr
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    fn read(&self, path: &Path, length_scale: f64) -> Result<RawSnapshot, ParseError> {
        let xml = std::fs::read_to_string(path)?;
        let root = Element::parse(&xml)?;
        let grid = root
            .child("PRectilinearGrid")
            .or_else(|| root.child("RectilinearGrid"))
            .ok_or_else(|| ParseError::MissingElement("PRectilinearGrid".to_string()))?;

        let whole = Extent::parse(grid.require_attr("WholeExtent")?)?;
        let pieces = collect_pieces(grid, path, "RectilinearGrid", true)?;
        let (velocity, scalar, ncomp) = scatter_fields(&whole, &pieces);
        let coords = assemble_coordinates(&whole, &pieces, length_scale, ncomp)?;
        Ok(build_snapshot(coords, velocity, scalar))
    }
}

/// Merges per-piece coordinate arrays into global per-axis arrays, then
/// broadcasts them over the grid. Overlapping piece boundaries simply
/// overwrite with identical values.
fn assemble_coordinates(
    whole: &Extent,
    pieces: &[PieceData],
    length_scale: f64,
    velocity_components: usize,
) -> Result<Vec<Array3<f64>>, ParseError> {
    let [nx, ny, nz] = whole.points();
    let mut axes = [vec![0.0; nx], vec![0.0; ny], vec![0.0; nz]];

    for piece in pieces {
        let coords = piece
            .coordinates
            .as_ref()
            .ok_or_else(|| ParseError::MissingElement("Coordinates".to_string()))?;
        let offsets = piece.extent.offset_in(whole);
        for (axis, values) in coords.iter().enumerate() {
            for (i, v) in values.iter().enumerate() {
                axes[axis][offsets[axis] + i] = v / length_scale;
            }
        }
    }

    let ndim = if velocity_components == 2 { 2 } else { 3 };
    Ok((0..ndim)
        .map(|axis| {
            let axes = &axes;
            Array3::from_shape_fn((nx, ny, nz), move |(i, j, k)| axes[axis][[i, j, k][axis]])
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SERIAL: &str = r#"<?xml version="1.0"?>
<VTKFile type="RectilinearGrid" version="0.1" byte_order="LittleEndian">
  <RectilinearGrid WholeExtent="0 2 0 1 0 0">
    <Piece Extent="0 2 0 1 0 0">
      <Coordinates>
        <DataArray Name="x" format="ascii">0.0 1.0 4.0</DataArray>
        <DataArray Name="y" format="ascii">0.0 2.0</DataArray>
        <DataArray Name="z" format="ascii">0.0</DataArray>
      </Coordinates>
      <PointData Vectors="Velocity" Scalars="Pressure">
        <DataArray Name="Velocity" NumberOfComponents="3" format="ascii">
          1 -1 0  2 -2 0  3 -3 0
          4 -4 0  5 -5 0  6 -6 0
        </DataArray>
        <DataArray Name="Pressure" format="ascii">1 2 3 4 5 6</DataArray>
      </PointData>
    </Piece>
  </RectilinearGrid>
</VTKFile>"#;

    #[test]
    fn reads_serial_rectilinear_grid() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SERIAL.as_bytes()).unwrap();
        let snap = RectilinearGridReader.read(f.path(), 2.0).unwrap();

        assert_eq!(snap.shape(), &[7, 3, 2, 1]);

        // stretched x-coordinates divided by the length scale
        assert_eq!(snap.field(0)[[2, 0, 0]], 2.0);
        assert_eq!(snap.field(1)[[0, 1, 0]], 1.0);

        assert_eq!(snap.field(3)[[1, 0, 0]], 2.0);
        assert_eq!(snap.field(4)[[1, 0, 0]], -2.0);
        assert_eq!(snap.field(6)[[2, 1, 0]], 6.0);
    }

    #[test]
    fn parallel_header_merges_pieces() {
        let dir = tempfile::tempdir().unwrap();

        let left = r#"<VTKFile type="RectilinearGrid">
  <RectilinearGrid WholeExtent="0 1 0 0 0 0">
    <Piece Extent="0 1 0 0 0 0">
      <Coordinates>
        <DataArray Name="x" format="ascii">0.0 1.0</DataArray>
        <DataArray Name="y" format="ascii">0.0</DataArray>
        <DataArray Name="z" format="ascii">0.0</DataArray>
      </Coordinates>
      <PointData>
        <DataArray Name="Velocity" NumberOfComponents="3" format="ascii">1 0 0  2 0 0</DataArray>
        <DataArray Name="Pressure" format="ascii">10 20</DataArray>
      </PointData>
    </Piece>
  </RectilinearGrid>
</VTKFile>"#;
        let right = r#"<VTKFile type="RectilinearGrid">
  <RectilinearGrid WholeExtent="1 2 0 0 0 0">
    <Piece Extent="1 2 0 0 0 0">
      <Coordinates>
        <DataArray Name="x" format="ascii">1.0 2.0</DataArray>
        <DataArray Name="y" format="ascii">0.0</DataArray>
        <DataArray Name="z" format="ascii">0.0</DataArray>
      </Coordinates>
      <PointData>
        <DataArray Name="Velocity" NumberOfComponents="3" format="ascii">2 0 0  3 0 0</DataArray>
        <DataArray Name="Pressure" format="ascii">20 30</DataArray>
      </PointData>
    </Piece>
  </RectilinearGrid>
</VTKFile>"#;
        std::fs::write(dir.path().join("body.0.vtr"), left).unwrap();
        std::fs::write(dir.path().join("body.1.vtr"), right).unwrap();

        let header = r#"<VTKFile type="PRectilinearGrid">
  <PRectilinearGrid WholeExtent="0 2 0 0 0 0" GhostLevel="0">
    <Piece Extent="0 1 0 0 0 0" Source="body.0.vtr"/>
    <Piece Extent="1 2 0 0 0 0" Source="body.1.vtr"/>
  </PRectilinearGrid>
</VTKFile>"#;
        let path = dir.path().join("body.pvtr");
        std::fs::write(&path, header).unwrap();

        let snap = RectilinearGridReader.read(&path, 1.0).unwrap();
        assert_eq!(snap.shape(), &[7, 3, 1, 1]);
        assert_eq!(snap.field(3)[[0, 0, 0]], 1.0);
        assert_eq!(snap.field(3)[[1, 0, 0]], 2.0);
        assert_eq!(snap.field(3)[[2, 0, 0]], 3.0);
        assert_eq!(snap.field(0)[[2, 0, 0]], 2.0);
        assert_eq!(snap.field(6)[[2, 0, 0]], 30.0);
    }

    #[test]
    fn missing_coordinates_is_an_error() {
        let xml = r#"<VTKFile type="RectilinearGrid">
  <RectilinearGrid WholeExtent="0 0 0 0 0 0">
    <Piece Extent="0 0 0 0 0 0">
      <PointData>
        <DataArray Name="Velocity" NumberOfComponents="3" format="ascii">0 0 0</DataArray>
        <DataArray Name="Pressure" format="ascii">0</DataArray>
      </PointData>
    </Piece>
  </RectilinearGrid>
</VTKFile>"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(xml.as_bytes()).unwrap();
        assert!(RectilinearGridReader.read(f.path(), 1.0).is_err());
    }
}

//! Discovery and chronological ordering of the snapshot files belonging to
//! one field root.
//!
//! A sequence is an explicit, constructed value passed by reference to every
//! consumer; there is no process-wide cache of discovered filenames. Ordering
//! is the legacy dictionary sort of the filename, which is *not* numeric:
//! unpadded indices sort the way they always have.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::config::FlowConfig;
use crate::error::Error;
use crate::formats::{reader_for, GridReader};
use crate::snapshot::{RawSnapshot, StackedSequence};

pub struct SnapshotSequence {
    dir: PathBuf,
    config: FlowConfig,
    reader: &'static dyn GridReader,
    file_names: Vec<String>,
    probed_shape: OnceCell<Vec<usize>>,
}

impl SnapshotSequence {
    /// Lists `dir` for files named `{field_root}*.p{ext}` and orders them by
    /// dictionary sort. Fails before any file is read when nothing matches.
    #[instrument(skip(dir, config), fields(root = %config.field_root, ext = %config.file_extension))]
    pub fn discover(dir: impl AsRef<Path>, config: &FlowConfig) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        let reader = reader_for(&config.file_extension).ok_or_else(|| Error::UnknownFormat {
            ext: config.file_extension.clone(),
        })?;

        let suffix = format!(".p{}", config.file_extension);
        let mut file_names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(&config.field_root) && name.ends_with(&suffix))
            .collect();

        if file_names.is_empty() {
            return Err(Error::EmptySequence {
                root: config.field_root.clone(),
                ext: config.file_extension.clone(),
                dir,
            });
        }

        file_names.sort_by(|a, b| dict_cmp(a, b));
        debug!(count = file_names.len(), "discovered snapshot sequence");

        Ok(Self {
            dir,
            config: config.clone(),
            reader,
            file_names,
            probed_shape: OnceCell::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.file_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_names.is_empty()
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn file_names(&self) -> &[String] {
        &self.file_names
    }

    pub fn path(&self, index: usize) -> PathBuf {
        self.dir.join(&self.file_names[index])
    }

    /// Shape of every member, `(C, nx, ny, nz)`, inferred by reading only the
    /// first file. Cached for the lifetime of the sequence; used to
    /// preallocate reduction buffers and to validate later reads.
    pub fn shape_probe(&self) -> Result<&[usize], Error> {
        self.probed_shape
            .get_or_try_init(|| Ok(self.read_unchecked(0)?.shape().to_vec()))
            .map(Vec::as_slice)
    }

    /// Bytes one snapshot occupies in memory.
    pub fn snapshot_bytes(&self) -> Result<usize, Error> {
        let elems: usize = self.shape_probe()?.iter().product();
        Ok(elems * std::mem::size_of::<f64>())
    }

    /// Reads member `index` and validates its shape against the probe.
    pub fn read(&self, index: usize) -> Result<RawSnapshot, Error> {
        let snap = self.read_unchecked(index)?;
        let expected = self.shape_probe()?;
        if snap.shape() != expected {
            return Err(Error::ShapeMismatch {
                index,
                expected: expected.to_vec(),
                got: snap.shape().to_vec(),
            });
        }
        Ok(snap)
    }

    fn read_unchecked(&self, index: usize) -> Result<RawSnapshot, Error> {
        let path = self.path(index);
        self.reader
            .read(&path, self.config.length_scale)
            .map_err(|source| Error::CorruptSnapshot { path, source })
    }

    /// Materializes every member. In tolerant mode corrupt files are skipped
    /// with a warning; shape mismatches stay fatal either way.
    pub fn read_all(&self) -> Result<Vec<RawSnapshot>, Error> {
        let mut snaps = Vec::with_capacity(self.len());
        for index in 0..self.len() {
            match self.read(index) {
                Ok(snap) => snaps.push(snap),
                Err(Error::CorruptSnapshot { path, source }) if self.config.tolerant => {
                    warn!(path = %path.display(), error = %source, "skipping corrupt snapshot");
                }
                Err(e) => return Err(e),
            }
        }
        if snaps.is_empty() {
            return Err(Error::EmptySequence {
                root: self.config.field_root.clone(),
                ext: self.config.file_extension.clone(),
                dir: self.dir.clone(),
            });
        }
        Ok(snaps)
    }

    /// Stacks the whole sequence along a new leading time axis.
    pub fn stack(&self) -> Result<StackedSequence, Error> {
        StackedSequence::from_snapshots(&self.read_all()?)
    }
}

/// Legacy dictionary ordering: case-insensitive lexicographic with a
/// case-sensitive tie-break. Deliberately not numeric-aware.
fn dict_cmp(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| a.cmp(b))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;

    /// Writes a tiny serial image-grid file where every velocity component
    /// and the scalar hold `value`. Shape `(7, 2, 2, 1)` after reading.
    pub(crate) fn write_constant_snapshot(dir: &Path, name: &str, value: f64) {
        let tuple = format!("{value} {value} {value} ");
        let xml = format!(
            r#"<VTKFile type="ImageData">
  <ImageData WholeExtent="0 1 0 1 0 0" Origin="0 0 0" Spacing="1 1 1">
    <Piece Extent="0 1 0 1 0 0">
      <PointData Vectors="Velocity" Scalars="Pressure">
        <DataArray Name="Velocity" NumberOfComponents="3" format="ascii">{}</DataArray>
        <DataArray Name="Pressure" format="ascii">{value} {value} {value} {value}</DataArray>
      </PointData>
    </Piece>
  </ImageData>
</VTKFile>"#,
            tuple.repeat(4),
        );
        std::fs::write(dir.join(name), xml).unwrap();
    }

    pub(crate) fn constant_config() -> FlowConfig {
        FlowConfig {
            field_root: "fluid".to_string(),
            file_extension: "vti".to_string(),
            ..FlowConfig::new("fluid", 1.0)
        }
    }

    #[test]
    fn filters_by_root_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        write_constant_snapshot(dir.path(), "fluid.0.pvti", 1.0);
        write_constant_snapshot(dir.path(), "fluid.1.pvti", 2.0);
        write_constant_snapshot(dir.path(), "body.0.pvti", 9.0);
        std::fs::write(dir.path().join("fluid.notes.txt"), "not a snapshot").unwrap();

        let seq = SnapshotSequence::discover(dir.path(), &constant_config()).unwrap();
        assert_eq!(seq.file_names(), ["fluid.0.pvti", "fluid.1.pvti"]);
    }

    #[test]
    fn empty_sequence_short_circuits_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        // present but matching neither root nor extension
        write_constant_snapshot(dir.path(), "body.0.pvti", 1.0);
        std::fs::write(dir.path().join("fluid.0.pvtr"), "garbage").unwrap();

        let err = SnapshotSequence::discover(dir.path(), &constant_config())
            .err()
            .unwrap();
        match err {
            Error::EmptySequence { root, ext, .. } => {
                assert_eq!(root, "fluid");
                assert_eq!(ext, "vti");
            }
            other => panic!("expected EmptySequence, got {other}"),
        }
    }

    #[test]
    fn dictionary_order_is_not_numeric() {
        let dir = tempfile::tempdir().unwrap();
        write_constant_snapshot(dir.path(), "fluid.10.pvti", 1.0);
        write_constant_snapshot(dir.path(), "fluid.2.pvti", 2.0);

        let seq = SnapshotSequence::discover(dir.path(), &constant_config()).unwrap();
        // "1" < "2", so the unpadded tenth snapshot sorts first
        assert_eq!(seq.file_names(), ["fluid.10.pvti", "fluid.2.pvti"]);
    }

    #[test]
    fn shape_probe_matches_read() {
        let dir = tempfile::tempdir().unwrap();
        write_constant_snapshot(dir.path(), "fluid.0.pvti", 1.0);

        let seq = SnapshotSequence::discover(dir.path(), &constant_config()).unwrap();
        assert_eq!(seq.shape_probe().unwrap(), &[7, 2, 2, 1]);
        assert_eq!(seq.snapshot_bytes().unwrap(), 7 * 2 * 2 * 8);
        assert_eq!(seq.read(0).unwrap().shape(), &[7, 2, 2, 1]);
    }

    #[test]
    fn tolerant_mode_skips_corrupt_members() {
        let dir = tempfile::tempdir().unwrap();
        write_constant_snapshot(dir.path(), "fluid.0.pvti", 1.0);
        std::fs::write(dir.path().join("fluid.1.pvti"), "<VTKFile>truncated").unwrap();
        write_constant_snapshot(dir.path(), "fluid.2.pvti", 3.0);

        let strict = SnapshotSequence::discover(dir.path(), &constant_config()).unwrap();
        assert!(matches!(
            strict.read_all().unwrap_err(),
            Error::CorruptSnapshot { .. }
        ));

        let config = FlowConfig {
            tolerant: true,
            ..constant_config()
        };
        let tolerant = SnapshotSequence::discover(dir.path(), &config).unwrap();
        assert_eq!(tolerant.read_all().unwrap().len(), 2);
    }

    #[test]
    fn shape_mismatch_is_fatal_and_names_the_index() {
        let dir = tempfile::tempdir().unwrap();
        write_constant_snapshot(dir.path(), "fluid.0.pvti", 1.0);
        // larger grid for the second member
        let xml = r#"<VTKFile type="ImageData">
  <ImageData WholeExtent="0 2 0 1 0 0" Origin="0 0 0" Spacing="1 1 1">
    <Piece Extent="0 2 0 1 0 0">
      <PointData>
        <DataArray Name="Velocity" NumberOfComponents="3" format="ascii">
          0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
        </DataArray>
        <DataArray Name="Pressure" format="ascii">0 0 0 0 0 0</DataArray>
      </PointData>
    </Piece>
  </ImageData>
</VTKFile>"#;
        std::fs::write(dir.path().join("fluid.1.pvti"), xml).unwrap();

        let seq = SnapshotSequence::discover(dir.path(), &constant_config()).unwrap();
        match seq.read_all().unwrap_err() {
            Error::ShapeMismatch { index, .. } => assert_eq!(index, 1),
            other => panic!("expected ShapeMismatch, got {other}"),
        }
    }
}

//! Binary array dumps.
//!
//! One artifact per derived quantity, or one per snapshot index in the
//! low-memory streaming mode. Names are deterministic
//! (`{field_root}_{quantity}{index}.dat`) so a partial run can be resumed by
//! inspecting which indices already exist on disk.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{ArrayD, ArrayViewD, IxDyn};
use tracing::debug;

use crate::error::Error;

const MAGIC: &[u8; 4] = b"LTBX";
const VERSION: u16 = 1;

pub const ARTIFACT_EXT: &str = "dat";

pub fn artifact_name(root: &str, quantity: &str, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{root}_{quantity}{i}.{ARTIFACT_EXT}"),
        None => format!("{root}_{quantity}.{ARTIFACT_EXT}"),
    }
}

/// Writes one aggregate artifact, returning its path.
pub fn write(
    dir: &Path,
    root: &str,
    quantity: &str,
    array: ArrayViewD<'_, f64>,
) -> Result<PathBuf, Error> {
    let path = dir.join(artifact_name(root, quantity, None));
    write_array(&path, array)?;
    Ok(path)
}

/// Writes one per-index artifact of a streaming run, returning its path.
pub fn write_indexed(
    dir: &Path,
    root: &str,
    quantity: &str,
    index: usize,
    array: ArrayViewD<'_, f64>,
) -> Result<PathBuf, Error> {
    let path = dir.join(artifact_name(root, quantity, Some(index)));
    write_array(&path, array)?;
    Ok(path)
}

pub fn write_array(path: &Path, array: ArrayViewD<'_, f64>) -> Result<(), Error> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(MAGIC)?;
    w.write_u16::<LittleEndian>(VERSION)?;
    w.write_u8(array.ndim() as u8)?;
    for dim in array.shape() {
        w.write_u64::<LittleEndian>(*dim as u64)?;
    }
    // iteration order is logical order, independent of the view's layout
    for v in array.iter() {
        w.write_f64::<LittleEndian>(*v)?;
    }
    w.flush()?;
    debug!(path = %path.display(), "wrote artifact");
    Ok(())
}

pub fn read_array(path: &Path) -> Result<ArrayD<f64>, Error> {
    let bad = |reason: &str| Error::BadArtifact {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut r = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(bad("bad magic"));
    }
    let version = r.read_u16::<LittleEndian>()?;
    if version != VERSION {
        return Err(bad(&format!("unsupported version {version}")));
    }

    let ndim = r.read_u8()? as usize;
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        shape.push(r.read_u64::<LittleEndian>()? as usize);
    }

    let len: usize = shape.iter().product();
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(r.read_f64::<LittleEndian>()?);
    }

    ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| bad("shape/payload mismatch"))
}

/// Snapshot indices for which a `{root}_{quantity}{index}.dat` artifact is
/// already present, so a resumed streaming run can skip them.
pub fn existing_indices(dir: &Path, root: &str, quantity: &str) -> Result<BTreeSet<usize>, Error> {
    let prefix = format!("{root}_{quantity}");
    let suffix = format!(".{ARTIFACT_EXT}");

    let mut indices = BTreeSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(digits) = rest.strip_suffix(&suffix) else {
            continue;
        };
        if let Ok(index) = digits.parse::<usize>() {
            indices.insert(index);
        }
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn names_are_deterministic() {
        assert_eq!(artifact_name("fluid", "tavg", None), "fluid_tavg.dat");
        assert_eq!(artifact_name("fluid", "snap", Some(12)), "fluid_snap12.dat");
    }

    #[test]
    fn round_trips_shape_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let arr = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f64);

        let path = write(dir.path(), "fluid", "tavg", arr.view().into_dyn()).unwrap();
        let back = read_array(&path).unwrap();
        assert_eq!(back.shape(), &[2, 3, 4]);
        assert_eq!(back.into_dimensionality::<ndarray::Ix3>().unwrap(), arr);
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fluid_tavg.dat");
        std::fs::write(&path, b"not an artifact").unwrap();
        assert!(matches!(
            read_array(&path).unwrap_err(),
            Error::BadArtifact { .. }
        ));
    }

    #[test]
    fn index_scan_sees_only_matching_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for i in [0usize, 1, 2, 7] {
            std::fs::write(dir.path().join(format!("fluid_snap{i}.dat")), b"").unwrap();
        }
        std::fs::write(dir.path().join("fluid_tavg.dat"), b"").unwrap();
        std::fs::write(dir.path().join("body_snap3.dat"), b"").unwrap();

        let indices = existing_indices(dir.path(), "fluid", "snap").unwrap();
        assert_eq!(indices.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 7]);
    }
}

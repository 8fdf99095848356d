//! Second-order finite differences matching the stencils the legacy analysis
//! used for every derivative: central differences in the interior and
//! one-sided three-point stencils at both domain edges.

use ndarray::{Array, ArrayView, ArrayView1, ArrayViewMut1, Axis, Dimension, Zip};

/// Differentiate `f` along `axis` with unit grid spacing.
///
/// Panics if the axis is shorter than 3 points, since the edge stencils need
/// three samples.
pub fn gradient_axis<D: Dimension>(f: ArrayView<'_, f64, D>, axis: Axis) -> Array<f64, D> {
    let n = f.len_of(axis);
    assert!(n >= 3, "gradient needs at least 3 points along the axis, got {n}");

    let mut out = Array::zeros(f.raw_dim());
    Zip::from(out.lanes_mut(axis))
        .and(f.lanes(axis))
        .for_each(|mut o, l| gradient_lane(&l, 1.0, &mut o));
    out
}

/// Differentiate a 1-D sequence with scalar spacing `h`.
///
/// The boundary extractor uses a separate spacing (`stretch`) for the row
/// coordinate to account for anisotropic grid refinement.
pub fn gradient_1d(f: &[f64], h: f64) -> Vec<f64> {
    let n = f.len();
    assert!(n >= 3, "gradient needs at least 3 points, got {n}");

    let mut out = vec![0.0; n];
    out[0] = (-3.0 * f[0] + 4.0 * f[1] - f[2]) / (2.0 * h);
    for i in 1..n - 1 {
        out[i] = (f[i + 1] - f[i - 1]) / (2.0 * h);
    }
    out[n - 1] = (3.0 * f[n - 1] - 4.0 * f[n - 2] + f[n - 3]) / (2.0 * h);
    out
}

fn gradient_lane(f: &ArrayView1<'_, f64>, h: f64, out: &mut ArrayViewMut1<'_, f64>) {
    let n = f.len();
    out[0] = (-3.0 * f[0] + 4.0 * f[1] - f[2]) / (2.0 * h);
    for i in 1..n - 1 {
        out[i] = (f[i + 1] - f[i - 1]) / (2.0 * h);
    }
    out[n - 1] = (3.0 * f[n - 1] - 4.0 * f[n - 2] + f[n - 3]) / (2.0 * h);
}

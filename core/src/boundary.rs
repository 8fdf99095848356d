//! Immersed-body boundary geometry from an iso-contour of a scalar field.
//!
//! The body surface is recovered as the first marching-squares contour of a
//! 2-D scalar slice, fit with an interpolating parametric spline over chordal
//! arc length, resampled uniformly, and differentiated to give unit tangent
//! and normal vectors. Everything is recomputed on each call; nothing is
//! cached.

use std::collections::HashMap;

use ndarray::{ArrayView2, ArrayView3, Axis};
use tracing::{debug, instrument};

use crate::config::SpanAxis;
use crate::error::Error;
use crate::geom::Vec2F;
use crate::gradient::gradient_1d;

/// One iso-level curve in pixel space with its per-point unit frame.
///
/// Points are `(row, col)` like the scalar array; a closed curve repeats its
/// first point at the end. Normals point toward the high side of the level,
/// which for a distance-like body scalar is away from the body.
#[derive(Debug, Clone)]
pub struct BoundaryContour {
    pub points: Vec<Vec2F>,
    pub tangent: Vec<Vec2F>,
    pub normal: Vec<Vec2F>,
}

impl BoundaryContour {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Extracts the boundary from a 3-D scalar, reducing over `span_axis` first.
#[instrument(skip(scalar))]
pub fn extract(
    scalar: ArrayView3<'_, f64>,
    span_axis: SpanAxis,
    level: f64,
    stretch: f64,
) -> Result<BoundaryContour, Error> {
    let plane = scalar
        .mean_axis(Axis(span_axis.index()))
        .expect("span axis is non-empty");
    extract_planar(plane.view(), level, stretch)
}

/// Extracts the boundary from a 2-D scalar slice.
///
/// The first contour in scan order is taken as the body boundary. That is a
/// fixed policy, not a largest-area search: the scalar is assumed to have one
/// dominant iso-level component.
#[instrument(skip(plane))]
pub fn extract_planar(
    plane: ArrayView2<'_, f64>,
    level: f64,
    stretch: f64,
) -> Result<BoundaryContour, Error> {
    let contours = find_contours(plane, level);
    let Some(raw) = contours.into_iter().next() else {
        return Err(Error::NoBoundaryFound { level });
    };
    debug!(points = raw.len(), "selected first contour component");

    let points = dedup_consecutive(raw);
    if points.len() < 4 {
        return Err(Error::DegenerateContour { len: points.len() });
    }

    // chordal arc length parameterizes the spline
    let mut arc = Vec::with_capacity(points.len());
    arc.push(0.0);
    for pair in points.windows(2) {
        let d = pair[1] - pair[0];
        let last = arc[arc.len() - 1];
        arc.push(last + d.norm());
    }

    let rows: Vec<f64> = points.iter().map(|p| p.row).collect();
    let cols: Vec<f64> = points.iter().map(|p| p.col).collect();
    let row_spline = NaturalSpline::fit(&arc, &rows);
    let col_spline = NaturalSpline::fit(&arc, &cols);

    // resample at as many equally spaced parameter values as there were
    // original points
    let n = points.len();
    let total = arc[arc.len() - 1];
    let step = total / (n - 1) as f64;
    let mut r_rows = Vec::with_capacity(n);
    let mut r_cols = Vec::with_capacity(n);
    for i in 0..n {
        let s = step * i as f64;
        r_rows.push(row_spline.eval(s));
        r_cols.push(col_spline.eval(s));
    }

    // the row derivative carries the anisotropic grid spacing
    let d_row = gradient_1d(&r_rows, stretch);
    let d_col = gradient_1d(&r_cols, 1.0);

    let mut tangent = Vec::with_capacity(n);
    let mut normal = Vec::with_capacity(n);
    for (dr, dc) in d_row.iter().zip(&d_col) {
        let mag = dr.hypot(*dc);
        tangent.push(Vec2F::new(dr / mag, dc / mag));
        normal.push(Vec2F::new(dc / mag, -dr / mag));
    }

    let points = r_rows
        .into_iter()
        .zip(r_cols)
        .map(|(row, col)| Vec2F::new(row, col))
        .collect();

    Ok(BoundaryContour {
        points,
        tangent,
        normal,
    })
}

/// Marching squares over the full plane, returning every contour component
/// in scan order of its earliest segment.
///
/// Segments are oriented so the region above `level` lies on a consistent
/// side; adjacent cells therefore chain head to tail, and crossing points on
/// a shared edge are computed bit-identically from the same corner pair.
fn find_contours(plane: ArrayView2<'_, f64>, level: f64) -> Vec<Vec<Vec2F>> {
    let (nrows, ncols) = plane.dim();
    let mut segments: Vec<(Vec2F, Vec2F)> = Vec::new();

    for r in 0..nrows.saturating_sub(1) {
        for c in 0..ncols.saturating_sub(1) {
            let ul = plane[[r, c]];
            let ur = plane[[r, c + 1]];
            let ll = plane[[r + 1, c]];
            let lr = plane[[r + 1, c + 1]];

            let mut case = 0u8;
            if ul > level {
                case |= 1;
            }
            if ur > level {
                case |= 2;
            }
            if ll > level {
                case |= 4;
            }
            if lr > level {
                case |= 8;
            }
            if case == 0 || case == 15 {
                continue;
            }

            let rf = r as f64;
            let cf = c as f64;
            let top = Vec2F::new(rf, cf + fraction(ul, ur, level));
            let bottom = Vec2F::new(rf + 1.0, cf + fraction(ll, lr, level));
            let left = Vec2F::new(rf + fraction(ul, ll, level), cf);
            let right = Vec2F::new(rf + fraction(ur, lr, level), cf + 1.0);

            match case {
                1 => segments.push((top, left)),
                2 => segments.push((right, top)),
                3 => segments.push((right, left)),
                4 => segments.push((left, bottom)),
                5 => segments.push((top, bottom)),
                6 => {
                    segments.push((right, top));
                    segments.push((left, bottom));
                }
                7 => segments.push((right, bottom)),
                8 => segments.push((bottom, right)),
                9 => {
                    segments.push((top, left));
                    segments.push((bottom, right));
                }
                10 => segments.push((bottom, top)),
                11 => segments.push((bottom, left)),
                12 => segments.push((left, right)),
                13 => segments.push((top, right)),
                14 => segments.push((left, top)),
                _ => unreachable!(),
            }
        }
    }

    assemble(segments)
}

/// Chains directed segments into polylines. Crossing points on shared edges
/// are bit-identical across cells, so plain bit keys suffice for matching.
fn assemble(segments: Vec<(Vec2F, Vec2F)>) -> Vec<Vec<Vec2F>> {
    let key = |p: Vec2F| (p.row.to_bits(), p.col.to_bits());

    let mut by_start: HashMap<(u64, u64), Vec<usize>> = HashMap::new();
    let mut by_end: HashMap<(u64, u64), Vec<usize>> = HashMap::new();
    for (i, (start, end)) in segments.iter().enumerate() {
        by_start.entry(key(*start)).or_default().push(i);
        by_end.entry(key(*end)).or_default().push(i);
    }

    let take = |map: &mut HashMap<(u64, u64), Vec<usize>>, k: (u64, u64), used: &[bool]| {
        let slots = map.get_mut(&k)?;
        let pos = slots.iter().position(|i| !used[*i])?;
        Some(slots.swap_remove(pos))
    };

    let mut used = vec![false; segments.len()];
    let mut contours = Vec::new();

    for seed in 0..segments.len() {
        if used[seed] {
            continue;
        }
        used[seed] = true;
        let (start, end) = segments[seed];
        let mut chain = vec![start, end];

        // walk forward from the tail
        while let Some(next) = take(&mut by_start, key(chain[chain.len() - 1]), &used) {
            used[next] = true;
            chain.push(segments[next].1);
            if key(chain[chain.len() - 1]) == key(chain[0]) {
                break;
            }
        }
        // an open chain may continue backward from the seed
        if key(chain[chain.len() - 1]) != key(chain[0]) {
            while let Some(prev) = take(&mut by_end, key(chain[0]), &used) {
                used[prev] = true;
                chain.insert(0, segments[prev].0);
            }
        }

        contours.push(chain);
    }
    contours
}

fn fraction(from: f64, to: f64, level: f64) -> f64 {
    if to == from {
        return 0.0;
    }
    (level - from) / (to - from)
}

fn dedup_consecutive(points: Vec<Vec2F>) -> Vec<Vec2F> {
    let mut out: Vec<Vec2F> = Vec::with_capacity(points.len());
    for p in points {
        if out.last() != Some(&p) {
            out.push(p);
        }
    }
    out
}

/// Natural interpolating cubic spline over strictly increasing knots.
struct NaturalSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    second: Vec<f64>,
}

impl NaturalSpline {
    fn fit(knots: &[f64], values: &[f64]) -> Self {
        let n = knots.len();
        let mut second = vec![0.0; n];
        let mut tmp = vec![0.0; n];

        // tridiagonal sweep; natural end conditions leave second[0] and
        // second[n-1] at zero
        for i in 1..n - 1 {
            let sig = (knots[i] - knots[i - 1]) / (knots[i + 1] - knots[i - 1]);
            let p = sig * second[i - 1] + 2.0;
            second[i] = (sig - 1.0) / p;
            let rhs = (values[i + 1] - values[i]) / (knots[i + 1] - knots[i])
                - (values[i] - values[i - 1]) / (knots[i] - knots[i - 1]);
            tmp[i] = (6.0 * rhs / (knots[i + 1] - knots[i - 1]) - sig * tmp[i - 1]) / p;
        }
        for i in (0..n - 1).rev() {
            second[i] = second[i] * second[i + 1] + tmp[i];
        }

        Self {
            knots: knots.to_vec(),
            values: values.to_vec(),
            second,
        }
    }

    fn eval(&self, s: f64) -> f64 {
        let n = self.knots.len();
        let s = s.clamp(self.knots[0], self.knots[n - 1]);

        let hi = match self
            .knots
            .binary_search_by(|k| k.partial_cmp(&s).unwrap_or(std::cmp::Ordering::Less))
        {
            Ok(i) => i.max(1),
            Err(i) => i.clamp(1, n - 1),
        };
        let lo = hi - 1;

        let h = self.knots[hi] - self.knots[lo];
        let a = (self.knots[hi] - s) / h;
        let b = (s - self.knots[lo]) / h;
        a * self.values[lo]
            + b * self.values[hi]
            + ((a * a * a - a) * self.second[lo] + (b * b * b - b) * self.second[hi]) * h * h / 6.0
    }
}

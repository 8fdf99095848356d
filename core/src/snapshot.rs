//! Canonical in-memory layout for solver snapshots.
//!
//! A snapshot travels through the pipeline as a single 4-D tensor whose
//! leading axis is the component axis. Field identity is determined solely by
//! position on that axis, never by metadata: `[X, Y, Z, U, V, W, p]` for the
//! 3-D layout, `[X, Y, U, V, p]` for the 2-D layout. That positional contract
//! is what makes time/phase reductions a plain mean over stacked tensors.

use ndarray::{Array2, Array3, Array4, Array5, ArrayView3, ArrayView4, Axis};

use crate::config::SpanAxis;
use crate::error::Error;
use crate::gradient::gradient_axis;

pub const COMPONENTS_3D: usize = 7;
pub const COMPONENTS_2D: usize = 5;

/// One time instant's full field data, in canonical component order.
///
/// Immutable after construction; every consumer takes it by reference or by
/// value, never mutates it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    data: Array4<f64>,
}

impl RawSnapshot {
    /// Wraps a `(C, nx, ny, nz)` tensor. `C` must be 5 or 7.
    pub fn new(data: Array4<f64>) -> Self {
        let c = data.len_of(Axis(0));
        assert!(
            c == COMPONENTS_2D || c == COMPONENTS_3D,
            "snapshot must have 5 or 7 components, got {c}"
        );
        Self { data }
    }

    pub fn components(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// `true` for the 2-D layout lacking Z and W.
    pub fn is_planar(&self) -> bool {
        self.components() == COMPONENTS_2D
    }

    pub fn spatial_shape(&self) -> (usize, usize, usize) {
        let s = self.data.shape();
        (s[1], s[2], s[3])
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn data(&self) -> ArrayView4<'_, f64> {
        self.data.view()
    }

    pub fn field(&self, idx: usize) -> ArrayView3<'_, f64> {
        self.data.index_axis(Axis(0), idx)
    }

    /// Component slots holding velocity: `3..6` for the 3-D layout, `2..4`
    /// for the 2-D one.
    pub fn velocity_slots(&self) -> std::ops::Range<usize> {
        if self.is_planar() {
            2..4
        } else {
            3..6
        }
    }

    pub fn into_inner(self) -> Array4<f64> {
        self.data
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }
}

/// T snapshots of identical shape concatenated along a new leading time axis.
#[derive(Debug, Clone)]
pub struct StackedSequence {
    data: Array5<f64>,
}

impl StackedSequence {
    /// Stacks `snaps` along a new leading axis, failing on the first member
    /// whose shape differs from the first one.
    pub fn from_snapshots(snaps: &[RawSnapshot]) -> Result<Self, Error> {
        let first = snaps
            .first()
            .expect("StackedSequence needs at least one snapshot");
        let expected = first.shape().to_vec();
        for (index, snap) in snaps.iter().enumerate() {
            if snap.shape() != expected.as_slice() {
                return Err(Error::ShapeMismatch {
                    index,
                    expected,
                    got: snap.shape().to_vec(),
                });
            }
        }

        let (c, nx, ny, nz) = (expected[0], expected[1], expected[2], expected[3]);
        let mut data = Array5::zeros((snaps.len(), c, nx, ny, nz));
        for (t, snap) in snaps.iter().enumerate() {
            data.index_axis_mut(Axis(0), t).assign(&snap.data());
        }
        Ok(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self, t: usize) -> ArrayView4<'_, f64> {
        self.data.index_axis(Axis(0), t)
    }

    /// Arithmetic mean over the time axis; `T = 1` returns the single member
    /// unchanged.
    pub fn time_mean(&self) -> RawSnapshot {
        let mean = self
            .data
            .mean_axis(Axis(0))
            .expect("stack has at least one snapshot");
        RawSnapshot::new(mean)
    }

    /// The scalar (last component) of every member, `(T, nx, ny, nz)`.
    pub fn scalars(&self) -> Array4<f64> {
        let last = self.data.len_of(Axis(1)) - 1;
        self.data.index_axis(Axis(1), last).to_owned()
    }

    pub fn components(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    /// See [`RawSnapshot::velocity_slots`].
    pub fn velocity_slots(&self) -> std::ops::Range<usize> {
        if self.components() == COMPONENTS_2D {
            2..4
        } else {
            3..6
        }
    }
}

/// Named, unit-consistent view of one snapshot.
///
/// `z` and `w` are absent for the 2-D layout. Derived quantities are pure
/// functions of the bound fields, recomputed on every access.
#[derive(Debug, Clone)]
pub struct CanonicalSnapshot {
    pub x: Array3<f64>,
    pub y: Array3<f64>,
    pub z: Option<Array3<f64>>,
    pub u: Array3<f64>,
    pub v: Array3<f64>,
    pub w: Option<Array3<f64>>,
    pub p: Array3<f64>,
}

impl CanonicalSnapshot {
    pub fn from_raw(raw: &RawSnapshot) -> Self {
        let own = |i: usize| raw.field(i).to_owned();
        let last = raw.components() - 1;
        if raw.is_planar() {
            Self {
                x: own(0),
                y: own(1),
                z: None,
                u: own(2),
                v: own(3),
                w: None,
                p: own(last),
            }
        } else {
            Self {
                x: own(0),
                y: own(1),
                z: Some(own(2)),
                u: own(3),
                v: own(4),
                w: Some(own(5)),
                p: own(last),
            }
        }
    }

    /// Velocity magnitude, `sqrt(U² + V² + W²)`; two-component for the 2-D
    /// layout.
    pub fn magnitude(&self) -> Array3<f64> {
        let mut sq = &self.u * &self.u + &self.v * &self.v;
        if let Some(w) = &self.w {
            sq = sq + w * w;
        }
        sq.mapv(f64::sqrt)
    }

    /// `∂V/∂x − ∂U/∂y` over the in-plane axes.
    ///
    /// Unlike the spanwise components there is no layout under which this one
    /// is undefined, so a plane shorter than the 3-point stencil panics
    /// instead of returning `None`.
    pub fn vorticity_z(&self) -> Array3<f64> {
        gradient_axis(self.v.view(), Axis(0)) - gradient_axis(self.u.view(), Axis(1))
    }

    /// `∂V/∂z − ∂W/∂y`; `None` when W is absent or the span axis is too
    /// short to differentiate.
    pub fn vorticity_x(&self) -> Option<Array3<f64>> {
        let w = self.w.as_ref()?;
        if self.v.len_of(Axis(2)) < 3 {
            return None;
        }
        Some(gradient_axis(self.v.view(), Axis(2)) - gradient_axis(w.view(), Axis(1)))
    }

    /// `∂U/∂z − ∂W/∂x`; `None` when W is absent or the span axis is too
    /// short to differentiate.
    pub fn vorticity_y(&self) -> Option<Array3<f64>> {
        let w = self.w.as_ref()?;
        if self.u.len_of(Axis(2)) < 3 {
            return None;
        }
        Some(gradient_axis(self.u.view(), Axis(2)) - gradient_axis(w.view(), Axis(0)))
    }
}

/// Span-averaged view of a snapshot for a nominally two-dimensional analysis.
///
/// Coordinates and in-plane velocity are reduced by mean along the configured
/// span axis. The scalar keeps its own historical reduction: mean along the
/// leading (time) axis of a stacked input, untouched otherwise. The asymmetry
/// is a deliberate legacy behavior, kept behind explicit configuration.
#[derive(Debug, Clone)]
pub struct PlanarSnapshot {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
    pub u: Array2<f64>,
    pub v: Array2<f64>,
    pub p: Array3<f64>,
}

impl PlanarSnapshot {
    pub fn from_raw(raw: &RawSnapshot, span_axis: SpanAxis) -> Self {
        let canon = CanonicalSnapshot::from_raw(raw);
        let reduce = |f: &Array3<f64>| {
            f.mean_axis(Axis(span_axis.index()))
                .expect("span axis is non-empty")
        };
        Self {
            x: reduce(&canon.x),
            y: reduce(&canon.y),
            u: reduce(&canon.u),
            v: reduce(&canon.v),
            p: canon.p,
        }
    }

    /// Span-averages the time mean of `stacked`; the scalar is averaged over
    /// the stack's leading time axis instead.
    pub fn from_stacked(stacked: &StackedSequence, span_axis: SpanAxis) -> Self {
        let mean_t = stacked.time_mean();
        let mut planar = Self::from_raw(&mean_t, span_axis);
        planar.p = stacked
            .scalars()
            .mean_axis(Axis(0))
            .expect("stack has at least one snapshot");
        planar
    }

    pub fn magnitude(&self) -> Array2<f64> {
        (&self.u * &self.u + &self.v * &self.v).mapv(f64::sqrt)
    }

    pub fn vorticity_z(&self) -> Array2<f64> {
        gradient_axis(self.v.view(), Axis(0)) - gradient_axis(self.u.view(), Axis(1))
    }
}

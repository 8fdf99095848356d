//! Statistical reductions over a snapshot sequence: time average, phase
//! average, fluctuation statistics, and the streaming low-memory fallback.
//!
//! All reductions preallocate from the sequence's shape probe and check the
//! estimate against the configured memory budget before touching the bulk of
//! the files. Exhaustion of the budget triggers exactly one degradation to
//! streaming mode; a single snapshot over budget is terminal.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, Array3, Array5, Axis};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::artifact;
use crate::config::SpanAxis;
use crate::error::Error;
use crate::sequence::SnapshotSequence;
use crate::snapshot::{RawSnapshot, StackedSequence};

/// Outcome of a budget-aware time average.
pub enum TimeAverage {
    /// The whole sequence fit in memory; the time mean, shape `(C, nx, ny, nz)`.
    Full(Box<RawSnapshot>),
    /// Degraded to streaming mode; per-index artifacts were written for the
    /// listed indices (already-present indices are skipped).
    Streamed { written: Vec<usize> },
}

/// Quantity tag used for per-index artifacts of a streaming run.
pub const STREAM_QUANTITY: &str = "snap";

/// In-memory time average: stack all members, mean over the leading axis.
///
/// Fails with `ResourceExhaustion` when the stacked sequence would not fit
/// the budget; callers wanting automatic degradation use
/// [`time_average_auto`].
#[instrument(skip(seq))]
pub fn time_average(seq: &SnapshotSequence) -> Result<RawSnapshot, Error> {
    let snap_bytes = seq.snapshot_bytes()?;
    require_budget(seq, snap_bytes.saturating_mul(seq.len() + 1), "stacked sequence")?;
    Ok(seq.stack()?.time_mean())
}

/// Time average with the one permitted degradation to streaming mode.
#[instrument(skip(seq, out_dir))]
pub fn time_average_auto(seq: &SnapshotSequence, out_dir: &Path) -> Result<TimeAverage, Error> {
    match time_average(seq) {
        Ok(mean) => Ok(TimeAverage::Full(Box::new(mean))),
        Err(Error::ResourceExhaustion { required, budget, .. }) => {
            warn!(required, budget, "sequence too large to stack, degrading to streaming mode");
            let written = stream_snapshots(seq, out_dir)?;
            Ok(TimeAverage::Streamed { written })
        }
        Err(e) => Err(e),
    }
}

/// Streaming low-memory path: one file at a time, one artifact per index,
/// resumable by scanning which indices already exist.
#[instrument(skip(seq, out_dir))]
pub fn stream_snapshots(seq: &SnapshotSequence, out_dir: &Path) -> Result<Vec<usize>, Error> {
    let snap_bytes = seq.snapshot_bytes()?;
    // a single snapshot over budget is terminal, not retried
    require_budget(seq, snap_bytes, "single snapshot")?;

    let root = &seq.config().field_root;
    let existing = artifact::existing_indices(out_dir, root, STREAM_QUANTITY)?;
    if !existing.is_empty() {
        info!(count = existing.len(), "resuming, skipping already-written indices");
    }

    let mut written = Vec::new();
    for index in 0..seq.len() {
        if existing.contains(&index) {
            continue;
        }
        let snap = match seq.read(index) {
            Ok(snap) => snap,
            Err(Error::CorruptSnapshot { path, source }) if seq.config().tolerant => {
                warn!(path = %path.display(), error = %source, "skipping corrupt snapshot");
                continue;
            }
            Err(e) => return Err(e),
        };
        artifact::write_indexed(out_dir, root, STREAM_QUANTITY, index, snap.data().into_dyn())?;
        written.push(index);
    }
    Ok(written)
}

/// Phase average over `periods` cycles.
///
/// With `T` snapshots the sequence folds into `n = T / periods` bins:
/// snapshot `i` accumulates into bin `i % n`, and every bin is divided by
/// `periods` at the end. Trailing `T − periods·n` snapshots are dropped from
/// accumulation; the count is logged, not an error. Output shape
/// `(n, C, nx, ny, nz)`.
#[instrument(skip(seq))]
pub fn phase_average(seq: &SnapshotSequence, periods: usize) -> Result<Array5<f64>, Error> {
    let setup = PhaseSetup::new(seq, periods)?;
    let mut bins = setup.alloc_bins(seq)?;

    for index in 0..setup.used {
        let Some(snap) = read_tolerant(seq, index)? else {
            continue;
        };
        let mut bin = bins.index_axis_mut(Axis(0), index % setup.bins);
        bin += &snap.data();
    }

    bins /= periods as f64;
    Ok(bins)
}

/// Phase average with file reads spread over a fixed-size worker pool.
///
/// Workers accumulate into private partial sums that are merged into the
/// shared bins under a lock afterwards, so no two workers ever race on a
/// read-modify-write of the same bin element.
#[instrument(skip(seq))]
pub fn phase_average_parallel(seq: &SnapshotSequence, periods: usize) -> Result<Array5<f64>, Error> {
    let setup = PhaseSetup::new(seq, periods)?;
    let workers = worker_count();

    // each worker carries a private copy of the bins; fall back to the
    // serial path when those copies would blow the budget
    let bins_bytes = setup
        .bin_elems(seq)?
        .saturating_mul(std::mem::size_of::<f64>());
    let required = bins_bytes.saturating_mul(workers + 1);
    if workers == 1 || required > seq.config().memory_budget {
        debug!(workers, required, "using serial phase accumulation");
        return phase_average(seq, periods);
    }

    let bins = Mutex::new(setup.alloc_bins(seq)?);
    let next = AtomicUsize::new(0);
    let failure: Mutex<Option<Error>> = Mutex::new(None);

    crossbeam::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| {
                let mut partial = match setup.alloc_bins(seq) {
                    Ok(partial) => partial,
                    Err(e) => {
                        failure.lock().get_or_insert(e);
                        return;
                    }
                };
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index >= setup.used || failure.lock().is_some() {
                        break;
                    }
                    match read_tolerant(seq, index) {
                        Ok(Some(snap)) => {
                            let mut bin = partial.index_axis_mut(Axis(0), index % setup.bins);
                            bin += &snap.data();
                        }
                        Ok(None) => {}
                        Err(e) => {
                            failure.lock().get_or_insert(e);
                            break;
                        }
                    }
                }
                let mut shared = bins.lock();
                *shared += &partial;
            });
        }
    })
    .expect("phase accumulation worker panicked");

    if let Some(e) = failure.into_inner() {
        return Err(e);
    }

    let mut bins = bins.into_inner();
    bins /= periods as f64;
    Ok(bins)
}

/// Span-averaged root-mean of velocity fluctuation magnitude about the time
/// mean.
#[instrument(skip(seq))]
pub fn rms(seq: &SnapshotSequence, span_axis: SpanAxis) -> Result<Array2<f64>, Error> {
    let stack = budgeted_stack(seq)?;
    let mean = stack.time_mean();
    let slots = stack.velocity_slots();

    let mut accum: Option<Array3<f64>> = None;
    for t in 0..stack.len() {
        let snap = stack.snapshot(t);
        let mut sq: Option<Array3<f64>> = None;
        for c in slots.clone() {
            let fluc = &snap.index_axis(Axis(0), c) - &mean.field(c);
            let term = &fluc * &fluc;
            sq = Some(match sq {
                Some(s) => s + term,
                None => term,
            });
        }
        let mag = sq.expect("velocity has at least two components").mapv(f64::sqrt);
        accum = Some(match accum {
            Some(a) => a + mag,
            None => mag,
        });
    }

    let field = accum.expect("sequence is non-empty") / stack.len() as f64;
    Ok(span_mean(&field, span_axis))
}

/// Span-averaged mean deviation of instantaneous speed from the mean-field
/// speed.
#[instrument(skip(seq))]
pub fn rms_mag(seq: &SnapshotSequence, span_axis: SpanAxis) -> Result<Array2<f64>, Error> {
    let stack = budgeted_stack(seq)?;
    let mean = stack.time_mean();
    let slots = stack.velocity_slots();

    let speed_of = |get: &dyn Fn(usize) -> Array3<f64>| {
        let mut sq: Option<Array3<f64>> = None;
        for c in slots.clone() {
            let comp = get(c);
            let term = &comp * &comp;
            sq = Some(match sq {
                Some(s) => s + term,
                None => term,
            });
        }
        sq.expect("velocity has at least two components").mapv(f64::sqrt)
    };

    let mean_speed = speed_of(&|c| mean.field(c).to_owned());

    let mut accum: Option<Array3<f64>> = None;
    for t in 0..stack.len() {
        let snap = stack.snapshot(t);
        let speed = speed_of(&|c| snap.index_axis(Axis(0), c).to_owned());
        let fluc = speed - &mean_speed;
        accum = Some(match accum {
            Some(a) => a + fluc,
            None => fluc,
        });
    }

    let field = accum.expect("sequence is non-empty") / stack.len() as f64;
    Ok(span_mean(&field, span_axis))
}

struct PhaseSetup {
    bins: usize,
    used: usize,
}

impl PhaseSetup {
    fn new(seq: &SnapshotSequence, periods: usize) -> Result<Self, Error> {
        let total = seq.len();
        let bins = if periods == 0 { 0 } else { total / periods };
        if bins == 0 {
            return Err(Error::TooFewSnapshots {
                snaps: total,
                periods,
            });
        }

        let used = periods * bins;
        let dropped = total - used;
        if dropped > 0 {
            warn!(
                dropped,
                total, periods, "sequence not divisible by period count, dropping trailing snapshots"
            );
        }
        Ok(Self { bins, used })
    }

    fn bin_elems(&self, seq: &SnapshotSequence) -> Result<usize, Error> {
        let per_snap: usize = seq.shape_probe()?.iter().product();
        Ok(per_snap * self.bins)
    }

    fn alloc_bins(&self, seq: &SnapshotSequence) -> Result<Array5<f64>, Error> {
        let shape = seq.shape_probe()?;
        let (c, nx, ny, nz) = (shape[0], shape[1], shape[2], shape[3]);
        require_budget(
            seq,
            self.bin_elems(seq)? * std::mem::size_of::<f64>(),
            "phase-average bins",
        )?;
        Ok(Array5::zeros((self.bins, c, nx, ny, nz)))
    }
}

fn read_tolerant(seq: &SnapshotSequence, index: usize) -> Result<Option<RawSnapshot>, Error> {
    match seq.read(index) {
        Ok(snap) => Ok(Some(snap)),
        Err(Error::CorruptSnapshot { path, source }) if seq.config().tolerant => {
            warn!(path = %path.display(), error = %source, "skipping corrupt snapshot");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn budgeted_stack(seq: &SnapshotSequence) -> Result<StackedSequence, Error> {
    let snap_bytes = seq.snapshot_bytes()?;
    require_budget(seq, snap_bytes.saturating_mul(seq.len() + 1), "stacked sequence")?;
    seq.stack()
}

fn require_budget(seq: &SnapshotSequence, required: usize, what: &str) -> Result<(), Error> {
    let budget = seq.config().memory_budget;
    if required > budget {
        return Err(Error::ResourceExhaustion {
            what: what.to_string(),
            required,
            budget,
        });
    }
    Ok(())
}

fn span_mean(field: &Array3<f64>, span_axis: SpanAxis) -> Array2<f64> {
    field
        .mean_axis(Axis(span_axis.index()))
        .expect("span axis is non-empty")
}

/// Pool size: available processors with headroom for the rest of the system.
fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_sub(2)
        .max(1)
}

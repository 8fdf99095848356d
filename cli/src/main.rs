use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lotus_toolbox_core::reduce::{self, TimeAverage};
use lotus_toolbox_core::sequence::SnapshotSequence;
use lotus_toolbox_core::snapshot::PlanarSnapshot;
use lotus_toolbox_core::{artifact, boundary, FlowConfig, SpanAxis};

use ndarray::Array2;

#[derive(Parser)]
#[command(author, version, about = "Post-processing for structured-grid flow snapshots", long_about = None)]
struct Cli {
    /// Directory holding the snapshot files
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    /// Root name shared by the snapshot files of one field
    #[arg(short = 'r', long, default_value = "fluid")]
    field_root: String,

    /// Coordinate normalization divisor (grid points per characteristic length)
    #[arg(short, long, default_value_t = 1.0)]
    length_scale: f64,

    /// Grid family extension; files end with `.p{ext}`
    #[arg(short, long, default_value = "vti")]
    ext: String,

    /// Skip corrupt snapshots with a warning instead of aborting
    #[arg(long)]
    tolerant: bool,

    /// Bytes the in-memory reductions may use before degrading to streaming
    #[arg(long)]
    memory_budget: Option<usize>,

    /// Axis treated as statistically homogeneous by spanwise averaging
    #[arg(long, value_enum, default_value_t = SpanAxisArg::Trailing)]
    span_axis: SpanAxisArg,

    /// Output directory for artifacts (defaults to DIR)
    #[arg(short, long)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mean over the whole time sequence
    TimeAverage {
        /// Also write the span-averaged mean velocity magnitude
        #[arg(long)]
        span_average: bool,
    },
    /// Fold the sequence into one representative cycle of phase bins
    PhaseAverage {
        /// Cycles spanned by the whole sequence
        #[arg(short, long)]
        periods: usize,

        /// Spread file reads over a worker pool
        #[arg(long)]
        parallel: bool,
    },
    /// Span-averaged velocity fluctuation statistics
    Rms {
        /// Fluctuation of the speed rather than the fluctuation magnitude
        #[arg(long)]
        mag: bool,
    },
    /// Body boundary contour with unit tangent/normal frames
    Boundary {
        /// Iso-level of the body scalar
        #[arg(long, default_value_t = 1.0)]
        level: f64,

        /// Grid refinement ratio in the y-direction
        #[arg(long, default_value_t = 4.0)]
        stretch: f64,

        /// Snapshot index to extract from
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SpanAxisArg {
    Leading,
    Trailing,
}

impl From<SpanAxisArg> for SpanAxis {
    fn from(arg: SpanAxisArg) -> Self {
        match arg {
            SpanAxisArg::Leading => SpanAxis::Leading,
            SpanAxisArg::Trailing => SpanAxis::Trailing,
        }
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = FlowConfig::new(cli.field_root.clone(), cli.length_scale);
    config.file_extension = cli.ext.clone();
    config.tolerant = cli.tolerant;
    config.span_axis = cli.span_axis.into();
    if let Some(budget) = cli.memory_budget {
        config.memory_budget = budget;
    }

    let out = cli.out.clone().unwrap_or_else(|| cli.dir.clone());
    std::fs::create_dir_all(&out)?;

    let seq = SnapshotSequence::discover(&cli.dir, &config)?;
    info!(snapshots = seq.len(), "discovered sequence");

    match cli.command {
        Command::TimeAverage { span_average } => {
            match reduce::time_average_auto(&seq, &out)? {
                TimeAverage::Full(mean) => {
                    let path =
                        artifact::write(&out, &config.field_root, "tavg", mean.data().into_dyn())?;
                    info!(path = %path.display(), "wrote time average");

                    if span_average {
                        let planar = PlanarSnapshot::from_raw(&mean, config.span_axis);
                        let mag = planar.magnitude();
                        let path = artifact::write(
                            &out,
                            &config.field_root,
                            "spav",
                            mag.view().into_dyn(),
                        )?;
                        info!(path = %path.display(), "wrote span-averaged magnitude");
                    }
                }
                TimeAverage::Streamed { written } => {
                    info!(
                        count = written.len(),
                        "sequence exceeded the memory budget; wrote per-index artifacts instead"
                    );
                }
            }
        }
        Command::PhaseAverage { periods, parallel } => {
            let bins = if parallel {
                reduce::phase_average_parallel(&seq, periods)?
            } else {
                reduce::phase_average(&seq, periods)?
            };
            let path = artifact::write(&out, &config.field_root, "phav", bins.view().into_dyn())?;
            info!(bins = bins.shape()[0], path = %path.display(), "wrote phase average");
        }
        Command::Rms { mag } => {
            let (quantity, field) = if mag {
                ("rmsmag", reduce::rms_mag(&seq, config.span_axis)?)
            } else {
                ("rms", reduce::rms(&seq, config.span_axis)?)
            };
            let path = artifact::write(&out, &config.field_root, quantity, field.view().into_dyn())?;
            info!(path = %path.display(), "wrote fluctuation statistics");
        }
        Command::Boundary {
            level,
            stretch,
            index,
        } => {
            let snap = seq.read(index)?;
            let scalar = snap.field(snap.components() - 1);
            let contour = boundary::extract(scalar, config.span_axis, level, stretch)?;
            info!(points = contour.len(), "extracted boundary contour");

            for (quantity, vectors) in [
                ("boundary", &contour.points),
                ("tangent", &contour.tangent),
                ("normal", &contour.normal),
            ] {
                let array = vectors_to_array(vectors);
                let path =
                    artifact::write(&out, &config.field_root, quantity, array.view().into_dyn())?;
                info!(path = %path.display(), "wrote {quantity}");
            }
        }
    }

    Ok(())
}

/// `(N, 2)` row/col array from a vector sequence, ready for an artifact dump.
fn vectors_to_array(vectors: &[lotus_toolbox_core::geom::Vec2F]) -> Array2<f64> {
    let mut array = Array2::zeros((vectors.len(), 2));
    for (i, v) in vectors.iter().enumerate() {
        array[[i, 0]] = v.row;
        array[[i, 1]] = v.col;
    }
    array
}

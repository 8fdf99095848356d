// TODO: Re-enable and fix
// #![warn(clippy::pedantic)]

#![warn(clippy::complexity)]
#![warn(clippy::correctness)]
#![warn(clippy::perf)]
#![warn(clippy::style)]
#![warn(clippy::suspicious)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]

pub mod artifact;
pub mod boundary;
pub mod config;
pub mod error;
pub mod formats;
pub mod gradient;
pub mod reduce;
pub mod sequence;
pub mod snapshot;

pub mod geom;

pub use config::{FlowConfig, SpanAxis};
pub use error::Error;

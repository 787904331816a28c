#![cfg_attr(docsrs, feature(doc_cfg))]
//! # frontier-wave
//!
//! frontier-wave moves breadth-first-search frontiers between the processes of a
//! 2-D partitioned graph. Processes form a `p x p` grid; every iteration the
//! partial frontiers of a grid row are unified (a sequential OR pipeline, the
//! "wave", or a row all-reduce) and the union is disseminated (a row broadcast
//! from the last column, then a column broadcast from the diagonal process).
//! Frontiers travel either as raw bitmaps or compressed with a pluggable
//! [`BitmapCodec`](codec::BitmapCodec).
//!
//! ## Features
//! - Pluggable communication backends: serial ([`NoComm`](algs::communicator::NoComm)),
//!   threads in one process ([`LocalComm`](algs::communicator::LocalComm)) and MPI
//!   (`MpiComm`, feature `mpi-support`)
//! - Word-aligned hybrid bitmap codec ([`WahCodec`](codec::WahCodec)) with a fixed
//!   worst-case payload capacity
//! - Caller-owned instrumentation ([`WaveStats`](stats::WaveStats),
//!   [`LogSink`](stats::LogSink)) instead of hidden timing state
//! - Optional Rayon-parallel frontier OR (feature `rayon`)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! frontier-wave = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! Every fallible call returns [`WaveError`](wave_error::WaveError). The
//! protocol runs in lock-step, so an error on one rank must end the job
//! (see [`Wave::abort`](wave::Wave::abort)).

pub mod algs;
pub mod codec;
pub mod config;
pub mod frontier;
pub mod grid;
pub mod stats;
pub mod wave;
pub mod wave_error;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, LocalComm, NoComm};
    pub use crate::algs::reduce::Staging;
    pub use crate::codec::{BitmapCodec, WahCodec};
    pub use crate::config::{UnifyStrategy, WaveConfig};
    pub use crate::frontier::{CompressedPayload, FrontierBuffer};
    pub use crate::grid::{GridPosition, ProcessGrid};
    pub use crate::stats::{InstrumentationSink, LogSink, Phase, PhaseTotals, RatioKind, WaveStats};
    pub use crate::wave::Wave;
    pub use crate::wave_error::WaveError;
}

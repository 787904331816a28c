//! Sequential OR-pipeline ("wave") along a grid row.
//!
//! Column 0 starts the wave by sending its frontier to column 1; every middle
//! column receives the running union, ORs it into its own `out` and forwards
//! the result; the last column keeps the full row union. All hops are tagged
//! with the row index so the `p` row pipelines sharing the world communicator
//! never cross.
//!
//! The position dispatch lives in [`run_pipeline`]; what a hop puts on the wire
//! is a [`Hop`] strategy: [`PlainHop`] ships raw bitmaps, [`CompressedHop`]
//! compresses before every send and decompresses after every receive.

use std::time::{Duration, Instant};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::ring::RingPosition;
use crate::algs::wire::expect_exact_len;
use crate::codec::BitmapCodec;
use crate::frontier::{CompressedPayload, FrontierBuffer};
use crate::grid::ProcessGrid;
use crate::stats::{InstrumentationSink, Phase, RatioKind};
use crate::wave_error::WaveError;

const PIPELINE_TAG: CommTag = CommTag::new(0);

/// Tag of the pipeline running along `row`.
pub fn pipeline_tag(row: usize) -> CommTag {
    PIPELINE_TAG.offset(row as u16)
}

/// What travels over one pipeline hop.
pub trait Hop {
    /// Receive the running union from `peer` and OR it into `out`.
    fn absorb<C: Communicator>(
        &mut self,
        comm: &C,
        peer: usize,
        tag: CommTag,
        out: &mut FrontierBuffer,
    ) -> Result<(), WaveError>;

    /// Send `out` on to `peer`.
    fn forward<C: Communicator>(
        &mut self,
        comm: &C,
        peer: usize,
        tag: CommTag,
        out: &FrontierBuffer,
    ) -> Result<(), WaveError>;
}

/// Raw bitmap hops; `prefix` receives the incoming union.
pub struct PlainHop<'a> {
    pub prefix: &'a mut FrontierBuffer,
}

impl Hop for PlainHop<'_> {
    fn absorb<C: Communicator>(
        &mut self,
        comm: &C,
        peer: usize,
        tag: CommTag,
        out: &mut FrontierBuffer,
    ) -> Result<(), WaveError> {
        let got = comm.recv_into(peer, tag, self.prefix.as_bytes_mut())?;
        expect_exact_len(peer, got, self.prefix.byte_len())?;
        self.prefix.clear_padding();
        out.union_with(self.prefix)
    }

    fn forward<C: Communicator>(
        &mut self,
        comm: &C,
        peer: usize,
        tag: CommTag,
        out: &FrontierBuffer,
    ) -> Result<(), WaveError> {
        comm.send(peer, tag, out.as_bytes())
    }
}

/// Compressed hops. Codec time is accumulated apart from communication time.
pub struct CompressedHop<'a, K> {
    pub codec: &'a K,
    pub payload: &'a mut CompressedPayload,
    pub scratch: &'a mut FrontierBuffer,
    pub compress_time: Duration,
    pub decompress_time: Duration,
    pub last_ratio: Option<f64>,
}

impl<'a, K: BitmapCodec> CompressedHop<'a, K> {
    pub fn new(codec: &'a K, payload: &'a mut CompressedPayload, scratch: &'a mut FrontierBuffer) -> Self {
        Self {
            codec,
            payload,
            scratch,
            compress_time: Duration::ZERO,
            decompress_time: Duration::ZERO,
            last_ratio: None,
        }
    }
}

impl<K: BitmapCodec> Hop for CompressedHop<'_, K> {
    fn absorb<C: Communicator>(
        &mut self,
        comm: &C,
        peer: usize,
        tag: CommTag,
        out: &mut FrontierBuffer,
    ) -> Result<(), WaveError> {
        // The message length is the compressed size; no separate size message.
        let got = comm.recv_into(peer, tag, self.payload.spare_bytes_mut())?;
        self.payload.set_len(got)?;
        let started = Instant::now();
        self.codec.decompress(self.payload, self.scratch)?;
        self.decompress_time += started.elapsed();
        self.last_ratio = Some(self.payload.ratio());
        log::trace!("[rank {}] absorbed {got} compressed bytes from rank {peer}", comm.rank());
        out.union_with(self.scratch)
    }

    fn forward<C: Communicator>(
        &mut self,
        comm: &C,
        peer: usize,
        tag: CommTag,
        out: &FrontierBuffer,
    ) -> Result<(), WaveError> {
        let started = Instant::now();
        self.codec.compress(out, self.payload)?;
        self.compress_time += started.elapsed();
        self.last_ratio = Some(self.payload.ratio());
        comm.send(peer, tag, self.payload.as_bytes())
    }
}

/// Run this rank's part of the row pipeline with the given hop strategy.
pub fn run_pipeline<C, H>(grid: &ProcessGrid<C>, hop: &mut H, out: &mut FrontierBuffer) -> Result<(), WaveError>
where
    C: Communicator,
    H: Hop,
{
    let world = grid.world();
    let me = grid.rank();
    let tag = pipeline_tag(grid.row_index());
    match RingPosition::of(grid.col_index(), grid.side()) {
        RingPosition::Solo => {}
        RingPosition::First => hop.forward(world, me + 1, tag, out)?,
        RingPosition::Middle => {
            hop.absorb(world, me - 1, tag, out)?;
            hop.forward(world, me + 1, tag, out)?;
        }
        RingPosition::Last => hop.absorb(world, me - 1, tag, out)?,
    }
    Ok(())
}

/// Uncompressed wave: on return the last column's `out` is the OR of the row's
/// `out` buffers. `prefix` is scratch for the incoming union.
pub fn propagate<C, S>(
    grid: &ProcessGrid<C>,
    out: &mut FrontierBuffer,
    prefix: &mut FrontierBuffer,
    sink: &mut S,
) -> Result<(), WaveError>
where
    C: Communicator,
    S: InstrumentationSink + ?Sized,
{
    out.check_same_shape(prefix)?;
    let started = Instant::now();
    run_pipeline(grid, &mut PlainHop { prefix }, out)?;
    sink.record_phase(Phase::Propagate, started.elapsed());
    Ok(())
}

/// Compressed wave. `payload` must be sized for the worst case of `out`'s vertex
/// count; `scratch` receives decompressed unions.
pub fn propagate_compressed<C, K, S>(
    grid: &ProcessGrid<C>,
    codec: &K,
    out: &mut FrontierBuffer,
    payload: &mut CompressedPayload,
    scratch: &mut FrontierBuffer,
    sink: &mut S,
) -> Result<(), WaveError>
where
    C: Communicator,
    K: BitmapCodec,
    S: InstrumentationSink + ?Sized,
{
    out.check_same_shape(scratch)?;
    grid.world().barrier()?;
    let started = Instant::now();
    let mut hop = CompressedHop::new(codec, payload, scratch);
    run_pipeline(grid, &mut hop, out)?;
    let total = started.elapsed();

    let codec_time = hop.compress_time + hop.decompress_time;
    sink.record_phase(Phase::Compress, hop.compress_time);
    sink.record_phase(Phase::Decompress, hop.decompress_time);
    sink.record_phase(Phase::Propagate, total.saturating_sub(codec_time));
    if let Some(ratio) = hop.last_ratio {
        sink.record_ratio(RatioKind::Propagate, ratio);
    }
    Ok(())
}

//! Two-phase dissemination of the unified frontier.
//!
//! Phase 1 broadcasts the last column's `out` (the row union left behind by the
//! pipeline) to the whole row. Phase 2 lets the diagonal rank of each column
//! copy its `out` into `in` and broadcast it down the column. Afterwards every
//! member of grid column `c` holds the union of grid row `c` in `in`.
//!
//! The compressed variant compresses at each root, broadcasts the byte count
//! (a [`WireCount`]) followed by exactly that many payload bytes, and
//! decompresses on every member, once per phase.

use std::time::{Duration, Instant};

use crate::algs::communicator::Communicator;
use crate::algs::wire::{WireCount, cast_slice_mut};
use crate::codec::BitmapCodec;
use crate::frontier::{CompressedPayload, FrontierBuffer};
use crate::grid::ProcessGrid;
use crate::stats::{InstrumentationSink, Phase, RatioKind};
use crate::wave_error::WaveError;

/// Plain two-phase broadcast.
pub fn broadcast<C, S>(
    grid: &ProcessGrid<C>,
    out: &mut FrontierBuffer,
    in_frontier: &mut FrontierBuffer,
    sink: &mut S,
) -> Result<(), WaveError>
where
    C: Communicator,
    S: InstrumentationSink + ?Sized,
{
    out.check_same_shape(in_frontier)?;
    grid.world().barrier()?;
    let started = Instant::now();

    grid.row_comm().broadcast(grid.side() - 1, out.as_bytes_mut())?;
    out.clear_padding();
    if grid.is_diagonal() {
        in_frontier.copy_from(out)?;
    }
    grid.col_comm()
        .broadcast(grid.col_index(), in_frontier.as_bytes_mut())?;
    in_frontier.clear_padding();

    sink.record_phase(Phase::Broadcast, started.elapsed());
    Ok(())
}

#[derive(Default)]
struct CodecClock {
    compress: Duration,
    decompress: Duration,
}

impl CodecClock {
    fn compress<K: BitmapCodec>(
        &mut self,
        codec: &K,
        raw: &FrontierBuffer,
        payload: &mut CompressedPayload,
    ) -> Result<usize, WaveError> {
        let started = Instant::now();
        let size = codec.compress(raw, payload)?;
        self.compress += started.elapsed();
        Ok(size)
    }

    fn decompress<K: BitmapCodec>(
        &mut self,
        codec: &K,
        payload: &CompressedPayload,
        out: &mut FrontierBuffer,
    ) -> Result<usize, WaveError> {
        let started = Instant::now();
        let size = codec.decompress(payload, out)?;
        self.decompress += started.elapsed();
        Ok(size)
    }
}

/// Root compresses `source`; everyone ends up with the root's payload.
fn share_payload<C, K>(
    comm: &C,
    root: usize,
    codec: &K,
    source: &FrontierBuffer,
    payload: &mut CompressedPayload,
    clock: &mut CodecClock,
) -> Result<(), WaveError>
where
    C: Communicator,
    K: BitmapCodec,
{
    let mut count = WireCount::default();
    if comm.rank() == root {
        let size = clock.compress(codec, source, payload)?;
        count = WireCount::new(size);
    }
    comm.broadcast(root, cast_slice_mut(std::slice::from_mut(&mut count)))?;
    // A size above the capacity is caught here, before any payload byte moves.
    let bytes = payload.prepare_bytes_mut(count.get())?;
    comm.broadcast(root, bytes)
}

/// Compressed two-phase broadcast: two full compress/decompress round trips.
pub fn broadcast_compressed<C, K, S>(
    grid: &ProcessGrid<C>,
    codec: &K,
    out: &mut FrontierBuffer,
    in_frontier: &mut FrontierBuffer,
    payload: &mut CompressedPayload,
    sink: &mut S,
) -> Result<(), WaveError>
where
    C: Communicator,
    K: BitmapCodec,
    S: InstrumentationSink + ?Sized,
{
    out.check_same_shape(in_frontier)?;
    grid.world().barrier()?;
    let started = Instant::now();
    let mut clock = CodecClock::default();

    share_payload(grid.row_comm(), grid.side() - 1, codec, out, payload, &mut clock)?;
    clock.decompress(codec, payload, out)?;

    share_payload(grid.col_comm(), grid.col_index(), codec, out, payload, &mut clock)?;
    clock.decompress(codec, payload, in_frontier)?;

    let total = started.elapsed();
    sink.record_phase(Phase::Compress, clock.compress);
    sink.record_phase(Phase::Decompress, clock.decompress);
    sink.record_phase(
        Phase::Broadcast,
        total.saturating_sub(clock.compress + clock.decompress),
    );
    let ratio = payload.ratio();
    sink.record_ratio(RatioKind::Broadcast, ratio);
    log::debug!(
        "[rank {}] broadcast {} compressed bytes (ratio {ratio:.4})",
        grid.rank(),
        payload.len()
    );
    Ok(())
}

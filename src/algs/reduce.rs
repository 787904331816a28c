//! All-reduce alternative to the row pipeline.
//!
//! Every row member ORs its `out` into the row union at once (one collective
//! instead of `p - 1` sequential hops), then the diagonal rank seeds `in` and
//! broadcasts it down its column. Each collective only spans `p` ranks, which
//! is what keeps the 2-D layout cheaper than a flat all-reduce over `p²`.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::algs::communicator::Communicator;
use crate::codec::BitmapCodec;
use crate::frontier::{CompressedPayload, FrontierBuffer, try_zeroed};
use crate::grid::ProcessGrid;
use crate::stats::{InstrumentationSink, Phase, RatioKind};
use crate::wave_error::WaveError;

/// How frontier bytes reach the transport.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Staging {
    /// Copy into separate transfer buffers first, for transports that cannot
    /// read the frontier storage directly.
    HostStaged,
    /// Hand the frontier storage to the transport as is, skipping the
    /// staging buffers. The all-reduce itself is in place on the serial and
    /// threaded backends; MPI still copies once into a send buffer.
    #[default]
    Direct,
}

/// Diagnostic codec round trip run by the reducer; the reduce itself never
/// compresses.
pub struct CompressionProbe<'a, K> {
    pub codec: &'a K,
    pub payload: &'a mut CompressedPayload,
    pub scratch: &'a mut FrontierBuffer,
}

impl<K: BitmapCodec> CompressionProbe<'_, K> {
    /// Compress and decompress `frontier`, reporting codec times and the ratio.
    pub fn run<S>(&mut self, frontier: &FrontierBuffer, sink: &mut S) -> Result<f64, WaveError>
    where
        S: InstrumentationSink + ?Sized,
    {
        let started = Instant::now();
        self.codec.compress(frontier, self.payload)?;
        sink.record_phase(Phase::Compress, started.elapsed());

        let started = Instant::now();
        self.codec.decompress(self.payload, self.scratch)?;
        sink.record_phase(Phase::Decompress, started.elapsed());
        debug_assert_eq!(&*self.scratch, frontier, "codec round trip is not exact");

        let ratio = self.payload.ratio();
        sink.record_ratio(RatioKind::Propagate, ratio);
        Ok(ratio)
    }
}

/// Row all-reduce of `out` followed by the diagonal column broadcast into
/// `in_frontier`.
///
/// On return every row member holds the row union in `out`, and every member of
/// grid column `c` holds the union of grid row `c` in `in_frontier`.
pub fn reduce<C, K, S>(
    grid: &ProcessGrid<C>,
    staging: Staging,
    out: &mut FrontierBuffer,
    in_frontier: &mut FrontierBuffer,
    probe: Option<CompressionProbe<'_, K>>,
    sink: &mut S,
) -> Result<(), WaveError>
where
    C: Communicator,
    K: BitmapCodec,
    S: InstrumentationSink + ?Sized,
{
    out.check_same_shape(in_frontier)?;
    if let Some(mut probe) = probe {
        probe.run(out, sink)?;
    }

    match staging {
        Staging::HostStaged => {
            let len = out.byte_len();
            let mut send: Vec<u8> = try_zeroed(len, "reduce send staging")?;
            let mut recv: Vec<u8> = try_zeroed(len, "reduce receive staging")?;
            send.copy_from_slice(out.as_bytes());

            let started = Instant::now();
            grid.row_comm().all_reduce_or(&send, &mut recv)?;
            out.as_bytes_mut().copy_from_slice(&recv);
            out.clear_padding();
            sink.record_phase(Phase::Propagate, started.elapsed());

            let started = Instant::now();
            let mut staged: Vec<u8> = try_zeroed(len, "broadcast staging")?;
            if grid.is_diagonal() {
                staged.copy_from_slice(&recv);
            }
            grid.col_comm().broadcast(grid.col_index(), &mut staged)?;
            in_frontier.as_bytes_mut().copy_from_slice(&staged);
            in_frontier.clear_padding();
            sink.record_phase(Phase::Broadcast, started.elapsed());
        }
        Staging::Direct => {
            grid.world().barrier()?;
            let started = Instant::now();
            grid.row_comm().all_reduce_or_in_place(out.as_bytes_mut())?;
            out.clear_padding();
            sink.record_phase(Phase::Propagate, started.elapsed());

            if grid.is_diagonal() {
                in_frontier.copy_from(out)?;
            }
            grid.world().barrier()?;
            let started = Instant::now();
            grid.col_comm()
                .broadcast(grid.col_index(), in_frontier.as_bytes_mut())?;
            in_frontier.clear_padding();
            sink.record_phase(Phase::Broadcast, started.elapsed());
        }
    }

    log::debug!(
        "[rank {}] reduced row {} ({:?}): {} vertices in row union",
        grid.rank(),
        grid.row_index(),
        staging,
        out.count_ones()
    );
    Ok(())
}

//! Per-rank facade tying the grid, the codec and the scratch buffers together.
//!
//! A [`Wave`] is built once per process (collectively) and then driven by the
//! traversal engine once per iteration:
//!
//! ```no_run
//! # use frontier_wave::prelude::*;
//! # fn run<C: Communicator>(world: C) -> Result<(), WaveError> {
//! let config = WaveConfig::new(2, 1 << 16, UnifyStrategy::CompressedPipeline);
//! let mut stats = WaveStats::default();
//! let mut wave = Wave::new(world, config, WahCodec, &mut stats)?;
//! let mut out = wave.new_frontier()?;
//! let mut next = wave.new_frontier()?;
//! // ... the engine marks newly discovered vertices in `out` ...
//! wave.step(&mut out, &mut next, &mut stats)?;
//! // `next` now seeds the following iteration.
//! # Ok(())
//! # }
//! ```

use std::time::Instant;

use crate::algs::broadcast::{broadcast, broadcast_compressed};
use crate::algs::communicator::Communicator;
use crate::algs::propagate::{propagate, propagate_compressed};
use crate::algs::reduce::{CompressionProbe, Staging, reduce};
use crate::codec::{BitmapCodec, WahCodec};
use crate::config::{UnifyStrategy, WaveConfig};
use crate::frontier::{CompressedPayload, FrontierBuffer};
use crate::grid::ProcessGrid;
use crate::stats::{InstrumentationSink, Phase, PhaseTotals};
use crate::wave_error::WaveError;

/// One rank's view of the distributed frontier exchange.
pub struct Wave<C, K = WahCodec> {
    grid: ProcessGrid<C>,
    config: WaveConfig,
    codec: K,
    payload: CompressedPayload,
    scratch: FrontierBuffer,
}

impl<C: Communicator, K: BitmapCodec> Wave<C, K> {
    /// Validate `config`, derive the row and column communicators from `world`
    /// and allocate worst-case scratch buffers. Collective over `world`.
    pub fn new<S>(world: C, config: WaveConfig, codec: K, sink: &mut S) -> Result<Self, WaveError>
    where
        S: InstrumentationSink + ?Sized,
    {
        let started = Instant::now();
        config.validate()?;
        let grid = ProcessGrid::new(world, config.grid_side)?;
        let payload = CompressedPayload::with_capacity_for(config.vertex_count)?;
        let scratch = FrontierBuffer::new(config.vertex_count)?;
        sink.record_phase(Phase::Init, started.elapsed());
        log::debug!(
            "[rank {}] wave ready: {} vertices, {:?}, payload capacity {} bytes",
            grid.rank(),
            config.vertex_count,
            config.strategy,
            payload.capacity()
        );
        Ok(Self {
            grid,
            config,
            codec,
            payload,
            scratch,
        })
    }

    pub fn grid(&self) -> &ProcessGrid<C> {
        &self.grid
    }

    pub fn config(&self) -> &WaveConfig {
        &self.config
    }

    pub fn codec(&self) -> &K {
        &self.codec
    }

    /// An empty frontier of the configured size.
    pub fn new_frontier(&self) -> Result<FrontierBuffer, WaveError> {
        FrontierBuffer::new(self.config.vertex_count)
    }

    fn check(&self, frontier: &FrontierBuffer) -> Result<(), WaveError> {
        if frontier.vertex_count() == self.config.vertex_count {
            Ok(())
        } else {
            Err(WaveError::VertexCountMismatch {
                expected: self.config.vertex_count,
                found: frontier.vertex_count(),
            })
        }
    }

    /// Raw row pipeline; the last column ends up with the row union in `out`.
    pub fn propagate<S>(&mut self, out: &mut FrontierBuffer, sink: &mut S) -> Result<(), WaveError>
    where
        S: InstrumentationSink + ?Sized,
    {
        self.check(out)?;
        propagate(&self.grid, out, &mut self.scratch, sink)
    }

    /// Compressed row pipeline.
    pub fn propagate_compressed<S>(&mut self, out: &mut FrontierBuffer, sink: &mut S) -> Result<(), WaveError>
    where
        S: InstrumentationSink + ?Sized,
    {
        self.check(out)?;
        propagate_compressed(
            &self.grid,
            &self.codec,
            out,
            &mut self.payload,
            &mut self.scratch,
            sink,
        )
    }

    /// Row broadcast from the last column, then column broadcast from the diagonal.
    pub fn broadcast<S>(
        &mut self,
        out: &mut FrontierBuffer,
        in_frontier: &mut FrontierBuffer,
        sink: &mut S,
    ) -> Result<(), WaveError>
    where
        S: InstrumentationSink + ?Sized,
    {
        self.check(out)?;
        self.check(in_frontier)?;
        broadcast(&self.grid, out, in_frontier, sink)
    }

    /// Compressed variant of [`Wave::broadcast`].
    pub fn broadcast_compressed<S>(
        &mut self,
        out: &mut FrontierBuffer,
        in_frontier: &mut FrontierBuffer,
        sink: &mut S,
    ) -> Result<(), WaveError>
    where
        S: InstrumentationSink + ?Sized,
    {
        self.check(out)?;
        self.check(in_frontier)?;
        broadcast_compressed(&self.grid, &self.codec, out, in_frontier, &mut self.payload, sink)
    }

    /// Row all-reduce plus diagonal column broadcast. Host staging also runs
    /// the diagnostic compression probe.
    pub fn reduce<S>(
        &mut self,
        staging: Staging,
        out: &mut FrontierBuffer,
        in_frontier: &mut FrontierBuffer,
        sink: &mut S,
    ) -> Result<(), WaveError>
    where
        S: InstrumentationSink + ?Sized,
    {
        self.check(out)?;
        self.check(in_frontier)?;
        let probe = (staging == Staging::HostStaged).then(|| CompressionProbe {
            codec: &self.codec,
            payload: &mut self.payload,
            scratch: &mut self.scratch,
        });
        reduce(&self.grid, staging, out, in_frontier, probe, sink)
    }

    /// One full exchange with the configured strategy: unify `out` along the
    /// row and leave the union of grid row `c` in `in_frontier` of every
    /// process in grid column `c`.
    ///
    /// `sink` sees each phase once, with the time summed over the whole step.
    pub fn step<S>(
        &mut self,
        out: &mut FrontierBuffer,
        in_frontier: &mut FrontierBuffer,
        sink: &mut S,
    ) -> Result<(), WaveError>
    where
        S: InstrumentationSink + ?Sized,
    {
        let mut totals = PhaseTotals::default();
        match self.config.strategy {
            UnifyStrategy::Pipeline => {
                self.propagate(out, &mut totals)?;
                self.broadcast(out, in_frontier, &mut totals)?;
            }
            UnifyStrategy::CompressedPipeline => {
                self.propagate_compressed(out, &mut totals)?;
                self.broadcast_compressed(out, in_frontier, &mut totals)?;
            }
            UnifyStrategy::AllReduce { staging } => {
                self.reduce(staging, out, in_frontier, &mut totals)?;
            }
        }
        totals.flush_into(sink);
        Ok(())
    }

    /// Report `err` and tear the job down; peers would otherwise block forever.
    pub fn abort(&self, err: &WaveError) -> ! {
        log::error!("[rank {}] aborting wave: {err}", self.grid.rank());
        self.grid.world().abort(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::stats::WaveStats;
    use std::time::Duration;

    #[test]
    fn serial_step_copies_out_into_in_for_every_strategy() {
        for strategy in [
            UnifyStrategy::Pipeline,
            UnifyStrategy::CompressedPipeline,
            UnifyStrategy::AllReduce {
                staging: Staging::HostStaged,
            },
            UnifyStrategy::AllReduce {
                staging: Staging::Direct,
            },
        ] {
            let mut stats = WaveStats::default();
            let mut wave = Wave::new(NoComm, WaveConfig::new(1, 100, strategy), WahCodec, &mut stats).unwrap();
            let mut out = FrontierBuffer::from_vertices(100, [3, 64, 99]).unwrap();
            let before = out.clone();
            let mut input = wave.new_frontier().unwrap();
            wave.step(&mut out, &mut input, &mut stats).unwrap();
            assert_eq!(out, before, "{strategy:?}");
            assert_eq!(input, before, "{strategy:?}");
        }
    }

    #[derive(Default)]
    struct Recorder(Vec<(Phase, Duration)>);

    impl InstrumentationSink for Recorder {
        fn record_phase(&mut self, phase: Phase, elapsed: Duration) {
            self.0.push((phase, elapsed));
        }
        fn record_ratio(&mut self, _kind: crate::stats::RatioKind, _ratio: f64) {}
    }

    #[test]
    fn compressed_step_reports_codec_time_once_summed() {
        let config = WaveConfig::new(1, 4096, UnifyStrategy::CompressedPipeline);
        let mut wave = Wave::new(NoComm, config, WahCodec, &mut ()).unwrap();
        let mut out = FrontierBuffer::from_vertices(4096, (0..4096).step_by(3)).unwrap();
        let mut input = wave.new_frontier().unwrap();

        let mut step = Recorder::default();
        wave.step(&mut out, &mut input, &mut step).unwrap();
        let compress: Vec<Duration> = step
            .0
            .iter()
            .filter(|(phase, _)| *phase == Phase::Compress)
            .map(|(_, elapsed)| *elapsed)
            .collect();
        assert_eq!(compress.len(), 1);

        // Calling the halves directly shows every call's own record.
        let mut halves = Recorder::default();
        let mut out = FrontierBuffer::from_vertices(4096, (0..4096).step_by(3)).unwrap();
        wave.propagate_compressed(&mut out, &mut halves).unwrap();
        wave.broadcast_compressed(&mut out, &mut input, &mut halves).unwrap();
        let separate = halves.0.iter().filter(|(phase, _)| *phase == Phase::Compress).count();
        assert_eq!(separate, 2);
    }

    #[test]
    fn rejects_frontiers_of_the_wrong_size() {
        let mut wave = Wave::new(NoComm, WaveConfig::new(1, 16, UnifyStrategy::Pipeline), WahCodec, &mut ())
            .unwrap();
        let mut out = FrontierBuffer::new(17).unwrap();
        let mut input = FrontierBuffer::new(16).unwrap();
        assert!(matches!(
            wave.step(&mut out, &mut input, &mut ()),
            Err(WaveError::VertexCountMismatch { expected: 16, found: 17 })
        ));
    }

    #[test]
    fn construction_validates_the_grid() {
        assert!(matches!(
            Wave::new(NoComm, WaveConfig::new(2, 16, UnifyStrategy::Pipeline), WahCodec, &mut ()),
            Err(WaveError::GridMismatch { world_size: 1, side: 2 })
        ));
    }
}

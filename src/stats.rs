//! Per-call timing and compression diagnostics.
//!
//! The wave never keeps timings itself. Every operation takes a caller-owned
//! [`InstrumentationSink`] and reports each phase it ran; [`WaveStats`] keeps the
//! latest value of each (overwritten per call), [`LogSink`] forwards records to
//! the `log` facade.

use std::time::Duration;

/// Phases the wave reports durations for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Grid and communicator construction.
    Init,
    /// Row unification (pipeline or all-reduce), excluding codec time.
    Propagate,
    /// Row and/or column dissemination.
    Broadcast,
    Compress,
    Decompress,
}

/// Which message a compression ratio describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RatioKind {
    /// Ratio observed while unifying a row (pipeline hops or the reduce probe).
    Propagate,
    /// Ratio of the payload sent by the compressed broadcast.
    Broadcast,
}

/// Consumer of wave measurements.
pub trait InstrumentationSink {
    fn record_phase(&mut self, phase: Phase, elapsed: Duration);
    fn record_ratio(&mut self, kind: RatioKind, ratio: f64);
}

impl<S: InstrumentationSink + ?Sized> InstrumentationSink for &mut S {
    fn record_phase(&mut self, phase: Phase, elapsed: Duration) {
        (**self).record_phase(phase, elapsed);
    }
    fn record_ratio(&mut self, kind: RatioKind, ratio: f64) {
        (**self).record_ratio(kind, ratio);
    }
}

/// Sink that drops everything.
impl InstrumentationSink for () {
    fn record_phase(&mut self, _phase: Phase, _elapsed: Duration) {}
    fn record_ratio(&mut self, _kind: RatioKind, _ratio: f64) {}
}

/// Collects the records of several calls and replays them as one: durations
/// of a repeated phase are summed, ratios keep their latest value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhaseTotals {
    phases: Vec<(Phase, Duration)>,
    ratios: Vec<(RatioKind, f64)>,
}

impl PhaseTotals {
    /// Forward the totals to `sink`, each phase once, in first-seen order.
    pub fn flush_into<S: InstrumentationSink + ?Sized>(self, sink: &mut S) {
        for (phase, elapsed) in self.phases {
            sink.record_phase(phase, elapsed);
        }
        for (kind, ratio) in self.ratios {
            sink.record_ratio(kind, ratio);
        }
    }
}

impl InstrumentationSink for PhaseTotals {
    fn record_phase(&mut self, phase: Phase, elapsed: Duration) {
        match self.phases.iter_mut().find(|(p, _)| *p == phase) {
            Some((_, total)) => *total += elapsed,
            None => self.phases.push((phase, elapsed)),
        }
    }

    fn record_ratio(&mut self, kind: RatioKind, ratio: f64) {
        match self.ratios.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, latest)) => *latest = ratio,
            None => self.ratios.push((kind, ratio)),
        }
    }
}

/// Latest measurement per phase and ratio kind for one rank.
///
/// Each record overwrites the previous one. A [`Wave::step`](crate::wave::Wave::step)
/// reports per-step totals, so after a compressed step `compress` covers both the
/// pipeline and the broadcast.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaveStats {
    pub init: Duration,
    pub propagate: Duration,
    pub broadcast: Duration,
    pub compress: Duration,
    pub decompress: Duration,
    pub compression_ratio: Option<f64>,
    pub broadcast_ratio: Option<f64>,
}

impl InstrumentationSink for WaveStats {
    fn record_phase(&mut self, phase: Phase, elapsed: Duration) {
        let slot = match phase {
            Phase::Init => &mut self.init,
            Phase::Propagate => &mut self.propagate,
            Phase::Broadcast => &mut self.broadcast,
            Phase::Compress => &mut self.compress,
            Phase::Decompress => &mut self.decompress,
        };
        *slot = elapsed;
    }

    fn record_ratio(&mut self, kind: RatioKind, ratio: f64) {
        match kind {
            RatioKind::Propagate => self.compression_ratio = Some(ratio),
            RatioKind::Broadcast => self.broadcast_ratio = Some(ratio),
        }
    }
}

/// Forwards every record to `log` at trace level, then to `inner`.
#[derive(Debug, Default)]
pub struct LogSink<S> {
    pub rank: usize,
    pub inner: S,
}

impl<S: InstrumentationSink> InstrumentationSink for LogSink<S> {
    fn record_phase(&mut self, phase: Phase, elapsed: Duration) {
        log::trace!("[rank {}] {phase:?}: {elapsed:?}", self.rank);
        self.inner.record_phase(phase, elapsed);
    }

    fn record_ratio(&mut self, kind: RatioKind, ratio: f64) {
        log::trace!("[rank {}] {kind:?} ratio: {ratio:.4}", self.rank);
        if ratio > 1.0 {
            log::warn!(
                "[rank {}] {kind:?} payload grew under compression (ratio {ratio:.4})",
                self.rank
            );
        }
        self.inner.record_ratio(kind, ratio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_keep_the_latest_value() {
        let mut stats = WaveStats::default();
        stats.record_phase(Phase::Propagate, Duration::from_millis(3));
        stats.record_phase(Phase::Propagate, Duration::from_millis(1));
        stats.record_ratio(RatioKind::Broadcast, 0.25);
        assert_eq!(stats.propagate, Duration::from_millis(1));
        assert_eq!(stats.broadcast_ratio, Some(0.25));
        assert_eq!(stats.compression_ratio, None);
    }

    #[test]
    fn totals_sum_repeated_phases() {
        let mut totals = PhaseTotals::default();
        totals.record_phase(Phase::Compress, Duration::from_millis(2));
        totals.record_phase(Phase::Propagate, Duration::from_millis(5));
        totals.record_phase(Phase::Compress, Duration::from_millis(3));
        totals.record_ratio(RatioKind::Broadcast, 0.5);
        totals.record_ratio(RatioKind::Broadcast, 0.25);

        let mut stats = WaveStats::default();
        totals.flush_into(&mut stats);
        assert_eq!(stats.compress, Duration::from_millis(5));
        assert_eq!(stats.propagate, Duration::from_millis(5));
        assert_eq!(stats.broadcast_ratio, Some(0.25));
    }

    #[test]
    fn log_sink_forwards_to_inner() {
        let mut sink = LogSink {
            rank: 3,
            inner: WaveStats::default(),
        };
        sink.record_phase(Phase::Compress, Duration::from_micros(7));
        sink.record_ratio(RatioKind::Propagate, 1.5);
        assert_eq!(sink.inner.compress, Duration::from_micros(7));
        assert_eq!(sink.inner.compression_ratio, Some(1.5));
    }
}

//! Wave configuration shared by every rank of a job.

use serde::{Deserialize, Serialize};

use crate::algs::reduce::Staging;
use crate::frontier::compressed_capacity_words;
use crate::wave_error::WaveError;

/// How [`Wave::step`](crate::wave::Wave::step) unifies a grid row and
/// disseminates the result.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnifyStrategy {
    /// Raw pipeline along the row, then the plain two-phase broadcast.
    #[default]
    Pipeline,
    /// Compressed pipeline, then the compressed two-phase broadcast.
    CompressedPipeline,
    /// Row all-reduce, then the diagonal column broadcast.
    AllReduce {
        #[serde(default)]
        staging: Staging,
    },
}

/// Grid shape, problem size and unification strategy.
///
/// Every rank must use the same configuration; nothing checks that across the
/// job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveConfig {
    /// Side length `p` of the `p x p` process grid.
    pub grid_side: usize,
    /// Vertices per frontier bitmap.
    pub vertex_count: usize,
    #[serde(default)]
    pub strategy: UnifyStrategy,
}

impl WaveConfig {
    pub fn new(grid_side: usize, vertex_count: usize, strategy: UnifyStrategy) -> Self {
        Self {
            grid_side,
            vertex_count,
            strategy,
        }
    }

    /// Number of processes the grid needs.
    pub fn world_size(&self) -> usize {
        self.grid_side * self.grid_side
    }

    pub fn validate(&self) -> Result<(), WaveError> {
        if self.grid_side == 0 {
            return Err(WaveError::InvalidGrid(self.grid_side));
        }
        if self.grid_side.checked_mul(self.grid_side).is_none() {
            return Err(WaveError::InvalidConfig(format!(
                "grid side {} overflows the world size",
                self.grid_side
            )));
        }
        // Compressed sizes travel as a 32-bit count.
        let capacity = compressed_capacity_words(self.vertex_count) as u64 * 4;
        if capacity > u64::from(u32::MAX) {
            return Err(WaveError::InvalidConfig(format!(
                "{} vertices need a {capacity}-byte payload, above the 32-bit size limit",
                self.vertex_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_grid_and_huge_frontiers() {
        assert!(WaveConfig::new(2, 64, UnifyStrategy::Pipeline).validate().is_ok());
        assert!(matches!(
            WaveConfig::new(0, 64, UnifyStrategy::Pipeline).validate(),
            Err(WaveError::InvalidGrid(0))
        ));
        assert!(matches!(
            WaveConfig::new(1, usize::MAX, UnifyStrategy::Pipeline).validate(),
            Err(WaveError::InvalidConfig(_))
        ));
        assert_eq!(WaveConfig::new(3, 1, UnifyStrategy::Pipeline).world_size(), 9);
    }

    #[test]
    fn json_roundtrip() {
        let cfg = WaveConfig::new(
            4,
            1 << 20,
            UnifyStrategy::AllReduce {
                staging: Staging::HostStaged,
            },
        );
        let json = serde_json::to_string(&cfg).unwrap();
        let back: WaveConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn strategy_defaults() {
        let cfg: WaveConfig = serde_json::from_str(r#"{"grid_side": 2, "vertex_count": 10}"#).unwrap();
        assert_eq!(cfg.strategy, UnifyStrategy::Pipeline);
        let cfg: WaveConfig = serde_json::from_str(
            r#"{"grid_side": 2, "vertex_count": 10, "strategy": {"kind": "all_reduce"}}"#,
        )
        .unwrap();
        assert_eq!(
            cfg.strategy,
            UnifyStrategy::AllReduce {
                staging: Staging::Direct
            }
        );
    }
}

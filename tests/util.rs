#![allow(dead_code)]
use std::thread;

use frontier_wave::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Run `body` on every rank of a threaded `p x p` world; results come back in
/// rank order.
pub fn on_grid<T, F>(config: &WaveConfig, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(&mut Wave<LocalComm>) -> T + Sync,
{
    thread::scope(|s| {
        let body = &body;
        let handles: Vec<_> = LocalComm::world(config.world_size())
            .into_iter()
            .map(|comm| {
                s.spawn(move || {
                    let mut wave = Wave::new(comm, config.clone(), WahCodec, &mut ()).unwrap();
                    body(&mut wave)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Reproducible frontier for `rank`, each vertex set with probability `density`.
pub fn random_frontier(n: usize, rank: usize, seed: u64, density: f64) -> FrontierBuffer {
    let mut rng = SmallRng::seed_from_u64(seed ^ (rank as u64).wrapping_mul(0x9E37_79B9));
    FrontierBuffer::from_vertices(n, (0..n).filter(|_| rng.gen_bool(density))).unwrap()
}

/// OR of the frontiers of grid row `row`.
pub fn row_union(frontiers: &[FrontierBuffer], row: usize, side: usize) -> FrontierBuffer {
    let mut acc = FrontierBuffer::new(frontiers[0].vertex_count()).unwrap();
    for f in &frontiers[row * side..row * side + side] {
        acc.union_with(f).unwrap();
    }
    acc
}

pub fn ones(f: &FrontierBuffer) -> Vec<usize> {
    f.iter_ones().collect()
}

pub const ALL_STRATEGIES: [UnifyStrategy; 4] = [
    UnifyStrategy::Pipeline,
    UnifyStrategy::CompressedPipeline,
    UnifyStrategy::AllReduce {
        staging: Staging::HostStaged,
    },
    UnifyStrategy::AllReduce {
        staging: Staging::Direct,
    },
];

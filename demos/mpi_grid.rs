// demos/mpi_grid.rs
// mpirun -n 4 cargo run --features mpi-support --example mpi_grid
//
// One exchange per strategy on random frontiers over an MPI world whose size
// is a perfect square. Every rank prints its timings.

use frontier_wave::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const VERTICES: usize = 1 << 22;

fn main() {
    let world = match MpiComm::new() {
        Ok(world) => world,
        Err(e) => {
            eprintln!("MPI init failed: {e}");
            std::process::exit(1);
        }
    };
    let size = world.size();
    let rank = world.rank();
    let side = (1..=size).find(|s| s * s >= size).unwrap_or(1);
    if side * side != size {
        if rank == 0 {
            eprintln!("Run with a square number of MPI ranks (got {size})");
        }
        return;
    }

    let mut stats = WaveStats::default();
    let config = WaveConfig::new(side, VERTICES, UnifyStrategy::Pipeline);
    let mut wave = match Wave::new(world, config, WahCodec, &mut stats) {
        Ok(wave) => wave,
        Err(e) => {
            eprintln!("[rank {rank}] grid setup failed: {e}");
            std::process::exit(1);
        }
    };

    let mut rng = SmallRng::seed_from_u64(rank as u64);
    let seed: Vec<usize> = (0..VERTICES).filter(|_| rng.gen_bool(0.001)).collect();
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
        let exchanged = (|| -> Result<(), WaveError> {
            let mut out = FrontierBuffer::from_vertices(VERTICES, seed.iter().copied())?;
            let mut input = wave.new_frontier()?;
            match strategy {
                UnifyStrategy::Pipeline => {
                    wave.propagate(&mut out, &mut stats)?;
                    wave.broadcast(&mut out, &mut input, &mut stats)
                }
                UnifyStrategy::CompressedPipeline => {
                    wave.propagate_compressed(&mut out, &mut stats)?;
                    wave.broadcast_compressed(&mut out, &mut input, &mut stats)
                }
                UnifyStrategy::AllReduce { staging } => {
                    wave.reduce(staging, &mut out, &mut input, &mut stats)
                }
            }
        })();
        if let Err(e) = exchanged {
            wave.abort(&e);
        }
        println!(
            "[rank {rank}] {strategy:?}: init {:?}, propagate {:?}, broadcast {:?}, compress {:?}, decompress {:?}, ratios {:?} / {:?}",
            stats.init,
            stats.propagate,
            stats.broadcast,
            stats.compress,
            stats.decompress,
            stats.compression_ratio,
            stats.broadcast_ratio
        );
    }
}

// demos/local_grid.rs
// cargo run --example local_grid [-- config.json]
//
// Runs a p x p grid on threads of this process and times one exchange per
// strategy on random frontiers. The optional JSON file holds a `WaveConfig`,
// e.g. {"grid_side": 3, "vertex_count": 1000000, "strategy": {"kind": "compressed_pipeline"}}.

use std::thread;

use frontier_wave::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn load_config() -> Result<WaveConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_slice(&std::fs::read(path)?)?),
        None => Ok(WaveConfig::new(3, 1 << 20, UnifyStrategy::CompressedPipeline)),
    }
}

fn run_rank(comm: LocalComm, config: &WaveConfig, density: f64) -> Result<(usize, WaveStats), WaveError> {
    let mut sink = LogSink {
        rank: comm.world_rank(),
        inner: WaveStats::default(),
    };
    let mut wave = Wave::new(comm, config.clone(), WahCodec, &mut sink)?;
    let rank = wave.grid().rank();
    let mut rng = SmallRng::seed_from_u64(rank as u64);
    let n = config.vertex_count;
    let mut out = FrontierBuffer::from_vertices(n, (0..n).filter(|_| rng.gen_bool(density)))?;
    let mut input = wave.new_frontier()?;
    wave.step(&mut out, &mut input, &mut sink)?;
    Ok((rank, sink.inner))
}

fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cannot load configuration: {e}");
            std::process::exit(2);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(2);
    }

    for density in [0.0001, 0.01, 0.3] {
        let results = thread::scope(|s| {
            let handles: Vec<_> = LocalComm::world(config.world_size())
                .into_iter()
                .map(|comm| s.spawn(|| run_rank(comm, &config, density)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect::<Result<Vec<_>, _>>()
        });
        let results = match results {
            Ok(results) => results,
            Err(e) => {
                eprintln!("exchange failed: {e}");
                std::process::exit(1);
            }
        };
        println!("density {density} ({:?}):", config.strategy);
        for (rank, stats) in results {
            println!(
                "  [rank {rank}] propagate {:?}, broadcast {:?}, compress {:?}, decompress {:?}, ratios {:?} / {:?}",
                stats.propagate,
                stats.broadcast,
                stats.compress,
                stats.decompress,
                stats.compression_ratio,
                stats.broadcast_ratio
            );
        }
    }
}

#![cfg(feature = "mpi-support")]
//! Run with `mpirun -n 4 cargo test --features mpi-support --test mpi_wave`.

use frontier_wave::prelude::*;

#[test]
fn mpi_grid_of_four_unifies_and_broadcasts() {
    let world = MpiComm::new().expect("MPI init");
    if world.size() != 4 {
        return;
    }

    let n = 64;
    let strategies = [
        UnifyStrategy::Pipeline,
        UnifyStrategy::CompressedPipeline,
        UnifyStrategy::AllReduce {
            staging: Staging::HostStaged,
        },
        UnifyStrategy::AllReduce {
            staging: Staging::Direct,
        },
    ];
    let mut stats = WaveStats::default();
    let mut wave = Wave::new(world, WaveConfig::new(2, n, UnifyStrategy::Pipeline), WahCodec, &mut stats)
        .expect("wave");
    let rank = wave.grid().rank();
    let (row, col) = (wave.grid().row_index(), wave.grid().col_index());

    for strategy in strategies {
        // Rank r contributes vertex r; the union of grid row k is {2k, 2k + 1}.
        let mut out = FrontierBuffer::from_vertices(n, [rank]).unwrap();
        let mut input = wave.new_frontier().unwrap();
        match strategy {
            UnifyStrategy::Pipeline => {
                wave.propagate(&mut out, &mut stats).unwrap();
                wave.broadcast(&mut out, &mut input, &mut stats).unwrap();
            }
            UnifyStrategy::CompressedPipeline => {
                wave.propagate_compressed(&mut out, &mut stats).unwrap();
                wave.broadcast_compressed(&mut out, &mut input, &mut stats).unwrap();
            }
            UnifyStrategy::AllReduce { staging } => {
                wave.reduce(staging, &mut out, &mut input, &mut stats).unwrap();
            }
        }
        assert_eq!(out.iter_ones().collect::<Vec<_>>(), vec![2 * row, 2 * row + 1], "{strategy:?}");
        assert_eq!(input.iter_ones().collect::<Vec<_>>(), vec![2 * col, 2 * col + 1], "{strategy:?}");
    }
    assert!(stats.broadcast_ratio.is_some());
}

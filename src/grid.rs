//! 2-D process grid: row/column placement and the derived communicators.
//!
//! World rank `r` of a `p x p` grid sits at row `r / p`, column `r % p`. The row
//! communicator spans `row*p .. row*p + p` (its rank is the column index); the
//! column communicator spans `col, col + p, col + 2p, ...` (its rank is the row
//! index).

use itertools::Itertools;

use crate::algs::communicator::Communicator;
use crate::wave_error::WaveError;

/// Row/column coordinates of a rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GridPosition {
    pub row: usize,
    pub col: usize,
}

impl GridPosition {
    pub fn of(rank: usize, side: usize) -> Self {
        Self {
            row: rank / side,
            col: rank % side,
        }
    }

    pub fn rank(&self, side: usize) -> usize {
        self.row * side + self.col
    }

    pub fn is_diagonal(&self) -> bool {
        self.row == self.col
    }
}

/// World ranks sharing `row`.
pub fn row_members(row: usize, side: usize) -> Vec<usize> {
    (0..side).map(|c| row * side + c).collect_vec()
}

/// World ranks sharing `col`.
pub fn col_members(col: usize, side: usize) -> Vec<usize> {
    (0..side).map(|r| r * side + col).collect_vec()
}

/// This rank's place in the grid plus its world, row and column communicators.
pub struct ProcessGrid<C> {
    // Sub-communicators are declared first so they are released before the world.
    row: C,
    col: C,
    world: C,
    side: usize,
    position: GridPosition,
}

impl<C: Communicator> ProcessGrid<C> {
    /// Build the grid. Collective over `world`: every rank must call this with the
    /// same `side`. Any error must be treated as fatal for the whole job.
    pub fn new(world: C, side: usize) -> Result<Self, WaveError> {
        if side == 0 {
            return Err(WaveError::InvalidGrid(side));
        }
        if world.size() != side * side {
            return Err(WaveError::GridMismatch {
                world_size: world.size(),
                side,
            });
        }
        let position = GridPosition::of(world.rank(), side);
        let row = world.subgroup(&row_members(position.row, side))?;
        let col = world.subgroup(&col_members(position.col, side))?;

        if row.rank() != position.col || col.rank() != position.row {
            return Err(WaveError::CommunicatorSetup(format!(
                "rank {} at {position:?} got row rank {} and column rank {}",
                world.rank(),
                row.rank(),
                col.rank()
            )));
        }

        // Nobody may start propagating before every peer has its communicators.
        row.barrier()?;
        col.barrier()?;

        log::debug!(
            "[rank {}] grid {side}x{side}: row {}, column {}",
            world.rank(),
            position.row,
            position.col
        );
        Ok(Self {
            row,
            col,
            world,
            side,
            position,
        })
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn position(&self) -> GridPosition {
        self.position
    }

    pub fn row_index(&self) -> usize {
        self.position.row
    }

    pub fn col_index(&self) -> usize {
        self.position.col
    }

    pub fn is_diagonal(&self) -> bool {
        self.position.is_diagonal()
    }

    pub fn world(&self) -> &C {
        &self.world
    }

    pub fn row_comm(&self) -> &C {
        &self.row
    }

    pub fn col_comm(&self) -> &C {
        &self.col
    }

    /// World rank of this process.
    pub fn rank(&self) -> usize {
        self.world.rank()
    }
}

//! Position of a rank inside its row pipeline.

/// Where a rank sits in the sequential OR-pipeline of its grid row.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RingPosition {
    /// Single-column grid: the local frontier is already the row union.
    Solo,
    /// Column 0: starts the wave.
    First,
    /// Receives the running union, merges and forwards it.
    Middle,
    /// Column `p - 1`: ends up holding the row union.
    Last,
}

impl RingPosition {
    pub fn of(col_index: usize, side: usize) -> Self {
        debug_assert!(col_index < side);
        match (col_index, side) {
            (_, 1) => RingPosition::Solo,
            (0, _) => RingPosition::First,
            (c, p) if c + 1 == p => RingPosition::Last,
            _ => RingPosition::Middle,
        }
    }

    pub fn receives(self) -> bool {
        matches!(self, RingPosition::Middle | RingPosition::Last)
    }

    pub fn forwards(self) -> bool {
        matches!(self, RingPosition::First | RingPosition::Middle)
    }
}

//! WaveError: unified error type for frontier-wave public APIs.
//!
//! Every error here is fatal for the distributed job: the protocol runs in
//! lock-step, so a process that bails out leaves its peers blocked on matching
//! operations. Callers are expected to report the error and abort the world
//! communicator (see [`Communicator::abort`](crate::algs::communicator::Communicator::abort)).

use std::panic::Location;
use thiserror::Error;

/// Unified error type for frontier-wave operations.
#[derive(Debug, Error)]
pub enum WaveError {
    /// The grid side length must be at least one.
    #[error("invalid grid: side length must be >= 1 (got {0})")]
    InvalidGrid(usize),
    /// The world does not hold exactly `side * side` processes.
    #[error("grid mismatch: {world_size} processes cannot form a {side}x{side} grid")]
    GridMismatch { world_size: usize, side: usize },
    /// Row or column communicator creation failed.
    #[error("communicator setup failed: {0}")]
    CommunicatorSetup(String),
    /// Buffer allocation failed.
    #[error("resource exhaustion: allocating {bytes} bytes for {what} failed at {location}")]
    ResourceExhaustion {
        what: &'static str,
        bytes: usize,
        location: &'static Location<'static>,
    },
    /// Two frontiers (or a frontier and the wave) disagree on the vertex count.
    #[error("vertex count mismatch: expected {expected}, got {found}")]
    VertexCountMismatch { expected: usize, found: usize },
    /// A received message does not have the size both sides agreed on.
    #[error("protocol mismatch with rank {peer}: expected {expected} bytes, got {found}")]
    ProtocolMismatch {
        peer: usize,
        expected: usize,
        found: usize,
    },
    /// A compressed payload does not fit the worst-case receive capacity.
    #[error("compressed payload of {found} bytes exceeds capacity of {capacity} bytes")]
    CapacityExceeded { capacity: usize, found: usize },
    /// The bitmap codec rejected its input.
    #[error("codec error: {0}")]
    Codec(String),
    /// A [`WaveConfig`](crate::config::WaveConfig) failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Another rank tore the job down while this one was waiting on it.
    #[error("job aborted by rank {rank} with code {code}")]
    Aborted { rank: usize, code: i32 },
    /// The addressed rank does not exist in this communicator.
    #[error("rank {peer} is not a member of a communicator of size {size}")]
    NoPeer { peer: usize, size: usize },
}

impl WaveError {
    /// Build a [`WaveError::ResourceExhaustion`] tagged with the caller's location.
    #[track_caller]
    pub fn exhausted(what: &'static str, bytes: usize) -> Self {
        WaveError::ResourceExhaustion {
            what,
            bytes,
            location: Location::caller(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_records_caller_location() {
        let err = WaveError::exhausted("frontier", 64);
        match &err {
            WaveError::ResourceExhaustion { location, bytes, .. } => {
                assert_eq!(*bytes, 64);
                assert!(location.file().ends_with("wave_error.rs"));
            }
            other => panic!("unexpected variant {other:?}"),
        }
        assert!(err.to_string().contains("frontier"));
    }
}

//! Communication layer and the row/column exchange algorithms.

pub mod broadcast;
pub mod communicator;
pub mod propagate;
pub mod reduce;
pub mod ring;
pub mod wire;

pub use broadcast::{broadcast, broadcast_compressed};
pub use propagate::{propagate, propagate_compressed};
pub use reduce::{Staging, reduce};

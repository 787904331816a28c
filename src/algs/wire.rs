//! Fixed little-endian wire types for the broadcast and pipeline paths.

use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_align, assert_eq_size};

use crate::wave_error::WaveError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Check that a message from `peer` carried exactly `expected` bytes.
pub fn expect_exact_len(peer: usize, actual: usize, expected: usize) -> Result<(), WaveError> {
    if actual == expected {
        Ok(())
    } else {
        Err(WaveError::ProtocolMismatch {
            peer,
            expected,
            found: actual,
        })
    }
}

/// Byte count of a compressed payload, broadcast ahead of the payload itself.
///
/// All multi-byte integers are stored pre-LE with `.to_le()` and decoded with
/// `.from_le()`, so heterogeneous nodes agree on the value.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

assert_eq_size!(WireCount, u32);
assert_eq_align!(WireCount, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_count_is_little_endian_on_the_wire() {
        let c = WireCount::new(0x0102_0304);
        let bytes = cast_slice(std::slice::from_ref(&c));
        assert_eq!(bytes, &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(c.get(), 0x0102_0304);
    }

    #[test]
    fn wire_count_decodes_from_raw_bytes() {
        let mut c = WireCount::default();
        cast_slice_mut(std::slice::from_mut(&mut c)).copy_from_slice(&[7, 0, 0, 0]);
        assert_eq!(c.get(), 7);
    }

    #[test]
    fn expect_exact_len_reports_peer() {
        assert!(expect_exact_len(3, 4, 4).is_ok());
        match expect_exact_len(3, 2, 4) {
            Err(WaveError::ProtocolMismatch { peer, expected, found }) => {
                assert_eq!((peer, expected, found), (3, 4, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

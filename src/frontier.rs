//! Frontier bitmaps and the compressed payloads that carry them between ranks.
//!
//! A [`FrontierBuffer`] is a dense bit-per-vertex array: bit `v` lives in byte
//! `v / 8` at position `v % 8` (least significant bit first). Bits past the
//! vertex count in the last byte are kept at zero so that byte-wise OR and
//! byte-wise equality agree with set semantics.
//!
//! A [`CompressedPayload`] owns a word buffer sized for the codec's worst case,
//! `ceil(n / 31)` words, plus the logical length of the current message.

use crate::algs::wire::{cast_slice, cast_slice_mut};
use crate::wave_error::WaveError;

/// Number of bytes holding `n` vertex bits.
pub const fn frontier_bytes(n: usize) -> usize {
    n.div_ceil(8)
}

/// Worst-case compressed size of `n` bits, in 32-bit words.
///
/// The codec packs 31 payload bits per word, so no frontier of `n` vertices
/// may ever compress to more than this.
pub const fn compressed_capacity_words(n: usize) -> usize {
    n.div_ceil(31)
}

#[track_caller]
pub(crate) fn try_zeroed<T: Copy + Default>(len: usize, what: &'static str) -> Result<Vec<T>, WaveError> {
    let mut v = Vec::new();
    if v.try_reserve_exact(len).is_err() {
        return Err(WaveError::exhausted(what, len.saturating_mul(std::mem::size_of::<T>())));
    }
    v.resize(len, T::default());
    Ok(v)
}

/// Dense frontier bitmap owned by one rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrontierBuffer {
    vertices: usize,
    bytes: Vec<u8>,
}

impl FrontierBuffer {
    /// An empty frontier over `vertices` vertices.
    #[track_caller]
    pub fn new(vertices: usize) -> Result<Self, WaveError> {
        Ok(Self {
            vertices,
            bytes: try_zeroed(frontier_bytes(vertices), "frontier bitmap")?,
        })
    }

    /// Wrap raw bytes; the length must be `ceil(vertices / 8)`. Padding bits are cleared.
    pub fn from_bytes(vertices: usize, bytes: Vec<u8>) -> Result<Self, WaveError> {
        if bytes.len() != frontier_bytes(vertices) {
            return Err(WaveError::VertexCountMismatch {
                expected: frontier_bytes(vertices),
                found: bytes.len(),
            });
        }
        let mut f = Self { vertices, bytes };
        f.clear_padding();
        Ok(f)
    }

    /// Frontier with the listed vertices set.
    #[track_caller]
    pub fn from_vertices<I>(vertices: usize, members: I) -> Result<Self, WaveError>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut f = Self::new(vertices)?;
        for v in members {
            f.insert(v)?;
        }
        Ok(f)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable raw view, used as a receive/broadcast target.
    ///
    /// Callers writing foreign bytes must follow up with a length check; padding
    /// bits are re-cleared by [`FrontierBuffer::union_with`] and the codec.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn insert(&mut self, v: usize) -> Result<(), WaveError> {
        self.check_vertex(v)?;
        self.bytes[v / 8] |= 1 << (v % 8);
        Ok(())
    }

    pub fn remove(&mut self, v: usize) -> Result<(), WaveError> {
        self.check_vertex(v)?;
        self.bytes[v / 8] &= !(1 << (v % 8));
        Ok(())
    }

    pub fn contains(&self, v: usize) -> bool {
        v < self.vertices && self.bytes[v / 8] & (1 << (v % 8)) != 0
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }

    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Set vertices in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bytes.iter().enumerate().flat_map(|(i, &b)| {
            (0..8)
                .filter(move |bit| b & (1 << bit) != 0)
                .map(move |bit| i * 8 + bit)
        })
    }

    /// Overwrite `self` with `other`.
    pub fn copy_from(&mut self, other: &FrontierBuffer) -> Result<(), WaveError> {
        self.check_same_shape(other)?;
        self.bytes.copy_from_slice(&other.bytes);
        Ok(())
    }

    /// `self |= other`.
    pub fn union_with(&mut self, other: &FrontierBuffer) -> Result<(), WaveError> {
        self.check_same_shape(other)?;
        union_bytes(&mut self.bytes, &other.bytes);
        self.clear_padding();
        Ok(())
    }

    pub(crate) fn check_same_shape(&self, other: &FrontierBuffer) -> Result<(), WaveError> {
        if self.vertices == other.vertices {
            Ok(())
        } else {
            Err(WaveError::VertexCountMismatch {
                expected: self.vertices,
                found: other.vertices,
            })
        }
    }

    pub(crate) fn clear_padding(&mut self) {
        let tail = self.vertices % 8;
        if tail != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= (1u8 << tail) - 1;
            }
        }
    }

    fn check_vertex(&self, v: usize) -> Result<(), WaveError> {
        if v < self.vertices {
            Ok(())
        } else {
            Err(WaveError::VertexCountMismatch {
                expected: self.vertices,
                found: v + 1,
            })
        }
    }
}

#[cfg(feature = "rayon")]
const PAR_UNION_MIN_BYTES: usize = 1 << 16;

/// Byte-wise OR of `src` into `dst`.
#[cfg(feature = "rayon")]
fn union_bytes(dst: &mut [u8], src: &[u8]) {
    use rayon::prelude::*;
    if dst.len() >= PAR_UNION_MIN_BYTES {
        dst.par_chunks_mut(4096)
            .zip(src.par_chunks(4096))
            .for_each(|(d, s)| d.iter_mut().zip(s).for_each(|(a, b)| *a |= *b));
    } else {
        dst.iter_mut().zip(src).for_each(|(a, b)| *a |= *b);
    }
}

/// Byte-wise OR of `src` into `dst`.
#[cfg(not(feature = "rayon"))]
fn union_bytes(dst: &mut [u8], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(a, b)| *a |= *b);
}

/// Compressed frontier with a fixed worst-case capacity.
#[derive(Clone, Debug)]
pub struct CompressedPayload {
    vertices: usize,
    words: Vec<u32>,
    len: usize,
}

impl CompressedPayload {
    /// Payload able to hold any compressed frontier of `vertices` vertices.
    #[track_caller]
    pub fn with_capacity_for(vertices: usize) -> Result<Self, WaveError> {
        Ok(Self {
            vertices,
            words: try_zeroed(compressed_capacity_words(vertices), "compressed payload")?,
            len: 0,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.words.len() * 4
    }

    /// Bytes of the current message.
    pub fn as_bytes(&self) -> &[u8] {
        &cast_slice(&self.words)[..self.len]
    }

    /// The whole capacity as a receive target; follow with [`CompressedPayload::set_len`].
    pub fn spare_bytes_mut(&mut self) -> &mut [u8] {
        cast_slice_mut(&mut self.words)
    }

    /// Buffer of exactly `len` bytes as a broadcast target; sets the logical length.
    pub fn prepare_bytes_mut(&mut self, len: usize) -> Result<&mut [u8], WaveError> {
        self.set_len(len)?;
        Ok(&mut cast_slice_mut(&mut self.words)[..len])
    }

    pub fn set_len(&mut self, len: usize) -> Result<(), WaveError> {
        if len > self.capacity() {
            return Err(WaveError::CapacityExceeded {
                capacity: self.capacity(),
                found: len,
            });
        }
        self.len = len;
        Ok(())
    }

    /// Compressed words (stored little-endian).
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len / 4]
    }

    pub(crate) fn words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// `compressed / raw` bytes for the current message; 1.0 for an empty frontier.
    pub fn ratio(&self) -> f64 {
        let raw = frontier_bytes(self.vertices);
        if raw == 0 {
            1.0
        } else {
            self.len as f64 / raw as f64
        }
    }
}

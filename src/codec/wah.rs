//! Word-aligned hybrid (WAH) bitmap codec with 31-bit groups.
//!
//! The frontier is cut into groups of 31 bits (vertex `31*g + j` is bit `j` of
//! group `g`). Each 32-bit output word is either
//! - a literal: MSB clear, the 31 group bits verbatim, or
//! - a fill: MSB set, bit 30 the fill value, bits 0..30 the run length in groups.
//!
//! A group can never encode to more than one word, which is where the
//! `ceil(n / 31)` capacity bound comes from. Words are stored little-endian.

use super::BitmapCodec;
use crate::frontier::{CompressedPayload, FrontierBuffer};
use crate::wave_error::WaveError;

const GROUP_BITS: usize = 31;
const LITERAL_MASK: u32 = 0x7FFF_FFFF;
const FILL_FLAG: u32 = 0x8000_0000;
const FILL_ONES: u32 = 0x4000_0000;
const MAX_RUN: u32 = 0x3FFF_FFFF;

/// WAH codec; stateless, so one instance can serve every call.
#[derive(Copy, Clone, Debug, Default)]
pub struct WahCodec;

/// Bits of group `g` that map to real vertices.
fn valid_mask(n: usize, g: usize) -> u32 {
    let rem = n - g * GROUP_BITS;
    if rem >= GROUP_BITS {
        LITERAL_MASK
    } else {
        (1u32 << rem) - 1
    }
}

fn read_group(bytes: &[u8], g: usize) -> u32 {
    let off = g * GROUP_BITS;
    let mut window = 0u64;
    for (k, b) in bytes.iter().skip(off / 8).take(5).enumerate() {
        window |= u64::from(*b) << (8 * k);
    }
    ((window >> (off % 8)) as u32) & LITERAL_MASK
}

fn or_group(bytes: &mut [u8], g: usize, w: u32) {
    let off = g * GROUP_BITS;
    let window = u64::from(w) << (off % 8);
    for (k, b) in bytes.iter_mut().skip(off / 8).take(5).enumerate() {
        *b |= (window >> (8 * k)) as u8;
    }
}

fn check_shape(vertices: usize, payload: &CompressedPayload) -> Result<(), WaveError> {
    if vertices == payload.vertex_count() {
        Ok(())
    } else {
        Err(WaveError::VertexCountMismatch {
            expected: payload.vertex_count(),
            found: vertices,
        })
    }
}

impl BitmapCodec for WahCodec {
    fn compress(&self, raw: &FrontierBuffer, out: &mut CompressedPayload) -> Result<usize, WaveError> {
        check_shape(raw.vertex_count(), out)?;
        let n = raw.vertex_count();
        let groups = n.div_ceil(GROUP_BITS);
        let bytes = raw.as_bytes();
        let words = out.words_mut();
        let mut len = 0usize;

        for g in 0..groups {
            let w = read_group(bytes, g) & valid_mask(n, g);
            let fill = match w {
                0 => Some(FILL_FLAG),
                LITERAL_MASK => Some(FILL_FLAG | FILL_ONES),
                _ => None,
            };
            match fill {
                Some(fill) => {
                    if let Some(prev) = len.checked_sub(1).map(|i| u32::from_le(words[i])) {
                        if prev & (FILL_FLAG | FILL_ONES) == fill && prev & MAX_RUN < MAX_RUN {
                            words[len - 1] = (prev + 1).to_le();
                            continue;
                        }
                    }
                    words[len] = (fill | 1).to_le();
                }
                None => words[len] = w.to_le(),
            }
            len += 1;
        }

        out.set_len(len * 4)?;
        Ok(len * 4)
    }

    fn decompress(&self, payload: &CompressedPayload, out: &mut FrontierBuffer) -> Result<usize, WaveError> {
        check_shape(out.vertex_count(), payload)?;
        if payload.len() % 4 != 0 {
            return Err(WaveError::Codec(format!(
                "payload of {} bytes is not word aligned",
                payload.len()
            )));
        }
        let n = out.vertex_count();
        let groups = n.div_ceil(GROUP_BITS);
        out.clear();
        let bytes = out.as_bytes_mut();
        let mut g = 0usize;

        for &stored in payload.words() {
            let word = u32::from_le(stored);
            if word & FILL_FLAG == 0 {
                if g >= groups {
                    return Err(WaveError::Codec(format!(
                        "literal past the last of {groups} groups"
                    )));
                }
                if word & !valid_mask(n, g) != 0 {
                    return Err(WaveError::Codec(format!(
                        "literal for group {g} sets bits past vertex {n}"
                    )));
                }
                or_group(bytes, g, word);
                g += 1;
            } else {
                let run = (word & MAX_RUN) as usize;
                if run == 0 || g + run > groups {
                    return Err(WaveError::Codec(format!(
                        "fill of {run} groups at group {g} overruns {groups} groups"
                    )));
                }
                if word & FILL_ONES != 0 {
                    if valid_mask(n, g + run - 1) != LITERAL_MASK {
                        return Err(WaveError::Codec(
                            "one-fill covers the partial last group".into(),
                        ));
                    }
                    for h in g..g + run {
                        or_group(bytes, h, LITERAL_MASK);
                    }
                }
                g += run;
            }
        }

        if g != groups {
            return Err(WaveError::Codec(format!(
                "payload covers {g} of {groups} groups"
            )));
        }
        Ok(out.byte_len())
    }
}

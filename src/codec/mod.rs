//! Bitmap compression contract used on every compressed hop and broadcast.
//!
//! The wave only relies on the contract below; the bit format belongs to the
//! codec. [`WahCodec`] is the implementation shipped with the crate.

pub mod wah;

pub use wah::WahCodec;

use crate::frontier::{CompressedPayload, FrontierBuffer};
use crate::wave_error::WaveError;

/// Lossless frontier codec.
///
/// Contract:
/// - `decompress(compress(x)) == x` bit for bit;
/// - the compressed length never exceeds [`CompressedPayload::capacity`], i.e.
///   `4 * ceil(n / 31)` bytes for `n` vertices, so a receiver sized for the worst
///   case never truncates.
pub trait BitmapCodec {
    /// Compress `raw` into `out`, setting its logical length. Returns the compressed byte count.
    fn compress(&self, raw: &FrontierBuffer, out: &mut CompressedPayload) -> Result<usize, WaveError>;

    /// Decompress `payload` into `out`. Returns the decompressed byte count.
    fn decompress(&self, payload: &CompressedPayload, out: &mut FrontierBuffer) -> Result<usize, WaveError>;
}

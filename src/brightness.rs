use crate::foundation::error::{MosaicError, MosaicResult};

/// Arithmetic mean of 8-bit grayscale intensities.
///
/// The sum is accumulated exactly in `u64` and divided once, so the result only depends on the
/// multiset of input values and is identical across runs and platforms.
pub fn mean_brightness(gray: &[u8]) -> MosaicResult<f64> {
    if gray.is_empty() {
        return Err(MosaicError::EmptyBrightnessInput);
    }
    let sum: u64 = gray.iter().map(|&v| u64::from(v)).sum();
    Ok(sum as f64 / gray.len() as f64)
}

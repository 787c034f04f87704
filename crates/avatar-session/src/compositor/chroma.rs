//! Green-screen removal

use crate::config::ChromaKeyConfig;
use crate::media::frame::BYTES_PER_PIXEL;

impl ChromaKeyConfig {
    /// Whether a pixel colour is keyed out. All comparisons are strict.
    #[inline]
    pub fn is_keyed(&self, r: u8, g: u8, b: u8) -> bool {
        g > self.green_min && r < self.red_max && b < self.blue_max
    }
}

/// Zero the alpha of every keyed pixel in an RGBA8 buffer, leaving all other
/// pixels untouched. Returns the number of pixels made transparent.
pub fn apply_chroma_key(rgba: &mut [u8], key: &ChromaKeyConfig) -> usize {
    if !key.enabled {
        return 0;
    }

    let mut keyed = 0;
    for px in rgba.chunks_exact_mut(BYTES_PER_PIXEL) {
        if key.is_keyed(px[0], px[1], px[2]) {
            px[3] = 0;
            keyed += 1;
        }
    }
    keyed
}

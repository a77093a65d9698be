//! Presented-frame capture and the region read-back protocol.

use crate::gfx::texture::BYTES_PER_TEXEL;

/// Nearest-neighbour downsample of an RGBA8 image to `size` x `size`,
/// sampling at the centre of each destination cell.
pub fn downsample_nearest(pixels: &[u8], width: u32, height: u32, size: u32) -> Vec<u8> {
    let mut out = vec![0; size as usize * size as usize * BYTES_PER_TEXEL];
    if width == 0 || height == 0 {
        return out;
    }
    for dy in 0..size {
        let sy = (((dy as f64 + 0.5) * height as f64 / size as f64) as u32).min(height - 1);
        for dx in 0..size {
            let sx = (((dx as f64 + 0.5) * width as f64 / size as f64) as u32).min(width - 1);
            let src = (sy as usize * width as usize + sx as usize) * BYTES_PER_TEXEL;
            let dst = (dy as usize * size as usize + dx as usize) * BYTES_PER_TEXEL;
            if let Some(texel) = pixels.get(src..src + BYTES_PER_TEXEL) {
                out[dst..dst + BYTES_PER_TEXEL].copy_from_slice(texel);
            }
        }
    }
    out
}

/// Backing buffer for `gfx_read_pixels_begin/channel/end`.
#[derive(Debug, Default)]
pub struct PixelReadback {
    bytes: Option<Vec<u8>>,
}

impl PixelReadback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `bytes` for channel reads; returns their count.
    pub fn fill(&mut self, bytes: Vec<u8>) -> i32 {
        let count = i32::try_from(bytes.len()).unwrap_or(i32::MAX);
        self.bytes = Some(bytes);
        count
    }

    /// Byte at `offset`, or 0 when nothing is held or `offset` is out of range.
    pub fn channel(&self, offset: i32) -> i32 {
        let Ok(offset) = usize::try_from(offset) else {
            return 0;
        };
        self.bytes
            .as_ref()
            .and_then(|b| b.get(offset))
            .map_or(0, |b| *b as i32)
    }

    pub fn clear(&mut self) {
        self.bytes = None;
    }

    pub fn is_active(&self) -> bool {
        self.bytes.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsample_has_fixed_size() {
        let src = vec![7; 300 * 150 * 4];
        let out = downsample_nearest(&src, 300, 150, 64);
        assert_eq!(out.len(), 64 * 64 * 4);
        assert!(out.iter().all(|b| *b == 7));
    }

    #[test]
    fn downsample_picks_cell_centres() {
        // 2x1: left red, right blue.
        let src = [255, 0, 0, 255, 0, 0, 255, 255];
        let out = downsample_nearest(&src, 2, 1, 4);
        assert_eq!(&out[0..4], &[255, 0, 0, 255]);
        assert_eq!(&out[4..8], &[255, 0, 0, 255]);
        assert_eq!(&out[8..12], &[0, 0, 255, 255]);
        assert_eq!(&out[12..16], &[0, 0, 255, 255]);
    }

    #[test]
    fn upsampling_small_source_repeats_texels() {
        let out = downsample_nearest(&[1, 2, 3, 4], 1, 1, 64);
        assert!(out.chunks(4).all(|p| p == [1, 2, 3, 4]));
    }

    #[test]
    fn readback_clears_to_zero() {
        let mut rb = PixelReadback::new();
        assert_eq!(rb.fill(vec![9; 64]), 64);
        assert_eq!(rb.channel(63), 9);
        assert_eq!(rb.channel(64), 0);
        assert_eq!(rb.channel(-1), 0);
        rb.clear();
        assert_eq!(rb.channel(0), 0);
        assert!(!rb.is_active());
    }
}

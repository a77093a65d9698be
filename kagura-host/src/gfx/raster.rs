//! CPU raster backend.
//!
//! Renders the same frame the GPU backend does into an RGBA8 framebuffer:
//! clear, then for each command an indexed triangle list with nearest texture
//! sampling, tint multiply and source-over alpha blending. Coverage uses
//! edge functions evaluated at pixel centres.

use crate::error::RenderError;
use crate::gfx::quantize_unit;
use crate::gfx::recorder::{DrawCommand, FLOATS_PER_VERTEX, FrameState};
use crate::gfx::texture::{BYTES_PER_TEXEL, TextureRecord, TextureRegistry};

/// Edge function: twice the signed area of `(a, b, p)`.
#[inline]
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

#[derive(Clone, Copy, Debug)]
struct ScreenVertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

#[derive(Clone, Debug, Default)]
pub struct RasterTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterTarget {
    pub fn new(width: u32, height: u32) -> Self {
        let mut target = Self::default();
        target.resize(width, height);
        target
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major RGBA8 pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width as usize * height as usize * BYTES_PER_TEXEL];
    }

    pub fn clear(&mut self, color: [f32; 4]) {
        let rgba = color.map(quantize_unit);
        for px in self.pixels.chunks_exact_mut(BYTES_PER_TEXEL) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Render a whole frame at `width` x `height`.
    pub fn render(
        &mut self,
        frame: &FrameState,
        textures: &TextureRegistry,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::EmptySurface { width, height });
        }
        self.resize(width, height);
        self.clear(frame.clear_color);
        for command in &frame.commands {
            self.draw(command, textures.resolve(command.src_image_id()));
        }
        Ok(())
    }

    pub fn draw(&mut self, command: &DrawCommand, texture: &TextureRecord) {
        let vertex_count = command.vertex_count();
        let (w, h) = (self.width as f32, self.height as f32);
        let to_screen = |i: u32| -> Option<ScreenVertex> {
            let i = i as usize;
            if i >= vertex_count {
                return None;
            }
            let v = &command.vertex_data()[i * FLOATS_PER_VERTEX..(i + 1) * FLOATS_PER_VERTEX];
            Some(ScreenVertex {
                pos: [(v[0] + 1.0) * 0.5 * w, (1.0 - v[1]) * 0.5 * h],
                uv: [v[2], v[3]],
            })
        };

        let tint = command.uniform_color();
        for tri in command.indices().chunks_exact(3) {
            match (to_screen(tri[0]), to_screen(tri[1]), to_screen(tri[2])) {
                (Some(a), Some(b), Some(c)) => self.fill_triangle([a, b, c], texture, tint),
                _ => tracing::trace!(?tri, vertex_count, "triangle references a missing vertex; skipped"),
            }
        }
    }

    fn fill_triangle(&mut self, v: [ScreenVertex; 3], texture: &TextureRecord, tint: [f32; 4]) {
        let area = edge(v[0].pos, v[1].pos, v[2].pos);
        if area == 0.0 || !area.is_finite() {
            return;
        }
        // Normalize winding so "inside" is non-negative either way.
        let sign = area.signum();

        let min_x = v.iter().map(|p| p.pos[0]).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let max_x = v.iter().map(|p| p.pos[0]).fold(f32::NEG_INFINITY, f32::max).ceil().min(self.width as f32);
        let min_y = v.iter().map(|p| p.pos[1]).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let max_y = v.iter().map(|p| p.pos[1]).fold(f32::NEG_INFINITY, f32::max).ceil().min(self.height as f32);
        if min_x >= max_x || min_y >= max_y {
            return;
        }

        let stride = self.width as usize;
        for y in min_y as u32..max_y as u32 {
            for x in min_x as u32..max_x as u32 {
                let p = [x as f32 + 0.5, y as f32 + 0.5];
                let w0 = edge(v[1].pos, v[2].pos, p) * sign;
                let w1 = edge(v[2].pos, v[0].pos, p) * sign;
                let w2 = edge(v[0].pos, v[1].pos, p) * sign;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let total = area * sign;
                let (b0, b1, b2) = (w0 / total, w1 / total, w2 / total);
                let u = b0 * v[0].uv[0] + b1 * v[1].uv[0] + b2 * v[2].uv[0];
                let t = b0 * v[0].uv[1] + b1 * v[1].uv[1] + b2 * v[2].uv[1];

                let texel = texture.sample_nearest(u, t);
                let src = [
                    texel[0] as f32 / 255.0 * tint[0],
                    texel[1] as f32 / 255.0 * tint[1],
                    texel[2] as f32 / 255.0 * tint[2],
                    texel[3] as f32 / 255.0 * tint[3],
                ];
                let i = (y as usize * stride + x as usize) * BYTES_PER_TEXEL;
                if let Some(dst) = self.pixels.get_mut(i..i + BYTES_PER_TEXEL) {
                    blend_over(dst, src);
                }
            }
        }
    }

    /// Copy a region out of the framebuffer. Texels outside read as zero.
    pub fn read_region(&self, x: i32, y: i32, width: u32, height: u32) -> Vec<u8> {
        let mut out = vec![0; width as usize * height as usize * BYTES_PER_TEXEL];
        for row in 0..height {
            let sy = y as i64 + row as i64;
            if sy < 0 || sy >= self.height as i64 {
                continue;
            }
            for col in 0..width {
                let sx = x as i64 + col as i64;
                if sx < 0 || sx >= self.width as i64 {
                    continue;
                }
                let src = (sy as usize * self.width as usize + sx as usize) * BYTES_PER_TEXEL;
                let dst = (row as usize * width as usize + col as usize) * BYTES_PER_TEXEL;
                out[dst..dst + BYTES_PER_TEXEL].copy_from_slice(&self.pixels[src..src + BYTES_PER_TEXEL]);
            }
        }
        out
    }
}

/// Straight-alpha source-over, matching the GPU pipeline's blend state.
fn blend_over(dst: &mut [u8], src: [f32; 4]) {
    let a = src[3].clamp(0.0, 1.0);
    for c in 0..3 {
        let d = dst[c] as f32 / 255.0;
        dst[c] = quantize_unit(src[c] * a + d * (1.0 - a));
    }
    let da = dst[3] as f32 / 255.0;
    dst[3] = quantize_unit(a + da * (1.0 - a));
}

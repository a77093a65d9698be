#![cfg_attr(not(feature = "std"), no_std)]

//! kagura-sdk
//!
//! Used by **guest** WASM apps that run inside `kagura-host`.
//!
//! ABI model (numeric streaming):
//! - The host owns the surface, the GPU/raster backends and the audio graph.
//! - The guest streams draw commands, texture texels and audio samples one
//!   value per call.
//! - The guest exports `kagura_frame` (required) and optionally `_start`,
//!   `kagura_audio(frames)` and `kagura_on_shutdown`.

/// Low-level raw ABI imports.
pub mod sys {
    #[link(wasm_import_module = "env")]
    unsafe extern "C" {
        // Surface
        #[link_name = "kagura_prepare_surface"]
        pub fn prepare_surface(fallback_width: i32, fallback_height: i32) -> i32;
        #[link_name = "kagura_surface_kind"]
        pub fn surface_kind() -> i32;
        #[link_name = "kagura_surface_id"]
        pub fn surface_id() -> i32;
        #[link_name = "kagura_surface_width"]
        pub fn surface_width() -> i32;
        #[link_name = "kagura_surface_height"]
        pub fn surface_height() -> i32;
        #[link_name = "kagura_surface_dpr"]
        pub fn surface_dpr() -> f64;
        #[link_name = "kagura_should_close"]
        pub fn should_close() -> i32;

        // Graphics
        #[link_name = "kagura_gfx_try_initialize"]
        pub fn gfx_try_initialize(kind: i32, width: i32, height: i32) -> i32;
        #[link_name = "kagura_gfx_begin"]
        pub fn gfx_begin(kind: i32, r: f32, g: f32, b: f32, a: f32);
        #[link_name = "kagura_gfx_draw_begin"]
        pub fn gfx_draw_begin(vertex_count: i32, index_count: i32, image_id: i32, r: i32, g: i32, b: i32, a: i32);
        #[link_name = "kagura_gfx_draw_vertex"]
        pub fn gfx_draw_vertex(offset: i32, x: f32, y: f32, u: f32, v: f32);
        #[link_name = "kagura_gfx_draw_index"]
        pub fn gfx_draw_index(offset: i32, value: i32);
        #[link_name = "kagura_gfx_draw_end"]
        pub fn gfx_draw_end();
        #[link_name = "kagura_gfx_upload_texture_begin"]
        pub fn gfx_upload_texture_begin(image_id: i32, width: i32, height: i32);
        #[link_name = "kagura_gfx_upload_texture_pixel"]
        pub fn gfx_upload_texture_pixel(offset: i32, r: i32, g: i32, b: i32, a: i32);
        #[link_name = "kagura_gfx_upload_texture_end"]
        pub fn gfx_upload_texture_end();
        #[link_name = "kagura_gfx_end"]
        pub fn gfx_end(kind: i32, present: i32);
        #[link_name = "kagura_gfx_read_pixels_begin"]
        pub fn gfx_read_pixels_begin(kind: i32, x: i32, y: i32, w: i32, h: i32) -> i32;
        #[link_name = "kagura_gfx_read_pixels_channel"]
        pub fn gfx_read_pixels_channel(offset: i32) -> i32;
        #[link_name = "kagura_gfx_read_pixels_end"]
        pub fn gfx_read_pixels_end();
        #[link_name = "kagura_shutdown"]
        pub fn shutdown();

        // Audio
        #[link_name = "kagura_audio_try_initialize"]
        pub fn audio_try_initialize(sample_rate: i32, channels: i32) -> i32;
        #[link_name = "kagura_audio_write_frame"]
        pub fn audio_write_frame(channel: i32, sample: f32);
        #[link_name = "kagura_audio_write_end"]
        pub fn audio_write_end(frames: i32) -> i32;
        #[link_name = "kagura_audio_suspend"]
        pub fn audio_suspend();
        #[link_name = "kagura_audio_resume"]
        pub fn audio_resume();
        #[link_name = "kagura_audio_close"]
        pub fn audio_close();
        #[link_name = "kagura_audio_output_latency"]
        pub fn audio_output_latency() -> f64;

        // Diagnostics
        #[link_name = "kagura_log"]
        pub fn log(ptr: i32, len: i32);
    }

    #[link(wasm_import_module = "spectest")]
    unsafe extern "C" {
        pub fn print_char(c: i32);
    }
}

/// Which backend a frame asks for.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Backend {
    /// Use the GPU when the host has one, else raster.
    GpuPreferred = 1,
    RasterOnly = 2,
}

/// Backend the host is currently presenting with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SurfaceKind {
    None,
    Gpu,
    Raster,
}

impl SurfaceKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => SurfaceKind::Gpu,
            2 => SurfaceKind::Raster,
            _ => SurfaceKind::None,
        }
    }
}

/// 8-bit RGBA color, as the draw and texture calls take it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Channels as the 0..1 floats `gfx_begin` takes.
    pub fn to_unit(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a].map(|c| c as f32 / 255.0)
    }
}

/// Position in NDC (y up) plus texture coordinates (origin top-left).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub u: f32,
    pub v: f32,
}

impl Vertex {
    pub const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self { x, y, u, v }
    }
}

/// Surface API.
pub mod surface {
    use super::{SurfaceKind, sys};

    /// Resolve and size the surface. Returns true on success.
    pub fn prepare(fallback_width: i32, fallback_height: i32) -> bool {
        unsafe { sys::prepare_surface(fallback_width, fallback_height) != 0 }
    }

    pub fn kind() -> SurfaceKind {
        SurfaceKind::from_code(unsafe { sys::surface_kind() })
    }

    pub fn id() -> i32 {
        unsafe { sys::surface_id() }
    }

    /// Backing size in physical pixels.
    pub fn size() -> (i32, i32) {
        unsafe { (sys::surface_width(), sys::surface_height()) }
    }

    pub fn device_pixel_ratio() -> f64 {
        unsafe { sys::surface_dpr() }
    }

    pub fn should_close() -> bool {
        unsafe { sys::should_close() != 0 }
    }
}

/// Graphics API.
pub mod gfx {
    use super::{Backend, Rgba, Vertex, sys};

    /// Ask for a backend. GPU acquisition is asynchronous: keep calling once
    /// per frame until it returns true.
    pub fn try_initialize(backend: Backend, width: i32, height: i32) -> bool {
        unsafe { sys::gfx_try_initialize(backend as i32, width, height) != 0 }
    }

    pub fn begin(backend: Backend, clear: Rgba) {
        let [r, g, b, a] = clear.to_unit();
        unsafe { sys::gfx_begin(backend as i32, r, g, b, a) }
    }

    /// Stream one indexed triangle list.
    pub fn draw(vertices: &[Vertex], indices: &[u32], image_id: i32, tint: Rgba) {
        unsafe {
            sys::gfx_draw_begin(
                vertices.len() as i32,
                indices.len() as i32,
                image_id,
                tint.r as i32,
                tint.g as i32,
                tint.b as i32,
                tint.a as i32,
            );
            for (i, v) in vertices.iter().enumerate() {
                sys::gfx_draw_vertex(i as i32, v.x, v.y, v.u, v.v);
            }
            for (i, index) in indices.iter().enumerate() {
                sys::gfx_draw_index(i as i32, *index as i32);
            }
            sys::gfx_draw_end();
        }
    }

    /// Stream a `width * height` RGBA texture (4 bytes per texel, row-major).
    pub fn upload_texture(image_id: i32, width: i32, height: i32, rgba: &[u8]) {
        unsafe {
            sys::gfx_upload_texture_begin(image_id, width, height);
            for (i, px) in rgba.chunks_exact(4).enumerate() {
                sys::gfx_upload_texture_pixel(i as i32, px[0] as i32, px[1] as i32, px[2] as i32, px[3] as i32);
            }
            sys::gfx_upload_texture_end();
        }
    }

    /// Finish the frame; `present = false` discards it.
    pub fn end(backend: Backend, present: bool) {
        unsafe { sys::gfx_end(backend as i32, present as i32) }
    }

    /// Read one pixel of the last presented frame. `None` when read-back is
    /// unsupported or nothing is there.
    pub fn read_pixel(backend: Backend, x: i32, y: i32) -> Option<Rgba> {
        unsafe {
            let len = sys::gfx_read_pixels_begin(backend as i32, x, y, 1, 1);
            let px = (len == 4).then(|| {
                let c = |i| sys::gfx_read_pixels_channel(i) as u8;
                Rgba::new(c(0), c(1), c(2), c(3))
            });
            sys::gfx_read_pixels_end();
            px
        }
    }

    pub fn shutdown() {
        unsafe { sys::shutdown() }
    }
}

/// Audio API.
pub mod audio {
    use super::sys;

    pub fn try_initialize(sample_rate: i32, channels: i32) -> bool {
        unsafe { sys::audio_try_initialize(sample_rate, channels) != 0 }
    }

    /// Write interleaved frames (`channels` samples each) and commit them.
    /// Returns the frames the host accepted.
    pub fn write(interleaved: &[f32], channels: usize) -> i32 {
        if channels == 0 {
            return 0;
        }
        let frames = interleaved.len() / channels;
        unsafe {
            for frame in interleaved.chunks_exact(channels) {
                for (ch, sample) in frame.iter().enumerate() {
                    sys::audio_write_frame(ch as i32, *sample);
                }
            }
            sys::audio_write_end(frames as i32)
        }
    }

    pub fn suspend() {
        unsafe { sys::audio_suspend() }
    }

    pub fn resume() {
        unsafe { sys::audio_resume() }
    }

    pub fn close() {
        unsafe { sys::audio_close() }
    }

    /// Output latency in seconds.
    pub fn output_latency() -> f64 {
        unsafe { sys::audio_output_latency() }
    }
}

/// System API.
pub mod system {
    use super::sys;

    /// Log a message to the host console.
    pub fn log(message: &str) {
        unsafe { sys::log(message.as_ptr() as i32, message.len() as i32) }
    }

    /// Append text to the host's captured output, one character per call.
    pub fn print(text: &str) {
        for c in text.chars() {
            unsafe { sys::print_char(c as i32) }
        }
    }
}

/// Convenience prelude for guest apps.
pub mod prelude {
    pub use crate::audio;
    pub use crate::gfx;
    pub use crate::surface;
    pub use crate::system;
    pub use crate::{Backend, Rgba, SurfaceKind, Vertex};
}

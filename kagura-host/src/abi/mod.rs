//! kagura host/guest ABI.
//!
//! The contract between:
//! - **Host**: `kagura-host` (this crate)
//! - **Guest**: the compiled game module
//!
//! ## Numeric-only surface
//! Every import takes and returns plain numbers. The guest streams work to
//! the host one value at a time: a draw command is `draw_begin`, one
//! `draw_vertex` per vertex, one `draw_index` per index, then `draw_end`.
//! Texture bytes and audio samples are streamed the same way. No guest
//! pointers cross the boundary except in the optional `kagura_log`.
//!
//! ## Imports (guest -> host)
//! Imported from module `"env"` unless noted.
//!
//! ### Surface
//! - `kagura_prepare_surface(fallback_w: i32, fallback_h: i32) -> i32`
//! - `kagura_surface_kind() -> i32` (0 none, 1 gpu, 2 raster)
//! - `kagura_surface_id() -> i32`, `kagura_surface_width() -> i32`,
//!   `kagura_surface_height() -> i32`, `kagura_surface_dpr() -> f64`
//! - `kagura_should_close() -> i32` (always 0)
//!
//! ### Graphics
//! - `kagura_gfx_try_initialize(kind, w, h) -> i32` (kind 1 prefer GPU, 2 raster)
//! - `kagura_gfx_begin(kind: i32, r: f32, g: f32, b: f32, a: f32)` clear color in 0..1
//! - `kagura_gfx_draw_begin(vertex_count, index_count, image_id, r, g, b, a)` channels 0-255
//! - `kagura_gfx_draw_vertex(offset: i32, x: f32, y: f32, u: f32, v: f32)`
//! - `kagura_gfx_draw_index(offset: i32, value: i32)`
//! - `kagura_gfx_draw_end()`
//! - `kagura_gfx_upload_texture_begin(image_id, w, h)`,
//!   `kagura_gfx_upload_texture_pixel(offset, r, g, b, a)`,
//!   `kagura_gfx_upload_texture_end()`
//! - `kagura_gfx_end(kind: i32, present: i32)`
//! - `kagura_gfx_read_pixels_begin(kind, x, y, w, h) -> i32`,
//!   `kagura_gfx_read_pixels_channel(offset) -> i32`,
//!   `kagura_gfx_read_pixels_end()`
//! - `kagura_shutdown()`
//!
//! ### Audio
//! - `kagura_audio_try_initialize(sample_rate: i32, channels: i32) -> i32`
//! - `kagura_audio_write_frame(channel: i32, sample: f32)`
//! - `kagura_audio_write_end(frames: i32) -> i32`
//! - `kagura_audio_suspend()`, `kagura_audio_resume()`, `kagura_audio_close()`
//! - `kagura_audio_output_latency() -> f64`
//!
//! ### Diagnostics
//! - `kagura_log(ptr: i32, len: i32)` UTF-8 text from guest memory
//! - `spectest.print_char(c: i32)` appends one character to the run output
//!
//! ## Exports (host -> guest)
//! - `kagura_frame()` **required**, called once per frame
//! - `_start()` optional, called once after instantiation
//! - `kagura_audio(frames: i32)` optional, called once per audio block
//! - `kagura_on_shutdown()` optional, called before teardown

use wasmtime::{AsContextMut, Instance, TypedFunc};

/// Import module for every bridge call.
pub const IMPORT_MODULE: &str = "env";

/// Import module of the character sink used by smoke guests.
pub const SPECTEST_MODULE: &str = "spectest";

/// Guest export names.
pub mod guest_exports {
    pub const START: &str = "_start";
    pub const FRAME: &str = "kagura_frame";
    pub const AUDIO: &str = "kagura_audio";
    pub const SHUTDOWN: &str = "kagura_on_shutdown";
    pub const MEMORY: &str = "memory";
}

/// Host import names under [`IMPORT_MODULE`].
pub mod host_imports {
    // Surface
    pub const PREPARE_SURFACE: &str = "kagura_prepare_surface";
    pub const SURFACE_KIND: &str = "kagura_surface_kind";
    pub const SURFACE_ID: &str = "kagura_surface_id";
    pub const SURFACE_WIDTH: &str = "kagura_surface_width";
    pub const SURFACE_HEIGHT: &str = "kagura_surface_height";
    pub const SURFACE_DPR: &str = "kagura_surface_dpr";
    pub const SHOULD_CLOSE: &str = "kagura_should_close";

    // Graphics
    pub const GFX_TRY_INITIALIZE: &str = "kagura_gfx_try_initialize";
    pub const GFX_BEGIN: &str = "kagura_gfx_begin";
    pub const GFX_DRAW_BEGIN: &str = "kagura_gfx_draw_begin";
    pub const GFX_DRAW_VERTEX: &str = "kagura_gfx_draw_vertex";
    pub const GFX_DRAW_INDEX: &str = "kagura_gfx_draw_index";
    pub const GFX_DRAW_END: &str = "kagura_gfx_draw_end";
    pub const GFX_UPLOAD_TEXTURE_BEGIN: &str = "kagura_gfx_upload_texture_begin";
    pub const GFX_UPLOAD_TEXTURE_PIXEL: &str = "kagura_gfx_upload_texture_pixel";
    pub const GFX_UPLOAD_TEXTURE_END: &str = "kagura_gfx_upload_texture_end";
    pub const GFX_END: &str = "kagura_gfx_end";
    pub const GFX_READ_PIXELS_BEGIN: &str = "kagura_gfx_read_pixels_begin";
    pub const GFX_READ_PIXELS_CHANNEL: &str = "kagura_gfx_read_pixels_channel";
    pub const GFX_READ_PIXELS_END: &str = "kagura_gfx_read_pixels_end";
    pub const SHUTDOWN: &str = "kagura_shutdown";

    // Audio
    pub const AUDIO_TRY_INITIALIZE: &str = "kagura_audio_try_initialize";
    pub const AUDIO_WRITE_FRAME: &str = "kagura_audio_write_frame";
    pub const AUDIO_WRITE_END: &str = "kagura_audio_write_end";
    pub const AUDIO_SUSPEND: &str = "kagura_audio_suspend";
    pub const AUDIO_RESUME: &str = "kagura_audio_resume";
    pub const AUDIO_CLOSE: &str = "kagura_audio_close";
    pub const AUDIO_OUTPUT_LATENCY: &str = "kagura_audio_output_latency";

    // Diagnostics
    pub const LOG: &str = "kagura_log";
    pub const PRINT_CHAR: &str = "print_char";
}

/// Longest string accepted from `kagura_log`.
pub const MAX_LOG_BYTES: usize = 64 * 1024;

/// Helpers for validating guest exports.
pub mod validate {
    use super::guest_exports;
    use wasmtime::{AsContextMut, Instance};

    #[derive(Debug, thiserror::Error)]
    pub enum MissingExport {
        #[error("guest does not export `{}`", guest_exports::FRAME)]
        Frame,
    }

    /// Currently required: `kagura_frame`.
    pub fn required_exports_present(instance: &Instance, mut store: impl AsContextMut) -> Result<(), MissingExport> {
        if instance.get_func(&mut store, guest_exports::FRAME).is_none() {
            return Err(MissingExport::Frame);
        }
        Ok(())
    }
}

/// A guest's entrypoints, resolved once after instantiation.
#[derive(Clone)]
pub struct GuestEntrypoints {
    pub start: Option<TypedFunc<(), ()>>,
    pub frame: TypedFunc<(), ()>,
    pub audio: Option<TypedFunc<i32, ()>>,
    pub shutdown: Option<TypedFunc<(), ()>>,
}

impl GuestEntrypoints {
    /// Resolve entrypoints. Fails only when `kagura_frame` is missing or an
    /// export has the wrong signature.
    pub fn resolve(instance: &Instance, mut store: impl AsContextMut) -> anyhow::Result<Self> {
        let frame = instance.get_typed_func::<(), ()>(&mut store, guest_exports::FRAME)?;
        let start = optional(instance, &mut store, guest_exports::START)?;
        let audio = optional(instance, &mut store, guest_exports::AUDIO)?;
        let shutdown = optional(instance, &mut store, guest_exports::SHUTDOWN)?;
        Ok(Self {
            start,
            frame,
            audio,
            shutdown,
        })
    }
}

fn optional<P, R>(instance: &Instance, mut store: impl AsContextMut, name: &str) -> anyhow::Result<Option<TypedFunc<P, R>>>
where
    P: wasmtime::WasmParams,
    R: wasmtime::WasmResults,
{
    match instance.get_func(&mut store, name) {
        Some(func) => Ok(Some(func.typed::<P, R>(&store)?)),
        None => Ok(None),
    }
}

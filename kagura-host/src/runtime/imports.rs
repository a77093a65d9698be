//! Host import definitions.
//!
//! Every handler is a thin shim: it pulls the [`Bridge`] out of the store
//! and forwards the numbers. Nothing here can fail from the guest's point of
//! view; a call the bridge cannot honour is a no-op or a failure code.

use crate::abi::{IMPORT_MODULE, MAX_LOG_BYTES, SPECTEST_MODULE, guest_exports, host_imports};
use crate::bridge::Bridge;
use crate::gfx::backend::DeviceSource;

use wasmtime::{Caller, Linker};

/// Define every host import under `"env"` plus `spectest.print_char`.
///
/// Must be called before instantiating the module.
pub fn define_imports<S: DeviceSource + 'static>(linker: &mut Linker<Bridge<S>>) -> anyhow::Result<()> {
    define_surface(linker)?;
    define_gfx(linker)?;
    define_audio(linker)?;
    define_diagnostics(linker)?;
    Ok(())
}

fn define_surface<S: DeviceSource + 'static>(linker: &mut Linker<Bridge<S>>) -> anyhow::Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::PREPARE_SURFACE,
        |mut caller: Caller<'_, Bridge<S>>, w: i32, h: i32| -> i32 { caller.data_mut().prepare_surface(w, h) },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SURFACE_KIND,
        |caller: Caller<'_, Bridge<S>>| -> i32 { caller.data().surface_kind() },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SURFACE_ID,
        |caller: Caller<'_, Bridge<S>>| -> i32 { caller.data().surface_id() },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SURFACE_WIDTH,
        |caller: Caller<'_, Bridge<S>>| -> i32 { caller.data().surface_width() },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SURFACE_HEIGHT,
        |caller: Caller<'_, Bridge<S>>| -> i32 { caller.data().surface_height() },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SURFACE_DPR,
        |caller: Caller<'_, Bridge<S>>| -> f64 { caller.data().surface_dpr() },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SHOULD_CLOSE,
        |caller: Caller<'_, Bridge<S>>| -> i32 { caller.data().should_close() },
    )?;
    Ok(())
}

fn define_gfx<S: DeviceSource + 'static>(linker: &mut Linker<Bridge<S>>) -> anyhow::Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_TRY_INITIALIZE,
        |mut caller: Caller<'_, Bridge<S>>, kind: i32, w: i32, h: i32| -> i32 {
            caller.data_mut().gfx_try_initialize(kind, w, h)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_BEGIN,
        |mut caller: Caller<'_, Bridge<S>>, kind: i32, r: f32, g: f32, b: f32, a: f32| {
            caller.data_mut().gfx_begin(kind, r, g, b, a);
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_DRAW_BEGIN,
        |mut caller: Caller<'_, Bridge<S>>, vc: i32, ic: i32, image: i32, r: i32, g: i32, b: i32, a: i32| {
            caller.data_mut().gfx_draw_begin(vc, ic, image, r, g, b, a);
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_DRAW_VERTEX,
        |mut caller: Caller<'_, Bridge<S>>, offset: i32, x: f32, y: f32, u: f32, v: f32| {
            caller.data_mut().gfx_draw_vertex(offset, x, y, u, v);
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_DRAW_INDEX,
        |mut caller: Caller<'_, Bridge<S>>, offset: i32, value: i32| {
            caller.data_mut().gfx_draw_index(offset, value);
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_DRAW_END,
        |mut caller: Caller<'_, Bridge<S>>| caller.data_mut().gfx_draw_end(),
    )?;

    // --- Textures ---
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_UPLOAD_TEXTURE_BEGIN,
        |mut caller: Caller<'_, Bridge<S>>, image: i32, w: i32, h: i32| {
            caller.data_mut().gfx_upload_texture_begin(image, w, h);
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_UPLOAD_TEXTURE_PIXEL,
        |mut caller: Caller<'_, Bridge<S>>, offset: i32, r: i32, g: i32, b: i32, a: i32| {
            caller.data_mut().gfx_upload_texture_pixel(offset, r, g, b, a);
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_UPLOAD_TEXTURE_END,
        |mut caller: Caller<'_, Bridge<S>>| caller.data_mut().gfx_upload_texture_end(),
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_END,
        |mut caller: Caller<'_, Bridge<S>>, kind: i32, present: i32| {
            caller.data_mut().gfx_end(kind, present);
        },
    )?;

    // --- Read-back ---
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_READ_PIXELS_BEGIN,
        |mut caller: Caller<'_, Bridge<S>>, kind: i32, x: i32, y: i32, w: i32, h: i32| -> i32 {
            caller.data_mut().gfx_read_pixels_begin(kind, x, y, w, h)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_READ_PIXELS_CHANNEL,
        |caller: Caller<'_, Bridge<S>>, offset: i32| -> i32 { caller.data().gfx_read_pixels_channel(offset) },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::GFX_READ_PIXELS_END,
        |mut caller: Caller<'_, Bridge<S>>| caller.data_mut().gfx_read_pixels_end(),
    )?;

    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::SHUTDOWN,
        |mut caller: Caller<'_, Bridge<S>>| caller.data_mut().shutdown(),
    )?;
    Ok(())
}

fn define_audio<S: DeviceSource + 'static>(linker: &mut Linker<Bridge<S>>) -> anyhow::Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::AUDIO_TRY_INITIALIZE,
        |mut caller: Caller<'_, Bridge<S>>, rate: i32, channels: i32| -> i32 {
            caller.data_mut().audio_try_initialize(rate, channels)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::AUDIO_WRITE_FRAME,
        |mut caller: Caller<'_, Bridge<S>>, channel: i32, sample: f32| {
            caller.data_mut().audio_write_frame(channel, sample);
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::AUDIO_WRITE_END,
        |mut caller: Caller<'_, Bridge<S>>, frames: i32| -> i32 { caller.data_mut().audio_write_end(frames) },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::AUDIO_SUSPEND,
        |mut caller: Caller<'_, Bridge<S>>| caller.data_mut().audio_suspend(),
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::AUDIO_RESUME,
        |mut caller: Caller<'_, Bridge<S>>| caller.data_mut().audio_resume(),
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::AUDIO_CLOSE,
        |mut caller: Caller<'_, Bridge<S>>| caller.data_mut().audio_close(),
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::AUDIO_OUTPUT_LATENCY,
        |mut caller: Caller<'_, Bridge<S>>| -> f64 { caller.data_mut().audio_output_latency() },
    )?;
    Ok(())
}

fn define_diagnostics<S: DeviceSource + 'static>(linker: &mut Linker<Bridge<S>>) -> anyhow::Result<()> {
    linker.func_wrap(
        SPECTEST_MODULE,
        host_imports::PRINT_CHAR,
        |mut caller: Caller<'_, Bridge<S>>, code: i32| caller.data_mut().print_char(code),
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        host_imports::LOG,
        |mut caller: Caller<'_, Bridge<S>>, ptr: i32, len: i32| match read_guest_str(&mut caller, ptr, len) {
            Some(text) => caller.data().log(&text),
            None => tracing::debug!(ptr, len, "kagura_log with an invalid range; ignored"),
        },
    )?;
    Ok(())
}

/// Read `len` bytes of guest memory at `ptr` as lossy UTF-8. Long messages
/// are truncated to [`MAX_LOG_BYTES`].
fn read_guest_str<S: DeviceSource + 'static>(caller: &mut Caller<'_, Bridge<S>>, ptr: i32, len: i32) -> Option<String> {
    let memory = caller
        .get_export(guest_exports::MEMORY)
        .and_then(|e| e.into_memory())?;
    let start = usize::try_from(ptr).ok()?;
    let len = usize::try_from(len).ok()?.min(MAX_LOG_BYTES);
    let bytes = memory.data(&*caller).get(start..start.checked_add(len)?)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

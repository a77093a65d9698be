//! Frame renderer.
//!
//! Owns the recorder, the texture registry, both backends and the capture
//! state. `end` runs one pass on the primary backend and, if that fails,
//! exactly one more on the raster backend; a frame both reject is dropped
//! and reported as backend `none`.

use crate::config::GfxConfig;
use crate::diagnostics::FrameDiagnostics;
use crate::error::RenderError;
use crate::gfx::backend::{AcquisitionState, BackendSelector, DeviceSource, GpuBackend};
use crate::gfx::capture::{PixelReadback, downsample_nearest};
use crate::gfx::raster::RasterTarget;
use crate::gfx::recorder::{FrameState, Recorder};
use crate::gfx::texture::{BYTES_PER_TEXEL, TextureRegistry};
use crate::gfx::{BackendMode, unit_channel};
use crate::surface::{MAX_SURFACE_DIMENSION, Surface};

pub struct Graphics<S: DeviceSource> {
    selector: BackendSelector<S>,
    recorder: Recorder,
    textures: TextureRegistry,
    raster: RasterTarget,
    readback: PixelReadback,
    capture: Option<Vec<u8>>,
    capture_enabled: bool,
    capture_size: u32,
    /// Backend holding the last presented image, for read-back.
    presented_on: BackendMode,
    diagnostics: FrameDiagnostics,
}

impl<S: DeviceSource> Graphics<S> {
    pub fn new(source: S, config: &GfxConfig) -> Self {
        Self {
            selector: BackendSelector::new(source, config.force_fallback),
            recorder: Recorder::new(),
            textures: TextureRegistry::new(),
            raster: RasterTarget::default(),
            readback: PixelReadback::new(),
            capture: None,
            capture_enabled: config.capture_enabled,
            capture_size: config.capture_size.max(1),
            presented_on: BackendMode::None,
            diagnostics: FrameDiagnostics::default(),
        }
    }

    pub fn try_initialize(&mut self, kind: i32, width: i32, height: i32) -> bool {
        self.selector.try_initialize(kind, width, height)
    }

    pub fn selector(&self) -> &BackendSelector<S> {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut BackendSelector<S> {
        &mut self.selector
    }

    pub fn begin(&mut self, kind: i32, clear_color: [f32; 4]) {
        tracing::trace!(kind, ?clear_color, "gfx_begin");
        self.recorder.begin_frame(clear_color);
    }

    /// Open a draw command; color channels arrive as 0-255 integers.
    pub fn draw_begin(&mut self, vertex_count: i32, index_count: i32, src_image_id: i32, rgba: [i32; 4]) {
        self.recorder
            .draw_begin(vertex_count, index_count, src_image_id as u32, rgba.map(unit_channel));
    }

    pub fn draw_vertex(&mut self, offset: i32, vertex: [f32; 4]) {
        self.recorder.draw_vertex(offset, vertex);
    }

    pub fn draw_index(&mut self, offset: i32, value: i32) {
        self.recorder.draw_index(offset, value as u32);
    }

    pub fn draw_end(&mut self) {
        self.recorder.draw_end();
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn upload_texture_begin(&mut self, image_id: i32, width: i32, height: i32) {
        self.textures.upload_begin(image_id as u32, width, height);
    }

    pub fn upload_texture_pixel(&mut self, offset: i32, rgba: [u8; 4]) {
        self.textures.upload_pixel(offset, rgba);
    }

    /// Commit the staged texture; mirrors it to the device right away when
    /// one is ready, otherwise the device catches up at draw time.
    pub fn upload_texture_end(&mut self) {
        let Some((image_id, outcome)) = self.textures.upload_end() else {
            return;
        };
        if let (Some(device), Some(record)) = (self.selector.device_mut(), self.textures.get(image_id)) {
            device.texture_committed(image_id, record);
        }
        tracing::trace!(image_id, ?outcome, "texture upload finished");
    }

    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    /// Finish the frame. Returns the backend that presented it, or `None`
    /// when `present == 0` (nothing rendered, diagnostics untouched).
    pub fn end(&mut self, kind: i32, present: i32, surface: Option<&Surface>) -> Option<BackendMode> {
        let frame = self.recorder.take_frame();
        if present == 0 {
            tracing::trace!(commands = frame.commands.len(), "frame not presented");
            return None;
        }

        let mode = match surface {
            Some(surface) => self.render(kind, &frame, surface.width, surface.height),
            None => {
                tracing::warn!(error = %RenderError::NotReady, "no surface; frame dropped");
                BackendMode::None
            }
        };
        self.diagnostics.record(&frame, mode);
        if mode != BackendMode::None {
            self.presented_on = mode;
        }
        Some(mode)
    }

    fn render(&mut self, kind: i32, frame: &FrameState, width: u32, height: u32) -> BackendMode {
        let primary = self.selector.primary_for(kind);
        let result = match (primary, self.selector.device_mut()) {
            (BackendMode::Gpu, Some(device)) => match device.render(frame, &self.textures, width, height) {
                Ok(()) => Ok(BackendMode::Gpu),
                Err(err) => {
                    tracing::warn!(error = %err, "GPU frame failed; falling back to raster");
                    self.raster
                        .render(frame, &self.textures, width, height)
                        .map(|()| BackendMode::Raster)
                }
            },
            _ => self
                .raster
                .render(frame, &self.textures, width, height)
                .map(|()| BackendMode::Raster),
        };

        match result {
            Ok(mode) => {
                self.capture_frame(mode, width, height);
                mode
            }
            Err(err) => {
                tracing::warn!(error = %err, "frame dropped");
                BackendMode::None
            }
        }
    }

    fn capture_frame(&mut self, mode: BackendMode, width: u32, height: u32) {
        if !self.capture_enabled {
            return;
        }
        let pixels = match self.read_presented(mode, 0, 0, width, height) {
            Ok(pixels) => pixels,
            Err(err) => {
                tracing::warn!(error = %err, "frame capture failed");
                self.capture = None;
                return;
            }
        };
        self.capture = Some(downsample_nearest(&pixels, width, height, self.capture_size));
    }

    fn read_presented(&mut self, mode: BackendMode, x: i32, y: i32, w: u32, h: u32) -> Result<Vec<u8>, RenderError> {
        match mode {
            BackendMode::Gpu => match self.selector.device_mut() {
                Some(device) => device.read_pixels(x, y, w, h),
                None => Err(RenderError::NotReady),
            },
            BackendMode::Raster => Ok(self.raster.read_region(x, y, w, h)),
            BackendMode::None => Ok(vec![0; w as usize * h as usize * BYTES_PER_TEXEL]),
        }
    }

    /// Downsampled RGBA of the last presented frame.
    pub fn capture(&self) -> Option<&[u8]> {
        self.capture.as_deref()
    }

    pub fn capture_size(&self) -> u32 {
        self.capture_size
    }

    /// Start a region read-back. Returns `w*h*4`, 0 when the region is empty
    /// or no surface exists, -1 when the region is too large or the backend
    /// cannot read back.
    pub fn read_pixels_begin(&mut self, kind: i32, x: i32, y: i32, w: i32, h: i32, surface: Option<&Surface>) -> i32 {
        self.readback.clear();
        if w <= 0 || h <= 0 || surface.is_none() {
            return 0;
        }
        tracing::trace!(kind, x, y, w, h, "gfx_read_pixels_begin");
        if readback_len(w as u32, h as u32).is_none() {
            tracing::warn!(w, h, "read-back region exceeds size limit");
            return -1;
        }
        match self.read_presented(self.presented_on, x, y, w as u32, h as u32) {
            Ok(bytes) => self.readback.fill(bytes),
            Err(err) => {
                tracing::warn!(error = %err, "pixel read-back unsupported");
                -1
            }
        }
    }

    pub fn read_pixels_channel(&self, offset: i32) -> i32 {
        self.readback.channel(offset)
    }

    pub fn read_pixels_end(&mut self) {
        self.readback.clear();
    }

    pub fn diagnostics(&self) -> &FrameDiagnostics {
        &self.diagnostics
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.selector.state()
    }

    /// Destroy every backend resource and return to the initial state.
    /// Diagnostics survive so a report can still be produced.
    pub fn shutdown(&mut self) {
        self.selector.shutdown();
        self.recorder = Recorder::new();
        self.textures.clear();
        self.raster = RasterTarget::default();
        self.readback.clear();
        self.capture = None;
        self.presented_on = BackendMode::None;
        tracing::info!("graphics shut down");
    }
}

/// Byte length of a `w` x `h` read-back, or `None` past the surface limit.
fn readback_len(w: u32, h: u32) -> Option<i32> {
    if w > MAX_SURFACE_DIMENSION || h > MAX_SURFACE_DIMENSION {
        return None;
    }
    let len = (w as usize)
        .checked_mul(h as usize)?
        .checked_mul(BYTES_PER_TEXEL)?;
    i32::try_from(len).ok()
}

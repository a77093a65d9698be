//! The bridge context.
//!
//! One `Bridge` lives inside the wasmtime store and every import handler
//! reaches it through `Caller::data_mut`. Each method here matches one
//! numeric import: plain numbers in, plain numbers out, no errors. Failures
//! are logged and folded into 0 / -1 / no-op.

use crate::audio::{AudioBridge, AudioOutput};
use crate::config::BridgeConfig;
use crate::diagnostics::{RunStatus, SmokeReport};
use crate::gfx::backend::DeviceSource;
use crate::gfx::{BackendMode, Graphics, WgpuDeviceSource, byte_channel};
use crate::surface::{CanvasContext, SurfaceManager};

pub struct Bridge<S: DeviceSource = WgpuDeviceSource> {
    surfaces: SurfaceManager,
    gfx: Graphics<S>,
    audio: AudioBridge,
    /// Characters printed through `spectest.print_char`.
    output: String,
}

impl Bridge<WgpuDeviceSource> {
    /// A bridge whose GPU path is backed by `wgpu`.
    pub fn with_wgpu(config: &BridgeConfig, audio: AudioOutput) -> Self {
        let source = WgpuDeviceSource::new(config.gfx.power_preference);
        Self::new(config, source, audio)
    }
}

impl<S: DeviceSource> Bridge<S> {
    pub fn new(config: &BridgeConfig, source: S, audio: AudioOutput) -> Self {
        let mut gfx_config = config.gfx.clone();
        if !config.surface.gpu_capable && !config.surface.headless {
            // No GPU context on the canvas: never try to acquire one.
            gfx_config.force_fallback = true;
        }
        Self {
            surfaces: SurfaceManager::from_config(&config.surface),
            gfx: Graphics::new(source, &gfx_config),
            audio: AudioBridge::new(config.audio.clone(), audio),
            output: String::new(),
        }
    }

    pub fn surfaces(&self) -> &SurfaceManager {
        &self.surfaces
    }

    pub fn surfaces_mut(&mut self) -> &mut SurfaceManager {
        &mut self.surfaces
    }

    pub fn gfx(&self) -> &Graphics<S> {
        &self.gfx
    }

    pub fn gfx_mut(&mut self) -> &mut Graphics<S> {
        &mut self.gfx
    }

    pub fn audio(&self) -> &AudioBridge {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioBridge {
        &mut self.audio
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    // Surface

    pub fn prepare_surface(&mut self, fallback_width: i32, fallback_height: i32) -> i32 {
        self.surfaces.prepare(fallback_width, fallback_height) as i32
    }

    pub fn surface_kind(&self) -> i32 {
        self.surfaces.surface().map_or(0, |s| s.backend_mode.code())
    }

    pub fn surface_id(&self) -> i32 {
        self.surfaces.surface().map_or(0, |s| s.id as i32)
    }

    pub fn surface_width(&self) -> i32 {
        self.surfaces.surface().map_or(0, |s| clamp_i32(s.width))
    }

    pub fn surface_height(&self) -> i32 {
        self.surfaces.surface().map_or(0, |s| clamp_i32(s.height))
    }

    pub fn surface_dpr(&self) -> f64 {
        self.surfaces.surface().map_or(1.0, |s| s.dpr)
    }

    pub fn should_close(&self) -> i32 {
        0
    }

    // Graphics

    pub fn gfx_try_initialize(&mut self, kind: i32, width: i32, height: i32) -> i32 {
        if !self.gfx.try_initialize(kind, width, height) {
            return 0;
        }
        let mode = self.gfx.selector().mode();
        self.adopt_backend(mode);
        1
    }

    pub fn gfx_begin(&mut self, kind: i32, r: f32, g: f32, b: f32, a: f32) {
        self.gfx.begin(kind, [r, g, b, a]);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn gfx_draw_begin(&mut self, vertex_count: i32, index_count: i32, image_id: i32, r: i32, g: i32, b: i32, a: i32) {
        self.gfx.draw_begin(vertex_count, index_count, image_id, [r, g, b, a]);
    }

    pub fn gfx_draw_vertex(&mut self, offset: i32, x: f32, y: f32, u: f32, v: f32) {
        self.gfx.draw_vertex(offset, [x, y, u, v]);
    }

    pub fn gfx_draw_index(&mut self, offset: i32, value: i32) {
        self.gfx.draw_index(offset, value);
    }

    pub fn gfx_draw_end(&mut self) {
        self.gfx.draw_end();
    }

    pub fn gfx_upload_texture_begin(&mut self, image_id: i32, width: i32, height: i32) {
        self.gfx.upload_texture_begin(image_id, width, height);
    }

    pub fn gfx_upload_texture_pixel(&mut self, offset: i32, r: i32, g: i32, b: i32, a: i32) {
        self.gfx
            .upload_texture_pixel(offset, [r, g, b, a].map(byte_channel));
    }

    pub fn gfx_upload_texture_end(&mut self) {
        self.gfx.upload_texture_end();
    }

    pub fn gfx_end(&mut self, kind: i32, present: i32) {
        if present != 0 {
            // Pick up CSS or dpr changes since the last frame.
            if self.surfaces.surface().is_some() {
                self.surfaces.revalidate();
            }
        }
        let surface = self.surfaces.surface().copied();
        if let Some(mode) = self.gfx.end(kind, present, surface.as_ref()) {
            tracing::trace!(%mode, "frame finished");
            if mode != BackendMode::None {
                self.adopt_backend(mode);
            }
        }
    }

    pub fn gfx_read_pixels_begin(&mut self, kind: i32, x: i32, y: i32, w: i32, h: i32) -> i32 {
        let surface = self.surfaces.surface().copied();
        self.gfx.read_pixels_begin(kind, x, y, w, h, surface.as_ref())
    }

    pub fn gfx_read_pixels_channel(&self, offset: i32) -> i32 {
        self.gfx.read_pixels_channel(offset)
    }

    pub fn gfx_read_pixels_end(&mut self) {
        self.gfx.read_pixels_end();
    }

    /// Tear down graphics, the surface binding and audio.
    pub fn shutdown(&mut self) {
        self.gfx.shutdown();
        self.surfaces.shutdown();
        self.audio.close();
        tracing::info!("bridge shut down");
    }

    fn adopt_backend(&mut self, mode: BackendMode) {
        self.surfaces.set_backend_mode(mode);
        let context = match mode {
            BackendMode::Gpu => CanvasContext::Gpu,
            BackendMode::Raster => CanvasContext::Raster,
            BackendMode::None => CanvasContext::Unconfigured,
        };
        self.surfaces.configure_context(context);
    }

    // Audio

    pub fn audio_try_initialize(&mut self, sample_rate: i32, channels: i32) -> i32 {
        self.audio.try_initialize(sample_rate, channels) as i32
    }

    pub fn audio_write_frame(&mut self, channel: i32, sample: f32) {
        self.audio.write_frame(channel, sample);
    }

    pub fn audio_write_end(&mut self, frames: i32) -> i32 {
        self.audio.write_end(frames)
    }

    pub fn audio_suspend(&mut self) {
        self.audio.suspend();
    }

    pub fn audio_resume(&mut self) {
        self.audio.resume();
    }

    pub fn audio_close(&mut self) {
        self.audio.close();
    }

    pub fn audio_output_latency(&mut self) -> f64 {
        self.audio.output_latency()
    }

    // Diagnostics

    pub fn print_char(&mut self, code: i32) {
        let ch = u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        self.output.push(ch);
    }

    pub fn log(&self, message: &str) {
        tracing::info!(target: "kagura::guest", "{message}");
    }

    /// Snapshot of everything observable about the run so far.
    pub fn report(&self) -> SmokeReport {
        SmokeReport {
            status: RunStatus::Running,
            output: self.output.clone(),
            force_fallback: self.gfx.selector().force_fallback(),
            frames_run: 0,
            frame: self.gfx.diagnostics().clone(),
            capture_bytes: self.gfx.capture().map_or(0, <[u8]>::len),
            audio_path: self.audio.path().map(|p| p.as_str().to_string()),
            audio_frames_written: self.audio.frames_written(),
            error: None,
        }
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CaptureSink;
    use crate::config::AudioConfig;
    use crate::gfx::backend::tests::{FakeSource, Outcome};
    use crate::surface::MAX_SURFACE_DIMENSION;

    fn config(headless: bool) -> BridgeConfig {
        let mut cfg = BridgeConfig::default();
        cfg.surface.headless = headless;
        cfg.surface.css_width = 300.0;
        cfg.surface.css_height = 150.0;
        cfg.audio = AudioConfig {
            block_frames: 8,
            worklet_upgrade: false,
            ..AudioConfig::default()
        };
        cfg
    }

    fn bridge(outcome: Outcome) -> Bridge<FakeSource> {
        Bridge::new(&config(false), FakeSource::new(outcome), AudioOutput::Null)
    }

    fn smoke_triangle<S: DeviceSource>(b: &mut Bridge<S>) {
        b.gfx_draw_begin(3, 3, 801, 0, 0, 0, 0);
        b.gfx_draw_vertex(0, -1.0, -1.0, 0.0, 1.0);
        b.gfx_draw_vertex(1, 1.0, -1.0, 1.0, 1.0);
        b.gfx_draw_vertex(2, 1.0, 1.0, 1.0, 0.0);
        for i in 0..3 {
            b.gfx_draw_index(i, i);
        }
        b.gfx_draw_end();
    }

    #[test]
    fn surface_queries_before_prepare_are_zero() {
        let b = bridge(Outcome::Ready);
        assert_eq!(b.surface_kind(), 0);
        assert_eq!(b.surface_id(), 0);
        assert_eq!(b.surface_width(), 0);
        assert_eq!(b.surface_height(), 0);
        assert_eq!(b.surface_dpr(), 1.0);
        assert_eq!(b.should_close(), 0);
    }

    #[test]
    fn gpu_frame_reports_gpu_kind_and_configures_context() {
        let mut b = bridge(Outcome::Ready);
        assert_eq!(b.prepare_surface(64, 64), 1);
        assert_eq!(b.surface_id(), 1001);
        assert_eq!((b.surface_width(), b.surface_height()), (300, 150));

        assert_eq!(b.gfx_try_initialize(1, 300, 150), 0);
        assert_eq!(b.gfx_try_initialize(1, 300, 150), 1);
        assert_eq!(b.surface_kind(), 1);
        assert_eq!(b.surfaces_mut().context(), CanvasContext::Gpu);

        b.gfx_begin(1, 0.0, 0.0, 0.0, 1.0);
        smoke_triangle(&mut b);
        b.gfx_end(1, 1);

        let report = b.report();
        assert_eq!(report.frame.backend_mode, BackendMode::Gpu);
        assert_eq!(report.capture_bytes, 64 * 64 * 4);
        assert_eq!(report.frame.payload.unwrap().texture_seed, 801);
    }

    #[test]
    fn broken_gpu_frame_falls_back_and_switches_context() {
        let mut b = bridge(Outcome::Broken);
        b.prepare_surface(64, 64);
        b.gfx_try_initialize(1, 64, 64);
        assert_eq!(b.gfx_try_initialize(1, 64, 64), 1);
        b.gfx_begin(1, 0.0, 0.0, 0.0, 1.0);
        smoke_triangle(&mut b);
        b.gfx_end(1, 1);
        assert_eq!(b.surface_kind(), 2);
        assert_eq!(b.surfaces_mut().context(), CanvasContext::Raster);
    }

    #[test]
    fn canvas_without_gpu_forces_fallback() {
        let mut cfg = config(false);
        cfg.surface.gpu_capable = false;
        let mut b = Bridge::new(&cfg, FakeSource::new(Outcome::Ready), AudioOutput::Null);
        b.prepare_surface(64, 64);
        assert_eq!(b.gfx_try_initialize(1, 64, 64), 1);
        assert_eq!(b.surface_kind(), 2);
        assert!(b.report().force_fallback);
    }

    #[test]
    fn read_pixels_after_raster_frame() {
        let mut b = Bridge::new(&config(true), FakeSource::new(Outcome::NoAdapter), AudioOutput::Null);
        assert_eq!(b.prepare_surface(8, 8), 1);
        assert_eq!(b.gfx_try_initialize(2, 8, 8), 1);
        b.gfx_begin(2, 1.0, 0.0, 0.0, 1.0);
        b.gfx_end(2, 1);

        assert_eq!(b.gfx_read_pixels_begin(2, 0, 0, 2, 2), 16);
        assert_eq!(b.gfx_read_pixels_channel(0), 255);
        assert_eq!(b.gfx_read_pixels_channel(1), 0);
        assert_eq!(b.gfx_read_pixels_channel(3), 255);
        b.gfx_read_pixels_end();
        assert_eq!(b.gfx_read_pixels_channel(0), 0);
    }

    #[test]
    fn texture_channels_are_clamped_at_the_boundary() {
        let mut b = bridge(Outcome::NoAdapter);
        b.gfx_upload_texture_begin(5, 1, 1);
        b.gfx_upload_texture_pixel(0, 300, -4, 128, 255);
        b.gfx_upload_texture_end();
        let record = b.gfx().textures().get(5).unwrap();
        assert_eq!(record.texels, vec![255, 0, 128, 255]);
    }

    #[test]
    fn css_resize_is_picked_up_at_frame_end() {
        let mut b = bridge(Outcome::NoAdapter);
        b.prepare_surface(1, 1);
        b.gfx_try_initialize(2, 1, 1);
        b.surfaces_mut()
            .document_mut()
            .unwrap()
            .query_canvas("#app")
            .unwrap()
            .set_css_size(100.0, 40.0);
        b.gfx_begin(2, 0.0, 0.0, 0.0, 1.0);
        b.gfx_end(2, 1);
        assert_eq!((b.surface_width(), b.surface_height()), (100, 40));
        assert_eq!(b.surface_id(), 1001);
    }

    #[test]
    fn zero_css_surface_keeps_its_size_across_frames() {
        let mut cfg = config(false);
        cfg.surface.css_width = 0.0;
        cfg.surface.css_height = 0.0;
        cfg.surface.device_pixel_ratio = 2.0;
        let mut b = Bridge::new(&cfg, FakeSource::new(Outcome::NoAdapter), AudioOutput::Null);
        assert_eq!(b.prepare_surface(8, 8), 1);
        b.gfx_try_initialize(2, 8, 8);

        let mut sizes = vec![(b.surface_width(), b.surface_height())];
        for _ in 0..4 {
            b.gfx_begin(2, 0.0, 0.0, 0.0, 1.0);
            b.gfx_end(2, 1);
            sizes.push((b.surface_width(), b.surface_height()));
        }
        assert!(sizes.iter().all(|&size| size == (16, 16)), "{sizes:?}");
        assert_eq!(b.report().frame.presented_frames, 4);
    }

    #[test]
    fn guest_sizes_past_the_limits_fail_softly() {
        let mut b = Bridge::new(&config(true), FakeSource::new(Outcome::NoAdapter), AudioOutput::Null);
        assert_eq!(b.prepare_surface(16, 16), 1);
        b.gfx_try_initialize(2, 16, 16);
        b.gfx_begin(2, 0.0, 0.0, 0.0, 1.0);
        b.gfx_draw_begin(i32::MAX, i32::MAX, 0, 255, 255, 255, 255);
        b.gfx_draw_vertex(0, 0.0, 0.0, 0.0, 0.0);
        b.gfx_draw_end();
        b.gfx_end(2, 1);
        assert_eq!(b.report().frame.last_region_count, 0);

        assert_eq!(b.gfx_read_pixels_begin(2, 0, 0, i32::MAX, i32::MAX), -1);
        assert_eq!(b.gfx_read_pixels_begin(2, 0, 0, 16, 16), 16 * 16 * 4);

        assert_eq!(b.prepare_surface(i32::MAX, i32::MAX), 1);
        assert_eq!(b.surface_width(), MAX_SURFACE_DIMENSION as i32);
        assert_eq!(b.surface_height(), MAX_SURFACE_DIMENSION as i32);
    }

    #[test]
    fn print_char_collects_output() {
        let mut b = bridge(Outcome::Ready);
        for c in "ok".chars() {
            b.print_char(c as i32);
        }
        b.print_char(-1);
        assert_eq!(b.output(), "ok\u{FFFD}");
        assert_eq!(b.report().output, "ok\u{FFFD}");
    }

    #[test]
    fn audio_calls_flow_into_the_sink() {
        let capture = CaptureSink::new();
        let mut b = Bridge::new(
            &config(true),
            FakeSource::new(Outcome::Ready),
            AudioOutput::Capture(capture.clone()),
        );
        assert_eq!(b.audio_try_initialize(48_000, 1), 1);
        for i in 0..8 {
            b.audio_write_frame(0, i as f32 / 8.0);
        }
        assert_eq!(b.audio_write_end(8), 8);
        assert_eq!(b.audio_mut().render_block(), 8);
        assert_eq!(capture.len(), 8);
        assert!((b.audio_output_latency() - 8.0 / 48_000.0).abs() < 1e-9);
        assert_eq!(b.report().audio_frames_written, 8);
        assert_eq!(b.report().audio_path.as_deref(), Some("immediate"));
    }

    #[test]
    fn shutdown_resets_everything_but_diagnostics() {
        let mut b = bridge(Outcome::Ready);
        b.prepare_surface(64, 64);
        b.gfx_try_initialize(2, 64, 64);
        b.gfx_begin(2, 0.0, 0.0, 0.0, 1.0);
        b.gfx_end(2, 1);
        b.audio_try_initialize(48_000, 2);

        b.shutdown();
        assert_eq!(b.surface_kind(), 0);
        assert_eq!(b.surface_id(), 0);
        assert_eq!(b.surfaces_mut().context(), CanvasContext::Unconfigured);
        assert!(b.audio().path().is_none());
        assert_eq!(b.report().frame.presented_frames, 1);
        assert_eq!(b.gfx_read_pixels_begin(2, 0, 0, 1, 1), 0);

        assert_eq!(b.prepare_surface(64, 64), 1);
        assert_eq!(b.surface_id(), 1001);
    }
}

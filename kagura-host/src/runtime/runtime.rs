use std::time::Duration;

use anyhow::Context;
use wasmtime::{Engine, Instance, Linker, Module, Store};

use crate::abi::{self, GuestEntrypoints};
use crate::bridge::Bridge;
use crate::diagnostics::{RunStatus, SmokeReport};
use crate::gfx::WgpuDeviceSource;
use crate::gfx::backend::DeviceSource;

/// Host-side runtime container.
pub struct WasmtimeRuntime<S: DeviceSource + 'static = WgpuDeviceSource> {
    store: Store<Bridge<S>>,
    instance: Instance,
    entrypoints: GuestEntrypoints,
    frames_run: u64,
    shut_down: bool,
}

/// Create an engine with the proposals common guest toolchains emit.
pub fn engine() -> anyhow::Result<Engine> {
    let mut cfg = wasmtime::Config::new();
    cfg.wasm_multi_value(true);
    cfg.wasm_bulk_memory(true);
    cfg.wasm_reference_types(true);
    cfg.wasm_simd(true);
    cfg.wasm_relaxed_simd(true);
    cfg.wasm_multi_memory(true);
    cfg.wasm_tail_call(true);
    Engine::new(&cfg).context("failed to create wasmtime engine")
}

impl<S: DeviceSource + 'static> WasmtimeRuntime<S> {
    /// Define the imports, instantiate `module` around `bridge`, resolve the
    /// entrypoints and run `_start` if the guest has one.
    pub fn boot(engine: &Engine, module: &Module, bridge: Bridge<S>) -> anyhow::Result<Self> {
        let mut store = Store::new(engine, bridge);
        let mut linker = Linker::new(engine);
        super::imports::define_imports(&mut linker)?;

        let instance = linker
            .instantiate(&mut store, module)
            .context("failed to instantiate guest module")?;
        abi::validate::required_exports_present(&instance, &mut store)?;
        let entrypoints = GuestEntrypoints::resolve(&instance, &mut store)?;

        if let Some(start) = entrypoints.start.as_ref() {
            start.call(&mut store, ()).context("guest `_start` trapped")?;
        }
        tracing::info!(
            audio = entrypoints.audio.is_some(),
            shutdown_hook = entrypoints.shutdown.is_some(),
            "guest instantiated"
        );

        Ok(Self {
            store,
            instance,
            entrypoints,
            frames_run: 0,
            shut_down: false,
        })
    }

    /// Run one animation frame.
    pub fn step_frame(&mut self) -> anyhow::Result<()> {
        self.entrypoints
            .frame
            .call(&mut self.store, ())
            .with_context(|| format!("guest trapped in frame {}", self.frames_run))?;
        self.frames_run += 1;
        Ok(())
    }

    /// Run one audio block: let the guest fill it, then play it out.
    /// Returns the frames delivered to the output.
    pub fn step_audio(&mut self) -> anyhow::Result<usize> {
        if !self.store.data().audio().is_open() {
            return Ok(0);
        }
        if let Some(audio) = self.entrypoints.audio.as_ref() {
            let frames = i32::try_from(self.store.data().audio().block_frames()).unwrap_or(i32::MAX);
            audio
                .call(&mut self.store, frames)
                .context("guest trapped in `kagura_audio`")?;
        }
        Ok(self.store.data_mut().audio_mut().render_block())
    }

    /// Run `frames` frames, one audio block after each.
    pub fn run(&mut self, frames: u64) -> anyhow::Result<()> {
        for _ in 0..frames {
            self.step_frame()?;
            self.step_audio()?;
        }
        Ok(())
    }

    /// Wait for a pending audio upgrade so the rest of the run uses the
    /// final output path.
    pub fn settle_audio(&mut self, timeout: Duration) {
        self.store.data_mut().audio_mut().settle_upgrade(timeout);
    }

    /// Call the guest's shutdown hook, then tear the bridge down. Safe to
    /// call more than once.
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        let hook = match self.entrypoints.shutdown.as_ref() {
            Some(hook) => hook.call(&mut self.store, ()).context("guest trapped in `kagura_on_shutdown`"),
            None => Ok(()),
        };
        self.store.data_mut().shutdown();
        hook
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn bridge(&self) -> &Bridge<S> {
        self.store.data()
    }

    pub fn bridge_mut(&mut self) -> &mut Bridge<S> {
        self.store.data_mut()
    }

    pub fn frames_run(&self) -> u64 {
        self.frames_run
    }

    /// The bridge's report with the run counters filled in.
    pub fn report(&self) -> SmokeReport {
        SmokeReport {
            status: RunStatus::Ok,
            frames_run: self.frames_run,
            ..self.store.data().report()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioOutput, CaptureSink};
    use crate::config::BridgeConfig;
    use crate::gfx::BackendMode;
    use crate::gfx::backend::tests::{FakeSource, Outcome};
    use crate::loader::compile_module;

    /// Draws the smoke triangle with a transparent tint over an opaque black
    /// clear, reads one pixel back and prints "ok" when it is black.
    const SMOKE_GUEST: &str = r#"
        (module
          (import "env" "kagura_prepare_surface" (func $prepare (param i32 i32) (result i32)))
          (import "env" "kagura_gfx_try_initialize" (func $init (param i32 i32 i32) (result i32)))
          (import "env" "kagura_gfx_begin" (func $begin (param i32 f32 f32 f32 f32)))
          (import "env" "kagura_gfx_draw_begin" (func $draw_begin (param i32 i32 i32 i32 i32 i32 i32)))
          (import "env" "kagura_gfx_draw_vertex" (func $vertex (param i32 f32 f32 f32 f32)))
          (import "env" "kagura_gfx_draw_index" (func $index (param i32 i32)))
          (import "env" "kagura_gfx_draw_end" (func $draw_end))
          (import "env" "kagura_gfx_end" (func $end (param i32 i32)))
          (import "env" "kagura_gfx_read_pixels_begin" (func $rp_begin (param i32 i32 i32 i32 i32) (result i32)))
          (import "env" "kagura_gfx_read_pixels_channel" (func $rp_channel (param i32) (result i32)))
          (import "env" "kagura_gfx_read_pixels_end" (func $rp_end))
          (import "env" "kagura_log" (func $log (param i32 i32)))
          (import "spectest" "print_char" (func $print_char (param i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "smoke frame")
          (global $kind (mut i32) (i32.const 1))

          (func (export "_start")
            (drop (call $prepare (i32.const 64) (i32.const 64))))

          (func (export "kagura_frame")
            (if (i32.eqz (call $init (global.get $kind) (i32.const 64) (i32.const 64)))
              (then (return)))
            (call $begin (global.get $kind) (f32.const 0) (f32.const 0) (f32.const 0) (f32.const 1))
            (call $draw_begin (i32.const 3) (i32.const 3) (i32.const 801)
                              (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0))
            (call $vertex (i32.const 0) (f32.const -1) (f32.const -1) (f32.const 0) (f32.const 1))
            (call $vertex (i32.const 1) (f32.const 1) (f32.const -1) (f32.const 1) (f32.const 1))
            (call $vertex (i32.const 2) (f32.const 1) (f32.const 1) (f32.const 1) (f32.const 0))
            (call $index (i32.const 0) (i32.const 0))
            (call $index (i32.const 1) (i32.const 1))
            (call $index (i32.const 2) (i32.const 2))
            (call $draw_end)
            (call $end (global.get $kind) (i32.const 1))
            (call $log (i32.const 16) (i32.const 11))
            (if (i32.eq (call $rp_begin (global.get $kind) (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 1))
                        (i32.const 4))
              (then
                (if (i32.and
                      (i32.eqz (call $rp_channel (i32.const 0)))
                      (i32.eq (call $rp_channel (i32.const 3)) (i32.const 255)))
                  (then
                    (call $print_char (i32.const 111))
                    (call $print_char (i32.const 107))))))
            (call $rp_end))
        )
    "#;

    const AUDIO_GUEST: &str = r#"
        (module
          (import "env" "kagura_audio_try_initialize" (func $init (param i32 i32) (result i32)))
          (import "env" "kagura_audio_write_frame" (func $write (param i32 f32)))
          (import "env" "kagura_audio_write_end" (func $end (param i32) (result i32)))
          (func (export "_start")
            (drop (call $init (i32.const 48000) (i32.const 1))))
          (func (export "kagura_frame"))
          (func (export "kagura_audio") (param $frames i32)
            (local $i i32)
            (block $done
              (loop $fill
                (br_if $done (i32.ge_s (local.get $i) (local.get $frames)))
                (call $write (i32.const 0) (f32.const 0.25))
                (local.set $i (i32.add (local.get $i) (i32.const 1)))
                (br $fill)))
            (drop (call $end (local.get $frames))))
        )
    "#;

    fn boot(wat: &str, outcome: Outcome, cfg: &BridgeConfig, audio: AudioOutput) -> WasmtimeRuntime<FakeSource> {
        let engine = engine().unwrap();
        let module = compile_module(&engine, wat.as_bytes()).unwrap();
        let bridge = Bridge::new(cfg, FakeSource::new(outcome), audio);
        WasmtimeRuntime::boot(&engine, &module, bridge).unwrap()
    }

    fn headless() -> BridgeConfig {
        let mut cfg = BridgeConfig::default();
        cfg.surface.headless = true;
        cfg.audio.worklet_upgrade = false;
        cfg.audio.block_frames = 16;
        cfg
    }

    #[test]
    fn smoke_guest_prints_ok_on_gpu() {
        let mut rt = boot(SMOKE_GUEST, Outcome::Ready, &headless(), AudioOutput::Null);
        rt.run(3).unwrap();
        let report = rt.report();
        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(report.frames_run, 3);
        // The first frame only starts acquisition.
        assert_eq!(report.frame.presented_frames, 2);
        assert_eq!(report.frame.backend_mode, BackendMode::Gpu);
        assert_eq!(report.capture_bytes, 64 * 64 * 4);
        assert_eq!(report.output, "okok");
        let probe = report.frame.payload.unwrap();
        assert!(probe.has_triangle);
        assert_eq!(probe.texture_seed, 801);
        assert_eq!(probe.uniform, [0.0; 4]);
    }

    #[test]
    fn smoke_guest_falls_back_to_raster_without_adapter() {
        let mut rt = boot(SMOKE_GUEST, Outcome::NoAdapter, &headless(), AudioOutput::Null);
        rt.run(2).unwrap();
        let report = rt.report();
        assert_eq!(report.frame.presented_frames, 1);
        assert_eq!(report.frame.backend_mode, BackendMode::Raster);
        assert_eq!(report.output, "ok");
    }

    #[test]
    fn forced_fallback_presents_on_first_frame() {
        let mut cfg = headless();
        cfg.gfx.force_fallback = true;
        let mut rt = boot(SMOKE_GUEST, Outcome::Ready, &cfg, AudioOutput::Null);
        rt.step_frame().unwrap();
        let report = rt.report();
        assert!(report.force_fallback);
        assert_eq!(report.frame.presented_frames, 1);
        assert_eq!(report.frame.backend_mode, BackendMode::Raster);
        assert_eq!(report.output, "ok");
    }

    #[test]
    fn audio_guest_fills_blocks() {
        let capture = CaptureSink::new();
        let mut rt = boot(AUDIO_GUEST, Outcome::Ready, &headless(), AudioOutput::Capture(capture.clone()));
        rt.run(2).unwrap();
        assert_eq!(rt.report().audio_frames_written, 32);
        assert_eq!(capture.len(), 32);
        assert!(capture.samples().iter().all(|s| *s == 0.25));
    }

    #[test]
    fn shutdown_runs_once_and_clears_the_bridge() {
        let mut rt = boot(AUDIO_GUEST, Outcome::Ready, &headless(), AudioOutput::Null);
        rt.shutdown().unwrap();
        rt.shutdown().unwrap();
        assert!(!rt.bridge().audio().is_open());
        assert_eq!(rt.step_audio().unwrap(), 0);
    }

    #[test]
    fn missing_frame_export_fails_boot() {
        let engine = engine().unwrap();
        let module = compile_module(&engine, b"(module (func (export \"_start\")))").unwrap();
        let bridge = Bridge::new(&headless(), FakeSource::new(Outcome::Ready), AudioOutput::Null);
        let err = WasmtimeRuntime::boot(&engine, &module, bridge).err().unwrap();
        assert!(format!("{err:#}").contains("kagura_frame"));
    }

    #[test]
    fn unknown_import_fails_boot() {
        let engine = engine().unwrap();
        let module = compile_module(
            &engine,
            br#"(module (import "env" "kagura_teleport" (func)) (func (export "kagura_frame")))"#,
        )
        .unwrap();
        let bridge = Bridge::new(&headless(), FakeSource::new(Outcome::Ready), AudioOutput::Null);
        assert!(WasmtimeRuntime::boot(&engine, &module, bridge).is_err());
    }

    #[test]
    fn trap_in_frame_is_an_error() {
        let wat = r#"(module (func (export "kagura_frame") unreachable))"#;
        let mut rt = boot(wat, Outcome::Ready, &headless(), AudioOutput::Null);
        let err = rt.step_frame().unwrap_err();
        assert!(format!("{err:#}").contains("frame 0"));
        assert_eq!(rt.frames_run(), 0);
    }
}

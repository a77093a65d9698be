// Smoke guest for kagura-host.
//
// Compile to `wasm32-unknown-unknown` and run with
// `kagura-host run target/wasm32-unknown-unknown/release/runtime_smoke.wasm`.
//
// Every frame draws one clip-space triangle sampling image 801 with a fully
// transparent tint over an opaque black clear, so the presented frame is
// black on both backends. The first frame whose top-left pixel reads back as
// opaque black prints "ok". Audio plays a quiet 440 Hz tone.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use kagura_sdk::prelude::*;

const SAMPLE_RATE: i32 = 48_000;
const CHANNELS: usize = 2;
const SMOKE_IMAGE: i32 = 801;

static REPORTED: AtomicBool = AtomicBool::new(false);
static PHASE: AtomicU32 = AtomicU32::new(0);

#[unsafe(no_mangle)]
pub extern "C" fn _start() {
    surface::prepare(64, 64);
    if !audio::try_initialize(SAMPLE_RATE, CHANNELS as i32) {
        system::log("audio unavailable");
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn kagura_frame() {
    let (w, h) = surface::size();
    if !gfx::try_initialize(Backend::GpuPreferred, w, h) {
        // GPU acquisition still pending.
        return;
    }

    gfx::begin(Backend::GpuPreferred, Rgba::new(0, 0, 0, 255));
    gfx::draw(
        &[
            Vertex::new(-1.0, -1.0, 0.0, 1.0),
            Vertex::new(1.0, -1.0, 1.0, 1.0),
            Vertex::new(1.0, 1.0, 1.0, 0.0),
        ],
        &[0, 1, 2],
        SMOKE_IMAGE,
        Rgba::TRANSPARENT,
    );
    gfx::end(Backend::GpuPreferred, true);

    if REPORTED.load(Ordering::Relaxed) {
        return;
    }
    if gfx::read_pixel(Backend::GpuPreferred, 0, 0) == Some(Rgba::new(0, 0, 0, 255)) {
        REPORTED.store(true, Ordering::Relaxed);
        system::print("ok");
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn kagura_audio(frames: i32) {
    let frames = frames.max(0) as u32;
    let start = PHASE.fetch_add(frames, Ordering::Relaxed);
    let mut block = Vec::with_capacity(frames as usize * CHANNELS);
    for i in 0..frames {
        let t = (start.wrapping_add(i) % SAMPLE_RATE as u32) as f32 / SAMPLE_RATE as f32;
        let sample = 0.1 * (std::f32::consts::TAU * 440.0 * t).sin();
        block.extend_from_slice(&[sample; CHANNELS]);
    }
    audio::write(&block, CHANNELS);
}

#[unsafe(no_mangle)]
pub extern "C" fn kagura_on_shutdown() {
    audio::close();
    gfx::shutdown();
}

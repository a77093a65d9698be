//! Frame renderer scenarios, driven the way a guest drives the imports.

use super::backend::tests::{FakeSource, Outcome};
use super::*;
use crate::config::GfxConfig;
use crate::surface::Surface;

fn surface(width: u32, height: u32) -> Surface {
    Surface {
        id: 1001,
        width,
        height,
        dpr: 1.0,
        backend_mode: BackendMode::None,
        degraded: false,
        generation: 1,
    }
}

fn graphics(outcome: Outcome, force_fallback: bool) -> Graphics<FakeSource> {
    let config = GfxConfig {
        force_fallback,
        ..GfxConfig::default()
    };
    Graphics::new(FakeSource::new(outcome), &config)
}

/// The smoke triangle: spans clip space, fully transparent tint.
fn smoke_triangle(g: &mut Graphics<FakeSource>, image: i32) {
    g.draw_begin(3, 3, image, [0, 0, 0, 0]);
    g.draw_vertex(0, [-1.0, -1.0, 0.0, 1.0]);
    g.draw_vertex(1, [1.0, -1.0, 1.0, 1.0]);
    g.draw_vertex(2, [1.0, 1.0, 1.0, 0.0]);
    for i in 0..3 {
        g.draw_index(i, i);
    }
    g.draw_end();
}

fn wait_for_gpu(g: &mut Graphics<FakeSource>) {
    assert!(!g.try_initialize(1, 64, 64));
    assert!(g.try_initialize(1, 64, 64));
}

#[test]
fn smoke_frame_captures_64x64_sample() {
    let mut g = graphics(Outcome::Ready, false);
    wait_for_gpu(&mut g);
    let s = surface(300, 150);

    g.begin(1, [0.0, 0.0, 0.0, 1.0]);
    smoke_triangle(&mut g, 801);
    assert_eq!(g.end(1, 1, Some(&s)), Some(BackendMode::Gpu));

    let capture = g.capture().unwrap();
    assert_eq!(capture.len(), 64 * 64 * 4);
    assert!(capture.chunks(4).all(|p| p == [0, 0, 0, 255]));
    assert_eq!(g.diagnostics().presented_frames, 1);
    assert_eq!(g.diagnostics().backend_mode, BackendMode::Gpu);
}

#[test]
fn read_pixels_protocol() {
    let mut g = graphics(Outcome::NoAdapter, false);
    let s = surface(16, 16);
    g.begin(2, [0.2, 0.4, 0.6, 1.0]);
    g.end(2, 1, Some(&s));

    assert_eq!(g.read_pixels_begin(2, 0, 0, 4, 4, Some(&s)), 64);
    for offset in 0..64 {
        let v = g.read_pixels_channel(offset);
        assert!((0..=255).contains(&v));
    }
    assert_eq!(g.read_pixels_channel(0), 51);
    assert_eq!(g.read_pixels_channel(3), 255);
    g.read_pixels_end();
    assert_eq!(g.read_pixels_channel(0), 0);
}

#[test]
fn oversized_read_back_region_fails() {
    let mut g = graphics(Outcome::NoAdapter, false);
    let s = surface(4, 4);
    g.begin(2, [1.0, 0.0, 0.0, 1.0]);
    g.end(2, 1, Some(&s));

    assert_eq!(g.read_pixels_begin(2, 0, 0, i32::MAX, i32::MAX, Some(&s)), -1);
    assert_eq!(g.read_pixels_begin(2, 0, 0, 1, i32::MAX, Some(&s)), -1);
    assert_eq!(g.read_pixels_channel(0), 0);
    assert_eq!(g.read_pixels_begin(2, 0, 0, 1, 1, Some(&s)), 4);
    assert_eq!(g.read_pixels_channel(0), 255);
}

#[test]
fn read_pixels_rejects_empty_region_and_missing_surface() {
    let mut g = graphics(Outcome::Ready, false);
    let s = surface(8, 8);
    assert_eq!(g.read_pixels_begin(1, 0, 0, 0, 4, Some(&s)), 0);
    assert_eq!(g.read_pixels_begin(1, 0, 0, 4, 4, None), 0);
    // Nothing presented yet: the region reads as zeros.
    assert_eq!(g.read_pixels_begin(1, 0, 0, 2, 2, Some(&s)), 16);
    assert_eq!(g.read_pixels_channel(3), 0);
}

#[test]
fn total_index_count_is_sum_of_declared_counts() {
    let mut g = graphics(Outcome::NoAdapter, false);
    let s = surface(8, 8);
    let counts = [(3, 3), (4, 6), (10, 27), (1, 0)];
    g.begin(2, [0.0; 4]);
    for (vc, ic) in counts {
        g.draw_begin(vc, ic, 0, [255; 4]);
        g.draw_end();
    }
    g.end(2, 1, Some(&s));
    let d = g.diagnostics();
    assert_eq!(d.last_total_index_count, counts.iter().map(|(_, ic)| *ic as usize).sum::<usize>());
    assert_eq!(d.last_region_count, counts.len());
    assert_eq!(d.last_index_count, 3);
}

#[test]
fn gpu_failure_falls_back_to_raster_for_the_same_frame() {
    let mut g = graphics(Outcome::Broken, false);
    wait_for_gpu(&mut g);
    let s = surface(8, 8);
    g.begin(1, [1.0, 0.0, 0.0, 1.0]);
    smoke_triangle(&mut g, 0);
    assert_eq!(g.end(1, 1, Some(&s)), Some(BackendMode::Raster));
    assert_eq!(g.diagnostics().backend_mode, BackendMode::Raster);
    assert_eq!(g.capture().unwrap()[0..4], [255, 0, 0, 255]);

    // The device stays available; next frame tries the GPU again.
    assert_eq!(g.acquisition_state(), AcquisitionState::DeviceReady);
}

#[test]
fn both_backends_failing_drops_the_frame() {
    let mut g = graphics(Outcome::Broken, false);
    wait_for_gpu(&mut g);
    let s = surface(0, 0);
    g.begin(1, [0.0; 4]);
    smoke_triangle(&mut g, 0);
    assert_eq!(g.end(1, 1, Some(&s)), Some(BackendMode::None));
    let d = g.diagnostics();
    assert_eq!(d.backend_mode.as_str(), "none");
    assert_eq!(d.presented_frames, 0);
    assert_eq!(d.dropped_frames, 1);
    assert!(g.capture().is_none());
}

#[test]
fn present_zero_renders_nothing() {
    let mut g = graphics(Outcome::Ready, false);
    let s = surface(8, 8);
    g.begin(2, [0.0; 4]);
    smoke_triangle(&mut g, 0);
    assert_eq!(g.end(2, 0, Some(&s)), None);
    assert_eq!(g.diagnostics().presented_frames, 0);
    assert!(g.capture().is_none());
    assert!(g.recorder().frame().commands.is_empty());
}

#[test]
fn gpu_frames_wait_for_the_device() {
    let mut g = graphics(Outcome::Deferred, false);
    let s = surface(4, 4);
    assert!(!g.try_initialize(1, 4, 4));
    g.begin(1, [0.0; 4]);
    assert_eq!(g.end(1, 1, Some(&s)), Some(BackendMode::Raster));
    g.selector_mut().shutdown();
}

#[test]
fn forced_fallback_never_renders_on_gpu() {
    let mut g = graphics(Outcome::Ready, true);
    let s = surface(4, 4);
    for _ in 0..3 {
        assert!(g.try_initialize(1, 4, 4));
        g.begin(1, [0.0; 4]);
        smoke_triangle(&mut g, 0);
        assert_eq!(g.end(1, 1, Some(&s)), Some(BackendMode::Raster));
    }
    assert_eq!(g.selector().mode(), BackendMode::Raster);
}

#[test]
fn texture_commits_reach_a_ready_device() {
    let mut g = graphics(Outcome::Ready, false);
    wait_for_gpu(&mut g);
    for (w, h) in [(2, 2), (2, 2), (4, 1)] {
        g.upload_texture_begin(7, w, h);
        for i in 0..w * h {
            g.upload_texture_pixel(i, [255, 255, 255, 255]);
        }
        g.upload_texture_end();
    }
    assert_eq!(g.textures().get(7).unwrap().revision, 2);
    let device = g.selector_mut().device_mut().unwrap();
    assert_eq!(device.committed, vec![(7, 1), (7, 1), (7, 2)]);
}

#[test]
fn textured_draw_is_tinted() {
    let mut g = graphics(Outcome::NoAdapter, false);
    let s = surface(4, 4);
    g.upload_texture_begin(3, 1, 1);
    g.upload_texture_pixel(0, [255, 128, 0, 255]);
    g.upload_texture_end();

    g.begin(2, [0.0, 0.0, 0.0, 1.0]);
    g.draw_begin(3, 3, 3, [255, 255, 255, 255]);
    g.draw_vertex(0, [-1.0, -1.0, 0.0, 0.0]);
    g.draw_vertex(1, [-1.0, 3.0, 0.0, 0.0]);
    g.draw_vertex(2, [3.0, -1.0, 0.0, 0.0]);
    for i in 0..3 {
        g.draw_index(i, i);
    }
    g.draw_end();
    g.end(2, 1, Some(&s));

    assert_eq!(g.read_pixels_begin(2, 2, 2, 1, 1, Some(&s)), 4);
    let px: Vec<i32> = (0..4).map(|i| g.read_pixels_channel(i)).collect();
    assert_eq!(px, vec![255, 128, 0, 255]);
}

#[test]
fn shutdown_returns_to_initial_state() {
    let mut g = graphics(Outcome::Ready, false);
    wait_for_gpu(&mut g);
    let s = surface(4, 4);
    g.upload_texture_begin(1, 1, 1);
    g.upload_texture_end();
    g.begin(1, [0.0; 4]);
    g.end(1, 1, Some(&s));
    g.shutdown();

    assert_eq!(g.acquisition_state(), AcquisitionState::Uninitialized);
    assert_eq!(g.selector().mode(), BackendMode::None);
    assert!(g.textures().is_empty());
    assert!(g.capture().is_none());
    assert_eq!(g.read_pixels_begin(1, 0, 0, 1, 1, Some(&s)), 4);
    assert_eq!(g.read_pixels_channel(3), 0);
}

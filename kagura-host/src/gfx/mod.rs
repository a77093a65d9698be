//! Graphics: draw recording, texture streaming, backend selection and the
//! frame renderer with its GPU (`wgpu`) and raster backends.

pub mod backend;
pub mod cache;
pub mod capture;
pub mod gpu;
pub mod raster;
pub mod recorder;
pub mod renderer;
pub mod texture;

#[cfg(test)]
mod tests;

pub use backend::{AcquisitionState, BackendSelector, DeviceSource, GpuBackend};
pub use cache::{BufferFactory, BufferRole, ResourceCache};
pub use capture::PixelReadback;
pub use gpu::{GpuRenderer, WgpuDeviceSource};
pub use raster::RasterTarget;
pub use recorder::{DrawCommand, FrameState, Recorder};
pub use renderer::Graphics;
pub use texture::{CommitOutcome, TextureRecord, TextureRegistry};

use serde::Serialize;

/// Backend requested by the guest in `gfx_try_initialize`/`gfx_begin`/`gfx_end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Prefer the GPU, fall back to raster.
    GpuPreferred,
    RasterOnly,
}

impl BackendKind {
    pub fn from_code(kind: i32) -> Option<Self> {
        match kind {
            1 => Some(BackendKind::GpuPreferred),
            2 => Some(BackendKind::RasterOnly),
            _ => None,
        }
    }
}

/// Backend that owns (or last presented on) the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    None,
    Gpu,
    Raster,
}

impl BackendMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendMode::None => "none",
            BackendMode::Gpu => "gpu",
            BackendMode::Raster => "raster",
        }
    }

    /// Numeric code returned by `surface_kind`; matches [`BackendKind`] codes.
    pub fn code(self) -> i32 {
        match self {
            BackendMode::None => 0,
            BackendMode::Gpu => 1,
            BackendMode::Raster => 2,
        }
    }
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a 0-255 channel from the guest into 0..1.
pub fn unit_channel(value: i32) -> f32 {
    value.clamp(0, 255) as f32 / 255.0
}

/// Clamp a 0-255 channel from the guest into a byte.
pub fn byte_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Quantize a 0..1 channel into a byte, rounding to nearest.
pub fn quantize_unit(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

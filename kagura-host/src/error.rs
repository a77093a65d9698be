//! Error taxonomy for the bridge.
//!
//! Host-call handlers never propagate these to the guest: every variant is
//! folded into a numeric failure code (0 / false / -1) at the import boundary.
//! Only boot-level failures (see [`crate::loader::LoadError`] and the runtime's
//! `anyhow` errors) reach the runner's terminal status.

use thiserror::Error;

/// Failure to acquire a surface or a rendering backend.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no canvas matches selector `{0}`")]
    CanvasNotFound(String),
    #[error("canvas `{0}` exposes neither a GPU nor a 2D context")]
    NoContextCapability(String),
    #[error("no suitable GPU adapter found")]
    AdapterNotFound,
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(String),
    #[error("GPU acquisition worker disconnected before reporting a result")]
    AcquisitionAbandoned,
}

/// Failure while executing a frame on one backend.
///
/// Resource exhaustion is not classified separately; it surfaces as one of
/// these variants and triggers the same one-shot fallback.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("backend is not ready")]
    NotReady,
    #[error("surface has zero area ({width}x{height})")]
    EmptySurface { width: u32, height: u32 },
    #[error("GPU validation failed: {0}")]
    Validation(String),
    #[error("GPU out of memory: {0}")]
    OutOfMemory(String),
    #[error("read-back failed: {0}")]
    Readback(String),
}

/// Failure to create or drive the audio output path.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio output is unavailable")]
    Unavailable,
    #[error("invalid audio spec: {sample_rate} Hz, {channels} channel(s)")]
    InvalidSpec { sample_rate: u32, channels: u32 },
    #[error("audio context is closed")]
    Closed,
    #[error("audio worklet failed: {0}")]
    Worklet(String),
    #[error("audio sink failed: {0}")]
    Sink(String),
}

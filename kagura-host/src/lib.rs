//! kagura-host: runs a compiled game module and turns its numeric imports
//! into real rendering and audio output.
//!
//! The guest talks to the host through a narrow, numbers-only ABI:
//! - Graphics work is streamed one value at a time (draw command header,
//!   vertices, indices) and rendered at `gfx_end` on a `wgpu` device, or on
//!   the CPU raster backend when no device is available.
//! - Audio is staged one sample at a time and committed per batch into a
//!   ring buffer that feeds a software audio graph.
//! - Read-back imports expose rendered pixels for cross-backend checks.
//!
//! Required guest export:
//! - `kagura_frame()`
//!
//! Optional guest exports:
//! - `_start()`
//! - `kagura_audio(frames)`
//! - `kagura_on_shutdown()`
//!
//! The ABI surface is defined in [`abi`] and mirrored by `kagura-sdk`.

pub mod abi;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod gfx;
pub mod loader;
pub mod runtime;
pub mod surface;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use diagnostics::{FrameDiagnostics, RunStatus, SmokeReport};
pub use error::{AudioError, InitError, RenderError};
pub use loader::LoadError;
pub use runtime::WasmtimeRuntime;

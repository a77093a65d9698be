//! Bridge configuration.
//!
//! Every field has a default so an empty (or absent) TOML file yields a
//! working headless configuration. The runner layers CLI flags on top.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration handed to [`crate::Bridge::new`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub surface: SurfaceConfig,
    pub gfx: GfxConfig,
    pub audio: AudioConfig,
}

impl BridgeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid bridge configuration")
    }

    /// Load a configuration file from disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text)
    }
}

/// Canvas resolution settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Selector of the canvas the bridge draws into.
    pub selector: String,
    /// When set, no document exists and the surface runs in degraded mode.
    pub headless: bool,
    /// CSS size of the canvas element.
    pub css_width: f64,
    pub css_height: f64,
    pub device_pixel_ratio: f64,
    /// Whether the canvas offers a GPU context.
    pub gpu_capable: bool,
    /// Whether the canvas offers a 2D/raster context.
    pub raster_capable: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            selector: "#app".to_string(),
            headless: false,
            css_width: 640.0,
            css_height: 480.0,
            device_pixel_ratio: 1.0,
            gpu_capable: true,
            raster_capable: true,
        }
    }
}

/// Rendering backend settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GfxConfig {
    /// Never use the GPU path, even when a device would be obtainable.
    pub force_fallback: bool,
    /// Capture a fixed-size downsample of every presented frame.
    pub capture_enabled: bool,
    /// Edge length of the square capture (64 gives 64*64*4 bytes).
    pub capture_size: u32,
    pub power_preference: PowerPreference,
}

impl Default for GfxConfig {
    fn default() -> Self {
        Self {
            force_fallback: false,
            capture_enabled: true,
            capture_size: 64,
            power_preference: PowerPreference::HighPerformance,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    LowPower,
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(value: PowerPreference) -> Self {
        match value {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

/// Audio output settings.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Frames pulled per hardware callback.
    pub block_frames: u32,
    /// Ring capacity in blocks; the overrun safety margin.
    pub ring_blocks: u32,
    /// Try to move output onto the dedicated processing thread.
    pub worklet_upgrade: bool,
    /// Disable audio entirely (every audio call becomes a no-op).
    pub disabled: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            block_frames: 4096,
            ring_blocks: 8,
            worklet_upgrade: true,
            disabled: false,
        }
    }
}

impl AudioConfig {
    pub fn ring_capacity_frames(&self) -> u32 {
        self.block_frames.max(1).saturating_mul(self.ring_blocks.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, BridgeConfig::default());
        assert_eq!(cfg.audio.ring_capacity_frames(), 4096 * 8);
        assert_eq!(cfg.gfx.capture_size, 64);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = BridgeConfig::from_toml_str(
            r#"
            [gfx]
            force_fallback = true
            power_preference = "low-power"

            [surface]
            device_pixel_ratio = 2.0
            "#,
        )
        .unwrap();
        assert!(cfg.gfx.force_fallback);
        assert_eq!(cfg.gfx.power_preference, PowerPreference::LowPower);
        assert!(cfg.gfx.capture_enabled);
        assert_eq!(cfg.surface.device_pixel_ratio, 2.0);
        assert_eq!(cfg.surface.selector, "#app");
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let err = BridgeConfig::from_toml_str("[gfx]\npower_preference = \"turbo\"\n");
        assert!(err.is_err());
    }
}

//! Per-frame counters and the smoke report printed by the runner.

use serde::Serialize;

use crate::gfx::BackendMode;
use crate::gfx::recorder::FrameState;

/// First triangle and tint of the first command in the last frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadProbe {
    pub has_triangle: bool,
    pub a: [f32; 2],
    pub b: [f32; 2],
    pub c: [f32; 2],
    pub uniform: [f32; 4],
    /// Source image id of the first command.
    pub texture_seed: u32,
}

impl PayloadProbe {
    fn from_frame(frame: &FrameState) -> Option<Self> {
        let first = frame.commands.first()?;
        let corner = |slot: usize| -> Option<[f32; 2]> {
            let i = *first.indices().get(slot)?;
            first.position(i as usize)
        };
        let (a, b, c) = (corner(0), corner(1), corner(2));
        Some(Self {
            has_triangle: a.is_some() && b.is_some() && c.is_some(),
            a: a.unwrap_or_default(),
            b: b.unwrap_or_default(),
            c: c.unwrap_or_default(),
            uniform: first.uniform_color(),
            texture_seed: first.src_image_id(),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDiagnostics {
    pub presented_frames: u64,
    pub dropped_frames: u64,
    /// Backend that handled the last presented (or dropped) frame.
    pub backend_mode: BackendMode,
    pub last_region_count: usize,
    /// Sum of every command's index count in the last frame.
    pub last_total_index_count: usize,
    pub last_vertex_float_count: usize,
    /// Index count of the first command in the last frame.
    pub last_index_count: usize,
    pub last_src_image_count: usize,
    pub last_uniform_dword_count: usize,
    pub payload: Option<PayloadProbe>,
}

impl FrameDiagnostics {
    /// Record a frame that went through `end(present=1)`. `mode` is
    /// [`BackendMode::None`] when both backends failed.
    pub fn record(&mut self, frame: &FrameState, mode: BackendMode) {
        match mode {
            BackendMode::None => self.dropped_frames += 1,
            _ => self.presented_frames += 1,
        }
        self.backend_mode = mode;

        let mut images: Vec<u32> = frame.commands.iter().map(|c| c.src_image_id()).collect();
        images.sort_unstable();
        images.dedup();

        self.last_region_count = frame.counters.commands;
        self.last_total_index_count = frame.counters.indices;
        self.last_vertex_float_count = frame.commands.iter().map(|c| c.vertex_data().len()).sum();
        self.last_index_count = frame.commands.first().map_or(0, |c| c.index_count());
        self.last_src_image_count = images.len();
        self.last_uniform_dword_count = frame.commands.len() * 4;
        self.payload = PayloadProbe::from_frame(frame);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Running,
    Ok,
    Failed,
}

/// Everything the runner knows about a run, serialized as JSON.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmokeReport {
    pub status: RunStatus,
    /// Characters printed by the guest through `spectest.print_char`.
    pub output: String,
    pub force_fallback: bool,
    pub frames_run: u64,
    #[serde(flatten)]
    pub frame: FrameDiagnostics,
    pub capture_bytes: usize,
    pub audio_path: Option<String>,
    pub audio_frames_written: u64,
    pub error: Option<String>,
}

impl SmokeReport {
    pub fn failed(error: &anyhow::Error) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(format!("{error:#}")),
            ..Self::default()
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|err| format!("{{\"status\":\"failed\",\"error\":\"{err}\"}}"))
    }
}

//! Audio bridge.
//!
//! The guest stages one sample per `write_frame(channel, sample)` call and
//! commits the batch with `write_end(frames)`, which copies it into the ring
//! at the write position. Output starts on the immediate path (a node that
//! pulls straight from the ring). When upgrades are enabled a worklet thread
//! is registered in the background; once it reports ready the next audio
//! call connects it and then disconnects the immediate node.
//!
//! ```text
//! Immediate -> UpgradePending -> Upgraded
//!                 \-> Immediate (registration failed)
//! ```

pub mod graph;
pub mod ring;
pub mod sink;
pub mod worklet;

pub use graph::{AudioGraph, GraphState, NodeKind};
pub use ring::SampleRing;
pub use sink::{AudioOutput, AudioSink, CaptureSink, NullSink, WavSink};
pub use worklet::{Registration, Worklet};

use crate::config::AudioConfig;
use crate::error::AudioError;

/// Upper bound on channels accepted from the guest.
pub const MAX_CHANNELS: i32 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputPath {
    Immediate,
    UpgradePending,
    Upgraded,
}

impl OutputPath {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputPath::Immediate => "immediate",
            OutputPath::UpgradePending => "upgrade-pending",
            OutputPath::Upgraded => "upgraded",
        }
    }
}

struct AudioState {
    graph: AudioGraph,
    ring: SampleRing,
    channels: usize,
    /// Interleaved samples staged since the last `write_end`.
    batch: Vec<f32>,
    /// Frames completed in `batch`.
    batch_frames: usize,
    path: OutputPath,
    worklet: Option<Worklet>,
}

impl AudioState {
    fn poll_upgrade(&mut self) {
        if self.path != OutputPath::UpgradePending {
            return;
        }
        let Some(worklet) = self.worklet.as_mut() else {
            self.path = OutputPath::Immediate;
            return;
        };
        match worklet.poll_ready() {
            Registration::Pending => {}
            Registration::Ready => self.swap_to_worklet(),
            Registration::Failed(err) => {
                tracing::warn!(error = %err, "worklet registration failed; staying on the immediate path");
                self.worklet = None;
                self.path = OutputPath::Immediate;
            }
        }
    }

    fn swap_to_worklet(&mut self) {
        let Some(worklet) = self.worklet.as_ref() else {
            return;
        };
        worklet.init(self.ring.capacity_frames(), self.channels);
        self.graph.connect(NodeKind::Worklet);
        self.graph.disconnect(NodeKind::Immediate);
        self.path = OutputPath::Upgraded;
        tracing::info!("audio output moved to the worklet path");
    }
}

pub struct AudioBridge {
    config: AudioConfig,
    output: AudioOutput,
    state: Option<AudioState>,
    frames_written: u64,
}

impl AudioBridge {
    pub fn new(config: AudioConfig, output: AudioOutput) -> Self {
        Self {
            config,
            output,
            state: None,
            frames_written: 0,
        }
    }

    pub fn try_initialize(&mut self, sample_rate: i32, channels: i32) -> bool {
        match self.initialize(sample_rate, channels) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "audio_try_initialize failed");
                false
            }
        }
    }

    fn initialize(&mut self, sample_rate: i32, channels: i32) -> Result<(), AudioError> {
        if self.config.disabled {
            return Err(AudioError::Unavailable);
        }
        if sample_rate <= 0 || channels <= 0 || channels > MAX_CHANNELS {
            return Err(AudioError::InvalidSpec {
                sample_rate: sample_rate.max(0) as u32,
                channels: channels.max(0) as u32,
            });
        }
        if self.state.is_some() {
            tracing::debug!("audio re-initialized; closing the previous context");
            self.close();
        }

        let (rate, ch) = (sample_rate as u32, channels as u16);
        let sink = self.output.open(rate, ch)?;
        let mut graph = AudioGraph::new(rate, ch, self.config.block_frames.max(1), sink);
        graph.connect(NodeKind::Immediate);

        let capacity = self.config.ring_capacity_frames() as usize;
        let (path, worklet) = if self.config.worklet_upgrade {
            match Worklet::register() {
                Ok(worklet) => (OutputPath::UpgradePending, Some(worklet)),
                Err(err) => {
                    tracing::warn!(error = %err, "worklet unavailable; using the immediate path only");
                    (OutputPath::Immediate, None)
                }
            }
        } else {
            (OutputPath::Immediate, None)
        };

        tracing::info!(sample_rate, channels, capacity, path = path.as_str(), "audio initialized");
        self.state = Some(AudioState {
            graph,
            ring: SampleRing::new(capacity, ch as usize),
            channels: ch as usize,
            batch: Vec::new(),
            batch_frames: 0,
            path,
            worklet,
        });
        Ok(())
    }

    pub fn write_frame(&mut self, channel: i32, sample: f32) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.poll_upgrade();
        let Ok(channel) = usize::try_from(channel) else {
            tracing::trace!(channel, "negative audio channel; dropped");
            return;
        };
        if channel >= state.channels {
            tracing::trace!(channel, channels = state.channels, "audio channel out of range; dropped");
            return;
        }
        if state.batch_frames >= state.ring.capacity_frames() {
            tracing::trace!(frames = state.batch_frames, "audio batch is full; sample dropped");
            return;
        }
        let index = state.batch_frames * state.channels + channel;
        if state.batch.len() <= index {
            state.batch.resize((state.batch_frames + 1) * state.channels, 0.0);
        }
        state.batch[index] = sample;
        if channel + 1 == state.channels {
            state.batch_frames += 1;
        }
    }

    /// Commit `frames` staged frames into the ring. Missing samples read as
    /// silence; a batch never exceeds the ring capacity. Returns the frames
    /// committed, or 0 when audio is not running.
    pub fn write_end(&mut self, frames: i32) -> i32 {
        let Some(state) = self.state.as_mut() else {
            return 0;
        };
        state.poll_upgrade();
        let mut batch = std::mem::take(&mut state.batch);
        state.batch_frames = 0;
        if frames <= 0 {
            return 0;
        }
        let capacity = state.ring.capacity_frames();
        let frames = if frames as usize > capacity {
            tracing::warn!(frames, capacity, "audio batch larger than the ring; truncated");
            capacity as i32
        } else {
            frames
        };

        batch.resize(frames as usize * state.channels, 0.0);
        state.ring.write_frames(&batch);
        if state.path == OutputPath::Upgraded {
            if let Some(worklet) = state.worklet.as_ref() {
                worklet.write(batch);
            }
        }
        self.frames_written += frames as u64;
        frames
    }

    /// Run one hardware callback: pull a block from every connected node and
    /// deliver the mix. Returns the frames delivered.
    pub fn render_block(&mut self) -> usize {
        let Some(state) = self.state.as_mut() else {
            return 0;
        };
        state.poll_upgrade();
        if state.graph.state() != GraphState::Running {
            return 0;
        }

        let frames = state.graph.block_frames() as usize;
        let mut mix = vec![0.0; frames * state.channels];
        let mut scratch = vec![0.0; mix.len()];
        for node in state.graph.connected().to_vec() {
            match node {
                NodeKind::Immediate => {
                    state.ring.read_frames(&mut scratch);
                    add_into(&mut mix, &scratch);
                }
                NodeKind::Worklet => {
                    if let Some(worklet) = state.worklet.as_ref() {
                        add_into(&mut mix, &worklet.render(frames, state.channels));
                    }
                }
            }
        }
        state.graph.deliver(&mix);
        frames
    }

    pub fn suspend(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.poll_upgrade();
            state.graph.suspend();
            tracing::debug!("audio suspended");
        }
    }

    pub fn resume(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.poll_upgrade();
            state.graph.resume();
            tracing::debug!("audio resumed");
        }
    }

    /// Disconnect every node, stop the worklet and close the context.
    pub fn close(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };
        if let Some(mut worklet) = state.worklet.take() {
            state.graph.disconnect(NodeKind::Worklet);
            worklet.shutdown();
        }
        state.graph.disconnect(NodeKind::Immediate);
        if let Err(err) = state.graph.close() {
            tracing::warn!(error = %err, "audio context did not close cleanly");
        }
        tracing::info!("audio closed");
    }

    pub fn output_latency(&mut self) -> f64 {
        match self.state.as_mut() {
            Some(state) => {
                state.poll_upgrade();
                state.graph.output_latency()
            }
            None => 0.0,
        }
    }

    /// Frames pulled per hardware callback.
    pub fn block_frames(&self) -> u32 {
        self.config.block_frames.max(1)
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    pub fn path(&self) -> Option<OutputPath> {
        self.state.as_ref().map(|s| s.path)
    }

    pub fn graph_state(&self) -> Option<GraphState> {
        self.state.as_ref().map(|s| s.graph.state())
    }

    pub fn ring(&self) -> Option<&SampleRing> {
        self.state.as_ref().map(|s| &s.ring)
    }

    /// Total frames committed through `write_end`.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Block until a pending upgrade resolves, then apply it.
    pub fn settle_upgrade(&mut self, timeout: std::time::Duration) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.path != OutputPath::UpgradePending {
            return;
        }
        if let Some(worklet) = state.worklet.as_mut() {
            if let Registration::Failed(err) = worklet.wait_ready(timeout) {
                tracing::warn!(error = %err, "worklet registration failed");
            }
        }
        state.poll_upgrade();
    }
}

impl Drop for AudioBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn add_into(mix: &mut [f32], block: &[f32]) {
    for (m, s) in mix.iter_mut().zip(block) {
        *m += *s;
    }
}

//! Software audio graph: a context with a lifecycle, a destination sink and
//! the set of source nodes currently connected to it.

use crate::audio::sink::AudioSink;
use crate::error::AudioError;

/// Frames a worklet processes per callback.
pub const RENDER_QUANTUM_FRAMES: u32 = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphState {
    Running,
    Suspended,
    Closed,
}

/// Source nodes the bridge can connect to the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Pulls straight from the bridge ring on every callback.
    Immediate,
    /// The dedicated processing thread.
    Worklet,
}

pub struct AudioGraph {
    sample_rate: u32,
    channels: u16,
    block_frames: u32,
    state: GraphState,
    connected: Vec<NodeKind>,
    sink: Box<dyn AudioSink>,
    frames_delivered: u64,
}

impl AudioGraph {
    pub fn new(sample_rate: u32, channels: u16, block_frames: u32, sink: Box<dyn AudioSink>) -> Self {
        Self {
            sample_rate,
            channels,
            block_frames,
            state: GraphState::Running,
            connected: Vec::new(),
            sink,
            frames_delivered: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn block_frames(&self) -> u32 {
        self.block_frames
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn connect(&mut self, node: NodeKind) {
        if self.state != GraphState::Closed && !self.connected.contains(&node) {
            tracing::debug!(?node, "audio node connected");
            self.connected.push(node);
        }
    }

    pub fn disconnect(&mut self, node: NodeKind) {
        if let Some(i) = self.connected.iter().position(|n| *n == node) {
            tracing::debug!(?node, "audio node disconnected");
            self.connected.remove(i);
        }
    }

    pub fn connected(&self) -> &[NodeKind] {
        &self.connected
    }

    pub fn suspend(&mut self) {
        if self.state == GraphState::Running {
            self.state = GraphState::Suspended;
        }
    }

    pub fn resume(&mut self) {
        if self.state == GraphState::Suspended {
            self.state = GraphState::Running;
        }
    }

    /// Disconnect everything and close the destination.
    pub fn close(&mut self) -> Result<(), AudioError> {
        if self.state == GraphState::Closed {
            return Ok(());
        }
        self.connected.clear();
        self.state = GraphState::Closed;
        self.sink.finish()
    }

    /// Seconds between a sample entering the graph and reaching the output.
    pub fn output_latency(&self) -> f64 {
        if self.state == GraphState::Closed || self.sample_rate == 0 {
            return 0.0;
        }
        let frames = if self.connected.contains(&NodeKind::Worklet) {
            RENDER_QUANTUM_FRAMES
        } else {
            self.block_frames
        };
        frames as f64 / self.sample_rate as f64
    }

    /// Hand one mixed block to the destination.
    pub fn deliver(&mut self, block: &[f32]) {
        if self.state != GraphState::Running {
            return;
        }
        self.sink.write(block);
        self.frames_delivered += (block.len() / self.channels.max(1) as usize) as u64;
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }
}

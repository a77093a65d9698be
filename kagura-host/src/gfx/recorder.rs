//! Draw command recorder.
//!
//! The guest streams one command at a time: `draw_begin` sizes a staging
//! builder exactly, `draw_vertex`/`draw_index` fill it by offset, and
//! `draw_end` freezes it into an immutable [`DrawCommand`] appended to the
//! current [`FrameState`].

/// Floats per interleaved vertex: x, y, u, v.
pub const FLOATS_PER_VERTEX: usize = 4;

/// Upper bound on the vertex or index count of a single command.
pub const MAX_DRAW_ELEMENTS: usize = 1 << 20;

/// One recorded mesh batch. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCommand {
    vertex_data: Box<[f32]>,
    indices: Box<[u32]>,
    src_image_id: u32,
    uniform_color: [f32; 4],
}

impl DrawCommand {
    /// Interleaved `[x, y, u, v]` floats.
    pub fn vertex_data(&self) -> &[f32] {
        &self.vertex_data
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_data.len() / FLOATS_PER_VERTEX
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn src_image_id(&self) -> u32 {
        self.src_image_id
    }

    /// Tint in 0..1.
    pub fn uniform_color(&self) -> [f32; 4] {
        self.uniform_color
    }

    /// Position of vertex `i` in normalized device coordinates.
    pub fn position(&self, i: usize) -> Option<[f32; 2]> {
        let base = i.checked_mul(FLOATS_PER_VERTEX)?;
        let v = self.vertex_data.get(base..base + FLOATS_PER_VERTEX)?;
        Some([v[0], v[1]])
    }
}

/// Staging record for the command currently being streamed.
#[derive(Debug)]
pub struct DrawBuilder {
    vertex_data: Vec<f32>,
    indices: Vec<u32>,
    src_image_id: u32,
    uniform_color: [f32; 4],
}

impl DrawBuilder {
    pub fn new(vertex_count: usize, index_count: usize, src_image_id: u32, color: [f32; 4]) -> Self {
        Self {
            vertex_data: vec![0.0; vertex_count * FLOATS_PER_VERTEX],
            indices: vec![0; index_count],
            src_image_id,
            uniform_color: color,
        }
    }

    /// Write one vertex. Returns false when `offset` is outside the declared count.
    pub fn set_vertex(&mut self, offset: usize, vertex: [f32; 4]) -> bool {
        let Some(start) = offset.checked_mul(FLOATS_PER_VERTEX) else {
            return false;
        };
        match self.vertex_data.get_mut(start..start + FLOATS_PER_VERTEX) {
            Some(slot) => {
                slot.copy_from_slice(&vertex);
                true
            }
            None => false,
        }
    }

    /// Write one index. Returns false when `offset` is outside the declared count.
    pub fn set_index(&mut self, offset: usize, value: u32) -> bool {
        match self.indices.get_mut(offset) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn finish(self) -> DrawCommand {
        DrawCommand {
            vertex_data: self.vertex_data.into_boxed_slice(),
            indices: self.indices.into_boxed_slice(),
            src_image_id: self.src_image_id,
            uniform_color: self.uniform_color,
        }
    }
}

/// Running totals for the frame being recorded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounters {
    pub commands: usize,
    pub vertices: usize,
    pub indices: usize,
}

/// Per-frame accumulator.
#[derive(Clone, Debug, Default)]
pub struct FrameState {
    pub clear_color: [f32; 4],
    pub commands: Vec<DrawCommand>,
    pub counters: FrameCounters,
}

#[derive(Debug, Default)]
pub struct Recorder {
    frame: FrameState,
    open: Option<DrawBuilder>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new frame, discarding anything left from an unfinished one.
    pub fn begin_frame(&mut self, clear_color: [f32; 4]) {
        if self.open.take().is_some() {
            tracing::warn!("frame began with an unfinished draw command; discarding it");
        }
        self.frame = FrameState {
            clear_color,
            ..FrameState::default()
        };
    }

    pub fn draw_begin(&mut self, vertex_count: i32, index_count: i32, src_image_id: u32, color: [f32; 4]) {
        if self.open.is_some() {
            tracing::warn!("draw_begin while a command is open; discarding the open command");
        }
        let vertex_count = vertex_count.max(0) as usize;
        let index_count = index_count.max(0) as usize;
        if vertex_count > MAX_DRAW_ELEMENTS || index_count > MAX_DRAW_ELEMENTS {
            tracing::warn!(vertex_count, index_count, "draw command exceeds size limit; ignored");
            self.open = None;
            return;
        }
        self.open = Some(DrawBuilder::new(vertex_count, index_count, src_image_id, color));
    }

    pub fn draw_vertex(&mut self, offset: i32, vertex: [f32; 4]) {
        let Some(builder) = self.open.as_mut() else {
            tracing::trace!(offset, "draw_vertex without an open command");
            return;
        };
        if offset < 0 || !builder.set_vertex(offset as usize, vertex) {
            tracing::trace!(offset, "draw_vertex offset out of range; dropped");
        }
    }

    pub fn draw_index(&mut self, offset: i32, value: u32) {
        let Some(builder) = self.open.as_mut() else {
            tracing::trace!(offset, "draw_index without an open command");
            return;
        };
        if offset < 0 || !builder.set_index(offset as usize, value) {
            tracing::trace!(offset, "draw_index offset out of range; dropped");
        }
    }

    pub fn draw_end(&mut self) {
        let Some(builder) = self.open.take() else {
            tracing::trace!("draw_end without an open command");
            return;
        };
        let command = builder.finish();
        self.frame.counters.commands += 1;
        self.frame.counters.vertices += command.vertex_count();
        self.frame.counters.indices += command.index_count();
        self.frame.commands.push(command);
    }

    pub fn has_open_command(&self) -> bool {
        self.open.is_some()
    }

    pub fn frame(&self) -> &FrameState {
        &self.frame
    }

    /// Drain the frame. The recorder keeps the clear color but zeroes counters.
    pub fn take_frame(&mut self) -> FrameState {
        if self.open.take().is_some() {
            tracing::warn!("frame ended with an unfinished draw command; discarding it");
        }
        let clear_color = self.frame.clear_color;
        std::mem::replace(
            &mut self.frame,
            FrameState {
                clear_color,
                ..FrameState::default()
            },
        )
    }
}

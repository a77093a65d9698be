//! Resource cache.
//!
//! Buffers are cached per *draw slot*, i.e. the position of a command inside
//! the frame's command list, and reused across frames while their capacity
//! suffices. A slot only ever grows: a too-small buffer is destroyed and
//! replaced by a larger one. Bind groups are cached per slot under a
//! [`BindKey`] that names every resource they reference, so a replaced
//! uniform buffer or a re-uploaded texture revision can never be bound stale.
//!
//! The cache is generic over the buffer/bind-group handle types so the
//! policy is testable without a GPU; see [`BufferFactory`].

/// Smallest buffer the cache allocates.
pub const MIN_BUFFER_SIZE: u64 = 16;

/// Buffer copies must be multiples of this many bytes.
const BUFFER_ALIGNMENT: u64 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Vertex,
    Index,
    Uniform,
}

impl BufferRole {
    pub fn label(self) -> &'static str {
        match self {
            BufferRole::Vertex => "kagura.draw.vertex",
            BufferRole::Index => "kagura.draw.index",
            BufferRole::Uniform => "kagura.draw.uniform",
        }
    }
}

/// Creates and destroys the concrete buffers the cache hands out.
pub trait BufferFactory {
    type Buffer;

    fn create_buffer(&mut self, role: BufferRole, size: u64) -> Self::Buffer;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
}

/// A cached buffer with its capacity and a generation that changes whenever
/// the underlying handle is replaced.
#[derive(Debug)]
pub struct CachedBuffer<B> {
    pub buffer: B,
    pub capacity: u64,
    pub generation: u64,
}

/// Everything a cached bind group references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindKey {
    pub uniform_generation: u64,
    pub image_id: u32,
    pub revision: u64,
}

#[derive(Debug)]
struct CacheSlot<B, G> {
    vertex: Option<CachedBuffer<B>>,
    index: Option<CachedBuffer<B>>,
    uniform: Option<CachedBuffer<B>>,
    bind_groups: Vec<(BindKey, G)>,
}

impl<B, G> Default for CacheSlot<B, G> {
    fn default() -> Self {
        Self {
            vertex: None,
            index: None,
            uniform: None,
            bind_groups: Vec::new(),
        }
    }
}

impl<B, G> CacheSlot<B, G> {
    fn buffer_mut(&mut self, role: BufferRole) -> &mut Option<CachedBuffer<B>> {
        match role {
            BufferRole::Vertex => &mut self.vertex,
            BufferRole::Index => &mut self.index,
            BufferRole::Uniform => &mut self.uniform,
        }
    }

    fn buffer(&self, role: BufferRole) -> Option<&CachedBuffer<B>> {
        match role {
            BufferRole::Vertex => self.vertex.as_ref(),
            BufferRole::Index => self.index.as_ref(),
            BufferRole::Uniform => self.uniform.as_ref(),
        }
    }
}

/// Allocation counters, mostly for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub bind_groups_built: u64,
    pub bind_groups_invalidated: u64,
}

#[derive(Debug)]
pub struct ResourceCache<B, G> {
    slots: Vec<CacheSlot<B, G>>,
    next_generation: u64,
    stats: CacheStats,
}

impl<B, G> Default for ResourceCache<B, G> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            next_generation: 1,
            stats: CacheStats::default(),
        }
    }
}

impl<B, G> ResourceCache<B, G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the buffer for `(slot, role)`, allocating or growing it so that
    /// it holds at least `min_size` bytes.
    pub fn ensure_buffer<F>(&mut self, factory: &mut F, slot: usize, role: BufferRole, min_size: u64) -> &CachedBuffer<B>
    where
        F: BufferFactory<Buffer = B>,
    {
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, CacheSlot::default);
        }

        let fits = self.slots[slot]
            .buffer(role)
            .is_some_and(|b| b.capacity >= min_size);
        if !fits {
            let size = align_up(min_size.max(MIN_BUFFER_SIZE), BUFFER_ALIGNMENT);
            let generation = self.next_generation;
            self.next_generation += 1;

            let entry = self.slots[slot].buffer_mut(role);
            if let Some(old) = entry.take() {
                tracing::trace!(slot, ?role, from = old.capacity, to = size, "growing cached buffer");
                factory.destroy_buffer(old.buffer);
                self.stats.buffers_destroyed += 1;
            }
            *entry = Some(CachedBuffer {
                buffer: factory.create_buffer(role, size),
                capacity: size,
                generation,
            });
            self.stats.buffers_created += 1;
        }

        match self.slots[slot].buffer(role) {
            Some(buffer) => buffer,
            None => unreachable!("buffer for slot {slot} was just ensured"),
        }
    }

    pub fn buffer(&self, slot: usize, role: BufferRole) -> Option<&CachedBuffer<B>> {
        self.slots.get(slot)?.buffer(role)
    }

    /// Fetch the bind group for `slot` referencing `(image_id, revision)`,
    /// building it with `build` when missing or stale. Returns `None` if the
    /// slot has no uniform buffer yet.
    pub fn bind_group(
        &mut self,
        slot: usize,
        image_id: u32,
        revision: u64,
        build: impl FnOnce(&B) -> G,
    ) -> Option<&G> {
        let entry = self.slots.get_mut(slot)?;
        let uniform = entry.uniform.as_ref()?;
        let key = BindKey {
            uniform_generation: uniform.generation,
            image_id,
            revision,
        };

        let before = entry.bind_groups.len();
        entry.bind_groups.retain(|(k, _)| {
            k.uniform_generation == key.uniform_generation
                && (k.image_id != image_id || k.revision == revision)
        });
        self.stats.bind_groups_invalidated += (before - entry.bind_groups.len()) as u64;

        let position = match entry.bind_groups.iter().position(|(k, _)| *k == key) {
            Some(position) => position,
            None => {
                let group = build(&uniform.buffer);
                entry.bind_groups.push((key, group));
                self.stats.bind_groups_built += 1;
                entry.bind_groups.len() - 1
            }
        };
        entry.bind_groups.get(position).map(|(_, g)| g)
    }

    /// Look up an already-built bind group without touching the cache.
    pub fn cached_bind_group(&self, slot: usize, image_id: u32, revision: u64) -> Option<&G> {
        let entry = self.slots.get(slot)?;
        let generation = entry.uniform.as_ref()?.generation;
        entry
            .bind_groups
            .iter()
            .find(|(k, _)| k.uniform_generation == generation && k.image_id == image_id && k.revision == revision)
            .map(|(_, g)| g)
    }

    /// Drop every cached bind group that references `image_id`.
    pub fn invalidate_image(&mut self, image_id: u32) -> usize {
        let mut dropped = 0;
        for slot in &mut self.slots {
            let before = slot.bind_groups.len();
            slot.bind_groups.retain(|(k, _)| k.image_id != image_id);
            dropped += before - slot.bind_groups.len();
        }
        self.stats.bind_groups_invalidated += dropped as u64;
        dropped
    }

    pub fn cached_bind_groups(&self, slot: usize) -> impl Iterator<Item = &BindKey> + '_ {
        self.slots
            .get(slot)
            .into_iter()
            .flat_map(|s| s.bind_groups.iter().map(|(k, _)| k))
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Destroy every cached buffer and forget every bind group.
    pub fn clear<F>(&mut self, factory: &mut F)
    where
        F: BufferFactory<Buffer = B>,
    {
        for slot in self.slots.drain(..) {
            for buffer in [slot.vertex, slot.index, slot.uniform].into_iter().flatten() {
                factory.destroy_buffer(buffer.buffer);
                self.stats.buffers_destroyed += 1;
            }
        }
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

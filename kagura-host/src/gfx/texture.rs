//! Texture upload pipeline (CPU side).
//!
//! `begin` stages `width * height * 4` bytes, `pixel` fills one texel, `end`
//! commits into the [`TextureRegistry`]. The registry is the source of truth
//! both backends read from; the GPU backend mirrors each record into a
//! `wgpu::Texture` keyed by `(image_id, revision)`.

use std::collections::HashMap;

pub const BYTES_PER_TEXEL: usize = 4;

/// Largest edge accepted for a streamed texture.
pub const MAX_TEXTURE_DIMENSION: u32 = 8192;

/// Committed texel data for one image id.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureRecord {
    pub width: u32,
    pub height: u32,
    /// Bumped only when the dimensions change.
    pub revision: u64,
    /// Bumped on every commit, including same-size rewrites.
    pub content_version: u64,
    pub texels: Vec<u8>,
}

impl TextureRecord {
    /// Opaque white 1x1, used for draws whose image was never uploaded.
    pub fn default_white() -> Self {
        Self {
            width: 1,
            height: 1,
            revision: 0,
            content_version: 0,
            texels: vec![255; BYTES_PER_TEXEL],
        }
    }

    /// Nearest-neighbour lookup with clamp-to-edge addressing.
    pub fn sample_nearest(&self, u: f32, v: f32) -> [u8; 4] {
        let x = clamp_coord(u, self.width);
        let y = clamp_coord(v, self.height);
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_TEXEL;
        match self.texels.get(i..i + BYTES_PER_TEXEL) {
            Some(t) => [t[0], t[1], t[2], t[3]],
            None => [255; 4],
        }
    }
}

fn clamp_coord(t: f32, size: u32) -> u32 {
    if !t.is_finite() || t <= 0.0 {
        return 0;
    }
    ((t * size as f32).floor() as u32).min(size.saturating_sub(1))
}

/// What a commit did to the entry for an image id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// First upload for this id.
    Created { revision: u64 },
    /// Dimensions changed: the old texture is gone and dependents are stale.
    Recreated { previous: u64, revision: u64 },
    /// Same dimensions: bytes rewritten in place.
    Rewritten { revision: u64 },
}

impl CommitOutcome {
    pub fn revision(self) -> u64 {
        match self {
            CommitOutcome::Created { revision }
            | CommitOutcome::Recreated { revision, .. }
            | CommitOutcome::Rewritten { revision } => revision,
        }
    }

    /// True when cached bind groups referencing the image must be rebuilt.
    pub fn invalidates_bindings(self) -> bool {
        !matches!(self, CommitOutcome::Rewritten { .. })
    }
}

#[derive(Debug)]
struct StagedUpload {
    image_id: u32,
    width: u32,
    height: u32,
    texels: Vec<u8>,
}

#[derive(Debug)]
pub struct TextureRegistry {
    entries: HashMap<u32, TextureRecord>,
    staged: Option<StagedUpload>,
    default_white: TextureRecord,
}

impl Default for TextureRegistry {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            staged: None,
            default_white: TextureRecord::default_white(),
        }
    }
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload_begin(&mut self, image_id: u32, width: i32, height: i32) {
        if self.staged.is_some() {
            tracing::warn!(image_id, "texture upload began while another was staged; discarding it");
        }
        self.staged = None;
        if width <= 0 || height <= 0 {
            tracing::warn!(image_id, width, height, "texture upload with empty size ignored");
            return;
        }
        let (width, height) = (width as u32, height as u32);
        if width > MAX_TEXTURE_DIMENSION || height > MAX_TEXTURE_DIMENSION {
            tracing::warn!(image_id, width, height, "texture upload exceeds size limit; ignored");
            return;
        }
        let len = width as usize * height as usize * BYTES_PER_TEXEL;
        self.staged = Some(StagedUpload {
            image_id,
            width,
            height,
            texels: vec![0; len],
        });
    }

    /// Write one texel at `offset` (in texels, not bytes).
    pub fn upload_pixel(&mut self, offset: i32, rgba: [u8; 4]) {
        let Some(staged) = self.staged.as_mut() else {
            return;
        };
        if offset < 0 {
            tracing::trace!(offset, "texture pixel offset out of range; dropped");
            return;
        }
        let start = offset as usize * BYTES_PER_TEXEL;
        match staged.texels.get_mut(start..start + BYTES_PER_TEXEL) {
            Some(slot) => slot.copy_from_slice(&rgba),
            None => tracing::trace!(offset, "texture pixel offset out of range; dropped"),
        }
    }

    /// Commit the staged upload. Returns the image id and what happened to it.
    pub fn upload_end(&mut self) -> Option<(u32, CommitOutcome)> {
        let staged = self.staged.take()?;
        let outcome = match self.entries.get_mut(&staged.image_id) {
            Some(entry) if entry.width == staged.width && entry.height == staged.height => {
                entry.texels = staged.texels;
                entry.content_version += 1;
                CommitOutcome::Rewritten {
                    revision: entry.revision,
                }
            }
            Some(entry) => {
                let previous = entry.revision;
                *entry = TextureRecord {
                    width: staged.width,
                    height: staged.height,
                    revision: previous + 1,
                    content_version: entry.content_version + 1,
                    texels: staged.texels,
                };
                CommitOutcome::Recreated {
                    previous,
                    revision: previous + 1,
                }
            }
            None => {
                self.entries.insert(
                    staged.image_id,
                    TextureRecord {
                        width: staged.width,
                        height: staged.height,
                        revision: 1,
                        content_version: 1,
                        texels: staged.texels,
                    },
                );
                CommitOutcome::Created { revision: 1 }
            }
        };
        tracing::debug!(
            image_id = staged.image_id,
            width = staged.width,
            height = staged.height,
            ?outcome,
            "texture committed"
        );
        Some((staged.image_id, outcome))
    }

    pub fn get(&self, image_id: u32) -> Option<&TextureRecord> {
        self.entries.get(&image_id)
    }

    /// The record a draw referencing `image_id` samples from.
    pub fn resolve(&self, image_id: u32) -> &TextureRecord {
        self.entries.get(&image_id).unwrap_or(&self.default_white)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.staged = None;
    }
}

//! `wgpu` backend.
//!
//! Renders into an offscreen `Rgba8Unorm` target that stands in for the
//! canvas backing store. Per-slot buffers and bind groups come from the
//! [`ResourceCache`]; textures mirror the [`TextureRegistry`] and are
//! recreated (with their bind groups invalidated) whenever a revision moves.
//! Failures inside a frame are collected with error scopes and returned as
//! [`RenderError`] so the renderer can fall back.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};

use crate::config::PowerPreference;
use crate::error::{InitError, RenderError};
use crate::gfx::backend::{DeviceSource, GpuBackend};
use crate::gfx::cache::{BufferFactory, BufferRole, ResourceCache};
use crate::gfx::recorder::FrameState;
use crate::gfx::texture::{BYTES_PER_TEXEL, TextureRecord, TextureRegistry};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const VERTEX_STRIDE: u64 = 16;
const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Acquires a [`GpuRenderer`] on a worker thread.
#[derive(Clone, Copy, Debug)]
pub struct WgpuDeviceSource {
    power_preference: wgpu::PowerPreference,
}

impl WgpuDeviceSource {
    pub fn new(power_preference: PowerPreference) -> Self {
        Self {
            power_preference: power_preference.into(),
        }
    }
}

impl DeviceSource for WgpuDeviceSource {
    type Device = GpuRenderer;

    fn request(&mut self) -> Receiver<Result<GpuRenderer, InitError>> {
        let (tx, rx) = mpsc::channel();
        let power_preference = self.power_preference;
        let spawned = std::thread::Builder::new()
            .name("kagura-gpu-acquire".into())
            .spawn(move || {
                let result = pollster::block_on(GpuRenderer::acquire(power_preference));
                let _ = tx.send(result);
            });
        if let Err(err) = spawned {
            // The sender went down with the closure; the selector sees a
            // disconnected channel and falls back.
            tracing::warn!(error = %err, "failed to spawn GPU acquisition thread");
        }
        rx
    }
}

struct DeviceBuffers<'a> {
    device: &'a wgpu::Device,
}

impl BufferFactory for DeviceBuffers<'_> {
    type Buffer = wgpu::Buffer;

    fn create_buffer(&mut self, role: BufferRole, size: u64) -> wgpu::Buffer {
        let usage = match role {
            BufferRole::Vertex => wgpu::BufferUsages::VERTEX,
            BufferRole::Index => wgpu::BufferUsages::INDEX,
            BufferRole::Uniform => wgpu::BufferUsages::UNIFORM,
        } | wgpu::BufferUsages::COPY_DST;
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(role.label()),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    fn destroy_buffer(&mut self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    revision: u64,
    content_version: u64,
}

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// A draw that survived buffer preparation, replayed inside the pass.
struct PreparedDraw {
    slot: usize,
    image_id: u32,
    revision: u64,
    index_count: u32,
}

pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    target: Option<RenderTarget>,
    textures: HashMap<u32, GpuTexture>,
    white: GpuTexture,
    cache: ResourceCache<wgpu::Buffer, wgpu::BindGroup>,
}

impl GpuRenderer {
    /// Request an adapter and device and build the pipeline.
    pub async fn acquire(power_preference: wgpu::PowerPreference) -> Result<Self, InitError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(InitError::AdapterNotFound)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("kagura.device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::MemoryUsage,
                },
                None,
            )
            .await
            .map_err(|e| InitError::DeviceRequest(e.to_string()))?;

        Ok(Self::from_device(device, queue, adapter.get_info()))
    }

    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, adapter_info: wgpu::AdapterInfo) -> Self {
        device.on_uncaptured_error(Box::new(|err| {
            tracing::error!(error = %err, "uncaptured GPU error");
        }));

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("kagura.shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kagura.bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(16),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("kagura.pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("kagura.pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: VERTEX_STRIDE,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("kagura.sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let white = create_texture(&device, &queue, &TextureRecord::default_white(), "kagura.texture.white");

        Self {
            device,
            queue,
            adapter_info,
            pipeline,
            bind_group_layout,
            sampler,
            target: None,
            textures: HashMap::new(),
            white,
            cache: ResourceCache::new(),
        }
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn ensure_target(&mut self, width: u32, height: u32) {
        if self
            .target
            .as_ref()
            .is_some_and(|t| t.width == width && t.height == height)
        {
            return;
        }
        if let Some(old) = self.target.take() {
            old.texture.destroy();
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("kagura.target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        tracing::debug!(width, height, "GPU target (re)created");
        self.target = Some(RenderTarget {
            texture,
            view,
            width,
            height,
        });
    }

    /// Bring the device copy of `image_id` up to date with `record`.
    fn sync_texture(&mut self, image_id: u32, record: &TextureRecord) -> Result<(), RenderError> {
        if let Some(existing) = self.textures.get_mut(&image_id) {
            if existing.revision == record.revision {
                if existing.content_version != record.content_version {
                    write_texels(&self.queue, &existing.texture, record);
                    existing.content_version = record.content_version;
                }
                return Ok(());
            }
        }

        if let Some(old) = self.drop_texture(image_id) {
            tracing::debug!(image_id, from = old, to = record.revision, "GPU texture recreated");
        }
        let limit = self.device.limits().max_texture_dimension_2d;
        if record.width > limit || record.height > limit {
            return Err(RenderError::Validation(format!(
                "texture {image_id} is {}x{}, over the device limit of {limit}",
                record.width, record.height
            )));
        }
        let texture = create_texture(&self.device, &self.queue, record, "kagura.texture");
        self.textures.insert(image_id, texture);
        Ok(())
    }

    /// Destroy the device copy of `image_id` and every bind group built on
    /// it. Returns the revision it had.
    fn drop_texture(&mut self, image_id: u32) -> Option<u64> {
        let old = self.textures.remove(&image_id)?;
        old.texture.destroy();
        let dropped = self.cache.invalidate_image(image_id);
        tracing::trace!(image_id, dropped, "bind groups invalidated");
        Some(old.revision)
    }

    #[cfg(test)]
    fn cache(&self) -> &ResourceCache<wgpu::Buffer, wgpu::BindGroup> {
        &self.cache
    }

    fn encode_and_submit(
        &mut self,
        frame: &FrameState,
        textures: &TextureRegistry,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        self.ensure_target(width, height);
        for command in &frame.commands {
            let id = command.src_image_id();
            if let Some(record) = textures.get(id) {
                self.sync_texture(id, record)?;
            }
        }

        let mut factory = DeviceBuffers { device: &self.device };
        let mut draws = Vec::with_capacity(frame.commands.len());
        for (slot, command) in frame.commands.iter().enumerate() {
            if command.vertex_count() == 0 || command.index_count() == 0 {
                continue;
            }
            let vertex_bytes: &[u8] = bytemuck::cast_slice(command.vertex_data());
            let index_bytes: &[u8] = bytemuck::cast_slice(command.indices());
            let tint = command.uniform_color();
            let uniform_bytes: &[u8] = bytemuck::cast_slice(&tint);

            let vb = self
                .cache
                .ensure_buffer(&mut factory, slot, BufferRole::Vertex, vertex_bytes.len() as u64);
            self.queue.write_buffer(&vb.buffer, 0, vertex_bytes);
            let ib = self
                .cache
                .ensure_buffer(&mut factory, slot, BufferRole::Index, index_bytes.len() as u64);
            self.queue.write_buffer(&ib.buffer, 0, index_bytes);
            let ub = self
                .cache
                .ensure_buffer(&mut factory, slot, BufferRole::Uniform, uniform_bytes.len() as u64);
            self.queue.write_buffer(&ub.buffer, 0, uniform_bytes);

            let image_id = command.src_image_id();
            let (revision, view) = match self.textures.get(&image_id) {
                Some(t) => (t.revision, &t.view),
                None => (0, &self.white.view),
            };
            let device = &self.device;
            let layout = &self.bind_group_layout;
            let sampler = &self.sampler;
            self.cache.bind_group(slot, image_id, revision, |uniform| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("kagura.bind_group"),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: uniform.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        },
                    ],
                })
            });

            draws.push(PreparedDraw {
                slot,
                image_id,
                revision,
                index_count: command.index_count() as u32,
            });
        }

        let Some(target) = self.target.as_ref() else {
            return Err(RenderError::NotReady);
        };
        let [r, g, b, a] = frame.clear_color.map(f64::from);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kagura.frame"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("kagura.pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            for draw in &draws {
                let (Some(vb), Some(ib), Some(bind_group)) = (
                    self.cache.buffer(draw.slot, BufferRole::Vertex),
                    self.cache.buffer(draw.slot, BufferRole::Index),
                    self.cache.cached_bind_group(draw.slot, draw.image_id, draw.revision),
                ) else {
                    tracing::warn!(slot = draw.slot, "prepared draw lost its resources; skipped");
                    continue;
                };
                pass.set_bind_group(0, bind_group, &[]);
                pass.set_vertex_buffer(0, vb.buffer.slice(..));
                pass.set_index_buffer(ib.buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..draw.index_count, 0, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl GpuBackend for GpuRenderer {
    fn render(
        &mut self,
        frame: &FrameState,
        textures: &TextureRegistry,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::EmptySurface { width, height });
        }
        let limit = self.device.limits().max_texture_dimension_2d;
        if width > limit || height > limit {
            return Err(RenderError::Validation(format!(
                "surface {width}x{height} exceeds the device limit of {limit}"
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let encoded = self.encode_and_submit(frame, textures, width, height);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        encoded?;

        match out_of_memory.or(validation) {
            None => Ok(()),
            Some(err @ wgpu::Error::OutOfMemory { .. }) => Err(RenderError::OutOfMemory(err.to_string())),
            Some(err) => Err(RenderError::Validation(err.to_string())),
        }
    }

    fn read_pixels(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
        let mut out = vec![0; width as usize * height as usize * BYTES_PER_TEXEL];
        let Some(target) = self.target.as_ref() else {
            return Ok(out);
        };

        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (x as i64 + width as i64).min(target.width as i64);
        let y1 = (y as i64 + height as i64).min(target.height as i64);
        if x1 <= x0 || y1 <= y0 {
            return Ok(out);
        }
        let (copy_w, copy_h) = ((x1 - x0) as u32, (y1 - y0) as u32);
        let unpadded = copy_w * BYTES_PER_TEXEL as u32;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kagura.readback"),
            size: padded as u64 * copy_h as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kagura.readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: x0 as u32,
                    y: y0 as u32,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(copy_h),
                },
            },
            wgpu::Extent3d {
                width: copy_w,
                height: copy_h,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(RenderError::Readback(err.to_string())),
            Err(_) => return Err(RenderError::Readback("map callback never ran".into())),
        }

        {
            let data = slice.get_mapped_range();
            let col = (x0 - x as i64) as usize;
            for row in 0..copy_h as usize {
                let src = row * padded as usize;
                let dst_row = row + (y0 - y as i64) as usize;
                let dst = (dst_row * width as usize + col) * BYTES_PER_TEXEL;
                out[dst..dst + unpadded as usize].copy_from_slice(&data[src..src + unpadded as usize]);
            }
        }
        buffer.unmap();
        buffer.destroy();
        Ok(out)
    }

    fn texture_committed(&mut self, image_id: u32, record: &TextureRecord) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let synced = self.sync_texture(image_id, record);
        let scoped = pollster::block_on(self.device.pop_error_scope());
        let failure = synced.err().map(|e| e.to_string()).or(scoped.map(|e| e.to_string()));
        if let Some(error) = failure {
            // Retried at draw time, where a failure falls back to raster.
            self.drop_texture(image_id);
            tracing::warn!(image_id, %error, "texture mirror failed");
        }
    }

    fn release(&mut self) {
        let mut factory = DeviceBuffers { device: &self.device };
        self.cache.clear(&mut factory);
        for (_, texture) in self.textures.drain() {
            texture.texture.destroy();
        }
        if let Some(target) = self.target.take() {
            target.texture.destroy();
        }
        tracing::info!("GPU resources released");
    }

    fn describe(&self) -> String {
        format!("{} ({:?})", self.adapter_info.name, self.adapter_info.backend)
    }
}

fn create_texture(device: &wgpu::Device, queue: &wgpu::Queue, record: &TextureRecord, label: &str) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: record.width,
            height: record.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    write_texels(queue, &texture, record);
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture {
        texture,
        view,
        revision: record.revision,
        content_version: record.content_version,
    }
}

fn write_texels(queue: &wgpu::Queue, texture: &wgpu::Texture, record: &TextureRecord) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &record.texels,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(record.width * BYTES_PER_TEXEL as u32),
            rows_per_image: Some(record.height),
        },
        wgpu::Extent3d {
            width: record.width,
            height: record.height,
            depth_or_array_layers: 1,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::recorder::Recorder;

    fn renderer() -> Option<GpuRenderer> {
        match pollster::block_on(GpuRenderer::acquire(wgpu::PowerPreference::LowPower)) {
            Ok(gpu) => Some(gpu),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    fn upload_solid(textures: &mut TextureRegistry, id: u32, w: i32, h: i32, rgba: [u8; 4]) {
        textures.upload_begin(id, w, h);
        for i in 0..w * h {
            textures.upload_pixel(i, rgba);
        }
        textures.upload_end();
    }

    /// One oversized triangle covering the whole target, sampling `image`.
    fn covering_frame(image: u32) -> FrameState {
        let mut rec = Recorder::new();
        rec.begin_frame([0.0, 0.0, 0.0, 1.0]);
        rec.draw_begin(3, 3, image, [1.0; 4]);
        rec.draw_vertex(0, [-1.0, -1.0, 0.0, 1.0]);
        rec.draw_vertex(1, [3.0, -1.0, 2.0, 1.0]);
        rec.draw_vertex(2, [-1.0, 3.0, 0.0, -1.0]);
        for i in 0..3 {
            rec.draw_index(i, i as u32);
        }
        rec.draw_end();
        rec.take_frame()
    }

    #[test]
    fn reupload_at_new_size_recreates_texture_and_drops_bind_groups() {
        let Some(mut gpu) = renderer() else {
            return;
        };
        let mut textures = TextureRegistry::new();
        upload_solid(&mut textures, 9, 2, 2, [255, 0, 0, 255]);
        gpu.texture_committed(9, textures.get(9).unwrap());
        let frame = covering_frame(9);

        gpu.render(&frame, &textures, 4, 4).unwrap();
        let before = gpu.cache().stats();
        assert_eq!(before.bind_groups_built, 1);
        assert!(gpu.cache().cached_bind_group(0, 9, 1).is_some());
        assert_eq!(gpu.read_pixels(0, 0, 1, 1).unwrap(), vec![255, 0, 0, 255]);

        upload_solid(&mut textures, 9, 4, 1, [0, 255, 0, 255]);
        assert_eq!(textures.get(9).unwrap().revision, 2);
        gpu.render(&frame, &textures, 4, 4).unwrap();

        let after = gpu.cache().stats();
        assert!(after.bind_groups_invalidated > before.bind_groups_invalidated);
        assert!(gpu.cache().cached_bind_group(0, 9, 1).is_none());
        assert!(gpu.cache().cached_bind_group(0, 9, 2).is_some());
        assert_eq!(gpu.textures[&9].revision, 2);
        assert_eq!(gpu.read_pixels(0, 0, 1, 1).unwrap(), vec![0, 255, 0, 255]);
    }

    #[test]
    fn texture_over_the_device_limit_is_not_mirrored() {
        let Some(mut gpu) = renderer() else {
            return;
        };
        let limit = gpu.device.limits().max_texture_dimension_2d;
        let oversized = TextureRecord {
            width: limit + 1,
            height: 1,
            revision: 1,
            content_version: 1,
            texels: vec![0; (limit as usize + 1) * BYTES_PER_TEXEL],
        };
        gpu.texture_committed(3, &oversized);
        assert!(!gpu.textures.contains_key(&3));
        assert!(matches!(gpu.sync_texture(3, &oversized), Err(RenderError::Validation(_))));

        // The device stays usable for ordinary frames.
        let textures = TextureRegistry::new();
        gpu.render(&covering_frame(0), &textures, 2, 2).unwrap();
        assert_eq!(gpu.read_pixels(0, 0, 1, 1).unwrap(), vec![255, 255, 255, 255]);
    }
}

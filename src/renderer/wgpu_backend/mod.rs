// src/renderer/wgpu_backend/mod.rs
//
// `GraphicsDevice` on wgpu. Each clear and each draw records its own render
// pass into the frame's command encoder; uniforms are staged per draw in a
// ring of dynamically offset uniform memory that is recycled after submit.

pub mod context;
pub mod pipeline_builder;
pub mod reflect;

pub use context::GpuContext;
pub use reflect::{ProgramLayout, TextureSlot, UniformMember};

use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;

use glam::Vec4;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::{RenderError, Result};
use crate::renderer::device::*;
use crate::renderer::vertex::{QuadVertex, Vertex};
use pipeline_builder::PipelineBuilder;

const UNIFORM_ARENA_SIZE: u64 = 4 << 20;
/// Texture slots live in the high half of the location space.
const TEXTURE_LOCATION_BIT: u32 = 1 << 31;

struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    layout: ProgramLayout,
    pipeline_layout: wgpu::PipelineLayout,
    texture_group_layout: wgpu::BindGroupLayout,
    uniform_group: wgpu::BindGroup,
    uniform_data: Vec<u8>,
    textures: Vec<Option<(TextureId, SamplerState)>>,
}

struct GpuTexture {
    desc: TargetDescriptor,
    format: wgpu::TextureFormat,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Single-sampled copy of a multisampled target; this is what gets
    /// sampled and read back.
    resolve: Option<(wgpu::Texture, wgpu::TextureView)>,
}

impl GpuTexture {
    fn sampled_view(&self) -> &wgpu::TextureView {
        self.resolve.as_ref().map(|(_, view)| view).unwrap_or(&self.view)
    }

    fn readable(&self) -> &wgpu::Texture {
        self.resolve.as_ref().map(|(texture, _)| texture).unwrap_or(&self.texture)
    }
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    layout: Option<VertexLayout>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramId,
    state: RenderState,
    fill: FillMode,
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    samples: u32,
    vertex: VertexLayout,
}

/// Views of the currently bound targets for one render pass.
struct Attachments {
    colors: Vec<(wgpu::TextureView, Option<wgpu::TextureView>, wgpu::TextureFormat)>,
    depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    samples: u32,
    size: (u32, u32),
}

struct UniformArena {
    buffer: wgpu::Buffer,
    alignment: u64,
    cursor: u64,
}

impl UniformArena {
    fn new(device: &wgpu::Device) -> Self {
        Self {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("UniformArena"),
                size: UNIFORM_ARENA_SIZE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            alignment: device.limits().min_uniform_buffer_offset_alignment as u64,
            cursor: 0,
        }
    }

    /// Stages `data` and returns its dynamic offset, or `None` when the
    /// arena is exhausted until the next submit.
    fn push(&mut self, queue: &wgpu::Queue, data: &[u8]) -> Option<u32> {
        let size = (data.len() as u64).max(1);
        if self.cursor + size > UNIFORM_ARENA_SIZE {
            return None;
        }
        let offset = self.cursor;
        if !data.is_empty() {
            queue.write_buffer(&self.buffer, offset, data);
        }
        self.cursor = (offset + size).div_ceil(self.alignment) * self.alignment;
        Some(offset as u32)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

pub struct WgpuDevice {
    context: GpuContext,
    next_id: u32,
    programs: HashMap<ProgramId, GpuProgram>,
    textures: HashMap<TextureId, GpuTexture>,
    buffers: HashMap<BufferId, GpuBuffer>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: HashMap<SamplerState, wgpu::Sampler>,
    uniform_group_layouts: HashMap<(u32, u32), wgpu::BindGroupLayout>,
    arena: UniformArena,
    white: wgpu::TextureView,
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<wgpu::SurfaceTexture>,
    frame_view: Option<wgpu::TextureView>,
    current_program: Option<ProgramId>,
    targets: TargetBinding,
    state: RenderState,
    fill: FillMode,
    scissor: Option<ScissorRect>,
}

impl WgpuDevice {
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self> {
        let context = GpuContext::new(window, vsync).await?;
        Ok(Self::from_context(context))
    }

    pub fn from_context(context: GpuContext) -> Self {
        let arena = UniformArena::new(&context.device);
        let white = context
            .device
            .create_texture_with_data(
                &context.queue,
                &wgpu::TextureDescriptor {
                    label: Some("White"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &[255, 255, 255, 255],
            )
            .create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            context,
            next_id: 1,
            programs: HashMap::new(),
            textures: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            samplers: HashMap::new(),
            uniform_group_layouts: HashMap::new(),
            arena,
            white,
            encoder: None,
            frame: None,
            frame_view: None,
            current_program: None,
            targets: TargetBinding::Surface,
            state: RenderState::default(),
            fill: FillMode::Solid,
            scissor: None,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.context.resize(width, height);
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.context.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("FrameEncoder"),
            })
        })
    }

    /// Submits everything recorded so far and recycles uniform memory.
    fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.context.queue.submit(std::iter::once(encoder.finish()));
        }
        self.arena.reset();
    }

    /// Format actually allocated for `format`. 32-bit float formats fall back
    /// to half precision when the adapter cannot filter them.
    fn native_format(&self, format: TextureFormat) -> wgpu::TextureFormat {
        let filterable32 = self.context.features.contains(wgpu::Features::FLOAT32_FILTERABLE);
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float if filterable32 => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
            TextureFormat::R32Float if filterable32 => wgpu::TextureFormat::R32Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R16Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }

    fn allocate_texture(&self, label: &str, desc: &TargetDescriptor, usage: wgpu::TextureUsages) -> GpuTexture {
        let format = self.native_format(desc.format);
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let sampled_usage = usage
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::RENDER_ATTACHMENT;
        let multisampled = desc.samples > 1;
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: desc.samples,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: if multisampled {
                wgpu::TextureUsages::RENDER_ATTACHMENT
            } else {
                sampled_usage
            },
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let resolve = (multisampled && !desc.format.is_depth()).then(|| {
            let resolve = self.context.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: sampled_usage,
                view_formats: &[],
            });
            let view = resolve.create_view(&wgpu::TextureViewDescriptor::default());
            (resolve, view)
        });

        GpuTexture {
            desc: *desc,
            format,
            texture,
            view,
            resolve,
        }
    }

    fn uniform_group_layout(&mut self, binding: u32, size: u32) -> wgpu::BindGroupLayout {
        let device = &self.context.device;
        self.uniform_group_layouts
            .entry((binding, size))
            .or_insert_with(|| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = NonZeroU64::new(size as u64)
                    .map(|min_size| wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: Some(min_size),
                        },
                        count: None,
                    })
                    .into_iter()
                    .collect();
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("UniformGroupLayout"),
                    entries: &entries,
                })
            })
            .clone()
    }

    fn sampler(&mut self, state: SamplerState) -> wgpu::Sampler {
        let device = &self.context.device;
        self.samplers
            .entry(state)
            .or_insert_with(|| {
                let address = match state.address {
                    AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
                    AddressMode::Repeat => wgpu::AddressMode::Repeat,
                };
                let (filter, anisotropy) = match state.filter {
                    TextureFilter::None => (wgpu::FilterMode::Nearest, 1),
                    TextureFilter::Bilinear => (wgpu::FilterMode::Linear, 1),
                    TextureFilter::Anisotropic(level) => (wgpu::FilterMode::Linear, level.clamp(1, 16) as u16),
                };
                device.create_sampler(&wgpu::SamplerDescriptor {
                    label: Some("Sampler"),
                    address_mode_u: address,
                    address_mode_v: address,
                    address_mode_w: address,
                    mag_filter: filter,
                    min_filter: filter,
                    mipmap_filter: filter,
                    anisotropy_clamp: anisotropy,
                    ..Default::default()
                })
            })
            .clone()
    }

    fn attachments(&self) -> Result<Attachments> {
        match &self.targets {
            TargetBinding::Surface => {
                let view = self
                    .frame_view
                    .clone()
                    .ok_or_else(|| RenderError::Surface("no frame acquired".to_string()))?;
                Ok(Attachments {
                    colors: vec![(view, None, self.context.config.format)],
                    depth: None,
                    samples: 1,
                    size: (self.context.config.width, self.context.config.height),
                })
            }
            TargetBinding::Offscreen { color, depth_stencil } => {
                let lookup = |id: &TextureId| {
                    self.textures
                        .get(id)
                        .ok_or(RenderError::MissingResource { kind: "texture", id: id.0 })
                };
                let mut colors = Vec::with_capacity(color.len());
                let mut samples = None;
                let mut size = None;
                for id in color {
                    let texture = lookup(id)?;
                    let resolve = texture.resolve.as_ref().map(|(_, view)| view.clone());
                    colors.push((texture.view.clone(), resolve, texture.format));
                    samples.get_or_insert(texture.desc.samples);
                    size.get_or_insert(texture.desc.size());
                }
                let depth = match depth_stencil {
                    Some(id) => {
                        let texture = lookup(id)?;
                        if samples.is_some_and(|s| s != texture.desc.samples) {
                            return Err(RenderError::ResourceCreation {
                                kind: "render pass",
                                label: format!("depth target {}", id.0),
                                message: "sample count differs from colour targets".to_string(),
                            });
                        }
                        samples.get_or_insert(texture.desc.samples);
                        size.get_or_insert(texture.desc.size());
                        Some((texture.view.clone(), texture.format))
                    }
                    None => None,
                };
                Ok(Attachments {
                    colors,
                    depth,
                    samples: samples.unwrap_or(1),
                    size: size.unwrap_or((1, 1)),
                })
            }
        }
    }

    fn pipeline(&mut self, program: ProgramId, attachments: &Attachments, vertex: VertexLayout) -> Result<wgpu::RenderPipeline> {
        let mut fill = self.fill;
        let fill_supported = match fill {
            FillMode::Solid => true,
            FillMode::Wireframe => self.context.features.contains(wgpu::Features::POLYGON_MODE_LINE),
            FillMode::Point => self.context.features.contains(wgpu::Features::POLYGON_MODE_POINT),
        };
        if !fill_supported {
            log::debug!("Fill mode {:?} unsupported; drawing solid", fill);
            fill = FillMode::Solid;
        }

        let key = PipelineKey {
            program,
            state: self.state,
            fill,
            colors: attachments.colors.iter().map(|(_, _, format)| *format).collect(),
            depth: attachments.depth.as_ref().map(|(_, format)| *format),
            samples: attachments.samples,
            vertex,
        };
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }

        let gpu = self
            .programs
            .get(&program)
            .ok_or(RenderError::MissingResource { kind: "program", id: program.0 })?;
        let vertex_layout = match vertex {
            VertexLayout::Mesh => Vertex::layout(),
            VertexLayout::Quad => QuadVertex::layout(),
        };
        let mut builder = PipelineBuilder::new(&self.context.device, &gpu.pipeline_layout, &gpu.module)
            .with_label(&gpu.label)
            .with_vertex_buffer(vertex_layout)
            .with_multisample(key.samples)
            .with_cull(self.state.cull)
            .with_fill(fill);
        for format in &key.colors {
            let blendable = format
                .guaranteed_format_features(self.context.features)
                .flags
                .contains(wgpu::TextureFormatFeatureFlags::BLENDABLE);
            builder = builder.with_color_target(*format, self.state.blend, self.state.color_mask, blendable);
        }
        if let Some(format) = key.depth {
            builder = builder.with_depth_stencil(
                format,
                self.state.depth.map(|d| (d.compare, d.write)),
                self.state.stencil,
            );
        }

        log::debug!("Creating pipeline for {} ({} pipelines cached)", gpu.label, self.pipelines.len());
        let pipeline = builder.build();
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    fn texture_group(&mut self, program: ProgramId) -> Result<wgpu::BindGroup> {
        let (slots, bound, layout) = {
            let gpu = self
                .programs
                .get(&program)
                .ok_or(RenderError::MissingResource { kind: "program", id: program.0 })?;
            (gpu.layout.textures.clone(), gpu.textures.clone(), gpu.texture_group_layout.clone())
        };

        let mut views = Vec::with_capacity(slots.len());
        let mut samplers = Vec::with_capacity(slots.len());
        for (slot, binding) in slots.iter().zip(bound) {
            let (view, state) = match binding.and_then(|(id, state)| self.textures.get(&id).map(|t| (t, state))) {
                Some((texture, state)) if !texture.desc.format.is_depth() => (texture.sampled_view().clone(), state),
                _ => (self.white.clone(), SamplerState::LINEAR_CLAMP),
            };
            views.push((slot.texture_binding, view));
            if let Some(sampler_binding) = slot.sampler_binding {
                samplers.push((sampler_binding, self.sampler(state)));
            }
        }

        let entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .chain(samplers.iter().map(|(binding, sampler)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            }))
            .collect();
        Ok(self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("TextureGroup"),
            layout: &layout,
            entries: &entries,
        }))
    }

    fn stage_uniforms(&mut self, program: ProgramId) -> Result<Option<u32>> {
        let data = match self.programs.get(&program) {
            Some(gpu) if gpu.layout.uniform_size > 0 => gpu.uniform_data.clone(),
            Some(_) => return Ok(None),
            None => return Err(RenderError::MissingResource { kind: "program", id: program.0 }),
        };
        if let Some(offset) = self.arena.push(&self.context.queue, &data) {
            return Ok(Some(offset));
        }
        log::debug!("Uniform arena full; submitting early");
        self.flush();
        self.arena
            .push(&self.context.queue, &data)
            .map(Some)
            .ok_or_else(|| RenderError::ResourceCreation {
                kind: "uniform block",
                label: format!("program {}", program.0),
                message: "larger than the uniform arena".to_string(),
            })
    }

    fn submit_draw(&mut self, vertices: BufferId, indices: Option<BufferId>, range: Range<u32>) -> Result<()> {
        let program = self
            .current_program
            .ok_or(RenderError::MissingResource { kind: "bound program", id: 0 })?;
        let attachments = self.attachments()?;

        let (vertex_buffer, layout) = self
            .buffers
            .get(&vertices)
            .and_then(|b| b.layout.map(|layout| (b.buffer.clone(), layout)))
            .ok_or(RenderError::MissingResource { kind: "vertex buffer", id: vertices.0 })?;
        let index_buffer = match indices {
            Some(id) => Some(
                self.buffers
                    .get(&id)
                    .map(|b| b.buffer.clone())
                    .ok_or(RenderError::MissingResource { kind: "index buffer", id: id.0 })?,
            ),
            None => None,
        };

        let scissor = match self.scissor {
            Some(rect) => {
                let (w, h) = attachments.size;
                let x = rect.x.min(w);
                let y = rect.y.min(h);
                let clamped = ScissorRect {
                    x,
                    y,
                    width: rect.width.min(w - x),
                    height: rect.height.min(h - y),
                };
                if clamped.is_empty() {
                    log::trace!("Draw skipped: scissor outside the target");
                    return Ok(());
                }
                Some(clamped)
            }
            None => None,
        };

        let pipeline = self.pipeline(program, &attachments, layout)?;
        let uniform_offset = self.stage_uniforms(program)?;
        let texture_group = self.texture_group(program)?;
        let uniform_group = self
            .programs
            .get(&program)
            .map(|gpu| gpu.uniform_group.clone())
            .ok_or(RenderError::MissingResource { kind: "program", id: program.0 })?;
        let stencil_reference = self.state.stencil.map(|s| s.reference);

        let color_attachments = color_attachments(&attachments, None);
        let depth_attachment = depth_attachment(&attachments, None);
        let encoder = self.encoder();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Draw"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline);
        match uniform_offset {
            Some(offset) => pass.set_bind_group(0, &uniform_group, &[offset]),
            None => pass.set_bind_group(0, &uniform_group, &[]),
        }
        pass.set_bind_group(1, &texture_group, &[]);
        pass.set_vertex_buffer(0, vertex_buffer.slice(..));
        if let Some(rect) = scissor {
            pass.set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
        }
        if let Some(reference) = stencil_reference {
            pass.set_stencil_reference(reference);
        }
        match index_buffer {
            Some(index_buffer) => {
                pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(range, 0, 0..1);
            }
            None => pass.draw(range, 0..1),
        }
        Ok(())
    }
}

type ClearValues = (ClearFlags, Vec4, f32, u32);

fn color_attachments(attachments: &Attachments, clear: Option<ClearValues>) -> Vec<Option<wgpu::RenderPassColorAttachment<'_>>> {
    let load = match clear {
        Some((flags, color, _, _)) if flags.contains(ClearFlags::COLOR) => wgpu::LoadOp::Clear(wgpu::Color {
            r: color.x as f64,
            g: color.y as f64,
            b: color.z as f64,
            a: color.w as f64,
        }),
        _ => wgpu::LoadOp::Load,
    };
    attachments
        .colors
        .iter()
        .map(|(view, resolve, _)| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: resolve.as_ref(),
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })
        })
        .collect()
}

fn depth_attachment(attachments: &Attachments, clear: Option<ClearValues>) -> Option<wgpu::RenderPassDepthStencilAttachment<'_>> {
    let (view, format) = attachments.depth.as_ref()?;
    let flags = clear.map(|(flags, ..)| flags).unwrap_or(ClearFlags::empty());
    let (depth, stencil) = clear.map(|(_, _, d, s)| (d, s)).unwrap_or((1.0, 0));
    Some(wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load: if flags.contains(ClearFlags::DEPTH) {
                wgpu::LoadOp::Clear(depth)
            } else {
                wgpu::LoadOp::Load
            },
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: format.has_stencil_aspect().then_some(wgpu::Operations {
            load: if flags.contains(ClearFlags::STENCIL) {
                wgpu::LoadOp::Clear(stencil)
            } else {
                wgpu::LoadOp::Load
            },
            store: wgpu::StoreOp::Store,
        }),
    })
}

/// Converts 32-bit float texel data to half precision.
fn to_half(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(4)
        .flat_map(|c| half::f16::from_f32(f32::from_le_bytes([c[0], c[1], c[2], c[3]])).to_le_bytes())
        .collect()
}

fn decode_texels(format: wgpu::TextureFormat, row: &[u8], out: &mut Vec<[f32; 4]>) -> Result<()> {
    let read_half = |c: &[u8]| half::f16::from_le_bytes([c[0], c[1]]).to_f32();
    let read_full = |c: &[u8]| f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
    match format {
        wgpu::TextureFormat::Rgba8Unorm => out.extend(
            row.chunks_exact(4)
                .map(|c| [c[0], c[1], c[2], c[3]].map(|b| b as f32 / 255.0)),
        ),
        wgpu::TextureFormat::Rgba16Float => out.extend(
            row.chunks_exact(8)
                .map(|c| [read_half(&c[0..2]), read_half(&c[2..4]), read_half(&c[4..6]), read_half(&c[6..8])]),
        ),
        wgpu::TextureFormat::Rgba32Float => out.extend(
            row.chunks_exact(16)
                .map(|c| [read_full(&c[0..4]), read_full(&c[4..8]), read_full(&c[8..12]), read_full(&c[12..16])]),
        ),
        wgpu::TextureFormat::R16Float => out.extend(row.chunks_exact(2).map(|c| [read_half(c), 0.0, 0.0, 1.0])),
        wgpu::TextureFormat::R32Float => out.extend(row.chunks_exact(4).map(|c| [read_full(c), 0.0, 0.0, 1.0])),
        other => return Err(RenderError::Readback(format!("cannot read back {:?}", other))),
    }
    Ok(())
}

fn is_wgsl(language: &str) -> bool {
    let language = language.trim();
    language.is_empty() || language.to_ascii_lowercase().starts_with("wgsl")
}

impl GraphicsDevice for WgpuDevice {
    fn default_shader_language(&self) -> &str {
        "wgsl"
    }

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId> {
        if !is_wgsl(source.language) {
            return Err(RenderError::UnsupportedLanguage(source.language.to_string()));
        }
        let code = format!("{}\n{}", source.vertex, source.fragment);
        let (_, layout) = reflect::compile(source.label, &code)?;

        let device = &self.context.device;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(code)),
        });

        let texture_entries: Vec<wgpu::BindGroupLayoutEntry> = layout
            .textures
            .iter()
            .flat_map(|slot| {
                let texture = wgpu::BindGroupLayoutEntry {
                    binding: slot.texture_binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                };
                let sampler = slot.sampler_binding.map(|binding| wgpu::BindGroupLayoutEntry {
                    binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
                std::iter::once(texture).chain(sampler)
            })
            .collect();
        let texture_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(source.label),
            entries: &texture_entries,
        });

        let uniform_binding = layout.uniform_binding.unwrap_or(0);
        let uniform_group_layout = self.uniform_group_layout(uniform_binding, layout.uniform_size);
        let device = &self.context.device;
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(source.label),
            bind_group_layouts: &[&uniform_group_layout, &texture_group_layout],
            push_constant_ranges: &[],
        });

        let uniform_entries: Vec<wgpu::BindGroupEntry> = NonZeroU64::new(layout.uniform_size as u64)
            .map(|size| wgpu::BindGroupEntry {
                binding: uniform_binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.arena.buffer,
                    offset: 0,
                    size: Some(size),
                }),
            })
            .into_iter()
            .collect();
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(source.label),
            layout: &uniform_group_layout,
            entries: &uniform_entries,
        });

        let id = ProgramId(self.next_id());
        log::debug!(
            "Created program {} ({} uniform bytes, {} textures)",
            source.label,
            layout.uniform_size,
            layout.textures.len()
        );
        self.programs.insert(
            id,
            GpuProgram {
                label: source.label.to_string(),
                module,
                uniform_data: vec![0; layout.uniform_size as usize],
                textures: vec![None; layout.textures.len()],
                layout,
                pipeline_layout,
                texture_group_layout,
                uniform_group,
            },
        );
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.pipelines.retain(|key, _| key.program != program);
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = self.programs.contains_key(&program).then_some(program);
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let layout = &self.programs.get(&program)?.layout;
        layout
            .uniform(name)
            .map(|index| UniformLocation(index as u32))
            .or_else(|| {
                layout
                    .texture(name)
                    .map(|index| UniformLocation(TEXTURE_LOCATION_BIT | index as u32))
            })
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation> {
        self.programs.get(&program)?.layout.attribute(name).map(AttributeLocation)
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        let Some(gpu) = self.current_program.and_then(|id| self.programs.get_mut(&id)) else {
            return;
        };
        let Some(member) = gpu.layout.uniforms.get(location.0 as usize) else {
            return;
        };
        let bytes = value.to_bytes();
        let start = member.offset as usize;
        let len = bytes.len().min(member.size as usize);
        gpu.uniform_data[start..start + len].copy_from_slice(&bytes[..len]);
    }

    fn bind_texture(&mut self, location: UniformLocation, texture: TextureId, sampler: SamplerState) {
        if location.0 & TEXTURE_LOCATION_BIT == 0 {
            return;
        }
        let Some(gpu) = self.current_program.and_then(|id| self.programs.get_mut(&id)) else {
            return;
        };
        if let Some(slot) = gpu.textures.get_mut((location.0 & !TEXTURE_LOCATION_BIT) as usize) {
            *slot = Some((texture, sampler));
        }
    }

    fn create_render_target(&mut self, label: &str, desc: &TargetDescriptor) -> Result<TextureId> {
        let texture = self.allocate_texture(label, desc, wgpu::TextureUsages::empty());
        let id = TextureId(self.next_id());
        log::info!("Created render target '{}' {}x{} {:?} x{}", label, desc.width, desc.height, desc.format, desc.samples);
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn create_texture(&mut self, label: &str, desc: &TargetDescriptor, data: &[u8]) -> Result<TextureId> {
        let desc = desc.with_samples(1);
        let expected = (desc.width * desc.height * desc.format.bytes_per_texel()) as usize;
        if data.len() != expected {
            return Err(RenderError::ResourceCreation {
                kind: "texture",
                label: label.to_string(),
                message: format!("expected {} bytes, got {}", expected, data.len()),
            });
        }
        let texture = self.allocate_texture(label, &desc, wgpu::TextureUsages::COPY_DST);
        let upload: Cow<[u8]> = match (desc.format, texture.format) {
            (TextureFormat::Rgba32Float, wgpu::TextureFormat::Rgba16Float)
            | (TextureFormat::R32Float, wgpu::TextureFormat::R16Float) => Cow::Owned(to_half(data)),
            _ => Cow::Borrowed(data),
        };
        let row_bytes = upload.len() as u32 / desc.height;
        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &upload,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        let id = TextureId(self.next_id());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(texture) = self.textures.remove(&texture) {
            texture.texture.destroy();
            if let Some((resolve, _)) = texture.resolve {
                resolve.destroy();
            }
        }
    }

    fn texture_descriptor(&self, texture: TextureId) -> Option<TargetDescriptor> {
        self.textures.get(&texture).map(|t| t.desc)
    }

    fn create_vertex_buffer(&mut self, label: &str, layout: VertexLayout, data: &[u8]) -> Result<BufferId> {
        let buffer = self.context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: data,
            usage: wgpu::BufferUsages::VERTEX,
        });
        let id = BufferId(self.next_id());
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                layout: Some(layout),
            },
        );
        Ok(id)
    }

    fn create_index_buffer(&mut self, label: &str, indices: &[u32]) -> Result<BufferId> {
        let buffer = self.context.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let id = BufferId(self.next_id());
        self.buffers.insert(id, GpuBuffer { buffer, layout: None });
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            buffer.buffer.destroy();
        }
    }

    fn set_render_targets(&mut self, binding: TargetBinding) {
        self.targets = binding;
    }

    fn clear(&mut self, flags: ClearFlags, color: Vec4, depth: f32, stencil: u32) {
        let attachments = match self.attachments() {
            Ok(attachments) => attachments,
            Err(err) => {
                log::warn!("Clear skipped: {}", err);
                return;
            }
        };
        let values = Some((flags, color, depth, stencil));
        let color_attachments = color_attachments(&attachments, values);
        let depth_attachment = depth_attachment(&attachments, values);
        let encoder = self.encoder();
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }

    fn set_render_state(&mut self, state: RenderState) {
        self.state = state;
    }

    fn set_fill_mode(&mut self, mode: FillMode) {
        self.fill = mode;
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.scissor = rect;
    }

    fn draw(&mut self, vertices: BufferId, range: Range<u32>) {
        if let Err(err) = self.submit_draw(vertices, None, range) {
            log::warn!("Draw skipped: {}", err);
        }
    }

    fn draw_indexed(&mut self, vertices: BufferId, indices: BufferId, range: Range<u32>) {
        if let Err(err) = self.submit_draw(vertices, Some(indices), range) {
            log::warn!("Draw skipped: {}", err);
        }
    }

    fn read_target(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>> {
        let (source, format, (width, height)) = {
            let gpu = self
                .textures
                .get(&texture)
                .ok_or(RenderError::MissingResource { kind: "texture", id: texture.0 })?;
            if gpu.desc.format.is_depth() {
                return Err(RenderError::Readback("depth targets cannot be read back".to_string()));
            }
            (gpu.readable().clone(), gpu.format, gpu.desc.size())
        };
        let texel_bytes = format
            .block_copy_size(None)
            .ok_or_else(|| RenderError::Readback(format!("cannot read back {:?}", format)))?;
        let row_bytes = width * texel_bytes;
        let padded_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback"),
            size: (padded_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        self.encoder().copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.flush();

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.context
            .device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|err| RenderError::Readback(err.to_string()))?;
        receiver
            .recv()
            .map_err(|err| RenderError::Readback(err.to_string()))?
            .map_err(|err| RenderError::Readback(err.to_string()))?;

        let mut texels = Vec::with_capacity((width * height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(padded_row as usize) {
                decode_texels(format, &row[..row_bytes as usize], &mut texels)?;
            }
        }
        staging.unmap();
        Ok(texels)
    }

    fn viewport_size(&self) -> (u32, u32) {
        (self.context.config.width, self.context.config.height)
    }

    fn begin_frame(&mut self) -> Result<()> {
        let frame = match self.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.context.reconfigure();
                return Err(RenderError::Surface("surface lost; reconfigured".to_string()));
            }
            Err(err) => return Err(RenderError::Surface(err.to_string())),
        };
        self.frame_view = Some(frame.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        self.frame = Some(frame);
        self.targets = TargetBinding::Surface;
        Ok(())
    }

    fn end_frame(&mut self) {
        self.flush();
        self.frame_view = None;
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_conversion_round_trips_representable_values() {
        let data: Vec<u8> = [1.0f32, -2.5, 0.0, 65504.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut texels = Vec::new();
        decode_texels(wgpu::TextureFormat::Rgba16Float, &to_half(&data), &mut texels).unwrap();
        assert_eq!(texels, vec![[1.0, -2.5, 0.0, 65504.0]]);
    }

    #[test]
    fn red_formats_read_back_as_opaque_red() {
        let mut texels = Vec::new();
        decode_texels(wgpu::TextureFormat::R32Float, &0.25f32.to_le_bytes(), &mut texels).unwrap();
        assert_eq!(texels, vec![[0.25, 0.0, 0.0, 1.0]]);
    }

    #[test]
    fn depth_formats_cannot_be_read_back() {
        let mut texels = Vec::new();
        assert!(decode_texels(wgpu::TextureFormat::Depth32Float, &[0; 4], &mut texels).is_err());
    }

    #[test]
    fn only_wgsl_is_accepted() {
        assert!(is_wgsl("wgsl"));
        assert!(is_wgsl("WGSL-1.0"));
        assert!(is_wgsl(""));
        assert!(!is_wgsl("glsl-330"));
    }
}

// src/renderer/device.rs
//
// The graphics device seam every pass talks to. Passes never touch wgpu
// directly: they ask for programs by source, resolve uniforms by name, and
// drive a small fixed-function state machine (targets, blend, depth, stencil,
// colour mask, fill mode, scissor) before each draw.

use std::ops::Range;

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::Result;

macro_rules! handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);
    };
}

handle!(ProgramId);
handle!(TextureId);
handle!(BufferId);

/// Opaque location of a named uniform or texture slot inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Opaque location of a named vertex attribute inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeLocation(pub u32);

/// Source handed to [`GraphicsDevice::create_program`].
#[derive(Debug, Clone, Copy)]
pub struct ProgramSource<'a> {
    pub label: &'a str,
    pub language: &'a str,
    pub vertex: &'a str,
    pub fragment: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    R16Float,
    R32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            Self::Rgba16Float | Self::Rgba32Float | Self::R16Float | Self::R32Float
        )
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            Self::Rgba8Unorm => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
            Self::R16Float => 2,
            Self::R32Float => 4,
            Self::Depth32Float => 4,
            Self::Depth24PlusStencil8 => 4,
        }
    }
}

/// Everything that decides whether an existing render target can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub samples: u32,
}

impl TargetDescriptor {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            format,
            samples: 1,
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Layout of vertex data; the device derives attribute formats from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    /// position, normal, uv, tangent (see [`crate::renderer::Vertex`]).
    Mesh,
    /// clip-space position and uv (see [`crate::renderer::QuadVertex`]).
    Quad,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorMask: u32 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const RGB = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
        const ALL = Self::RGB.bits() | Self::ALPHA.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
}

/// `src * src_factor + dst * dst_factor`, applied to every written channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendMode {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendMode {
    pub const ADDITIVE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::One,
    };
    pub const MULTIPLY_BY_SRC_ALPHA: Self = Self {
        src: BlendFactor::Zero,
        dst: BlendFactor::SrcAlpha,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Replace,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub compare: CompareFunction,
    pub reference: u32,
    pub pass_op: StencilOp,
}

impl StencilState {
    /// Stamp `reference` on every pixel that passes the depth test.
    pub fn write(reference: u32) -> Self {
        Self {
            compare: CompareFunction::Always,
            reference,
            pass_op: StencilOp::Replace,
        }
    }

    /// Only touch pixels whose stencil equals `reference`.
    pub fn test_equal(reference: u32) -> Self {
        Self {
            compare: CompareFunction::Equal,
            reference,
            pass_op: StencilOp::Keep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub compare: CompareFunction,
    pub write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
    Point,
}

/// Fixed-function state applied to subsequent draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub blend: Option<BlendMode>,
    pub color_mask: ColorMask,
    pub depth: Option<DepthState>,
    pub stencil: Option<StencilState>,
    pub cull: CullMode,
}

impl Default for RenderState {
    fn default() -> Self {
        Self::fullscreen()
    }
}

impl RenderState {
    /// Overwrite every channel, no depth, no culling.
    pub fn fullscreen() -> Self {
        Self {
            blend: None,
            color_mask: ColorMask::ALL,
            depth: None,
            stencil: None,
            cull: CullMode::None,
        }
    }

    pub fn opaque_geometry() -> Self {
        Self {
            blend: None,
            color_mask: ColorMask::ALL,
            depth: Some(DepthState {
                compare: CompareFunction::Less,
                write: true,
            }),
            stencil: None,
            cull: CullMode::Back,
        }
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = Some(blend);
        self
    }

    pub fn with_color_mask(mut self, mask: ColorMask) -> Self {
        self.color_mask = mask;
        self
    }

    pub fn with_stencil(mut self, stencil: StencilState) -> Self {
        self.stencil = Some(stencil);
        self
    }

    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.cull = cull;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFilter {
    None,
    #[default]
    Bilinear,
    Anisotropic(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Clamp,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerState {
    pub filter: TextureFilter,
    pub address: AddressMode,
}

impl SamplerState {
    pub const POINT_CLAMP: Self = Self {
        filter: TextureFilter::None,
        address: AddressMode::Clamp,
    };
    pub const LINEAR_CLAMP: Self = Self {
        filter: TextureFilter::Bilinear,
        address: AddressMode::Clamp,
    };
    pub const POINT_REPEAT: Self = Self {
        filter: TextureFilter::None,
        address: AddressMode::Repeat,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Little-endian bytes as laid out in a WGSL uniform block.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Float(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Int(v) => bytemuck::bytes_of(v).to_vec(),
            Self::Vec2(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            Self::Vec3(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            Self::Vec4(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            Self::Mat4(m) => bytemuck::cast_slice(&m.to_cols_array()).to_vec(),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        Self::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        Self::Mat4(v)
    }
}

/// Where subsequent draws land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetBinding {
    /// The window surface (or whatever the device presents).
    Surface,
    Offscreen {
        color: Vec<TextureId>,
        depth_stencil: Option<TextureId>,
    },
}

impl TargetBinding {
    pub fn color(target: TextureId) -> Self {
        Self::Offscreen {
            color: vec![target],
            depth_stencil: None,
        }
    }

    pub fn with_depth(color: Vec<TextureId>, depth_stencil: Option<TextureId>) -> Self {
        Self::Offscreen {
            color,
            depth_stencil,
        }
    }
}

/// Immediate-mode graphics API consumed by the render passes.
///
/// Every call is frame-synchronous; the device decides how to batch work
/// onto the GPU.
pub trait GraphicsDevice {
    /// Language used when a pass leaves its override empty.
    fn default_shader_language(&self) -> &str;

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId>;
    fn destroy_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: ProgramId);
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation>;
    /// Writes into the currently bound program.
    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue);
    /// Binds a texture to a sampler slot of the currently bound program.
    fn bind_texture(&mut self, location: UniformLocation, texture: TextureId, sampler: SamplerState);

    /// [`set_uniform`](Self::set_uniform) for a location that may not exist.
    fn set_optional_uniform(&mut self, location: Option<UniformLocation>, value: UniformValue) {
        if let Some(location) = location {
            self.set_uniform(location, value);
        }
    }

    fn bind_optional_texture(&mut self, location: Option<UniformLocation>, texture: TextureId, sampler: SamplerState) {
        if let Some(location) = location {
            self.bind_texture(location, texture, sampler);
        }
    }

    fn create_render_target(&mut self, label: &str, desc: &TargetDescriptor) -> Result<TextureId>;
    /// Creates a single-sampled texture and uploads tightly packed texel data.
    fn create_texture(&mut self, label: &str, desc: &TargetDescriptor, data: &[u8]) -> Result<TextureId>;
    fn destroy_texture(&mut self, texture: TextureId);
    fn texture_descriptor(&self, texture: TextureId) -> Option<TargetDescriptor>;

    fn create_vertex_buffer(&mut self, label: &str, layout: VertexLayout, data: &[u8]) -> Result<BufferId>;
    fn create_index_buffer(&mut self, label: &str, indices: &[u32]) -> Result<BufferId>;
    fn destroy_buffer(&mut self, buffer: BufferId);

    fn set_render_targets(&mut self, binding: TargetBinding);
    fn clear(&mut self, flags: ClearFlags, color: Vec4, depth: f32, stencil: u32);
    fn set_render_state(&mut self, state: RenderState);
    fn set_fill_mode(&mut self, mode: FillMode);
    fn set_scissor(&mut self, rect: Option<ScissorRect>);

    fn draw(&mut self, vertices: BufferId, range: Range<u32>);
    fn draw_indexed(&mut self, vertices: BufferId, indices: BufferId, range: Range<u32>);

    /// Reads a float colour target back to the CPU, one RGBA value per texel.
    fn read_target(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>>;

    /// Size of the surface bound by [`TargetBinding::Surface`].
    fn viewport_size(&self) -> (u32, u32);

    fn begin_frame(&mut self) -> Result<()> {
        Ok(())
    }

    fn end_frame(&mut self) {}
}

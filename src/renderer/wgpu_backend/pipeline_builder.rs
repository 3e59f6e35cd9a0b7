// src/renderer/wgpu_backend/pipeline_builder.rs

use crate::renderer::device::{
    BlendFactor, BlendMode, ColorMask, CompareFunction, CullMode, FillMode, StencilOp, StencilState,
};

/// Fluent construction of render pipelines for generated programs.
///
/// Defaults to `vs_main`/`fs_main`, triangle lists, counter-clockwise front
/// faces and single sampling.
pub struct PipelineBuilder<'a> {
    device: &'a wgpu::Device,
    label: Option<&'a str>,
    layout: &'a wgpu::PipelineLayout,
    shader: &'a wgpu::ShaderModule,
    vertex_entry: &'a str,
    fragment_entry: &'a str,
    vertex_buffers: Vec<wgpu::VertexBufferLayout<'a>>,
    color_targets: Vec<Option<wgpu::ColorTargetState>>,
    depth_stencil: Option<wgpu::DepthStencilState>,
    primitive: wgpu::PrimitiveState,
    multisample: wgpu::MultisampleState,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(device: &'a wgpu::Device, layout: &'a wgpu::PipelineLayout, shader: &'a wgpu::ShaderModule) -> Self {
        Self {
            device,
            label: None,
            layout,
            shader,
            vertex_entry: "vs_main",
            fragment_entry: "fs_main",
            vertex_buffers: Vec::new(),
            color_targets: Vec::new(),
            depth_stencil: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                front_face: wgpu::FrontFace::Ccw,
                polygon_mode: wgpu::PolygonMode::Fill,
                ..Default::default()
            },
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
        }
    }

    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_vertex_buffer(mut self, layout: wgpu::VertexBufferLayout<'a>) -> Self {
        self.vertex_buffers.push(layout);
        self
    }

    /// Adds a colour target; `blend` is dropped for formats that cannot blend.
    pub fn with_color_target(mut self, format: wgpu::TextureFormat, blend: Option<BlendMode>, mask: ColorMask, blendable: bool) -> Self {
        let blend = match blend {
            Some(mode) if blendable => Some(blend_state(mode)),
            Some(_) => {
                log::warn!("Blending disabled for non-blendable target format {:?}", format);
                None
            }
            None => None,
        };
        self.color_targets.push(Some(wgpu::ColorTargetState {
            format,
            blend,
            write_mask: color_writes(mask),
        }));
        self
    }

    /// Depth attachment with an optional depth test; without one the test
    /// always passes and nothing is written.
    pub fn with_depth_stencil(
        mut self,
        format: wgpu::TextureFormat,
        depth: Option<(CompareFunction, bool)>,
        stencil: Option<StencilState>,
    ) -> Self {
        let (compare, write) = depth.unwrap_or((CompareFunction::Always, false));
        let stencil = match stencil {
            Some(state) if format.has_stencil_aspect() => {
                let face = wgpu::StencilFaceState {
                    compare: compare_function(state.compare),
                    fail_op: wgpu::StencilOperation::Keep,
                    depth_fail_op: wgpu::StencilOperation::Keep,
                    pass_op: stencil_operation(state.pass_op),
                };
                wgpu::StencilState {
                    front: face,
                    back: face,
                    read_mask: 0xff,
                    write_mask: 0xff,
                }
            }
            _ => wgpu::StencilState::default(),
        };
        self.depth_stencil = Some(wgpu::DepthStencilState {
            format,
            depth_write_enabled: write,
            depth_compare: compare_function(compare),
            stencil,
            bias: wgpu::DepthBiasState::default(),
        });
        self
    }

    pub fn with_multisample(mut self, sample_count: u32) -> Self {
        self.multisample.count = sample_count.max(1);
        self
    }

    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.primitive.cull_mode = match cull {
            CullMode::None => None,
            CullMode::Back => Some(wgpu::Face::Back),
            CullMode::Front => Some(wgpu::Face::Front),
        };
        self
    }

    pub fn with_fill(mut self, fill: FillMode) -> Self {
        self.primitive.polygon_mode = match fill {
            FillMode::Solid => wgpu::PolygonMode::Fill,
            FillMode::Wireframe => wgpu::PolygonMode::Line,
            FillMode::Point => wgpu::PolygonMode::Point,
        };
        self
    }

    pub fn build(self) -> wgpu::RenderPipeline {
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: self.label,
            layout: Some(self.layout),
            vertex: wgpu::VertexState {
                module: self.shader,
                entry_point: Some(self.vertex_entry),
                buffers: &self.vertex_buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: self.shader,
                entry_point: Some(self.fragment_entry),
                targets: &self.color_targets,
                compilation_options: Default::default(),
            }),
            primitive: self.primitive,
            depth_stencil: self.depth_stencil,
            multisample: self.multisample,
            multiview: None,
            cache: None,
        })
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
    }
}

pub fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(mode.src),
        dst_factor: blend_factor(mode.dst),
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

pub fn color_writes(mask: ColorMask) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    for (bit, write) in [
        (ColorMask::RED, wgpu::ColorWrites::RED),
        (ColorMask::GREEN, wgpu::ColorWrites::GREEN),
        (ColorMask::BLUE, wgpu::ColorWrites::BLUE),
        (ColorMask::ALPHA, wgpu::ColorWrites::ALPHA),
    ] {
        if mask.contains(bit) {
            writes |= write;
        }
    }
    writes
}

pub fn compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn stencil_operation(op: StencilOp) -> wgpu::StencilOperation {
    match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_mask_leaves_alpha_untouched() {
        assert_eq!(color_writes(ColorMask::RGB), wgpu::ColorWrites::COLOR);
        assert_eq!(color_writes(ColorMask::ALL), wgpu::ColorWrites::ALL);
    }

    #[test]
    fn multiply_by_source_alpha_keeps_destination() {
        let blend = blend_state(BlendMode::MULTIPLY_BY_SRC_ALPHA);
        assert_eq!(blend.alpha.src_factor, wgpu::BlendFactor::Zero);
        assert_eq!(blend.alpha.dst_factor, wgpu::BlendFactor::SrcAlpha);
    }
}

// Edge anti-aliasing driven by GBuffer normal and depth discontinuities.
use glam::Vec4;
use serde::{Deserialize, Serialize};

use super::{consume_image, PostContext};
use crate::renderer::device::*;
use crate::renderer::program::{effective_language, FeatureSet, NoFeatures, ProgramBindings, ProgramVariantCache};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeAaSettings {
    pub enabled: bool,
    pub weight_scale: f32,
    /// Relative depth change that counts as an edge.
    pub depth_threshold: f32,
    /// Normal dot product below which neighbours are on different faces.
    pub normal_threshold: f32,
    pub shader_language: String,
}

impl Default for EdgeAaSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            weight_scale: 1.0,
            depth_threshold: 0.1,
            normal_threshold: 0.8,
            shader_language: String::new(),
        }
    }
}

#[derive(Clone, Copy)]
struct EdgeAaBindings {
    params: Option<UniformLocation>,
    texel_size: Option<UniformLocation>,
    source: Option<UniformLocation>,
    normal_depth: Option<UniformLocation>,
}

impl ProgramBindings for EdgeAaBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        let loc = |name| device.uniform_location(program, name);
        Self {
            params: loc("edge_params"),
            texel_size: loc("texel_size"),
            source: loc("source_texture"),
            normal_depth: loc("normal_depth_texture"),
        }
    }
}

#[derive(Default)]
pub struct EdgeAaPass {
    programs: ProgramVariantCache<NoFeatures, EdgeAaBindings>,
    quad: FullscreenQuad,
}

impl EdgeAaPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw(&mut self, device: &mut dyn GraphicsDevice, settings: &EdgeAaSettings, ctx: &mut PostContext<'_>) -> bool {
        let language = effective_language(&*device, &settings.shader_language);
        let Some(program) = self
            .programs
            .get_program(device, &language, NoFeatures::empty().to_mask(), &shaders::EDGE_AA)
        else {
            return false;
        };
        let (width, height) = ctx.surfaces.size();
        let Some(image) = consume_image(device, ctx.surfaces) else {
            return false;
        };
        let b = *program.bind(device);
        device.set_optional_uniform(
            b.params,
            Vec4::new(
                settings.weight_scale.max(0.0),
                settings.depth_threshold.max(1.0e-4),
                settings.normal_threshold.clamp(-1.0, 1.0),
                0.0,
            )
            .into(),
        );
        device.set_optional_uniform(
            b.texel_size,
            Vec4::new(1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32, 0.0, 0.0).into(),
        );
        device.bind_optional_texture(b.source, image, SamplerState::LINEAR_CLAMP);
        device.bind_optional_texture(b.normal_depth, ctx.gbuffer.normal_depth, SamplerState::POINT_CLAMP);
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.programs.clear(device);
        self.quad.release(device);
    }
}

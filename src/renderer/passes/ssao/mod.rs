// src/renderer/passes/ssao/mod.rs
//
// Screen-space ambient occlusion. The base pass owns the working targets,
// runs the selected technique, blurs the raw term with a normal/depth aware
// separable filter and finally multiplies it into the GBuffer albedo alpha.

mod hbao;
mod hdao;

pub use hbao::{HbaoSettings, HorizonBasedAo, RANDOM_TEXTURE_SIZE};
pub use hdao::{HdaoSettings, HighDefinitionAo};

use bitflags::bitflags;
use glam::{Vec2, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::renderer::device::*;
use crate::renderer::passes::gbuffer::GBufferViews;
use crate::renderer::program::{
    effective_language, FeatureSet, NoFeatures, ProgramBindings, ProgramVariantCache,
};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;
use crate::renderer::target::ManagedTarget;
use crate::scene::Camera;

/// Smallest sampling radius a technique is ever run with.
pub const MIN_AO_RADIUS: f32 = 1.0e-3;

pub const AO_FORMAT: TextureFormat = TextureFormat::R16Float;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AoFeatures: u32 {
        /// Use the per-fragment GBuffer normal.
        const NORMAL = 1 << 0;
    }
}

impl FeatureSet for AoFeatures {
    fn vertex_stage() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AoTechniqueKind {
    #[default]
    HorizonBased,
    HighDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsaoSettings {
    #[serde(default = "SsaoSettings::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub technique: AoTechniqueKind,
    #[serde(default)]
    pub no_blur: bool,
    /// Sample with flat, depth-derived normals instead of GBuffer normals.
    #[serde(default)]
    pub no_normals: bool,
    /// Depth difference scale of the bilateral blur weights.
    #[serde(default = "SsaoSettings::default_blur_sharpness")]
    pub blur_sharpness: f32,
    #[serde(default = "SsaoSettings::default_blur_radius")]
    pub blur_radius: u32,
    #[serde(default)]
    pub hbao: HbaoSettings,
    #[serde(default)]
    pub hdao: HdaoSettings,
    #[serde(default)]
    pub shader_language: String,
}

impl Default for SsaoSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            technique: AoTechniqueKind::default(),
            no_blur: false,
            no_normals: false,
            blur_sharpness: Self::default_blur_sharpness(),
            blur_radius: Self::default_blur_radius(),
            hbao: HbaoSettings::default(),
            hdao: HdaoSettings::default(),
            shader_language: String::new(),
        }
    }
}

impl SsaoSettings {
    const fn default_enabled() -> bool {
        true
    }

    const fn default_blur_sharpness() -> f32 {
        16.0
    }

    const fn default_blur_radius() -> u32 {
        4
    }
}

/// Per-frame inputs shared by both techniques.
#[derive(Debug, Clone, Copy)]
pub struct AoInput {
    pub normal_depth: TextureId,
    pub size: (u32, u32),
    /// See [`Camera::view_ray_scale`].
    pub ray_scale: Vec2,
    pub features: AoFeatures,
}

impl AoInput {
    pub fn texel_size(&self) -> Vec2 {
        Vec2::new(1.0 / self.size.0.max(1) as f32, 1.0 / self.size.1.max(1) as f32)
    }
}

/// The closed set of occlusion techniques.
pub enum AoTechnique {
    HorizonBased(HorizonBasedAo),
    HighDefinition(HighDefinitionAo),
}

impl AoTechnique {
    pub fn new(kind: AoTechniqueKind) -> Self {
        match kind {
            AoTechniqueKind::HorizonBased => Self::HorizonBased(HorizonBasedAo::new()),
            AoTechniqueKind::HighDefinition => Self::HighDefinition(HighDefinitionAo::new()),
        }
    }

    pub fn kind(&self) -> AoTechniqueKind {
        match self {
            Self::HorizonBased(_) => AoTechniqueKind::HorizonBased,
            Self::HighDefinition(_) => AoTechniqueKind::HighDefinition,
        }
    }

    /// Renders the raw occlusion term into the bound target.
    pub fn draw_ao(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        quad: &mut FullscreenQuad,
        settings: &SsaoSettings,
        input: &AoInput,
    ) -> bool {
        match self {
            Self::HorizonBased(hbao) => hbao.draw_ao(device, language, quad, &settings.hbao, input),
            Self::HighDefinition(hdao) => hdao.draw_ao(device, language, quad, &settings.hdao, input),
        }
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        match self {
            Self::HorizonBased(hbao) => hbao.release(device),
            Self::HighDefinition(hdao) => hdao.release(device),
        }
    }
}

#[derive(Clone, Copy)]
struct BlurBindings {
    blur_step: Option<UniformLocation>,
    ao: Option<UniformLocation>,
    normal_depth: Option<UniformLocation>,
}

impl ProgramBindings for BlurBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        Self {
            blur_step: device.uniform_location(program, "blur_step"),
            ao: device.uniform_location(program, "ao_texture"),
            normal_depth: device.uniform_location(program, "normal_depth_texture"),
        }
    }
}

#[derive(Clone, Copy)]
struct CompositeBindings {
    ao: Option<UniformLocation>,
}

impl ProgramBindings for CompositeBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        Self {
            ao: device.uniform_location(program, "ao_texture"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AoStats {
    pub technique_draws: usize,
    pub blur_draws: usize,
    pub composited: bool,
}

pub struct AmbientOcclusionPass {
    technique: AoTechnique,
    ao: ManagedTarget,
    blur: ManagedTarget,
    quad: FullscreenQuad,
    blur_programs: ProgramVariantCache<AoFeatures, BlurBindings>,
    composite_programs: ProgramVariantCache<NoFeatures, CompositeBindings>,
    stats: AoStats,
}

impl Default for AmbientOcclusionPass {
    fn default() -> Self {
        Self::new(AoTechniqueKind::default())
    }
}

impl AmbientOcclusionPass {
    pub fn new(kind: AoTechniqueKind) -> Self {
        Self {
            technique: AoTechnique::new(kind),
            ao: ManagedTarget::new("AoResult"),
            blur: ManagedTarget::new("AoBlur"),
            quad: FullscreenQuad::new(),
            blur_programs: ProgramVariantCache::new(),
            composite_programs: ProgramVariantCache::new(),
            stats: AoStats::default(),
        }
    }

    pub fn technique(&self) -> &AoTechnique {
        &self.technique
    }

    pub fn stats(&self) -> AoStats {
        self.stats
    }

    /// Latest occlusion result.
    pub fn result(&self) -> Option<TextureId> {
        self.ao.id()
    }

    fn allocate(&mut self, device: &mut dyn GraphicsDevice, size: (u32, u32)) -> Result<(TextureId, TextureId)> {
        let desc = TargetDescriptor::new(size.0, size.1, AO_FORMAT);
        let ao = self.ao.ensure(device, &desc)?;
        let blur = self.blur.ensure(device, &desc)?;
        Ok((ao, blur))
    }

    /// Computes occlusion from the GBuffer and folds it into the albedo
    /// alpha channel. Returns the occlusion texture on success.
    pub fn draw(
        &mut self,
        device: &mut dyn GraphicsDevice,
        settings: &SsaoSettings,
        gbuffer: &GBufferViews,
        camera: &Camera,
    ) -> Option<TextureId> {
        self.stats = AoStats::default();
        if !settings.enabled {
            return None;
        }

        if self.technique.kind() != settings.technique {
            log::info!("Switching AO technique to {:?}", settings.technique);
            self.technique.release(device);
            self.technique = AoTechnique::new(settings.technique);
        }

        let (ao, blur) = match self.allocate(device, gbuffer.size) {
            Ok(targets) => targets,
            Err(err) => {
                log::error!("AO pass skipped: {}", err);
                return None;
            }
        };

        let mut features = AoFeatures::empty();
        features.set(AoFeatures::NORMAL, !settings.no_normals);
        let input = AoInput {
            normal_depth: gbuffer.normal_depth,
            size: gbuffer.size,
            ray_scale: camera.view_ray_scale(gbuffer.size.0 as f32 / gbuffer.size.1.max(1) as f32),
            features,
        };
        let language = effective_language(&*device, &settings.shader_language);

        device.set_render_targets(TargetBinding::color(ao));
        device.set_render_state(RenderState::fullscreen());
        device.set_scissor(None);
        if !self
            .technique
            .draw_ao(device, &language, &mut self.quad, settings, &input)
        {
            return None;
        }
        self.stats.technique_draws += 1;

        if !settings.no_blur {
            let texel = input.texel_size();
            let passes = [
                (blur, ao, Vec2::new(texel.x, 0.0)),
                (ao, blur, Vec2::new(0.0, texel.y)),
            ];
            for (target, source, step) in passes {
                if !self.blur_pass(device, &language, settings, &input, target, source, step) {
                    break;
                }
                self.stats.blur_draws += 1;
            }
        }

        self.stats.composited = self.composite(device, &language, gbuffer.albedo, ao);
        Some(ao)
    }

    #[allow(clippy::too_many_arguments)]
    fn blur_pass(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        settings: &SsaoSettings,
        input: &AoInput,
        target: TextureId,
        source: TextureId,
        step: Vec2,
    ) -> bool {
        let Some(program) = self
            .blur_programs
            .get_program(device, language, input.features.to_mask(), &shaders::AO_BLUR)
        else {
            return false;
        };
        device.set_render_targets(TargetBinding::color(target));
        let b = *program.bind(device);
        if let Some(loc) = b.blur_step {
            let radius = settings.blur_radius.clamp(1, 16) as f32;
            device.set_uniform(
                loc,
                Vec4::new(step.x, step.y, settings.blur_sharpness.max(0.0), radius).into(),
            );
        }
        if let Some(loc) = b.ao {
            device.bind_texture(loc, source, SamplerState::POINT_CLAMP);
        }
        if let Some(loc) = b.normal_depth {
            device.bind_texture(loc, input.normal_depth, SamplerState::POINT_CLAMP);
        }
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device)
    }

    /// albedo.a *= ao, colour channels untouched.
    fn composite(&mut self, device: &mut dyn GraphicsDevice, language: &str, albedo: TextureId, ao: TextureId) -> bool {
        let Some(program) =
            self.composite_programs
                .get_program(device, language, NoFeatures::empty().to_mask(), &shaders::AO_COMPOSITE)
        else {
            return false;
        };
        device.set_render_targets(TargetBinding::color(albedo));
        let b = *program.bind(device);
        if let Some(loc) = b.ao {
            device.bind_texture(loc, ao, SamplerState::POINT_CLAMP);
        }
        device.set_render_state(
            RenderState::fullscreen()
                .with_blend(BlendMode::MULTIPLY_BY_SRC_ALPHA)
                .with_color_mask(ColorMask::ALPHA),
        );
        self.quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.technique.release(device);
        self.ao.release(device);
        self.blur.release(device);
        self.quad.release(device);
        self.blur_programs.clear(device);
        self.composite_programs.clear(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::headless::HeadlessDevice;

    fn gbuffer(device: &mut HeadlessDevice, size: (u32, u32)) -> GBufferViews {
        let color = TargetDescriptor::new(size.0, size.1, TextureFormat::Rgba16Float);
        let depth = TargetDescriptor::new(size.0, size.1, TextureFormat::Depth24PlusStencil8);
        GBufferViews {
            albedo: device.create_render_target("albedo", &color).unwrap(),
            normal_depth: device.create_render_target("normal_depth", &color).unwrap(),
            specular: device.create_render_target("specular", &color).unwrap(),
            emissive: device.create_render_target("emissive", &color).unwrap(),
            depth_stencil: device.create_render_target("depth", &depth).unwrap(),
            size,
            emissive_used: false,
        }
    }

    #[test]
    fn blur_runs_horizontal_then_vertical() {
        let mut device = HeadlessDevice::new(64, 64);
        let views = gbuffer(&mut device, (64, 64));
        let mut pass = AmbientOcclusionPass::default();
        let result = pass.draw(&mut device, &SsaoSettings::default(), &views, &Camera::default());

        let blurs = device.draws_with_program("ao_blur");
        assert_eq!(blurs.len(), 2);
        // Second blur lands back in the result target
        assert_eq!(blurs[1].targets, TargetBinding::color(result.unwrap()));
        assert_eq!(pass.stats().blur_draws, 2);
    }

    #[test]
    fn composite_touches_only_albedo_alpha() {
        let mut device = HeadlessDevice::new(32, 32);
        let views = gbuffer(&mut device, (32, 32));
        let mut pass = AmbientOcclusionPass::new(AoTechniqueKind::HighDefinition);
        pass.draw(&mut device, &SsaoSettings {
            technique: AoTechniqueKind::HighDefinition,
            ..SsaoSettings::default()
        }, &views, &Camera::default());

        let composite = device.draws_with_program("ao_composite");
        assert_eq!(composite.len(), 1);
        assert_eq!(composite[0].targets, TargetBinding::color(views.albedo));
        assert_eq!(composite[0].state.color_mask, ColorMask::ALPHA);
        assert_eq!(composite[0].state.blend, Some(BlendMode::MULTIPLY_BY_SRC_ALPHA));
    }

    #[test]
    fn targets_follow_gbuffer_size() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut pass = AmbientOcclusionPass::default();
        let small = gbuffer(&mut device, (32, 32));
        pass.draw(&mut device, &SsaoSettings::default(), &small, &Camera::default());
        device.reset_counters();
        pass.draw(&mut device, &SsaoSettings::default(), &small, &Camera::default());
        assert_eq!(device.textures_created(), 0);

        let large = gbuffer(&mut device, (64, 64));
        device.reset_counters();
        pass.draw(&mut device, &SsaoSettings::default(), &large, &Camera::default());
        // AO result and blur target
        assert_eq!(device.textures_destroyed(), 2);
        assert_eq!(device.textures_created(), 2);
    }

    #[test]
    fn switching_technique_drops_old_programs() {
        let mut device = HeadlessDevice::new(32, 32);
        let views = gbuffer(&mut device, (32, 32));
        let mut pass = AmbientOcclusionPass::default();
        pass.draw(&mut device, &SsaoSettings::default(), &views, &Camera::default());
        assert_eq!(pass.technique().kind(), AoTechniqueKind::HorizonBased);

        let hdao = SsaoSettings {
            technique: AoTechniqueKind::HighDefinition,
            ..SsaoSettings::default()
        };
        pass.draw(&mut device, &hdao, &views, &Camera::default());
        assert_eq!(pass.technique().kind(), AoTechniqueKind::HighDefinition);
        assert_eq!(device.draws_with_program("hdao").len(), 1);
    }
}

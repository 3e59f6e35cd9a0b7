// Light shafts: radial blur of the GBuffer emissive/glow target towards the
// light's screen position, added on top of the image.
use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use super::{consume_image, PostContext};
use crate::renderer::device::*;
use crate::renderer::lights::LightKind;
use crate::renderer::program::{effective_language, FeatureSet, NoFeatures, ProgramBindings, ProgramVariantCache};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;
use crate::scene::Camera;

pub const MAX_SAMPLES: u32 = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GodRaysSettings {
    pub enabled: bool,
    pub density: f32,
    pub weight: f32,
    pub decay: f32,
    pub exposure: f32,
    pub samples: u32,
    pub shader_language: String,
}

impl Default for GodRaysSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            density: 0.9,
            weight: 0.4,
            decay: 0.95,
            exposure: 0.3,
            samples: 64,
            shader_language: String::new(),
        }
    }
}

/// Texture-space position of a world point, `None` when it is behind the
/// camera.
pub fn screen_position(camera: &Camera, aspect: f32, world: Vec3) -> Option<Vec2> {
    let clip = camera.view_proj(aspect) * world.extend(1.0);
    if clip.w <= 1.0e-5 {
        return None;
    }
    let ndc = Vec2::new(clip.x, clip.y) / clip.w;
    Some(Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5))
}

#[derive(Clone, Copy)]
struct GodRaysBindings {
    params: Option<UniformLocation>,
    light_screen: Option<UniformLocation>,
    source: Option<UniformLocation>,
    emissive: Option<UniformLocation>,
}

impl ProgramBindings for GodRaysBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        let loc = |name| device.uniform_location(program, name);
        Self {
            params: loc("god_rays_params"),
            light_screen: loc("light_screen"),
            source: loc("source_texture"),
            emissive: loc("emissive_texture"),
        }
    }
}

#[derive(Default)]
pub struct GodRaysPass {
    programs: ProgramVariantCache<NoFeatures, GodRaysBindings>,
    quad: FullscreenQuad,
}

impl GodRaysPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// World position the rays emanate from: far along the first directional
    /// light, otherwise the first positional light.
    fn source_position(ctx: &PostContext<'_>) -> Option<Vec3> {
        let directional = ctx
            .lights
            .iter()
            .find(|r| r.light.kind == LightKind::Directional)
            .map(|r| ctx.camera.position() - r.light.direction * ctx.camera.far * 0.9);
        directional.or_else(|| ctx.lights.first().map(|r| r.light.position))
    }

    pub fn draw(&mut self, device: &mut dyn GraphicsDevice, settings: &GodRaysSettings, ctx: &mut PostContext<'_>) -> bool {
        if !ctx.gbuffer.emissive_used {
            log::trace!("God rays skipped: nothing emissive this frame");
            return false;
        }
        let (width, height) = ctx.surfaces.size();
        let aspect = width as f32 / height.max(1) as f32;
        let Some(light) = Self::source_position(ctx).and_then(|p| screen_position(ctx.camera, aspect, p)) else {
            log::trace!("God rays skipped: no light in front of the camera");
            return false;
        };

        let language = effective_language(&*device, &settings.shader_language);
        let Some(program) = self
            .programs
            .get_program(device, &language, NoFeatures::empty().to_mask(), &shaders::GOD_RAYS)
        else {
            return false;
        };
        let Some(image) = consume_image(device, ctx.surfaces) else {
            return false;
        };
        let b = *program.bind(device);
        device.set_optional_uniform(
            b.params,
            Vec4::new(
                settings.density.clamp(0.0, 1.0),
                settings.weight.max(0.0),
                settings.decay.clamp(0.0, 1.0),
                settings.exposure.max(0.0),
            )
            .into(),
        );
        let samples = settings.samples.clamp(1, MAX_SAMPLES) as f32;
        device.set_optional_uniform(b.light_screen, Vec4::new(light.x, light.y, samples, 0.0).into());
        device.bind_optional_texture(b.source, image, SamplerState::POINT_CLAMP);
        device.bind_optional_texture(b.emissive, ctx.gbuffer.emissive, SamplerState::LINEAR_CLAMP);
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.programs.clear(device);
        self.quad.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_projects_to_screen_centre() {
        let camera = Camera::default();
        let p = screen_position(&camera, 1.0, camera.target).unwrap();
        assert!(p.abs_diff_eq(Vec2::splat(0.5), 1e-5));
    }

    #[test]
    fn points_behind_camera_have_no_position() {
        let camera = Camera::default();
        let behind = camera.position() - camera.forward() * 5.0;
        assert!(screen_position(&camera, 1.0, behind).is_none());
    }
}

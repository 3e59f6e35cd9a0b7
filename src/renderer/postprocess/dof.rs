// src/renderer/postprocess/dof.rs
//
// Depth of field: per-pixel blur weight from linear depth, a downsampled
// copy blurred with a separable filter, then a weighted composite of sharp
// and blurred images.

use bitflags::bitflags;
use glam::{Vec2, Vec4};
use serde::{Deserialize, Serialize};

use super::{consume_image, PostContext};
use crate::error::Result;
use crate::renderer::device::*;
use crate::renderer::program::{effective_language, FeatureSet, ProgramBindings, ProgramVariantCache};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;
use crate::renderer::target::ManagedTarget;

bitflags! {
    /// One program variant per stage.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DofStage: u32 {
        const DEPTH_BLUR = 1 << 0;
        const DOWNSAMPLE = 1 << 1;
        const BLUR = 1 << 2;
        const COMPOSITE = 1 << 3;
    }
}

impl FeatureSet for DofStage {
    fn vertex_stage() -> Self {
        Self::empty()
    }
}

/// Focus description in linear view depth; cameras may carry their own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DofSettings {
    pub near_plane_depth: f32,
    pub focal_plane_depth: f32,
    pub far_plane_depth: f32,
    /// Upper bound of the blur weight.
    pub blur_cutoff: f32,
}

impl Default for DofSettings {
    fn default() -> Self {
        Self {
            near_plane_depth: 1.0,
            focal_plane_depth: 8.0,
            far_plane_depth: 30.0,
            blur_cutoff: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DofPassSettings {
    pub enabled: bool,
    /// Used when the camera has no active settings of its own.
    pub defaults: DofSettings,
    pub blur_passes: u32,
    pub shader_language: String,
}

impl Default for DofPassSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            defaults: DofSettings::default(),
            blur_passes: 1,
            shader_language: String::new(),
        }
    }
}

/// `(focal, 1 / (focal - near), 1 / (far - focal), cutoff)`.
///
/// Near and far are pushed at least a few ulps away from the focal plane so
/// every component stays finite, including `near == focal == far`.
pub fn depth_blur_params(settings: &DofSettings) -> Vec4 {
    let focal = settings.focal_plane_depth;
    let epsilon = focal.abs().max(1.0) * f32::EPSILON * 4.0;
    let near = settings.near_plane_depth.min(focal - epsilon);
    let far = settings.far_plane_depth.max(focal + epsilon);
    Vec4::new(
        focal,
        1.0 / (focal - near),
        1.0 / (far - focal),
        settings.blur_cutoff.clamp(0.0, 1.0),
    )
}

#[derive(Clone, Copy)]
struct DofBindings {
    dof_params: Option<UniformLocation>,
    blur_step: Option<UniformLocation>,
    source: Option<UniformLocation>,
    blur: Option<UniformLocation>,
    weight: Option<UniformLocation>,
    normal_depth: Option<UniformLocation>,
}

impl ProgramBindings for DofBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        let loc = |name| device.uniform_location(program, name);
        Self {
            dof_params: loc("dof_params"),
            blur_step: loc("blur_step"),
            source: loc("source_texture"),
            blur: loc("blur_texture"),
            weight: loc("weight_texture"),
            normal_depth: loc("normal_depth_texture"),
        }
    }
}

pub struct DepthOfFieldPass {
    programs: ProgramVariantCache<DofStage, DofBindings>,
    weight: ManagedTarget,
    down: [ManagedTarget; 2],
    quad: FullscreenQuad,
}

impl Default for DepthOfFieldPass {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthOfFieldPass {
    pub fn new() -> Self {
        Self {
            programs: ProgramVariantCache::new(),
            weight: ManagedTarget::new("DofWeight"),
            down: [ManagedTarget::new("DofDownA"), ManagedTarget::new("DofDownB")],
            quad: FullscreenQuad::new(),
        }
    }

    fn allocate(&mut self, device: &mut dyn GraphicsDevice, size: (u32, u32)) -> Result<[TextureId; 3]> {
        let weight = self
            .weight
            .ensure(device, &TargetDescriptor::new(size.0, size.1, TextureFormat::R16Float))?;
        let half = TargetDescriptor::new(size.0 / 2, size.1 / 2, TextureFormat::Rgba16Float);
        let a = self.down[0].ensure(device, &half)?;
        let b = self.down[1].ensure(device, &half)?;
        Ok([weight, a, b])
    }

    /// Runs one stage into `target`. Returns `false` if its program failed.
    fn stage(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        stage: DofStage,
        target: TextureId,
        bind: impl FnOnce(&mut dyn GraphicsDevice, DofBindings),
    ) -> bool {
        let Some(program) = self
            .programs
            .get_program(device, language, stage.to_mask(), &shaders::DOF)
        else {
            return false;
        };
        device.set_render_targets(TargetBinding::color(target));
        let b = *program.bind(device);
        bind(&mut *device, b);
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device)
    }

    pub fn draw(&mut self, device: &mut dyn GraphicsDevice, settings: &DofPassSettings, ctx: &mut PostContext<'_>) -> bool {
        let Some(image) = ctx.surfaces.back() else {
            return false;
        };
        let optics = ctx.camera.active_depth_of_field().unwrap_or(settings.defaults);
        let params = depth_blur_params(&optics);
        let size = ctx.surfaces.size();
        let [weight, down_a, down_b] = match self.allocate(device, size) {
            Ok(targets) => targets,
            Err(err) => {
                log::error!("Depth of field skipped: {}", err);
                return false;
            }
        };
        let language = effective_language(&*device, &settings.shader_language);
        let normal_depth = ctx.gbuffer.normal_depth;

        let weighted = self.stage(device, &language, DofStage::DEPTH_BLUR, weight, |device, b| {
            device.set_optional_uniform(b.dof_params, params.into());
            device.bind_optional_texture(b.normal_depth, normal_depth, SamplerState::POINT_CLAMP);
        });
        let downsampled = weighted
            && self.stage(device, &language, DofStage::DOWNSAMPLE, down_a, |device, b| {
                device.bind_optional_texture(b.source, image, SamplerState::LINEAR_CLAMP);
            });
        if !downsampled {
            return false;
        }

        let texel = Vec2::new(2.0 / size.0.max(1) as f32, 2.0 / size.1.max(1) as f32);
        for _ in 0..settings.blur_passes.clamp(1, 8) {
            let steps = [
                (down_b, down_a, Vec2::new(texel.x, 0.0)),
                (down_a, down_b, Vec2::new(0.0, texel.y)),
            ];
            for (target, source, step) in steps {
                let blurred = self.stage(device, &language, DofStage::BLUR, target, |device, b| {
                    device.set_optional_uniform(b.blur_step, step.extend(0.0).extend(0.0).into());
                    device.bind_optional_texture(b.source, source, SamplerState::LINEAR_CLAMP);
                });
                if !blurred {
                    return false;
                }
            }
        }

        // Fetch the composite before swapping so a failed compile leaves the
        // image where the next stage expects it.
        let Some(program) = self
            .programs
            .get_program(device, &language, DofStage::COMPOSITE.to_mask(), &shaders::DOF)
        else {
            return false;
        };
        let Some(sharp) = consume_image(device, ctx.surfaces) else {
            return false;
        };
        let b = *program.bind(device);
        device.bind_optional_texture(b.source, sharp, SamplerState::POINT_CLAMP);
        device.bind_optional_texture(b.blur, down_a, SamplerState::LINEAR_CLAMP);
        device.bind_optional_texture(b.weight, weight, SamplerState::LINEAR_CLAMP);
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.programs.clear(device);
        self.weight.release(device);
        for target in &mut self.down {
            target.release(device);
        }
        self.quad.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finite(v: Vec4) -> bool {
        v.to_array().iter().all(|c| c.is_finite())
    }

    #[test]
    fn regular_focus_matches_direct_formula() {
        let p = depth_blur_params(&DofSettings {
            near_plane_depth: 2.0,
            focal_plane_depth: 6.0,
            far_plane_depth: 10.0,
            blur_cutoff: 0.8,
        });
        assert_eq!(p, Vec4::new(6.0, 0.25, 0.25, 0.8));
    }

    #[test]
    fn collapsed_planes_stay_finite() {
        for depth in [0.0, 1.0, 5.0, 1.0e6, -3.0] {
            let p = depth_blur_params(&DofSettings {
                near_plane_depth: depth,
                focal_plane_depth: depth,
                far_plane_depth: depth,
                blur_cutoff: 1.0,
            });
            assert!(finite(p), "{:?} for depth {}", p, depth);
        }
    }

    #[test]
    fn inverted_planes_are_nudged() {
        let p = depth_blur_params(&DofSettings {
            near_plane_depth: 9.0,
            focal_plane_depth: 5.0,
            far_plane_depth: 1.0,
            blur_cutoff: 2.0,
        });
        assert!(finite(p));
        assert!(p.y > 0.0 && p.z > 0.0);
        assert_eq!(p.w, 1.0);
    }
}

// High-definition ambient occlusion: paired ring gathers around each pixel.
use glam::Vec4;
use serde::{Deserialize, Serialize};

use super::{AoFeatures, AoInput, MIN_AO_RADIUS};
use crate::renderer::device::*;
use crate::renderer::program::{FeatureSet, ProgramBindings, ProgramVariantCache};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;

pub const MAX_RINGS: u32 = 8;
pub const MAX_RING_GATHERS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdaoSettings {
    pub number_of_rings: u32,
    pub number_of_ring_gathers: u32,
    /// Depth differences above this are too far away to occlude.
    pub reject_radius: f32,
    /// Depth differences below this are treated as the same surface.
    pub accept_radius: f32,
    /// Weight of the per-fragment normal in the comparison.
    pub normal_scale: f32,
    pub contrast: f32,
    /// Distance between rings in pixels.
    pub ring_spacing: f32,
}

impl Default for HdaoSettings {
    fn default() -> Self {
        Self {
            number_of_rings: 4,
            number_of_ring_gathers: 6,
            reject_radius: 0.8,
            accept_radius: 0.0003,
            normal_scale: 0.3,
            contrast: 1.0,
            ring_spacing: 2.0,
        }
    }
}

impl HdaoSettings {
    pub fn rings(&self) -> u32 {
        self.number_of_rings.clamp(1, MAX_RINGS)
    }

    pub fn ring_gathers(&self) -> u32 {
        self.number_of_ring_gathers.clamp(1, MAX_RING_GATHERS)
    }

    /// `(accept, reject)` with reject kept strictly above accept.
    pub fn radii(&self) -> (f32, f32) {
        let accept = self.accept_radius.max(0.0);
        let reject = self.reject_radius.max(accept + MIN_AO_RADIUS);
        (accept, reject)
    }
}

#[derive(Clone, Copy)]
struct HdaoBindings {
    radii: Option<UniformLocation>,
    pattern: Option<UniformLocation>,
    texel_size: Option<UniformLocation>,
    normal_depth: Option<UniformLocation>,
}

impl ProgramBindings for HdaoBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        Self {
            radii: device.uniform_location(program, "hdao_radii"),
            pattern: device.uniform_location(program, "hdao_pattern"),
            texel_size: device.uniform_location(program, "texel_size"),
            normal_depth: device.uniform_location(program, "normal_depth_texture"),
        }
    }
}

#[derive(Default)]
pub struct HighDefinitionAo {
    programs: ProgramVariantCache<AoFeatures, HdaoBindings>,
}

impl HighDefinitionAo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw_ao(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        quad: &mut FullscreenQuad,
        settings: &HdaoSettings,
        input: &AoInput,
    ) -> bool {
        let Some(program) = self
            .programs
            .get_program(device, language, input.features.to_mask(), &shaders::HDAO)
        else {
            return false;
        };
        let b = *program.bind(device);

        let (accept, reject) = settings.radii();
        if let Some(loc) = b.radii {
            device.set_uniform(
                loc,
                Vec4::new(reject, accept, settings.normal_scale.max(0.0), settings.contrast.max(0.0)).into(),
            );
        }
        if let Some(loc) = b.pattern {
            device.set_uniform(
                loc,
                Vec4::new(
                    settings.rings() as f32,
                    settings.ring_gathers() as f32,
                    settings.ring_spacing.max(1.0),
                    0.0,
                )
                .into(),
            );
        }
        if let Some(loc) = b.texel_size {
            let texel = input.texel_size();
            device.set_uniform(loc, Vec4::new(texel.x, texel.y, 0.0, 0.0).into());
        }
        if let Some(loc) = b.normal_depth {
            device.bind_texture(loc, input.normal_depth, SamplerState::POINT_CLAMP);
        }
        quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.programs.clear(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_radius_stays_above_accept() {
        let settings = HdaoSettings {
            accept_radius: 0.5,
            reject_radius: 0.0,
            ..HdaoSettings::default()
        };
        let (accept, reject) = settings.radii();
        assert!(reject > accept);
    }

    #[test]
    fn ring_pattern_is_clamped() {
        let settings = HdaoSettings {
            number_of_rings: 0,
            number_of_ring_gathers: 100,
            ..HdaoSettings::default()
        };
        assert_eq!(settings.rings(), 1);
        assert_eq!(settings.ring_gathers(), MAX_RING_GATHERS);
    }
}

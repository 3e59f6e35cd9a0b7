// Horizon-based ambient occlusion.
use glam::Vec4;
use half::f16;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{AoFeatures, AoInput, MIN_AO_RADIUS};
use crate::error::Result;
use crate::renderer::device::*;
use crate::renderer::program::{FeatureSet, ProgramBindings, ProgramVariantCache};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;

pub const RANDOM_TEXTURE_SIZE: u32 = 4;
pub const MAX_DIRECTIONS: u32 = 32;
pub const MAX_STEPS: u32 = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HbaoSettings {
    pub number_of_directions: u32,
    pub number_of_steps: u32,
    /// View-space radius before `scene_scale` is applied.
    pub ao_radius: f32,
    pub scene_scale: f32,
    /// Radians; horizons below this elevation are ignored.
    pub angle_bias: f32,
    pub attenuation: f32,
    pub contrast: f32,
}

impl Default for HbaoSettings {
    fn default() -> Self {
        Self {
            number_of_directions: 8,
            number_of_steps: 6,
            ao_radius: 1.0,
            scene_scale: 1.0,
            angle_bias: 30f32.to_radians(),
            attenuation: 1.0,
            contrast: 1.25,
        }
    }
}

impl HbaoSettings {
    /// Sampling radius in view units, never zero or negative.
    pub fn effective_radius(&self) -> f32 {
        (self.ao_radius * self.scene_scale).max(MIN_AO_RADIUS)
    }

    pub fn directions(&self) -> u32 {
        self.number_of_directions.clamp(1, MAX_DIRECTIONS)
    }

    pub fn steps(&self) -> u32 {
        self.number_of_steps.clamp(1, MAX_STEPS)
    }
}

/// Per-pixel rotation of the sampling directions: `(cos a, sin a, jitter, 0)`
/// where `a` spans one direction sector.
pub fn random_rotations(directions: u32) -> Vec<[f32; 4]> {
    let mut rng = SmallRng::seed_from_u64(directions as u64);
    let sector = std::f32::consts::TAU / directions.max(1) as f32;
    (0..RANDOM_TEXTURE_SIZE * RANDOM_TEXTURE_SIZE)
        .map(|_| {
            let angle = rng.gen_range(0.0..sector);
            let jitter: f32 = rng.gen_range(0.0..1.0);
            [angle.cos(), angle.sin(), jitter, 0.0]
        })
        .collect()
}

/// Packs rotations as `Rgba16Float` texel bytes.
pub fn rotation_texels(rotations: &[[f32; 4]]) -> Vec<u8> {
    rotations
        .iter()
        .flatten()
        .flat_map(|&c| f16::from_f32(c).to_le_bytes())
        .collect()
}

#[derive(Clone, Copy)]
struct HbaoBindings {
    radius: Option<UniformLocation>,
    params: Option<UniformLocation>,
    pattern: Option<UniformLocation>,
    view_ray_scale: Option<UniformLocation>,
    normal_depth: Option<UniformLocation>,
    random: Option<UniformLocation>,
}

impl ProgramBindings for HbaoBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        let loc = |name| device.uniform_location(program, name);
        Self {
            radius: loc("hbao_radius"),
            params: loc("hbao_params"),
            pattern: loc("hbao_pattern"),
            view_ray_scale: loc("view_ray_scale"),
            normal_depth: loc("normal_depth_texture"),
            random: loc("random_texture"),
        }
    }
}

#[derive(Default)]
pub struct HorizonBasedAo {
    programs: ProgramVariantCache<AoFeatures, HbaoBindings>,
    /// Random-rotation texture and the direction count it was built for.
    random: Option<(TextureId, u32)>,
}

impl HorizonBasedAo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn random_texture(&self) -> Option<TextureId> {
        self.random.map(|(id, _)| id)
    }

    /// Rebuilds the rotation texture only when the direction count changed.
    fn ensure_random_texture(&mut self, device: &mut dyn GraphicsDevice, directions: u32) -> Result<TextureId> {
        if let Some((id, built_for)) = self.random {
            if built_for == directions {
                return Ok(id);
            }
            device.destroy_texture(id);
            self.random = None;
        }

        log::info!("Building HBAO rotation texture for {} directions", directions);
        let texels = rotation_texels(&random_rotations(directions));
        let desc = TargetDescriptor::new(RANDOM_TEXTURE_SIZE, RANDOM_TEXTURE_SIZE, TextureFormat::Rgba16Float);
        let id = device.create_texture("HbaoRandomTexture", &desc, &texels)?;
        self.random = Some((id, directions));
        Ok(id)
    }

    pub fn draw_ao(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        quad: &mut FullscreenQuad,
        settings: &HbaoSettings,
        input: &AoInput,
    ) -> bool {
        let directions = settings.directions();
        let random = match self.ensure_random_texture(device, directions) {
            Ok(id) => id,
            Err(err) => {
                log::error!("HBAO skipped: {}", err);
                return false;
            }
        };

        let Some(program) = self
            .programs
            .get_program(device, language, input.features.to_mask(), &shaders::HBAO)
        else {
            return false;
        };
        let b = *program.bind(device);

        let radius = settings.effective_radius();
        if let Some(loc) = b.radius {
            device.set_uniform(
                loc,
                Vec4::new(radius, radius * radius, 1.0 / (radius * radius), settings.scene_scale).into(),
            );
        }
        if let Some(loc) = b.params {
            let bias = settings.angle_bias.clamp(0.0, std::f32::consts::FRAC_PI_2 - 0.01);
            device.set_uniform(
                loc,
                Vec4::new(bias.tan(), settings.attenuation.max(0.0), settings.contrast.max(0.0), 0.0).into(),
            );
        }
        if let Some(loc) = b.pattern {
            device.set_uniform(
                loc,
                Vec4::new(directions as f32, settings.steps() as f32, RANDOM_TEXTURE_SIZE as f32, 0.0).into(),
            );
        }
        if let Some(loc) = b.view_ray_scale {
            let texel = input.texel_size();
            device.set_uniform(loc, Vec4::new(input.ray_scale.x, input.ray_scale.y, texel.x, texel.y).into());
        }
        if let Some(loc) = b.normal_depth {
            device.bind_texture(loc, input.normal_depth, SamplerState::POINT_CLAMP);
        }
        if let Some(loc) = b.random {
            device.bind_texture(loc, random, SamplerState::POINT_REPEAT);
        }
        quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.programs.clear(device);
        if let Some((id, _)) = self.random.take() {
            device.destroy_texture(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::headless::HeadlessDevice;
    use glam::Vec2;

    fn input(device: &mut HeadlessDevice) -> AoInput {
        let desc = TargetDescriptor::new(16, 16, TextureFormat::Rgba16Float);
        AoInput {
            normal_depth: device.create_render_target("nd", &desc).unwrap(),
            size: (16, 16),
            ray_scale: Vec2::ONE,
            features: AoFeatures::NORMAL,
        }
    }

    #[test]
    fn random_texture_rebuilt_only_on_direction_change() {
        let mut device = HeadlessDevice::new(16, 16);
        let input = input(&mut device);
        let mut hbao = HorizonBasedAo::new();
        let mut quad = FullscreenQuad::new();
        let mut settings = HbaoSettings::default();

        hbao.draw_ao(&mut device, "wgsl", &mut quad, &settings, &input);
        let first = hbao.random_texture();
        settings.number_of_steps = 12;
        settings.ao_radius = 3.0;
        hbao.draw_ao(&mut device, "wgsl", &mut quad, &settings, &input);
        assert_eq!(hbao.random_texture(), first);

        settings.number_of_directions = 4;
        device.reset_counters();
        hbao.draw_ao(&mut device, "wgsl", &mut quad, &settings, &input);
        assert_ne!(hbao.random_texture(), first);
        assert_eq!(device.textures_destroyed(), 1);
        assert_eq!(device.textures_created(), 1);
    }

    #[test]
    fn non_positive_radius_is_clamped() {
        let settings = HbaoSettings {
            ao_radius: 0.0,
            ..HbaoSettings::default()
        };
        assert_eq!(settings.effective_radius(), MIN_AO_RADIUS);
        let settings = HbaoSettings {
            ao_radius: -4.0,
            ..HbaoSettings::default()
        };
        assert!(settings.effective_radius() > 0.0);
    }

    #[test]
    fn rotations_stay_within_one_sector() {
        let sector = std::f32::consts::TAU / 8.0;
        for [c, s, jitter, _] in random_rotations(8) {
            let angle = s.atan2(c);
            assert!((0.0..=sector + 1e-5).contains(&angle));
            assert!((0.0..1.0).contains(&jitter));
        }
    }

    #[test]
    fn rotation_texture_is_half_float() {
        let mut device = HeadlessDevice::new(8, 8);
        let mut hbao = HorizonBasedAo::new();
        let id = hbao.ensure_random_texture(&mut device, 8).unwrap();
        let desc = device.texture_descriptor(id).unwrap();
        assert_eq!(desc.format, TextureFormat::Rgba16Float);

        let rotations = random_rotations(8);
        let bytes = rotation_texels(&rotations);
        assert_eq!(bytes.len(), rotations.len() * 8);
        let first = f16::from_le_bytes([bytes[0], bytes[1]]).to_f32();
        assert!((first - rotations[0][0]).abs() < 1e-3);
    }
}

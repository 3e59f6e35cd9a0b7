// src/renderer/postprocess/hdr.rs
//
// End of the HDR chain: optional NaN scrub, log-average luminance with
// light adaptation, bloom, then Reinhard tonemapping and gamma in the final
// draw. Luminance stays on the GPU: adaptation ping-pongs between two 1x1
// targets and the tonemap samples the latest one. Only the NaN debug path
// reads anything back.

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

/// Side of the first luminance target; halved down to 1x1.
pub const LUMINANCE_SIZE: u32 = 64;
const LUMINANCE_LABELS: [&str; 7] = [
    "HdrLuminance64",
    "HdrLuminance32",
    "HdrLuminance16",
    "HdrLuminance8",
    "HdrLuminance4",
    "HdrLuminance2",
    "HdrLuminance1",
];

/// Colour written over NaN texels by the scrub stage.
pub const NAN_FLAG_COLOR: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HdrFeatures: u32 {
        const NAN_FIX = 1 << 0;
        const LUMINANCE = 1 << 1;
        const LUMINANCE_DOWNSAMPLE = 1 << 2;
        const BRIGHT_PASS = 1 << 3;
        const DOWNSAMPLE = 1 << 4;
        const BLUR = 1 << 5;
        const TONEMAP = 1 << 6;
        const BLOOM = 1 << 7;
        const NO_GAMMA_CORRECTION = 1 << 8;
        const ADAPT = 1 << 9;
        /// Exposure from the uniform instead of the adapted luminance target.
        const FIXED_EXPOSURE = 1 << 10;
    }
}

impl FeatureSet for HdrFeatures {
    fn vertex_stage() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HdrSettings {
    pub enabled: bool,
    /// Middle-grey the average luminance is mapped to.
    pub key: f32,
    /// Smallest luminance mapped to pure white.
    pub white_level: f32,
    pub adaptation: bool,
    /// Adaptation rate; larger values follow the scene faster.
    pub tau: f32,
    pub min_luminance: f32,
    pub max_luminance: f32,
    pub bloom: bool,
    pub bloom_threshold: f32,
    pub bloom_strength: f32,
    pub bloom_blur_passes: u32,
    pub gamma: f32,
    pub no_gamma_correction: bool,
    /// Debug: read the image back, count and scrub NaN texels, and report
    /// the adapted luminance.
    pub nan_detection: bool,
    pub shader_language: String,
}

impl Default for HdrSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            key: 0.18,
            white_level: 4.0,
            adaptation: true,
            tau: 1.5,
            min_luminance: 0.02,
            max_luminance: 20.0,
            bloom: true,
            bloom_threshold: 1.0,
            bloom_strength: 0.5,
            bloom_blur_passes: 1,
            gamma: 2.2,
            no_gamma_correction: false,
            nan_detection: false,
            shader_language: String::new(),
        }
    }
}

/// Fraction of the gap to the current luminance closed in one frame.
pub fn adaptation_rate(delta_time: f32, tau: f32) -> f32 {
    1.0 - (-delta_time.max(0.0) * tau.max(0.0)).exp()
}

/// Exponential approach of the adapted luminance towards the current one.
/// The adapt stage evaluates the same expression on the GPU.
pub fn adapt_luminance(adapted: f32, current: f32, delta_time: f32, tau: f32) -> f32 {
    adapted + (current - adapted) * adaptation_rate(delta_time, tau)
}

/// Number of texels with a NaN in any channel.
pub fn count_nan_texels(texels: &[[f32; 4]]) -> usize {
    texels.iter().filter(|t| t.iter().any(|c| c.is_nan())).count()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HdrStats {
    pub nan_texels: usize,
    /// Filled by the debug readback only.
    pub average_luminance: f32,
    /// Filled by the debug readback only.
    pub adapted_luminance: f32,
    /// The tonemap used the GPU-adapted luminance this frame.
    pub adapted: bool,
    pub bloom: bool,
}

#[derive(Clone, Copy)]
struct HdrBindings {
    tonemap: Option<UniformLocation>,
    bloom_params: Option<UniformLocation>,
    texel_size: Option<UniformLocation>,
    flag_color: Option<UniformLocation>,
    adapt: Option<UniformLocation>,
    source: Option<UniformLocation>,
    bloom: Option<UniformLocation>,
    luminance: Option<UniformLocation>,
    history: Option<UniformLocation>,
}

impl ProgramBindings for HdrBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        let loc = |name| device.uniform_location(program, name);
        Self {
            tonemap: loc("tonemap_params"),
            bloom_params: loc("bloom_params"),
            texel_size: loc("texel_size"),
            flag_color: loc("flag_color"),
            adapt: loc("adapt_params"),
            source: loc("source_texture"),
            bloom: loc("bloom_texture"),
            luminance: loc("luminance_texture"),
            history: loc("history_texture"),
        }
    }
}

pub struct HdrPass {
    programs: ProgramVariantCache<HdrFeatures, HdrBindings>,
    luminance: Vec<ManagedTarget>,
    adapted: [ManagedTarget; 2],
    /// Index of the adapted target holding the latest value.
    latest: usize,
    /// `adapted[latest]` was written by an earlier frame.
    history: bool,
    bloom: [ManagedTarget; 3],
    quad: FullscreenQuad,
    readback: Option<f32>,
    stats: HdrStats,
}

impl Default for HdrPass {
    fn default() -> Self {
        Self::new()
    }
}

impl HdrPass {
    pub fn new() -> Self {
        Self {
            programs: ProgramVariantCache::new(),
            luminance: LUMINANCE_LABELS.iter().map(|&label| ManagedTarget::new(label)).collect(),
            adapted: [ManagedTarget::new("HdrAdaptedA"), ManagedTarget::new("HdrAdaptedB")],
            latest: 0,
            history: false,
            bloom: [
                ManagedTarget::new("HdrBright"),
                ManagedTarget::new("HdrBloomA"),
                ManagedTarget::new("HdrBloomB"),
            ],
            quad: FullscreenQuad::new(),
            readback: None,
            stats: HdrStats::default(),
        }
    }

    pub fn stats(&self) -> HdrStats {
        self.stats
    }

    /// Adapted luminance read back this frame; `None` unless NaN detection
    /// is on.
    pub fn adapted_luminance(&self) -> Option<f32> {
        self.readback
    }

    /// Target the next tonemap samples its exposure from.
    pub fn adapted_target(&self) -> Option<TextureId> {
        self.history.then(|| self.adapted[self.latest].id()).flatten()
    }

    /// Draws one intermediate stage into `target`.
    fn stage(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        features: HdrFeatures,
        target: TextureId,
        source: TextureId,
        texel: Vec2,
    ) -> bool {
        let Some(program) = self
            .programs
            .get_program(device, language, features.to_mask(), &shaders::HDR)
        else {
            return false;
        };
        device.set_render_targets(TargetBinding::color(target));
        let b = *program.bind(device);
        device.set_optional_uniform(b.texel_size, Vec4::new(texel.x, texel.y, 0.0, 0.0).into());
        device.bind_optional_texture(b.source, source, SamplerState::LINEAR_CLAMP);
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device)
    }

    /// Counts NaN texels of the current image and scrubs them in place.
    fn scrub_nans(&mut self, device: &mut dyn GraphicsDevice, language: &str, ctx: &mut PostContext<'_>) -> usize {
        let Some(image) = ctx.surfaces.back() else {
            return 0;
        };
        let texels = match device.read_target(image) {
            Ok(texels) => texels,
            Err(err) => {
                log::warn!("NaN detection unavailable: {}", err);
                return 0;
            }
        };
        let count = count_nan_texels(&texels);
        if count == 0 {
            return 0;
        }
        log::warn!("HDR input contains {} NaN texels", count);

        let Some(program) = self
            .programs
            .get_program(device, language, HdrFeatures::NAN_FIX.to_mask(), &shaders::HDR)
        else {
            return count;
        };
        let Some(front) = consume_image(device, ctx.surfaces) else {
            return count;
        };
        let b = *program.bind(device);
        device.set_optional_uniform(b.flag_color, Vec4::from_array(NAN_FLAG_COLOR).into());
        device.bind_optional_texture(b.source, front, SamplerState::POINT_CLAMP);
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device);
        count
    }

    fn allocate_luminance(&mut self, device: &mut dyn GraphicsDevice) -> Result<Vec<TextureId>> {
        let mut ids = Vec::with_capacity(self.luminance.len());
        let mut size = LUMINANCE_SIZE;
        for target in &mut self.luminance {
            ids.push(target.ensure(device, &TargetDescriptor::new(size, size, TextureFormat::Rgba16Float))?);
            size = (size / 2).max(1);
        }
        Ok(ids)
    }

    /// Reduces `image` to its log-average luminance in a 1x1 target.
    fn measure_luminance(&mut self, device: &mut dyn GraphicsDevice, language: &str, image: TextureId, size: (u32, u32)) -> Option<TextureId> {
        let targets = match self.allocate_luminance(device) {
            Ok(ids) => ids,
            Err(err) => {
                log::error!("Luminance targets unavailable: {}", err);
                return None;
            }
        };
        let image_texel = Vec2::new(1.0 / size.0.max(1) as f32, 1.0 / size.1.max(1) as f32);
        if !self.stage(device, language, HdrFeatures::LUMINANCE, targets[0], image, image_texel) {
            return None;
        }
        let mut side = LUMINANCE_SIZE;
        for pair in targets.windows(2) {
            let texel = Vec2::splat(1.0 / side as f32);
            if !self.stage(device, language, HdrFeatures::LUMINANCE_DOWNSAMPLE, pair[1], pair[0], texel) {
                return None;
            }
            side /= 2;
        }
        targets.last().copied()
    }

    /// Returns `(latest, next)` adapted targets.
    fn allocate_adapted(&mut self, device: &mut dyn GraphicsDevice, next: usize) -> Result<(TextureId, TextureId)> {
        let desc = TargetDescriptor::new(1, 1, TextureFormat::Rgba16Float);
        let latest = self.adapted[1 - next].ensure(device, &desc)?;
        let next = self.adapted[next].ensure(device, &desc)?;
        Ok((latest, next))
    }

    /// Moves the adapted luminance towards `log_average` in the other 1x1
    /// target and makes it the latest. Without history the current value is
    /// taken as is.
    fn adapt(&mut self, device: &mut dyn GraphicsDevice, language: &str, settings: &HdrSettings, log_average: TextureId, delta_time: f32) -> Option<TextureId> {
        let next = 1 - self.latest;
        let (previous, target) = match self.allocate_adapted(device, next) {
            Ok(ids) => ids,
            Err(err) => {
                log::error!("Adapted luminance targets unavailable: {}", err);
                return None;
            }
        };
        let rate = if settings.adaptation && self.history {
            adaptation_rate(delta_time, settings.tau)
        } else {
            1.0
        };
        let min = settings.min_luminance.max(1.0e-4);
        let max = settings.max_luminance.max(min);

        let program = self
            .programs
            .get_program(device, language, HdrFeatures::ADAPT.to_mask(), &shaders::HDR)?;
        device.set_render_targets(TargetBinding::color(target));
        let b = *program.bind(device);
        device.set_optional_uniform(b.adapt, Vec4::new(rate, min, max, 0.0).into());
        device.bind_optional_texture(b.source, log_average, SamplerState::POINT_CLAMP);
        let history = if self.history { previous } else { log_average };
        device.bind_optional_texture(b.history, history, SamplerState::POINT_CLAMP);
        device.set_render_state(RenderState::fullscreen());
        if !self.quad.draw(device) {
            return None;
        }
        self.latest = next;
        self.history = true;
        Some(target)
    }

    /// Debug readback of the adapted target: red holds the adapted
    /// luminance, green the current one.
    fn read_adapted(&mut self, device: &mut dyn GraphicsDevice, target: TextureId) {
        match device.read_target(target) {
            Ok(texels) => {
                if let Some(&[adapted, current, ..]) = texels.first() {
                    self.stats.adapted_luminance = adapted;
                    self.stats.average_luminance = current;
                    self.readback = Some(adapted).filter(|l| l.is_finite());
                }
            }
            Err(err) => log::warn!("Luminance readback failed: {}", err),
        }
    }

    fn allocate_bloom(&mut self, device: &mut dyn GraphicsDevice, size: (u32, u32)) -> Result<[TextureId; 3]> {
        let half = TargetDescriptor::new(size.0 / 2, size.1 / 2, TextureFormat::Rgba16Float);
        let quarter = TargetDescriptor::new(size.0 / 4, size.1 / 4, TextureFormat::Rgba16Float);
        let bright = self.bloom[0].ensure(device, &half)?;
        let a = self.bloom[1].ensure(device, &quarter)?;
        let b = self.bloom[2].ensure(device, &quarter)?;
        Ok([bright, a, b])
    }

    /// Bright pass, downsample and separable blur. Returns the bloom texture.
    fn bloom(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        settings: &HdrSettings,
        image: TextureId,
        size: (u32, u32),
        adapted: Option<TextureId>,
    ) -> Option<TextureId> {
        let [bright, a, b] = match self.allocate_bloom(device, size) {
            Ok(ids) => ids,
            Err(err) => {
                log::error!("Bloom targets unavailable: {}", err);
                return None;
            }
        };

        let image_texel = Vec2::new(1.0 / size.0.max(1) as f32, 1.0 / size.1.max(1) as f32);
        let half_texel = image_texel * 2.0;
        let quarter_texel = image_texel * 4.0;

        // The bright pass exposes with the adapted luminance like the tonemap
        let mut features = HdrFeatures::BRIGHT_PASS;
        features.set(HdrFeatures::FIXED_EXPOSURE, adapted.is_none());
        let program = self
            .programs
            .get_program(device, language, features.to_mask(), &shaders::HDR)?;
        device.set_render_targets(TargetBinding::color(bright));
        let bindings = *program.bind(device);
        device.set_optional_uniform(bindings.tonemap, tonemap_params(settings).into());
        device.set_optional_uniform(
            bindings.bloom_params,
            Vec4::new(settings.bloom_threshold.max(0.0), 0.0, settings.bloom_strength.max(0.0), 0.0).into(),
        );
        if let Some(adapted) = adapted {
            device.bind_optional_texture(bindings.luminance, adapted, SamplerState::POINT_CLAMP);
        }
        device.set_optional_uniform(bindings.texel_size, image_texel.extend(0.0).extend(0.0).into());
        device.bind_optional_texture(bindings.source, image, SamplerState::LINEAR_CLAMP);
        device.set_render_state(RenderState::fullscreen());
        if !self.quad.draw(device) {
            return None;
        }

        if !self.stage(device, language, HdrFeatures::DOWNSAMPLE, a, bright, half_texel) {
            return None;
        }
        for _ in 0..settings.bloom_blur_passes.clamp(1, 8) {
            let steps = [
                (b, a, Vec2::new(quarter_texel.x, 0.0)),
                (a, b, Vec2::new(0.0, quarter_texel.y)),
            ];
            for (target, source, step) in steps {
                if !self.stage(device, language, HdrFeatures::BLUR, target, source, step) {
                    return None;
                }
            }
        }
        Some(a)
    }

    pub fn draw(&mut self, device: &mut dyn GraphicsDevice, settings: &HdrSettings, ctx: &mut PostContext<'_>) -> bool {
        self.stats = HdrStats::default();
        let language = effective_language(&*device, &settings.shader_language);

        if settings.nan_detection {
            self.stats.nan_texels = self.scrub_nans(device, &language, ctx);
        }

        let Some(image) = ctx.surfaces.back() else {
            return false;
        };
        let size = ctx.surfaces.size();

        let adapted = self
            .measure_luminance(device, &language, image, size)
            .and_then(|log_average| self.adapt(device, &language, settings, log_average, ctx.delta_time));
        match adapted {
            Some(target) if settings.nan_detection => self.read_adapted(device, target),
            Some(_) => self.readback = None,
            None => {
                log::debug!("Adapted luminance unavailable; tonemapping with the key as exposure");
                self.readback = None;
            }
        }
        self.stats.adapted = adapted.is_some();

        let bloom = if settings.bloom {
            self.bloom(device, &language, settings, image, size, adapted)
        } else {
            None
        };
        self.stats.bloom = bloom.is_some();

        let mut features = HdrFeatures::TONEMAP;
        features.set(HdrFeatures::BLOOM, bloom.is_some());
        features.set(HdrFeatures::NO_GAMMA_CORRECTION, settings.no_gamma_correction);
        features.set(HdrFeatures::FIXED_EXPOSURE, adapted.is_none());
        let Some(program) = self
            .programs
            .get_program(device, &language, features.to_mask(), &shaders::HDR)
        else {
            return false;
        };
        let Some(front) = consume_image(device, ctx.surfaces) else {
            return false;
        };
        let b = *program.bind(device);
        device.set_optional_uniform(b.tonemap, tonemap_params(settings).into());
        device.set_optional_uniform(
            b.bloom_params,
            Vec4::new(settings.bloom_threshold, 0.0, settings.bloom_strength.max(0.0), 0.0).into(),
        );
        device.bind_optional_texture(b.source, front, SamplerState::POINT_CLAMP);
        if let Some(adapted) = adapted {
            device.bind_optional_texture(b.luminance, adapted, SamplerState::POINT_CLAMP);
        }
        if let Some(bloom) = bloom {
            device.bind_optional_texture(b.bloom, bloom, SamplerState::LINEAR_CLAMP);
        }
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.programs.clear(device);
        for target in self
            .luminance
            .iter_mut()
            .chain(self.adapted.iter_mut())
            .chain(self.bloom.iter_mut())
        {
            target.release(device);
        }
        self.quad.release(device);
        self.history = false;
        self.readback = None;
    }
}

/// Key, white level, fallback luminance and 1 / gamma. The fallback maps the
/// key to itself when no adapted luminance exists.
fn tonemap_params(settings: &HdrSettings) -> Vec4 {
    let key = settings.key.max(1.0e-4);
    Vec4::new(key, settings.white_level.max(1.0e-4), key, 1.0 / settings.gamma.max(0.1))
}

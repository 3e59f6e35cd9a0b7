// src/renderer/passes/lighting.rs
//
// Light accumulation. One full-screen quad per visible light, clipped to
// the light's projected bounds and added onto the ambient term.

use bitflags::bitflags;
use glam::{Mat4, Vec2, Vec4};
use serde::{Deserialize, Serialize};

use crate::renderer::device::*;
use crate::renderer::lights::{Light, LightClass};
use crate::renderer::passes::gbuffer::{GBufferViews, GEOMETRY_STENCIL};
use crate::renderer::passes::surfaces::SurfaceChain;
use crate::renderer::program::{effective_language, FeatureSet, ProgramBindings, ProgramVariantCache};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;
use crate::renderer::shadow::{ShadowLodSettings, ShadowMap, ShadowMapProvider};
use crate::scene::{Camera, VisibilityList};

/// Clip-space `w` below which a bounds corner counts as behind the camera.
const NEAR_W_EPSILON: f32 = 1.0e-5;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LightingFeatures: u32 {
        const DIRECTIONAL = 1 << 0;
        const POINT = 1 << 1;
        const SPOT = 1 << 2;
        const PROJECTIVE = 1 << 3;
        const SMOOTH_CONE = 1 << 4;
        const SHADOW = 1 << 5;
        const SOFT_SHADOW = 1 << 6;
        const NO_ALBEDO = 1 << 7;
        const NO_AMBIENT_OCCLUSION = 1 << 8;
        const NO_SPECULAR = 1 << 9;
        const DISCARD = 1 << 10;
        const NO_GAMMA_CORRECTION = 1 << 11;
    }
}

impl FeatureSet for LightingFeatures {
    fn vertex_stage() -> Self {
        Self::empty()
    }
}

impl LightingFeatures {
    pub fn from_class(class: LightClass) -> Self {
        match class {
            LightClass::Directional => Self::DIRECTIONAL,
            LightClass::Point => Self::POINT,
            LightClass::ProjectivePoint => Self::POINT | Self::PROJECTIVE,
            LightClass::Spot => Self::SPOT,
            LightClass::ProjectiveSpot => Self::SPOT | Self::PROJECTIVE,
            LightClass::SmoothSpot => Self::SPOT | Self::SMOOTH_CONE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingSettings {
    pub no_shadows: bool,
    pub no_soft_shadows: bool,
    pub no_albedo: bool,
    pub no_ambient_occlusion: bool,
    pub no_specular: bool,
    /// Discard fragments outside the light volume instead of adding black.
    pub discard: bool,
    pub no_gamma_correction: bool,
    pub shadow_lod: ShadowLodSettings,
    pub shader_language: String,
}

impl LightingSettings {
    fn channel_features(&self) -> LightingFeatures {
        let mut features = LightingFeatures::empty();
        features.set(LightingFeatures::NO_ALBEDO, self.no_albedo);
        features.set(LightingFeatures::NO_AMBIENT_OCCLUSION, self.no_ambient_occlusion);
        features.set(LightingFeatures::NO_SPECULAR, self.no_specular);
        features.set(LightingFeatures::DISCARD, self.discard);
        features.set(LightingFeatures::NO_GAMMA_CORRECTION, self.no_gamma_correction);
        features
    }
}

/// A light that survived culling this frame.
#[derive(Debug, Clone)]
pub struct LightRecord {
    pub light: Light,
    /// Light space to view space.
    pub view_transform: Mat4,
    pub scissor: ScissorRect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightingStats {
    pub considered: usize,
    pub culled: usize,
    pub scissor_rejected: usize,
    pub drawn: usize,
    pub shadowed: usize,
}

/// Screen rectangle a light can touch.
///
/// Directional lights cover the viewport. Other lights project the corners
/// of their bounds; a corner behind the camera also gives the whole
/// viewport. `None` means the rectangle is empty and the light is skipped.
pub fn light_scissor(light: &Light, view_proj: &Mat4, viewport: (u32, u32)) -> Option<ScissorRect> {
    let (width, height) = viewport;
    let full = ScissorRect::full(width, height);
    let Some(bounds) = light.bounds() else {
        return Some(full);
    };

    let mut min = Vec2::splat(f32::MAX);
    let mut max = Vec2::splat(f32::MIN);
    for corner in bounds.corners() {
        let clip = *view_proj * corner.extend(1.0);
        if clip.w <= NEAR_W_EPSILON {
            return Some(full);
        }
        let ndc = Vec2::new(clip.x, clip.y) / clip.w;
        min = min.min(ndc);
        max = max.max(ndc);
    }

    let min = min.clamp(Vec2::NEG_ONE, Vec2::ONE);
    let max = max.clamp(Vec2::NEG_ONE, Vec2::ONE);
    let to_px = |v: f32, extent: u32| ((v * 0.5 + 0.5) * extent as f32).clamp(0.0, extent as f32);

    let x0 = to_px(min.x, width).floor() as u32;
    let x1 = to_px(max.x, width).ceil() as u32;
    // NDC y points up, pixel rows go down
    let y0 = (height as f32 - to_px(max.y, height)).floor() as u32;
    let y1 = (height as f32 - to_px(min.y, height)).ceil() as u32;

    let rect = ScissorRect {
        x: x0,
        y: y0,
        width: x1.saturating_sub(x0),
        height: y1.saturating_sub(y0),
    };
    (!rect.is_empty()).then_some(rect)
}

#[derive(Clone, Copy)]
struct LightingBindings {
    light_color: Option<UniformLocation>,
    light_position: Option<UniformLocation>,
    light_direction: Option<UniformLocation>,
    spot_cosines: Option<UniformLocation>,
    view_ray_scale: Option<UniformLocation>,
    projector_matrix: Option<UniformLocation>,
    shadow_matrix: Option<UniformLocation>,
    shadow_params: Option<UniformLocation>,
    albedo: Option<UniformLocation>,
    normal_depth: Option<UniformLocation>,
    specular: Option<UniformLocation>,
    projector: Option<UniformLocation>,
    shadow: Option<UniformLocation>,
}

impl ProgramBindings for LightingBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        let loc = |name| device.uniform_location(program, name);
        Self {
            light_color: loc("light_color"),
            light_position: loc("light_position"),
            light_direction: loc("light_direction"),
            spot_cosines: loc("spot_cosines"),
            view_ray_scale: loc("view_ray_scale"),
            projector_matrix: loc("projector_matrix"),
            shadow_matrix: loc("shadow_matrix"),
            shadow_params: loc("shadow_params"),
            albedo: loc("albedo_texture"),
            normal_depth: loc("normal_depth_texture"),
            specular: loc("specular_texture"),
            projector: loc("projector_texture"),
            shadow: loc("shadow_texture"),
        }
    }
}

/// Everything a light draw needs besides the light itself.
struct FrameView {
    view: Mat4,
    inverse_view: Mat4,
    view_proj: Mat4,
    ray_scale: Vec2,
    viewport: (u32, u32),
    stencil: Option<TextureId>,
    back: TextureId,
    language: String,
}

#[derive(Default)]
pub struct LightingPass {
    programs: ProgramVariantCache<LightingFeatures, LightingBindings>,
    quad: FullscreenQuad,
    records: Vec<LightRecord>,
    stats: LightingStats,
}

impl LightingPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lights drawn last frame, in traversal order.
    pub fn records(&self) -> &[LightRecord] {
        &self.records
    }

    pub fn stats(&self) -> LightingStats {
        self.stats
    }

    /// Adds every visible light into the back buffer of `surfaces`.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        device: &mut dyn GraphicsDevice,
        settings: &LightingSettings,
        surfaces: &SurfaceChain,
        gbuffer: &GBufferViews,
        visibility: &VisibilityList,
        camera: &Camera,
        mut shadows: Option<&mut dyn ShadowMapProvider>,
    ) -> LightingStats {
        self.stats = LightingStats::default();
        self.records.clear();

        let Some(back) = surfaces.back() else {
            log::debug!("Lighting pass: no back buffer");
            return self.stats;
        };
        let viewport = surfaces.size();
        let aspect = viewport.0 as f32 / viewport.1.max(1) as f32;
        let view = camera.view();
        let frame = FrameView {
            view,
            inverse_view: view.inverse(),
            view_proj: camera.view_proj(aspect),
            ray_scale: camera.view_ray_scale(aspect),
            viewport,
            stencil: (gbuffer.size == viewport && surfaces.samples() == 1).then_some(gbuffer.depth_stencil),
            back,
            language: effective_language(&*device, &settings.shader_language),
        };

        for node in visibility.lights() {
            self.stats.considered += 1;
            let light = &node.light;
            if light.is_inert() {
                log::trace!("Culled inert {:?} light", light.kind);
                self.stats.culled += 1;
                continue;
            }
            let Some(scissor) = light_scissor(light, &frame.view_proj, viewport) else {
                log::trace!("{:?} light projects to an empty rectangle", light.kind);
                self.stats.scissor_rejected += 1;
                continue;
            };

            let shadow = if light.casts_shadows && !settings.no_shadows {
                match shadows.as_deref_mut() {
                    Some(provider) if provider.is_active() => {
                        let lod = settings.shadow_lod.select(node.distance_sq);
                        let map = provider.update_shadow_map(device, light, lod);
                        if map.is_none() {
                            log::debug!("No shadow target for {:?} light, shading unshadowed", light.kind);
                        }
                        map
                    }
                    _ => None,
                }
            } else {
                None
            };

            let record = LightRecord {
                light: light.clone(),
                view_transform: frame.view * light.world_transform(),
                scissor,
            };
            if self.draw_light(device, settings, gbuffer, &frame, &record, shadow) {
                self.stats.drawn += 1;
                if shadow.is_some() {
                    self.stats.shadowed += 1;
                }
            }
            self.records.push(record);
        }

        device.set_scissor(None);
        log::trace!("Lighting: {:?}", self.stats);
        self.stats
    }

    fn draw_light(
        &mut self,
        device: &mut dyn GraphicsDevice,
        settings: &LightingSettings,
        gbuffer: &GBufferViews,
        frame: &FrameView,
        record: &LightRecord,
        shadow: Option<ShadowMap>,
    ) -> bool {
        let light = &record.light;
        let mut features = LightingFeatures::from_class(light.classify()) | settings.channel_features();
        if shadow.is_some() {
            features |= LightingFeatures::SHADOW;
            features.set(
                LightingFeatures::SOFT_SHADOW,
                light.soft_shadows && !settings.no_soft_shadows,
            );
        }

        let Some(program) = self
            .programs
            .get_program(device, &frame.language, features.to_mask(), &shaders::LIGHTING)
        else {
            return false;
        };

        device.set_render_targets(TargetBinding::with_depth(vec![frame.back], frame.stencil));
        let b = *program.bind(device);

        let set = |device: &mut dyn GraphicsDevice, loc: Option<UniformLocation>, value: UniformValue| {
            if let Some(loc) = loc {
                device.set_uniform(loc, value);
            }
        };

        set(device, b.light_color, (light.color * light.intensity).extend(1.0).into());
        let position = frame.view.transform_point3(light.position);
        set(device, b.light_position, position.extend(light.range.max(0.0)).into());
        let direction = frame.view.transform_vector3(light.direction).normalize_or_zero();
        set(device, b.light_direction, direction.extend(0.0).into());
        let (cos_inner, cos_outer) = light.cone.cosines();
        set(device, b.spot_cosines, Vec4::new(cos_inner, cos_outer, 0.0, 0.0).into());
        set(device, b.view_ray_scale, frame.ray_scale.extend(0.0).extend(0.0).into());

        if let Some(projector) = light.projector {
            let matrix = match light.classify() {
                LightClass::ProjectivePoint => light.world_transform().inverse() * frame.inverse_view,
                _ => light.projector_matrix() * frame.inverse_view,
            };
            set(device, b.projector_matrix, matrix.into());
            if let Some(loc) = b.projector {
                device.bind_texture(loc, projector, SamplerState::LINEAR_CLAMP);
            }
        }

        if let Some(map) = shadow {
            set(device, b.shadow_matrix, (map.world_to_shadow * frame.inverse_view).into());
            let texel = device
                .texture_descriptor(map.texture)
                .map_or(1.0 / 1024.0, |d| 1.0 / d.width.max(1) as f32);
            let softness = if features.contains(LightingFeatures::SOFT_SHADOW) { 2.0 } else { 0.0 };
            set(device, b.shadow_params, Vec4::new(texel, 0.0015, softness, 0.0).into());
            if let Some(loc) = b.shadow {
                device.bind_texture(loc, map.texture, SamplerState::POINT_CLAMP);
            }
        }

        let gbuffer_textures = [
            (b.albedo, gbuffer.albedo),
            (b.normal_depth, gbuffer.normal_depth),
            (b.specular, gbuffer.specular),
        ];
        for (location, texture) in gbuffer_textures {
            if let Some(location) = location {
                device.bind_texture(location, texture, SamplerState::POINT_CLAMP);
            }
        }

        let mut state = RenderState::fullscreen()
            .with_blend(BlendMode::ADDITIVE)
            .with_color_mask(ColorMask::RGB);
        if frame.stencil.is_some() {
            state = state.with_stencil(StencilState::test_equal(GEOMETRY_STENCIL));
        }
        device.set_render_state(state);
        device.set_scissor(Some(record.scissor));
        log::trace!(
            "Drawing {:?} light, scissor {:?} of {:?}",
            light.classify(),
            record.scissor,
            frame.viewport
        );
        self.quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.programs.clear(device);
        self.quad.release(device);
        self.records.clear();
    }
}

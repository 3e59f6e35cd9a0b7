// src/renderer/passes/ambient.rs
//
// Writes the base term of the accumulation buffer before any light is
// added: albedo * ambient * AO plus the GBuffer emissive channel.

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::renderer::device::*;
use crate::renderer::passes::gbuffer::{GBufferViews, GEOMETRY_STENCIL};
use crate::renderer::passes::surfaces::SurfaceChain;
use crate::renderer::program::{effective_language, FeatureSet, ProgramBindings, ProgramVariantCache};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AmbientFeatures: u32 {
        /// GBuffer target 3 holds nothing this frame.
        const NO_EMISSIVE = 1 << 0;
        const NO_AMBIENT_OCCLUSION = 1 << 1;
    }
}

impl FeatureSet for AmbientFeatures {
    fn vertex_stage() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbientSettings {
    #[serde(default = "AmbientSettings::default_color")]
    pub color: [f32; 3],
    #[serde(default = "AmbientSettings::default_intensity")]
    pub intensity: f32,
    #[serde(default)]
    pub no_ambient_occlusion: bool,
    #[serde(default)]
    pub shader_language: String,
}

impl Default for AmbientSettings {
    fn default() -> Self {
        Self {
            color: Self::default_color(),
            intensity: Self::default_intensity(),
            no_ambient_occlusion: false,
            shader_language: String::new(),
        }
    }
}

impl AmbientSettings {
    fn default_color() -> [f32; 3] {
        [0.2, 0.22, 0.25]
    }

    const fn default_intensity() -> f32 {
        1.0
    }
}

#[derive(Clone, Copy)]
struct AmbientBindings {
    ambient_color: Option<UniformLocation>,
    albedo: Option<UniformLocation>,
    normal_depth: Option<UniformLocation>,
    emissive: Option<UniformLocation>,
}

impl ProgramBindings for AmbientBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        Self {
            ambient_color: device.uniform_location(program, "ambient_color"),
            albedo: device.uniform_location(program, "albedo_texture"),
            normal_depth: device.uniform_location(program, "normal_depth_texture"),
            emissive: device.uniform_location(program, "emissive_texture"),
        }
    }
}

#[derive(Default)]
pub struct AmbientPass {
    programs: ProgramVariantCache<AmbientFeatures, AmbientBindings>,
    quad: FullscreenQuad,
}

impl AmbientPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the back buffer of `surfaces` with the ambient term.
    pub fn draw(
        &mut self,
        device: &mut dyn GraphicsDevice,
        settings: &AmbientSettings,
        surfaces: &SurfaceChain,
        gbuffer: &GBufferViews,
    ) -> bool {
        let Some(back) = surfaces.back() else {
            log::debug!("Ambient pass: no back buffer");
            return false;
        };

        // The GBuffer stencil tags background pixels; it is only usable when
        // it matches the accumulation buffer.
        let stencil = (gbuffer.size == surfaces.size() && surfaces.samples() == 1)
            .then_some(gbuffer.depth_stencil);

        let mut features = AmbientFeatures::empty();
        features.set(AmbientFeatures::NO_EMISSIVE, !gbuffer.emissive_used);
        features.set(AmbientFeatures::NO_AMBIENT_OCCLUSION, settings.no_ambient_occlusion);

        let language = effective_language(&*device, &settings.shader_language);
        let Some(program) = self
            .programs
            .get_program(device, &language, features.to_mask(), &shaders::AMBIENT)
        else {
            return false;
        };

        device.set_render_targets(TargetBinding::with_depth(vec![back], stencil));
        let bindings = *program.bind(device);

        let color = Vec3::from_array(settings.color) * settings.intensity.max(0.0);
        if let Some(loc) = bindings.ambient_color {
            device.set_uniform(loc, color.extend(1.0).into());
        }
        let textures = [
            (bindings.albedo, gbuffer.albedo),
            (bindings.normal_depth, gbuffer.normal_depth),
            (bindings.emissive, gbuffer.emissive),
        ];
        for (location, texture) in textures {
            if let Some(location) = location {
                device.bind_texture(location, texture, SamplerState::POINT_CLAMP);
            }
        }

        let mut state = RenderState::fullscreen();
        if stencil.is_some() {
            state = state.with_stencil(StencilState::test_equal(GEOMETRY_STENCIL));
        }
        device.set_render_state(state);
        device.set_scissor(None);
        self.quad.draw(device)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.programs.clear(device);
        self.quad.release(device);
    }
}

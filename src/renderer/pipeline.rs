// src/renderer/pipeline.rs
//
// Frame driver: runs the passes in their fixed order against one device.

use crate::renderer::device::GraphicsDevice;
use crate::renderer::material::MaterialLibrary;
use crate::renderer::passes::ssao::AoStats;
use crate::renderer::passes::{
    AmbientOcclusionPass, AmbientPass, GBufferPass, GBufferStats, LightingPass, LightingStats, SurfaceChain,
};
use crate::renderer::postprocess::{PostChain, PostContext, PostStats};
use crate::renderer::shadow::ShadowMapProvider;
use crate::scene::{Camera, VisibilityList};
use crate::settings::PipelineSettings;

/// Per-frame inputs owned by the caller.
pub struct FrameInput<'a> {
    pub visibility: &'a VisibilityList,
    pub materials: &'a MaterialLibrary,
    pub camera: &'a Camera,
    pub shadows: Option<&'a mut dyn ShadowMapProvider>,
    /// Seconds since the previous frame; drives light adaptation.
    pub delta_time: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Begin succeeded and End copied an image to the surface.
    pub presented: bool,
    pub gbuffer: GBufferStats,
    pub ambient_occlusion: AoStats,
    pub ambient: bool,
    pub lighting: LightingStats,
    pub post: PostStats,
    pub swaps: usize,
}

#[derive(Default)]
pub struct DeferredPipeline {
    surfaces: SurfaceChain,
    gbuffer: GBufferPass,
    ambient_occlusion: AmbientOcclusionPass,
    ambient: AmbientPass,
    lighting: LightingPass,
    post: PostChain,
}

impl DeferredPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surfaces(&self) -> &SurfaceChain {
        &self.surfaces
    }

    pub fn gbuffer(&self) -> &GBufferPass {
        &self.gbuffer
    }

    pub fn lighting(&self) -> &LightingPass {
        &self.lighting
    }

    pub fn ambient_occlusion(&self) -> &AmbientOcclusionPass {
        &self.ambient_occlusion
    }

    pub fn post(&self) -> &PostChain {
        &self.post
    }

    /// Begin, GBuffer, SSAO, ambient, lighting, post chain, End.
    ///
    /// Never fails: a pass that cannot run is skipped and the frame carries
    /// on with whatever image exists.
    pub fn render(&mut self, device: &mut dyn GraphicsDevice, settings: &PipelineSettings, input: FrameInput<'_>) -> FrameStats {
        let mut stats = FrameStats::default();
        if let Err(err) = device.begin_frame() {
            log::warn!("Frame skipped: {}", err);
            return stats;
        }

        self.post.sync(device, &settings.post);
        if !self.surfaces.begin(device, &settings.begin) {
            device.end_frame();
            return stats;
        }

        let gbuffer = self
            .gbuffer
            .draw(device, &settings.gbuffer, input.visibility, input.materials);
        stats.gbuffer = self.gbuffer.stats();

        if let Some(views) = gbuffer {
            self.ambient_occlusion
                .draw(device, &settings.ssao, &views, input.camera);
            stats.ambient_occlusion = self.ambient_occlusion.stats();

            stats.ambient = self
                .ambient
                .draw(device, &settings.ambient, &self.surfaces, &views);
            stats.lighting = self.lighting.draw(
                device,
                &settings.lighting,
                &self.surfaces,
                &views,
                input.visibility,
                input.camera,
                input.shadows,
            );

            let mut ctx = PostContext {
                surfaces: &mut self.surfaces,
                gbuffer: &views,
                camera: input.camera,
                lights: self.lighting.records(),
                delta_time: input.delta_time,
            };
            stats.post = self.post.draw(device, &settings.post, &mut ctx).clone();
        } else {
            log::debug!("GBuffer unavailable; presenting the cleared surface");
        }

        self.surfaces.end(device, &settings.begin);
        stats.swaps = self.surfaces.swap_count();
        stats.presented = true;
        device.end_frame();
        stats
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.post.release(device);
        self.lighting.release(device);
        self.ambient.release(device);
        self.ambient_occlusion.release(device);
        self.gbuffer.release(device);
        self.surfaces.release(device);
    }
}

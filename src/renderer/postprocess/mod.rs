// src/renderer/postprocess/mod.rs
//
// Post-process chain. Every effect reads the image so far from the surface
// chain's back buffer, swaps once when it consumes it and writes the result
// into the new back buffer.

pub mod dof;
pub mod edge_aa;
pub mod god_rays;
pub mod hdr;

pub use dof::{depth_blur_params, DepthOfFieldPass, DofPassSettings, DofSettings, DofStage};
pub use edge_aa::{EdgeAaPass, EdgeAaSettings};
pub use god_rays::{GodRaysPass, GodRaysSettings};
pub use hdr::{HdrFeatures, HdrPass, HdrSettings, HdrStats};

use serde::{Deserialize, Serialize};

use crate::renderer::device::{GraphicsDevice, TextureId};
use crate::renderer::passes::{GBufferViews, LightRecord, SurfaceChain};
use crate::scene::Camera;

/// Everything an effect may read while it runs.
pub struct PostContext<'a> {
    pub surfaces: &'a mut SurfaceChain,
    pub gbuffer: &'a GBufferViews,
    pub camera: &'a Camera,
    pub lights: &'a [LightRecord],
    pub delta_time: f32,
}

/// One consume step: swap, bind the new back buffer without depth and hand
/// out the image so far.
pub(crate) fn consume_image(device: &mut dyn GraphicsDevice, surfaces: &mut SurfaceChain) -> Option<TextureId> {
    surfaces.swap();
    if !surfaces.bind_back(device, false) {
        return None;
    }
    surfaces.front()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PostEffectKind {
    DepthOfField,
    GodRays,
    EdgeAntiAlias,
    Hdr,
}

impl PostEffectKind {
    /// Position in the chain; lower runs first.
    pub fn rank(self) -> u8 {
        match self {
            Self::DepthOfField => 0,
            Self::GodRays => 1,
            Self::EdgeAntiAlias => 2,
            Self::Hdr => 3,
        }
    }
}

pub enum PostEffect {
    DepthOfField(DepthOfFieldPass),
    GodRays(GodRaysPass),
    EdgeAntiAlias(EdgeAaPass),
    Hdr(HdrPass),
}

impl PostEffect {
    pub fn new(kind: PostEffectKind) -> Self {
        match kind {
            PostEffectKind::DepthOfField => Self::DepthOfField(DepthOfFieldPass::new()),
            PostEffectKind::GodRays => Self::GodRays(GodRaysPass::new()),
            PostEffectKind::EdgeAntiAlias => Self::EdgeAntiAlias(EdgeAaPass::new()),
            PostEffectKind::Hdr => Self::Hdr(HdrPass::new()),
        }
    }

    pub fn kind(&self) -> PostEffectKind {
        match self {
            Self::DepthOfField(_) => PostEffectKind::DepthOfField,
            Self::GodRays(_) => PostEffectKind::GodRays,
            Self::EdgeAntiAlias(_) => PostEffectKind::EdgeAntiAlias,
            Self::Hdr(_) => PostEffectKind::Hdr,
        }
    }

    pub fn rank(&self) -> u8 {
        self.kind().rank()
    }

    fn draw(&mut self, device: &mut dyn GraphicsDevice, settings: &PostSettings, ctx: &mut PostContext<'_>) -> bool {
        match self {
            Self::DepthOfField(pass) => pass.draw(device, &settings.dof, ctx),
            Self::GodRays(pass) => pass.draw(device, &settings.god_rays, ctx),
            Self::EdgeAntiAlias(pass) => pass.draw(device, &settings.edge_aa, ctx),
            Self::Hdr(pass) => pass.draw(device, &settings.hdr, ctx),
        }
    }

    fn release(&mut self, device: &mut dyn GraphicsDevice) {
        match self {
            Self::DepthOfField(pass) => pass.release(device),
            Self::GodRays(pass) => pass.release(device),
            Self::EdgeAntiAlias(pass) => pass.release(device),
            Self::Hdr(pass) => pass.release(device),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostSettings {
    pub dof: DofPassSettings,
    pub god_rays: GodRaysSettings,
    pub edge_aa: EdgeAaSettings,
    pub hdr: HdrSettings,
}

impl PostSettings {
    pub fn enabled(&self, kind: PostEffectKind) -> bool {
        match kind {
            PostEffectKind::DepthOfField => self.dof.enabled,
            PostEffectKind::GodRays => self.god_rays.enabled,
            PostEffectKind::EdgeAntiAlias => self.edge_aa.enabled,
            PostEffectKind::Hdr => self.hdr.enabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostStats {
    /// Effects that wrote an image this frame, in chain order.
    pub applied: Vec<PostEffectKind>,
    pub nan_texels: usize,
    pub adapted_luminance: Option<f32>,
}

/// Effects kept sorted by rank, at most one of each kind.
#[derive(Default)]
pub struct PostChain {
    effects: Vec<PostEffect>,
    stats: PostStats,
}

impl PostChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `effect` at its rank, replacing an effect of the same kind.
    /// Returns the replaced effect so the caller can release it.
    pub fn insert(&mut self, effect: PostEffect) -> Option<PostEffect> {
        let kind = effect.kind();
        if let Some(existing) = self.effects.iter_mut().find(|e| e.kind() == kind) {
            return Some(std::mem::replace(existing, effect));
        }
        let index = self
            .effects
            .iter()
            .position(|e| e.rank() > effect.rank())
            .unwrap_or(self.effects.len());
        self.effects.insert(index, effect);
        None
    }

    pub fn remove(&mut self, kind: PostEffectKind) -> Option<PostEffect> {
        let index = self.effects.iter().position(|e| e.kind() == kind)?;
        Some(self.effects.remove(index))
    }

    pub fn contains(&self, kind: PostEffectKind) -> bool {
        self.effects.iter().any(|e| e.kind() == kind)
    }

    pub fn kinds(&self) -> Vec<PostEffectKind> {
        self.effects.iter().map(PostEffect::kind).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn hdr(&self) -> Option<&HdrPass> {
        self.effects.iter().find_map(|e| match e {
            PostEffect::Hdr(pass) => Some(pass),
            _ => None,
        })
    }

    pub fn stats(&self) -> &PostStats {
        &self.stats
    }

    /// Adds or drops effects so the chain matches the enabled flags.
    pub fn sync(&mut self, device: &mut dyn GraphicsDevice, settings: &PostSettings) {
        let kinds = [
            PostEffectKind::DepthOfField,
            PostEffectKind::GodRays,
            PostEffectKind::EdgeAntiAlias,
            PostEffectKind::Hdr,
        ];
        for kind in kinds {
            match (settings.enabled(kind), self.contains(kind)) {
                (true, false) => {
                    log::debug!("Post chain: enabling {:?}", kind);
                    self.insert(PostEffect::new(kind));
                }
                (false, true) => {
                    log::debug!("Post chain: disabling {:?}", kind);
                    if let Some(mut effect) = self.remove(kind) {
                        effect.release(device);
                    }
                }
                _ => {}
            }
        }
    }

    /// Runs every effect in rank order. An effect that fails leaves the
    /// image untouched for the next one.
    pub fn draw(&mut self, device: &mut dyn GraphicsDevice, settings: &PostSettings, ctx: &mut PostContext<'_>) -> &PostStats {
        self.stats = PostStats::default();
        for effect in &mut self.effects {
            if effect.draw(device, settings, ctx) {
                self.stats.applied.push(effect.kind());
            } else {
                log::debug!("Post effect {:?} skipped this frame", effect.kind());
            }
            if let PostEffect::Hdr(hdr) = effect {
                let stats = hdr.stats();
                self.stats.nan_texels = stats.nan_texels;
                self.stats.adapted_luminance = hdr.adapted_luminance();
            }
        }
        &self.stats
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for effect in &mut self.effects {
            effect.release(device);
        }
    }
}

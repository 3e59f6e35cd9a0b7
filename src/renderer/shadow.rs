use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::renderer::device::{GraphicsDevice, TextureId};
use crate::renderer::lights::Light;

/// A shadow map rendered for one light this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowMap {
    pub texture: TextureId,
    /// World space to shadow-map clip space.
    pub world_to_shadow: Mat4,
}

/// The shadow-mapping system, consumed at its interface only.
pub trait ShadowMapProvider {
    fn is_active(&self) -> bool;

    /// Renders (or reuses) the shadow map of `light` at `lod`; level 0 is
    /// full resolution and every level halves it. `None` when no shadow
    /// target is available.
    fn update_shadow_map(&mut self, device: &mut dyn GraphicsDevice, light: &Light, lod: u32) -> Option<ShadowMap>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowLodSettings {
    #[serde(default = "ShadowLodSettings::default_enabled")]
    pub enabled: bool,
    /// Camera distances at which the next lower resolution kicks in.
    #[serde(default = "ShadowLodSettings::default_distances")]
    pub distances: Vec<f32>,
}

impl Default for ShadowLodSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            distances: Self::default_distances(),
        }
    }
}

impl ShadowLodSettings {
    /// Level of detail for a light at squared camera distance `distance_sq`.
    pub fn select(&self, distance_sq: f32) -> u32 {
        if !self.enabled {
            return 0;
        }
        self.distances
            .iter()
            .take_while(|d| distance_sq > **d * **d)
            .count() as u32
    }

    const fn default_enabled() -> bool {
        true
    }

    fn default_distances() -> Vec<f32> {
        vec![15.0, 40.0, 80.0]
    }
}

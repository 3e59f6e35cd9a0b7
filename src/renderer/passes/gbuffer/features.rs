use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::renderer::material::{params, Material};
use crate::renderer::program::FeatureSet;

bitflags! {
    /// Shading features of a GBuffer program variant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GBufferFeatures: u32 {
        const DIFFUSE_MAP = 1 << 0;
        const NORMAL_MAP = 1 << 1;
        const DETAIL_NORMAL_MAP = 1 << 2;
        const PARALLAX = 1 << 3;
        const DISPLACEMENT = 1 << 4;
        const AMBIENT_OCCLUSION_MAP = 1 << 5;
        const LIGHT_MAP = 1 << 6;
        const EMISSIVE_MAP = 1 << 7;
        const REFLECTION_MAP = 1 << 8;
        const TWO_SIDED = 1 << 9;
        const FRESNEL = 1 << 10;
        const GLOW = 1 << 11;
    }
}

impl FeatureSet for GBufferFeatures {
    fn vertex_stage() -> Self {
        // Tangent frames and vertex displacement
        Self::NORMAL_MAP | Self::DETAIL_NORMAL_MAP | Self::PARALLAX | Self::DISPLACEMENT
    }
}

bitflags! {
    /// Pass-level switches that strip features regardless of the material.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GBufferOverrides: u32 {
        const NO_NORMAL_MAP = 1 << 0;
        const NO_PARALLAX = 1 << 1;
        const NO_DETAIL_NORMAL_MAP = 1 << 2;
        const NO_DISPLACEMENT = 1 << 3;
        const NO_LIGHT_MAP = 1 << 4;
        const NO_EMISSIVE_MAP = 1 << 5;
        const NO_REFLECTION = 1 << 6;
        const NO_FRESNEL = 1 << 7;
        const NO_GLOW = 1 << 8;
        const NO_AMBIENT_OCCLUSION_MAP = 1 << 9;
    }
}

impl GBufferOverrides {
    /// Features each override removes.
    fn stripped(self) -> GBufferFeatures {
        let mut strip = GBufferFeatures::empty();
        let pairs = [
            (Self::NO_NORMAL_MAP, GBufferFeatures::NORMAL_MAP),
            (Self::NO_PARALLAX, GBufferFeatures::PARALLAX),
            (Self::NO_DETAIL_NORMAL_MAP, GBufferFeatures::DETAIL_NORMAL_MAP),
            (Self::NO_DISPLACEMENT, GBufferFeatures::DISPLACEMENT),
            (Self::NO_LIGHT_MAP, GBufferFeatures::LIGHT_MAP),
            (Self::NO_EMISSIVE_MAP, GBufferFeatures::EMISSIVE_MAP),
            (Self::NO_REFLECTION, GBufferFeatures::REFLECTION_MAP),
            (Self::NO_FRESNEL, GBufferFeatures::FRESNEL),
            (Self::NO_GLOW, GBufferFeatures::GLOW),
            (Self::NO_AMBIENT_OCCLUSION_MAP, GBufferFeatures::AMBIENT_OCCLUSION_MAP),
        ];
        for (flag, feature) in pairs {
            if self.contains(flag) {
                strip |= feature;
            }
        }
        strip
    }
}

/// Serializable form of [`GBufferOverrides`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GBufferOverrideSettings {
    pub no_normal_map: bool,
    pub no_parallax: bool,
    pub no_detail_normal_map: bool,
    pub no_displacement: bool,
    pub no_light_map: bool,
    pub no_emissive_map: bool,
    pub no_reflection: bool,
    pub no_fresnel: bool,
    pub no_glow: bool,
    pub no_ambient_occlusion_map: bool,
}

impl GBufferOverrideSettings {
    pub fn flags(&self) -> GBufferOverrides {
        let mut flags = GBufferOverrides::empty();
        flags.set(GBufferOverrides::NO_NORMAL_MAP, self.no_normal_map);
        flags.set(GBufferOverrides::NO_PARALLAX, self.no_parallax);
        flags.set(GBufferOverrides::NO_DETAIL_NORMAL_MAP, self.no_detail_normal_map);
        flags.set(GBufferOverrides::NO_DISPLACEMENT, self.no_displacement);
        flags.set(GBufferOverrides::NO_LIGHT_MAP, self.no_light_map);
        flags.set(GBufferOverrides::NO_EMISSIVE_MAP, self.no_emissive_map);
        flags.set(GBufferOverrides::NO_REFLECTION, self.no_reflection);
        flags.set(GBufferOverrides::NO_FRESNEL, self.no_fresnel);
        flags.set(GBufferOverrides::NO_GLOW, self.no_glow);
        flags.set(GBufferOverrides::NO_AMBIENT_OCCLUSION_MAP, self.no_ambient_occlusion_map);
        flags
    }
}

/// Features a material asks for, minus what the pass overrides disable.
pub fn material_features(material: &Material, overrides: GBufferOverrides) -> GBufferFeatures {
    let mut features = GBufferFeatures::empty();
    let has = |name| material.texture(name).is_some();

    features.set(GBufferFeatures::DIFFUSE_MAP, has(params::DIFFUSE_MAP));
    features.set(GBufferFeatures::NORMAL_MAP, has(params::NORMAL_MAP));
    // Detail normals perturb the base normal map
    features.set(
        GBufferFeatures::DETAIL_NORMAL_MAP,
        has(params::DETAIL_NORMAL_MAP) && has(params::NORMAL_MAP),
    );
    features.set(
        GBufferFeatures::PARALLAX,
        has(params::HEIGHT_MAP) && material.flag(params::PARALLAX),
    );
    features.set(
        GBufferFeatures::DISPLACEMENT,
        has(params::DISPLACEMENT_MAP) && material.flag(params::DISPLACEMENT),
    );
    features.set(GBufferFeatures::AMBIENT_OCCLUSION_MAP, has(params::AMBIENT_OCCLUSION_MAP));
    features.set(GBufferFeatures::LIGHT_MAP, has(params::LIGHT_MAP));
    features.set(GBufferFeatures::EMISSIVE_MAP, has(params::EMISSIVE_MAP));
    features.set(GBufferFeatures::REFLECTION_MAP, has(params::REFLECTION_MAP));
    features.set(GBufferFeatures::TWO_SIDED, material.flag(params::TWO_SIDED));
    features.set(GBufferFeatures::FRESNEL, material.flag(params::FRESNEL));
    features.set(GBufferFeatures::GLOW, material.flag(params::GLOW));

    let mut features = features - overrides.stripped();
    if !features.contains(GBufferFeatures::NORMAL_MAP) {
        features.remove(GBufferFeatures::DETAIL_NORMAL_MAP);
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::TextureId;
    use crate::renderer::material::{MaterialId, ParamValue};

    #[test]
    fn diffuse_only_material_sets_only_diffuse_bit() {
        let m = Material::new(MaterialId(1), "plain").with_texture(params::DIFFUSE_MAP, TextureId(4));
        let features = material_features(&m, GBufferOverrides::empty());
        assert_eq!(features, GBufferFeatures::DIFFUSE_MAP);
        assert_eq!(features.to_mask().vertex, 0);
    }

    #[test]
    fn override_strips_normal_and_detail_maps() {
        let m = Material::new(MaterialId(1), "bumpy")
            .with_texture(params::NORMAL_MAP, TextureId(1))
            .with_texture(params::DETAIL_NORMAL_MAP, TextureId(2));
        let on = material_features(&m, GBufferOverrides::empty());
        assert!(on.contains(GBufferFeatures::NORMAL_MAP | GBufferFeatures::DETAIL_NORMAL_MAP));

        let off = material_features(&m, GBufferOverrides::NO_NORMAL_MAP);
        assert!(!off.intersects(GBufferFeatures::NORMAL_MAP | GBufferFeatures::DETAIL_NORMAL_MAP));
    }

    #[test]
    fn parallax_needs_height_map_and_toggle() {
        let m = Material::new(MaterialId(1), "stone").with(params::PARALLAX, ParamValue::Bool(true));
        assert!(!material_features(&m, GBufferOverrides::empty()).contains(GBufferFeatures::PARALLAX));
        let m = m.with_texture(params::HEIGHT_MAP, TextureId(9));
        assert!(material_features(&m, GBufferOverrides::empty()).contains(GBufferFeatures::PARALLAX));
    }

    #[test]
    fn settings_map_onto_flags() {
        let settings = GBufferOverrideSettings {
            no_glow: true,
            no_fresnel: true,
            ..Default::default()
        };
        assert_eq!(settings.flags(), GBufferOverrides::NO_GLOW | GBufferOverrides::NO_FRESNEL);
    }
}

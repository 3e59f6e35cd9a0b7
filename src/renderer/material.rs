// renderer/material.rs (parameter bag version)
//
// Materials are plain key/value bags owned by the material system; the
// GBuffer pass only queries the parameter names listed in `params`.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::renderer::device::TextureId;

/// Parameter names queried by the GBuffer pass.
pub mod params {
    pub const DIFFUSE_MAP: &str = "DiffuseMap";
    pub const NORMAL_MAP: &str = "NormalMap";
    pub const DETAIL_NORMAL_MAP: &str = "DetailNormalMap";
    pub const HEIGHT_MAP: &str = "HeightMap";
    pub const DISPLACEMENT_MAP: &str = "DisplacementMap";
    pub const AMBIENT_OCCLUSION_MAP: &str = "AmbientOcclusionMap";
    pub const LIGHT_MAP: &str = "LightMap";
    pub const EMISSIVE_MAP: &str = "EmissiveMap";
    pub const REFLECTION_MAP: &str = "ReflectionMap";
    pub const TWO_SIDED: &str = "TwoSided";
    pub const PARALLAX: &str = "Parallax";
    pub const DISPLACEMENT: &str = "Displacement";
    pub const FRESNEL: &str = "Fresnel";
    pub const GLOW: &str = "Glow";
    pub const OPACITY: &str = "Opacity";
    pub const DIFFUSE_COLOR: &str = "DiffuseColor";
    pub const SPECULAR_COLOR: &str = "SpecularColor";
    pub const SPECULAR_POWER: &str = "SpecularPower";
    pub const EMISSIVE_COLOR: &str = "EmissiveColor";
    pub const PARALLAX_SCALE: &str = "ParallaxScale";
    pub const DISPLACEMENT_SCALE: &str = "DisplacementScale";
    pub const DETAIL_SCALE: &str = "DetailScale";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Bool(bool),
    Float(f32),
    Color([f32; 4]),
    Texture(TextureId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    #[serde(default)]
    pub name: String,
    /// Bumped on every parameter change so derived data can be re-keyed.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl Material {
    pub fn new(id: MaterialId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            version: 0,
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: ParamValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_texture(self, name: &str, texture: TextureId) -> Self {
        self.with(name, ParamValue::Texture(texture))
    }

    pub fn set(&mut self, name: &str, value: ParamValue) {
        self.params.insert(name.to_string(), value);
        self.version = self.version.wrapping_add(1);
    }

    pub fn remove(&mut self, name: &str) {
        if self.params.remove(name).is_some() {
            self.version = self.version.wrapping_add(1);
        }
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.params.get(name).copied()
    }

    pub fn texture(&self, name: &str) -> Option<TextureId> {
        match self.get(name)? {
            ParamValue::Texture(id) => Some(id),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.get(name)? {
            ParamValue::Float(v) => Some(v),
            ParamValue::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn color(&self, name: &str) -> Option<[f32; 4]> {
        match self.get(name)? {
            ParamValue::Color(c) => Some(c),
            ParamValue::Float(v) => Some([v, v, v, 1.0]),
            _ => None,
        }
    }

    /// A toggle: `true`, or any positive number.
    pub fn flag(&self, name: &str) -> bool {
        match self.get(name) {
            Some(ParamValue::Bool(b)) => b,
            Some(ParamValue::Float(v)) => v > 0.0,
            _ => false,
        }
    }

    pub fn opacity(&self) -> f32 {
        self.float(params::OPACITY).unwrap_or(1.0)
    }

    pub fn is_transparent(&self) -> bool {
        self.opacity() < 1.0
    }
}

/// Materials referenced by the visible meshes of a frame.
#[derive(Debug, Default, Clone)]
pub struct MaterialLibrary {
    materials: HashMap<MaterialId, Material>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) -> MaterialId {
        let id = material.id;
        self.materials.insert(id, material);
        id
    }

    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }

    pub fn get_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Parses a JSON array of materials.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let list: Vec<Material> = serde_json::from_str(json)?;
        let mut library = Self::new();
        for material in list {
            library.insert(material);
        }
        Ok(library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setting_a_parameter_bumps_version() {
        let mut m = Material::new(MaterialId(1), "brick");
        let before = m.version;
        m.set(params::GLOW, ParamValue::Float(0.5));
        assert_eq!(m.version, before + 1);
        assert!(m.flag(params::GLOW));
    }

    #[test]
    fn opacity_defaults_to_opaque() {
        let m = Material::new(MaterialId(1), "brick");
        assert!(!m.is_transparent());
        let glass = m.with(params::OPACITY, ParamValue::Float(0.3));
        assert!(glass.is_transparent());
    }

    #[test]
    fn library_parses_parameter_bags() {
        let json = r#"[
            { "id": 3, "name": "floor", "params": {
                "DiffuseMap": { "texture": 12 },
                "TwoSided": { "bool": true },
                "Opacity": { "float": 1.0 }
            } }
        ]"#;
        let library = MaterialLibrary::from_json(json).unwrap();
        let floor = library.get(MaterialId(3)).unwrap();
        assert!(floor.flag(params::TWO_SIDED));
        assert_eq!(floor.opacity(), 1.0);
        assert_eq!(floor.texture(params::DIFFUSE_MAP), Some(TextureId(12)));
    }
}

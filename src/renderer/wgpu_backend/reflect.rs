// src/renderer/wgpu_backend/reflect.rs
//
// Compiles a generated WGSL module with naga and extracts what the device
// needs to address it by name: the `Params` uniform block at group 0,
// texture/sampler pairs at group 1 and vertex input locations.

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::{RenderError, Result};

pub const UNIFORM_GROUP: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;
pub const SAMPLER_SUFFIX: &str = "_sampler";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub texture_binding: u32,
    pub sampler_binding: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramLayout {
    /// Byte size of the uniform block; zero when the program has none.
    pub uniform_size: u32,
    pub uniform_binding: Option<u32>,
    pub uniforms: Vec<UniformMember>,
    pub textures: Vec<TextureSlot>,
    pub attributes: Vec<(String, u32)>,
}

impl ProgramLayout {
    pub fn uniform(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|u| u.name == name)
    }

    pub fn texture(&self, name: &str) -> Option<usize> {
        self.textures.iter().position(|t| t.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, location)| *location)
    }
}

/// Parses and validates `source`, returning the module and its layout.
pub fn compile(label: &str, source: &str) -> Result<(naga::Module, ProgramLayout)> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| RenderError::ProgramCompile {
        label: label.to_string(),
        message: err.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|err| RenderError::ProgramCompile {
            label: label.to_string(),
            message: err.emit_to_string(source),
        })?;

    let layout = reflect(&module);
    Ok((module, layout))
}

pub fn reflect(module: &naga::Module) -> ProgramLayout {
    let mut layout = ProgramLayout::default();
    let mut samplers: Vec<(String, u32)> = Vec::new();

    for (_, global) in module.global_variables.iter() {
        let (Some(binding), Some(name)) = (&global.binding, &global.name) else {
            continue;
        };
        let inner = &module.types[global.ty].inner;
        match (binding.group, inner) {
            (UNIFORM_GROUP, naga::TypeInner::Struct { members, span }) => {
                layout.uniform_size = *span;
                layout.uniform_binding = Some(binding.binding);
                layout.uniforms = members
                    .iter()
                    .filter_map(|member| {
                        Some(UniformMember {
                            name: member.name.clone()?,
                            offset: member.offset,
                            size: module.types[member.ty].inner.size(module.to_ctx()),
                        })
                    })
                    .collect();
            }
            (TEXTURE_GROUP, naga::TypeInner::Image { .. }) => layout.textures.push(TextureSlot {
                name: name.clone(),
                texture_binding: binding.binding,
                sampler_binding: None,
            }),
            (TEXTURE_GROUP, naga::TypeInner::Sampler { .. }) => samplers.push((name.clone(), binding.binding)),
            _ => log::trace!("Ignoring global '{}' at group {}", name, binding.group),
        }
    }

    for slot in &mut layout.textures {
        let sampler_name = format!("{}{}", slot.name, SAMPLER_SUFFIX);
        slot.sampler_binding = samplers
            .iter()
            .find(|(name, _)| *name == sampler_name)
            .map(|(_, binding)| *binding);
    }
    layout.textures.sort_by_key(|slot| slot.texture_binding);

    if let Some(entry) = module
        .entry_points
        .iter()
        .find(|entry| entry.stage == naga::ShaderStage::Vertex)
    {
        for argument in &entry.function.arguments {
            match (&argument.binding, &module.types[argument.ty].inner) {
                (Some(naga::Binding::Location { location, .. }), _) => {
                    if let Some(name) = &argument.name {
                        layout.attributes.push((name.clone(), *location));
                    }
                }
                (None, naga::TypeInner::Struct { members, .. }) => {
                    for member in members {
                        if let (Some(naga::Binding::Location { location, .. }), Some(name)) =
                            (&member.binding, &member.name)
                        {
                            layout.attributes.push((name.clone(), *location));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    layout
}

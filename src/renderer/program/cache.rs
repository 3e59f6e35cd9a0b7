// src/renderer/program/cache.rs
use std::collections::HashMap;
use std::marker::PhantomData;

use crate::error::Result;
use crate::renderer::device::{GraphicsDevice, ProgramId, ProgramSource};
use crate::renderer::program::features::{language_define, FeatureSet, ShaderFeatureMask};
use crate::renderer::program::preprocess::preprocess;

/// Source template of one pass.
///
/// `common` is prepended to the vertex stage and sees every define;
/// `vertex` sees only the vertex submask; `fragment` sees every define.
#[derive(Debug, Clone, Copy)]
pub struct ProgramTemplate {
    pub name: &'static str,
    pub common: &'static str,
    pub vertex: &'static str,
    pub fragment: &'static str,
}

/// Uniform/attribute locations of a program, resolved once after the
/// program is first bound.
pub trait ProgramBindings: Sized {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self;
}

impl ProgramBindings for () {
    fn resolve(_device: &dyn GraphicsDevice, _program: ProgramId) -> Self {}
}

#[derive(Debug)]
pub struct GeneratedProgram<B> {
    id: ProgramId,
    bindings: Option<B>,
}

impl<B: ProgramBindings> GeneratedProgram<B> {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    /// Binds the program and returns its locations, resolving them on the
    /// first call.
    pub fn bind(&mut self, device: &mut dyn GraphicsDevice) -> &B {
        device.use_program(self.id);
        let id = self.id;
        self.bindings.get_or_insert_with(|| {
            log::trace!("Resolving bindings for program {:?}", id);
            B::resolve(&*device, id)
        })
    }

    pub fn has_resolved_bindings(&self) -> bool {
        self.bindings.is_some()
    }
}

/// Maps feature masks to compiled programs for one pass instance.
///
/// All entries belong to one shader language; asking for another language
/// drops the whole cache first.
pub struct ProgramVariantCache<F, B> {
    language: Option<String>,
    programs: HashMap<ShaderFeatureMask, GeneratedProgram<B>>,
    compiles: usize,
    _features: PhantomData<F>,
}

impl<F: FeatureSet, B: ProgramBindings> Default for ProgramVariantCache<F, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FeatureSet, B: ProgramBindings> ProgramVariantCache<F, B> {
    pub fn new() -> Self {
        Self {
            language: None,
            programs: HashMap::new(),
            compiles: 0,
            _features: PhantomData,
        }
    }

    /// Returns the program for `mask`, generating and compiling it on a miss.
    ///
    /// A failed compile is logged, nothing is cached, and `None` is returned
    /// so the caller skips this combination for the frame.
    pub fn get_program(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        mask: ShaderFeatureMask,
        template: &ProgramTemplate,
    ) -> Option<&mut GeneratedProgram<B>> {
        if self.language.as_deref() != Some(language) {
            if self.language.is_some() {
                log::info!(
                    "Shader language of {} changed to '{}'; dropping {} cached programs",
                    template.name,
                    language,
                    self.programs.len()
                );
            }
            self.clear(device);
            self.language = Some(language.to_string());
        }

        if self.programs.contains_key(&mask) {
            log::trace!("Program cache hit: {}[{}]", template.name, mask);
        } else {
            match Self::generate(device, language, mask, template) {
                Ok(id) => {
                    self.compiles += 1;
                    log::info!("Compiled program {}[{}]", template.name, mask);
                    self.programs.insert(mask, GeneratedProgram { id, bindings: None });
                }
                Err(err) => {
                    log::error!("{}", err);
                    return None;
                }
            }
        }
        self.programs.get_mut(&mask)
    }

    fn generate(
        device: &mut dyn GraphicsDevice,
        language: &str,
        mask: ShaderFeatureMask,
        template: &ProgramTemplate,
    ) -> Result<ProgramId> {
        let language_define = language_define(language);

        let mut vertex_defines: Vec<&str> = F::defines(mask.vertex);
        vertex_defines.push(language_define.as_str());
        let mut all_defines: Vec<&str> = F::defines(mask.fragment | mask.vertex);
        all_defines.push(language_define.as_str());

        let common = preprocess(template.name, template.common, &all_defines)?;
        let vertex = preprocess(template.name, template.vertex, &vertex_defines)?;
        let fragment = preprocess(template.name, template.fragment, &all_defines)?;

        let vertex = format!("{}\n{}", common, vertex);
        let label = format!("{}[{}]", template.name, mask);
        device.create_program(&ProgramSource {
            label: &label,
            language,
            vertex: &vertex,
            fragment: &fragment,
        })
    }

    pub fn contains(&self, mask: ShaderFeatureMask) -> bool {
        self.programs.contains_key(&mask)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Number of successful compiles over the cache's lifetime.
    pub fn compiles(&self) -> usize {
        self.compiles
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Destroys every cached program.
    pub fn clear(&mut self, device: &mut dyn GraphicsDevice) {
        for (_, program) in self.programs.drain() {
            device.destroy_program(program.id);
        }
    }
}

// src/renderer/passes/surfaces.rs
//
// Begin/End pair: owns the double-buffered colour targets (plus optional
// depth) that the accumulation and post-process passes ping-pong between.
// Back is the render target, front holds the image so far.

use bitflags::bitflags;
use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::renderer::device::*;
use crate::renderer::program::{FeatureSet, ProgramBindings, ProgramVariantCache};
use crate::renderer::quad::FullscreenQuad;
use crate::renderer::shaders;
use crate::renderer::target::ManagedTarget;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearSettings {
    #[serde(default = "ClearSettings::default_true")]
    pub color: bool,
    #[serde(default = "ClearSettings::default_true")]
    pub depth: bool,
    #[serde(default = "ClearSettings::default_true")]
    pub stencil: bool,
}

impl Default for ClearSettings {
    fn default() -> Self {
        Self {
            color: true,
            depth: true,
            stencil: true,
        }
    }
}

impl ClearSettings {
    pub fn flags(&self) -> ClearFlags {
        let mut flags = ClearFlags::empty();
        flags.set(ClearFlags::COLOR, self.color);
        flags.set(ClearFlags::DEPTH, self.depth);
        flags.set(ClearFlags::STENCIL, self.stencil);
        flags
    }

    const fn default_true() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceSettings {
    #[serde(default = "SurfaceSettings::default_format")]
    pub format: TextureFormat,
    /// Explicit size; the viewport size is used when absent.
    #[serde(default)]
    pub custom_size: Option<(u32, u32)>,
    #[serde(default = "SurfaceSettings::default_samples")]
    pub samples: u32,
    #[serde(default = "ClearSettings::default_true")]
    pub depth: bool,
    #[serde(default = "ClearSettings::default_true")]
    pub stencil: bool,
    #[serde(default)]
    pub clear: ClearSettings,
    #[serde(default = "SurfaceSettings::default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default = "SurfaceSettings::default_clear_depth")]
    pub clear_depth: f32,
    #[serde(default)]
    pub clear_stencil: u32,
    #[serde(default)]
    pub fill_mode: FillMode,
    /// Force alpha to one when copying to the original target.
    #[serde(default = "ClearSettings::default_true")]
    pub opaque_output: bool,
    #[serde(default)]
    pub shader_language: String,
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            format: Self::default_format(),
            custom_size: None,
            samples: Self::default_samples(),
            depth: true,
            stencil: true,
            clear: ClearSettings::default(),
            clear_color: Self::default_clear_color(),
            clear_depth: Self::default_clear_depth(),
            clear_stencil: 0,
            fill_mode: FillMode::Solid,
            opaque_output: true,
            shader_language: String::new(),
        }
    }
}

impl SurfaceSettings {
    pub fn depth_format(&self) -> Option<TextureFormat> {
        match (self.depth, self.stencil) {
            (_, true) => Some(TextureFormat::Depth24PlusStencil8),
            (true, false) => Some(TextureFormat::Depth32Float),
            (false, false) => None,
        }
    }

    const fn default_format() -> TextureFormat {
        TextureFormat::Rgba16Float
    }

    const fn default_samples() -> u32 {
        1
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.0, 0.0, 0.0, 1.0]
    }

    const fn default_clear_depth() -> f32 {
        1.0
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CopyFeatures: u32 {
        const FORCE_OPAQUE = 1 << 0;
    }
}

impl FeatureSet for CopyFeatures {
    fn vertex_stage() -> Self {
        Self::empty()
    }
}

#[derive(Clone, Copy)]
struct CopyBindings {
    source: Option<UniformLocation>,
}

impl ProgramBindings for CopyBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        Self {
            source: device.uniform_location(program, "source_texture"),
        }
    }
}

pub struct SurfaceChain {
    targets: [ManagedTarget; 2],
    depth: ManagedTarget,
    /// Index of the front (readable) target.
    front: usize,
    size: (u32, u32),
    samples: u32,
    swaps: usize,
    programs: ProgramVariantCache<CopyFeatures, CopyBindings>,
    quad: FullscreenQuad,
}

impl Default for SurfaceChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceChain {
    pub fn new() -> Self {
        Self {
            targets: [
                ManagedTarget::new("SurfaceA"),
                ManagedTarget::new("SurfaceB"),
            ],
            depth: ManagedTarget::new("SurfaceDepth"),
            front: 0,
            size: (0, 0),
            samples: 1,
            swaps: 0,
            programs: ProgramVariantCache::new(),
            quad: FullscreenQuad::new(),
        }
    }

    /// Creates or recreates the colour pair and the depth texture when the
    /// requested settings differ from the existing ones.
    pub fn allocate(&mut self, device: &mut dyn GraphicsDevice, settings: &SurfaceSettings) -> Result<()> {
        let (width, height) = settings
            .custom_size
            .unwrap_or_else(|| device.viewport_size());
        let color = TargetDescriptor::new(width, height, settings.format).with_samples(settings.samples);

        for target in &mut self.targets {
            target.ensure(device, &color)?;
        }

        match settings.depth_format() {
            Some(format) => {
                let depth = TargetDescriptor::new(width, height, format).with_samples(settings.samples);
                self.depth.ensure(device, &depth)?;
            }
            None => self.depth.release(device),
        }

        self.size = color.size();
        self.samples = color.samples;
        Ok(())
    }

    /// Allocates, binds the back buffer, clears and sets the fill mode.
    /// Returns `false` when the targets could not be allocated this frame.
    pub fn begin(&mut self, device: &mut dyn GraphicsDevice, settings: &SurfaceSettings) -> bool {
        if let Err(err) = self.allocate(device, settings) {
            log::error!("Begin pass skipped: {}", err);
            return false;
        }

        self.swaps = 0;
        self.bind_back(device, true);
        let flags = self.clear_flags(settings);
        if !flags.is_empty() {
            device.clear(
                flags,
                Vec4::from_array(settings.clear_color),
                settings.clear_depth,
                settings.clear_stencil,
            );
        }
        device.set_fill_mode(settings.fill_mode);
        true
    }

    /// Requested clear flags minus the planes that do not exist.
    fn clear_flags(&self, settings: &SurfaceSettings) -> ClearFlags {
        let mut flags = settings.clear.flags();
        match self.depth.descriptor() {
            None => flags.remove(ClearFlags::DEPTH | ClearFlags::STENCIL),
            Some(desc) if !desc.format.has_stencil() => flags.remove(ClearFlags::STENCIL),
            Some(_) => {}
        }
        flags
    }

    /// Front becomes back and back becomes front.
    pub fn swap(&mut self) {
        self.front ^= 1;
        self.swaps += 1;
    }

    /// Swaps since the last `begin`.
    pub fn swap_count(&self) -> usize {
        self.swaps
    }

    pub fn front(&self) -> Option<TextureId> {
        self.targets[self.front].id()
    }

    pub fn back(&self) -> Option<TextureId> {
        self.targets[self.front ^ 1].id()
    }

    pub fn depth(&self) -> Option<TextureId> {
        self.depth.id()
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn format(&self) -> Option<TextureFormat> {
        self.targets[0].descriptor().map(|d| d.format)
    }

    /// Binds the back buffer, optionally with the chain's depth texture.
    pub fn bind_back(&self, device: &mut dyn GraphicsDevice, with_depth: bool) -> bool {
        let Some(back) = self.back() else {
            return false;
        };
        let depth = if with_depth { self.depth() } else { None };
        device.set_render_targets(TargetBinding::with_depth(vec![back], depth));
        true
    }

    /// Swaps, binds the original target, copies the front image and restores
    /// solid fill mode.
    pub fn end(&mut self, device: &mut dyn GraphicsDevice, settings: &SurfaceSettings) {
        self.swap();
        device.set_render_targets(TargetBinding::Surface);
        device.set_fill_mode(FillMode::Solid);
        device.set_scissor(None);

        let Some(front) = self.front() else {
            log::debug!("End pass: no front target, nothing to resolve");
            return;
        };

        let mut features = CopyFeatures::empty();
        features.set(CopyFeatures::FORCE_OPAQUE, settings.opaque_output);
        let language = crate::renderer::program::effective_language(&*device, &settings.shader_language);
        let Some(program) = self
            .programs
            .get_program(device, &language, features.to_mask(), &shaders::COPY)
        else {
            return;
        };

        let bindings = *program.bind(device);
        if let Some(source) = bindings.source {
            device.bind_texture(source, front, SamplerState::POINT_CLAMP);
        }
        device.set_render_state(RenderState::fullscreen());
        self.quad.draw(device);
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for target in &mut self.targets {
            target.release(device);
        }
        self.depth.release(device);
        self.programs.clear(device);
        self.quad.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::headless::{Command, HeadlessDevice};

    #[test]
    fn swap_toggles_front_and_back() {
        let mut device = HeadlessDevice::new(16, 16);
        let mut chain = SurfaceChain::new();
        chain.allocate(&mut device, &SurfaceSettings::default()).unwrap();
        let (front, back) = (chain.front(), chain.back());
        chain.swap();
        assert_eq!(chain.front(), back);
        assert_eq!(chain.back(), front);
    }

    #[test]
    fn stencil_clear_is_dropped_without_stencil_plane() {
        let mut device = HeadlessDevice::new(16, 16);
        let mut chain = SurfaceChain::new();
        let settings = SurfaceSettings {
            stencil: false,
            ..SurfaceSettings::default()
        };
        assert!(chain.begin(&mut device, &settings));
        let clears = device.clears();
        assert_eq!(clears.len(), 1);
        assert_eq!(clears[0].0, ClearFlags::COLOR | ClearFlags::DEPTH);
    }

    #[test]
    fn end_copies_front_into_surface_with_solid_fill() {
        let mut device = HeadlessDevice::new(16, 16);
        let mut chain = SurfaceChain::new();
        let settings = SurfaceSettings {
            fill_mode: FillMode::Wireframe,
            ..SurfaceSettings::default()
        };
        chain.begin(&mut device, &settings);
        let rendered = chain.back();
        chain.end(&mut device, &settings);

        let copy = device.draws_with_program("copy");
        assert_eq!(copy.len(), 1);
        assert_eq!(copy[0].targets, TargetBinding::Surface);
        assert_eq!(copy[0].fill, FillMode::Solid);
        assert_eq!(chain.front(), rendered);
        assert!(device
            .commands()
            .iter()
            .any(|c| matches!(c, Command::BindTexture { texture, .. } if Some(*texture) == rendered)));
    }
}

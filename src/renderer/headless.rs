// src/renderer/headless.rs
//
// A device with no GPU behind it. Every call is recorded so tests (and the
// dry-run capture mode of the viewer) can inspect exactly what a frame did.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use glam::Vec4;

use crate::error::{RenderError, Result};
use crate::renderer::device::*;

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateProgram { program: ProgramId, label: String },
    DestroyProgram(ProgramId),
    UseProgram(ProgramId),
    SetUniform { location: UniformLocation, value: UniformValue },
    BindTexture { location: UniformLocation, texture: TextureId },
    CreateTexture { texture: TextureId, label: String, desc: TargetDescriptor },
    DestroyTexture(TextureId),
    CreateBuffer(BufferId),
    DestroyBuffer(BufferId),
    SetRenderTargets(TargetBinding),
    Clear { flags: ClearFlags, color: Vec4, depth: f32, stencil: u32 },
    SetRenderState(RenderState),
    SetFillMode(FillMode),
    SetScissor(Option<ScissorRect>),
    Draw(DrawRecord),
    ReadTarget(TextureId),
}

/// Snapshot of the state a draw was issued with.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: Option<ProgramId>,
    pub program_label: Option<String>,
    pub targets: TargetBinding,
    pub state: RenderState,
    pub fill: FillMode,
    pub scissor: Option<ScissorRect>,
    pub vertices: BufferId,
    pub indices: Option<BufferId>,
    pub count: u32,
}

struct HeadlessProgram {
    label: String,
    source: String,
    uniforms: HashMap<String, u32>,
}

pub struct HeadlessDevice {
    viewport: (u32, u32),
    language: String,
    next_id: u32,
    next_location: u32,
    programs: HashMap<ProgramId, HeadlessProgram>,
    textures: HashMap<TextureId, TargetDescriptor>,
    buffers: HashSet<BufferId>,
    commands: Vec<Command>,
    failing_labels: Vec<String>,
    readbacks: HashMap<TextureId, Vec<[f32; 4]>>,
    readback_fill: Option<[f32; 4]>,
    current_program: Option<ProgramId>,
    targets: TargetBinding,
    state: RenderState,
    fill: FillMode,
    scissor: Option<ScissorRect>,
    programs_created: usize,
    programs_destroyed: usize,
    textures_created: usize,
    textures_destroyed: usize,
}

impl HeadlessDevice {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            viewport: (width.max(1), height.max(1)),
            language: "wgsl".to_string(),
            next_id: 1,
            next_location: 0,
            programs: HashMap::new(),
            textures: HashMap::new(),
            buffers: HashSet::new(),
            commands: Vec::new(),
            failing_labels: Vec::new(),
            readbacks: HashMap::new(),
            readback_fill: None,
            current_program: None,
            targets: TargetBinding::Surface,
            state: RenderState::default(),
            fill: FillMode::Solid,
            scissor: None,
            programs_created: 0,
            programs_destroyed: 0,
            textures_created: 0,
            textures_destroyed: 0,
        }
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width.max(1), height.max(1));
    }

    /// Programs whose label starts with `prefix` fail to compile.
    pub fn fail_programs_labelled(&mut self, prefix: &str) {
        self.failing_labels.push(prefix.to_string());
    }

    pub fn clear_failures(&mut self) {
        self.failing_labels.clear();
    }

    /// Data returned by the next readbacks of `texture`.
    pub fn set_readback(&mut self, texture: TextureId, texels: Vec<[f32; 4]>) {
        self.readbacks.insert(texture, texels);
    }

    /// Value every texel of an unconfigured readback reports.
    pub fn set_readback_fill(&mut self, texel: [f32; 4]) {
        self.readback_fill = Some(texel);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.commands.iter().filter_map(|c| match c {
            Command::Draw(d) => Some(d),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.draws().count()
    }

    pub fn draws_with_program(&self, prefix: &str) -> Vec<&DrawRecord> {
        self.draws()
            .filter(|d| {
                d.program_label
                    .as_deref()
                    .is_some_and(|label| label.starts_with(prefix))
            })
            .collect()
    }

    pub fn clears(&self) -> Vec<(ClearFlags, Vec4)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Clear { flags, color, .. } => Some((*flags, *color)),
                _ => None,
            })
            .collect()
    }

    pub fn program_label(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(|p| p.label.as_str())
    }

    pub fn program_source(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(&program).map(|p| p.source.as_str())
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn programs_created(&self) -> usize {
        self.programs_created
    }

    pub fn programs_destroyed(&self) -> usize {
        self.programs_destroyed
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn textures_destroyed(&self) -> usize {
        self.textures_destroyed
    }

    pub fn reset_counters(&mut self) {
        self.programs_created = 0;
        self.programs_destroyed = 0;
        self.textures_created = 0;
        self.textures_destroyed = 0;
        self.commands.clear();
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: Command) {
        log::trace!("headless: {:?}", command);
        self.commands.push(command);
    }

    fn record_draw(&mut self, vertices: BufferId, indices: Option<BufferId>, range: Range<u32>) {
        let program_label = self
            .current_program
            .and_then(|p| self.programs.get(&p))
            .map(|p| p.label.clone());
        let record = DrawRecord {
            program: self.current_program,
            program_label,
            targets: self.targets.clone(),
            state: self.state,
            fill: self.fill,
            scissor: self.scissor,
            vertices,
            indices,
            count: range.end.saturating_sub(range.start),
        };
        self.record(Command::Draw(record));
    }
}

/// Identifier-like words of a source text; a crude stand-in for reflection.
fn identifiers(source: &str) -> HashSet<&str> {
    source
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect()
}

impl GraphicsDevice for HeadlessDevice {
    fn default_shader_language(&self) -> &str {
        &self.language
    }

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramId> {
        if self
            .failing_labels
            .iter()
            .any(|prefix| source.label.starts_with(prefix.as_str()))
        {
            return Err(RenderError::ProgramCompile {
                label: source.label.to_string(),
                message: "compilation disabled for this label".to_string(),
            });
        }

        let id = ProgramId(self.allocate_id());
        let combined = format!("{}\n{}", source.vertex, source.fragment);
        let mut uniforms = HashMap::new();
        for word in identifiers(&combined) {
            uniforms.insert(word.to_string(), self.next_location);
            self.next_location += 1;
        }
        self.programs.insert(
            id,
            HeadlessProgram {
                label: source.label.to_string(),
                source: combined,
                uniforms,
            },
        );
        self.programs_created += 1;
        self.record(Command::CreateProgram {
            program: id,
            label: source.label.to_string(),
        });
        Ok(id)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            self.programs_destroyed += 1;
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
        self.record(Command::DestroyProgram(program));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
        self.record(Command::UseProgram(program));
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .uniforms
            .get(name)
            .copied()
            .map(UniformLocation)
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<AttributeLocation> {
        self.programs
            .get(&program)?
            .uniforms
            .get(name)
            .copied()
            .map(AttributeLocation)
    }

    fn set_uniform(&mut self, location: UniformLocation, value: UniformValue) {
        self.record(Command::SetUniform { location, value });
    }

    fn bind_texture(&mut self, location: UniformLocation, texture: TextureId, _sampler: SamplerState) {
        self.record(Command::BindTexture { location, texture });
    }

    fn create_render_target(&mut self, label: &str, desc: &TargetDescriptor) -> Result<TextureId> {
        let id = TextureId(self.allocate_id());
        self.textures.insert(id, *desc);
        self.textures_created += 1;
        self.record(Command::CreateTexture {
            texture: id,
            label: label.to_string(),
            desc: *desc,
        });
        Ok(id)
    }

    fn create_texture(&mut self, label: &str, desc: &TargetDescriptor, data: &[u8]) -> Result<TextureId> {
        let expected = (desc.width * desc.height * desc.format.bytes_per_texel()) as usize;
        if data.len() != expected {
            return Err(RenderError::ResourceCreation {
                kind: "texture",
                label: label.to_string(),
                message: format!("expected {} bytes, got {}", expected, data.len()),
            });
        }
        self.create_render_target(label, desc)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.textures_destroyed += 1;
        }
        self.record(Command::DestroyTexture(texture));
    }

    fn texture_descriptor(&self, texture: TextureId) -> Option<TargetDescriptor> {
        self.textures.get(&texture).copied()
    }

    fn create_vertex_buffer(&mut self, _label: &str, _layout: VertexLayout, _data: &[u8]) -> Result<BufferId> {
        let id = BufferId(self.allocate_id());
        self.buffers.insert(id);
        self.record(Command::CreateBuffer(id));
        Ok(id)
    }

    fn create_index_buffer(&mut self, _label: &str, _indices: &[u32]) -> Result<BufferId> {
        let id = BufferId(self.allocate_id());
        self.buffers.insert(id);
        self.record(Command::CreateBuffer(id));
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
        self.record(Command::DestroyBuffer(buffer));
    }

    fn set_render_targets(&mut self, binding: TargetBinding) {
        self.targets = binding.clone();
        self.record(Command::SetRenderTargets(binding));
    }

    fn clear(&mut self, flags: ClearFlags, color: Vec4, depth: f32, stencil: u32) {
        self.record(Command::Clear {
            flags,
            color,
            depth,
            stencil,
        });
    }

    fn set_render_state(&mut self, state: RenderState) {
        self.state = state;
        self.record(Command::SetRenderState(state));
    }

    fn set_fill_mode(&mut self, mode: FillMode) {
        self.fill = mode;
        self.record(Command::SetFillMode(mode));
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.scissor = rect;
        self.record(Command::SetScissor(rect));
    }

    fn draw(&mut self, vertices: BufferId, range: Range<u32>) {
        self.record_draw(vertices, None, range);
    }

    fn draw_indexed(&mut self, vertices: BufferId, indices: BufferId, range: Range<u32>) {
        self.record_draw(vertices, Some(indices), range);
    }

    fn read_target(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>> {
        self.record(Command::ReadTarget(texture));
        let desc = self
            .textures
            .get(&texture)
            .copied()
            .ok_or(RenderError::MissingResource {
                kind: "texture",
                id: texture.0,
            })?;
        if let Some(texels) = self.readbacks.get(&texture) {
            return Ok(texels.clone());
        }
        let fill = self.readback_fill.unwrap_or([0.0; 4]);
        Ok(vec![fill; (desc.width * desc.height) as usize])
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.viewport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source<'a>(label: &'a str) -> ProgramSource<'a> {
        ProgramSource {
            label,
            language: "wgsl",
            vertex: "fn vs_main() {}",
            fragment: "var<uniform> params: Params; fn fs_main() {}",
        }
    }

    #[test]
    fn failing_labels_reject_compiles() {
        let mut device = HeadlessDevice::new(64, 64);
        device.fail_programs_labelled("lighting");
        assert!(device.create_program(&source("lighting[0:1]")).is_err());
        assert!(device.create_program(&source("gbuffer[0:1]")).is_ok());
        assert_eq!(device.programs_created(), 1);
    }

    #[test]
    fn uniform_lookup_uses_source_identifiers() {
        let mut device = HeadlessDevice::new(64, 64);
        let program = device.create_program(&source("test")).unwrap();
        assert!(device.uniform_location(program, "params").is_some());
        assert!(device.uniform_location(program, "missing").is_none());
    }

    #[test]
    fn draws_snapshot_current_state() {
        let mut device = HeadlessDevice::new(64, 64);
        let program = device.create_program(&source("quad")).unwrap();
        let vb = device.create_vertex_buffer("vb", VertexLayout::Quad, &[]).unwrap();
        device.use_program(program);
        device.set_scissor(Some(ScissorRect::full(8, 8)));
        device.draw(vb, 0..6);

        let draw = device.draws().next().unwrap();
        assert_eq!(draw.program_label.as_deref(), Some("quad"));
        assert_eq!(draw.scissor, Some(ScissorRect::full(8, 8)));
        assert_eq!(draw.count, 6);
    }
}

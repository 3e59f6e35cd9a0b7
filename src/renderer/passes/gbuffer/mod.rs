// src/renderer/passes/gbuffer/mod.rs
//
// Fills the geometry buffer: albedo+AO, view-space normal+linear depth,
// specular, emissive+glow. Opaque meshes only, batched by material.

mod batch;
mod features;

pub use batch::{batch_key, BatchBucket, BatchPool, MeshBatch};
pub use features::{material_features, GBufferFeatures, GBufferOverrideSettings, GBufferOverrides};

use std::collections::HashMap;

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::renderer::device::*;
use crate::renderer::material::{params, Material, MaterialId, MaterialLibrary};
use crate::renderer::program::{effective_language, FeatureSet, ProgramBindings, ProgramVariantCache};
use crate::renderer::shaders;
use crate::renderer::target::ManagedTarget;
use crate::scene::{VisibilityList, VisibleNode};

pub const ALBEDO: usize = 0;
pub const NORMAL_DEPTH: usize = 1;
pub const SPECULAR: usize = 2;
pub const EMISSIVE: usize = 3;

/// Stencil value of pixels covered by geometry; background keeps the clear value.
pub const GEOMETRY_STENCIL: u32 = 0;
pub const BACKGROUND_STENCIL: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GBufferPrecision {
    #[default]
    Half,
    Full,
}

impl GBufferPrecision {
    pub fn format(self) -> TextureFormat {
        match self {
            Self::Half => TextureFormat::Rgba16Float,
            Self::Full => TextureFormat::Rgba32Float,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GBufferSettings {
    #[serde(default)]
    pub custom_size: Option<(u32, u32)>,
    #[serde(default)]
    pub precision: GBufferPrecision,
    #[serde(default)]
    pub texture_filter: TextureFilter,
    #[serde(default)]
    pub overrides: GBufferOverrideSettings,
    #[serde(default)]
    pub shader_language: String,
}

/// Read-only view of the GBuffer handed to downstream passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GBufferViews {
    pub albedo: TextureId,
    pub normal_depth: TextureId,
    pub specular: TextureId,
    pub emissive: TextureId,
    pub depth_stencil: TextureId,
    pub size: (u32, u32),
    /// Whether any material wrote emissive/glow this frame.
    pub emissive_used: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GBufferStats {
    pub buckets: usize,
    pub batches: usize,
    pub materials: usize,
    pub skipped_materials: usize,
    pub transparent_skipped: usize,
    pub draw_calls: usize,
}

#[derive(Clone, Copy, Default)]
struct GBufferBindings {
    world_view_proj: Option<UniformLocation>,
    world_view: Option<UniformLocation>,
    diffuse_color: Option<UniformLocation>,
    specular_color: Option<UniformLocation>,
    emissive_color: Option<UniformLocation>,
    material_params: Option<UniformLocation>,
    diffuse_map: Option<UniformLocation>,
    normal_map: Option<UniformLocation>,
    detail_normal_map: Option<UniformLocation>,
    height_map: Option<UniformLocation>,
    displacement_map: Option<UniformLocation>,
    ambient_occlusion_map: Option<UniformLocation>,
    light_map: Option<UniformLocation>,
    emissive_map: Option<UniformLocation>,
    reflection_map: Option<UniformLocation>,
}

impl ProgramBindings for GBufferBindings {
    fn resolve(device: &dyn GraphicsDevice, program: ProgramId) -> Self {
        let loc = |name| device.uniform_location(program, name);
        Self {
            world_view_proj: loc("world_view_proj"),
            world_view: loc("world_view"),
            diffuse_color: loc("diffuse_color"),
            specular_color: loc("specular_color"),
            emissive_color: loc("emissive_color"),
            material_params: loc("material_params"),
            diffuse_map: loc("diffuse_map"),
            normal_map: loc("normal_map"),
            detail_normal_map: loc("detail_normal_map"),
            height_map: loc("height_map"),
            displacement_map: loc("displacement_map"),
            ambient_occlusion_map: loc("ambient_occlusion_map"),
            light_map: loc("light_map"),
            emissive_map: loc("emissive_map"),
            reflection_map: loc("reflection_map"),
        }
    }
}

pub struct GBufferPass {
    targets: [ManagedTarget; 4],
    depth: ManagedTarget,
    programs: ProgramVariantCache<GBufferFeatures, GBufferBindings>,
    /// Material id -> (material version, derived features).
    material_features: HashMap<MaterialId, (u32, GBufferFeatures)>,
    overrides: GBufferOverrides,
    pool: BatchPool,
    emissive_used: bool,
    stats: GBufferStats,
}

impl Default for GBufferPass {
    fn default() -> Self {
        Self::new()
    }
}

impl GBufferPass {
    pub fn new() -> Self {
        Self {
            targets: [
                ManagedTarget::new("GBufferAlbedo"),
                ManagedTarget::new("GBufferNormalDepth"),
                ManagedTarget::new("GBufferSpecular"),
                ManagedTarget::new("GBufferEmissive"),
            ],
            depth: ManagedTarget::new("GBufferDepthStencil"),
            programs: ProgramVariantCache::new(),
            material_features: HashMap::new(),
            overrides: GBufferOverrides::empty(),
            pool: BatchPool::new(),
            emissive_used: false,
            stats: GBufferStats::default(),
        }
    }

    fn allocate(&mut self, device: &mut dyn GraphicsDevice, settings: &GBufferSettings) -> Result<(u32, u32)> {
        let (width, height) = settings
            .custom_size
            .unwrap_or_else(|| device.viewport_size());
        let color = TargetDescriptor::new(width, height, settings.precision.format());
        for target in &mut self.targets {
            target.ensure(device, &color)?;
        }
        let depth = TargetDescriptor::new(width, height, TextureFormat::Depth24PlusStencil8);
        self.depth.ensure(device, &depth)?;
        Ok(color.size())
    }

    /// Views of the current targets, if allocated.
    pub fn views(&self) -> Option<GBufferViews> {
        let desc = self.targets[ALBEDO].descriptor()?;
        Some(GBufferViews {
            albedo: self.targets[ALBEDO].id()?,
            normal_depth: self.targets[NORMAL_DEPTH].id()?,
            specular: self.targets[SPECULAR].id()?,
            emissive: self.targets[EMISSIVE].id()?,
            depth_stencil: self.depth.id()?,
            size: desc.size(),
            emissive_used: self.emissive_used,
        })
    }

    pub fn stats(&self) -> GBufferStats {
        self.stats
    }

    /// Cached features of `material`, re-derived when its version changes.
    pub fn features_for(&mut self, material: &Material) -> GBufferFeatures {
        let overrides = self.overrides;
        let entry = self
            .material_features
            .entry(material.id)
            .or_insert_with(|| (material.version, material_features(material, overrides)));
        if entry.0 != material.version {
            *entry = (material.version, material_features(material, overrides));
        }
        entry.1
    }

    /// Renders every visible opaque mesh into the GBuffer.
    pub fn draw(
        &mut self,
        device: &mut dyn GraphicsDevice,
        settings: &GBufferSettings,
        visibility: &VisibilityList,
        materials: &MaterialLibrary,
    ) -> Option<GBufferViews> {
        self.stats = GBufferStats::default();
        self.emissive_used = false;

        if let Err(err) = self.allocate(device, settings) {
            log::error!("GBuffer pass skipped: {}", err);
            return None;
        }

        let overrides = settings.overrides.flags();
        if overrides != self.overrides {
            log::debug!("GBuffer overrides changed to {:?}", overrides);
            self.overrides = overrides;
            self.material_features.clear();
        }

        let color: Vec<TextureId> = self.targets.iter().filter_map(|t| t.id()).collect();
        device.set_render_targets(TargetBinding::with_depth(color, self.depth.id()));
        device.clear(
            ClearFlags::COLOR | ClearFlags::DEPTH | ClearFlags::STENCIL,
            Vec4::ZERO,
            1.0,
            BACKGROUND_STENCIL,
        );

        self.pool.clear();
        collect_meshes(&mut self.pool, visibility);
        self.stats.batches = self.pool.batch_count();
        self.stats.buckets = self.pool.bucket_count();

        let language = effective_language(&*device, &settings.shader_language);
        let sampler = SamplerState {
            filter: settings.texture_filter,
            address: AddressMode::Repeat,
        };
        self.submit(device, &language, materials, sampler);

        self.pool.clear();
        device.set_scissor(None);
        self.views()
    }

    fn submit(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        materials: &MaterialLibrary,
        sampler: SamplerState,
    ) {
        let buckets: Vec<(MaterialId, Vec<MeshBatch>)> = self
            .pool
            .sorted()
            .into_iter()
            .map(|b| (b.material, b.batches.clone()))
            .collect();

        let mut current: Option<(MaterialId, Option<GBufferBindings>)> = None;
        for (material_id, batches) in buckets {
            if current.map(|(id, _)| id) != Some(material_id) {
                let bindings = self.bind_material(device, language, materials, material_id, sampler);
                current = Some((material_id, bindings));
            }
            let Some((_, Some(bindings))) = current else {
                continue;
            };

            for batch in &batches {
                if let Some(loc) = bindings.world_view_proj {
                    device.set_uniform(loc, batch.world_view_proj.into());
                }
                if let Some(loc) = bindings.world_view {
                    device.set_uniform(loc, batch.world_view.into());
                }
                device.set_scissor(batch.scissor);
                let mesh = batch.mesh;
                device.draw_indexed(
                    mesh.vertex_buffer,
                    mesh.index_buffer,
                    mesh.first_index..mesh.first_index + mesh.index_count,
                );
                self.stats.draw_calls += 1;
            }
        }
    }

    /// Binds the program and per-material state. `None` skips the material.
    fn bind_material(
        &mut self,
        device: &mut dyn GraphicsDevice,
        language: &str,
        materials: &MaterialLibrary,
        id: MaterialId,
        sampler: SamplerState,
    ) -> Option<GBufferBindings> {
        let Some(material) = materials.get(id) else {
            log::debug!("GBuffer: material {:?} not found, skipping its meshes", id);
            self.stats.skipped_materials += 1;
            return None;
        };
        if material.is_transparent() {
            self.stats.transparent_skipped += 1;
            return None;
        }

        let features = self.features_for(material);
        let Some(program) = self
            .programs
            .get_program(device, language, features.to_mask(), &shaders::GBUFFER)
        else {
            self.stats.skipped_materials += 1;
            return None;
        };
        let bindings = *program.bind(device);
        self.stats.materials += 1;

        let cull = if features.contains(GBufferFeatures::TWO_SIDED) {
            CullMode::None
        } else {
            CullMode::Back
        };
        device.set_render_state(
            RenderState::opaque_geometry()
                .with_stencil(StencilState::write(GEOMETRY_STENCIL))
                .with_cull(cull),
        );

        let uniform = |device: &mut dyn GraphicsDevice, loc: Option<UniformLocation>, value: UniformValue| {
            if let Some(loc) = loc {
                device.set_uniform(loc, value);
            }
        };
        let color = |name, default: [f32; 4]| Vec4::from_array(material.color(name).unwrap_or(default));

        let emissive = color(params::EMISSIVE_COLOR, [0.0, 0.0, 0.0, 0.0]);
        let glow = material.float(params::GLOW).unwrap_or(0.0).max(0.0);
        let specular_power = material.float(params::SPECULAR_POWER).unwrap_or(32.0);
        let specular = color(params::SPECULAR_COLOR, [0.5, 0.5, 0.5, 1.0]);

        uniform(device, bindings.diffuse_color, color(params::DIFFUSE_COLOR, [1.0; 4]).into());
        uniform(
            device,
            bindings.specular_color,
            specular.truncate().extend(specular_power).into(),
        );
        uniform(device, bindings.emissive_color, emissive.truncate().extend(glow).into());
        uniform(
            device,
            bindings.material_params,
            Vec4::new(
                material.float(params::PARALLAX_SCALE).unwrap_or(0.04),
                material.float(params::DISPLACEMENT_SCALE).unwrap_or(0.1),
                material.float(params::DETAIL_SCALE).unwrap_or(8.0),
                5.0,
            )
            .into(),
        );

        let textures = [
            (bindings.diffuse_map, params::DIFFUSE_MAP),
            (bindings.normal_map, params::NORMAL_MAP),
            (bindings.detail_normal_map, params::DETAIL_NORMAL_MAP),
            (bindings.height_map, params::HEIGHT_MAP),
            (bindings.displacement_map, params::DISPLACEMENT_MAP),
            (bindings.ambient_occlusion_map, params::AMBIENT_OCCLUSION_MAP),
            (bindings.light_map, params::LIGHT_MAP),
            (bindings.emissive_map, params::EMISSIVE_MAP),
            (bindings.reflection_map, params::REFLECTION_MAP),
        ];
        for (location, name) in textures {
            if let (Some(location), Some(texture)) = (location, material.texture(name)) {
                device.bind_texture(location, texture, sampler);
            }
        }

        let writes_emissive = features.intersects(
            GBufferFeatures::EMISSIVE_MAP | GBufferFeatures::GLOW | GBufferFeatures::REFLECTION_MAP,
        ) || emissive.truncate().cmpgt(Vec3::ZERO).any();
        self.emissive_used |= writes_emissive;

        Some(bindings)
    }

    pub fn emissive_used(&self) -> bool {
        self.emissive_used
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for target in &mut self.targets {
            target.release(device);
        }
        self.depth.release(device);
        self.programs.clear(device);
        self.material_features.clear();
    }
}

/// Walks the visibility tree; portals and containers are transparent,
/// mesh leaves become batches.
fn collect_meshes(pool: &mut BatchPool, list: &VisibilityList) {
    for node in &list.nodes {
        match node {
            VisibleNode::Portal(cell) => collect_meshes(pool, cell),
            VisibleNode::Container(query) => collect_meshes(pool, query),
            VisibleNode::Mesh(mesh) => pool.push(mesh),
            VisibleNode::Light(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::headless::HeadlessDevice;
    use crate::renderer::material::ParamValue;
    use crate::scene::{GpuMesh, MeshId, MeshNode};
    use glam::Mat4;

    fn mesh_node(material: u32, mesh: u32) -> MeshNode {
        MeshNode {
            mesh: GpuMesh {
                id: MeshId(mesh),
                vertex_buffer: BufferId(100),
                index_buffer: BufferId(101),
                first_index: 0,
                index_count: 36,
            },
            material: MaterialId(material),
            world: Mat4::IDENTITY,
            world_view: Mat4::IDENTITY,
            world_view_proj: Mat4::IDENTITY,
            distance_sq: 1.0,
            scissor: None,
        }
    }

    fn library() -> MaterialLibrary {
        let mut lib = MaterialLibrary::new();
        lib.insert(Material::new(MaterialId(1), "a").with_texture(params::DIFFUSE_MAP, TextureId(900)));
        lib.insert(
            Material::new(MaterialId(2), "b")
                .with_texture(params::DIFFUSE_MAP, TextureId(900))
                .with_texture(params::NORMAL_MAP, TextureId(901)),
        );
        lib.insert(Material::new(MaterialId(3), "glass").with(params::OPACITY, ParamValue::Float(0.5)));
        lib
    }

    #[test]
    fn program_binds_once_per_material() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut pass = GBufferPass::new();
        let mut visible = VisibilityList::new();
        for mesh in 0..3 {
            visible.push_mesh(mesh_node(1, mesh));
        }
        visible.push_mesh(mesh_node(2, 0));

        pass.draw(&mut device, &GBufferSettings::default(), &visible, &library());

        let binds = device
            .commands()
            .iter()
            .filter(|c| matches!(c, crate::renderer::headless::Command::UseProgram(_)))
            .count();
        assert_eq!(binds, 2);
        assert_eq!(pass.stats().draw_calls, 4);
        assert_eq!(pass.stats().materials, 2);
    }

    #[test]
    fn portals_and_containers_are_traversed() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut pass = GBufferPass::new();
        let mut cell = VisibilityList::new();
        cell.push_mesh(mesh_node(1, 7));
        let mut query = VisibilityList::new();
        query.push_mesh(mesh_node(1, 8));
        let mut visible = VisibilityList::new();
        visible.push(VisibleNode::Portal(cell));
        visible.push(VisibleNode::Container(query));

        pass.draw(&mut device, &GBufferSettings::default(), &visible, &library());
        assert_eq!(device.draws_with_program("gbuffer").len(), 2);
    }

    #[test]
    fn transparent_and_failed_materials_are_skipped() {
        let mut device = HeadlessDevice::new(64, 64);
        device.fail_programs_labelled("gbuffer[v0x2");
        let mut pass = GBufferPass::new();
        let mut visible = VisibilityList::new();
        visible.push_mesh(mesh_node(1, 0));
        visible.push_mesh(mesh_node(2, 0));
        visible.push_mesh(mesh_node(3, 0));

        pass.draw(&mut device, &GBufferSettings::default(), &visible, &library());
        let stats = pass.stats();
        assert_eq!(stats.transparent_skipped, 1);
        assert_eq!(stats.skipped_materials, 1);
        assert_eq!(stats.draw_calls, 1);
    }

    #[test]
    fn geometry_writes_stencil_zero_over_cleared_one() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut pass = GBufferPass::new();
        let mut visible = VisibilityList::new();
        visible.push_mesh(mesh_node(1, 0));
        pass.draw(&mut device, &GBufferSettings::default(), &visible, &library());

        let clear = device.commands().iter().find_map(|c| match c {
            crate::renderer::headless::Command::Clear { flags, stencil, .. } => Some((*flags, *stencil)),
            _ => None,
        });
        assert_eq!(clear, Some((ClearFlags::all(), BACKGROUND_STENCIL)));
        let draw = device.draws().next().unwrap();
        assert_eq!(draw.state.stencil, Some(StencilState::write(GEOMETRY_STENCIL)));
    }

    #[test]
    fn emissive_usage_tracks_materials() {
        let mut device = HeadlessDevice::new(64, 64);
        let mut pass = GBufferPass::new();
        let mut lib = library();
        let mut visible = VisibilityList::new();
        visible.push_mesh(mesh_node(1, 0));

        let views = pass.draw(&mut device, &GBufferSettings::default(), &visible, &lib).unwrap();
        assert!(!views.emissive_used);

        lib.get_mut(MaterialId(1)).unwrap().set(params::GLOW, ParamValue::Float(1.0));
        let views = pass.draw(&mut device, &GBufferSettings::default(), &visible, &lib).unwrap();
        assert!(views.emissive_used);
    }
}

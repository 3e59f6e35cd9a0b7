// scene/visibility.rs
//
// The per-frame visible-node tree handed to the render passes by the
// visibility system. Portals lead into other cells and containers carry
// their own sub-query; only mesh and light leaves are drawable.

use glam::{Mat4, Vec3};

use crate::renderer::device::{BufferId, ScissorRect};
use crate::renderer::lights::Light;
use crate::renderer::material::MaterialId;
use crate::scene::Camera;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// GPU-resident geometry of one drawable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMesh {
    pub id: MeshId,
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub first_index: u32,
    pub index_count: u32,
}

#[derive(Debug, Clone)]
pub struct MeshNode {
    pub mesh: GpuMesh,
    pub material: MaterialId,
    pub world: Mat4,
    pub world_view: Mat4,
    pub world_view_proj: Mat4,
    pub distance_sq: f32,
    pub scissor: Option<ScissorRect>,
}

impl MeshNode {
    pub fn new(mesh: GpuMesh, material: MaterialId, world: Mat4, camera: &Camera, aspect: f32) -> Self {
        let view = camera.view();
        let center = world.transform_point3(Vec3::ZERO);
        Self {
            mesh,
            material,
            world,
            world_view: view * world,
            world_view_proj: camera.proj(aspect) * view * world,
            distance_sq: center.distance_squared(camera.position()),
            scissor: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LightNode {
    pub light: Light,
    pub distance_sq: f32,
}

impl LightNode {
    pub fn new(light: Light, camera: &Camera) -> Self {
        let distance_sq = light.position.distance_squared(camera.position());
        Self { light, distance_sq }
    }
}

#[derive(Debug, Clone)]
pub enum VisibleNode {
    /// Visible part of another cell, seen through a portal.
    Portal(VisibilityList),
    /// A node with its own visibility sub-query.
    Container(VisibilityList),
    Mesh(MeshNode),
    Light(LightNode),
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityList {
    pub nodes: Vec<VisibleNode>,
}

impl VisibilityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: VisibleNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn push_mesh(&mut self, mesh: MeshNode) -> &mut Self {
        self.push(VisibleNode::Mesh(mesh))
    }

    pub fn push_light(&mut self, light: LightNode) -> &mut Self {
        self.push(VisibleNode::Light(light))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Lights in traversal order, descending into portals and containers.
    pub fn lights(&self) -> Vec<&LightNode> {
        let mut out = Vec::new();
        collect_lights(self, &mut out);
        out
    }
}

fn collect_lights<'a>(list: &'a VisibilityList, out: &mut Vec<&'a LightNode>) {
    for node in &list.nodes {
        match node {
            VisibleNode::Portal(cell) => collect_lights(cell, out),
            VisibleNode::Container(query) => collect_lights(query, out),
            VisibleNode::Light(light) => out.push(light),
            VisibleNode::Mesh(_) => {}
        }
    }
}

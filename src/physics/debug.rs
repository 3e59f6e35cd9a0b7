// src/physics/debug.rs
//
// Debug geometry for rigid bodies. The sphere and cube meshes are owned by
// the drawer, created on first use and freed by `release`.

use glam::{Mat4, Vec3};

use super::{BodyShape, BodyStore, PhysicsWorld};
use crate::renderer::device::GraphicsDevice;
use crate::renderer::material::MaterialId;
use crate::renderer::primitives::{cube_mesh, release_mesh, sphere_mesh, upload_mesh};
use crate::scene::{Camera, GpuMesh, MeshId, MeshNode, VisibilityList};

pub const DEBUG_SPHERE_MESH: MeshId = MeshId(0xFFFF_0001);
pub const DEBUG_CUBE_MESH: MeshId = MeshId(0xFFFF_0002);

pub struct BodyDebugMeshes {
    material: MaterialId,
    sphere: Option<GpuMesh>,
    cube: Option<GpuMesh>,
}

impl BodyDebugMeshes {
    pub fn new(material: MaterialId) -> Self {
        Self {
            material,
            sphere: None,
            cube: None,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.sphere.is_some() || self.cube.is_some()
    }

    fn sphere(&mut self, device: &mut dyn GraphicsDevice) -> Option<GpuMesh> {
        if self.sphere.is_none() {
            match upload_mesh(device, "DebugSphere", DEBUG_SPHERE_MESH, &sphere_mesh(16, 12)) {
                Ok(mesh) => self.sphere = Some(mesh),
                Err(err) => log::warn!("Debug sphere upload failed: {}", err),
            }
        }
        self.sphere
    }

    fn cube(&mut self, device: &mut dyn GraphicsDevice) -> Option<GpuMesh> {
        if self.cube.is_none() {
            match upload_mesh(device, "DebugCube", DEBUG_CUBE_MESH, &cube_mesh()) {
                Ok(mesh) => self.cube = Some(mesh),
                Err(err) => log::warn!("Debug cube upload failed: {}", err),
            }
        }
        self.cube
    }

    /// Appends one mesh node per body in `bodies` to `out`. Capsules are
    /// drawn as stretched spheres.
    pub fn collect(
        &mut self,
        device: &mut dyn GraphicsDevice,
        bodies: &BodyStore,
        camera: &Camera,
        aspect: f32,
        out: &mut VisibilityList,
    ) -> usize {
        let mut emitted = 0;
        for handle in bodies.handles() {
            let (Ok(shape), Ok(position), Ok(rotation)) =
                (bodies.shape(handle), bodies.position(handle), bodies.rotation(handle))
            else {
                continue;
            };

            let (mesh, scale) = match shape {
                BodyShape::Sphere { radius } => (self.sphere(device), Vec3::splat(radius)),
                BodyShape::Capsule { radius, half_height } => {
                    (self.sphere(device), Vec3::new(radius, half_height + radius, radius))
                }
                BodyShape::Box { half_extents } => (self.cube(device), half_extents * 2.0),
            };
            let Some(mesh) = mesh else {
                continue;
            };

            let world = Mat4::from_scale_rotation_translation(scale.abs(), rotation, position);
            out.push_mesh(MeshNode::new(mesh, self.material, world, camera, aspect));
            emitted += 1;
        }
        emitted
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for mesh in [self.sphere.take(), self.cube.take()].into_iter().flatten() {
            release_mesh(device, mesh);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::create_physics_body;
    use crate::renderer::HeadlessDevice;
    use crate::scene::VisibleNode;

    #[test]
    fn meshes_are_uploaded_once_and_shared() {
        let mut device = HeadlessDevice::new(16, 16);
        let mut bodies = BodyStore::new();
        create_physics_body(&mut bodies, BodyShape::Sphere { radius: 1.0 }, 1.0, Vec3::ZERO);
        create_physics_body(
            &mut bodies,
            BodyShape::Capsule {
                radius: 0.5,
                half_height: 1.0,
            },
            1.0,
            Vec3::X,
        );

        let mut debug = BodyDebugMeshes::new(MaterialId(7));
        let camera = Camera::default();
        let mut list = VisibilityList::new();
        assert_eq!(debug.collect(&mut device, &bodies, &camera, 1.0, &mut list), 2);
        assert_eq!(debug.collect(&mut device, &bodies, &camera, 1.0, &mut list), 2);
        // Sphere only: one vertex and one index buffer
        assert_eq!(device.live_buffers(), 2);

        let meshes: Vec<MeshId> = list
            .nodes
            .iter()
            .filter_map(|node| match node {
                VisibleNode::Mesh(mesh) => Some(mesh.mesh.id),
                _ => None,
            })
            .collect();
        assert!(meshes.iter().all(|&id| id == DEBUG_SPHERE_MESH));

        debug.release(&mut device);
        assert_eq!(device.live_buffers(), 0);
        assert!(!debug.is_uploaded());
    }
}

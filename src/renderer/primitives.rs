// src/renderer/primitives.rs
//
// Procedural meshes for debug drawing and the viewer scene.

use std::f32::consts::PI;

use glam::Vec3;

use super::device::{GraphicsDevice, VertexLayout};
use super::vertex::{v, Vertex};
use crate::error::Result;
use crate::scene::{GpuMesh, MeshId};

/// CPU-side mesh data ready for upload.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Unit sphere (radius 1) as a UV grid.
pub fn sphere_mesh(segments: u32, rings: u32) -> MeshData {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut mesh = MeshData::default();

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let (ring_radius, y) = phi.sin_cos();
        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let (sin_t, cos_t) = theta.sin_cos();
            let p = [ring_radius * cos_t, y, ring_radius * sin_t];
            mesh.vertices.push(v(
                p,
                p,
                [segment as f32 / segments as f32, ring as f32 / rings as f32],
                [-sin_t, 0.0, cos_t, 1.0],
            ));
        }
    }

    let stride = segments + 1;
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            mesh.indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    mesh
}

/// Axis-aligned unit cube (edge 1) centered at the origin, one quad per face.
pub fn cube_mesh() -> MeshData {
    // (normal, tangent) per face; bitangent = normal x tangent
    const FACES: [(Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Z),
        (Vec3::NEG_X, Vec3::NEG_Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::X),
        (Vec3::NEG_Z, Vec3::NEG_X),
    ];

    let mut mesh = MeshData::default();
    for (face, (normal, tangent)) in FACES.iter().enumerate() {
        let bitangent = normal.cross(*tangent);
        let base = face as u32 * 4;
        for (du, dv) in [(-0.5, -0.5), (-0.5, 0.5), (0.5, 0.5), (0.5, -0.5)] {
            let p = *normal * 0.5 + *tangent * du + bitangent * dv;
            mesh.vertices.push(v(
                p.to_array(),
                normal.to_array(),
                [du + 0.5, 0.5 - dv],
                [tangent.x, tangent.y, tangent.z, 1.0],
            ));
        }
        mesh.indices
            .extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
    }
    mesh
}

/// Square in the XZ plane facing +Y with edge `size`; uv repeats `tiling` times.
pub fn plane_mesh(size: f32, tiling: f32) -> MeshData {
    let h = size * 0.5;
    let corners = [(-h, -h, 0.0, 0.0), (h, -h, tiling, 0.0), (h, h, tiling, tiling), (-h, h, 0.0, tiling)];
    MeshData {
        vertices: corners
            .iter()
            .map(|&(x, z, u, tv)| v([x, 0.0, z], [0.0, 1.0, 0.0], [u, tv], [1.0, 0.0, 0.0, 1.0]))
            .collect(),
        indices: vec![0, 2, 1, 0, 3, 2],
    }
}

/// Uploads `mesh` as one drawable range.
pub fn upload_mesh(device: &mut dyn GraphicsDevice, label: &str, id: MeshId, mesh: &MeshData) -> Result<GpuMesh> {
    let vertex_buffer = device.create_vertex_buffer(
        &format!("{label} Vertices"),
        VertexLayout::Mesh,
        bytemuck::cast_slice(&mesh.vertices),
    )?;
    let index_buffer = match device.create_index_buffer(&format!("{label} Indices"), &mesh.indices) {
        Ok(buffer) => buffer,
        Err(err) => {
            device.destroy_buffer(vertex_buffer);
            return Err(err);
        }
    };
    Ok(GpuMesh {
        id,
        vertex_buffer,
        index_buffer,
        first_index: 0,
        index_count: mesh.index_count(),
    })
}

/// Frees both buffers of a mesh created by [`upload_mesh`].
pub fn release_mesh(device: &mut dyn GraphicsDevice, mesh: GpuMesh) {
    device.destroy_buffer(mesh.vertex_buffer);
    device.destroy_buffer(mesh.index_buffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_counts_look_right() {
        let cube = cube_mesh();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
    }

    #[test]
    fn cube_winding_faces_outward() {
        let cube = cube_mesh();
        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(cube.vertices[tri[i] as usize].pos));
            let face_normal = (b - a).cross(c - a).normalize();
            let normal = Vec3::from(cube.vertices[tri[0] as usize].normal);
            assert!(face_normal.dot(normal) > 0.99, "{face_normal} vs {normal}");
        }
    }

    #[test]
    fn sphere_vertices_lie_on_unit_sphere() {
        let sphere = sphere_mesh(12, 8);
        assert_eq!(sphere.vertices.len(), 13 * 9);
        assert_eq!(sphere.indices.len(), 12 * 8 * 6);
        assert!(sphere
            .vertices
            .iter()
            .all(|vx| (Vec3::from(vx.pos).length() - 1.0).abs() < 1e-5));
    }

    #[test]
    fn uploaded_mesh_releases_both_buffers() {
        use crate::renderer::HeadlessDevice;

        let mut device = HeadlessDevice::new(4, 4);
        let mesh = upload_mesh(&mut device, "Cube", MeshId(1), &cube_mesh()).unwrap();
        assert_eq!(mesh.index_count, 36);
        release_mesh(&mut device, mesh);
        assert_eq!(device.live_buffers(), 0);
    }
}

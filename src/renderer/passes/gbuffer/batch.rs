// renderer/passes/gbuffer/batch.rs
use std::collections::HashMap;

use glam::Mat4;

use crate::renderer::device::ScissorRect;
use crate::renderer::material::MaterialId;
use crate::scene::{GpuMesh, MeshNode};

/// Batching key: material id in the high 32 bits, mesh id in the low 32.
///
/// Sorting by key therefore groups every mesh of a material together.
pub fn batch_key(material: MaterialId, mesh: crate::scene::MeshId) -> u64 {
    ((material.0 as u64) << 32) | mesh.0 as u64
}

/// One drawable collected from a visible mesh node.
#[derive(Debug, Clone)]
pub struct MeshBatch {
    pub material: MaterialId,
    pub mesh: GpuMesh,
    pub world_view: Mat4,
    pub world_view_proj: Mat4,
    pub scissor: Option<ScissorRect>,
}

impl MeshBatch {
    pub fn from_node(node: &MeshNode) -> Self {
        Self {
            material: node.material,
            mesh: node.mesh,
            world_view: node.world_view,
            world_view_proj: node.world_view_proj,
            scissor: node.scissor,
        }
    }
}

/// All batches sharing one key.
#[derive(Debug, Default)]
pub struct BatchBucket {
    pub key: u64,
    pub material: MaterialId,
    pub batches: Vec<MeshBatch>,
}

/// Per-frame batch storage. Buckets are recycled through a free list so a
/// steady scene stops allocating after its first frames.
#[derive(Default)]
pub struct BatchPool {
    buckets: HashMap<u64, BatchBucket>,
    free: Vec<BatchBucket>,
}

impl BatchPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: &MeshNode) {
        let key = batch_key(node.material, node.mesh.id);
        let free = &mut self.free;
        let bucket = self.buckets.entry(key).or_insert_with(|| {
            let mut bucket = free.pop().unwrap_or_default();
            bucket.key = key;
            bucket.material = node.material;
            bucket
        });
        debug_assert!(
            bucket.batches.first().map_or(true, |b| b.mesh.id == node.mesh.id
                && b.material == node.material),
            "batch key collision for {:#x}",
            key
        );
        bucket.batches.push(MeshBatch::from_node(node));
    }

    /// Buckets ordered by key, so each material's buckets are adjacent.
    pub fn sorted(&self) -> Vec<&BatchBucket> {
        let mut buckets: Vec<&BatchBucket> = self.buckets.values().collect();
        buckets.sort_unstable_by_key(|b| b.key);
        buckets
    }

    /// Returns every bucket to the free list; nothing survives the frame.
    pub fn clear(&mut self) {
        for (_, mut bucket) in self.buckets.drain() {
            bucket.batches.clear();
            self.free.push(bucket);
        }
    }

    pub fn batch_count(&self) -> usize {
        self.buckets.values().map(|b| b.batches.len()).sum()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::BufferId;
    use crate::scene::MeshId;

    fn node(material: u32, mesh: u32) -> MeshNode {
        MeshNode {
            mesh: GpuMesh {
                id: MeshId(mesh),
                vertex_buffer: BufferId(1),
                index_buffer: BufferId(2),
                first_index: 0,
                index_count: 36,
            },
            material: MaterialId(material),
            world: Mat4::IDENTITY,
            world_view: Mat4::IDENTITY,
            world_view_proj: Mat4::IDENTITY,
            distance_sq: 0.0,
            scissor: None,
        }
    }

    #[test]
    fn key_separates_material_and_mesh() {
        assert_ne!(
            batch_key(MaterialId(1), MeshId(2)),
            batch_key(MaterialId(2), MeshId(1))
        );
        assert_eq!(batch_key(MaterialId(1), MeshId(0)) >> 32, 1);
    }

    #[test]
    fn sorted_buckets_group_by_material() {
        let mut pool = BatchPool::new();
        for (m, mesh) in [(2, 1), (1, 5), (2, 0), (1, 5), (1, 3)] {
            pool.push(&node(m, mesh));
        }
        let materials: Vec<u32> = pool.sorted().iter().map(|b| b.material.0).collect();
        assert_eq!(materials, vec![1, 1, 2, 2]);
        assert_eq!(pool.batch_count(), 5);
        assert_eq!(pool.bucket_count(), 4);
    }

    #[test]
    fn clear_recycles_buckets() {
        let mut pool = BatchPool::new();
        pool.push(&node(1, 1));
        pool.push(&node(1, 2));
        pool.clear();
        assert_eq!(pool.batch_count(), 0);
        assert_eq!(pool.free_count(), 2);

        pool.push(&node(3, 3));
        assert_eq!(pool.free_count(), 1);
    }
}

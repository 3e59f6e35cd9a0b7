// scene/mod.rs

pub mod bounds;
pub mod camera;
pub mod visibility;

pub use bounds::Aabb;
pub use camera::{Camera, CameraDepthOfField};
pub use visibility::{GpuMesh, LightNode, MeshId, MeshNode, VisibilityList, VisibleNode};

pub mod device;
pub mod headless;
pub mod lights;
pub mod material;
pub mod passes;
pub mod pipeline;
pub mod postprocess;
pub mod primitives;
pub mod program;
pub mod quad;
pub mod shaders;
pub mod shadow;
pub mod target;
pub mod vertex;
pub mod wgpu_backend;

pub use device::GraphicsDevice;
pub use headless::{Command, DrawRecord, HeadlessDevice};
pub use lights::{Light, LightKind};
pub use material::{Material, MaterialId, MaterialLibrary};
pub use pipeline::{DeferredPipeline, FrameInput, FrameStats};
pub use primitives::{cube_mesh, plane_mesh, sphere_mesh, upload_mesh, MeshData};
pub use program::{ProgramVariantCache, ShaderFeatureMask};
pub use shadow::{ShadowMap, ShadowMapProvider};
pub use vertex::{QuadVertex, Vertex};
pub use wgpu_backend::WgpuDevice;

pub mod ambient;
pub mod gbuffer;
pub mod lighting;
pub mod ssao;
pub mod surfaces;

pub use ambient::{AmbientPass, AmbientSettings};
pub use gbuffer::{GBufferPass, GBufferSettings, GBufferStats, GBufferViews};
pub use lighting::{light_scissor, LightRecord, LightingPass, LightingSettings, LightingStats};
pub use ssao::{AmbientOcclusionPass, AoTechnique, AoTechniqueKind, SsaoSettings};
pub use surfaces::{ClearSettings, SurfaceChain, SurfaceSettings};

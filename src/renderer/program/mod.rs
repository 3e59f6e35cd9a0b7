mod cache;
mod features;
mod preprocess;

pub use cache::{GeneratedProgram, ProgramBindings, ProgramTemplate, ProgramVariantCache};
pub use features::{language_define, FeatureSet, NoFeatures, ShaderFeatureMask};
pub use preprocess::preprocess;

use crate::renderer::device::GraphicsDevice;

/// Resolves the language a pass compiles for: its override, or the device
/// default when the override is empty.
pub fn effective_language(device: &dyn GraphicsDevice, override_language: &str) -> String {
    if override_language.trim().is_empty() {
        device.default_shader_language().to_string()
    } else {
        override_language.trim().to_string()
    }
}

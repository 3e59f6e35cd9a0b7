// src/renderer/target.rs
use crate::error::Result;
use crate::renderer::device::{GraphicsDevice, TargetDescriptor, TextureId};

/// A render target owned by exactly one pass.
///
/// The texture is created on first use and destroyed/recreated only when
/// the requested descriptor differs from the one it was built with.
#[derive(Debug)]
pub struct ManagedTarget {
    label: &'static str,
    current: Option<(TextureId, TargetDescriptor)>,
}

impl ManagedTarget {
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            current: None,
        }
    }

    /// Returns the texture matching `desc`, (re)creating it if needed.
    pub fn ensure(&mut self, device: &mut dyn GraphicsDevice, desc: &TargetDescriptor) -> Result<TextureId> {
        if let Some((id, existing)) = self.current {
            if existing == *desc {
                return Ok(id);
            }
            log::info!(
                "Recreating {} ({}x{} {:?} x{} -> {}x{} {:?} x{})",
                self.label,
                existing.width,
                existing.height,
                existing.format,
                existing.samples,
                desc.width,
                desc.height,
                desc.format,
                desc.samples
            );
            device.destroy_texture(id);
            self.current = None;
        } else {
            log::info!(
                "Creating {} ({}x{} {:?})",
                self.label,
                desc.width,
                desc.height,
                desc.format
            );
        }

        let id = device.create_render_target(self.label, desc)?;
        self.current = Some((id, *desc));
        Ok(id)
    }

    pub fn id(&self) -> Option<TextureId> {
        self.current.map(|(id, _)| id)
    }

    pub fn descriptor(&self) -> Option<TargetDescriptor> {
        self.current.map(|(_, desc)| desc)
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some((id, _)) = self.current.take() {
            device.destroy_texture(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::TextureFormat;
    use crate::renderer::HeadlessDevice;

    #[test]
    fn unchanged_descriptor_reuses_texture() {
        let mut device = HeadlessDevice::new(32, 32);
        let mut target = ManagedTarget::new("test");
        let desc = TargetDescriptor::new(32, 32, TextureFormat::Rgba16Float);

        let a = target.ensure(&mut device, &desc).unwrap();
        let b = target.ensure(&mut device, &desc).unwrap();
        assert_eq!(a, b);
        assert_eq!(device.textures_created(), 1);
        assert_eq!(device.textures_destroyed(), 0);
    }

    #[test]
    fn changed_descriptor_recreates_once() {
        let mut device = HeadlessDevice::new(32, 32);
        let mut target = ManagedTarget::new("test");
        target
            .ensure(&mut device, &TargetDescriptor::new(32, 32, TextureFormat::Rgba16Float))
            .unwrap();
        target
            .ensure(&mut device, &TargetDescriptor::new(64, 32, TextureFormat::Rgba16Float))
            .unwrap();
        assert_eq!(device.textures_created(), 2);
        assert_eq!(device.textures_destroyed(), 1);
        assert_eq!(device.live_textures(), 1);
    }
}

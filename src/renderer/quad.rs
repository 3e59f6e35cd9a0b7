use crate::renderer::device::{BufferId, GraphicsDevice, VertexLayout};
use crate::renderer::vertex::FULLSCREEN_QUAD;

/// Lazily created full-screen quad vertex buffer, owned by one pass.
#[derive(Debug, Default)]
pub struct FullscreenQuad {
    buffer: Option<BufferId>,
}

impl FullscreenQuad {
    pub const VERTEX_COUNT: u32 = FULLSCREEN_QUAD.len() as u32;

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the buffer, creating it on first use. `None` means the
    /// device refused the allocation; callers skip their draw.
    pub fn ensure(&mut self, device: &mut dyn GraphicsDevice) -> Option<BufferId> {
        if self.buffer.is_none() {
            match device.create_vertex_buffer(
                "FullscreenQuad",
                VertexLayout::Quad,
                bytemuck::cast_slice(&FULLSCREEN_QUAD),
            ) {
                Ok(buffer) => self.buffer = Some(buffer),
                Err(err) => log::error!("Failed to create full-screen quad: {}", err),
            }
        }
        self.buffer
    }

    pub fn draw(&mut self, device: &mut dyn GraphicsDevice) -> bool {
        match self.ensure(device) {
            Some(buffer) => {
                device.draw(buffer, 0..Self::VERTEX_COUNT);
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer);
        }
    }
}

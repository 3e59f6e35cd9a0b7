//! The physics collaborator as seen by the character controller, plus a
//! small in-crate body store that implements it for tests and the viewer.

pub mod body;
pub mod character;
pub mod debug;
pub mod store;

pub use body::{create_physics_body, BodyDesc, BodyShape};
pub use character::{CharacterController, CharacterSettings};
pub use debug::BodyDebugMeshes;
pub use store::BodyStore;

use glam::{Quat, Vec3};
use slotmap::new_key_type;

use crate::error::PhysicsError;
use crate::scene::Aabb;

new_key_type! {
    /// Generation-checked reference to a rigid body; a handle to a destroyed
    /// body resolves to [`PhysicsError::BodyNotFound`].
    pub struct BodyHandle;
}

pub type PhysicsResult<T> = std::result::Result<T, PhysicsError>;

/// Rigid-body world consumed at its interface only.
pub trait PhysicsWorld {
    fn create_body(&mut self, desc: &BodyDesc) -> BodyHandle;
    fn destroy_body(&mut self, body: BodyHandle) -> PhysicsResult<()>;

    fn position(&self, body: BodyHandle) -> PhysicsResult<Vec3>;
    fn set_position(&mut self, body: BodyHandle, position: Vec3) -> PhysicsResult<()>;
    fn rotation(&self, body: BodyHandle) -> PhysicsResult<Quat>;
    fn set_rotation(&mut self, body: BodyHandle, rotation: Quat) -> PhysicsResult<()>;
    fn linear_velocity(&self, body: BodyHandle) -> PhysicsResult<Vec3>;
    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> PhysicsResult<()>;
    fn mass(&self, body: BodyHandle) -> PhysicsResult<f32>;
    /// Accumulated until the next simulation step.
    fn add_force(&mut self, body: BodyHandle, force: Vec3) -> PhysicsResult<()>;
    /// World-space bounds.
    fn bounding_box(&self, body: BodyHandle) -> PhysicsResult<Aabb>;

    /// Sensor query: every body whose bounds overlap `volume`.
    fn sense_box(&self, volume: &Aabb) -> Vec<BodyHandle>;
}

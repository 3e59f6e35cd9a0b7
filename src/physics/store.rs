// src/physics/store.rs
//
// Minimal rigid-body store: force accumulation, explicit Euler integration
// and an optional ground plane. Enough to drive a character around; there
// is no collision response between bodies.

use glam::{Quat, Vec3};
use slotmap::SlotMap;

use super::{BodyDesc, BodyHandle, BodyShape, PhysicsResult, PhysicsWorld};
use crate::error::PhysicsError;
use crate::scene::Aabb;

pub const DEFAULT_GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

#[derive(Debug, Clone)]
struct RigidBody {
    shape: BodyShape,
    mass: f32,
    position: Vec3,
    rotation: Quat,
    velocity: Vec3,
    force: Vec3,
}

impl RigidBody {
    fn is_static(&self) -> bool {
        self.mass <= 0.0
    }

    fn bounds(&self) -> Aabb {
        self.shape.world_bounds(self.position, self.rotation)
    }
}

pub struct BodyStore {
    bodies: SlotMap<BodyHandle, RigidBody>,
    gravity: Vec3,
    ground_height: Option<f32>,
}

impl Default for BodyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyStore {
    pub fn new() -> Self {
        Self {
            bodies: SlotMap::with_key(),
            gravity: DEFAULT_GRAVITY,
            ground_height: None,
        }
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    /// Bodies never sink below this height.
    pub fn with_ground(mut self, height: f32) -> Self {
        self.ground_height = Some(height);
        self
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = BodyHandle> + '_ {
        self.bodies.keys()
    }

    pub fn shape(&self, body: BodyHandle) -> PhysicsResult<BodyShape> {
        Ok(self.get(body)?.shape)
    }

    fn get(&self, body: BodyHandle) -> PhysicsResult<&RigidBody> {
        self.bodies.get(body).ok_or(PhysicsError::BodyNotFound)
    }

    fn get_mut(&mut self, body: BodyHandle) -> PhysicsResult<&mut RigidBody> {
        self.bodies.get_mut(body).ok_or(PhysicsError::BodyNotFound)
    }

    /// Integrates every dynamic body over `dt` and clears accumulated forces.
    pub fn step(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        for body in self.bodies.values_mut() {
            if body.is_static() {
                body.force = Vec3::ZERO;
                continue;
            }
            let acceleration = body.force / body.mass + self.gravity;
            body.velocity += acceleration * dt;
            body.position += body.velocity * dt;
            body.force = Vec3::ZERO;

            if let Some(ground) = self.ground_height {
                let bottom = body.bounds().min.y;
                if bottom < ground {
                    body.position.y += ground - bottom;
                    body.velocity.y = body.velocity.y.max(0.0);
                }
            }
        }
    }
}

impl PhysicsWorld for BodyStore {
    fn create_body(&mut self, desc: &BodyDesc) -> BodyHandle {
        self.bodies.insert(RigidBody {
            shape: desc.shape,
            mass: desc.mass.max(0.0),
            position: desc.position,
            rotation: desc.rotation,
            velocity: Vec3::ZERO,
            force: Vec3::ZERO,
        })
    }

    fn destroy_body(&mut self, body: BodyHandle) -> PhysicsResult<()> {
        self.bodies
            .remove(body)
            .map(|_| ())
            .ok_or(PhysicsError::BodyNotFound)
    }

    fn position(&self, body: BodyHandle) -> PhysicsResult<Vec3> {
        Ok(self.get(body)?.position)
    }

    fn set_position(&mut self, body: BodyHandle, position: Vec3) -> PhysicsResult<()> {
        self.get_mut(body)?.position = position;
        Ok(())
    }

    fn rotation(&self, body: BodyHandle) -> PhysicsResult<Quat> {
        Ok(self.get(body)?.rotation)
    }

    fn set_rotation(&mut self, body: BodyHandle, rotation: Quat) -> PhysicsResult<()> {
        self.get_mut(body)?.rotation = rotation.normalize();
        Ok(())
    }

    fn linear_velocity(&self, body: BodyHandle) -> PhysicsResult<Vec3> {
        Ok(self.get(body)?.velocity)
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> PhysicsResult<()> {
        self.get_mut(body)?.velocity = velocity;
        Ok(())
    }

    fn mass(&self, body: BodyHandle) -> PhysicsResult<f32> {
        Ok(self.get(body)?.mass)
    }

    fn add_force(&mut self, body: BodyHandle, force: Vec3) -> PhysicsResult<()> {
        let body = self.get_mut(body)?;
        if body.is_static() {
            return Err(PhysicsError::MasslessBody);
        }
        body.force += force;
        Ok(())
    }

    fn bounding_box(&self, body: BodyHandle) -> PhysicsResult<Aabb> {
        Ok(self.get(body)?.bounds())
    }

    fn sense_box(&self, volume: &Aabb) -> Vec<BodyHandle> {
        self.bodies
            .iter()
            .filter(|(_, body)| body.bounds().intersects(volume))
            .map(|(handle, _)| handle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::create_physics_body;

    #[test]
    fn destroyed_handles_are_detected() {
        let mut store = BodyStore::new();
        let body = create_physics_body(&mut store, BodyShape::Sphere { radius: 1.0 }, 1.0, Vec3::ZERO);
        store.destroy_body(body).unwrap();
        assert_eq!(store.position(body), Err(PhysicsError::BodyNotFound));

        // A new body may reuse the slot but not the generation
        let other = create_physics_body(&mut store, BodyShape::Sphere { radius: 1.0 }, 1.0, Vec3::ZERO);
        assert_ne!(body, other);
        assert!(store.position(body).is_err());
    }

    #[test]
    fn forces_accelerate_dynamic_bodies() {
        let mut store = BodyStore::new().with_gravity(Vec3::ZERO);
        let body = create_physics_body(&mut store, BodyShape::Sphere { radius: 0.5 }, 2.0, Vec3::ZERO);
        store.add_force(body, Vec3::new(4.0, 0.0, 0.0)).unwrap();
        store.step(0.5);
        // a = 2, v = 1, x = 0.5
        assert_eq!(store.linear_velocity(body).unwrap(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(store.position(body).unwrap(), Vec3::new(0.5, 0.0, 0.0));

        // Forces do not carry over into the next step
        store.step(0.5);
        assert_eq!(store.linear_velocity(body).unwrap(), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn ground_stops_falling_bodies() {
        let mut store = BodyStore::new().with_ground(0.0);
        let body = create_physics_body(
            &mut store,
            BodyShape::Box {
                half_extents: Vec3::splat(0.5),
            },
            1.0,
            Vec3::new(0.0, 0.6, 0.0),
        );
        for _ in 0..60 {
            store.step(1.0 / 60.0);
        }
        let bounds = store.bounding_box(body).unwrap();
        assert!(bounds.min.y.abs() < 1e-4);
        assert!(store.linear_velocity(body).unwrap().y >= 0.0);
    }

    #[test]
    fn static_bodies_reject_forces() {
        let mut store = BodyStore::new();
        let ground = create_physics_body(
            &mut store,
            BodyShape::Box {
                half_extents: Vec3::new(10.0, 0.5, 10.0),
            },
            0.0,
            Vec3::ZERO,
        );
        assert_eq!(store.add_force(ground, Vec3::Y), Err(PhysicsError::MasslessBody));
        store.step(1.0);
        assert_eq!(store.position(ground).unwrap(), Vec3::ZERO);
    }

    #[test]
    fn sensor_reports_overlapping_bodies() {
        let mut store = BodyStore::new();
        let near = create_physics_body(&mut store, BodyShape::Sphere { radius: 1.0 }, 1.0, Vec3::ZERO);
        let _far = create_physics_body(&mut store, BodyShape::Sphere { radius: 1.0 }, 1.0, Vec3::splat(10.0));
        let hits = store.sense_box(&Aabb::from_center_half_extents(Vec3::new(1.5, 0.0, 0.0), Vec3::splat(0.6)));
        assert_eq!(hits, vec![near]);
    }
}

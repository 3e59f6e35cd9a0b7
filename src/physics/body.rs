use glam::{Quat, Vec3};

use super::{BodyHandle, PhysicsWorld};
use crate::scene::Aabb;

/// Closed set of body shapes with their shape-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodyShape {
    Box { half_extents: Vec3 },
    Sphere { radius: f32 },
    /// Upright capsule; `half_height` excludes the caps.
    Capsule { radius: f32, half_height: f32 },
}

impl BodyShape {
    /// Bounds in body space, ignoring rotation.
    pub fn local_bounds(&self) -> Aabb {
        let half = match *self {
            Self::Box { half_extents } => half_extents.abs(),
            Self::Sphere { radius } => Vec3::splat(radius.abs()),
            Self::Capsule { radius, half_height } => {
                let r = radius.abs();
                Vec3::new(r, half_height.abs() + r, r)
            }
        };
        Aabb::from_center_half_extents(Vec3::ZERO, half)
    }

    /// Bounds in world space for a body at `position` with `rotation`.
    pub fn world_bounds(&self, position: Vec3, rotation: Quat) -> Aabb {
        match self {
            // Rotation-invariant
            Self::Sphere { .. } => self.local_bounds().translated(position),
            _ => self
                .local_bounds()
                .transformed(&glam::Mat4::from_rotation_translation(rotation, position)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub shape: BodyShape,
    /// Zero makes the body static.
    pub mass: f32,
    pub position: Vec3,
    pub rotation: Quat,
    /// Keeps the body upright regardless of applied forces.
    pub fixed_rotation: bool,
}

/// Creates a body of `shape` in `world`.
///
/// Capsules are the character shape and are created with a fixed rotation;
/// negative masses are treated as static bodies.
pub fn create_physics_body(world: &mut dyn PhysicsWorld, shape: BodyShape, mass: f32, position: Vec3) -> BodyHandle {
    let desc = BodyDesc {
        shape,
        mass: mass.max(0.0),
        position,
        rotation: Quat::IDENTITY,
        fixed_rotation: matches!(shape, BodyShape::Capsule { .. }),
    };
    let handle = world.create_body(&desc);
    log::debug!("Created {:?} body {:?} (mass {})", shape, handle, desc.mass);
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capsule_bounds_include_caps() {
        let bounds = BodyShape::Capsule {
            radius: 0.5,
            half_height: 1.0,
        }
        .local_bounds();
        assert_eq!(bounds.max, Vec3::new(0.5, 1.5, 0.5));
        assert_eq!(bounds.min, -bounds.max);
    }

    #[test]
    fn sphere_bounds_ignore_rotation() {
        let shape = BodyShape::Sphere { radius: 2.0 };
        let rotated = shape.world_bounds(Vec3::X, Quat::from_rotation_z(0.7));
        assert_eq!(rotated, Aabb::new(Vec3::new(-1.0, -2.0, -2.0), Vec3::new(3.0, 2.0, 2.0)));
    }
}

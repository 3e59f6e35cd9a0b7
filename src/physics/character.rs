// src/physics/character.rs
//
// Turns movement intent into forces on one rigid body and gates jumps on a
// ground sensor below the body.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use super::{BodyHandle, PhysicsResult, PhysicsWorld};
use crate::scene::Aabb;

const RUN_FACTOR: f32 = 3.0;
const CREEP_FACTOR: f32 = 1.0 / 3.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterSettings {
    /// Walking speed in units per second.
    pub speed: f32,
    pub max_acceleration: f32,
    pub jump_velocity: f32,
    /// Seconds before another jump is accepted.
    pub jump_cooldown: f32,
    /// How far below the body the ground sensor reaches.
    pub sensor_depth: f32,
    /// Shrinks the sensor horizontally so walls touching the side do not count.
    pub sensor_inset: f32,
    pub normalize_movement: bool,
    /// Movement steers the vertical axis too (swimming, flying).
    pub vertical_movement: bool,
}

impl Default for CharacterSettings {
    fn default() -> Self {
        Self {
            speed: 4.0,
            max_acceleration: 20.0,
            jump_velocity: 5.0,
            jump_cooldown: 0.3,
            sensor_depth: 0.1,
            sensor_inset: 0.05,
            normalize_movement: true,
            vertical_movement: false,
        }
    }
}

pub struct CharacterController {
    body: BodyHandle,
    settings: CharacterSettings,
    movement: Vec3,
    run: bool,
    creep: bool,
    jump_ready_timer: f32,
}

impl CharacterController {
    pub fn new(body: BodyHandle, settings: CharacterSettings) -> Self {
        Self {
            body,
            settings,
            movement: Vec3::ZERO,
            run: false,
            creep: false,
            jump_ready_timer: 0.0,
        }
    }

    pub fn body(&self) -> BodyHandle {
        self.body
    }

    pub fn settings(&self) -> &CharacterSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut CharacterSettings {
        &mut self.settings
    }

    pub fn set_movement(&mut self, movement: Vec3) {
        self.movement = movement;
    }

    pub fn movement(&self) -> Vec3 {
        self.movement
    }

    pub fn set_run(&mut self, run: bool) {
        self.run = run;
    }

    pub fn set_creep(&mut self, creep: bool) {
        self.creep = creep;
    }

    pub fn jump_ready_timer(&self) -> f32 {
        self.jump_ready_timer
    }

    pub fn set_jump_ready_timer(&mut self, seconds: f32) {
        self.jump_ready_timer = seconds.max(0.0);
    }

    /// Velocity the character steers toward this frame.
    pub fn target_velocity(&self) -> Vec3 {
        let mut direction = self.movement;
        if !self.settings.vertical_movement {
            direction.y = 0.0;
        }
        if self.settings.normalize_movement {
            direction = direction.normalize_or_zero();
        }

        let mut speed = self.settings.speed;
        if self.run {
            speed *= RUN_FACTOR;
        }
        if self.creep {
            speed *= CREEP_FACTOR;
        }
        direction * speed
    }

    /// Volume just below the body's feet used to detect ground.
    pub fn ground_sensor(&self, bounds: &Aabb) -> Aabb {
        let inset = self
            .settings
            .sensor_inset
            .min(bounds.half_extents().x)
            .min(bounds.half_extents().z)
            .max(0.0);
        let depth = self.settings.sensor_depth.max(f32::EPSILON);
        Aabb::new(
            Vec3::new(bounds.min.x + inset, bounds.min.y - depth, bounds.min.z + inset),
            Vec3::new(bounds.max.x - inset, bounds.min.y, bounds.max.z - inset),
        )
    }

    /// Starts a jump if the cooldown has elapsed and something other than
    /// the character itself is underneath.
    pub fn jump(&mut self, world: &mut dyn PhysicsWorld) -> bool {
        if self.jump_ready_timer > 0.0 {
            return false;
        }
        match self.try_jump(world) {
            Ok(jumped) => jumped,
            Err(err) => {
                log::warn!("Character jump failed: {}", err);
                false
            }
        }
    }

    fn try_jump(&mut self, world: &mut dyn PhysicsWorld) -> PhysicsResult<bool> {
        let bounds = world.bounding_box(self.body)?;
        let sensor = self.ground_sensor(&bounds);
        let grounded = world.sense_box(&sensor).into_iter().any(|hit| hit != self.body);
        if !grounded {
            return Ok(false);
        }

        let velocity = world.linear_velocity(self.body)?;
        world.set_linear_velocity(self.body, velocity + Vec3::Y * self.settings.jump_velocity)?;
        self.jump_ready_timer = self.settings.jump_cooldown.max(0.0);
        log::trace!("Character {:?} jumped", self.body);
        Ok(true)
    }

    /// Applies the steering force for this frame and counts down the jump
    /// cooldown.
    pub fn update(&mut self, world: &mut dyn PhysicsWorld, dt: f32) -> PhysicsResult<()> {
        self.jump_ready_timer = (self.jump_ready_timer - dt.max(0.0)).max(0.0);
        if dt <= 0.0 {
            return Ok(());
        }

        let target = self.target_velocity();
        let mut current = world.linear_velocity(self.body)?;
        if !self.settings.vertical_movement {
            // Gravity owns the vertical axis
            current.y = 0.0;
        }

        let acceleration = ((target - current) / dt).clamp_length_max(self.settings.max_acceleration.max(0.0));
        if acceleration == Vec3::ZERO {
            return Ok(());
        }
        let mass = world.mass(self.body)?;
        world.add_force(self.body, acceleration * mass)
    }

    /// World transform of the body, for the scene node that follows it.
    pub fn transform(&self, world: &dyn PhysicsWorld) -> PhysicsResult<Mat4> {
        let position = world.position(self.body)?;
        let rotation = world.rotation(self.body)?;
        Ok(Mat4::from_rotation_translation(rotation, position))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use glam::Quat;

    use super::*;
    use crate::error::PhysicsError;
    use crate::physics::{create_physics_body, BodyDesc, BodyShape, BodyStore};

    /// Body store that counts sensor queries.
    struct CountingWorld {
        store: BodyStore,
        sensor_queries: Cell<usize>,
    }

    impl CountingWorld {
        fn new() -> Self {
            Self {
                store: BodyStore::new(),
                sensor_queries: Cell::new(0),
            }
        }
    }

    impl PhysicsWorld for CountingWorld {
        fn create_body(&mut self, desc: &BodyDesc) -> BodyHandle {
            self.store.create_body(desc)
        }
        fn destroy_body(&mut self, body: BodyHandle) -> PhysicsResult<()> {
            self.store.destroy_body(body)
        }
        fn position(&self, body: BodyHandle) -> PhysicsResult<Vec3> {
            self.store.position(body)
        }
        fn set_position(&mut self, body: BodyHandle, position: Vec3) -> PhysicsResult<()> {
            self.store.set_position(body, position)
        }
        fn rotation(&self, body: BodyHandle) -> PhysicsResult<Quat> {
            self.store.rotation(body)
        }
        fn set_rotation(&mut self, body: BodyHandle, rotation: Quat) -> PhysicsResult<()> {
            self.store.set_rotation(body, rotation)
        }
        fn linear_velocity(&self, body: BodyHandle) -> PhysicsResult<Vec3> {
            self.store.linear_velocity(body)
        }
        fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> PhysicsResult<()> {
            self.store.set_linear_velocity(body, velocity)
        }
        fn mass(&self, body: BodyHandle) -> PhysicsResult<f32> {
            self.store.mass(body)
        }
        fn add_force(&mut self, body: BodyHandle, force: Vec3) -> PhysicsResult<()> {
            self.store.add_force(body, force)
        }
        fn bounding_box(&self, body: BodyHandle) -> PhysicsResult<Aabb> {
            self.store.bounding_box(body)
        }
        fn sense_box(&self, volume: &Aabb) -> Vec<BodyHandle> {
            self.sensor_queries.set(self.sensor_queries.get() + 1);
            self.store.sense_box(volume)
        }
    }

    fn capsule(world: &mut dyn PhysicsWorld, position: Vec3) -> BodyHandle {
        create_physics_body(
            world,
            BodyShape::Capsule {
                radius: 0.4,
                half_height: 0.5,
            },
            70.0,
            position,
        )
    }

    fn ground(world: &mut dyn PhysicsWorld) -> BodyHandle {
        create_physics_body(
            world,
            BodyShape::Box {
                half_extents: Vec3::new(10.0, 0.5, 10.0),
            },
            0.0,
            Vec3::new(0.0, -0.5, 0.0),
        )
    }

    #[test]
    fn cooldown_rejects_jump_without_sensing() {
        let mut world = CountingWorld::new();
        ground(&mut world);
        // Feet exactly on the ground
        let body = capsule(&mut world, Vec3::new(0.0, 0.9, 0.0));
        let mut character = CharacterController::new(body, CharacterSettings::default());
        character.set_jump_ready_timer(0.3);

        assert!(!character.jump(&mut world));
        assert_eq!(world.sensor_queries.get(), 0);
        assert_eq!(world.linear_velocity(body).unwrap(), Vec3::ZERO);
    }

    #[test]
    fn grounded_jump_adds_velocity_and_rearms() {
        let mut world = CountingWorld::new();
        ground(&mut world);
        let body = capsule(&mut world, Vec3::new(0.0, 0.9, 0.0));
        let mut character = CharacterController::new(body, CharacterSettings::default());

        assert!(character.jump(&mut world));
        assert_eq!(world.sensor_queries.get(), 1);
        assert_eq!(world.linear_velocity(body).unwrap(), Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(character.jump_ready_timer(), 0.3);

        // Second attempt inside the cooldown
        assert!(!character.jump(&mut world));
        assert_eq!(world.sensor_queries.get(), 1);
    }

    #[test]
    fn own_body_does_not_count_as_ground() {
        let mut world = CountingWorld::new();
        let body = capsule(&mut world, Vec3::new(0.0, 5.0, 0.0));
        let mut settings = CharacterSettings::default();
        // The sensor touches the character's own feet
        settings.sensor_depth = 0.5;
        settings.sensor_inset = 0.0;
        let mut character = CharacterController::new(body, settings);

        assert!(!character.jump(&mut world));
        assert_eq!(world.sensor_queries.get(), 1);
        assert_eq!(world.linear_velocity(body).unwrap(), Vec3::ZERO);
    }

    #[test]
    fn run_and_creep_scale_target_velocity() {
        let mut world = BodyStore::new();
        let body = capsule(&mut world, Vec3::ZERO);
        let mut character = CharacterController::new(body, CharacterSettings::default());
        character.set_movement(Vec3::new(2.0, 1.0, 0.0));

        assert_eq!(character.target_velocity(), Vec3::new(4.0, 0.0, 0.0));
        character.set_run(true);
        assert_eq!(character.target_velocity(), Vec3::new(12.0, 0.0, 0.0));
        character.set_run(false);
        character.set_creep(true);
        assert!((character.target_velocity().x - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn update_clamps_acceleration_and_scales_by_mass() {
        let mut world = BodyStore::new().with_gravity(Vec3::ZERO);
        let body = capsule(&mut world, Vec3::ZERO);
        let mut character = CharacterController::new(body, CharacterSettings::default());
        character.set_movement(Vec3::X);
        character.set_jump_ready_timer(0.05);

        character.update(&mut world, 0.1).unwrap();
        assert_eq!(character.jump_ready_timer(), 0.0);

        // Wanted 40 m/s^2, clamped to 20; 70 kg body
        world.step(0.1);
        let velocity = world.linear_velocity(body).unwrap();
        assert!((velocity.x - 2.0).abs() < 1e-4);
    }

    #[test]
    fn destroyed_body_is_reported() {
        let mut world = BodyStore::new();
        let body = capsule(&mut world, Vec3::ZERO);
        let mut character = CharacterController::new(body, CharacterSettings::default());
        character.set_movement(Vec3::X);
        world.destroy_body(body).unwrap();

        assert_eq!(character.update(&mut world, 0.1), Err(PhysicsError::BodyNotFound));
        assert!(!character.jump(&mut world));
        assert!(character.transform(&world).is_err());
    }
}

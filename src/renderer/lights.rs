use glam::{Mat4, Quat, Vec3};

use crate::renderer::device::TextureId;
use crate::scene::Aabb;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightKind {
    Directional,
    Point,
    Spot,
}

/// What the lighting pass actually shades a light as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightClass {
    Directional,
    Point,
    ProjectivePoint,
    Spot,
    ProjectiveSpot,
    SmoothSpot,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpotCone {
    pub inner_angle: f32,
    pub outer_angle: f32,
    /// Smoothstep falloff between the cones instead of a linear ramp.
    pub smooth: bool,
}

impl Default for SpotCone {
    fn default() -> Self {
        Self {
            inner_angle: 20f32.to_radians(),
            outer_angle: 30f32.to_radians(),
            smooth: false,
        }
    }
}

impl SpotCone {
    /// `(cos inner, cos outer)`, with the angles swapped if given inverted.
    pub fn cosines(&self) -> (f32, f32) {
        let mut inner = self.inner_angle;
        let mut outer = self.outer_angle;
        if inner > outer {
            std::mem::swap(&mut inner, &mut outer);
        }
        (inner.cos(), outer.cos())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub position: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub cone: SpotCone,
    /// Texture projected by the light (lat-long for point lights).
    pub projector: Option<TextureId>,
    pub casts_shadows: bool,
    pub soft_shadows: bool,
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            intensity: 1.0,
            position: Vec3::ZERO,
            direction: direction.normalize_or_zero(),
            range: 0.0,
            cone: SpotCone::default(),
            projector: None,
            casts_shadows: false,
            soft_shadows: false,
        }
    }

    pub fn point(position: Vec3, color: Vec3, range: f32) -> Self {
        Self {
            kind: LightKind::Point,
            position,
            range,
            ..Self::directional(Vec3::NEG_Y, color)
        }
    }

    pub fn spot(position: Vec3, direction: Vec3, color: Vec3, range: f32, cone: SpotCone) -> Self {
        Self {
            kind: LightKind::Spot,
            position,
            range,
            cone,
            ..Self::directional(direction, color)
        }
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_shadows(mut self, soft: bool) -> Self {
        self.casts_shadows = true;
        self.soft_shadows = soft;
        self
    }

    pub fn with_projector(mut self, texture: TextureId) -> Self {
        self.projector = Some(texture);
        self
    }

    pub fn classify(&self) -> LightClass {
        match self.kind {
            LightKind::Directional => LightClass::Directional,
            LightKind::Point if self.projector.is_some() => LightClass::ProjectivePoint,
            LightKind::Point => LightClass::Point,
            LightKind::Spot if self.projector.is_some() => LightClass::ProjectiveSpot,
            LightKind::Spot if self.cone.smooth => LightClass::SmoothSpot,
            LightKind::Spot => LightClass::Spot,
        }
    }

    /// Lights that cannot brighten any pixel.
    pub fn is_inert(&self) -> bool {
        let black = self.color.cmple(Vec3::ZERO).all() || self.intensity <= 0.0;
        black || (self.kind != LightKind::Directional && self.range <= 0.0)
    }

    /// Light-to-world transform; the light looks down its local -Z.
    pub fn world_transform(&self) -> Mat4 {
        let forward = self.direction.normalize_or_zero();
        let rotation = if forward == Vec3::ZERO {
            Quat::IDENTITY
        } else {
            Quat::from_rotation_arc(Vec3::NEG_Z, forward)
        };
        Mat4::from_rotation_translation(rotation, self.position)
    }

    /// World-space bounds of the lit volume; `None` for directional lights.
    pub fn bounds(&self) -> Option<Aabb> {
        match self.kind {
            LightKind::Directional => None,
            LightKind::Point | LightKind::Spot => Some(Aabb::from_center_half_extents(
                self.position,
                Vec3::splat(self.range.max(0.0)),
            )),
        }
    }

    /// World-to-projector-clip transform for projective spot lights.
    pub fn projector_matrix(&self) -> Mat4 {
        let (_, cos_outer) = self.cone.cosines();
        let fov = (2.0 * cos_outer.clamp(-1.0, 1.0).acos()).clamp(1e-3, std::f32::consts::PI - 1e-3);
        let near = (self.range * 0.001).max(1e-3);
        let proj = Mat4::perspective_rh(fov, 1.0, near, self.range.max(near * 2.0));
        proj * self.world_transform().inverse()
    }
}

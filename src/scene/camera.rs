use glam::{Mat4, Vec2, Vec3};

use crate::renderer::postprocess::DofSettings;

/// Depth-of-field settings carried by a camera; they override the pass
/// defaults while `active` is set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraDepthOfField {
    pub active: bool,
    pub settings: DofSettings,
}

#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
    pub depth_of_field: Option<CameraDepthOfField>,
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }
    pub fn proj(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect, self.near, self.far)
    }
    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        self.proj(aspect) * self.view()
    }
    pub fn position(&self) -> Vec3 {
        self.eye
    }
    pub fn forward(&self) -> Vec3 {
        (self.target - self.eye).normalize_or_zero()
    }

    /// View-space ray through the top-right corner at unit depth. Shaders
    /// rebuild a view position as `vec3(ndc.xy * scale, -1) * linear_depth`.
    pub fn view_ray_scale(&self, aspect: f32) -> Vec2 {
        let tan_half = (self.fov_y_radians * 0.5).tan();
        Vec2::new(tan_half * aspect, tan_half)
    }

    /// Depth-of-field settings if the camera carries active ones.
    pub fn active_depth_of_field(&self) -> Option<DofSettings> {
        self.depth_of_field
            .filter(|dof| dof.active)
            .map(|dof| dof.settings)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_radians: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
            depth_of_field: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn view_proj_is_reasonable() {
        let cam = Camera::default();
        let vp = cam.view_proj(16.0 / 9.0);
        let inv = vp.inverse();
        let id = vp * inv;
        assert!(id.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn view_ray_rebuilds_projected_point() {
        let cam = Camera::default();
        let aspect = 1.5;
        let view_pos = Vec3::new(0.4, -0.3, -5.0);
        let clip = cam.proj(aspect) * view_pos.extend(1.0);
        let ndc = clip.truncate() / clip.w;

        let scale = cam.view_ray_scale(aspect);
        let depth = -view_pos.z;
        let rebuilt = Vec3::new(ndc.x * scale.x, ndc.y * scale.y, -1.0) * depth;
        assert!(rebuilt.abs_diff_eq(view_pos, 1e-4));
    }

    #[test]
    fn inactive_camera_dof_is_ignored() {
        let cam = Camera {
            depth_of_field: Some(CameraDepthOfField {
                active: false,
                settings: DofSettings::default(),
            }),
            ..Camera::default()
        };
        assert!(cam.active_depth_of_field().is_none());
    }
}

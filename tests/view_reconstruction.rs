//! Screen-space math shared by the lighting and occlusion shaders.
//!
//! Conventions used in this codebase:
//! - Right-handed view space (camera looks down -Z).
//! - The GBuffer stores positive linear view depth, not the hardware depth.
//! - Fullscreen UVs have origin at top-left; scissor rows count downwards.
//!
use deferred_passes::renderer::device::ScissorRect;
use deferred_passes::renderer::lights::SpotCone;
use deferred_passes::renderer::passes::light_scissor;
use deferred_passes::renderer::Light;
use deferred_passes::scene::Camera;
use glam::{Vec2, Vec3, Vec4Swizzles};

fn project_to_ndc(camera: &Camera, aspect: f32, world: Vec3) -> (Vec2, f32) {
    let view = camera.view().transform_point3(world);
    let clip = camera.proj(aspect) * view.extend(1.0);
    (clip.xy() / clip.w, -view.z)
}

/// Same expression the shaders evaluate per pixel.
fn reconstruct(ndc: Vec2, linear_depth: f32, ray_scale: Vec2) -> Vec3 {
    (ndc * ray_scale).extend(-1.0) * linear_depth
}

fn approx_eq3(a: Vec3, b: Vec3, eps: f32) -> bool {
    (a - b).abs().max_element() <= eps
}

#[test]
fn linear_depth_rebuilds_the_view_position() {
    let camera = Camera::default();
    let aspect = 16.0 / 9.0;
    let scale = camera.view_ray_scale(aspect);

    let points = [
        Vec3::ZERO,
        Vec3::new(0.5, -0.25, 0.3),
        Vec3::new(-1.2, 0.8, -4.0),
        Vec3::new(2.0, 1.0, -20.0),
    ];
    for world in points {
        let (ndc, depth) = project_to_ndc(&camera, aspect, world);
        let expected = camera.view().transform_point3(world);
        let rebuilt = reconstruct(ndc, depth, scale);
        assert!(
            approx_eq3(rebuilt, expected, 1e-3 * depth.max(1.0)),
            "world {:?}: rebuilt {:?}, expected {:?}",
            world,
            rebuilt,
            expected
        );
    }
}

#[test]
fn ray_scale_reaches_the_frustum_corner() {
    let camera = Camera {
        fov_y_radians: 90f32.to_radians(),
        ..Camera::default()
    };
    let scale = camera.view_ray_scale(2.0);
    assert!((scale - Vec2::new(2.0, 1.0)).abs().max_element() < 1e-5);

    // The top-right corner at depth d sits at (2d, d, -d)
    let corner = reconstruct(Vec2::ONE, 3.0, scale);
    assert!(approx_eq3(corner, Vec3::new(6.0, 3.0, -3.0), 1e-4));
}

#[test]
fn point_light_scissor_is_centred_in_front_of_the_camera() {
    let camera = Camera::default();
    let viewport = (200, 100);
    let aspect = 2.0;
    let light = Light::point(Vec3::ZERO, Vec3::ONE, 0.5);

    let rect = light_scissor(&light, &camera.view_proj(aspect), viewport).unwrap();
    assert!(!rect.is_empty());
    assert!(rect.area() < ScissorRect::full(200, 100).area());

    let centre = Vec2::new(
        rect.x as f32 + rect.width as f32 * 0.5,
        rect.y as f32 + rect.height as f32 * 0.5,
    );
    assert!((centre - Vec2::new(100.0, 50.0)).abs().max_element() <= 1.0, "{:?}", rect);
}

#[test]
fn light_above_the_view_maps_to_upper_rows() {
    let camera = Camera::default();
    let light = Light::point(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE, 0.2);

    let rect = light_scissor(&light, &camera.view_proj(1.0), (100, 100)).unwrap();
    assert!(rect.y + rect.height <= 50, "{:?}", rect);
}

#[test]
fn light_around_the_camera_covers_the_viewport() {
    let camera = Camera::default();
    let light = Light::spot(
        camera.eye,
        Vec3::NEG_Z,
        Vec3::ONE,
        10.0,
        SpotCone::default(),
    );

    let rect = light_scissor(&light, &camera.view_proj(1.0), (64, 64)).unwrap();
    assert_eq!(rect, ScissorRect::full(64, 64));
}

#[test]
fn light_beside_the_frustum_is_rejected() {
    let camera = Camera::default();
    let light = Light::point(Vec3::new(30.0, 0.0, 0.0), Vec3::ONE, 1.0);

    assert_eq!(light_scissor(&light, &camera.view_proj(1.0), (64, 64)), None);
}
